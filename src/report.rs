use std::borrow::Cow;
use std::fmt::Write as _;

use chrono::SecondsFormat;
use itertools::Itertools;

use crate::{
    catalog::{CATALOG, FieldStatus},
    detect::DetectionResult,
    diagnostics::DiagnosticsReport,
};

pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths = headers.iter().map(|h| h.chars().count()).collect::<Vec<_>>();
    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(headers.len()) {
            widths[idx] = widths[idx].max(sanitize_cell(cell).chars().count());
        }
    }

    let mut output = String::new();
    let header_cells = headers.iter().map(|h| h.to_string()).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&header_cells, &widths));
    let rule = widths
        .iter()
        .map(|w| "-".repeat((*w).max(3)))
        .collect::<Vec<_>>();
    let rule_widths = widths.iter().map(|w| (*w).max(3)).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&rule, &rule_widths));
    for row in rows {
        let _ = writeln!(output, "{}", format_row(row, &widths));
    }
    output
}

fn format_row(values: &[String], widths: &[usize]) -> String {
    let line = values
        .iter()
        .zip(widths)
        .map(|(value, width)| {
            let cell = sanitize_cell(value);
            let padding = width.saturating_sub(cell.chars().count());
            format!("{cell}{}", " ".repeat(padding))
        })
        .join("  ");
    line.trim_end().to_string()
}

fn sanitize_cell(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}

pub fn render_detection(result: &DetectionResult) -> String {
    let rows = result
        .fields()
        .iter()
        .enumerate()
        .map(|(idx, report)| {
            let marker = match report.status {
                FieldStatus::Exists => "✓",
                _ => "✗",
            };
            vec![
                (idx + 1).to_string(),
                report.field.to_string(),
                format!("{marker} {}", report.status),
            ]
        })
        .collect::<Vec<_>>();
    let mut output = render_table(&["#", "field", "status"], &rows);
    let _ = writeln!(
        output,
        "\ntable: {}  catalog: v{}  detected: {}  confirmed: {}/{}  variant: {}",
        result.table(),
        result.catalog_version(),
        result.detected_at().to_rfc3339_opts(SecondsFormat::Secs, true),
        result.confirmed().len(),
        result.fields().len(),
        result.variant()
    );
    output
}

pub fn render_diagnostics(report: &DiagnosticsReport) -> String {
    let rows = report
        .entries()
        .iter()
        .map(|entry| {
            vec![
                entry.capability.to_string(),
                entry.status.to_string(),
                entry.message.clone(),
            ]
        })
        .collect::<Vec<_>>();
    render_table(&["capability", "status", "message"], &rows)
}

pub fn render_catalog() -> String {
    let rows = CATALOG
        .iter()
        .enumerate()
        .map(|(idx, field)| {
            vec![
                (idx + 1).to_string(),
                field.to_string(),
                format!("{:?}", field.group()).to_ascii_lowercase(),
            ]
        })
        .collect::<Vec<_>>();
    render_table(&["#", "field", "group"], &rows)
}
