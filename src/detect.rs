//! Column detection: bounded-concurrency probing of the candidate catalog.
//!
//! [`ColumnDetector`] spawns one probe task per catalog field on a `JoinSet`, never
//! keeping more than `max_concurrent_probes` in flight. Each task owns a child
//! cancellation token and its own timeout, so an abandoned probe is dropped by the
//! task itself and cannot touch the status table afterwards. Every field ends up
//! `exists` or `error`; nothing aborts the run.

use std::{
    collections::HashSet,
    fs::File,
    io::BufReader,
    path::Path,
    sync::Arc,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::{
    catalog::{CATALOG_VERSION, CandidateField, FieldSet, FieldStatus, FieldStatusTable},
    classify::{Classifier, SchemaVariant},
    config::DetectorConfig,
    error::DetectionLoadError,
    probe::{ProbeOutcome, probe_field},
    store::OrderStore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldReport {
    pub field: CandidateField,
    pub status: FieldStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "DetectionRecord")]
pub struct DetectionResult {
    catalog_version: u32,
    table: String,
    detected_at: DateTime<Utc>,
    minimal_threshold: usize,
    fields: Vec<FieldReport>,
    confirmed: Vec<CandidateField>,
    variant: SchemaVariant,
    #[serde(skip)]
    confirmed_set: FieldSet,
}

#[derive(Debug, Deserialize)]
struct DetectionRecord {
    catalog_version: u32,
    table: String,
    detected_at: DateTime<Utc>,
    minimal_threshold: usize,
    fields: Vec<FieldReport>,
    confirmed: Vec<CandidateField>,
    variant: SchemaVariant,
}

impl TryFrom<DetectionRecord> for DetectionResult {
    type Error = DetectionLoadError;

    fn try_from(record: DetectionRecord) -> Result<Self, Self::Error> {
        if record.catalog_version != CATALOG_VERSION {
            return Err(DetectionLoadError::CatalogVersion {
                found: record.catalog_version,
                expected: CATALOG_VERSION,
            });
        }
        let mut seen = FieldSet::empty();
        for report in &record.fields {
            if !seen.insert(report.field) {
                return Err(DetectionLoadError::DuplicateField(report.field));
            }
            if !report.status.is_resolved() {
                return Err(DetectionLoadError::UnresolvedField(report.field));
            }
        }
        let result = DetectionResult::assemble(
            record.table,
            record.detected_at,
            record.minimal_threshold,
            record.fields,
        );
        if result.confirmed != record.confirmed {
            return Err(DetectionLoadError::ConfirmedMismatch);
        }
        if result.variant != record.variant {
            return Err(DetectionLoadError::VariantMismatch {
                recorded: record.variant.to_string(),
                expected: result.variant.to_string(),
            });
        }
        Ok(result)
    }
}

impl DetectionResult {
    pub fn from_statuses(
        table: &str,
        catalog: &[CandidateField],
        statuses: &FieldStatusTable,
        minimal_threshold: usize,
    ) -> Self {
        let fields = catalog
            .iter()
            .map(|field| {
                let status = match statuses.get(*field) {
                    FieldStatus::Unknown => FieldStatus::Error,
                    resolved => resolved,
                };
                FieldReport {
                    field: *field,
                    status,
                }
            })
            .collect();
        Self::assemble(table.to_string(), Utc::now(), minimal_threshold, fields)
    }

    fn assemble(
        table: String,
        detected_at: DateTime<Utc>,
        minimal_threshold: usize,
        fields: Vec<FieldReport>,
    ) -> Self {
        let confirmed = fields
            .iter()
            .filter(|report| report.status == FieldStatus::Exists)
            .map(|report| report.field)
            .collect::<Vec<_>>();
        let confirmed_set = FieldSet::of(&confirmed);
        let variant = Classifier::new(minimal_threshold).classify(&confirmed_set);
        Self {
            catalog_version: CATALOG_VERSION,
            table,
            detected_at,
            minimal_threshold,
            fields,
            confirmed,
            variant,
            confirmed_set,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn detected_at(&self) -> DateTime<Utc> {
        self.detected_at
    }

    pub fn catalog_version(&self) -> u32 {
        self.catalog_version
    }

    pub fn minimal_threshold(&self) -> usize {
        self.minimal_threshold
    }

    pub fn variant(&self) -> SchemaVariant {
        self.variant
    }

    pub fn fields(&self) -> &[FieldReport] {
        &self.fields
    }

    pub fn status(&self, field: CandidateField) -> Option<FieldStatus> {
        self.fields
            .iter()
            .find(|report| report.field == field)
            .map(|report| report.status)
    }

    pub fn confirmed(&self) -> &[CandidateField] {
        &self.confirmed
    }

    pub fn confirmed_names(&self) -> Vec<&'static str> {
        self.confirmed.iter().map(|field| field.as_str()).collect()
    }

    pub fn confirmed_set(&self) -> FieldSet {
        self.confirmed_set
    }

    pub fn is_confirmed(&self, field: CandidateField) -> bool {
        self.confirmed_set.contains(field)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file =
            File::create(path).with_context(|| format!("Creating detection file {path:?}"))?;
        serde_json::to_writer_pretty(file, self).context("Writing detection JSON")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening detection file {path:?}"))?;
        let reader = BufReader::new(file);
        let result = serde_json::from_reader(reader)
            .with_context(|| format!("Parsing detection JSON {path:?}"))?;
        Ok(result)
    }
}

pub struct ColumnDetector {
    store: Arc<dyn OrderStore>,
    config: DetectorConfig,
}

impl ColumnDetector {
    pub fn new(store: Arc<dyn OrderStore>, config: DetectorConfig) -> Self {
        Self { store, config }
    }

    pub async fn detect(&self, catalog: &[CandidateField]) -> DetectionResult {
        self.detect_with_cancel(catalog, &CancellationToken::new())
            .await
    }

    pub async fn detect_with_cancel(
        &self,
        catalog: &[CandidateField],
        cancel: &CancellationToken,
    ) -> DetectionResult {
        let mut scheduled = HashSet::new();
        let fields = catalog
            .iter()
            .copied()
            .filter(|field| scheduled.insert(*field))
            .collect::<Vec<_>>();
        let width = self.config.max_concurrent_probes.max(1);
        let timeout = self.config.probe_timeout();
        info!(
            "Detecting {} candidate field(s) on '{}' (concurrency {}, timeout {:?})",
            fields.len(),
            self.config.table,
            width,
            timeout
        );

        let mut statuses = FieldStatusTable::new();
        let mut join_set = JoinSet::new();
        for field in &fields {
            if cancel.is_cancelled() {
                debug!("Detection cancelled before '{field}' was scheduled");
                break;
            }
            if join_set.len() >= width {
                if let Some(joined) = join_set.join_next().await {
                    absorb(&mut statuses, joined);
                }
            }

            let store = Arc::clone(&self.store);
            let table = self.config.table.clone();
            let token = cancel.child_token();
            let field = *field;
            join_set.spawn(async move {
                probe_field(store.as_ref(), &table, field, timeout, &token).await
            });
        }
        while let Some(joined) = join_set.join_next().await {
            absorb(&mut statuses, joined);
        }

        for field in &fields {
            if !statuses.get(*field).is_resolved() {
                let outcome = ProbeOutcome::cancelled(*field);
                statuses.record(outcome.field, outcome.status);
            }
        }

        let result = DetectionResult::from_statuses(
            &self.config.table,
            &fields,
            &statuses,
            self.config.minimal_field_threshold,
        );
        info!(
            "Detected {} of {} field(s); schema variant '{}'",
            result.confirmed().len(),
            fields.len(),
            result.variant()
        );
        result
    }
}

fn absorb(statuses: &mut FieldStatusTable, joined: Result<ProbeOutcome, JoinError>) {
    match joined {
        Ok(outcome) => {
            statuses.record(outcome.field, outcome.status);
        }
        Err(err) => warn!("Probe task ended without an outcome: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        catalog::CATALOG,
        memory::{MemoryStore, MemoryStoreConfig},
    };
    use std::time::Duration;

    fn embedded_columns() -> Vec<&'static str> {
        CATALOG.iter().map(|field| field.as_str()).collect()
    }

    #[tokio::test]
    async fn full_schema_classifies_as_embedded() {
        let store = Arc::new(MemoryStore::with_columns(embedded_columns()));
        let detector = ColumnDetector::new(store.clone(), DetectorConfig::default());
        let result = detector.detect(&CATALOG).await;
        assert_eq!(result.variant(), SchemaVariant::Embedded);
        assert_eq!(result.confirmed().len(), CATALOG.len());
        assert_eq!(store.select_calls(), CATALOG.len());
    }

    #[tokio::test]
    async fn every_field_is_resolved_even_when_all_probes_fail() {
        let store = Arc::new(MemoryStore::with_columns(Vec::<String>::new()));
        let detector = ColumnDetector::new(store, DetectorConfig::default());
        let result = detector.detect(&CATALOG).await;
        assert!(result.fields().iter().all(|r| r.status == FieldStatus::Error));
        assert!(result.confirmed().is_empty());
        assert_eq!(result.variant(), SchemaVariant::Unknown);
    }

    #[tokio::test]
    async fn empty_catalog_yields_unknown_variant() {
        let store = Arc::new(MemoryStore::with_columns(["id"]));
        let detector = ColumnDetector::new(store.clone(), DetectorConfig::default());
        let result = detector.detect(&[]).await;
        assert!(result.fields().is_empty());
        assert!(result.confirmed().is_empty());
        assert_eq!(result.variant(), SchemaVariant::Unknown);
        assert_eq!(store.select_calls(), 0);
    }

    #[tokio::test]
    async fn confirmed_fields_follow_catalog_order() {
        let store = Arc::new(MemoryStore::with_columns(["notes", "status", "id"]));
        let detector = ColumnDetector::new(store, DetectorConfig::default());
        let catalog = [
            CandidateField::Status,
            CandidateField::BillingCity,
            CandidateField::Notes,
            CandidateField::Id,
        ];
        let result = detector.detect(&catalog).await;
        assert_eq!(result.confirmed_names(), vec!["status", "notes", "id"]);
        assert_eq!(result.status(CandidateField::BillingCity), Some(FieldStatus::Error));
        assert_eq!(result.status(CandidateField::Currency), None);
        assert_eq!(result.variant(), SchemaVariant::Minimal);
    }

    #[tokio::test]
    async fn duplicate_catalog_entries_are_probed_once() {
        let store = Arc::new(MemoryStore::with_columns(["id"]));
        let detector = ColumnDetector::new(store.clone(), DetectorConfig::default());
        let result = detector
            .detect(&[CandidateField::Id, CandidateField::Id])
            .await;
        assert_eq!(result.fields().len(), 1);
        assert_eq!(store.select_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_width_does_not_change_the_result() {
        let config = MemoryStoreConfig {
            table: "orders".to_string(),
            columns: ["id", "status", "shipping_name", "notes", "currency", "tax_amount"]
                .map(String::from)
                .into(),
            latency_ms: [
                ("id".to_string(), 300),
                ("status".to_string(), 10),
                ("notes".to_string(), 9_000),
            ]
            .into(),
            default_latency_ms: 50,
            ..MemoryStoreConfig::default()
        };
        let sequential = ColumnDetector::new(
            Arc::new(MemoryStore::new(config.clone())),
            DetectorConfig {
                max_concurrent_probes: 1,
                ..DetectorConfig::default()
            },
        )
        .detect(&CATALOG)
        .await;
        let parallel = ColumnDetector::new(
            Arc::new(MemoryStore::new(config)),
            DetectorConfig {
                max_concurrent_probes: 16,
                ..DetectorConfig::default()
            },
        )
        .detect(&CATALOG)
        .await;
        assert_eq!(sequential.fields(), parallel.fields());
        assert_eq!(sequential.variant(), parallel.variant());
        assert_eq!(
            sequential.status(CandidateField::Notes),
            Some(FieldStatus::Error)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_the_configured_probe_width() {
        let store = Arc::new(MemoryStore::new(MemoryStoreConfig {
            table: "orders".to_string(),
            columns: embedded_columns().into_iter().map(String::from).collect(),
            default_latency_ms: 1_000,
            ..MemoryStoreConfig::default()
        }));
        let detector = ColumnDetector::new(
            store.clone(),
            DetectorConfig {
                max_concurrent_probes: 4,
                ..DetectorConfig::default()
            },
        );
        let started = tokio::time::Instant::now();
        let result = detector.detect(&CATALOG).await;
        assert!(started.elapsed() >= Duration::from_secs(9));
        assert_eq!(store.peak_in_flight(), 4);
        assert_eq!(result.confirmed().len(), CATALOG.len());
        assert_eq!(result.variant(), SchemaVariant::Embedded);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_resolves_outstanding_fields_to_error() {
        let store = Arc::new(MemoryStore::new(MemoryStoreConfig {
            table: "orders".to_string(),
            columns: embedded_columns().into_iter().map(String::from).collect(),
            default_latency_ms: 60_000,
            ..MemoryStoreConfig::default()
        }));
        let detector = ColumnDetector::new(
            store,
            DetectorConfig {
                probe_timeout_ms: 120_000,
                max_concurrent_probes: 2,
                ..DetectorConfig::default()
            },
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let started = tokio::time::Instant::now();
        let result = detector.detect_with_cancel(&CATALOG, &cancel).await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(result.fields().len(), CATALOG.len());
        assert!(result.fields().iter().all(|r| r.status == FieldStatus::Error));
    }

    #[test]
    fn tampered_variant_is_rejected_on_load() {
        let mut statuses = FieldStatusTable::new();
        statuses.record(CandidateField::Id, FieldStatus::Exists);
        statuses.record(CandidateField::Status, FieldStatus::Exists);
        let result = DetectionResult::from_statuses(
            "orders",
            &[CandidateField::Id, CandidateField::Status],
            &statuses,
            5,
        );
        let mut value = serde_json::to_value(&result).expect("serialize");
        value["variant"] = serde_json::json!("embedded");
        let err = serde_json::from_value::<DetectionResult>(value).unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn tampered_confirmed_list_is_rejected_on_load() {
        let mut statuses = FieldStatusTable::new();
        statuses.record(CandidateField::Id, FieldStatus::Exists);
        statuses.record(CandidateField::Notes, FieldStatus::Error);
        let result = DetectionResult::from_statuses(
            "orders",
            &[CandidateField::Id, CandidateField::Notes],
            &statuses,
            5,
        );
        let mut value = serde_json::to_value(&result).expect("serialize");
        value["confirmed"] = serde_json::json!(["id", "notes"]);
        let err = serde_json::from_value::<DetectionResult>(value).unwrap_err();
        assert!(err.to_string().contains("confirmed fields do not match"));
    }

    #[test]
    fn serialized_result_reloads_identically() {
        let mut statuses = FieldStatusTable::new();
        statuses.record(CandidateField::Id, FieldStatus::Exists);
        statuses.record(CandidateField::Notes, FieldStatus::Error);
        let result = DetectionResult::from_statuses(
            "orders",
            &[CandidateField::Id, CandidateField::Notes],
            &statuses,
            5,
        );
        let json = serde_json::to_string(&result).expect("serialize");
        let reloaded: DetectionResult = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(reloaded, result);
        assert_eq!(reloaded.catalog_version(), CATALOG_VERSION);
        assert_eq!(reloaded.detected_at(), result.detected_at());
        assert!(reloaded.is_confirmed(CandidateField::Id));
    }
}
