pub mod catalog;
pub mod classify;
pub mod cli;
pub mod config;
pub mod detect;
pub mod diagnostics;
pub mod error;
pub mod memory;
pub mod normalize;
pub mod probe;
pub mod report;
pub mod rest;
pub mod store;

use std::{
    env,
    fs::{self, File},
    io::{self, Write},
    path::Path,
    sync::{Arc, OnceLock},
};

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use log::{LevelFilter, debug, info, warn};
use serde_json::Value;

pub use crate::{
    catalog::{CATALOG, CandidateField, FieldSet, FieldStatus},
    classify::{Classifier, SchemaVariant, classify},
    config::DetectorConfig,
    detect::{ColumnDetector, DetectionResult},
    diagnostics::{DiagnosticsReport, run_diagnostics},
    error::{MalformedRecordError, PrerequisiteSkippedError, ProbeError, StoreError},
    normalize::{NormalizedOrder, Normalizer, normalize},
    store::{OrderStore, RawRecord},
};

use crate::{
    cli::{
        ClassifyArgs, Cli, Commands, ConfigArgs, DetectArgs, DiagnoseArgs, NormalizeArgs,
        OutputFormat, StoreArgs,
    },
    diagnostics::DiagnosticsConfig,
    memory::MemoryStore,
    rest::{RestStore, RestStoreConfig},
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("order_schema_probe", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Catalog => {
            print!("{}", report::render_catalog());
            Ok(())
        }
        Commands::Detect(args) => block_on(handle_detect(&args)),
        Commands::Classify(args) => handle_classify(&args),
        Commands::Normalize(args) => handle_normalize(&args),
        Commands::Diagnose(args) => block_on(handle_diagnose(&args)),
    }
}

fn block_on<F>(future: F) -> Result<()>
where
    F: std::future::Future<Output = Result<()>>,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Starting async runtime")?;
    runtime.block_on(future)
}

fn resolve_config(args: &ConfigArgs) -> Result<DetectorConfig> {
    let mut config = match &args.config {
        Some(path) => DetectorConfig::load(path)
            .with_context(|| format!("Loading detector config from {path:?}"))?,
        None => DetectorConfig::default(),
    };
    if let Some(table) = &args.table {
        config.table = table.trim().to_string();
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.probe_timeout_ms = timeout_ms;
        config.diagnostics_timeout_ms = timeout_ms;
    }
    if let Some(concurrency) = args.concurrency {
        config.max_concurrent_probes = concurrency;
    }
    if let Some(threshold) = args.minimal_threshold {
        config.minimal_field_threshold = threshold;
    }
    config.validate()?;
    debug!("Resolved detector config: {config:?}");
    Ok(config)
}

fn open_store(args: &StoreArgs) -> Result<Arc<dyn OrderStore>> {
    if let Some(path) = &args.fixture {
        info!("Using in-memory store from fixture {path:?}");
        let store = MemoryStore::load(path)?;
        return Ok(Arc::new(store));
    }
    let url = args
        .url
        .as_deref()
        .ok_or_else(|| anyhow!("Provide --fixture or --url (ORDER_STORE_URL) to select a store"))?;
    let api_key = args
        .api_key
        .as_deref()
        .ok_or_else(|| anyhow!("--api-key (ORDER_STORE_API_KEY) is required with --url"))?;
    let mut config = RestStoreConfig::new(url, api_key);
    config.access_token = args.access_token.clone();
    info!("Using REST store at {url}");
    Ok(Arc::new(RestStore::new(config)?))
}

async fn handle_detect(args: &DetectArgs) -> Result<()> {
    let config = resolve_config(&args.config)?;
    let store = open_store(&args.store)?;
    let catalog = if args.fields.is_empty() {
        CATALOG.to_vec()
    } else {
        catalog::parse_field_list(&args.fields).context("Parsing --fields")?
    };

    let detector = ColumnDetector::new(store, config);
    let result = detector.detect(&catalog).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", report::render_detection(&result));
    }
    if let Some(path) = &args.output {
        result
            .save(path)
            .with_context(|| format!("Writing detection result to {path:?}"))?;
        info!("Detection result written to {path:?}");
    }
    Ok(())
}

fn handle_classify(args: &ClassifyArgs) -> Result<()> {
    let fields = catalog::parse_field_list(&args.fields).context("Parsing --fields")?;
    let classifier = args
        .minimal_threshold
        .map(Classifier::new)
        .unwrap_or_default();
    let confirmed = fields.into_iter().collect::<FieldSet>();
    let variant = classifier.classify(&confirmed);
    info!(
        "Classified {} confirmed field(s) with threshold {}",
        confirmed.len(),
        classifier.minimal_threshold
    );
    println!("{variant}");
    Ok(())
}

fn handle_normalize(args: &NormalizeArgs) -> Result<()> {
    let normalizer = match (&args.detection, &args.variant) {
        (Some(path), _) => {
            let detection = DetectionResult::load(path)
                .with_context(|| format!("Loading detection result from {path:?}"))?;
            Normalizer::new(&detection)
        }
        (None, Some(variant)) => Normalizer::for_variant(variant.parse()?),
        (None, None) => bail!("Provide --detection or --variant"),
    };
    let records = read_records(&args.input)?;
    let results = normalizer.normalize_batch(&records);

    let mut orders = Vec::with_capacity(results.len());
    let mut malformed = Vec::new();
    for (idx, result) in results.into_iter().enumerate() {
        match result {
            Ok(order) => orders.push(order),
            Err(err) => malformed.push(format!("record {}: {err}", idx + 1)),
        }
    }
    if args.strict && !malformed.is_empty() {
        bail!(
            "{} malformed record(s): {}",
            malformed.len(),
            malformed.join("; ")
        );
    }

    let writer: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("Creating output file {path:?}"))?,
        ),
        None => Box::new(io::stdout().lock()),
    };
    write_orders(writer, &orders, args.format)?;

    info!(
        "Normalized {} of {} record(s) as '{}'",
        orders.len(),
        records.len(),
        normalizer.variant()
    );
    if !malformed.is_empty() {
        warn!("Skipped {} malformed record(s)", malformed.len());
    }
    Ok(())
}

fn write_orders(
    mut writer: Box<dyn Write>,
    orders: &[NormalizedOrder],
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut writer, orders).context("Writing JSON output")?;
            writeln!(writer)?;
        }
        OutputFormat::Csv => {
            let mut csv_writer = csv::Writer::from_writer(writer);
            csv_writer.write_record(normalize::FLAT_HEADERS)?;
            for order in orders {
                csv_writer.write_record(order.flatten())?;
            }
            csv_writer.flush().context("Flushing CSV output")?;
        }
    }
    Ok(())
}

/// Reads raw records from a JSON array or newline-delimited JSON objects.
pub fn read_records(path: &Path) -> Result<Vec<RawRecord>> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("Reading records from {path:?}"))?;
    let trimmed = raw.trim_start();
    if trimmed.starts_with('[') {
        let values: Vec<Value> =
            serde_json::from_str(trimmed).with_context(|| format!("Parsing JSON array {path:?}"))?;
        return values
            .into_iter()
            .enumerate()
            .map(|(idx, value)| into_record(value, idx + 1))
            .collect();
    }
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            let value: Value = serde_json::from_str(line)
                .with_context(|| format!("Parsing line {} of {path:?}", idx + 1))?;
            into_record(value, idx + 1)
        })
        .collect()
}

fn into_record(value: Value, position: usize) -> Result<RawRecord> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(anyhow!(
            "Record {position} must be a JSON object, found {other}"
        )),
    }
}

async fn handle_diagnose(args: &DiagnoseArgs) -> Result<()> {
    let config = resolve_config(&args.config)?;
    let store = open_store(&args.store)?;
    let report = run_diagnostics(store.as_ref(), &DiagnosticsConfig::from(&config)).await;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report::render_diagnostics(&report));
    }
    if args.strict && !report.all_passed() {
        let failed = report
            .entries()
            .iter()
            .filter(|entry| !entry.passed())
            .map(|entry| entry.capability.as_str())
            .collect::<Vec<_>>();
        bail!("Diagnostics failed for: {}", failed.join(", "));
    }
    Ok(())
}
