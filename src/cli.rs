use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Detect, classify, and normalize evolving order schemas",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List the candidate fields the detector probes for
    Catalog,
    /// Probe the order store for every candidate field and classify its schema
    Detect(DetectArgs),
    /// Classify a confirmed-field list without contacting a store
    Classify(ClassifyArgs),
    /// Normalize raw order records using a saved detection result
    Normalize(NormalizeArgs),
    /// Check session, read, write, identity, and cleanup access to the store
    Diagnose(DiagnoseArgs),
}

#[derive(Debug, Args)]
pub struct StoreArgs {
    /// YAML fixture describing an in-memory order store (takes precedence over --url)
    #[arg(long)]
    pub fixture: Option<PathBuf>,
    /// Base URL of the PostgREST-compatible backend
    #[arg(long, env = "ORDER_STORE_URL")]
    pub url: Option<String>,
    /// API key sent with every request
    #[arg(long = "api-key", env = "ORDER_STORE_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,
    /// Access token for an authenticated session
    #[arg(long = "access-token", env = "ORDER_STORE_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Detector configuration file (YAML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Order table name
    #[arg(long)]
    pub table: Option<String>,
    /// Per-probe timeout in milliseconds
    #[arg(long = "timeout-ms")]
    pub timeout_ms: Option<u64>,
    /// Maximum probes in flight at once
    #[arg(long)]
    pub concurrency: Option<usize>,
    /// Confirmed-field count at or below which the schema is classified minimal
    #[arg(long = "minimal-threshold")]
    pub minimal_threshold: Option<usize>,
}

#[derive(Debug, Args)]
pub struct DetectArgs {
    #[command(flatten)]
    pub store: StoreArgs,
    #[command(flatten)]
    pub config: ConfigArgs,
    /// Restrict probing to this comma-separated list of candidate fields
    #[arg(short = 'F', long = "fields", action = clap::ArgAction::Append)]
    pub fields: Vec<String>,
    /// Write the detection result as JSON to this file
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Print the detection result as JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ClassifyArgs {
    /// Comma-separated list of confirmed fields
    #[arg(short = 'F', long = "fields", required = true, action = clap::ArgAction::Append)]
    pub fields: Vec<String>,
    /// Confirmed-field count at or below which the schema is classified minimal
    #[arg(long = "minimal-threshold")]
    pub minimal_threshold: Option<usize>,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq, Default)]
#[value(rename_all = "kebab-case")]
pub enum OutputFormat {
    #[default]
    Json,
    Csv,
}

#[derive(Debug, Args)]
pub struct NormalizeArgs {
    /// Detection result produced by `detect --output`
    #[arg(short, long, required_unless_present = "variant")]
    pub detection: Option<PathBuf>,
    /// Normalize against a bare schema variant instead of a detection result
    #[arg(long, conflicts_with = "detection")]
    pub variant: Option<String>,
    /// Raw records as a JSON array or newline-delimited JSON
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Output file (stdout if omitted)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value = "json")]
    pub format: OutputFormat,
    /// Fail when any record is malformed
    #[arg(long)]
    pub strict: bool,
}

#[derive(Debug, Args)]
pub struct DiagnoseArgs {
    #[command(flatten)]
    pub store: StoreArgs,
    #[command(flatten)]
    pub config: ConfigArgs,
    /// Print the report as JSON instead of a table
    #[arg(long)]
    pub json: bool,
    /// Exit with an error when any capability fails
    #[arg(long)]
    pub strict: bool,
}
