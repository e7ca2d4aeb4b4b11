use std::{fs::File, io::BufReader, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TABLE: &str = "orders";
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_MAX_CONCURRENT_PROBES: usize = 4;
pub const DEFAULT_MINIMAL_FIELD_THRESHOLD: usize = 5;
pub const DEFAULT_DIAGNOSTICS_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectorConfig {
    pub table: String,
    pub probe_timeout_ms: u64,
    pub max_concurrent_probes: usize,
    pub minimal_field_threshold: usize,
    pub diagnostics_timeout_ms: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            table: DEFAULT_TABLE.to_string(),
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            max_concurrent_probes: DEFAULT_MAX_CONCURRENT_PROBES,
            minimal_field_threshold: DEFAULT_MINIMAL_FIELD_THRESHOLD,
            diagnostics_timeout_ms: DEFAULT_DIAGNOSTICS_TIMEOUT_MS,
        }
    }
}

impl DetectorConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn diagnostics_timeout(&self) -> Duration {
        Duration::from_millis(self.diagnostics_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.table.trim().is_empty(), "Table name cannot be empty");
        ensure!(self.probe_timeout_ms > 0, "Probe timeout must be positive");
        ensure!(
            self.max_concurrent_probes > 0,
            "Probe concurrency must be at least 1"
        );
        ensure!(
            self.diagnostics_timeout_ms > 0,
            "Diagnostics timeout must be positive"
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening config file {path:?}"))?;
        let reader = BufReader::new(file);
        let config: DetectorConfig =
            serde_yaml::from_reader(reader).with_context(|| format!("Parsing config {path:?}"))?;
        config
            .validate()
            .with_context(|| format!("Validating config {path:?}"))?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("Creating config file {path:?}"))?;
        serde_yaml::to_writer(file, self).context("Writing config YAML")
    }
}
