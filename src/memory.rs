use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::StoreError,
    store::{OrderStore, RawRecord, Session},
};

fn default_table() -> String {
    "orders".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStoreConfig {
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default)]
    pub columns: BTreeSet<String>,
    #[serde(default)]
    pub denied: BTreeSet<String>,
    #[serde(default)]
    pub latency_ms: BTreeMap<String, u64>,
    #[serde(default)]
    pub default_latency_ms: u64,
    #[serde(default)]
    pub rows: Vec<RawRecord>,
    #[serde(default)]
    pub session: Option<Session>,
    #[serde(default)]
    pub identity: Option<String>,
    #[serde(default)]
    pub fail_inserts: bool,
    #[serde(default)]
    pub fail_deletes: bool,
    #[serde(default)]
    pub offline: bool,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    config: MemoryStoreConfig,
    rows: Mutex<Vec<RawRecord>>,
    select_calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

struct InFlight<'a> {
    counter: &'a AtomicUsize,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryStore {
    pub fn new(config: MemoryStoreConfig) -> Self {
        let rows = Mutex::new(config.rows.clone());
        Self {
            config,
            rows,
            select_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(MemoryStoreConfig {
            table: default_table(),
            columns: columns.into_iter().map(Into::into).collect(),
            ..MemoryStoreConfig::default()
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Reading store fixture {path:?}"))?;
        let config: MemoryStoreConfig = serde_yaml::from_str(&raw)
            .with_context(|| format!("Parsing store fixture {path:?}"))?;
        Ok(Self::new(config))
    }

    pub fn select_calls(&self) -> usize {
        self.select_calls.load(Ordering::SeqCst)
    }

    /// Highest number of projection reads that were pending at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().map(|rows| rows.len()).unwrap_or_default()
    }

    fn enter_read(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight {
            counter: &self.in_flight,
        }
    }

    fn check_reachable(&self, table: &str) -> Result<(), StoreError> {
        if self.config.offline {
            return Err(StoreError::Transport("store is offline".to_string()));
        }
        if table != self.config.table {
            return Err(StoreError::Remote(format!(
                "relation \"{table}\" does not exist"
            )));
        }
        Ok(())
    }

    fn check_column(&self, table: &str, column: &str) -> Result<(), StoreError> {
        if !self.config.columns.contains(column) {
            return Err(StoreError::MissingColumn {
                table: table.to_string(),
                column: column.to_string(),
            });
        }
        if self.config.denied.contains(column) {
            return Err(StoreError::Unauthorized(format!(
                "permission denied for column {column}"
            )));
        }
        Ok(())
    }

    fn latency_for(&self, column: &str) -> Duration {
        let millis = self
            .config
            .latency_ms
            .get(column)
            .copied()
            .unwrap_or(self.config.default_latency_ms);
        Duration::from_millis(millis)
    }

    fn lock_rows(&self) -> Result<std::sync::MutexGuard<'_, Vec<RawRecord>>, StoreError> {
        self.rows
            .lock()
            .map_err(|_| StoreError::Remote("fixture rows lock poisoned".to_string()))
    }
}

fn id_matches(value: Option<&Value>, id: &str) -> bool {
    match value {
        Some(Value::String(text)) => text == id,
        Some(Value::Number(number)) => number.to_string() == id,
        _ => false,
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn select_field(
        &self,
        table: &str,
        column: &str,
        limit: usize,
    ) -> Result<Vec<RawRecord>, StoreError> {
        self.select_calls.fetch_add(1, Ordering::SeqCst);
        let _in_flight = self.enter_read();
        let latency = self.latency_for(column);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.check_reachable(table)?;
        self.check_column(table, column)?;
        let rows = self.lock_rows()?;
        Ok(rows
            .iter()
            .take(limit)
            .map(|row| {
                let mut projected = RawRecord::new();
                projected.insert(
                    column.to_string(),
                    row.get(column).cloned().unwrap_or(Value::Null),
                );
                projected
            })
            .collect())
    }

    async fn select_limited(
        &self,
        table: &str,
        limit: usize,
    ) -> Result<Vec<RawRecord>, StoreError> {
        self.select_calls.fetch_add(1, Ordering::SeqCst);
        if self.config.default_latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.default_latency_ms)).await;
        }
        self.check_reachable(table)?;
        let rows = self.lock_rows()?;
        Ok(rows.iter().take(limit).cloned().collect())
    }

    async fn insert(&self, table: &str, record: RawRecord) -> Result<RawRecord, StoreError> {
        self.check_reachable(table)?;
        if self.config.fail_inserts {
            return Err(StoreError::Unauthorized(
                "new row violates row-level security policy".to_string(),
            ));
        }
        for column in record.keys() {
            self.check_column(table, column)?;
        }
        let mut rows = self.lock_rows()?;
        rows.push(record.clone());
        Ok(record)
    }

    async fn delete_by_id(&self, table: &str, id: &str) -> Result<usize, StoreError> {
        self.check_reachable(table)?;
        if self.config.fail_deletes {
            return Err(StoreError::Unauthorized(
                "delete denied by row-level security policy".to_string(),
            ));
        }
        let mut rows = self.lock_rows()?;
        let before = rows.len();
        rows.retain(|row| !id_matches(row.get("id"), id));
        Ok(before - rows.len())
    }

    async fn session(&self) -> Result<Option<Session>, StoreError> {
        if self.config.offline {
            return Err(StoreError::Transport("store is offline".to_string()));
        }
        Ok(self.config.session.clone())
    }

    async fn current_identity(&self) -> Result<Option<String>, StoreError> {
        if self.config.offline {
            return Err(StoreError::Transport("store is offline".to_string()));
        }
        Ok(self.config.identity.clone())
    }
}
