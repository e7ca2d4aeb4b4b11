//! One-shot connectivity diagnostics against the order store.
//!
//! Five checks run strictly in sequence because later ones reuse earlier side
//! effects: the row written by `write` is the one `cleanup` removes. A check whose
//! prerequisite failed is still reported, as an error marked `skipped`.

use std::{fmt, future::Future, time::Duration};

use log::{info, warn};
use serde::Serialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::{
    config::DetectorConfig,
    error::{PrerequisiteSkippedError, StoreError},
    store::{OrderStore, RawRecord},
};

pub const DIAGNOSTIC_STATUS: &str = "diagnostic";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Session,
    Read,
    Write,
    Identity,
    Cleanup,
}

pub const CAPABILITIES: [Capability; 5] = [
    Capability::Session,
    Capability::Read,
    Capability::Write,
    Capability::Identity,
    Capability::Cleanup,
];

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Session => "session",
            Capability::Read => "read",
            Capability::Write => "write",
            Capability::Identity => "identity",
            Capability::Cleanup => "cleanup",
        }
    }

    pub fn prerequisite(self) -> Option<Capability> {
        match self {
            Capability::Write => Some(Capability::Read),
            Capability::Identity => Some(Capability::Session),
            Capability::Cleanup => Some(Capability::Write),
            Capability::Session | Capability::Read => None,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Success,
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CheckStatus::Success => "success",
            CheckStatus::Error => "error",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckEntry {
    pub capability: Capability,
    pub status: CheckStatus,
    pub message: String,
    pub evidence: Option<Value>,
    /// True when the check was not attempted because its prerequisite failed.
    pub skipped: bool,
}

impl CheckEntry {
    fn success(
        capability: Capability,
        message: impl Into<String>,
        evidence: Option<Value>,
    ) -> Self {
        Self {
            capability,
            status: CheckStatus::Success,
            message: message.into(),
            evidence,
            skipped: false,
        }
    }

    fn failed(capability: Capability, message: impl Into<String>) -> Self {
        Self {
            capability,
            status: CheckStatus::Error,
            message: message.into(),
            evidence: None,
            skipped: false,
        }
    }

    fn skipped(capability: Capability, reason: PrerequisiteSkippedError) -> Self {
        Self {
            capability,
            status: CheckStatus::Error,
            message: reason.to_string(),
            evidence: None,
            skipped: true,
        }
    }

    pub fn passed(&self) -> bool {
        self.status == CheckStatus::Success
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticsReport {
    entries: Vec<CheckEntry>,
}

impl DiagnosticsReport {
    pub fn entries(&self) -> &[CheckEntry] {
        &self.entries
    }

    pub fn get(&self, capability: Capability) -> Option<&CheckEntry> {
        self.entries
            .iter()
            .find(|entry| entry.capability == capability)
    }

    pub fn passed(&self, capability: Capability) -> bool {
        self.get(capability).is_some_and(CheckEntry::passed)
    }

    pub fn all_passed(&self) -> bool {
        self.entries.iter().all(CheckEntry::passed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticsConfig {
    pub table: String,
    pub timeout: Duration,
}

impl From<&DetectorConfig> for DiagnosticsConfig {
    fn from(config: &DetectorConfig) -> Self {
        Self {
            table: config.table.clone(),
            timeout: config.diagnostics_timeout(),
        }
    }
}

async fn bounded<T, F>(timeout: Duration, call: F) -> Result<T, String>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(err.to_string()),
        Err(_) => Err(format!("timed out after {timeout:?}")),
    }
}

fn record_id(record: &RawRecord) -> Option<String> {
    match record.get("id")? {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

pub async fn run_diagnostics(
    store: &dyn OrderStore,
    config: &DiagnosticsConfig,
) -> DiagnosticsReport {
    let table = config.table.as_str();
    let timeout = config.timeout;
    let mut entries = Vec::with_capacity(CAPABILITIES.len());

    let session = match bounded(timeout, store.session()).await {
        Ok(Some(session)) => {
            entries.push(CheckEntry::success(
                Capability::Session,
                format!("authenticated as {}", session.user_id),
                Some(json!({ "user_id": session.user_id, "email": session.email })),
            ));
            Some(session)
        }
        Ok(None) => {
            entries.push(CheckEntry::failed(
                Capability::Session,
                "no authenticated session",
            ));
            None
        }
        Err(reason) => {
            entries.push(CheckEntry::failed(Capability::Session, reason));
            None
        }
    };

    let read_ok = match bounded(timeout, store.select_limited(table, 1)).await {
        Ok(rows) => {
            entries.push(CheckEntry::success(
                Capability::Read,
                format!("read {} row(s) from '{table}'", rows.len()),
                Some(json!({ "rows": rows.len() })),
            ));
            true
        }
        Err(reason) => {
            entries.push(CheckEntry::failed(Capability::Read, reason));
            false
        }
    };

    let written_id = if read_ok {
        let probe_id = Uuid::new_v4().to_string();
        let mut record = RawRecord::new();
        record.insert("id".to_string(), Value::String(probe_id.clone()));
        record.insert(
            "status".to_string(),
            Value::String(DIAGNOSTIC_STATUS.to_string()),
        );
        match bounded(timeout, store.insert(table, record)).await {
            Ok(stored) => {
                let id = record_id(&stored).unwrap_or(probe_id);
                entries.push(CheckEntry::success(
                    Capability::Write,
                    format!("inserted diagnostic row {id}"),
                    Some(Value::Object(stored)),
                ));
                Some(id)
            }
            Err(reason) => {
                entries.push(CheckEntry::failed(Capability::Write, reason));
                None
            }
        }
    } else {
        entries.push(CheckEntry::skipped(
            Capability::Write,
            PrerequisiteSkippedError {
                prerequisite: Capability::Read.as_str(),
            },
        ));
        None
    };

    match &session {
        Some(session) => match bounded(timeout, store.current_identity()).await {
            Ok(Some(identity)) if identity == session.user_id => {
                entries.push(CheckEntry::success(
                    Capability::Identity,
                    format!("store identity matches session ({identity})"),
                    Some(json!({ "identity": identity })),
                ));
            }
            Ok(Some(identity)) => {
                entries.push(CheckEntry::failed(
                    Capability::Identity,
                    format!(
                        "store reports caller '{identity}' but session is '{}'",
                        session.user_id
                    ),
                ));
            }
            Ok(None) => {
                entries.push(CheckEntry::failed(
                    Capability::Identity,
                    "store did not report a caller identity",
                ));
            }
            Err(reason) => {
                entries.push(CheckEntry::failed(Capability::Identity, reason));
            }
        },
        None => entries.push(CheckEntry::skipped(
            Capability::Identity,
            PrerequisiteSkippedError {
                prerequisite: Capability::Session.as_str(),
            },
        )),
    }

    match &written_id {
        Some(id) => match bounded(timeout, store.delete_by_id(table, id)).await {
            Ok(removed) if removed > 0 => {
                entries.push(CheckEntry::success(
                    Capability::Cleanup,
                    format!("deleted diagnostic row {id}"),
                    Some(json!({ "deleted": removed })),
                ));
            }
            Ok(_) => {
                entries.push(CheckEntry::failed(
                    Capability::Cleanup,
                    format!("no rows deleted for id {id}"),
                ));
            }
            Err(reason) => {
                entries.push(CheckEntry::failed(Capability::Cleanup, reason));
            }
        },
        None => entries.push(CheckEntry::skipped(
            Capability::Cleanup,
            PrerequisiteSkippedError {
                prerequisite: Capability::Write.as_str(),
            },
        )),
    }

    for entry in &entries {
        if entry.passed() {
            info!("{}: {}", entry.capability, entry.message);
        } else {
            warn!("{}: {}", entry.capability, entry.message);
        }
    }
    DiagnosticsReport { entries }
}
