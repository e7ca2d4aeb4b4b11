use std::time::Duration;

use thiserror::Error;

use crate::catalog::CandidateField;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("column '{column}' does not exist on '{table}'")]
    MissingColumn { table: String, column: String },
    #[error("not authorized: {0}")]
    Unauthorized(String),
    #[error("remote store error: {0}")]
    Remote(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("could not decode store response: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("probe for '{field}' timed out after {timeout:?}")]
    Timeout {
        field: CandidateField,
        timeout: Duration,
    },
    #[error("probe for '{field}' failed: {source}")]
    Remote {
        field: CandidateField,
        #[source]
        source: StoreError,
    },
    #[error("probe for '{field}' was cancelled")]
    Cancelled { field: CandidateField },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MalformedRecordError {
    #[error("record is missing required field '{0}'")]
    MissingField(CandidateField),
    #[error("record field '{field}' has unusable value: {reason}")]
    InvalidField {
        field: CandidateField,
        reason: String,
    },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("skipped: prerequisite '{prerequisite}' failed")]
pub struct PrerequisiteSkippedError {
    pub prerequisite: &'static str,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DetectionLoadError {
    #[error("field '{0}' is still unresolved")]
    UnresolvedField(CandidateField),
    #[error("field '{0}' appears more than once")]
    DuplicateField(CandidateField),
    #[error("recorded confirmed fields do not match the per-field statuses")]
    ConfirmedMismatch,
    #[error("recorded variant '{recorded}' does not match classification '{expected}'")]
    VariantMismatch { recorded: String, expected: String },
    #[error("catalog version {found} is not supported (expected {expected})")]
    CatalogVersion { found: u32, expected: u32 },
}
