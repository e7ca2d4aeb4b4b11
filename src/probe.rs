use std::time::Duration;

use log::{debug, warn};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    catalog::{CandidateField, FieldStatus},
    error::ProbeError,
    store::OrderStore,
};

pub const PROBE_ROW_LIMIT: usize = 1;

#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub field: CandidateField,
    pub status: FieldStatus,
    pub elapsed: Duration,
    pub failure: Option<ProbeError>,
}

impl ProbeOutcome {
    fn exists(field: CandidateField, elapsed: Duration) -> Self {
        Self {
            field,
            status: FieldStatus::Exists,
            elapsed,
            failure: None,
        }
    }

    fn failed(field: CandidateField, elapsed: Duration, failure: ProbeError) -> Self {
        Self {
            field,
            status: FieldStatus::Error,
            elapsed,
            failure: Some(failure),
        }
    }

    pub fn cancelled(field: CandidateField) -> Self {
        Self::failed(field, Duration::ZERO, ProbeError::Cancelled { field })
    }
}

/// Issues one projection read for `field` and resolves within `timeout`.
///
/// The remote call is dropped as soon as the timer or `cancel` fires, so a slow
/// response can never surface after the outcome has been returned.
pub async fn probe_field(
    store: &dyn OrderStore,
    table: &str,
    field: CandidateField,
    timeout: Duration,
    cancel: &CancellationToken,
) -> ProbeOutcome {
    let started = Instant::now();
    debug!("Probing '{table}.{field}' (timeout {timeout:?})");

    let outcome = tokio::select! {
        biased;
        () = cancel.cancelled() => {
            ProbeOutcome::failed(field, started.elapsed(), ProbeError::Cancelled { field })
        }
        result = tokio::time::timeout(timeout, store.select_field(table, field.as_str(), PROBE_ROW_LIMIT)) => {
            match result {
                Ok(Ok(_)) => ProbeOutcome::exists(field, started.elapsed()),
                Ok(Err(source)) => {
                    ProbeOutcome::failed(field, started.elapsed(), ProbeError::Remote { field, source })
                }
                Err(_) => {
                    ProbeOutcome::failed(field, started.elapsed(), ProbeError::Timeout { field, timeout })
                }
            }
        }
    };

    match &outcome.failure {
        None => debug!("'{field}' exists ({:?})", outcome.elapsed),
        Some(failure @ ProbeError::Timeout { .. }) => warn!("{failure}"),
        Some(failure) => debug!("{failure}"),
    }
    outcome
}
