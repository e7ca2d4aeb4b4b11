//! Schema variant classification.
//!
//! Classification is a pure function of the confirmed-field set and the minimal
//! threshold. Rules are checked in order and the first match wins:
//!
//! 1. `embedded`: shipping recipient, shipping street, and billing recipient are all
//!    confirmed, which only a schema storing full addresses inline can satisfy.
//! 2. `minimal`: at least one and at most `minimal_threshold` fields are confirmed.
//! 3. `unknown`: anything else, including a set with nothing confirmed.

use std::{fmt, str::FromStr};

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::{
    catalog::{CandidateField, FieldSet},
    config::DEFAULT_MINIMAL_FIELD_THRESHOLD,
};

pub const EMBEDDED_FINGERPRINT: [CandidateField; 3] = [
    CandidateField::ShippingName,
    CandidateField::ShippingStreet,
    CandidateField::BillingName,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaVariant {
    Embedded,
    Minimal,
    Unknown,
}

impl SchemaVariant {
    pub fn as_str(self) -> &'static str {
        match self {
            SchemaVariant::Embedded => "embedded",
            SchemaVariant::Minimal => "minimal",
            SchemaVariant::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SchemaVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemaVariant {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "embedded" => Ok(SchemaVariant::Embedded),
            "minimal" => Ok(SchemaVariant::Minimal),
            "unknown" => Ok(SchemaVariant::Unknown),
            other => Err(anyhow!("Unknown schema variant '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classifier {
    pub minimal_threshold: usize,
}

impl Default for Classifier {
    fn default() -> Self {
        Self {
            minimal_threshold: DEFAULT_MINIMAL_FIELD_THRESHOLD,
        }
    }
}

impl Classifier {
    pub fn new(minimal_threshold: usize) -> Self {
        Self { minimal_threshold }
    }

    pub fn classify(&self, confirmed: &FieldSet) -> SchemaVariant {
        if confirmed.contains_all(&FieldSet::of(&EMBEDDED_FINGERPRINT)) {
            SchemaVariant::Embedded
        } else if !confirmed.is_empty() && confirmed.len() <= self.minimal_threshold {
            SchemaVariant::Minimal
        } else {
            SchemaVariant::Unknown
        }
    }
}

pub fn classify(confirmed: &FieldSet) -> SchemaVariant {
    Classifier::default().classify(confirmed)
}
