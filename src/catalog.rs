//! Candidate field catalog, per-field probe status, and field sets.
//!
//! The catalog is closed: every column the detector knows how to look for is a
//! [`CandidateField`] variant, listed once in [`CATALOG`] in a fixed order. Extending
//! detection means adding a variant here and bumping [`CATALOG_VERSION`].
//!
//! Two fixed-size containers are keyed by the enum rather than by column name:
//!
//! - [`FieldStatusTable`] holds one write-once [`FieldStatus`] cell per field.
//! - [`FieldSet`] is a bitset used for confirmed-field sets and classification.

use std::{fmt, str::FromStr};

use anyhow::{Result, anyhow};
use log::warn;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

pub const CATALOG_VERSION: u32 = 1;
pub const FIELD_COUNT: usize = 36;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CandidateField {
    Id,
    OrderNumber,
    CreatedAt,
    UpdatedAt,
    UserId,
    Status,
    CustomerName,
    CustomerEmail,
    CustomerPhone,
    ShippingName,
    ShippingStreet,
    ShippingCity,
    ShippingState,
    ShippingPostalCode,
    ShippingCountry,
    ShippingPhone,
    BillingName,
    BillingStreet,
    BillingCity,
    BillingState,
    BillingPostalCode,
    BillingCountry,
    BillingPhone,
    Subtotal,
    TaxAmount,
    ShippingCost,
    DiscountAmount,
    TotalAmount,
    Currency,
    PaymentMethod,
    PaymentStatus,
    PaymentReference,
    ShippingMethod,
    TrackingNumber,
    Notes,
    AdminNotes,
}

pub const CATALOG: [CandidateField; FIELD_COUNT] = [
    CandidateField::Id,
    CandidateField::OrderNumber,
    CandidateField::CreatedAt,
    CandidateField::UpdatedAt,
    CandidateField::UserId,
    CandidateField::Status,
    CandidateField::CustomerName,
    CandidateField::CustomerEmail,
    CandidateField::CustomerPhone,
    CandidateField::ShippingName,
    CandidateField::ShippingStreet,
    CandidateField::ShippingCity,
    CandidateField::ShippingState,
    CandidateField::ShippingPostalCode,
    CandidateField::ShippingCountry,
    CandidateField::ShippingPhone,
    CandidateField::BillingName,
    CandidateField::BillingStreet,
    CandidateField::BillingCity,
    CandidateField::BillingState,
    CandidateField::BillingPostalCode,
    CandidateField::BillingCountry,
    CandidateField::BillingPhone,
    CandidateField::Subtotal,
    CandidateField::TaxAmount,
    CandidateField::ShippingCost,
    CandidateField::DiscountAmount,
    CandidateField::TotalAmount,
    CandidateField::Currency,
    CandidateField::PaymentMethod,
    CandidateField::PaymentStatus,
    CandidateField::PaymentReference,
    CandidateField::ShippingMethod,
    CandidateField::TrackingNumber,
    CandidateField::Notes,
    CandidateField::AdminNotes,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldGroup {
    Identity,
    Timestamp,
    Customer,
    Shipping,
    Billing,
    Totals,
    Payment,
    Fulfillment,
    Notes,
}

impl CandidateField {
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CandidateField::Id => "id",
            CandidateField::OrderNumber => "order_number",
            CandidateField::CreatedAt => "created_at",
            CandidateField::UpdatedAt => "updated_at",
            CandidateField::UserId => "user_id",
            CandidateField::Status => "status",
            CandidateField::CustomerName => "customer_name",
            CandidateField::CustomerEmail => "customer_email",
            CandidateField::CustomerPhone => "customer_phone",
            CandidateField::ShippingName => "shipping_name",
            CandidateField::ShippingStreet => "shipping_street",
            CandidateField::ShippingCity => "shipping_city",
            CandidateField::ShippingState => "shipping_state",
            CandidateField::ShippingPostalCode => "shipping_postal_code",
            CandidateField::ShippingCountry => "shipping_country",
            CandidateField::ShippingPhone => "shipping_phone",
            CandidateField::BillingName => "billing_name",
            CandidateField::BillingStreet => "billing_street",
            CandidateField::BillingCity => "billing_city",
            CandidateField::BillingState => "billing_state",
            CandidateField::BillingPostalCode => "billing_postal_code",
            CandidateField::BillingCountry => "billing_country",
            CandidateField::BillingPhone => "billing_phone",
            CandidateField::Subtotal => "subtotal",
            CandidateField::TaxAmount => "tax_amount",
            CandidateField::ShippingCost => "shipping_cost",
            CandidateField::DiscountAmount => "discount_amount",
            CandidateField::TotalAmount => "total_amount",
            CandidateField::Currency => "currency",
            CandidateField::PaymentMethod => "payment_method",
            CandidateField::PaymentStatus => "payment_status",
            CandidateField::PaymentReference => "payment_reference",
            CandidateField::ShippingMethod => "shipping_method",
            CandidateField::TrackingNumber => "tracking_number",
            CandidateField::Notes => "notes",
            CandidateField::AdminNotes => "admin_notes",
        }
    }

    pub fn group(self) -> FieldGroup {
        use CandidateField::*;
        match self {
            Id | OrderNumber | UserId | Status => FieldGroup::Identity,
            CreatedAt | UpdatedAt => FieldGroup::Timestamp,
            CustomerName | CustomerEmail | CustomerPhone => FieldGroup::Customer,
            ShippingName | ShippingStreet | ShippingCity | ShippingState | ShippingPostalCode
            | ShippingCountry | ShippingPhone => FieldGroup::Shipping,
            BillingName | BillingStreet | BillingCity | BillingState | BillingPostalCode
            | BillingCountry | BillingPhone => FieldGroup::Billing,
            Subtotal | TaxAmount | ShippingCost | DiscountAmount | TotalAmount | Currency => {
                FieldGroup::Totals
            }
            PaymentMethod | PaymentStatus | PaymentReference => FieldGroup::Payment,
            ShippingMethod | TrackingNumber => FieldGroup::Fulfillment,
            Notes | AdminNotes => FieldGroup::Notes,
        }
    }
}

impl fmt::Display for CandidateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CandidateField {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        let needle = value.trim();
        CATALOG
            .iter()
            .copied()
            .find(|field| field.as_str() == needle)
            .ok_or_else(|| anyhow!("Unknown candidate field '{needle}'"))
    }
}

impl Serialize for CandidateField {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for CandidateField {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        CandidateField::from_str(&raw).map_err(de::Error::custom)
    }
}

pub fn parse_field_list(specs: &[String]) -> Result<Vec<CandidateField>> {
    let mut fields = Vec::new();
    for raw in specs {
        for token in raw.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            fields.push(CandidateField::from_str(token)?);
        }
    }
    Ok(fields)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldStatus {
    Exists,
    Error,
    #[default]
    Unknown,
}

impl FieldStatus {
    pub fn is_resolved(self) -> bool {
        !matches!(self, FieldStatus::Unknown)
    }
}

impl fmt::Display for FieldStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FieldStatus::Exists => "exists",
            FieldStatus::Error => "error",
            FieldStatus::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone)]
pub struct FieldStatusTable {
    cells: [FieldStatus; FIELD_COUNT],
}

impl Default for FieldStatusTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldStatusTable {
    pub fn new() -> Self {
        Self {
            cells: [FieldStatus::Unknown; FIELD_COUNT],
        }
    }

    pub fn get(&self, field: CandidateField) -> FieldStatus {
        self.cells[field.index()]
    }

    /// Stores `status` for `field` unless the cell was already resolved.
    ///
    /// Returns `false` when the write was rejected; the first value is kept.
    pub fn record(&mut self, field: CandidateField, status: FieldStatus) -> bool {
        let cell = &mut self.cells[field.index()];
        if cell.is_resolved() {
            warn!("Ignoring second status '{status}' for field '{field}' (already '{cell}')");
            return false;
        }
        *cell = status;
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FieldSet {
    bits: u64,
}

impl FieldSet {
    pub const fn empty() -> Self {
        Self { bits: 0 }
    }

    pub fn of(fields: &[CandidateField]) -> Self {
        fields.iter().copied().collect()
    }

    pub fn insert(&mut self, field: CandidateField) -> bool {
        let mask = 1u64 << field.index();
        let fresh = self.bits & mask == 0;
        self.bits |= mask;
        fresh
    }

    pub fn contains(&self, field: CandidateField) -> bool {
        self.bits & (1u64 << field.index()) != 0
    }

    pub fn contains_all(&self, other: &FieldSet) -> bool {
        self.bits & other.bits == other.bits
    }

    pub fn len(&self) -> usize {
        self.bits.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = CandidateField> + '_ {
        CATALOG.iter().copied().filter(|field| self.contains(*field))
    }
}

impl FromIterator<CandidateField> for FieldSet {
    fn from_iter<I: IntoIterator<Item = CandidateField>>(iter: I) -> Self {
        let mut set = FieldSet::empty();
        for field in iter {
            set.insert(field);
        }
        set
    }
}
