//! Order normalization.
//!
//! Maps raw, variant-specific records into the stable [`NormalizedOrder`] shape.
//! Identity and status are required for every record; everything else is optional
//! and gated by the detected [`SchemaVariant`]:
//!
//! - `embedded` reads every block straight from the record's keys.
//! - `minimal` reads only confirmed fields outside the address, payment, and
//!   fulfillment blocks, which stay empty.
//! - `unknown` reads a field only if detection confirmed it.

use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use log::{debug, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::{
    catalog::{CandidateField, FieldGroup, FieldSet},
    classify::SchemaVariant,
    detect::DetectionResult,
    error::MalformedRecordError,
    store::RawRecord,
};

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
    Refunded,
    Other(String),
}

impl OrderStatus {
    pub fn parse(value: &str) -> Self {
        let trimmed = value.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "pending" => OrderStatus::Pending,
            "processing" => OrderStatus::Processing,
            "shipped" => OrderStatus::Shipped,
            "delivered" => OrderStatus::Delivered,
            "cancelled" | "canceled" => OrderStatus::Cancelled,
            "refunded" => OrderStatus::Refunded,
            _ => OrderStatus::Other(trimmed.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
            OrderStatus::Other(raw) => raw.as_str(),
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = std::convert::Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(OrderStatus::parse(value))
    }
}

impl Serialize for OrderStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for OrderStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(OrderStatus::parse(&raw))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerBlock {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressBlock {
    pub name: Option<String>,
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub phone: Option<String>,
}

impl AddressBlock {
    pub fn is_empty(&self) -> bool {
        *self == AddressBlock::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalsBlock {
    pub subtotal: Option<Decimal>,
    pub tax: Option<Decimal>,
    pub shipping: Option<Decimal>,
    pub discount: Option<Decimal>,
    pub total: Option<Decimal>,
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentBlock {
    pub method: Option<String>,
    pub status: Option<String>,
    pub reference: Option<String>,
}

impl PaymentBlock {
    pub fn is_empty(&self) -> bool {
        *self == PaymentBlock::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillmentBlock {
    pub shipping_method: Option<String>,
    pub tracking_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedOrder {
    pub id: String,
    pub status: OrderStatus,
    pub order_number: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub user_id: Option<String>,
    pub customer: CustomerBlock,
    pub shipping: AddressBlock,
    pub billing: AddressBlock,
    pub totals: TotalsBlock,
    pub payment: PaymentBlock,
    pub fulfillment: FulfillmentBlock,
    pub notes: Option<String>,
    pub admin_notes: Option<String>,
}

pub const FLAT_HEADERS: &[&str] = &[
    "id",
    "status",
    "order_number",
    "created_at",
    "updated_at",
    "user_id",
    "customer_name",
    "customer_email",
    "customer_phone",
    "shipping_name",
    "shipping_street",
    "shipping_city",
    "shipping_state",
    "shipping_postal_code",
    "shipping_country",
    "shipping_phone",
    "billing_name",
    "billing_street",
    "billing_city",
    "billing_state",
    "billing_postal_code",
    "billing_country",
    "billing_phone",
    "subtotal",
    "tax_amount",
    "shipping_cost",
    "discount_amount",
    "total_amount",
    "currency",
    "payment_method",
    "payment_status",
    "payment_reference",
    "shipping_method",
    "tracking_number",
    "notes",
    "admin_notes",
];

impl NormalizedOrder {
    pub fn flatten(&self) -> Vec<String> {
        fn text(value: &Option<String>) -> String {
            value.clone().unwrap_or_default()
        }
        fn money(value: &Option<Decimal>) -> String {
            value.map(|amount| amount.to_string()).unwrap_or_default()
        }
        fn stamp(value: &Option<DateTime<Utc>>) -> String {
            value.map(|at| at.to_rfc3339()).unwrap_or_default()
        }
        fn address(block: &AddressBlock) -> [String; 7] {
            [
                text(&block.name),
                text(&block.street),
                text(&block.city),
                text(&block.state),
                text(&block.postal_code),
                text(&block.country),
                text(&block.phone),
            ]
        }

        let mut row = vec![
            self.id.clone(),
            self.status.to_string(),
            text(&self.order_number),
            stamp(&self.created_at),
            stamp(&self.updated_at),
            text(&self.user_id),
            text(&self.customer.name),
            text(&self.customer.email),
            text(&self.customer.phone),
        ];
        row.extend(address(&self.shipping));
        row.extend(address(&self.billing));
        row.extend([
            money(&self.totals.subtotal),
            money(&self.totals.tax),
            money(&self.totals.shipping),
            money(&self.totals.discount),
            money(&self.totals.total),
            text(&self.totals.currency),
            text(&self.payment.method),
            text(&self.payment.status),
            text(&self.payment.reference),
            text(&self.fulfillment.shipping_method),
            text(&self.fulfillment.tracking_number),
            text(&self.notes),
            text(&self.admin_notes),
        ]);
        row
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    variant: SchemaVariant,
    confirmed: FieldSet,
}

impl Normalizer {
    pub fn new(detection: &DetectionResult) -> Self {
        Self {
            variant: detection.variant(),
            confirmed: detection.confirmed_set(),
        }
    }

    pub fn for_variant(variant: SchemaVariant) -> Self {
        Self {
            variant,
            confirmed: FieldSet::empty(),
        }
    }

    pub fn variant(&self) -> SchemaVariant {
        self.variant
    }

    fn allows(&self, field: CandidateField) -> bool {
        match self.variant {
            SchemaVariant::Embedded => true,
            SchemaVariant::Minimal => {
                self.confirmed.contains(field)
                    && !matches!(
                        field.group(),
                        FieldGroup::Shipping
                            | FieldGroup::Billing
                            | FieldGroup::Payment
                            | FieldGroup::Fulfillment
                    )
            }
            SchemaVariant::Unknown => self.confirmed.contains(field),
        }
    }

    pub fn normalize(&self, raw: &RawRecord) -> Result<NormalizedOrder, MalformedRecordError> {
        let id = required_id(raw)?;
        let status = required_status(raw)?;
        let reader = FieldReader {
            normalizer: self,
            raw,
        };

        Ok(NormalizedOrder {
            id,
            status,
            order_number: reader.text(CandidateField::OrderNumber),
            created_at: reader.timestamp(CandidateField::CreatedAt),
            updated_at: reader.timestamp(CandidateField::UpdatedAt),
            user_id: reader.text(CandidateField::UserId),
            customer: CustomerBlock {
                name: reader.text(CandidateField::CustomerName),
                email: reader.text(CandidateField::CustomerEmail),
                phone: reader.text(CandidateField::CustomerPhone),
            },
            shipping: AddressBlock {
                name: reader.text(CandidateField::ShippingName),
                street: reader.text(CandidateField::ShippingStreet),
                city: reader.text(CandidateField::ShippingCity),
                state: reader.text(CandidateField::ShippingState),
                postal_code: reader.text(CandidateField::ShippingPostalCode),
                country: reader.text(CandidateField::ShippingCountry),
                phone: reader.text(CandidateField::ShippingPhone),
            },
            billing: AddressBlock {
                name: reader.text(CandidateField::BillingName),
                street: reader.text(CandidateField::BillingStreet),
                city: reader.text(CandidateField::BillingCity),
                state: reader.text(CandidateField::BillingState),
                postal_code: reader.text(CandidateField::BillingPostalCode),
                country: reader.text(CandidateField::BillingCountry),
                phone: reader.text(CandidateField::BillingPhone),
            },
            totals: TotalsBlock {
                subtotal: reader.money(CandidateField::Subtotal),
                tax: reader.money(CandidateField::TaxAmount),
                shipping: reader.money(CandidateField::ShippingCost),
                discount: reader.money(CandidateField::DiscountAmount),
                total: reader.money(CandidateField::TotalAmount),
                currency: reader.text(CandidateField::Currency),
            },
            payment: PaymentBlock {
                method: reader.text(CandidateField::PaymentMethod),
                status: reader.text(CandidateField::PaymentStatus),
                reference: reader.text(CandidateField::PaymentReference),
            },
            fulfillment: FulfillmentBlock {
                shipping_method: reader.text(CandidateField::ShippingMethod),
                tracking_number: reader.text(CandidateField::TrackingNumber),
            },
            notes: reader.text(CandidateField::Notes),
            admin_notes: reader.text(CandidateField::AdminNotes),
        })
    }

    pub fn normalize_batch(
        &self,
        records: &[RawRecord],
    ) -> Vec<Result<NormalizedOrder, MalformedRecordError>> {
        records
            .iter()
            .enumerate()
            .map(|(idx, raw)| {
                self.normalize(raw).inspect_err(|err| {
                    warn!("Record {} could not be normalized: {err}", idx + 1);
                })
            })
            .collect()
    }
}

pub fn normalize(
    detection: &DetectionResult,
    raw: &RawRecord,
) -> Result<NormalizedOrder, MalformedRecordError> {
    Normalizer::new(detection).normalize(raw)
}

pub fn normalize_batch(
    detection: &DetectionResult,
    records: &[RawRecord],
) -> Vec<Result<NormalizedOrder, MalformedRecordError>> {
    Normalizer::new(detection).normalize_batch(records)
}

struct FieldReader<'a> {
    normalizer: &'a Normalizer,
    raw: &'a RawRecord,
}

impl FieldReader<'_> {
    fn value(&self, field: CandidateField) -> Option<&Value> {
        if !self.normalizer.allows(field) {
            return None;
        }
        match self.raw.get(field.as_str()) {
            None | Some(Value::Null) => None,
            Some(value) => Some(value),
        }
    }

    fn text(&self, field: CandidateField) -> Option<String> {
        match self.value(field)? {
            Value::String(text) => {
                let trimmed = text.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            Value::Number(number) => Some(number.to_string()),
            Value::Bool(flag) => Some(flag.to_string()),
            other => {
                debug!("Ignoring non-scalar value for '{field}': {other}");
                None
            }
        }
    }

    fn money(&self, field: CandidateField) -> Option<Decimal> {
        let parsed = match self.value(field)? {
            Value::Number(number) => parse_decimal(&number.to_string()),
            Value::String(text) => parse_decimal(text),
            _ => None,
        };
        if parsed.is_none() {
            debug!("Ignoring unparsable amount for '{field}'");
        }
        parsed
    }

    fn timestamp(&self, field: CandidateField) -> Option<DateTime<Utc>> {
        let parsed = match self.value(field)? {
            Value::String(text) => parse_timestamp(text),
            _ => None,
        };
        if parsed.is_none() {
            debug!("Ignoring unparsable timestamp for '{field}'");
        }
        parsed
    }
}

fn parse_decimal(raw: &str) -> Option<Decimal> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .ok()
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(parsed.and_utc());
        }
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn required_id(raw: &RawRecord) -> Result<String, MalformedRecordError> {
    let field = CandidateField::Id;
    match raw.get(field.as_str()) {
        None | Some(Value::Null) => Err(MalformedRecordError::MissingField(field)),
        Some(Value::String(text)) if text.trim().is_empty() => {
            Err(MalformedRecordError::MissingField(field))
        }
        Some(Value::String(text)) => Ok(text.trim().to_string()),
        Some(Value::Number(number)) if number.is_i64() || number.is_u64() => {
            Ok(number.to_string())
        }
        Some(other) => Err(MalformedRecordError::InvalidField {
            field,
            reason: format!("expected a string or integer, found {other}"),
        }),
    }
}

fn required_status(raw: &RawRecord) -> Result<OrderStatus, MalformedRecordError> {
    let field = CandidateField::Status;
    match raw.get(field.as_str()) {
        None | Some(Value::Null) => Err(MalformedRecordError::MissingField(field)),
        Some(Value::String(text)) if text.trim().is_empty() => {
            Err(MalformedRecordError::MissingField(field))
        }
        Some(Value::String(text)) => Ok(OrderStatus::parse(text)),
        Some(other) => Err(MalformedRecordError::InvalidField {
            field,
            reason: format!("expected a string, found {other}"),
        }),
    }
}
