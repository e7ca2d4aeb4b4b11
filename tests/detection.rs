mod common;

use std::{sync::Arc, time::Duration};

use common::{TestWorkspace, fixture_path, record};
use order_schema_probe::{
    CATALOG, CandidateField, ColumnDetector, DetectionResult, DetectorConfig, FieldStatus,
    MalformedRecordError, SchemaVariant, classify,
    memory::MemoryStore,
    normalize::{Normalizer, OrderStatus},
};
use serde_json::json;

fn detector_for(fixture: &str, config: DetectorConfig) -> ColumnDetector {
    let store = MemoryStore::load(&fixture_path(fixture)).expect("load fixture");
    ColumnDetector::new(Arc::new(store), config)
}

#[tokio::test]
async fn embedded_fixture_detects_full_schema() {
    let result = detector_for("embedded_store.yml", DetectorConfig::default())
        .detect(&CATALOG)
        .await;
    assert_eq!(result.variant(), SchemaVariant::Embedded);
    assert_eq!(result.confirmed().len(), CATALOG.len());
    assert_eq!(result.confirmed()[0], CandidateField::Id);
}

#[tokio::test]
async fn denied_column_counts_as_error() {
    let result = detector_for("minimal_store.yml", DetectorConfig::default())
        .detect(&CATALOG)
        .await;
    assert_eq!(
        result.status(CandidateField::TotalAmount),
        Some(FieldStatus::Error)
    );
    assert_eq!(result.confirmed_names(), vec!["id", "created_at", "status"]);
    assert_eq!(result.variant(), SchemaVariant::Minimal);
}

#[tokio::test(start_paused = true)]
async fn hung_probe_does_not_block_detection() {
    let config = DetectorConfig {
        probe_timeout_ms: 1_000,
        max_concurrent_probes: 3,
        ..DetectorConfig::default()
    };
    let started = tokio::time::Instant::now();
    let result = detector_for("slow_store.yml", config)
        .detect(&CATALOG)
        .await;
    assert!(started.elapsed() < Duration::from_secs(60));
    assert_eq!(
        result.status(CandidateField::ShippingStreet),
        Some(FieldStatus::Error)
    );
    assert!(result.is_confirmed(CandidateField::ShippingName));
    assert_eq!(result.variant(), SchemaVariant::Unknown);
    assert!(
        result
            .fields()
            .iter()
            .all(|report| report.status != FieldStatus::Unknown)
    );
}

#[tokio::test]
async fn threshold_is_taken_from_configuration() {
    let config = DetectorConfig {
        minimal_field_threshold: 2,
        ..DetectorConfig::default()
    };
    let result = detector_for("minimal_store.yml", config)
        .detect(&CATALOG)
        .await;
    assert_eq!(result.minimal_threshold(), 2);
    assert_eq!(result.variant(), SchemaVariant::Unknown);
}

#[tokio::test]
async fn saved_detection_reloads_and_reclassifies_identically() {
    let workspace = TestWorkspace::new();
    let path = workspace.file("detection.json");
    let result = detector_for("slow_store.yml", DetectorConfig {
        probe_timeout_ms: 200,
        ..DetectorConfig::default()
    })
    .detect(&[
        CandidateField::Id,
        CandidateField::Status,
        CandidateField::ShippingName,
        CandidateField::ShippingStreet,
        CandidateField::BillingName,
    ])
    .await;
    result.save(&path).expect("save");

    let reloaded = DetectionResult::load(&path).expect("load");
    assert_eq!(reloaded, result);
    assert_eq!(classify(&reloaded.confirmed_set()), reloaded.variant());
}

#[test]
fn unresolved_status_in_saved_file_is_rejected() {
    let workspace = TestWorkspace::new();
    let path = workspace.write(
        "detection.json",
        &json!({
            "catalog_version": 1,
            "table": "orders",
            "detected_at": "2024-05-01T00:00:00Z",
            "minimal_threshold": 5,
            "fields": [
                {"field": "id", "status": "exists"},
                {"field": "status", "status": "unknown"}
            ],
            "confirmed": ["id"],
            "variant": "minimal"
        })
        .to_string(),
    );
    let err = DetectionResult::load(&path).unwrap_err();
    assert!(format!("{err:#}").contains("still unresolved"));
}

#[tokio::test]
async fn detection_drives_normalization_end_to_end() {
    let result = detector_for("minimal_store.yml", DetectorConfig::default())
        .detect(&CATALOG)
        .await;
    let normalizer = Normalizer::new(&result);
    let outcomes = normalizer.normalize_batch(&[
        record(json!({
            "id": 7,
            "status": "Delivered",
            "created_at": "2024-05-02T09:30:00Z",
            "total_amount": 12,
            "shipping_name": "Not Confirmed"
        })),
        record(json!({"id": 8})),
    ]);

    let order = outcomes[0].as_ref().expect("first record normalizes");
    assert_eq!(order.id, "7");
    assert_eq!(order.status, OrderStatus::Delivered);
    assert!(order.created_at.is_some());
    assert!(order.totals.total.is_none());
    assert!(order.shipping.is_empty());
    assert_eq!(
        outcomes[1].as_ref().unwrap_err(),
        &MalformedRecordError::MissingField(CandidateField::Status)
    );
}
