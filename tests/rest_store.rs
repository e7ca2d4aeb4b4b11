mod common;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    routing::get,
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use common::record;
use order_schema_probe::{
    CandidateField, ColumnDetector, DetectorConfig, FieldStatus, OrderStore, SchemaVariant,
    StoreError,
    diagnostics::{DiagnosticsConfig, run_diagnostics},
    rest::{RestStore, RestStoreConfig},
};
use serde_json::{Map, Value, json};

const API_KEY: &str = "anon-key";
const KNOWN_COLUMNS: [&str; 4] = ["id", "status", "created_at", "total_amount"];

#[derive(Debug, Clone)]
struct SeenRequest {
    route: &'static str,
    query: HashMap<String, String>,
    apikey: Option<String>,
    authorization: Option<String>,
    prefer: Option<String>,
}

#[derive(Clone)]
struct Backend {
    rows: Arc<Mutex<Vec<Value>>>,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
    user_token: String,
}

impl Backend {
    fn record(&self, route: &'static str, headers: &HeaderMap, query: &HashMap<String, String>) {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        self.seen.lock().expect("seen lock").push(SeenRequest {
            route,
            query: query.clone(),
            apikey: header("apikey"),
            authorization: header("authorization"),
            prefer: header("prefer"),
        });
    }

    fn requests(&self, route: &str) -> Vec<SeenRequest> {
        self.seen
            .lock()
            .expect("seen lock")
            .iter()
            .filter(|seen| seen.route == route)
            .cloned()
            .collect()
    }

    fn row_count(&self) -> usize {
        self.rows.lock().expect("rows lock").len()
    }
}

async fn select_rows(
    State(backend): State<Backend>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    backend.record("select", &headers, &query);
    let column = query.get("select").map(String::as_str).unwrap_or("*");
    let limit = query
        .get("limit")
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(usize::MAX);
    let rows = backend.rows.lock().expect("rows lock").clone();
    if column == "*" {
        return (
            StatusCode::OK,
            Json(Value::Array(rows.into_iter().take(limit).collect())),
        );
    }
    if !KNOWN_COLUMNS.contains(&column) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "code": "42703",
                "message": format!("column orders.{column} does not exist"),
            })),
        );
    }
    let projected = rows
        .iter()
        .take(limit)
        .map(|row| {
            let mut cell = Map::new();
            cell.insert(
                column.to_string(),
                row.get(column).cloned().unwrap_or(Value::Null),
            );
            Value::Object(cell)
        })
        .collect();
    (StatusCode::OK, Json(Value::Array(projected)))
}

async fn insert_row(
    State(backend): State<Backend>,
    headers: HeaderMap,
    Json(row): Json<Value>,
) -> (StatusCode, Json<Value>) {
    backend.record("insert", &headers, &HashMap::new());
    backend.rows.lock().expect("rows lock").push(row.clone());
    (StatusCode::CREATED, Json(json!([row])))
}

async fn delete_rows(
    State(backend): State<Backend>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    backend.record("delete", &headers, &query);
    let target = query
        .get("id")
        .and_then(|filter| filter.strip_prefix("eq."))
        .unwrap_or_default()
        .to_string();
    let mut rows = backend.rows.lock().expect("rows lock");
    let (removed, kept): (Vec<Value>, Vec<Value>) = rows
        .drain(..)
        .partition(|row| row.get("id").and_then(Value::as_str) == Some(target.as_str()));
    *rows = kept;
    Json(Value::Array(removed))
}

async fn current_user(
    State(backend): State<Backend>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    backend.record("user", &headers, &HashMap::new());
    let expected = format!("Bearer {}", backend.user_token);
    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    if presented == Some(expected.as_str()) {
        (
            StatusCode::OK,
            Json(json!({ "id": "user-7", "email": "ops@example.com" })),
        )
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "invalid JWT" })),
        )
    }
}

async fn spawn_backend(user_token: &str) -> (String, Backend) {
    let backend = Backend {
        rows: Arc::new(Mutex::new(vec![json!({
            "id": "ord-1",
            "status": "pending",
            "created_at": "2024-05-01T10:00:00Z",
            "total_amount": "19.99",
        })])),
        seen: Arc::default(),
        user_token: user_token.to_string(),
    };
    let app = Router::new()
        .route(
            "/rest/v1/orders",
            get(select_rows).post(insert_row).delete(delete_rows),
        )
        .route("/auth/v1/user", get(current_user))
        .with_state(backend.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move { axum::serve(listener, app).await.expect("serve backend") });
    (format!("http://{addr}"), backend)
}

fn access_token(subject: &str) -> String {
    let claims =
        URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"{subject}","email":"ops@example.com"}}"#));
    format!("eyJhbGciOiJIUzI1NiJ9.{claims}.signature")
}

fn rest_store(base_url: &str, access_token: Option<&str>) -> RestStore {
    let mut config = RestStoreConfig::new(base_url, API_KEY);
    config.access_token = access_token.map(str::to_string);
    RestStore::new(config).expect("http client")
}

#[tokio::test]
async fn projection_read_sends_select_limit_and_credentials() {
    let token = access_token("user-7");
    let (base_url, backend) = spawn_backend(&token).await;
    let store = rest_store(&base_url, Some(&token));

    let rows = store
        .select_field("orders", "status", 1)
        .await
        .expect("select status");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("status"), Some(&json!("pending")));

    let seen = backend.requests("select");
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].query.get("select").map(String::as_str), Some("status"));
    assert_eq!(seen[0].query.get("limit").map(String::as_str), Some("1"));
    assert_eq!(seen[0].apikey.as_deref(), Some(API_KEY));
    assert_eq!(seen[0].authorization, Some(format!("Bearer {token}")));
}

#[tokio::test]
async fn undefined_column_resolves_to_error_during_detection() {
    let (base_url, backend) = spawn_backend("unused").await;
    let store = rest_store(&base_url, None);

    let err = store
        .select_field("orders", "billing_name", 1)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        StoreError::MissingColumn {
            table: "orders".to_string(),
            column: "billing_name".to_string(),
        }
    );

    let result = ColumnDetector::new(Arc::new(store), DetectorConfig::default())
        .detect(&[
            CandidateField::Id,
            CandidateField::Status,
            CandidateField::BillingName,
        ])
        .await;
    assert_eq!(result.status(CandidateField::Id), Some(FieldStatus::Exists));
    assert_eq!(
        result.status(CandidateField::BillingName),
        Some(FieldStatus::Error)
    );
    assert_eq!(result.variant(), SchemaVariant::Minimal);

    let anonymous = backend.requests("select");
    assert!(
        anonymous
            .iter()
            .all(|seen| seen.authorization.as_deref() == Some("Bearer anon-key"))
    );
}

#[tokio::test]
async fn insert_asks_for_representation_and_delete_counts_rows() {
    let (base_url, backend) = spawn_backend("unused").await;
    let store = rest_store(&base_url, None);

    let stored = store
        .insert("orders", record(json!({"id": "ord-2", "status": "paid"})))
        .await
        .expect("insert");
    assert_eq!(stored.get("id"), Some(&json!("ord-2")));
    let inserts = backend.requests("insert");
    assert_eq!(inserts[0].prefer.as_deref(), Some("return=representation"));
    assert_eq!(backend.row_count(), 2);

    assert_eq!(store.delete_by_id("orders", "ord-2").await.expect("delete"), 1);
    assert_eq!(
        store.delete_by_id("orders", "ord-404").await.expect("delete"),
        0
    );
    let deletes = backend.requests("delete");
    assert_eq!(deletes[0].query.get("id").map(String::as_str), Some("eq.ord-2"));
    assert_eq!(deletes[0].prefer.as_deref(), Some("return=representation"));
    assert_eq!(backend.row_count(), 1);
}

#[tokio::test]
async fn identity_is_read_from_the_auth_endpoint() {
    let token = access_token("user-7");
    let (base_url, backend) = spawn_backend(&token).await;

    let store = rest_store(&base_url, Some(&token));
    assert_eq!(
        store.current_identity().await.expect("identity"),
        Some("user-7".to_string())
    );
    let session = store
        .session()
        .await
        .expect("session")
        .expect("session from token");
    assert_eq!(session.user_id, "user-7");
    assert_eq!(session.email.as_deref(), Some("ops@example.com"));

    let anonymous = rest_store(&base_url, None);
    assert_eq!(anonymous.current_identity().await.expect("identity"), None);
    assert_eq!(backend.requests("user").len(), 1);

    let stale = rest_store(&base_url, Some(&access_token("user-8")));
    assert!(matches!(
        stale.current_identity().await,
        Err(StoreError::Unauthorized(_))
    ));
}

#[tokio::test]
async fn diagnostics_pass_and_clean_up_against_a_healthy_backend() {
    let token = access_token("user-7");
    let (base_url, backend) = spawn_backend(&token).await;
    let store = rest_store(&base_url, Some(&token));

    let report = run_diagnostics(
        &store,
        &DiagnosticsConfig {
            table: "orders".to_string(),
            timeout: Duration::from_secs(5),
        },
    )
    .await;
    assert!(report.all_passed(), "{report:?}");
    assert_eq!(backend.row_count(), 1);
    assert_eq!(backend.requests("delete").len(), 1);
}
