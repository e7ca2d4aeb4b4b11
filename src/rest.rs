//! [`OrderStore`] over a PostgREST-style HTTP backend.
//!
//! Table reads and writes go to `{base}/rest/v1/{table}`, caller identity comes from
//! `{base}/auth/v1/user`, and the local session is read from the access token's
//! claims without a network call.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use log::debug;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use crate::{
    error::StoreError,
    store::{OrderStore, RawRecord, Session},
};

const UNDEFINED_COLUMN_CODES: &[&str] = &["42703", "PGRST204"];
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct RestStoreConfig {
    pub base_url: String,
    pub api_key: String,
    pub access_token: Option<String>,
    pub request_timeout: Duration,
}

impl RestStoreConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            access_token: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

pub struct RestStore {
    client: Client,
    config: RestStoreConfig,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: String,
}

impl RestStore {
    pub fn new(config: RestStoreConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Building HTTP client")?;
        Ok(Self { client, config })
    }

    fn base(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base())
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let bearer = self
            .config
            .access_token
            .as_deref()
            .unwrap_or(&self.config.api_key);
        request
            .header("apikey", &self.config.api_key)
            .bearer_auth(bearer)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, StoreError> {
        self.authorize(request)
            .send()
            .await
            .map_err(|err| StoreError::Transport(err.to_string()))
    }

    async fn rows(
        &self,
        response: Response,
        table: &str,
        column: Option<&str>,
    ) -> Result<Vec<RawRecord>, StoreError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &body, table, column));
        }
        response
            .json::<Vec<RawRecord>>()
            .await
            .map_err(|err| StoreError::Decode(err.to_string()))
    }
}

pub fn classify_failure(
    status: StatusCode,
    body: &str,
    table: &str,
    column: Option<&str>,
) -> StoreError {
    let parsed = serde_json::from_str::<ErrorBody>(body).unwrap_or_default();
    let message = parsed
        .message
        .clone()
        .unwrap_or_else(|| body.trim().to_string());

    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        return StoreError::Unauthorized(message);
    }
    let undefined_column = parsed
        .code
        .as_deref()
        .is_some_and(|code| UNDEFINED_COLUMN_CODES.contains(&code))
        || (message.contains("column") && message.contains("does not exist"));
    if undefined_column {
        if let Some(column) = column {
            return StoreError::MissingColumn {
                table: table.to_string(),
                column: column.to_string(),
            };
        }
    }
    StoreError::Remote(format!("{status}: {message}"))
}

pub fn session_from_token(token: &str) -> Result<Session, StoreError> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| StoreError::Decode("access token is not a JWT".to_string()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|err| StoreError::Decode(format!("access token payload: {err}")))?;
    let claims: TokenClaims = serde_json::from_slice(&bytes)
        .map_err(|err| StoreError::Decode(format!("access token claims: {err}")))?;
    Ok(Session {
        user_id: claims.sub,
        email: claims.email,
    })
}

#[async_trait]
impl OrderStore for RestStore {
    async fn select_field(
        &self,
        table: &str,
        column: &str,
        limit: usize,
    ) -> Result<Vec<RawRecord>, StoreError> {
        debug!("GET {} select={column}", self.table_url(table));
        let request = self
            .client
            .get(self.table_url(table))
            .query(&[("select", column.to_string()), ("limit", limit.to_string())]);
        let response = self.send(request).await?;
        self.rows(response, table, Some(column)).await
    }

    async fn select_limited(
        &self,
        table: &str,
        limit: usize,
    ) -> Result<Vec<RawRecord>, StoreError> {
        let request = self
            .client
            .get(self.table_url(table))
            .query(&[("select", "*".to_string()), ("limit", limit.to_string())]);
        let response = self.send(request).await?;
        self.rows(response, table, None).await
    }

    async fn insert(&self, table: &str, record: RawRecord) -> Result<RawRecord, StoreError> {
        let request = self
            .client
            .post(self.table_url(table))
            .header("Prefer", "return=representation")
            .json(&Value::Object(record));
        let response = self.send(request).await?;
        self.rows(response, table, None)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Decode("insert returned no representation".to_string()))
    }

    async fn delete_by_id(&self, table: &str, id: &str) -> Result<usize, StoreError> {
        let request = self
            .client
            .delete(self.table_url(table))
            .header("Prefer", "return=representation")
            .query(&[("id", format!("eq.{id}"))]);
        let response = self.send(request).await?;
        Ok(self.rows(response, table, None).await?.len())
    }

    async fn session(&self) -> Result<Option<Session>, StoreError> {
        self.config
            .access_token
            .as_deref()
            .map(session_from_token)
            .transpose()
    }

    async fn current_identity(&self) -> Result<Option<String>, StoreError> {
        if self.config.access_token.is_none() {
            return Ok(None);
        }
        let request = self.client.get(format!("{}/auth/v1/user", self.base()));
        let response = self.send(request).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &body, "auth.users", None));
        }
        let user = response
            .json::<AuthUser>()
            .await
            .map_err(|err| StoreError::Decode(err.to_string()))?;
        Ok(Some(user.id))
    }
}
