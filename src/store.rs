use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StoreError;

pub type RawRecord = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Reads at most `limit` rows projecting only `column`.
    ///
    /// Must fail with [`StoreError::MissingColumn`] (or another typed error) rather
    /// than succeed with an empty projection when the column is absent.
    async fn select_field(
        &self,
        table: &str,
        column: &str,
        limit: usize,
    ) -> Result<Vec<RawRecord>, StoreError>;

    async fn select_limited(&self, table: &str, limit: usize)
    -> Result<Vec<RawRecord>, StoreError>;

    async fn insert(&self, table: &str, record: RawRecord) -> Result<RawRecord, StoreError>;

    async fn delete_by_id(&self, table: &str, id: &str) -> Result<usize, StoreError>;

    async fn session(&self) -> Result<Option<Session>, StoreError>;

    async fn current_identity(&self) -> Result<Option<String>, StoreError>;
}
