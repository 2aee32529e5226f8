//! Persistent key/usage/mapping storage behind a small KV-style trait.
//!
//! The production implementation is DynamoDB; an in-memory store backs
//! tests and keyless deployments.

mod dynamodb;
mod memory;
mod records;

pub use dynamodb::{DynamoKeyStore, TableNames};
pub use memory::MemoryKeyStore;
pub use records::{ApiKeyRecord, ModelMapping, UsageRow, new_api_key_record};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Request(String),
    #[error("malformed record: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn get_api_key(&self, api_key: &str) -> Result<Option<ApiKeyRecord>, StoreError>;

    async fn put_api_key(&self, record: &ApiKeyRecord) -> Result<(), StoreError>;

    /// Soft-deactivates a key in place; fails if the key does not exist.
    /// Records are never deleted.
    async fn deactivate_api_key(&self, api_key: &str) -> Result<(), StoreError>;

    async fn get_model_mapping(&self, openai_model_id: &str) -> Result<Option<String>, StoreError>;

    async fn list_model_mappings(&self) -> Result<Vec<ModelMapping>, StoreError>;

    async fn record_usage(&self, row: &UsageRow) -> Result<(), StoreError>;

    /// Cheap reachability probe used by the readiness endpoint.
    async fn ping(&self) -> Result<(), StoreError>;
}
