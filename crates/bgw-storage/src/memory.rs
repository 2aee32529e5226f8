use std::collections::HashMap;
use std::sync::Mutex;

use crate::{ApiKeyRecord, KeyStore, ModelMapping, StoreError, UsageRow};

/// In-memory store for tests and keyless deployments. Shares the trait
/// surface with the DynamoDB store but persists nothing.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    keys: Mutex<HashMap<String, ApiKeyRecord>>,
    mappings: Mutex<HashMap<String, String>>,
    usage: Mutex<Vec<UsageRow>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keys(records: impl IntoIterator<Item = ApiKeyRecord>) -> Self {
        let store = Self::new();
        {
            let mut keys = store.keys.lock().expect("key map poisoned");
            for record in records {
                keys.insert(record.api_key.clone(), record);
            }
        }
        store
    }

    pub fn insert_mapping(&self, openai_model_id: &str, upstream_model_id: &str) {
        self.mappings
            .lock()
            .expect("mapping map poisoned")
            .insert(openai_model_id.to_string(), upstream_model_id.to_string());
    }

    /// Snapshot of recorded usage rows, oldest first.
    pub fn usage_rows(&self) -> Vec<UsageRow> {
        self.usage.lock().expect("usage log poisoned").clone()
    }
}

#[async_trait::async_trait]
impl KeyStore for MemoryKeyStore {
    async fn get_api_key(&self, api_key: &str) -> Result<Option<ApiKeyRecord>, StoreError> {
        Ok(self
            .keys
            .lock()
            .map_err(|_| StoreError::Request("key map poisoned".to_string()))?
            .get(api_key)
            .cloned())
    }

    async fn put_api_key(&self, record: &ApiKeyRecord) -> Result<(), StoreError> {
        self.keys
            .lock()
            .map_err(|_| StoreError::Request("key map poisoned".to_string()))?
            .insert(record.api_key.clone(), record.clone());
        Ok(())
    }

    async fn deactivate_api_key(&self, api_key: &str) -> Result<(), StoreError> {
        let mut keys = self
            .keys
            .lock()
            .map_err(|_| StoreError::Request("key map poisoned".to_string()))?;
        match keys.get_mut(api_key) {
            Some(record) => {
                record.is_active = false;
                Ok(())
            }
            None => Err(StoreError::Request(format!("unknown api key {api_key}"))),
        }
    }

    async fn get_model_mapping(&self, openai_model_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .mappings
            .lock()
            .map_err(|_| StoreError::Request("mapping map poisoned".to_string()))?
            .get(openai_model_id)
            .cloned())
    }

    async fn list_model_mappings(&self) -> Result<Vec<ModelMapping>, StoreError> {
        Ok(self
            .mappings
            .lock()
            .map_err(|_| StoreError::Request("mapping map poisoned".to_string()))?
            .iter()
            .map(|(openai_model_id, upstream_model_id)| ModelMapping {
                openai_model_id: openai_model_id.clone(),
                upstream_model_id: upstream_model_id.clone(),
            })
            .collect())
    }

    async fn record_usage(&self, row: &UsageRow) -> Result<(), StoreError> {
        self.usage
            .lock()
            .map_err(|_| StoreError::Request("usage log poisoned".to_string()))?
            .push(row.clone());
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
