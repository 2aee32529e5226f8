use std::collections::{BTreeMap, HashMap};

use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::types::AttributeValue;

use crate::{ApiKeyRecord, KeyStore, ModelMapping, StoreError, UsageRow};

#[derive(Debug, Clone)]
pub struct TableNames {
    pub api_keys: String,
    pub usage: String,
    pub model_mapping: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            api_keys: "openai-proxy-api-keys".to_string(),
            usage: "openai-proxy-usage".to_string(),
            model_mapping: "openai-proxy-model-mapping".to_string(),
        }
    }
}

/// DynamoDB-backed store. Key schema:
/// `api_keys[api_key]`, `usage[api_key, timestamp]`,
/// `model_mapping[openai_model_id]`.
#[derive(Clone)]
pub struct DynamoKeyStore {
    client: Client,
    tables: TableNames,
}

impl DynamoKeyStore {
    pub fn new(client: Client, tables: TableNames) -> Self {
        Self { client, tables }
    }
}

#[async_trait::async_trait]
impl KeyStore for DynamoKeyStore {
    async fn get_api_key(&self, api_key: &str) -> Result<Option<ApiKeyRecord>, StoreError> {
        let output = self
            .client
            .get_item()
            .table_name(&self.tables.api_keys)
            .key("api_key", AttributeValue::S(api_key.to_string()))
            .send()
            .await
            .map_err(request_error)?;

        match output.item() {
            Some(item) => Ok(Some(decode_api_key(item)?)),
            None => Ok(None),
        }
    }

    async fn put_api_key(&self, record: &ApiKeyRecord) -> Result<(), StoreError> {
        let mut request = self
            .client
            .put_item()
            .table_name(&self.tables.api_keys)
            .item("api_key", AttributeValue::S(record.api_key.clone()))
            .item("user_id", AttributeValue::S(record.user_id.clone()))
            .item("name", AttributeValue::S(record.name.clone()))
            .item("is_active", AttributeValue::Bool(record.is_active))
            .item(
                "rate_limit",
                AttributeValue::N(record.rate_limit.to_string()),
            )
            .item("created_at", AttributeValue::S(record.created_at.clone()));
        if !record.metadata.is_empty() {
            let map = record
                .metadata
                .iter()
                .map(|(k, v)| (k.clone(), AttributeValue::S(v.clone())))
                .collect();
            request = request.item("metadata", AttributeValue::M(map));
        }
        request.send().await.map_err(request_error)?;
        Ok(())
    }

    async fn deactivate_api_key(&self, api_key: &str) -> Result<(), StoreError> {
        self.client
            .update_item()
            .table_name(&self.tables.api_keys)
            .key("api_key", AttributeValue::S(api_key.to_string()))
            .update_expression("SET is_active = :inactive")
            .condition_expression("attribute_exists(api_key)")
            .expression_attribute_values(":inactive", AttributeValue::Bool(false))
            .send()
            .await
            .map_err(request_error)?;
        Ok(())
    }

    async fn get_model_mapping(&self, openai_model_id: &str) -> Result<Option<String>, StoreError> {
        let output = self
            .client
            .get_item()
            .table_name(&self.tables.model_mapping)
            .key(
                "openai_model_id",
                AttributeValue::S(openai_model_id.to_string()),
            )
            .send()
            .await
            .map_err(request_error)?;

        Ok(output
            .item()
            .and_then(|item| string_attr(item, "bedrock_model_id")))
    }

    async fn list_model_mappings(&self) -> Result<Vec<ModelMapping>, StoreError> {
        let output = self
            .client
            .scan()
            .table_name(&self.tables.model_mapping)
            .send()
            .await
            .map_err(request_error)?;

        let mut mappings = Vec::new();
        for item in output.items() {
            let (Some(openai_model_id), Some(upstream_model_id)) = (
                string_attr(item, "openai_model_id"),
                string_attr(item, "bedrock_model_id"),
            ) else {
                continue;
            };
            mappings.push(ModelMapping {
                openai_model_id,
                upstream_model_id,
            });
        }
        Ok(mappings)
    }

    async fn record_usage(&self, row: &UsageRow) -> Result<(), StoreError> {
        let mut request = self
            .client
            .put_item()
            .table_name(&self.tables.usage)
            .item("api_key", AttributeValue::S(row.api_key.clone()))
            .item("timestamp", AttributeValue::N(row.timestamp_ms.to_string()))
            .item("request_id", AttributeValue::S(row.request_id.clone()))
            .item("model", AttributeValue::S(row.model.clone()))
            .item(
                "prompt_tokens",
                AttributeValue::N(row.prompt_tokens.to_string()),
            )
            .item(
                "completion_tokens",
                AttributeValue::N(row.completion_tokens.to_string()),
            )
            .item(
                "total_tokens",
                AttributeValue::N(row.total_tokens.to_string()),
            )
            .item("success", AttributeValue::Bool(row.success))
            .item("latency_ms", AttributeValue::N(row.latency_ms.to_string()));
        if let Some(error_message) = &row.error_message {
            request = request.item("error_message", AttributeValue::S(error_message.clone()));
        }
        request.send().await.map_err(request_error)?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.client
            .describe_table()
            .table_name(&self.tables.api_keys)
            .send()
            .await
            .map_err(request_error)?;
        Ok(())
    }
}

fn request_error<E: std::fmt::Display>(err: E) -> StoreError {
    StoreError::Request(err.to_string())
}

fn decode_api_key(item: &HashMap<String, AttributeValue>) -> Result<ApiKeyRecord, StoreError> {
    let api_key = string_attr(item, "api_key")
        .ok_or_else(|| StoreError::Malformed("api_key attribute missing".to_string()))?;
    let rate_limit = item
        .get("rate_limit")
        .and_then(|value| value.as_n().ok())
        .and_then(|value| value.parse::<u32>().ok())
        .unwrap_or(100);

    let metadata: BTreeMap<String, String> = item
        .get("metadata")
        .and_then(|value| value.as_m().ok())
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_s().ok().map(|s| (k.clone(), s.clone())))
                .collect()
        })
        .unwrap_or_default();

    Ok(ApiKeyRecord {
        api_key,
        user_id: string_attr(item, "user_id").unwrap_or_default(),
        name: string_attr(item, "name").unwrap_or_default(),
        is_active: item
            .get("is_active")
            .and_then(|value| value.as_bool().ok())
            .copied()
            .unwrap_or(true),
        rate_limit,
        created_at: string_attr(item, "created_at").unwrap_or_default(),
        metadata,
    })
}

fn string_attr(item: &HashMap<String, AttributeValue>, name: &str) -> Option<String> {
    item.get(name).and_then(|value| value.as_s().ok()).cloned()
}
