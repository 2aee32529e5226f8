use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub api_key: String,
    pub user_id: String,
    pub name: String,
    pub is_active: bool,
    /// Requests per rate window. Must be at least 1 while the key is active.
    pub rate_limit: u32,
    /// RFC-3339 creation timestamp.
    pub created_at: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMapping {
    pub openai_model_id: String,
    pub upstream_model_id: String,
}

/// One row per completed request, success or failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRow {
    pub api_key: String,
    /// Epoch milliseconds; forms the sort key together with `api_key`.
    pub timestamp_ms: i64,
    pub request_id: String,
    /// Resolved upstream model id.
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub success: bool,
    pub error_message: Option<String>,
    pub latency_ms: u64,
}

/// Mints a fresh active key record. Admin tooling and tests provision
/// keys through this; the gateway hot path only reads them.
pub fn new_api_key_record(user_id: &str, name: &str, rate_limit: u32) -> ApiKeyRecord {
    let api_key = format!("sk-{}", uuid::Uuid::new_v4().simple());
    let created_at = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| String::new());
    ApiKeyRecord {
        api_key,
        user_id: user_id.to_string(),
        name: name.to_string(),
        is_active: true,
        rate_limit: rate_limit.max(1),
        created_at,
        metadata: BTreeMap::new(),
    }
}
