use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::bedrock::converse::types::{InferenceConfig, Message, SystemContentBlock, ToolConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverseRequest {
    /// Resolved upstream model id (addressed as a path segment on the
    /// real endpoint; carried inline here).
    pub model_id: String,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub system: Vec<SystemContentBlock>,
    pub inference_config: InferenceConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_config: Option<ToolConfig>,
    /// Vendor passthrough; carries the `thinking` configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_model_request_fields: Option<JsonValue>,
}
