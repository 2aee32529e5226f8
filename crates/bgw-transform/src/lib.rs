//! Pure translators between the OpenAI chat-completions wire format and
//! the Bedrock Converse wire format. No I/O happens here; http(s) image
//! references must be rewritten to data URLs before translation.

pub mod request;
pub mod response;
pub mod stream;

use thiserror::Error;

/// A request that cannot be expressed upstream. Always surfaces to the
/// client as `invalid_request_error`, optionally naming the offending
/// parameter.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TranslateError {
    pub message: String,
    pub param: Option<String>,
}

impl TranslateError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            param: None,
        }
    }

    pub fn with_param(message: impl Into<String>, param: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            param: Some(param.into()),
        }
    }
}

/// Request features that can be switched off by deployment configuration.
/// A disabled feature turns the corresponding request field into an
/// invalid-request failure instead of silently dropping it.
#[derive(Debug, Clone, Copy)]
pub struct FeatureGates {
    pub vision: bool,
    pub tool_use: bool,
    pub extended_thinking: bool,
}

impl Default for FeatureGates {
    fn default() -> Self {
        Self {
            vision: true,
            tool_use: true,
            extended_thinking: true,
        }
    }
}
