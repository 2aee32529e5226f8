use http::StatusCode;
use thiserror::Error;

use bgw_protocol::openai::error::ErrorResponse;
use bgw_storage::StoreError;
use bgw_transform::TranslateError;

use crate::upstream::UpstreamError;

/// The closed set of failure kinds a request can surface with. Each kind
/// carries its HTTP status and OpenAI-shaped body.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("{message}")]
    InvalidRequest {
        message: String,
        param: Option<String>,
    },
    #[error("{0}")]
    Authentication(String),
    #[error("{0}")]
    Permission(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    RateLimited(String),
    #[error("{0}")]
    UpstreamThrottled(String),
    #[error("{0}")]
    UpstreamUnavailable(String),
    #[error("{0}")]
    UpstreamServer(String),
    #[error("{0}")]
    Internal(String),
}

impl GatewayError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
            param: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Authentication(_) => StatusCode::UNAUTHORIZED,
            Self::Permission(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::RateLimited(_) | Self::UpstreamThrottled(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::UpstreamServer(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } => "invalid_request_error",
            Self::Authentication(_) => "authentication_error",
            Self::Permission(_) => "permission_error",
            Self::NotFound(_) => "not_found_error",
            Self::RateLimited(_) | Self::UpstreamThrottled(_) => "rate_limit_error",
            Self::UpstreamUnavailable(_) => "service_unavailable",
            Self::UpstreamServer(_) | Self::Internal(_) => "server_error",
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } => "invalid_request",
            Self::Authentication(_) => "invalid_api_key",
            Self::Permission(_) => "permission_denied",
            Self::NotFound(_) => "model_not_found",
            Self::RateLimited(_) => "rate_limit_exceeded",
            Self::UpstreamThrottled(_) => "upstream_throttled",
            Self::UpstreamUnavailable(_) => "upstream_unavailable",
            Self::UpstreamServer(_) => "upstream_error",
            Self::Internal(_) => "internal_error",
        }
    }

    pub fn body(&self) -> ErrorResponse {
        let param = match self {
            Self::InvalidRequest { param, .. } => param.clone(),
            _ => None,
        };
        ErrorResponse::new(self.to_string(), self.kind(), param, self.code())
    }
}

impl From<TranslateError> for GatewayError {
    fn from(err: TranslateError) -> Self {
        Self::InvalidRequest {
            message: err.message,
            param: err.param,
        }
    }
}

impl From<UpstreamError> for GatewayError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::Unavailable(message) => Self::UpstreamUnavailable(message),
            UpstreamError::Throttled(message) => Self::UpstreamThrottled(message),
            UpstreamError::Invalid(message) => Self::InvalidRequest {
                message,
                param: None,
            },
            UpstreamError::Server(message) => Self::UpstreamServer(message),
        }
    }
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        Self::Internal(format!("key store failure: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_and_code_table() {
        let cases: Vec<(GatewayError, StatusCode, &str, &str)> = vec![
            (
                GatewayError::invalid_request("bad"),
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "invalid_request",
            ),
            (
                GatewayError::Authentication("no".into()),
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "invalid_api_key",
            ),
            (
                GatewayError::Permission("no".into()),
                StatusCode::FORBIDDEN,
                "permission_error",
                "permission_denied",
            ),
            (
                GatewayError::NotFound("no".into()),
                StatusCode::NOT_FOUND,
                "not_found_error",
                "model_not_found",
            ),
            (
                GatewayError::RateLimited("slow down".into()),
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limit_error",
                "rate_limit_exceeded",
            ),
            (
                GatewayError::UpstreamThrottled("slow down".into()),
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limit_error",
                "upstream_throttled",
            ),
            (
                GatewayError::UpstreamUnavailable("down".into()),
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                "upstream_unavailable",
            ),
            (
                GatewayError::UpstreamServer("boom".into()),
                StatusCode::BAD_GATEWAY,
                "server_error",
                "upstream_error",
            ),
            (
                GatewayError::Internal("boom".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                "internal_error",
            ),
        ];

        for (error, status, kind, code) in cases {
            assert_eq!(error.status(), status);
            let body = error.body();
            assert_eq!(body.error.kind, kind);
            assert_eq!(body.error.code.as_deref(), Some(code));
        }
    }

    #[test]
    fn translate_errors_keep_their_param() {
        let error: GatewayError =
            TranslateError::with_param("bad arguments", "tool_calls.arguments").into();
        assert_eq!(
            error.body().error.param.as_deref(),
            Some("tool_calls.arguments")
        );
    }
}
