use std::sync::Arc;

use http::HeaderMap;

use bgw_storage::{ApiKeyRecord, KeyStore};

use crate::error::GatewayError;

/// The admitted identity of a request. `unlimited` marks master-key
/// traffic, which bypasses the rate limiter.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub record: ApiKeyRecord,
    pub unlimited: bool,
}

pub struct Authenticator {
    store: Arc<dyn KeyStore>,
    require_api_key: bool,
    master_api_key: Option<String>,
    default_rate_limit: u32,
}

impl Authenticator {
    pub fn new(
        store: Arc<dyn KeyStore>,
        require_api_key: bool,
        master_api_key: Option<String>,
        default_rate_limit: u32,
    ) -> Self {
        Self {
            store,
            require_api_key,
            master_api_key,
            default_rate_limit,
        }
    }

    /// Resolves request credentials to a key record. The bearer token is
    /// never logged.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<AuthContext, GatewayError> {
        let Some(token) = extract_bearer(headers) else {
            if !self.require_api_key {
                return Ok(self.synthetic("anonymous", false));
            }
            return Err(GatewayError::Authentication(
                "Missing API key. Include it in the Authorization header as 'Bearer <key>' \
                 or in the x-api-key header."
                    .to_string(),
            ));
        };

        if let Some(master) = &self.master_api_key
            && token == *master
        {
            return Ok(self.synthetic("master", true));
        }

        let record = self.store.get_api_key(&token).await?;
        match record {
            Some(record) if record.is_active => Ok(AuthContext {
                record,
                unlimited: false,
            }),
            Some(_) => Err(GatewayError::Authentication(
                "API key is disabled.".to_string(),
            )),
            None => Err(GatewayError::Authentication(
                "Invalid API key provided.".to_string(),
            )),
        }
    }

    fn synthetic(&self, user_id: &str, unlimited: bool) -> AuthContext {
        AuthContext {
            record: ApiKeyRecord {
                api_key: user_id.to_string(),
                user_id: user_id.to_string(),
                name: user_id.to_string(),
                is_active: true,
                rate_limit: self.default_rate_limit,
                created_at: String::new(),
                metadata: Default::default(),
            },
            unlimited,
        }
    }
}

/// `Authorization: Bearer <t>` wins over `x-api-key: <t>`, in that order.
pub fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(http::header::AUTHORIZATION)
        && let Ok(value) = value.to_str()
    {
        let value = value.trim();
        let prefix = "Bearer ";
        if value.len() > prefix.len() && value[..prefix.len()].eq_ignore_ascii_case(prefix) {
            let token = value[prefix.len()..].trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }

    headers
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
