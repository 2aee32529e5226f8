use std::time::Duration;

use bgw_transform::FeatureGates;

/// Runtime configuration, read once at startup from the environment.
/// Unknown variables are ignored; malformed values fall back to the
/// field default.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,

    pub aws_region: Option<String>,
    pub bedrock_endpoint_url: Option<String>,
    pub dynamodb_endpoint_url: Option<String>,
    pub api_keys_table: String,
    pub usage_table: String,
    pub model_mapping_table: String,

    pub require_api_key: bool,
    pub master_api_key: Option<String>,

    pub rate_limit_enabled: bool,
    /// Default bucket capacity when a key record omits its own limit.
    pub rate_limit_requests: u32,
    pub rate_limit_window: Duration,

    pub enable_vision: bool,
    pub enable_tool_use: bool,
    pub enable_extended_thinking: bool,

    /// Unary upstream deadline.
    pub bedrock_timeout: Duration,
    /// Streaming deadline, admission to terminator.
    pub streaming_timeout: Duration,
    /// Bound on in-flight upstream invocations.
    pub max_concurrent_requests: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            aws_region: None,
            bedrock_endpoint_url: None,
            dynamodb_endpoint_url: None,
            api_keys_table: "openai-proxy-api-keys".to_string(),
            usage_table: "openai-proxy-usage".to_string(),
            model_mapping_table: "openai-proxy-model-mapping".to_string(),
            require_api_key: true,
            master_api_key: None,
            rate_limit_enabled: true,
            rate_limit_requests: 100,
            rate_limit_window: Duration::from_secs(60),
            enable_vision: true,
            enable_tool_use: true,
            enable_extended_thinking: true,
            bedrock_timeout: Duration::from_secs(120),
            streaming_timeout: Duration::from_secs(300),
            max_concurrent_requests: 512,
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: env_string("BGW_HOST").unwrap_or(defaults.host),
            port: env_parse("BGW_PORT").unwrap_or(defaults.port),
            aws_region: env_string("AWS_REGION"),
            bedrock_endpoint_url: env_string("BEDROCK_ENDPOINT_URL"),
            dynamodb_endpoint_url: env_string("DYNAMODB_ENDPOINT_URL"),
            api_keys_table: env_string("DYNAMODB_API_KEYS_TABLE").unwrap_or(defaults.api_keys_table),
            usage_table: env_string("DYNAMODB_USAGE_TABLE").unwrap_or(defaults.usage_table),
            model_mapping_table: env_string("DYNAMODB_MODEL_MAPPING_TABLE")
                .unwrap_or(defaults.model_mapping_table),
            require_api_key: env_bool("REQUIRE_API_KEY").unwrap_or(defaults.require_api_key),
            master_api_key: env_string("MASTER_API_KEY"),
            rate_limit_enabled: env_bool("RATE_LIMIT_ENABLED").unwrap_or(defaults.rate_limit_enabled),
            rate_limit_requests: env_parse("RATE_LIMIT_REQUESTS")
                .filter(|requests| *requests >= 1)
                .unwrap_or(defaults.rate_limit_requests),
            rate_limit_window: env_parse("RATE_LIMIT_WINDOW")
                .filter(|seconds| *seconds >= 1)
                .map(Duration::from_secs)
                .unwrap_or(defaults.rate_limit_window),
            enable_vision: env_bool("ENABLE_VISION").unwrap_or(defaults.enable_vision),
            enable_tool_use: env_bool("ENABLE_TOOL_USE").unwrap_or(defaults.enable_tool_use),
            enable_extended_thinking: env_bool("ENABLE_EXTENDED_THINKING")
                .unwrap_or(defaults.enable_extended_thinking),
            bedrock_timeout: env_parse("BEDROCK_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.bedrock_timeout),
            streaming_timeout: env_parse("STREAMING_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.streaming_timeout),
            max_concurrent_requests: env_parse("MAX_CONCURRENT_REQUESTS")
                .filter(|permits| *permits >= 1)
                .unwrap_or(defaults.max_concurrent_requests),
        }
    }

    pub fn feature_gates(&self) -> FeatureGates {
        FeatureGates {
            vision: self.enable_vision,
            tool_use: self.enable_tool_use,
            extended_thinking: self.enable_extended_thinking,
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_bool(name: &str) -> Option<bool> {
    env_string(name).and_then(|value| parse_bool(&value))
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_string(name).and_then(|value| value.parse().ok())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_parsing() {
        assert_eq!(parse_bool("true"), Some(true));
        assert_eq!(parse_bool("FALSE"), Some(false));
        assert_eq!(parse_bool("1"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn defaults_hold_without_environment() {
        let config = GatewayConfig::default();
        assert!(config.require_api_key);
        assert_eq!(config.rate_limit_requests, 100);
        assert_eq!(config.rate_limit_window, Duration::from_secs(60));
        assert_eq!(config.bedrock_timeout, Duration::from_secs(120));
        assert_eq!(config.streaming_timeout, Duration::from_secs(300));
    }
}
