use std::pin::Pin;
use std::time::Duration;

use futures_util::Stream;
use rand::Rng;
use thiserror::Error;

use bgw_protocol::bedrock::converse::request::ConverseRequest;
use bgw_protocol::bedrock::converse::response::ConverseResponse;
use bgw_protocol::bedrock::converse::stream::ConverseStreamEvent;

/// Transport and service failures, folded into the four kinds the error
/// mapper understands.
#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    /// Connect failures and timeouts.
    #[error("upstream unavailable: {0}")]
    Unavailable(String),
    /// 429-equivalent.
    #[error("upstream throttled: {0}")]
    Throttled(String),
    /// 4xx-equivalent: the upstream rejected the request itself.
    #[error("{0}")]
    Invalid(String),
    /// 5xx-equivalent.
    #[error("upstream error: {0}")]
    Server(String),
}

impl UpstreamError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Throttled(_))
    }
}

pub type EventStream =
    Pin<Box<dyn Stream<Item = Result<ConverseStreamEvent, UpstreamError>> + Send>>;

#[async_trait::async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn converse(&self, request: &ConverseRequest) -> Result<ConverseResponse, UpstreamError>;

    /// Opens a streaming invocation. Errors after the stream is returned
    /// arrive as stream items and are never retried.
    async fn converse_stream(
        &self,
        request: &ConverseRequest,
    ) -> Result<EventStream, UpstreamError>;
}

const RETRY_BASE: Duration = Duration::from_millis(250);
const MAX_ATTEMPTS: u32 = 3;

/// Runs `op` with at most two additional attempts on retryable failures,
/// sleeping a full-jitter exponential backoff between attempts.
pub async fn with_retries<T, F, Fut>(mut op: F) -> Result<T, UpstreamError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, UpstreamError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < MAX_ATTEMPTS => {
                let cap = RETRY_BASE.as_millis() as u64 * (1 << attempt);
                let jitter = rand::rng().random_range(0..=cap);
                tokio::time::sleep(Duration::from_millis(jitter)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retryable_failures_get_two_more_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retries(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(UpstreamError::Throttled("busy".to_string())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_failures_surface_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retries(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(UpstreamError::Invalid("bad request".to_string())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recovery_stops_retrying() {
        let calls = AtomicU32::new(0);
        let result = with_retries(|| {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if call == 0 {
                    Err(UpstreamError::Unavailable("connect refused".to_string()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
