//! Bedrock-runtime implementation of the upstream client contract.
//!
//! Translated Converse requests are rebuilt with the SDK's types here;
//! responses and stream events are folded back into the gateway's wire
//! types so nothing above this crate touches the SDK.

mod document;
mod wire;

use std::time::Duration;

use aws_config::BehaviorVersion;
use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_sdk_bedrockruntime::Client;
use aws_sdk_bedrockruntime::error::SdkError;
use aws_sdk_bedrockruntime::operation::converse::ConverseError;
use aws_sdk_bedrockruntime::operation::converse_stream::ConverseStreamError;
use tokio_stream::wrappers::ReceiverStream;

use bgw_core::upstream::{EventStream, UpstreamClient, UpstreamError};
use bgw_protocol::bedrock::converse::request::ConverseRequest;
use bgw_protocol::bedrock::converse::response::ConverseResponse;
use bgw_protocol::bedrock::converse::stream::{ConverseStreamEvent, MessageStopEvent};

#[derive(Debug, Clone)]
pub struct BedrockConfig {
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    /// Per-attempt operation timeout. The gateway applies its own retry
    /// policy, so SDK retries are disabled.
    pub operation_timeout: Duration,
}

#[derive(Clone)]
pub struct BedrockConverse {
    client: Client,
}

impl BedrockConverse {
    pub async fn connect(config: BedrockConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = config.region {
            loader = loader.region(aws_config::Region::new(region));
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_bedrockruntime::config::Builder::from(&shared)
            .retry_config(RetryConfig::disabled())
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(config.operation_timeout)
                    .build(),
            );
        if let Some(endpoint_url) = config.endpoint_url {
            builder = builder.endpoint_url(endpoint_url);
        }
        Self {
            client: Client::from_conf(builder.build()),
        }
    }
}

#[async_trait::async_trait]
impl UpstreamClient for BedrockConverse {
    async fn converse(&self, request: &ConverseRequest) -> Result<ConverseResponse, UpstreamError> {
        let output = wire::apply_request(self.client.converse(), request)?
            .send()
            .await
            .map_err(classify_converse_error)?;
        wire::from_converse_output(output)
    }

    async fn converse_stream(
        &self,
        request: &ConverseRequest,
    ) -> Result<EventStream, UpstreamError> {
        let output = wire::apply_stream_request(self.client.converse_stream(), request)?
            .send()
            .await
            .map_err(classify_stream_error)?;

        let (tx, rx) = tokio::sync::mpsc::channel::<Result<ConverseStreamEvent, UpstreamError>>(32);
        let mut receiver = output.stream;
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(Some(event)) => {
                        for event in wire::from_stream_event(event) {
                            if tx.send(Ok(event)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Ok(None) => {
                        // The SDK stream closes after its metadata event;
                        // the wire protocol ends with an explicit stop.
                        let _ = tx
                            .send(Ok(ConverseStreamEvent::MessageStop(MessageStopEvent {})))
                            .await;
                        return;
                    }
                    Err(err) => {
                        let _ = tx
                            .send(Err(UpstreamError::Server(error_message(&err))))
                            .await;
                        return;
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

fn classify_converse_error(err: SdkError<ConverseError>) -> UpstreamError {
    let message = error_message(&err);
    match &err {
        SdkError::ServiceError(service_err) => match service_err.err() {
            ConverseError::ThrottlingException(_) => UpstreamError::Throttled(message),
            ConverseError::ValidationException(_)
            | ConverseError::AccessDeniedException(_)
            | ConverseError::ResourceNotFoundException(_) => UpstreamError::Invalid(message),
            ConverseError::ModelNotReadyException(_)
            | ConverseError::ModelTimeoutException(_)
            | ConverseError::ServiceUnavailableException(_) => UpstreamError::Unavailable(message),
            _ => UpstreamError::Server(message),
        },
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => {
            UpstreamError::Unavailable(message)
        }
        _ => UpstreamError::Server(message),
    }
}

fn classify_stream_error(err: SdkError<ConverseStreamError>) -> UpstreamError {
    let message = error_message(&err);
    match &err {
        SdkError::ServiceError(service_err) => match service_err.err() {
            ConverseStreamError::ThrottlingException(_) => UpstreamError::Throttled(message),
            ConverseStreamError::ValidationException(_)
            | ConverseStreamError::AccessDeniedException(_)
            | ConverseStreamError::ResourceNotFoundException(_) => UpstreamError::Invalid(message),
            ConverseStreamError::ModelNotReadyException(_)
            | ConverseStreamError::ModelTimeoutException(_)
            | ConverseStreamError::ServiceUnavailableException(_) => {
                UpstreamError::Unavailable(message)
            }
            _ => UpstreamError::Server(message),
        },
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => {
            UpstreamError::Unavailable(message)
        }
        _ => UpstreamError::Server(message),
    }
}

/// SdkError's own Display is terse ("service error"); walking the source
/// chain recovers the service-level detail.
fn error_message(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
