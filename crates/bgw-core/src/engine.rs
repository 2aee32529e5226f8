use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use http::HeaderMap;
use rand::Rng;
use time::OffsetDateTime;
use tokio::sync::{Semaphore, mpsc};

use bgw_protocol::openai::chat_completions::request::ChatCompletionRequest;
use bgw_protocol::openai::chat_completions::response::ChatCompletionResponse;
use bgw_protocol::openai::chat_completions::stream::ChatCompletionChunk;
use bgw_protocol::openai::error::ErrorResponse;
use bgw_protocol::openai::models::{ListObject, Model, ModelList, ModelObject};
use bgw_storage::{KeyStore, UsageRow};
use bgw_transform::request::translate_request;
use bgw_transform::response::translate_response;
use bgw_transform::stream::{ConverseStreamState, StreamItem};

use crate::auth::Authenticator;
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::images::ImageFetcher;
use crate::models::ModelResolver;
use crate::rate_limit::{RateDecision, RateInfo, RateLimiter};
use crate::upstream::{UpstreamClient, with_retries};
use crate::usage::UsageRecorder;

/// Fixed `created` value for model listings, matching the catalog rather
/// than the wall clock.
const MODEL_LISTING_CREATED: i64 = 1_700_000_000;

/// One server-sent event of a streamed completion.
#[derive(Debug, Clone, PartialEq)]
pub enum SseFrame {
    /// `data: <chunk-json>`
    Chunk(ChatCompletionChunk),
    /// `event: error` + `data: <error-json>`, for mid-stream failures.
    Error(ErrorResponse),
    /// `data: [DONE]`
    Done,
}

pub enum ChatOutcome {
    Completion(Box<ChatCompletionResponse>),
    Stream(mpsc::Receiver<SseFrame>),
}

/// The full result of one admission-pipeline pass. Rate headers are
/// attached whenever the limiter ran, on success and rejection alike.
pub struct ChatReply {
    pub request_id: String,
    pub rate: Option<RateInfo>,
    pub result: Result<ChatOutcome, GatewayError>,
}

/// Identity and rate snapshot for non-completion endpoints.
pub struct AdmissionView {
    pub request_id: String,
    pub rate: Option<RateInfo>,
}

pub struct ChatEngine {
    config: GatewayConfig,
    authenticator: Authenticator,
    rate_limiter: Arc<RateLimiter>,
    resolver: ModelResolver,
    upstream: Arc<dyn UpstreamClient>,
    usage: UsageRecorder,
    images: ImageFetcher,
    store: Arc<dyn KeyStore>,
    /// Caps in-flight upstream invocations; a stream holds its permit
    /// until the terminator.
    upstream_slots: Arc<Semaphore>,
}

/// Identity of an admitted request, threaded to the deferred usage write.
#[derive(Clone)]
struct RequestSeed {
    api_key: String,
    request_id: String,
    model_id: String,
    started: Instant,
}

impl ChatEngine {
    pub fn new(
        config: GatewayConfig,
        store: Arc<dyn KeyStore>,
        upstream: Arc<dyn UpstreamClient>,
    ) -> Result<Self, wreq::Error> {
        let authenticator = Authenticator::new(
            Arc::clone(&store),
            config.require_api_key,
            config.master_api_key.clone(),
            config.rate_limit_requests,
        );
        Ok(Self {
            rate_limiter: RateLimiter::new(config.rate_limit_window),
            resolver: ModelResolver::new(Arc::clone(&store)),
            usage: UsageRecorder::new(Arc::clone(&store)),
            images: ImageFetcher::new()?,
            upstream_slots: Arc::new(Semaphore::new(config.max_concurrent_requests)),
            authenticator,
            upstream,
            store,
            config,
        })
    }

    /// Starts the bucket reaper; call once after the runtime is up.
    pub fn spawn_background_tasks(&self) {
        self.rate_limiter.spawn_reaper();
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub async fn handle_chat(
        &self,
        headers: &HeaderMap,
        mut request: ChatCompletionRequest,
    ) -> ChatReply {
        let request_id = request_id_from(headers);

        let auth = match self.authenticator.authenticate(headers).await {
            Ok(auth) => auth,
            Err(err) => {
                return ChatReply {
                    request_id,
                    rate: None,
                    result: Err(err),
                };
            }
        };

        let mut rate = None;
        if self.config.rate_limit_enabled && !auth.unlimited {
            let capacity = auth.record.rate_limit.max(1);
            match self.rate_limiter.admit(&auth.record.api_key, capacity) {
                RateDecision::Allowed(info) => rate = Some(info),
                RateDecision::Rejected(info) => {
                    return ChatReply {
                        request_id,
                        rate: Some(info),
                        result: Err(GatewayError::RateLimited(
                            "Rate limit exceeded. Please retry after some time.".to_string(),
                        )),
                    };
                }
            }
        }

        let client_model = request.model.clone();
        let model_id = self.resolver.resolve(&client_model).await;
        let seed = RequestSeed {
            api_key: auth.record.api_key.clone(),
            request_id: request_id.clone(),
            model_id: model_id.clone(),
            started: Instant::now(),
        };

        tracing::info!(
            request_id = %request_id,
            user_id = %auth.record.user_id,
            client_model = %client_model,
            upstream_model = %model_id,
            message_count = request.messages.len(),
            stream = request.wants_stream(),
            "chat completion admitted"
        );

        let result = self
            .dispatch(&mut request, &client_model, &seed)
            .await
            .inspect_err(|err| {
                self.record_failure(&seed, err.to_string());
                tracing::warn!(request_id = %seed.request_id, error = %err, "chat completion failed");
            });

        ChatReply {
            request_id,
            rate,
            result,
        }
    }

    async fn dispatch(
        &self,
        request: &mut ChatCompletionRequest,
        client_model: &str,
        seed: &RequestSeed,
    ) -> Result<ChatOutcome, GatewayError> {
        if self.config.enable_vision {
            self.images.inline_remote_images(request).await?;
        }
        let converse = translate_request(request, &seed.model_id, &self.config.feature_gates())?;

        let completion_id = completion_id();
        let created = OffsetDateTime::now_utc().unix_timestamp();

        let permit = Arc::clone(&self.upstream_slots)
            .acquire_owned()
            .await
            .map_err(|_| GatewayError::Internal("upstream slot pool closed".to_string()))?;

        if request.wants_stream() {
            let deadline =
                tokio::time::Instant::from(seed.started) + self.config.streaming_timeout;
            let events = tokio::time::timeout_at(
                deadline,
                with_retries(|| self.upstream.converse_stream(&converse)),
            )
            .await
            .map_err(|_| {
                GatewayError::UpstreamUnavailable("upstream request deadline exceeded".to_string())
            })??;

            let (tx, rx) = mpsc::channel(32);
            let state = ConverseStreamState::new(completion_id, client_model.to_string(), created);
            let recorder = self.usage.clone();
            let seed = seed.clone();
            tokio::spawn(async move {
                let _permit = permit;
                pump_stream(events, tx, state, recorder, seed, deadline).await;
            });
            Ok(ChatOutcome::Stream(rx))
        } else {
            let _permit = permit;
            let response = tokio::time::timeout(
                self.config.bedrock_timeout,
                with_retries(|| self.upstream.converse(&converse)),
            )
            .await
            .map_err(|_| {
                GatewayError::UpstreamUnavailable("upstream request deadline exceeded".to_string())
            })??;

            let completion = translate_response(&response, client_model, completion_id, created);
            self.usage.record(UsageRow {
                api_key: seed.api_key.clone(),
                timestamp_ms: epoch_millis(),
                request_id: seed.request_id.clone(),
                model: seed.model_id.clone(),
                prompt_tokens: completion.usage.prompt_tokens,
                completion_tokens: completion.usage.completion_tokens,
                total_tokens: completion.usage.total_tokens,
                success: true,
                error_message: None,
                latency_ms: seed.started.elapsed().as_millis() as u64,
            });
            Ok(ChatOutcome::Completion(Box::new(completion)))
        }
    }

    fn record_failure(&self, seed: &RequestSeed, message: String) {
        self.usage.record(UsageRow {
            api_key: seed.api_key.clone(),
            timestamp_ms: epoch_millis(),
            request_id: seed.request_id.clone(),
            model: seed.model_id.clone(),
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
            success: false,
            error_message: Some(message),
            latency_ms: seed.started.elapsed().as_millis() as u64,
        });
    }

    /// Authentication plus a non-consuming rate snapshot, for `/v1/*`
    /// endpoints that carry the standard headers but are not metered.
    pub async fn observe(
        &self,
        headers: &HeaderMap,
    ) -> Result<AdmissionView, (String, GatewayError)> {
        let request_id = request_id_from(headers);
        match self.authenticator.authenticate(headers).await {
            Ok(auth) => {
                let rate = (self.config.rate_limit_enabled && !auth.unlimited).then(|| {
                    self.rate_limiter
                        .peek(&auth.record.api_key, auth.record.rate_limit.max(1))
                });
                Ok(AdmissionView { request_id, rate })
            }
            Err(err) => Err((request_id, err)),
        }
    }

    pub async fn list_models(&self) -> ModelList {
        let data = self
            .resolver
            .known_model_ids()
            .await
            .into_iter()
            .map(|id| Model {
                id,
                object: ModelObject::Model,
                created: MODEL_LISTING_CREATED,
                owned_by: "anthropic".to_string(),
            })
            .collect();
        ModelList {
            object: ListObject::List,
            data,
        }
    }

    pub fn model(&self, id: &str) -> Model {
        Model {
            id: id.to_string(),
            object: ModelObject::Model,
            created: MODEL_LISTING_CREATED,
            owned_by: "anthropic".to_string(),
        }
    }

    /// Readiness: the key store answers and the default table is loaded
    /// (the table ships in the binary, so the store probe decides).
    pub async fn ready(&self) -> bool {
        self.store.ping().await.is_ok()
    }
}

/// Bridges upstream events to SSE frames and writes the usage row on
/// every exit: completion, upstream failure, deadline, or client
/// disconnect.
async fn pump_stream(
    mut events: crate::upstream::EventStream,
    tx: mpsc::Sender<SseFrame>,
    mut state: ConverseStreamState,
    recorder: UsageRecorder,
    seed: RequestSeed,
    deadline: tokio::time::Instant,
) {
    let mut error_message: Option<String> = None;

    'read: loop {
        let next = tokio::time::timeout_at(deadline, events.next()).await;
        let event = match next {
            Err(_) => {
                let err =
                    GatewayError::UpstreamUnavailable("streaming deadline exceeded".to_string());
                error_message = Some(err.to_string());
                send_abort(&tx, &mut state, &err).await;
                break 'read;
            }
            Ok(None) => {
                if !state.is_finished() {
                    let err = GatewayError::UpstreamServer(
                        "upstream stream ended before message stop".to_string(),
                    );
                    error_message = Some(err.to_string());
                    send_abort(&tx, &mut state, &err).await;
                }
                break 'read;
            }
            Ok(Some(Err(err))) => {
                let err: GatewayError = err.into();
                error_message = Some(err.to_string());
                send_abort(&tx, &mut state, &err).await;
                break 'read;
            }
            Ok(Some(Ok(event))) => event,
        };

        for item in state.transform_event(event) {
            let frame = match item {
                StreamItem::Chunk(chunk) => SseFrame::Chunk(chunk),
                StreamItem::Done => SseFrame::Done,
            };
            if tx.send(frame).await.is_err() {
                error_message = Some("client_canceled".to_string());
                break 'read;
            }
        }
        if state.is_finished() {
            break 'read;
        }
    }

    let usage = state.usage();
    let success = state.is_finished() && error_message.is_none();
    recorder.record(UsageRow {
        api_key: seed.api_key,
        timestamp_ms: epoch_millis(),
        request_id: seed.request_id,
        model: seed.model_id,
        prompt_tokens: usage.map(|usage| usage.prompt_tokens).unwrap_or(0),
        completion_tokens: usage.map(|usage| usage.completion_tokens).unwrap_or(0),
        total_tokens: usage.map(|usage| usage.total_tokens).unwrap_or(0),
        success,
        error_message,
        latency_ms: seed.started.elapsed().as_millis() as u64,
    });
}

/// Mid-stream failure protocol: one synthetic chunk with an error finish
/// reason, an out-of-band error event, then the terminator.
async fn send_abort(
    tx: &mpsc::Sender<SseFrame>,
    state: &mut ConverseStreamState,
    err: &GatewayError,
) {
    let frames = [
        SseFrame::Chunk(state.abort_chunk()),
        SseFrame::Error(err.body()),
        SseFrame::Done,
    ];
    for frame in frames {
        if tx.send(frame).await.is_err() {
            return;
        }
    }
}

fn request_id_from(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

const BASE62: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

fn completion_id() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..24)
        .map(|_| BASE62[rng.random_range(0..BASE62.len())] as char)
        .collect();
    format!("chatcmpl-{suffix}")
}

fn epoch_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_ids_are_prefixed_base62() {
        let id = completion_id();
        let suffix = id.strip_prefix("chatcmpl-").unwrap();
        assert_eq!(suffix.len(), 24);
        assert!(suffix.bytes().all(|byte| BASE62.contains(&byte)));
        assert_ne!(completion_id(), id);
    }
}
