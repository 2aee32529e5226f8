//! HTTP surface of the gateway.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::StreamExt;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::CorsLayer;

use bgw_core::engine::{ChatEngine, ChatOutcome, SseFrame};
use bgw_core::error::GatewayError;
use bgw_core::rate_limit::RateInfo;
use bgw_protocol::openai::chat_completions::request::ChatCompletionRequest;

const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

#[derive(Clone)]
struct GatewayState {
    engine: Arc<ChatEngine>,
}

pub fn gateway_router(engine: Arc<ChatEngine>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(list_models))
        .route("/v1/models/{model}", get(get_model))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/", get(root))
        .layer(CorsLayer::permissive())
        .with_state(GatewayState { engine })
}

async fn chat_completions(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = match serde_json::from_slice::<ChatCompletionRequest>(&body) {
        Ok(request) => request,
        Err(err) => {
            let request_id = fallback_request_id(&headers);
            let error =
                GatewayError::invalid_request(format!("request body could not be parsed: {err}"));
            return error_response(&request_id, None, &error);
        }
    };

    let reply = state.engine.handle_chat(&headers, request).await;
    match reply.result {
        Ok(ChatOutcome::Completion(completion)) => {
            let mut response = Json(completion).into_response();
            apply_common_headers(&mut response, &reply.request_id, reply.rate.as_ref());
            response
        }
        Ok(ChatOutcome::Stream(frames)) => {
            let events = ReceiverStream::new(frames)
                .map(|frame| Ok::<Event, Infallible>(to_sse_event(frame)));
            let mut response = Sse::new(events).into_response();
            let response_headers = response.headers_mut();
            response_headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            response_headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
            apply_common_headers(&mut response, &reply.request_id, reply.rate.as_ref());
            response
        }
        Err(error) => error_response(&reply.request_id, reply.rate.as_ref(), &error),
    }
}

fn to_sse_event(frame: SseFrame) -> Event {
    match frame {
        SseFrame::Chunk(chunk) => {
            Event::default().data(serde_json::to_string(&chunk).unwrap_or_default())
        }
        SseFrame::Error(error) => Event::default()
            .event("error")
            .data(serde_json::to_string(&error).unwrap_or_default()),
        SseFrame::Done => Event::default().data("[DONE]"),
    }
}

async fn list_models(State(state): State<GatewayState>, headers: HeaderMap) -> Response {
    match state.engine.observe(&headers).await {
        Ok(view) => {
            let models = state.engine.list_models().await;
            let mut response = Json(models).into_response();
            apply_common_headers(&mut response, &view.request_id, view.rate.as_ref());
            response
        }
        Err((request_id, error)) => error_response(&request_id, None, &error),
    }
}

async fn get_model(
    State(state): State<GatewayState>,
    Path(model): Path<String>,
    headers: HeaderMap,
) -> Response {
    match state.engine.observe(&headers).await {
        Ok(view) => {
            let mut response = Json(state.engine.model(&model)).into_response();
            apply_common_headers(&mut response, &view.request_id, view.rate.as_ref());
            response
        }
        Err((request_id, error)) => error_response(&request_id, None, &error),
    }
}

async fn health() -> Response {
    Json(serde_json::json!({"status": "ok"})).into_response()
}

async fn ready(State(state): State<GatewayState>) -> Response {
    if state.engine.ready().await {
        Json(serde_json::json!({"status": "ready"})).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"status": "unavailable"})),
        )
            .into_response()
    }
}

async fn root() -> Response {
    Json(serde_json::json!({
        "name": "bgw",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
    }))
    .into_response()
}

fn error_response(request_id: &str, rate: Option<&RateInfo>, error: &GatewayError) -> Response {
    let mut response = (error.status(), Json(error.body())).into_response();
    apply_common_headers(&mut response, request_id, rate);
    response
}

fn apply_common_headers(response: &mut Response, request_id: &str, rate: Option<&RateInfo>) {
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(request_id) {
        headers.insert(X_REQUEST_ID, value);
    }
    let Some(rate) = rate else { return };
    for (name, value) in [
        (X_RATELIMIT_LIMIT, rate.limit.to_string()),
        (X_RATELIMIT_REMAINING, rate.remaining.to_string()),
        (X_RATELIMIT_RESET, rate.reset_epoch.to_string()),
    ] {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name, value);
        }
    }
}

fn fallback_request_id(headers: &HeaderMap) -> String {
    headers
        .get(&X_REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| "unparsed-request".to_string())
}
