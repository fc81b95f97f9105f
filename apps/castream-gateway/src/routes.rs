use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use castream_core::{Dialect, PipelineResponse};
use castream_protocol::anthropic::{MessagesRequest, ModelListing as AnthropicModelListing, ModelsResponse as AnthropicModelsResponse};
use castream_protocol::openai::{ChatCompletionsRequest, ModelListing as OpenAiModelListing, ModelsResponse as OpenAiModelsResponse};
use castream_transform::{decode_anthropic, decode_openai};
use futures_util::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::AppState;

const SSE_HEARTBEAT_INTERVAL: std::time::Duration = std::time::Duration::from_secs(15);
const SSE_HEARTBEAT_FRAME: &[u8] = b": keep-alive\n\n";

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/messages", post(messages))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(models))
        .route("/healthz", get(healthz))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::auth::require_api_key,
        ))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn models() -> impl IntoResponse {
    let model_id = "castream-default";
    Json(serde_json::json!({
        "anthropic": AnthropicModelsResponse {
            data: vec![AnthropicModelListing {
                id: model_id.to_string(),
                kind: "model",
                display_name: model_id.to_string(),
            }],
        },
        "openai": OpenAiModelsResponse {
            object: "list",
            data: vec![OpenAiModelListing {
                id: model_id.to_string(),
                object: "model",
                owned_by: "castream",
            }],
        },
    }))
}

async fn messages(
    State(state): State<Arc<AppState>>,
    Json(body): Json<MessagesRequest>,
) -> Response {
    let request = match decode_anthropic(body) {
        Ok(request) => request,
        Err(err) => return error_response(&err),
    };
    run_pipeline(&state, Dialect::Anthropic, request).await
}

async fn chat_completions(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ChatCompletionsRequest>,
) -> Response {
    let request = match decode_openai(body) {
        Ok(request) => request,
        Err(err) => return error_response(&err),
    };
    run_pipeline(&state, Dialect::OpenAi, request).await
}

async fn run_pipeline(
    state: &AppState,
    dialect: Dialect,
    request: castream_protocol::canonical::CanonicalRequest,
) -> Response {
    let cancel = CancellationToken::new();
    match state.pipeline.handle(dialect, request, cancel.clone()).await {
        Ok(PipelineResponse::Once(bytes)) => json_bytes_response(bytes),
        Ok(PipelineResponse::Stream(rx)) => sse_response(rx, cancel),
        Err(err) => error_response(&err),
    }
}

/// Cancels the pipeline's token when the body stream it's attached to is
/// dropped — the case axum hits when the client disconnects mid-stream,
/// since nothing else observes that event once headers have been sent.
struct CancelOnDrop(CancellationToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

fn json_bytes_response(bytes: Bytes) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))
        .body(Body::from(bytes))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn sse_response(rx: tokio::sync::mpsc::Receiver<Bytes>, cancel: CancellationToken) -> Response {
    let rx = wrap_sse_stream_with_heartbeat(rx);
    let guard = CancelOnDrop(cancel);
    let stream = ReceiverStream::new(rx).map(move |chunk| {
        let _ = &guard;
        Ok::<_, Infallible>(chunk)
    });
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"))
        .header(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"))
        .header("x-accel-buffering", HeaderValue::from_static("no"))
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn wrap_sse_stream_with_heartbeat(
    mut upstream_rx: tokio::sync::mpsc::Receiver<Bytes>,
) -> tokio::sync::mpsc::Receiver<Bytes> {
    let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(32);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SSE_HEARTBEAT_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                maybe_chunk = upstream_rx.recv() => {
                    let Some(chunk) = maybe_chunk else { break };
                    if tx.send(chunk).await.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if tx.send(Bytes::from_static(SSE_HEARTBEAT_FRAME)).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}

fn error_response(err: &castream_common::GatewayError) -> Response {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let payload = serde_json::json!({
        "error": {
            "type": err.sse_error_type(),
            "message": err.to_string(),
        }
    });
    (status, Json(payload)).into_response()
}
