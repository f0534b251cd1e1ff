//! HTTP transport: JSON and SSE endpoints over an [`Explainer`].
//!
//! | Route                  | Result                                              |
//! |------------------------|-----------------------------------------------------|
//! | `POST /explain`        | `200 {"explanation"}` / `400 {"error"}` / `500 {"error"}` |
//! | `POST /explain/stream` | `text/event-stream`: `message`, then `done` or `error` |
//! | `GET /health`          | `200 ok`                                            |
//!
//! Client faults (bad JSON, missing fields, unknown format, bad base64) map
//! to 400; everything else to 500. On the streaming route only validation
//! can still produce a status code; later failures become an `error` event.

use crate::error::ExplainError;
use crate::explain::Explainer;
use crate::request::{ExplainRequest, ExplainResponse, StreamChunk};
use crate::stream::DeliveryMode;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::timeout::TimeoutLayer;
use tracing::{info, warn};

/// Transport settings.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Upper bound on a request; streaming responses are cancelled when it
    /// elapses. Default: 60 s.
    pub request_timeout: Duration,
    /// Maximum requests in flight. Default: 100.
    pub concurrency_limit: usize,
    /// Maximum JSON body size. Default: 32 MiB.
    pub max_body_bytes: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            concurrency_limit: 100,
            max_body_bytes: 32 * 1024 * 1024,
        }
    }
}

struct AppState {
    explainer: Explainer,
    request_timeout: Duration,
}

/// Build the router with all routes and middleware.
pub fn router(explainer: Explainer, options: ServerOptions) -> Router {
    let state = Arc::new(AppState {
        explainer,
        request_timeout: options.request_timeout,
    });

    Router::new()
        .route("/explain", post(explain))
        .route("/explain/stream", post(explain_stream))
        .route("/health", get(|| async { "ok" }))
        .with_state(state)
        .layer(DefaultBodyLimit::max(options.max_body_bytes))
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::new(options.request_timeout))
        .layer(ConcurrencyLimitLayer::new(options.concurrency_limit.max(1)))
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(
                |request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                },
            ),
        )
}

// ── Errors ───────────────────────────────────────────────────────────────

/// An [`ExplainError`] on its way to becoming an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub ExplainError);

impl From<ExplainError> for ApiError {
    fn from(e: ExplainError) -> Self {
        Self(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(ExplainError::Validation(format!(
            "invalid JSON body: {}",
            rejection.body_text()
        )))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        if status.is_server_error() {
            warn!("Request failed: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────

async fn explain(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ExplainRequest>, JsonRejection>,
) -> Result<Json<ExplainResponse>, ApiError> {
    let Json(request) = payload?;
    let response = state.explainer.explain(&request).await?;
    Ok(Json(response))
}

async fn explain_stream(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ExplainRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let Json(request) = payload?;
    let file_name = request.file_name.clone();

    let cancel = CancellationToken::new();
    let chunks = state
        .explainer
        .explain_stream(request, cancel.clone(), DeliveryMode::Deltas)
        .await?;
    info!("SSE stream opened for {}", file_name);

    // Deadline: the TimeoutLayer only bounds the response head.
    let deadline = cancel.clone();
    let timeout = state.request_timeout;
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(timeout) => {
                warn!("SSE stream for {} hit the {:?} deadline", file_name, timeout);
                deadline.cancel();
            }
            _ = deadline.cancelled() => {}
        }
    });

    // Dropping the body (client disconnect) cancels the producer.
    let guard = cancel.drop_guard();
    let events = async_stream::stream! {
        let _guard = guard;
        let mut chunks = chunks;
        let mut explanation = String::new();
        while let Some(chunk) = chunks.next().await {
            let terminal = chunk.is_terminal();
            if let Some(frame) = sse_frame(chunk, &mut explanation) {
                yield Ok::<Event, Infallible>(frame.into_event());
            }
            if terminal {
                break;
            }
        }
    };

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

// ── SSE mapping ──────────────────────────────────────────────────────────

/// One server-sent event before it is serialised.
#[derive(Debug, Clone, PartialEq)]
pub struct SseFrame {
    pub event: &'static str,
    pub data: Value,
}

impl SseFrame {
    fn into_event(self) -> Event {
        Event::default().event(self.event).data(self.data.to_string())
    }
}

/// Map a chunk to its SSE frame, accumulating deltas into `explanation` so
/// the `done` event can carry the full text.
pub fn sse_frame(chunk: StreamChunk, explanation: &mut String) -> Option<SseFrame> {
    match chunk {
        StreamChunk::Delta(text) => {
            explanation.push_str(&text);
            Some(SseFrame {
                event: "message",
                data: json!({ "delta": text }),
            })
        }
        StreamChunk::Explanation(_) => None,
        StreamChunk::Done(_) => Some(SseFrame {
            event: "done",
            data: json!({ "explanation": explanation.as_str() }),
        }),
        StreamChunk::Err(e) => Some(SseFrame {
            event: "error",
            data: json!({ "error": e.to_string() }),
        }),
    }
}
