//! HTTP transport tests: drive the axum router in-process with `oneshot`.

#![cfg(feature = "server")]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use edgequake_explain::pipeline::diagram::DiagramConverter;
use edgequake_explain::pipeline::message::ChatRequest;
use edgequake_explain::server::{router, ServerOptions};
use edgequake_explain::{ChatBackend, DiagramKind, ExplainError, Explainer, TokenStream};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tower::ServiceExt;

/// Streams the reply in fixed pieces; `fail_after` injects an error.
struct PiecewiseBackend {
    pieces: Vec<&'static str>,
    fail_after: Option<usize>,
}

#[async_trait]
impl ChatBackend for PiecewiseBackend {
    async fn complete(&self, _request: &ChatRequest) -> Result<String, ExplainError> {
        match self.fail_after {
            Some(_) => Err(ExplainError::Backend("model overloaded".into())),
            None => Ok(self.pieces.concat()),
        }
    }

    async fn stream(&self, _request: &ChatRequest) -> Result<TokenStream, ExplainError> {
        let mut items: Vec<Result<String, ExplainError>> =
            self.pieces.iter().map(|p| Ok(p.to_string())).collect();
        if let Some(n) = self.fail_after {
            items.truncate(n);
            items.push(Err(ExplainError::Backend("model overloaded".into())));
        }
        Ok(Box::pin(futures::stream::iter(items)))
    }
}

struct BrokenConverter;

#[async_trait]
impl DiagramConverter for BrokenConverter {
    async fn run(&self, _kind: DiagramKind, _input: &Path, _output: &Path) -> Result<(), String> {
        Err("'inkscape' exited with exit status: 1".into())
    }
}

fn app(pieces: Vec<&'static str>, fail_after: Option<usize>) -> Router {
    let explainer = Explainer::builder(Arc::new(PiecewiseBackend { pieces, fail_after }))
        .converter(Arc::new(BrokenConverter))
        .build();
    router(explainer, ServerOptions::default())
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn png_body() -> String {
    json!({
        "prompt": "explain",
        "file_base64": "iVBORw0KGgo=",
        "file_name": "a.png",
        "file_format": "png"
    })
    .to_string()
}

async fn read_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn read_text(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn health_is_ok() {
    let response = app(vec![], None)
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_text(response).await, "ok");
}

#[tokio::test]
async fn explain_returns_full_answer() {
    let response = app(vec!["A ", "login ", "flow."], None)
        .oneshot(post_json("/explain", &png_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await, json!({"explanation": "A login flow."}));
}

#[tokio::test]
async fn malformed_json_is_400() {
    let response = app(vec![], None)
        .oneshot(post_json("/explain", "{\"file_name\": "))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(read_json(response).await["error"].is_string());
}

#[tokio::test]
async fn missing_field_and_unknown_format_are_400() {
    let body = json!({"file_base64": "", "file_name": "a.png", "file_format": "png"}).to_string();
    let response = app(vec![], None)
        .oneshot(post_json("/explain", &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        read_json(response).await,
        json!({"error": "request validation failed: file_base64 is empty"})
    );

    let body = json!({"file_base64": "AAAA", "file_name": "a.docx", "file_format": "docx"})
        .to_string();
    let response = app(vec![], None)
        .oneshot(post_json("/explain", &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn conversion_and_backend_failures_are_500() {
    let body = json!({"file_base64": "PHN2Zy8+", "file_name": "a.svg", "file_format": "svg"})
        .to_string();
    let response = app(vec!["x"], None)
        .oneshot(post_json("/explain", &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let error = read_json(response).await["error"].as_str().unwrap().to_string();
    assert!(error.starts_with("svg conversion failed"), "got {error}");

    let response = app(vec!["x"], Some(0))
        .oneshot(post_json("/explain", &png_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn stream_emits_messages_then_done() {
    let response = app(vec!["A", "B", "C"], None)
        .oneshot(post_json("/explain/stream", &png_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let text = read_text(response).await;
    let events: Vec<&str> = text
        .lines()
        .filter_map(|l| l.strip_prefix("event: "))
        .collect();
    assert_eq!(events, ["message", "message", "message", "done"]);
    assert!(text.contains(r#"data: {"delta":"A"}"#));
    assert!(text.contains(r#"data: {"explanation":"ABC"}"#));
}

#[tokio::test]
async fn stream_backend_error_becomes_error_event() {
    let response = app(vec!["A", "B"], Some(1))
        .oneshot(post_json("/explain/stream", &png_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let text = read_text(response).await;
    let events: Vec<&str> = text
        .lines()
        .filter_map(|l| l.strip_prefix("event: "))
        .collect();
    assert_eq!(events, ["message", "error"]);
    assert!(text.contains("model overloaded"));
}

#[tokio::test]
async fn stream_validation_failure_is_400_before_streaming() {
    let body = json!({"file_base64": "AAAA", "file_name": "", "file_format": "png"}).to_string();
    let response = app(vec![], None)
        .oneshot(post_json("/explain/stream", &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
