//! OpenAI-compatible `/chat/completions` client.
//!
//! Works against api.openai.com and the many self-hosted servers that mimic
//! it (vLLM, llama.cpp server, LiteLLM, ...). Streaming reads the SSE body
//! line by line: every `data: {json}` line carries a choice delta, and the
//! literal `data: [DONE]` ends the stream.

use super::{ChatBackend, TokenStream};
use crate::error::ExplainError;
use crate::pipeline::message::{ChatRequest, ContentPart, Message, Role};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Upper bound on a single buffered SSE line.
const MAX_LINE_BYTES: usize = 1 << 20;

/// [`ChatBackend`] over an OpenAI-compatible HTTP API.
#[derive(Debug, Clone)]
pub struct OpenAiBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiBackend {
    /// `base_url` is the API root, e.g. `http://localhost:8000/v1`.
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self, ExplainError> {
        Self::with_timeout(base_url, api_key, None)
    }

    /// As [`OpenAiBackend::new`], with a whole-request timeout on the HTTP client.
    pub fn with_timeout(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, ExplainError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ExplainError::InvalidConfig(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn send(&self, body: &WireRequest<'_>) -> Result<reqwest::Response, ExplainError> {
        let mut req = self.client.post(self.endpoint()).json(body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req
            .send()
            .await
            .map_err(|e| ExplainError::Backend(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ExplainError::Backend(format!("HTTP {status}: {}", text.trim())));
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    async fn complete(&self, request: &ChatRequest) -> Result<String, ExplainError> {
        let start = Instant::now();
        let body = WireRequest::from_chat(request, false);
        let response = self.send(&body).await?;

        let parsed: WireResponse = response
            .json()
            .await
            .map_err(|e| ExplainError::Backend(format!("malformed response: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ExplainError::Backend("response has no choices".into()))?;

        info!(
            "Completion from {}: {} chars in {:?}",
            request.model,
            content.len(),
            start.elapsed()
        );
        Ok(content)
    }

    async fn stream(&self, request: &ChatRequest) -> Result<TokenStream, ExplainError> {
        let body = WireRequest::from_chat(request, true);
        let response = self.send(&body).await?;
        debug!("Streaming completion opened for {}", request.model);

        let mut bytes = response.bytes_stream();
        let stream = async_stream::stream! {
            let mut buffer: Vec<u8> = Vec::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(ExplainError::Backend(format!("stream read error: {e}")));
                        return;
                    }
                };
                buffer.extend_from_slice(&chunk);

                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let raw: Vec<u8> = buffer.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&raw);
                    match parse_sse_line(&line) {
                        SseLine::Delta(text) => yield Ok(text),
                        SseLine::Done => return,
                        SseLine::Error(e) => {
                            yield Err(e);
                            return;
                        }
                        SseLine::Skip => {}
                    }
                }

                if buffer.len() > MAX_LINE_BYTES {
                    yield Err(ExplainError::Backend("SSE line exceeds 1 MiB".into()));
                    return;
                }
            }

            // A final line without a trailing newline.
            if !buffer.is_empty() {
                let line = String::from_utf8_lossy(&buffer).into_owned();
                match parse_sse_line(&line) {
                    SseLine::Delta(text) => yield Ok(text),
                    SseLine::Error(e) => yield Err(e),
                    SseLine::Done | SseLine::Skip => {}
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

// ── Wire format ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

impl<'a> WireRequest<'a> {
    fn from_chat(request: &'a ChatRequest, stream: bool) -> Self {
        Self {
            model: &request.model,
            messages: request.messages.iter().map(WireMessage::from_message).collect(),
            max_completion_tokens: request.max_tokens,
            temperature: request.temperature,
            stream,
        }
    }
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: WireContent<'a>,
}

/// System messages go out as a plain string, user messages as a part array.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum WireContent<'a> {
    Text(String),
    Parts(Vec<WirePart<'a>>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WirePart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: WireImageUrl },
}

#[derive(Debug, Serialize)]
struct WireImageUrl {
    url: String,
}

impl<'a> WireMessage<'a> {
    fn from_message(message: &'a Message) -> Self {
        match message.role {
            Role::System => Self {
                role: "system",
                content: WireContent::Text(message.text()),
            },
            Role::User => Self {
                role: "user",
                content: WireContent::Parts(
                    message
                        .parts
                        .iter()
                        .map(|part| match part {
                            ContentPart::Text(text) => WirePart::Text { text },
                            ContentPart::Image(image) => WirePart::ImageUrl {
                                image_url: WireImageUrl {
                                    url: image.data_url(),
                                },
                            },
                        })
                        .collect(),
                ),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
}

#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// A streamed chunk. Servers report mid-stream failures as `{"error": {...}}`
/// on a `data:` line, so `error` is checked before `choices`.
#[derive(Debug, Deserialize)]
struct WireChunk {
    #[serde(default)]
    choices: Vec<WireChunkChoice>,
    #[serde(default)]
    error: Option<WireError>,
}

#[derive(Debug, Deserialize)]
struct WireChunkChoice {
    #[serde(default)]
    delta: WireDelta,
}

#[derive(Debug, Default, Deserialize)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireError {
    message: String,
}

// ── SSE ──────────────────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
enum SseLine {
    Delta(String),
    Done,
    Error(ExplainError),
    /// Blank lines, comments, other fields, and chunks without content.
    Skip,
}

fn parse_sse_line(line: &str) -> SseLine {
    let line = line.trim_end_matches(['\r', '\n']);
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        return SseLine::Done;
    }

    match serde_json::from_str::<WireChunk>(data) {
        Ok(WireChunk {
            error: Some(error), ..
        }) => SseLine::Error(ExplainError::Backend(error.message)),
        Ok(chunk) => {
            let text: String = chunk
                .choices
                .into_iter()
                .filter_map(|c| c.delta.content)
                .collect();
            if text.is_empty() {
                SseLine::Skip
            } else {
                SseLine::Delta(text)
            }
        }
        Err(e) => SseLine::Error(ExplainError::Backend(format!("malformed stream chunk: {e}"))),
    }
}
