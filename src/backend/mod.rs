//! LLM chat-completion backends.
//!
//! The pipeline only ever talks to a [`ChatBackend`]. Two implementations
//! ship with the crate:
//!
//! * [`OpenAiBackend`] speaks the OpenAI `/chat/completions` wire format over
//!   `reqwest` and streams real token deltas from the SSE response.
//! * [`ProviderBackend`] adapts any `edgequake_llm` provider (OpenAI,
//!   Anthropic, Gemini, Ollama, ...). Those providers return whole replies,
//!   so its stream carries a single delta.
//!
//! Neither implementation retries; a failed call ends the request.

mod openai;
mod provider;

pub use openai::OpenAiBackend;
pub use provider::ProviderBackend;

use crate::error::ExplainError;
use crate::pipeline::message::ChatRequest;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

/// Ordered text deltas from a streaming completion. The stream ends after
/// the last delta, or after the first `Err`.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, ExplainError>> + Send>>;

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Return the full reply in one piece.
    async fn complete(&self, request: &ChatRequest) -> Result<String, ExplainError>;

    /// Open a streaming completion.
    ///
    /// Errors that occur before the first byte arrives are returned directly;
    /// later failures are yielded as an `Err` item.
    async fn stream(&self, request: &ChatRequest) -> Result<TokenStream, ExplainError>;
}
