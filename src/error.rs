//! Error types for the edgequake-explain library.
//!
//! Two distinct error types reflect two distinct failure policies:
//!
//! * [`ExplainError`]: anything that stops a request: bad input, a failed
//!   converter process, an unrenderable page, a backend failure. Returned as
//!   `Err(ExplainError)` from [`crate::Explainer`] and carried by the terminal
//!   [`crate::StreamChunk::Err`] on the streaming path.
//!
//! * [`CacheError`]: a cache collaborator failed. The pipeline logs it and
//!   carries on as a miss (on lookup) or a no-op (on store). It is a separate
//!   type so that it cannot be returned from the pipeline by accident.

use crate::format::FormatTag;
use thiserror::Error;

/// All errors that can end an explain request.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExplainError {
    // ── Client errors ─────────────────────────────────────────────────────
    /// A required request field is missing or empty.
    #[error("request validation failed: {0}")]
    Validation(String),

    /// The declared file format is outside the supported set.
    #[error("unsupported file format '{format}'")]
    UnsupportedFormat { format: String },

    /// The file payload is not valid base64.
    #[error("file payload is not valid base64: {detail}")]
    InvalidPayload { detail: String },

    // ── Preprocessing errors ──────────────────────────────────────────────
    /// An external converter process failed or produced no usable output.
    #[error("{format} conversion failed: {cause}")]
    ConversionFailed { format: FormatTag, cause: String },

    /// The page rasterizer could not open the document.
    #[error("failed to open document: {detail}")]
    DocumentOpenFailed { detail: String },

    /// A single page could not be rendered or encoded. `page` is 0-based.
    #[error("render page {page} failed: {detail}")]
    PageRenderFailed { page: usize, detail: String },

    /// No page rasterizer is available in this process.
    #[error("page rasterizer unavailable: {0}")]
    RasterizerUnavailable(String),

    // ── Backend errors ────────────────────────────────────────────────────
    /// The LLM backend call failed, or the stream reported an error.
    #[error("LLM backend error: {0}")]
    Backend(String),

    /// The caller cancelled the request (deadline, disconnect, abort).
    #[error("request cancelled")]
    Cancelled,

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ExplainError {
    /// `true` when the request itself is at fault and a retry with the same
    /// input cannot succeed. Transports map this to a 4xx status.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ExplainError::Validation(_)
                | ExplainError::UnsupportedFormat { .. }
                | ExplainError::InvalidPayload { .. }
        )
    }
}

/// A failure reported by a [`crate::cache::Cache`] implementation.
///
/// Never propagated out of the pipeline; see [`crate::cache::CacheCoordinator`].
#[derive(Debug, Error)]
pub enum CacheError {
    /// The cache backend could not be reached or rejected the command.
    #[error("cache backend error: {0}")]
    Backend(String),

    #[cfg(feature = "redis")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}
