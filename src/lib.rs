//! # edgequake-explain
//!
//! Explain diagrams with Vision Language Models (VLMs).
//!
//! A client uploads a diagram (raster image, BPMN, draw.io, SVG, plain text
//! or PDF) together with a free-text question. The crate normalises the file
//! into something a vision model can read, asks the model, and returns the
//! answer either in one piece or as a stream of tokens. Answers can be cached
//! so repeated questions skip the model entirely.
//!
//! ## Pipeline Overview
//!
//! ```text
//! ExplainRequest
//!  │
//!  ├─ 1. Validate  required fields present
//!  ├─ 2. Cache     hit → answer immediately (memory or Redis)
//!  ├─ 3. Dispatch  format tag → image / converter process / text / pdfium
//!  ├─ 4. Assemble  system + user message, generation overrides
//!  ├─ 5. Backend   OpenAI-compatible HTTP or any edgequake-llm provider
//!  └─ 6. Deliver   whole answer, or ordered deltas over a bounded queue
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_explain::{ExplainRequest, Explainer, OpenAiBackend};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = Arc::new(OpenAiBackend::new("http://localhost:8000/v1", None)?);
//!     let explainer = Explainer::builder(backend).build();
//!
//!     let request = ExplainRequest {
//!         prompt: "Which service owns the user table?".into(),
//!         file_base64: std::fs::read_to_string("architecture.png.b64")?,
//!         file_name: "architecture.png".into(),
//!         file_format: "png".into(),
//!         generation: None,
//!     };
//!     let response = explainer.explain(&request).await?;
//!     println!("{}", response.explanation);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `server` | on      | axum HTTP transport and the `explain-server` binary |
//! | `redis`  | on      | [`cache::RedisCache`] |
//!
//! Library-only use without the HTTP stack:
//! ```toml
//! edgequake-explain = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod explain;
pub mod format;
pub mod pipeline;
pub mod prompts;
pub mod request;
#[cfg(feature = "server")]
pub mod server;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backend::{ChatBackend, OpenAiBackend, ProviderBackend, TokenStream};
pub use cache::{cache_key, Cache, CacheCoordinator, MemoryCache};
pub use config::{ConverterCommands, ExplainConfig, ExplainConfigBuilder};
pub use error::{CacheError, ExplainError};
pub use explain::{Explainer, ExplainerBuilder};
pub use format::{DiagramKind, FormatTag, ImageKind, Strategy};
pub use request::{ExplainRequest, ExplainResponse, GenerationParams, StreamChunk};
pub use stream::{ChunkStream, DeliveryMode, StreamState};
