//! Preprocessing stages: uploaded file → chat request.
//!
//! Each submodule implements one transformation step so it can be tested
//! alone and its external collaborator (converter process, pdfium) swapped
//! without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//!            ┌─ Image ────▶ embed payload ─────────────┐
//! format ──▶ ├─ Diagram ──▶ diagram (converter) ───────┤
//!  tag       ├─ Text ─────▶ decode, append to prompt ──┼──▶ message ──▶ ChatRequest
//!            └─ Document ─▶ render (pdfium) ▶ encode ──┘
//! ```
//!
//! 1. [`crate::format`]: the tag selects exactly one [`Strategy`]
//! 2. [`diagram`]: BPMN / draw.io / SVG through external converter processes
//! 3. [`render`] : rasterise every PDF page on the blocking pool
//! 4. [`encode`] : base64 decode of the payload, JPEG + base64 of pages
//! 5. [`message`]: assemble system + user messages and generation overrides

pub mod diagram;
pub mod encode;
pub mod message;
pub mod render;

use crate::config::ExplainConfig;
use crate::error::ExplainError;
use crate::format::{FormatTag, Strategy};
use crate::prompts;
use crate::request::ExplainRequest;
use diagram::DiagramConverter;
use message::{ChatRequest, ImagePart};
use render::PageRasterizer;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// The external collaborators preprocessing strategies delegate to.
#[derive(Clone)]
pub struct Preprocessor {
    converter: Arc<dyn DiagramConverter>,
    rasterizer: Arc<dyn PageRasterizer>,
}

impl Preprocessor {
    pub fn new(converter: Arc<dyn DiagramConverter>, rasterizer: Arc<dyn PageRasterizer>) -> Self {
        Self {
            converter,
            rasterizer,
        }
    }

    /// Dispatch on the request's format tag and assemble the chat request.
    ///
    /// An unknown tag fails with [`ExplainError::UnsupportedFormat`] before
    /// any strategy runs.
    pub async fn build_chat_request(
        &self,
        request: &ExplainRequest,
        config: &ExplainConfig,
    ) -> Result<ChatRequest, ExplainError> {
        let start = Instant::now();
        info!("Preprocessing file: {}", request.file_name);

        let result = self.dispatch(request, config).await;
        match &result {
            Ok(chat) => debug!(
                "Preprocessed {} ({}) in {:?}, {} messages",
                request.file_name,
                request.file_format,
                start.elapsed(),
                chat.messages.len()
            ),
            Err(e) => warn!(
                "Preprocessing {} ({}) failed after {:?}: {}",
                request.file_name,
                request.file_format,
                start.elapsed(),
                e
            ),
        }
        result
    }

    async fn dispatch(
        &self,
        request: &ExplainRequest,
        config: &ExplainConfig,
    ) -> Result<ChatRequest, ExplainError> {
        let tag: FormatTag = request.file_format.parse()?;
        let (user_text, images) = match tag.strategy() {
            Strategy::Image(kind) => {
                // Validate the payload but forward the caller's encoding.
                encode::decode_payload(&request.file_base64)?;
                (
                    prompts::user_prompt(&request.file_name, &request.prompt),
                    vec![ImagePart::new(kind.mime(), request.file_base64.trim())],
                )
            }
            Strategy::Diagram(kind) => (
                prompts::user_prompt(&request.file_name, &request.prompt),
                vec![diagram::convert_diagram(&*self.converter, kind, &request.file_base64).await?],
            ),
            Strategy::Text => {
                let bytes = encode::decode_payload(&request.file_base64)?;
                let text = prompts::user_prompt_with_source(
                    &request.file_name,
                    &request.prompt,
                    &String::from_utf8_lossy(&bytes),
                );
                (text, Vec::new())
            }
            Strategy::Document => {
                let bytes = encode::decode_payload(&request.file_base64)?;
                let pages = render::render_document(
                    Arc::clone(&self.rasterizer),
                    bytes,
                    config.page_dpi,
                    config.jpeg_quality,
                )
                .await?;
                (prompts::user_prompt(&request.file_name, &request.prompt), pages)
            }
        };

        let system_prompt = config
            .system_prompt
            .as_deref()
            .unwrap_or(prompts::DEFAULT_SYSTEM_PROMPT);

        Ok(message::build_chat_request(
            &config.model,
            system_prompt,
            user_text,
            images,
            request,
        ))
    }
}
