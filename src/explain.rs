//! The explain service and its non-streaming entry point.
//!
//! [`Explainer`] owns every collaborator a request touches: the config, the
//! preprocessing strategies, the chat backend and the cache. It is cheap to
//! clone (everything inside is shared) so the HTTP layer and the streaming
//! task each hold their own handle.
//!
//! Use [`Explainer::explain`] when the caller wants the whole answer at once,
//! and [`Explainer::explain_stream`] to relay tokens as they arrive.

use crate::backend::ChatBackend;
use crate::cache::{Cache, CacheCoordinator};
use crate::config::ExplainConfig;
use crate::error::ExplainError;
use crate::pipeline::diagram::{CommandConverter, DiagramConverter};
use crate::pipeline::message::ChatRequest;
use crate::pipeline::render::{PageRasterizer, UnavailableRasterizer};
use crate::pipeline::Preprocessor;
use crate::request::{ExplainRequest, ExplainResponse};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Diagram explanation service.
#[derive(Clone)]
pub struct Explainer {
    pub(crate) config: Arc<ExplainConfig>,
    pub(crate) preprocessor: Preprocessor,
    pub(crate) backend: Arc<dyn ChatBackend>,
    pub(crate) cache: CacheCoordinator,
}

impl std::fmt::Debug for Explainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Explainer")
            .field("config", &self.config)
            .field("cache", &self.cache.is_enabled())
            .finish_non_exhaustive()
    }
}

impl Explainer {
    /// Start building an explainer around `backend`.
    pub fn builder(backend: Arc<dyn ChatBackend>) -> ExplainerBuilder {
        ExplainerBuilder {
            backend,
            config: ExplainConfig::default(),
            converter: None,
            rasterizer: None,
            cache: None,
        }
    }

    pub fn config(&self) -> &ExplainConfig {
        &self.config
    }

    /// Explain one file and return the full answer.
    ///
    /// # Errors
    /// Client faults ([`ExplainError::is_client_error`]) for bad requests;
    /// preprocessing or backend errors otherwise. Cache failures never
    /// surface here.
    pub async fn explain(&self, request: &ExplainRequest) -> Result<ExplainResponse, ExplainError> {
        let start = Instant::now();
        request.validate()?;

        if let Some(explanation) = self.cache.lookup(request).await {
            info!("Served {} from cache", request.file_name);
            return Ok(ExplainResponse { explanation });
        }

        let chat = self.prepare(request).await?;
        let explanation = self.backend.complete(&chat).await?;
        self.cache.store(request, &explanation).await;

        info!(
            "Explained {} ({} chars) in {:?}",
            request.file_name,
            explanation.len(),
            start.elapsed()
        );
        Ok(ExplainResponse { explanation })
    }

    /// Run preprocessing only and return the chat request that would be sent.
    ///
    /// Skips validation and the cache.
    pub async fn prepare(&self, request: &ExplainRequest) -> Result<ChatRequest, ExplainError> {
        let chat = self
            .preprocessor
            .build_chat_request(request, &self.config)
            .await?;
        debug!(
            "Chat request for {}: {} images",
            request.file_name,
            chat.messages.iter().map(|m| m.images().count()).sum::<usize>()
        );
        Ok(chat)
    }
}

/// Builder for [`Explainer`].
///
/// Defaults: [`ExplainConfig::default`], a [`CommandConverter`] using the
/// config's converter binaries, no page rasterizer (PDF requests fail with
/// [`ExplainError::RasterizerUnavailable`]) and no cache.
pub struct ExplainerBuilder {
    backend: Arc<dyn ChatBackend>,
    config: ExplainConfig,
    converter: Option<Arc<dyn DiagramConverter>>,
    rasterizer: Option<Arc<dyn PageRasterizer>>,
    cache: Option<Arc<dyn Cache>>,
}

impl ExplainerBuilder {
    pub fn config(mut self, config: ExplainConfig) -> Self {
        self.config = config;
        self
    }

    pub fn converter(mut self, converter: Arc<dyn DiagramConverter>) -> Self {
        self.converter = Some(converter);
        self
    }

    pub fn rasterizer(mut self, rasterizer: Arc<dyn PageRasterizer>) -> Self {
        self.rasterizer = Some(rasterizer);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn build(self) -> Explainer {
        let converter = self
            .converter
            .unwrap_or_else(|| Arc::new(CommandConverter::new(self.config.converters.clone())));
        let rasterizer = self
            .rasterizer
            .unwrap_or_else(|| Arc::new(UnavailableRasterizer::new("no page rasterizer configured")));

        Explainer {
            config: Arc::new(self.config),
            preprocessor: Preprocessor::new(converter, rasterizer),
            backend: self.backend,
            cache: CacheCoordinator::new(self.cache),
        }
    }
}
