//! Adapter from `edgequake_llm` providers to [`ChatBackend`].
//!
//! Provider selection follows the usual edgequake conventions: an explicit
//! provider name plus model, else `EDGEQUAKE_LLM_PROVIDER` +
//! `EDGEQUAKE_MODEL`, else full auto-detection from the environment.

use super::{ChatBackend, TokenStream};
use crate::error::ExplainError;
use crate::pipeline::message::{ChatRequest, ContentPart, Role};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// [`ChatBackend`] over an `edgequake_llm` provider.
#[derive(Clone)]
pub struct ProviderBackend {
    provider: Arc<dyn LLMProvider>,
}

impl std::fmt::Debug for ProviderBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderBackend")
            .field("provider", &"<dyn LLMProvider>")
            .finish()
    }
}

impl ProviderBackend {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }

    /// Instantiate a named provider (`openai`, `anthropic`, `ollama`, ...).
    pub fn named(provider_name: &str, model: &str) -> Result<Self, ExplainError> {
        let provider = ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
            ExplainError::InvalidConfig(format!("provider '{provider_name}': {e}"))
        })?;
        Ok(Self::new(provider))
    }

    /// Pick a provider from the environment.
    pub fn from_env() -> Result<Self, ExplainError> {
        if let (Ok(name), Ok(model)) = (
            std::env::var("EDGEQUAKE_LLM_PROVIDER"),
            std::env::var("EDGEQUAKE_MODEL"),
        ) {
            if !name.is_empty() && !model.is_empty() {
                return Self::named(&name, &model);
            }
        }

        let (provider, _) = ProviderFactory::from_env().map_err(|e| {
            ExplainError::InvalidConfig(format!("no LLM provider auto-detected: {e}"))
        })?;
        Ok(Self::new(provider))
    }
}

/// Translate a [`ChatRequest`] into provider messages and options.
fn to_provider_call(request: &ChatRequest) -> (Vec<ChatMessage>, CompletionOptions) {
    let messages = request
        .messages
        .iter()
        .map(|message| match message.role {
            Role::System => ChatMessage::system(message.text()),
            Role::User => {
                let images: Vec<ImageData> = message
                    .parts
                    .iter()
                    .filter_map(|p| match p {
                        ContentPart::Image(img) => {
                            Some(ImageData::new(img.data.clone(), img.mime_type.clone()))
                        }
                        ContentPart::Text(_) => None,
                    })
                    .collect();
                ChatMessage::user_with_images(message.text(), images)
            }
        })
        .collect();

    let options = CompletionOptions {
        temperature: request.temperature,
        max_tokens: request.max_tokens.map(|n| n as usize),
        ..Default::default()
    };
    (messages, options)
}

#[async_trait]
impl ChatBackend for ProviderBackend {
    async fn complete(&self, request: &ChatRequest) -> Result<String, ExplainError> {
        let start = Instant::now();
        let (messages, options) = to_provider_call(request);

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| ExplainError::Backend(e.to_string()))?;

        info!(
            "Provider reply: {} input tokens, {} output tokens, {:?}",
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );
        Ok(response.content)
    }

    async fn stream(&self, request: &ChatRequest) -> Result<TokenStream, ExplainError> {
        let content = self.complete(request).await?;
        debug!("Provider stream: single delta of {} chars", content.len());
        let items = if content.is_empty() {
            Vec::new()
        } else {
            vec![Ok(content)]
        };
        Ok(Box::pin(futures::stream::iter(items)))
    }
}
