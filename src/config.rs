//! Configuration for the explain pipeline.
//!
//! All pipeline behaviour is controlled through [`ExplainConfig`], built via
//! its [`ExplainConfigBuilder`]. Transport concerns (ports, timeouts, cache
//! wiring) belong to the server binary and are not represented here.

use crate::error::ExplainError;
use crate::format::DiagramKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for an [`crate::Explainer`].
///
/// # Example
/// ```rust
/// use edgequake_explain::ExplainConfig;
///
/// let config = ExplainConfig::builder()
///     .model("qwen2.5-vl-7b")
///     .page_dpi(150)
///     .build()
///     .unwrap();
/// assert_eq!(config.jpeg_quality, 85);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplainConfig {
    /// Model identifier sent with every chat request. Default: `"default"`.
    pub model: String,

    /// Custom system prompt. If None, uses [`crate::prompts::DEFAULT_SYSTEM_PROMPT`].
    pub system_prompt: Option<String>,

    /// Resolution used when rasterising document pages. Range: 36–600. Default: 120.
    pub page_dpi: u32,

    /// JPEG quality for rasterised document pages. Range: 1–100. Default: 85.
    pub jpeg_quality: u8,

    /// External converter binaries for vector diagrams.
    pub converters: ConverterCommands,

    /// How long the streaming task waits for room in a full queue before it
    /// drops a terminal chunk. Default: 5000 ms.
    pub terminal_grace_ms: u64,
}

/// Binaries invoked by [`crate::pipeline::diagram::CommandConverter`].
///
/// Only the binary is configurable; each tool's argument list is fixed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConverterCommands {
    /// BPMN renderer. Default: `bpmn-to-image`.
    pub bpmn: String,
    /// draw.io desktop in headless export mode. Default: `drawio`.
    pub drawio: String,
    /// SVG rasteriser. Default: `inkscape`.
    pub svg: String,
}

impl Default for ConverterCommands {
    fn default() -> Self {
        Self {
            bpmn: "bpmn-to-image".to_string(),
            drawio: "drawio".to_string(),
            svg: "inkscape".to_string(),
        }
    }
}

impl ConverterCommands {
    pub fn program(&self, kind: DiagramKind) -> &str {
        match kind {
            DiagramKind::Bpmn => &self.bpmn,
            DiagramKind::Drawio => &self.drawio,
            DiagramKind::Svg => &self.svg,
        }
    }
}

impl Default for ExplainConfig {
    fn default() -> Self {
        Self {
            model: "default".to_string(),
            system_prompt: None,
            page_dpi: 120,
            jpeg_quality: 85,
            converters: ConverterCommands::default(),
            terminal_grace_ms: 5000,
        }
    }
}

impl ExplainConfig {
    /// Create a new builder for `ExplainConfig`.
    pub fn builder() -> ExplainConfigBuilder {
        ExplainConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn terminal_grace(&self) -> Duration {
        Duration::from_millis(self.terminal_grace_ms)
    }
}

/// Builder for [`ExplainConfig`].
#[derive(Debug)]
pub struct ExplainConfigBuilder {
    config: ExplainConfig,
}

impl ExplainConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn page_dpi(mut self, dpi: u32) -> Self {
        self.config.page_dpi = dpi;
        self
    }

    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.jpeg_quality = quality;
        self
    }

    pub fn converters(mut self, commands: ConverterCommands) -> Self {
        self.config.converters = commands;
        self
    }

    pub fn terminal_grace_ms(mut self, ms: u64) -> Self {
        self.config.terminal_grace_ms = ms;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExplainConfig, ExplainError> {
        let c = &self.config;
        if c.model.trim().is_empty() {
            return Err(ExplainError::InvalidConfig("model must not be empty".into()));
        }
        if !(36..=600).contains(&c.page_dpi) {
            return Err(ExplainError::InvalidConfig(format!(
                "page DPI must be 36–600, got {}",
                c.page_dpi
            )));
        }
        if !(1..=100).contains(&c.jpeg_quality) {
            return Err(ExplainError::InvalidConfig(format!(
                "JPEG quality must be 1–100, got {}",
                c.jpeg_quality
            )));
        }
        Ok(self.config)
    }
}
