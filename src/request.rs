//! Request and response types at the pipeline boundary.

use crate::error::ExplainError;
use serde::{Deserialize, Serialize};

/// An explain request as received from a client.
///
/// The file travels base64-encoded in `file_base64`. Field names match the
/// JSON wire format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExplainRequest {
    /// Free-text details or questions about the diagram.
    #[serde(default)]
    pub prompt: String,
    pub file_base64: String,
    pub file_name: String,
    pub file_format: String,
    /// Optional generation overrides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<GenerationParams>,
}

/// OpenAI-style sampling overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ExplainRequest {
    /// Check that the required fields are present.
    ///
    /// Fields are checked in order and the first empty one is reported.
    pub fn validate(&self) -> Result<(), ExplainError> {
        let required = [
            ("file_base64", &self.file_base64),
            ("file_name", &self.file_name),
            ("file_format", &self.file_format),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ExplainError::Validation(format!("{name} is empty")));
            }
        }
        Ok(())
    }

    pub fn temperature(&self) -> Option<f64> {
        self.generation.as_ref().and_then(|g| g.temperature)
    }

    pub fn max_tokens(&self) -> Option<u32> {
        self.generation.as_ref().and_then(|g| g.max_tokens)
    }
}

/// The non-streaming result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplainResponse {
    pub explanation: String,
}

/// One item of a streamed explanation.
///
/// `Done` and `Err` are terminal: nothing follows them.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    /// An incremental fragment of the answer.
    Delta(String),
    /// The full answer, for consumers that asked for it.
    Explanation(String),
    /// Clean end of stream; `true` when the answer came from the cache.
    Done(bool),
    /// The request failed; no further chunks follow.
    Err(ExplainError),
}

impl StreamChunk {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamChunk::Done(_) | StreamChunk::Err(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> ExplainRequest {
        ExplainRequest {
            prompt: String::new(),
            file_base64: "aGVsbG8=".into(),
            file_name: "a.png".into(),
            file_format: "png".into(),
            generation: None,
        }
    }

    #[test]
    fn valid_request_passes() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn first_missing_field_is_reported() {
        let req = ExplainRequest {
            file_base64: String::new(),
            file_name: String::new(),
            ..valid()
        };
        assert_eq!(
            req.validate(),
            Err(ExplainError::Validation("file_base64 is empty".into()))
        );

        let req = ExplainRequest {
            file_format: "   ".into(),
            ..valid()
        };
        assert_eq!(
            req.validate(),
            Err(ExplainError::Validation("file_format is empty".into()))
        );
    }

    #[test]
    fn deserialises_wire_format() {
        let req: ExplainRequest = serde_json::from_str(
            r#"{"file_base64":"eA==","file_name":"d.bpmn","file_format":"bpmn",
                "generation":{"temperature":0.7,"max_tokens":512}}"#,
        )
        .unwrap();
        assert_eq!(req.prompt, "");
        assert_eq!(req.temperature(), Some(0.7));
        assert_eq!(req.max_tokens(), Some(512));
    }

    #[test]
    fn terminal_chunks() {
        assert!(StreamChunk::Done(false).is_terminal());
        assert!(StreamChunk::Err(ExplainError::Cancelled).is_terminal());
        assert!(!StreamChunk::Delta("x".into()).is_terminal());
        assert!(!StreamChunk::Explanation("x".into()).is_terminal());
    }
}
