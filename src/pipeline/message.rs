//! Backend-agnostic chat messages and request assembly.
//!
//! The builder here does no I/O: it arranges the system instruction, the
//! user text and any images produced by a preprocessing strategy into a
//! [`ChatRequest`]. Backends translate this structure into their own wire
//! format.

use crate::request::ExplainRequest;

/// Who a message comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
}

/// A base64-encoded raster image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePart {
    pub mime_type: String,
    /// Standard base64, no `data:` prefix.
    pub data: String,
}

impl ImagePart {
    pub fn new(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    /// Render as a `data:` URL, the form OpenAI-compatible APIs accept.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

/// One unit of a chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    Text(String),
    Image(ImagePart),
}

/// A role plus an ordered sequence of content parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<ContentPart>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            parts: vec![ContentPart::Text(text.into())],
        }
    }

    /// A user message: the text part first, then every image in order.
    pub fn user(text: impl Into<String>, images: Vec<ImagePart>) -> Self {
        let mut parts = Vec::with_capacity(images.len() + 1);
        parts.push(ContentPart::Text(text.into()));
        parts.extend(images.into_iter().map(ContentPart::Image));
        Self {
            role: Role::User,
            parts,
        }
    }

    /// All text parts joined with newlines.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text(t) => Some(t.as_str()),
                ContentPart::Image(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn images(&self) -> impl Iterator<Item = &ImagePart> {
        self.parts.iter().filter_map(|p| match p {
            ContentPart::Image(img) => Some(img),
            ContentPart::Text(_) => None,
        })
    }
}

/// A fully assembled request for the LLM backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// Assemble the two-message conversation for one explain request.
pub fn build_chat_request(
    model: &str,
    system_prompt: &str,
    user_text: String,
    images: Vec<ImagePart>,
    request: &ExplainRequest,
) -> ChatRequest {
    let mut chat = ChatRequest {
        model: model.to_string(),
        messages: vec![Message::system(system_prompt), Message::user(user_text, images)],
        max_tokens: None,
        temperature: None,
    };
    apply_generation(&mut chat, request);
    chat
}

/// Copy optional generation overrides onto the chat request.
///
/// Temperature is only forwarded when `max_tokens` is also set; a
/// temperature on its own leaves the backend default in place.
fn apply_generation(chat: &mut ChatRequest, request: &ExplainRequest) {
    let Some(generation) = request.generation.as_ref() else {
        return;
    };
    if let Some(max_tokens) = generation.max_tokens {
        chat.max_tokens = Some(max_tokens);
        chat.temperature = generation.temperature.map(|t| t as f32);
    }
}
