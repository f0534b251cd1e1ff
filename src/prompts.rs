//! Prompts sent to the vision model.
//!
//! Every prompt lives here so that wording changes touch exactly one place
//! and tests can inspect the exact text without a model in the loop.
//! Callers can override the system prompt via
//! [`crate::config::ExplainConfig::system_prompt`].

/// Default system prompt for explaining an uploaded diagram.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an assistant. Explain the uploaded diagram briefly and clearly.
User can give extra information or ask certain questions about the diagram.";

/// The user text part: file name, then the caller's prompt when present.
pub fn user_prompt(file_name: &str, prompt: &str) -> String {
    let mut text = format!("Filename: {file_name}");
    if !prompt.is_empty() {
        text.push_str("\nDetails and questions: ");
        text.push_str(prompt);
    }
    text
}

/// The user text part for plain-text diagrams, with the source appended.
pub fn user_prompt_with_source(file_name: &str, prompt: &str, source: &str) -> String {
    format!("{}\nDiagram text:\n{}", user_prompt(file_name, prompt), source)
}
