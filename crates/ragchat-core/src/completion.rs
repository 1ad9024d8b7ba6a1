//! Completion collaborator trait.
//!
//! A completion provider takes one prompt and a model identifier and returns
//! one text reply. Concrete providers (OpenAI-compatible HTTP) live in the
//! `ragchat` app crate; they own their timeouts and retry policy.

use async_trait::async_trait;

use crate::error::CompletionError;

/// A single-turn completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
}

/// Anything that can answer a composed prompt.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Provider name for logs (e.g. `"openai"`).
    fn name(&self) -> &str;

    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionError>;
}
