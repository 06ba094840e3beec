//! Language-model completion backends
//!
//! [`CompletionBackend`] is the seam between the orchestrator and whatever
//! produces replies. [`OpenAiClient`] talks to any OpenAI-compatible
//! `/chat/completions` endpoint.

use crate::chat::Message;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod openai;

pub use openai::OpenAiClient;

/// One `{role, content}` pair sent to or received from a backend
///
/// The role stays a plain string on the wire; backends are free to answer
/// with roles this crate does not store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    /// Create a wire message
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

impl From<&Message> for ChatMessage {
    fn from(message: &Message) -> Self {
        Self::new(message.role.as_str(), message.content.clone())
    }
}

/// Token accounting reported by a backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Number of tokens in the prompt
    pub prompt_tokens: u32,
    /// Number of tokens in the reply
    pub completion_tokens: u32,
    /// Total tokens used
    pub total_tokens: u32,
}

impl TokenUsage {
    /// Usage whose total is the sum of both parts
    ///
    /// # Examples
    ///
    /// ```
    /// use parley::completion::TokenUsage;
    ///
    /// let usage = TokenUsage::new(100, 50);
    /// assert_eq!(usage.total_tokens, 150);
    /// ```
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

/// Reply produced by a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub reply: ChatMessage,
    pub usage: TokenUsage,
}

/// A remote function turning a conversation into a reply
///
/// Implementations must not retry; a failed call is reported once as
/// `ParleyError::Completion`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Produce the next reply for `messages`
    ///
    /// # Arguments
    ///
    /// * `model` - Backend model name, passed through unchanged
    /// * `messages` - Conversation so far, oldest first
    /// * `temperature` - Sampling temperature, already clamped by the caller
    ///
    /// # Errors
    ///
    /// Returns `ParleyError::Completion` if the backend fails or answers
    /// with something unusable
    async fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
        temperature: f64,
    ) -> Result<Completion>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::Role;

    #[test]
    fn test_chat_message_from_stored_message() {
        let stored = Message::new(Role::Assistant, "fine");
        let wire = ChatMessage::from(&stored);
        assert_eq!(wire, ChatMessage::new("assistant", "fine"));
    }

    #[test]
    fn test_token_usage_total_saturates() {
        let usage = TokenUsage::new(u32::MAX, 1);
        assert_eq!(usage.total_tokens, u32::MAX);
    }

    #[test]
    fn test_token_usage_deserializes_openai_shape() {
        let usage: TokenUsage = serde_json::from_str(
            r#"{"prompt_tokens":9,"completion_tokens":12,"total_tokens":21}"#,
        )
        .unwrap();
        assert_eq!(usage, TokenUsage::new(9, 12));
    }
}
