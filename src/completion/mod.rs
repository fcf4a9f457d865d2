//! Abstractions for generating grounded answers through chat-completion providers.
//!
//! The answering engine assembles a message list (grounding instructions, prior conversation
//! turns, the new question) and hands it to a [`CompletionClient`]. Both adapters issue HTTP
//! requests directly to the provider and never retry, so a failed call can never produce a
//! second answer for the same question.

mod ollama;
mod openai;

pub use ollama::OllamaCompletionClient;
pub use openai::OpenAiCompletionClient;

use crate::config::{CompletionProvider, Config};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// Errors surfaced while requesting a completion.
#[derive(Debug, Error)]
pub enum CompletionClientError {
    /// Provider was misconfigured or unreachable.
    #[error("Completion provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider returned an error response.
    #[error("Failed to generate completion: {0}")]
    GenerationFailed(String),
    /// Provider response could not be parsed.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
}

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Instructions and grounding context.
    System,
    /// End-user question.
    User,
    /// Model answer.
    Assistant,
}

/// A single message in a chat-completion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Speaker of the message.
    pub role: ChatRole,
    /// Message body.
    pub content: String,
}

impl ChatMessage {
    /// Build a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    /// Build a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    /// Build an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Request payload passed to the completion provider.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Fully qualified model identifier understood by the provider.
    pub model: String,
    /// Ordered conversation, starting with the grounding system message.
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature.
    pub temperature: f32,
}

/// Interface implemented by text-completion providers.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Generate the assistant reply for `request`.
    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionClientError>;
}

/// Build the completion client selected by configuration.
pub fn get_completion_client(
    config: &Config,
) -> Result<Box<dyn CompletionClient>, CompletionClientError> {
    match config.completion_provider {
        CompletionProvider::OpenAI => {
            let api_key = config.openai_api_key.clone().ok_or_else(|| {
                CompletionClientError::ProviderUnavailable(
                    "OPENAI_API_KEY is required for the openai completion provider".into(),
                )
            })?;
            Ok(Box::new(OpenAiCompletionClient::new(
                config.openai_base_url.clone(),
                api_key,
            )?))
        }
        CompletionProvider::Ollama => {
            let base_url = config
                .ollama_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
            Ok(Box::new(OllamaCompletionClient::new(base_url)?))
        }
    }
}
