//! Text-generation providers behind a single trait.

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub mod anthropic;
pub mod bedrock;
mod messages;

pub use anthropic::AnthropicProvider;
pub use bedrock::BedrockChatProvider;

/// Speaker of a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person asking.
    User,
    /// The model.
    Assistant,
}

/// One message in the conversation sent to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Speaker.
    pub role: Role,
    /// Plain text content.
    pub content: String,
}

impl ChatMessage {
    /// User message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Fixed sampling configuration; the defaults make generation deterministic.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingParams {
    /// Output token cap.
    pub max_tokens: usize,
    /// Sampling temperature.
    pub temperature: f32,
    /// Top-k cutoff.
    pub top_k: u32,
    /// Nucleus cutoff.
    pub top_p: f32,
    /// Sequences that end generation.
    pub stop_sequences: Vec<String>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            max_tokens: 2048,
            temperature: 0.0,
            top_k: 250,
            top_p: 1.0,
            stop_sequences: vec!["\n\nHuman".to_string()],
        }
    }
}

/// Request envelope shared by the various providers.
pub struct ProviderRequest<'a> {
    /// System instruction, context included.
    pub system: &'a str,
    /// Prior turns followed by the current question.
    pub messages: &'a [ChatMessage],
    /// Sampling settings.
    pub sampling: &'a SamplingParams,
}

/// Trait implemented by concrete LLM providers.
pub trait LlmProvider: Send + Sync {
    /// Returns the generated answer text.
    fn answer(&self, request: &ProviderRequest) -> Result<String>;
}
