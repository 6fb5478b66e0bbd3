//! Anthropic chat models invoked through Bedrock.

use anyhow::{Context, Result};

use super::messages::{MessagesBody, MessagesReply, BEDROCK_ANTHROPIC_VERSION};
use super::{LlmProvider, ProviderRequest};
use crate::bedrock::BedrockRuntime;

/// Default generation model.
pub const DEFAULT_CHAT_MODEL: &str = "anthropic.claude-3-haiku-20240307-v1:0";

/// Bedrock-hosted chat model speaking the Anthropic messages format.
#[derive(Clone)]
pub struct BedrockChatProvider {
    runtime: BedrockRuntime,
    model: String,
}

impl BedrockChatProvider {
    /// Wraps `runtime` for `model`.
    pub fn new(runtime: BedrockRuntime, model: String) -> Result<Self> {
        anyhow::ensure!(!model.trim().is_empty(), "missing generation model id");
        Ok(Self {
            runtime,
            model: model.trim().to_string(),
        })
    }

    /// Model identifier.
    pub fn model(&self) -> &str {
        &self.model
    }
}

impl LlmProvider for BedrockChatProvider {
    fn answer(&self, request: &ProviderRequest) -> Result<String> {
        let mut body = MessagesBody::from_request(request);
        body.anthropic_version = Some(BEDROCK_ANTHROPIC_VERSION);
        let reply: MessagesReply = self
            .runtime
            .invoke(&self.model, &body)
            .with_context(|| format!("generation call to {} failed", self.model))?;
        reply.into_text("Bedrock")
    }
}
