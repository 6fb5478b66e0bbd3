//! Anthropic messages wire format, used both on Bedrock and the direct API.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use super::{ProviderRequest, Role};

/// Version tag Bedrock requires for Anthropic models.
pub(crate) const BEDROCK_ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";

#[derive(Serialize)]
pub(crate) struct MessagesBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anthropic_version: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<&'a str>,
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    pub stop_sequences: &'a [String],
    #[serde(skip_serializing_if = "str::is_empty")]
    pub system: &'a str,
    pub messages: Vec<MessageBlock<'a>>,
}

impl<'a> MessagesBody<'a> {
    pub(crate) fn from_request(request: &ProviderRequest<'a>) -> Self {
        let sampling = request.sampling;
        Self {
            anthropic_version: None,
            model: None,
            max_tokens: sampling.max_tokens,
            temperature: sampling.temperature,
            top_k: sampling.top_k,
            top_p: sampling.top_p,
            stop_sequences: &sampling.stop_sequences,
            system: request.system,
            messages: request
                .messages
                .iter()
                .map(|message| MessageBlock {
                    role: message.role,
                    content: vec![ContentBlock {
                        kind: "text",
                        text: &message.content,
                    }],
                })
                .collect(),
        }
    }
}

#[derive(Serialize)]
pub(crate) struct MessageBlock<'a> {
    pub role: Role,
    pub content: Vec<ContentBlock<'a>>,
}

#[derive(Serialize)]
pub(crate) struct ContentBlock<'a> {
    #[serde(rename = "type")]
    pub kind: &'a str,
    pub text: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MessagesReply {
    content: Vec<ReplyBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

impl MessagesReply {
    pub(crate) fn into_text(self, provider: &str) -> Result<String> {
        tracing::debug!(provider, stop_reason = ?self.stop_reason, "generation finished");
        let answer = self
            .content
            .into_iter()
            .filter_map(|block| match block {
                ReplyBlock::Text { text } => Some(text),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        if answer.is_empty() {
            bail!("{provider} response missing text content");
        }
        Ok(answer)
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ReplyBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatMessage, SamplingParams};
    use serde_json::json;

    #[test]
    fn body_orders_history_before_question() {
        let sampling = SamplingParams::default();
        let messages = vec![
            ChatMessage::user("earlier question"),
            ChatMessage::assistant("earlier answer"),
            ChatMessage::user("current question"),
        ];
        let request = ProviderRequest {
            system: "be brief",
            messages: &messages,
            sampling: &sampling,
        };
        let mut body = MessagesBody::from_request(&request);
        body.anthropic_version = Some(BEDROCK_ANTHROPIC_VERSION);
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(
            value,
            json!({
                "anthropic_version": "bedrock-2023-05-31",
                "max_tokens": 2048,
                "temperature": 0.0,
                "top_k": 250,
                "top_p": 1.0,
                "stop_sequences": ["\n\nHuman"],
                "system": "be brief",
                "messages": [
                    {"role": "user", "content": [{"type": "text", "text": "earlier question"}]},
                    {"role": "assistant", "content": [{"type": "text", "text": "earlier answer"}]},
                    {"role": "user", "content": [{"type": "text", "text": "current question"}]}
                ]
            })
        );
    }

    #[test]
    fn reply_keeps_only_text_blocks() {
        let reply: MessagesReply = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "Fines start at 300."},
                {"type": "tool_use", "id": "x", "name": "n", "input": {}}
            ],
            "stop_reason": "end_turn"
        }))
        .unwrap();
        assert_eq!(reply.into_text("test").unwrap(), "Fines start at 300.");
    }

    #[test]
    fn empty_reply_is_an_error() {
        let reply: MessagesReply = serde_json::from_value(json!({ "content": [] })).unwrap();
        assert!(reply.into_text("test").is_err());
    }
}
