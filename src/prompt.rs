//! Question-answering prompt: fixed instruction, retrieved context, history, question.

use crate::embeddings::RetrievedChunk;
use crate::llm::ChatMessage;

/// Topic used when none is configured.
pub const DEFAULT_TOPIC: &str = "traffic regulations in the city";

/// Separator placed between retrieved chunks.
pub const DOCUMENT_SEPARATOR: &str = "\n\n";

/// A finished exchange that can be replayed as context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    /// What was asked.
    pub question: String,
    /// What the model replied.
    pub answer: String,
}

/// Renders the system instruction and message list for one question.
#[derive(Debug, Clone)]
pub struct QaPrompt {
    topic: String,
}

impl Default for QaPrompt {
    fn default() -> Self {
        Self::new(DEFAULT_TOPIC)
    }
}

impl QaPrompt {
    /// Builds a prompt scoped to `topic`.
    pub fn new(topic: impl Into<String>) -> Self {
        let topic = topic.into();
        let topic = topic.trim();
        Self {
            topic: if topic.is_empty() {
                DEFAULT_TOPIC.to_string()
            } else {
                topic.to_string()
            },
        }
    }

    /// Assistant topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// System instruction with the retrieved context appended.
    pub fn system(&self, context: &str) -> String {
        format!(
            "You are an assistant that uses the provided context to answer questions about {}. \
             Use the following pieces of retrieved context to answer the question. \
             If you don't know the answer, say that you don't know. \
             Use three sentences maximum and keep the answer concise.\n\n{context}",
            self.topic
        )
    }

    /// History turns in order, followed by the current question.
    pub fn messages(&self, history: &[ChatTurn], question: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(history.len() * 2 + 1);
        for turn in history {
            messages.push(ChatMessage::user(turn.question.clone()));
            messages.push(ChatMessage::assistant(turn.answer.clone()));
        }
        messages.push(ChatMessage::user(question));
        messages
    }
}

/// Joins retrieved chunk texts into the context block.
pub fn stuff_context(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .map(|chunk| chunk.text.as_str())
        .collect::<Vec<_>>()
        .join(DOCUMENT_SEPARATOR)
}
