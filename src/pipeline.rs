//! Retrieval-augmented answering: embed the question, fetch context, ask the model.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::embedder::Embeddings;
use crate::embeddings::RetrievedChunk;
use crate::error::QuestionError;
use crate::llm::{LlmProvider, ProviderRequest, SamplingParams};
use crate::prompt::{stuff_context, ChatTurn, QaPrompt};
use crate::vector_store::VectorStore;

/// Chunks retrieved per question unless overridden.
pub const DEFAULT_TOP_K: usize = 4;

/// Result of one question.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    /// The question exactly as submitted; whitespace is only ignored when checking for emptiness.
    pub question: String,
    /// Generated answer text.
    pub answer: String,
    /// Chunks handed to the model, best first.
    pub context: Vec<RetrievedChunk>,
}

/// Rejects empty or whitespace-only questions, returning the trimmed text.
pub fn validate_question(question: &str) -> Result<&str, QuestionError> {
    let trimmed = question.trim();
    if trimmed.is_empty() {
        return Err(QuestionError::Empty);
    }
    Ok(trimmed)
}

/// Long-lived answer pipeline. Construction does no I/O; share it behind an `Arc`.
pub struct AnswerPipeline {
    embedder: Arc<dyn Embeddings>,
    store: Arc<dyn VectorStore>,
    llm: Arc<dyn LlmProvider>,
    prompt: QaPrompt,
    sampling: SamplingParams,
    top_k: usize,
}

impl AnswerPipeline {
    /// Wires the pipeline with default prompt, sampling and top-k.
    pub fn new(
        embedder: Arc<dyn Embeddings>,
        store: Arc<dyn VectorStore>,
        llm: Arc<dyn LlmProvider>,
    ) -> Self {
        Self {
            embedder,
            store,
            llm,
            prompt: QaPrompt::default(),
            sampling: SamplingParams::default(),
            top_k: DEFAULT_TOP_K,
        }
    }

    /// Replaces the prompt template.
    pub fn with_prompt(mut self, prompt: QaPrompt) -> Self {
        self.prompt = prompt;
        self
    }

    /// Replaces the sampling parameters.
    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }

    /// Sets how many chunks are retrieved per question.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    /// Retrieves the chunks most similar to `question`.
    pub fn retrieve(&self, question: &str) -> Result<Vec<RetrievedChunk>> {
        let embedding = self
            .embedder
            .embed_query(question)
            .context("failed to embed question")?;
        self.store
            .similarity_search(&embedding, self.top_k)
            .context("similarity search failed")
    }

    /// Answers `question` given prior turns (usually none). The text is forwarded as typed.
    pub fn answer(&self, question: &str, history: &[ChatTurn]) -> Result<Answer> {
        validate_question(question)?;
        let context = self.retrieve(question)?;
        tracing::info!(retrieved = context.len(), "retrieved context");
        let system = self.prompt.system(&stuff_context(&context));
        let messages = self.prompt.messages(history, question);
        let request = ProviderRequest {
            system: &system,
            messages: &messages,
            sampling: &self.sampling,
        };
        let answer = self.llm.answer(&request)?;
        Ok(Answer {
            question: question.to_string(),
            answer,
            context,
        })
    }
}

/// Human-readable dump of retrieved chunks.
pub fn render_context(chunks: &[RetrievedChunk]) -> String {
    let mut out = String::new();
    for chunk in chunks {
        let (source, page, index) = match &chunk.metadata {
            Some(meta) => (meta.source.as_str(), meta.page.to_string(), meta.chunk_index.to_string()),
            None => ("(unknown)", "-".to_string(), "-".to_string()),
        };
        out.push_str(&format!(
            "Source: {source}\nPage: {page} | Chunk: {index} | Score: {:.4}\n{}\n---\n",
            chunk.score,
            chunk.text.trim()
        ));
    }
    out
}
