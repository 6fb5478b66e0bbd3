//! Amazon Titan text embeddings served by Bedrock.

use std::thread;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::Embeddings;
use crate::bedrock::BedrockRuntime;
use crate::error::AwsApiError;

/// Default Titan embedding model.
pub const DEFAULT_EMBEDDING_MODEL: &str = "amazon.titan-embed-text-v1";

/// Blocking embeddings client; Titan accepts one input per request.
#[derive(Clone)]
pub struct BedrockEmbedder {
    runtime: BedrockRuntime,
    model: String,
    max_attempts: usize,
}

impl BedrockEmbedder {
    /// Builds a new embedder. `max_attempts` of 1 disables retries.
    pub fn new(runtime: BedrockRuntime, model: String, max_attempts: usize) -> Result<Self> {
        anyhow::ensure!(!model.trim().is_empty(), "missing embedding model id");
        Ok(Self {
            runtime,
            model: model.trim().to_string(),
            max_attempts: max_attempts.max(1),
        })
    }

    /// Model identifier.
    pub fn model(&self) -> &str {
        &self.model
    }

    fn embed_one(&self, input: &str) -> Result<Vec<f32>> {
        let request = TitanRequest { input_text: input };
        let mut attempt = 0usize;
        loop {
            match self.runtime.invoke::<_, TitanResponse>(&self.model, &request) {
                Ok(parsed) => {
                    anyhow::ensure!(
                        !parsed.embedding.is_empty(),
                        "{} returned an empty embedding",
                        self.model
                    );
                    return Ok(parsed.embedding);
                }
                Err(err) => {
                    if is_retryable(&err) && attempt + 1 < self.max_attempts {
                        attempt += 1;
                        tracing::warn!(attempt, error = %err, "retrying embedding request");
                        thread::sleep(retry_backoff(attempt));
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }
}

impl Embeddings for BedrockEmbedder {
    fn embed_documents(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(inputs.len());
        for input in inputs {
            let vector = self.embed_one(input)?;
            if let Some(first) = vectors.first().map(|v: &Vec<f32>| v.len()) {
                anyhow::ensure!(
                    vector.len() == first,
                    "{} returned a {}-dim vector after {}-dim ones",
                    self.model,
                    vector.len(),
                    first
                );
            }
            vectors.push(vector);
        }
        tracing::debug!(model = %self.model, count = vectors.len(), "embedded batch");
        Ok(vectors)
    }
}

fn is_retryable(err: &anyhow::Error) -> bool {
    if let Some(api) = err.downcast_ref::<AwsApiError>() {
        return api.status == 429 || api.status >= 500;
    }
    err.chain().any(|cause| {
        cause
            .downcast_ref::<reqwest::Error>()
            .is_some_and(|e| e.is_timeout() || e.is_connect())
    })
}

fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(500 * (1 << capped))
}

#[derive(Serialize)]
struct TitanRequest<'a> {
    #[serde(rename = "inputText")]
    input_text: &'a str,
}

#[derive(Debug, Deserialize)]
struct TitanResponse {
    embedding: Vec<f32>,
    #[serde(rename = "inputTextTokenCount", default)]
    #[allow(dead_code)]
    input_text_token_count: usize,
}
