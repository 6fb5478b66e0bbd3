//! Embedding model seam and the Bedrock Titan implementation.

use anyhow::{anyhow, Result};

pub mod bedrock;

pub use bedrock::BedrockEmbedder;

/// Turns text into fixed-dimension vectors.
pub trait Embeddings: Send + Sync {
    /// Embeds each input, returning vectors in input order.
    fn embed_documents(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Embeds a single query string.
    fn embed_query(&self, input: &str) -> Result<Vec<f32>> {
        self.embed_documents(&[input])?
            .pop()
            .ok_or_else(|| anyhow!("embedding service returned no vector"))
    }
}
