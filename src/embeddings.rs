//! Chunk data structures shared by the indexer, the vector store and the answer pipeline.

use serde::{Deserialize, Serialize};

/// Positional metadata stored next to every indexed chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Document location the chunk came from.
    pub source: String,
    /// 1-based page number.
    pub page: usize,
    /// Chunk ordinal within the document.
    pub chunk_index: usize,
    /// Character offset of the chunk inside its page.
    pub start_index: usize,
    /// CRC32 of the source document, used for optional dedupe.
    pub document_checksum: u32,
}

/// Chunk produced by the splitter, not yet embedded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentChunk {
    /// Chunk text submitted to the embedding model.
    pub text: String,
    /// Position of the chunk in its document.
    pub metadata: ChunkMetadata,
}

/// Embedded chunk ready to be written to the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Chunk body text.
    pub text: String,
    /// Chunk metadata.
    pub metadata: ChunkMetadata,
    /// Model embedding vector.
    pub embedding: Vec<f32>,
}

impl ChunkRecord {
    /// Attaches an embedding to a split chunk.
    pub fn new(chunk: DocumentChunk, embedding: Vec<f32>) -> Self {
        Self {
            text: chunk.text,
            metadata: chunk.metadata,
            embedding,
        }
    }
}

/// Chunk returned by a similarity search, in rank order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    /// Chunk body text.
    pub text: String,
    /// Stored metadata; absent when the index holds foreign documents.
    #[serde(default)]
    pub metadata: Option<ChunkMetadata>,
    /// Engine relevance score (higher is closer).
    pub score: f64,
}
