//! Vector store seam plus index-name validation shared by binaries.

use std::fmt;

use anyhow::Result;

use crate::embeddings::{ChunkRecord, RetrievedChunk};

/// Storage for embedded chunks that supports nearest-neighbour queries.
pub trait VectorStore: Send + Sync {
    /// Creates the index for vectors of `dimension` when it does not exist yet.
    fn ensure_index(&self, dimension: usize) -> Result<()>;

    /// Appends records (no dedupe) and returns how many were written.
    fn add_chunks(&self, records: &[ChunkRecord]) -> Result<usize>;

    /// Returns up to `k` chunks closest to `embedding`, best first.
    fn similarity_search(&self, embedding: &[f32], k: usize) -> Result<Vec<RetrievedChunk>>;

    /// Number of chunks currently stored (0 when the index is missing).
    fn count(&self) -> Result<usize>;

    /// Number of stored chunks that came from the document with `checksum`.
    fn count_document(&self, checksum: u32) -> Result<usize>;
}

/// Validated search index name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexName(String);

impl IndexName {
    /// Validates the index name against the engine's naming rules.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let trimmed = name.trim();
        anyhow::ensure!(!trimmed.is_empty(), "index name is required");
        anyhow::ensure!(
            !trimmed.starts_with(['_', '-', '+']),
            "index name {trimmed:?} must not start with _, - or +"
        );
        anyhow::ensure!(
            trimmed != "." && trimmed != "..",
            "index name {trimmed:?} is reserved"
        );
        anyhow::ensure!(
            !trimmed.chars().any(is_forbidden),
            "index name {trimmed:?} must be lowercase without spaces or any of \\/*?\"<>|,#:"
        );
        Ok(Self(trimmed.to_string()))
    }

    /// Raw index name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IndexName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_forbidden(ch: char) -> bool {
    ch.is_uppercase()
        || ch.is_whitespace()
        || matches!(ch, '\\' | '/' | '*' | '?' | '"' | '<' | '>' | '|' | ',' | '#' | ':')
}
