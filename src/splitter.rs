//! Recursive character splitting of page text into overlapping chunks.
//!
//! Text is cut on the first separator from a priority list that occurs in it
//! (paragraph break, line break, space, then single characters). Pieces are
//! greedily merged up to `chunk_size` characters; when a chunk is emitted the
//! tail of at most `chunk_overlap` characters is carried into the next one.
//! Pieces that are still too long are split again with the lower-priority
//! separators.

use std::collections::VecDeque;

use anyhow::Result;

use crate::document::LoadedDocument;
use crate::embeddings::{ChunkMetadata, DocumentChunk};

/// Separator priority list: paragraph, line, word, character.
pub const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Target chunk length in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 700;

/// Characters carried over between consecutive chunks.
pub const DEFAULT_CHUNK_OVERLAP: usize = 70;

/// Greedy recursive splitter measured in Unicode scalar values.
#[derive(Debug, Clone)]
pub struct RecursiveTextSplitter {
    separators: Vec<String>,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Default for RecursiveTextSplitter {
    fn default() -> Self {
        Self {
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl RecursiveTextSplitter {
    /// Builds a splitter with the default separators.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        anyhow::ensure!(chunk_size > 0, "chunk size must be positive");
        anyhow::ensure!(
            chunk_overlap < chunk_size,
            "chunk overlap {chunk_overlap} must be smaller than chunk size {chunk_size}"
        );
        Ok(Self {
            chunk_size,
            chunk_overlap,
            ..Self::default()
        })
    }

    /// Maximum chunk length.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Overlap carried between chunks.
    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Splits raw text into chunks.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &self.separators)
    }

    /// Splits every page of `document`, numbering chunks across the whole document.
    pub fn split_document(&self, document: &LoadedDocument) -> Vec<DocumentChunk> {
        let mut chunks = Vec::new();
        for page in &document.pages {
            let mut search_from = 0usize;
            let mut previous_len = 0usize;
            for text in self.split_text(&page.text) {
                let lower = (search_from + previous_len).saturating_sub(self.chunk_overlap);
                let start_index = find_chars(&page.text, &text, lower).unwrap_or(lower);
                search_from = start_index;
                previous_len = char_len(&text);
                chunks.push(DocumentChunk {
                    metadata: ChunkMetadata {
                        source: document.source.clone(),
                        page: page.page_number,
                        chunk_index: chunks.len(),
                        start_index,
                        document_checksum: document.checksum,
                    },
                    text,
                });
            }
        }
        tracing::debug!(
            source = %document.source,
            chunks = chunks.len(),
            "split document"
        );
        chunks
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        let mut separator = separators.last().map(String::as_str).unwrap_or("");
        let mut remaining: &[String] = &[];
        for (idx, candidate) in separators.iter().enumerate() {
            if candidate.is_empty() {
                separator = "";
                break;
            }
            if text.contains(candidate.as_str()) {
                separator = candidate.as_str();
                remaining = &separators[idx + 1..];
                break;
            }
        }

        let mut chunks = Vec::new();
        let mut small: Vec<&str> = Vec::new();
        for piece in split_keeping_separator(text, separator) {
            if char_len(piece) < self.chunk_size {
                small.push(piece);
                continue;
            }
            if !small.is_empty() {
                chunks.extend(self.merge_pieces(&small));
                small.clear();
            }
            if remaining.is_empty() {
                chunks.push(piece.to_string());
            } else {
                chunks.extend(self.split_recursive(piece, remaining));
            }
        }
        if !small.is_empty() {
            chunks.extend(self.merge_pieces(&small));
        }
        chunks
    }

    fn merge_pieces(&self, pieces: &[&str]) -> Vec<String> {
        let mut merged = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;
        for &piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size {
                if total > self.chunk_size {
                    tracing::warn!(
                        length = total,
                        limit = self.chunk_size,
                        "created a chunk longer than the configured size"
                    );
                }
                if !current.is_empty() {
                    if let Some(chunk) = join_trimmed(&current) {
                        merged.push(chunk);
                    }
                    while total > self.chunk_overlap
                        || (total + len > self.chunk_size && total > 0)
                    {
                        match current.pop_front() {
                            Some(dropped) => total -= char_len(dropped),
                            None => break,
                        }
                    }
                }
            }
            current.push_back(piece);
            total += len;
        }
        if let Some(chunk) = join_trimmed(&current) {
            merged.push(chunk);
        }
        merged
    }
}

// Separator stays attached to the start of the piece that follows it.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(idx, ch)| &text[idx..idx + ch.len_utf8()])
            .collect();
    }
    let mut pieces = Vec::new();
    let mut start = 0usize;
    for (idx, _) in text.match_indices(separator) {
        if idx > start {
            pieces.push(&text[start..idx]);
        }
        start = idx;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces.retain(|piece| !piece.is_empty());
    pieces
}

fn join_trimmed(pieces: &VecDeque<&str>) -> Option<String> {
    let joined: String = pieces.iter().copied().collect();
    let trimmed = joined.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

// Character offset of `needle` in `haystack`, searching from character `from`.
fn find_chars(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    let byte_from = haystack
        .char_indices()
        .nth(from)
        .map(|(idx, _)| idx)
        .unwrap_or(haystack.len());
    haystack[byte_from..]
        .find(needle)
        .map(|found| from + char_len(&haystack[byte_from..byte_from + found]))
}
