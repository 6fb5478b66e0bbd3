//! Document indexing: split, embed in batches, append to the vector store.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::document::LoadedDocument;
use crate::embedder::Embeddings;
use crate::embeddings::ChunkRecord;
use crate::splitter::RecursiveTextSplitter;
use crate::vector_store::VectorStore;

/// Chunks embedded per embedding call batch unless overridden.
pub const DEFAULT_BATCH_SIZE: usize = 16;

/// Outcome of indexing one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    /// Document location.
    pub source: String,
    /// Chunks produced by the splitter.
    pub chunks_split: usize,
    /// Chunks written to the store in this run.
    pub chunks_indexed: usize,
    /// True when the document was already indexed and dedupe skipped it.
    pub skipped_duplicate: bool,
}

/// Drives one document through splitting, embedding and storage.
pub struct DocumentIndexer {
    embedder: Arc<dyn Embeddings>,
    store: Arc<dyn VectorStore>,
    splitter: RecursiveTextSplitter,
    batch_size: usize,
    dedupe: bool,
}

impl DocumentIndexer {
    /// Creates an indexer with the default splitter; every run appends.
    pub fn new(embedder: Arc<dyn Embeddings>, store: Arc<dyn VectorStore>) -> Self {
        Self {
            embedder,
            store,
            splitter: RecursiveTextSplitter::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            dedupe: false,
        }
    }

    /// Replaces the splitter.
    pub fn with_splitter(mut self, splitter: RecursiveTextSplitter) -> Self {
        self.splitter = splitter;
        self
    }

    /// Sets the embedding batch size (minimum 1).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Skips documents whose checksum is already present in the store.
    pub fn with_dedupe(mut self, dedupe: bool) -> Self {
        self.dedupe = dedupe;
        self
    }

    /// Indexes `document`. All chunks are embedded before the single write, so an
    /// embedding failure leaves the store untouched.
    pub fn index_document(&self, document: &LoadedDocument) -> Result<IndexReport> {
        let chunks = self.splitter.split_document(document);
        let mut report = IndexReport {
            source: document.source.clone(),
            chunks_split: chunks.len(),
            chunks_indexed: 0,
            skipped_duplicate: false,
        };
        if chunks.is_empty() {
            tracing::warn!(source = %document.source, "document produced no chunks");
            return Ok(report);
        }

        if self.dedupe {
            let existing = self
                .store
                .count_document(document.checksum)
                .context("failed to check for an existing copy of the document")?;
            if existing > 0 {
                tracing::info!(
                    source = %document.source,
                    existing,
                    "document already indexed; skipping"
                );
                report.skipped_duplicate = true;
                return Ok(report);
            }
        }

        // every chunk is embedded before anything is written
        let total_batches = chunks.len().div_ceil(self.batch_size);
        let mut records: Vec<ChunkRecord> = Vec::with_capacity(chunks.len());
        for (batch_idx, batch) in chunks.chunks(self.batch_size).enumerate() {
            let inputs: Vec<&str> = batch.iter().map(|chunk| chunk.text.as_str()).collect();
            let vectors = self
                .embedder
                .embed_documents(&inputs)
                .with_context(|| format!("failed to embed batch {}", batch_idx + 1))?;
            anyhow::ensure!(
                vectors.len() == batch.len(),
                "embedding service returned {} vectors for {} chunks",
                vectors.len(),
                batch.len()
            );
            records.extend(
                batch
                    .iter()
                    .cloned()
                    .zip(vectors)
                    .map(|(chunk, embedding)| ChunkRecord::new(chunk, embedding)),
            );
            tracing::debug!(
                batch = batch_idx + 1,
                total_batches,
                embedded = records.len(),
                "embedded batch"
            );
        }

        let dimension = records.first().map(|r| r.embedding.len()).unwrap_or(0);
        self.store.ensure_index(dimension)?;
        report.chunks_indexed = self.store.add_chunks(&records)?;

        tracing::info!(
            source = %document.source,
            chunks = report.chunks_indexed,
            "indexed document"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentPage;
    use crate::embeddings::RetrievedChunk;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FixedEmbedder {
        batches: AtomicUsize,
    }

    impl Embeddings for FixedEmbedder {
        fn embed_documents(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
            self.batches.fetch_add(1, Ordering::SeqCst);
            Ok(inputs.iter().map(|text| vec![text.len() as f32, 1.0]).collect())
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        records: Mutex<Vec<ChunkRecord>>,
        dimension: Mutex<Option<usize>>,
    }

    impl VectorStore for MemoryStore {
        fn ensure_index(&self, dimension: usize) -> Result<()> {
            self.dimension.lock().unwrap().get_or_insert(dimension);
            Ok(())
        }
        fn add_chunks(&self, records: &[ChunkRecord]) -> Result<usize> {
            self.records.lock().unwrap().extend_from_slice(records);
            Ok(records.len())
        }
        fn similarity_search(&self, _embedding: &[f32], _k: usize) -> Result<Vec<RetrievedChunk>> {
            Ok(Vec::new())
        }
        fn count(&self) -> Result<usize> {
            Ok(self.records.lock().unwrap().len())
        }
        fn count_document(&self, checksum: u32) -> Result<usize> {
            Ok(self
                .records
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.metadata.document_checksum == checksum)
                .count())
        }
    }

    fn document() -> LoadedDocument {
        let paragraph = "Vehicles must stop at red lights. ".repeat(30);
        LoadedDocument::from_pages(
            "traffic.pdf",
            vec![
                DocumentPage {
                    page_number: 1,
                    text: format!("{paragraph}\n\n{paragraph}"),
                },
                DocumentPage {
                    page_number: 2,
                    text: "Speed limit is 50 km/h in residential zones.".into(),
                },
            ],
        )
    }

    fn indexer_with_store(store: Arc<MemoryStore>) -> (DocumentIndexer, Arc<FixedEmbedder>) {
        let embedder = Arc::new(FixedEmbedder {
            batches: AtomicUsize::new(0),
        });
        (DocumentIndexer::new(embedder.clone(), store), embedder)
    }

    #[test]
    fn indexes_every_chunk_in_batches() {
        let store = Arc::new(MemoryStore::default());
        let (indexer, embedder) = indexer_with_store(store.clone());
        let indexer = indexer.with_batch_size(2);
        let report = indexer.index_document(&document()).unwrap();

        assert!(report.chunks_split >= 3);
        assert_eq!(report.chunks_indexed, report.chunks_split);
        assert!(!report.skipped_duplicate);
        assert_eq!(store.count().unwrap(), report.chunks_split);
        assert_eq!(
            embedder.batches.load(Ordering::SeqCst),
            report.chunks_split.div_ceil(2)
        );
        assert_eq!(*store.dimension.lock().unwrap(), Some(2));

        let records = store.records.lock().unwrap();
        let pages: Vec<usize> = records.iter().map(|r| r.metadata.page).collect();
        assert_eq!(pages.last(), Some(&2));
        assert!(records.iter().all(|r| r.text.chars().count() <= 700));
    }

    #[test]
    fn reindexing_appends_duplicates_by_default() {
        let store = Arc::new(MemoryStore::default());
        let (indexer, _) = indexer_with_store(store.clone());
        let doc = document();
        let first = indexer.index_document(&doc).unwrap();
        indexer.index_document(&doc).unwrap();
        assert_eq!(store.count().unwrap(), first.chunks_indexed * 2);
    }

    #[test]
    fn dedupe_skips_known_documents() {
        let store = Arc::new(MemoryStore::default());
        let (indexer, embedder) = indexer_with_store(store.clone());
        let indexer = indexer.with_dedupe(true);
        let doc = document();
        let first = indexer.index_document(&doc).unwrap();
        let calls = embedder.batches.load(Ordering::SeqCst);

        let second = indexer.index_document(&doc).unwrap();
        assert!(second.skipped_duplicate);
        assert_eq!(second.chunks_indexed, 0);
        assert_eq!(store.count().unwrap(), first.chunks_indexed);
        assert_eq!(embedder.batches.load(Ordering::SeqCst), calls);
    }

    #[test]
    fn embedding_failure_aborts_without_writes() {
        struct Failing;
        impl Embeddings for Failing {
            fn embed_documents(&self, _inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
                anyhow::bail!("bedrock unavailable")
            }
        }
        let store = Arc::new(MemoryStore::default());
        let indexer = DocumentIndexer::new(Arc::new(Failing), store.clone());
        let err = indexer.index_document(&document()).unwrap_err();
        assert!(format!("{err:#}").contains("bedrock unavailable"));
        assert_eq!(store.count().unwrap(), 0);
    }

    /// Succeeds for the first `healthy_calls` batches, then fails.
    struct FailsAfter {
        healthy_calls: usize,
        calls: AtomicUsize,
    }

    impl Embeddings for FailsAfter {
        fn embed_documents(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) >= self.healthy_calls {
                anyhow::bail!("throttled");
            }
            Ok(inputs.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    #[test]
    fn later_batch_failure_leaves_store_untouched() {
        let store = Arc::new(MemoryStore::default());
        let failing = Arc::new(FailsAfter {
            healthy_calls: 1,
            calls: AtomicUsize::new(0),
        });
        let indexer = DocumentIndexer::new(failing.clone(), store.clone())
            .with_batch_size(1)
            .with_dedupe(true);
        let doc = document();
        let err = indexer.index_document(&doc).unwrap_err();
        assert!(format!("{err:#}").contains("failed to embed batch 2"));
        assert_eq!(failing.calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.count().unwrap(), 0);
        assert_eq!(*store.dimension.lock().unwrap(), None);

        let (healthy, _) = indexer_with_store(store.clone());
        let report = healthy.with_dedupe(true).index_document(&doc).unwrap();
        assert!(!report.skipped_duplicate);
        assert_eq!(report.chunks_indexed, report.chunks_split);
        assert_eq!(store.count().unwrap(), report.chunks_split);
    }
}
