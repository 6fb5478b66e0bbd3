#![warn(missing_docs)]
//! Core library for docqa: index a PDF into OpenSearch and answer questions about it.

pub mod bedrock;
pub mod config;
pub mod credentials;
pub mod document;
pub mod embedder;
pub mod embeddings;
pub mod error;
pub mod http;
pub mod indexer;
pub mod llm;
pub mod opensearch;
pub mod pipeline;
pub mod prompt;
pub mod provisioner;
pub mod sigv4;
pub mod splitter;
pub mod vector_store;

pub use credentials::AwsCredentials;
pub use document::{load_document, DocumentPage, DocumentSource, LoadedDocument};
pub use embedder::Embeddings;
pub use embeddings::{ChunkMetadata, ChunkRecord, DocumentChunk, RetrievedChunk};
pub use error::{AwsApiError, QuestionError};
pub use indexer::{DocumentIndexer, IndexReport};
pub use llm::{ChatMessage, LlmProvider, ProviderRequest, Role, SamplingParams};
pub use opensearch::OpenSearchStore;
pub use pipeline::{render_context, validate_question, Answer, AnswerPipeline};
pub use prompt::{ChatTurn, QaPrompt};
pub use provisioner::{domain_exists, provision, DomainApi, DomainConfig, ProvisionOutcome};
pub use splitter::RecursiveTextSplitter;
pub use vector_store::{IndexName, VectorStore};
