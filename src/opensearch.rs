//! OpenSearch-backed [`VectorStore`] using the k-NN plugin.

use anyhow::{anyhow, Context, Result};
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;
use uuid::Uuid;

use crate::embeddings::{ChunkMetadata, ChunkRecord, RetrievedChunk};
use crate::http::{ensure_success, SignedClient};
use crate::vector_store::{IndexName, VectorStore};

/// Field holding the embedding vector.
pub const VECTOR_FIELD: &str = "vector_field";
/// Field holding the chunk text.
pub const TEXT_FIELD: &str = "text";
/// Field holding chunk metadata.
pub const METADATA_FIELD: &str = "metadata";

const SERVICE: &str = "opensearch";
/// Records sent per `_bulk` request unless overridden.
pub const DEFAULT_BULK_SIZE: usize = 500;

/// Vector store living in one OpenSearch index.
pub struct OpenSearchStore {
    client: SignedClient,
    base: String,
    index: IndexName,
    bulk_size: usize,
}

impl OpenSearchStore {
    /// Points the store at `host` (scheme optional, https assumed) and `index`.
    pub fn new(client: SignedClient, host: &str, index: IndexName) -> Result<Self> {
        let host = host.trim().trim_end_matches('/');
        anyhow::ensure!(!host.is_empty(), "search engine host is required");
        let base = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("https://{host}")
        };
        Url::parse(&base).with_context(|| format!("invalid search engine host {base}"))?;
        Ok(Self {
            client,
            base,
            index,
            bulk_size: DEFAULT_BULK_SIZE,
        })
    }

    /// Overrides how many records go into one `_bulk` request.
    pub fn with_bulk_size(mut self, bulk_size: usize) -> Self {
        self.bulk_size = bulk_size.max(1);
        self
    }

    /// Index this store writes to.
    pub fn index(&self) -> &IndexName {
        &self.index
    }

    fn url(&self, path: &str) -> Result<Url> {
        let raw = format!("{}/{}", self.base, path.trim_start_matches('/'));
        Url::parse(&raw).with_context(|| format!("invalid search engine URL {raw}"))
    }

    fn index_exists(&self) -> Result<bool> {
        let url = self.url(self.index.as_str())?;
        let resp = self.client.send(self.client.http().head(url))?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            _ => ensure_success(SERVICE, resp).map(|_| true),
        }
    }

    fn count_with(&self, query: Option<Value>) -> Result<usize> {
        let url = self.url(&format!("{}/_count", self.index))?;
        let builder = match query {
            Some(query) => self.client.http().post(url).json(&json!({ "query": query })),
            None => self.client.http().get(url),
        };
        let resp = self.client.send(builder)?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(0);
        }
        let reply: CountReply = ensure_success(SERVICE, resp)?
            .json()
            .context("failed to parse _count response")?;
        Ok(reply.count)
    }

    fn refresh(&self) -> Result<()> {
        let url = self.url(&format!("{}/_refresh", self.index))?;
        ensure_success(SERVICE, self.client.send(self.client.http().post(url))?)?;
        Ok(())
    }
}

impl VectorStore for OpenSearchStore {
    fn ensure_index(&self, dimension: usize) -> Result<()> {
        anyhow::ensure!(dimension > 0, "cannot create an index for empty vectors");
        if self.index_exists()? {
            tracing::debug!(index = %self.index, "index already exists");
            return Ok(());
        }
        let url = self.url(self.index.as_str())?;
        let builder = self.client.http().put(url).json(&index_body(dimension));
        ensure_success(SERVICE, self.client.send(builder)?)
            .with_context(|| format!("failed to create index {}", self.index))?;
        tracing::info!(index = %self.index, dimension, "created k-NN index");
        Ok(())
    }

    fn add_chunks(&self, records: &[ChunkRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let url = self.url("_bulk")?;
        let mut written = 0usize;
        for batch in records.chunks(self.bulk_size) {
            let ids: Vec<String> = batch.iter().map(|_| Uuid::new_v4().to_string()).collect();
            let body = bulk_body(&self.index, batch, &ids)?;
            let builder = self
                .client
                .http()
                .post(url.clone())
                .header(CONTENT_TYPE, "application/x-ndjson")
                .body(body);
            let reply: BulkReply = ensure_success(SERVICE, self.client.send(builder)?)?
                .json()
                .context("failed to parse _bulk response")?;
            reply.into_result()?;
            written += batch.len();
            tracing::debug!(index = %self.index, written, "bulk batch indexed");
        }
        self.refresh()?;
        Ok(written)
    }

    fn similarity_search(&self, embedding: &[f32], k: usize) -> Result<Vec<RetrievedChunk>> {
        let url = self.url(&format!("{}/_search", self.index))?;
        let builder = self.client.http().post(url).json(&knn_query(embedding, k));
        let reply: SearchReply = ensure_success(SERVICE, self.client.send(builder)?)?
            .json()
            .context("failed to parse _search response")?;
        Ok(reply.into_chunks())
    }

    fn count(&self) -> Result<usize> {
        self.count_with(None)
    }

    fn count_document(&self, checksum: u32) -> Result<usize> {
        let field = format!("{METADATA_FIELD}.document_checksum");
        self.count_with(Some(json!({ "term": { field: checksum } })))
    }
}

pub(crate) fn index_body(dimension: usize) -> Value {
    json!({
        "settings": {
            "index": {
                "knn": true,
                "knn.algo_param.ef_search": 512
            }
        },
        "mappings": {
            "properties": {
                VECTOR_FIELD: {
                    "type": "knn_vector",
                    "dimension": dimension,
                    "method": {
                        "name": "hnsw",
                        "space_type": "l2",
                        "engine": "nmslib",
                        "parameters": { "ef_construction": 512, "m": 16 }
                    }
                }
            }
        }
    })
}

pub(crate) fn bulk_body(index: &IndexName, records: &[ChunkRecord], ids: &[String]) -> Result<String> {
    anyhow::ensure!(records.len() == ids.len(), "one id per record required");
    let mut body = String::new();
    for (record, id) in records.iter().zip(ids) {
        let action = json!({ "index": { "_index": index.as_str(), "_id": id } });
        let doc = json!({
            VECTOR_FIELD: record.embedding,
            TEXT_FIELD: record.text,
            METADATA_FIELD: record.metadata,
        });
        body.push_str(&serde_json::to_string(&action)?);
        body.push('\n');
        body.push_str(&serde_json::to_string(&doc)?);
        body.push('\n');
    }
    Ok(body)
}

pub(crate) fn knn_query(embedding: &[f32], k: usize) -> Value {
    json!({
        "size": k,
        "_source": { "excludes": [VECTOR_FIELD] },
        "query": {
            "knn": {
                VECTOR_FIELD: { "vector": embedding, "k": k }
            }
        }
    })
}

#[derive(Debug, Deserialize)]
struct CountReply {
    count: usize,
}

#[derive(Debug, Deserialize)]
struct BulkReply {
    errors: bool,
    #[serde(default)]
    items: Vec<Value>,
}

impl BulkReply {
    fn into_result(self) -> Result<()> {
        if !self.errors {
            return Ok(());
        }
        let failed = self
            .items
            .iter()
            .filter_map(|item| item.as_object()?.values().next()?.get("error"))
            .collect::<Vec<_>>();
        let first = failed
            .first()
            .map(|err| err.to_string())
            .unwrap_or_else(|| "unknown error".to_string());
        Err(anyhow!(
            "bulk indexing failed for {} document(s): {first}",
            failed.len().max(1)
        ))
    }
}

#[derive(Debug, Deserialize)]
struct SearchReply {
    hits: SearchHits,
}

#[derive(Debug, Deserialize)]
struct SearchHits {
    hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "_score", default)]
    score: Option<f64>,
    #[serde(rename = "_source")]
    source: HitSource,
}

#[derive(Debug, Deserialize)]
struct HitSource {
    text: String,
    #[serde(default)]
    metadata: Option<Value>,
}

impl SearchReply {
    fn into_chunks(self) -> Vec<RetrievedChunk> {
        self.hits
            .hits
            .into_iter()
            .map(|hit| RetrievedChunk {
                text: hit.source.text,
                metadata: hit
                    .source
                    .metadata
                    .and_then(|meta| serde_json::from_value::<ChunkMetadata>(meta).ok()),
                score: hit.score.unwrap_or(0.0),
            })
            .collect()
    }
}
