//! Command-line/environment configuration shared by the binaries, plus client wiring.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, ValueEnum};
use tracing_subscriber::EnvFilter;

use crate::bedrock::BedrockRuntime;
use crate::credentials::AwsCredentials;
use crate::document::DocumentSource;
use crate::embedder::bedrock::DEFAULT_EMBEDDING_MODEL;
use crate::embedder::{BedrockEmbedder, Embeddings};
use crate::http::{Auth, SignedClient};
use crate::indexer::{DocumentIndexer, DEFAULT_BATCH_SIZE};
use crate::llm::bedrock::DEFAULT_CHAT_MODEL;
use crate::llm::{AnthropicProvider, BedrockChatProvider, LlmProvider, SamplingParams};
use crate::opensearch::{OpenSearchStore, DEFAULT_BULK_SIZE};
use crate::pipeline::{AnswerPipeline, DEFAULT_TOP_K};
use crate::prompt::{QaPrompt, DEFAULT_TOPIC};
use crate::sigv4::Signer;
use crate::splitter::{RecursiveTextSplitter, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use crate::vector_store::{IndexName, VectorStore};

/// Index name used when none is configured.
pub const DEFAULT_INDEX_NAME: &str = "docqa-chunks";

/// AWS account credentials and region.
#[derive(Args, Clone)]
pub struct AwsArgs {
    /// AWS access key id
    #[arg(long, env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    pub aws_access_key_id: Option<String>,

    /// AWS secret access key
    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub aws_secret_access_key: Option<String>,

    /// Session token for temporary credentials
    #[arg(long, env = "AWS_SESSION_TOKEN", hide_env_values = true)]
    pub aws_session_token: Option<String>,

    /// RFC 3339 instant after which the credentials are refused
    #[arg(long, env = "DOCQA_CREDENTIALS_EXPIRE_AT")]
    pub credentials_expire_at: Option<String>,

    /// Default AWS region
    #[arg(long, env = "AWS_REGION", default_value = "us-east-1")]
    pub region: String,

    /// Override the Bedrock runtime endpoint (for local emulators)
    #[arg(long, env = "DOCQA_BEDROCK_ENDPOINT")]
    pub bedrock_endpoint: Option<String>,
}

impl AwsArgs {
    /// Builds the process-wide credential object; fails before any remote call.
    pub fn credentials(&self) -> Result<Arc<AwsCredentials>> {
        let expires_at = self
            .credentials_expire_at
            .as_deref()
            .map(|raw| {
                DateTime::parse_from_rfc3339(raw.trim())
                    .map(|ts| ts.with_timezone(&Utc))
                    .with_context(|| format!("invalid credential expiry {raw:?}"))
            })
            .transpose()?;
        let credentials = AwsCredentials::new(
            self.aws_access_key_id.clone().unwrap_or_default(),
            self.aws_secret_access_key.clone().unwrap_or_default(),
            self.aws_session_token.clone(),
            expires_at,
        )?;
        credentials.ensure_fresh()?;
        Ok(Arc::new(credentials))
    }
}

fn redacted(secret: &Option<String>) -> Option<&'static str> {
    secret.as_ref().map(|_| "<redacted>")
}

impl fmt::Debug for AwsArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsArgs")
            .field("aws_access_key_id", &self.aws_access_key_id)
            .field("aws_secret_access_key", &redacted(&self.aws_secret_access_key))
            .field("aws_session_token", &redacted(&self.aws_session_token))
            .field("credentials_expire_at", &self.credentials_expire_at)
            .field("region", &self.region)
            .field("bedrock_endpoint", &self.bedrock_endpoint)
            .finish()
    }
}

/// How requests to the search engine are authenticated.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchAuthMode {
    /// AWS SigV4 with the shared credentials.
    Sigv4,
    /// HTTP basic auth with the master user.
    Basic,
    /// No authentication (local clusters).
    #[value(name = "none")]
    Anonymous,
}

/// Search engine connection.
#[derive(Args, Clone)]
pub struct SearchArgs {
    /// Search engine host, with or without scheme
    #[arg(long, env = "OPENSEARCH_HOST")]
    pub opensearch_host: Option<String>,

    /// Index holding the chunks
    #[arg(long, env = "DOCQA_INDEX_NAME", default_value = DEFAULT_INDEX_NAME)]
    pub index_name: String,

    /// Chunks retrieved per question
    #[arg(long, env = "DOCQA_TOP_K", default_value_t = DEFAULT_TOP_K)]
    pub top_k: usize,

    /// Request authentication
    #[arg(long, env = "DOCQA_SEARCH_AUTH", value_enum, default_value_t = SearchAuthMode::Sigv4)]
    pub search_auth: SearchAuthMode,

    /// SigV4 service name (`es` for managed domains, `aoss` for serverless)
    #[arg(long, env = "DOCQA_SEARCH_SERVICE", default_value = "es")]
    pub search_service: String,

    /// Basic-auth user
    #[arg(long, env = "OPENSEARCH_USER")]
    pub search_user: Option<String>,

    /// Basic-auth password
    #[arg(long, env = "OPENSEARCH_PASSWORD", hide_env_values = true)]
    pub search_password: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, env = "DOCQA_SEARCH_TIMEOUT_SECS", default_value_t = 30)]
    pub search_timeout_secs: u64,

    /// Records per `_bulk` request while indexing
    #[arg(long, env = "DOCQA_BULK_SIZE", default_value_t = DEFAULT_BULK_SIZE)]
    pub bulk_size: usize,
}

impl SearchArgs {
    /// Connects the OpenSearch-backed vector store.
    pub fn store(&self, credentials: &Arc<AwsCredentials>, region: &str) -> Result<OpenSearchStore> {
        let host = self
            .opensearch_host
            .as_deref()
            .filter(|host| !host.trim().is_empty())
            .context("OPENSEARCH_HOST (or --opensearch-host) is required")?;
        let auth = match self.search_auth {
            SearchAuthMode::Sigv4 => Auth::SigV4 {
                signer: Signer::new(region, self.search_service.trim()).with_content_sha256(),
                credentials: Arc::clone(credentials),
            },
            SearchAuthMode::Basic => {
                let user = self
                    .search_user
                    .clone()
                    .filter(|user| !user.trim().is_empty())
                    .context("basic search auth needs OPENSEARCH_USER")?;
                let password = self
                    .search_password
                    .clone()
                    .context("basic search auth needs OPENSEARCH_PASSWORD")?;
                Auth::Basic { user, password }
            }
            SearchAuthMode::Anonymous => Auth::None,
        };
        let client = SignedClient::new(auth, Duration::from_secs(self.search_timeout_secs))?;
        Ok(
            OpenSearchStore::new(client, host, IndexName::new(self.index_name.clone())?)?
                .with_bulk_size(self.bulk_size),
        )
    }
}

impl fmt::Debug for SearchArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchArgs")
            .field("opensearch_host", &self.opensearch_host)
            .field("index_name", &self.index_name)
            .field("top_k", &self.top_k)
            .field("search_auth", &self.search_auth)
            .field("search_service", &self.search_service)
            .field("search_user", &self.search_user)
            .field("search_password", &redacted(&self.search_password))
            .field("search_timeout_secs", &self.search_timeout_secs)
            .field("bulk_size", &self.bulk_size)
            .finish()
    }
}

/// Embedding model settings.
#[derive(Args, Debug, Clone)]
pub struct EmbeddingArgs {
    /// Bedrock embedding model id
    #[arg(long, env = "DOCQA_EMBEDDING_MODEL", default_value = DEFAULT_EMBEDDING_MODEL)]
    pub embedding_model: String,

    /// Region of the embedding model (defaults to --region)
    #[arg(long, env = "DOCQA_EMBEDDING_REGION")]
    pub embedding_region: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, env = "DOCQA_EMBEDDING_TIMEOUT_SECS", default_value_t = 30)]
    pub embedding_timeout_secs: u64,

    /// Attempts per embedding request (1 disables retries)
    #[arg(long, env = "DOCQA_EMBEDDING_MAX_ATTEMPTS", default_value_t = 1)]
    pub embedding_max_attempts: usize,

    /// Chunks embedded per batch while indexing
    #[arg(long, env = "DOCQA_EMBEDDING_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    pub embedding_batch_size: usize,
}

impl EmbeddingArgs {
    /// Builds the Bedrock embedder.
    pub fn embedder(&self, credentials: &Arc<AwsCredentials>, aws: &AwsArgs) -> Result<BedrockEmbedder> {
        let region = self.embedding_region.as_deref().unwrap_or(&aws.region);
        let runtime = BedrockRuntime::new(
            Arc::clone(credentials),
            region,
            aws.bedrock_endpoint.as_deref(),
            Duration::from_secs(self.embedding_timeout_secs),
        )?;
        BedrockEmbedder::new(
            runtime,
            self.embedding_model.clone(),
            self.embedding_max_attempts,
        )
    }
}

/// Which service answers questions.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// Anthropic models hosted on Bedrock.
    Bedrock,
    /// Anthropic's own messages API.
    Anthropic,
}

/// Generation settings.
#[derive(Args, Clone)]
pub struct GenerationArgs {
    /// Generation backend
    #[arg(long, env = "DOCQA_PROVIDER", value_enum, default_value_t = ProviderKind::Bedrock)]
    pub provider: ProviderKind,

    /// Model id
    #[arg(long, env = "DOCQA_CHAT_MODEL", default_value = DEFAULT_CHAT_MODEL)]
    pub chat_model: String,

    /// Region of the generation model (defaults to --region)
    #[arg(long, env = "DOCQA_CHAT_REGION")]
    pub chat_region: Option<String>,

    /// API key for the direct Anthropic provider
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    pub anthropic_api_key: Option<String>,

    /// Output token cap
    #[arg(long, env = "DOCQA_MAX_TOKENS", default_value_t = 2048)]
    pub max_tokens: usize,

    /// Sampling temperature
    #[arg(long, env = "DOCQA_TEMPERATURE", default_value_t = 0.0)]
    pub temperature: f32,

    /// Top-k sampling cutoff
    #[arg(long = "sampling-top-k", env = "DOCQA_SAMPLING_TOP_K", default_value_t = 250)]
    pub sampling_top_k: u32,

    /// Nucleus sampling cutoff
    #[arg(long, env = "DOCQA_TOP_P", default_value_t = 1.0)]
    pub top_p: f32,

    /// Stop sequence (repeatable)
    #[arg(long = "stop-sequence", default_values_t = vec!["\n\nHuman".to_string()])]
    pub stop_sequences: Vec<String>,

    /// Subject the assistant answers questions about
    #[arg(long, env = "DOCQA_TOPIC", default_value = DEFAULT_TOPIC)]
    pub topic: String,

    /// Per-request timeout in seconds
    #[arg(long, env = "DOCQA_CHAT_TIMEOUT_SECS", default_value_t = 120)]
    pub chat_timeout_secs: u64,
}

impl GenerationArgs {
    /// Sampling parameters sent with every question.
    pub fn sampling(&self) -> SamplingParams {
        SamplingParams {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            top_k: self.sampling_top_k,
            top_p: self.top_p,
            stop_sequences: self.stop_sequences.clone(),
        }
    }

    /// Prompt template.
    pub fn prompt(&self) -> QaPrompt {
        QaPrompt::new(self.topic.clone())
    }

    /// Builds the configured provider.
    pub fn provider(
        &self,
        credentials: &Arc<AwsCredentials>,
        aws: &AwsArgs,
    ) -> Result<Arc<dyn LlmProvider>> {
        let timeout = Duration::from_secs(self.chat_timeout_secs);
        Ok(match self.provider {
            ProviderKind::Bedrock => {
                let region = self.chat_region.as_deref().unwrap_or(&aws.region);
                let runtime = BedrockRuntime::new(
                    Arc::clone(credentials),
                    region,
                    aws.bedrock_endpoint.as_deref(),
                    timeout,
                )?;
                Arc::new(BedrockChatProvider::new(runtime, self.chat_model.clone())?)
            }
            ProviderKind::Anthropic => {
                let key = self
                    .anthropic_api_key
                    .clone()
                    .context("ANTHROPIC_API_KEY is required for the anthropic provider")?;
                Arc::new(AnthropicProvider::new(key, self.chat_model.clone(), timeout)?)
            }
        })
    }
}

impl fmt::Debug for GenerationArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationArgs")
            .field("provider", &self.provider)
            .field("chat_model", &self.chat_model)
            .field("chat_region", &self.chat_region)
            .field("anthropic_api_key", &redacted(&self.anthropic_api_key))
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("sampling_top_k", &self.sampling_top_k)
            .field("top_p", &self.top_p)
            .field("stop_sequences", &self.stop_sequences)
            .field("topic", &self.topic)
            .field("chat_timeout_secs", &self.chat_timeout_secs)
            .finish()
    }
}

/// Document to index and how to split it.
#[derive(Args, Debug, Clone)]
pub struct DocumentArgs {
    /// PDF location: http(s) URL or local path
    #[arg(long, env = "DOCQA_DOCUMENT_URL")]
    pub document: Option<String>,

    /// Maximum characters per chunk
    #[arg(long, env = "DOCQA_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Characters shared by consecutive chunks
    #[arg(long, env = "DOCQA_CHUNK_OVERLAP", default_value_t = DEFAULT_CHUNK_OVERLAP)]
    pub chunk_overlap: usize,

    /// Skip the document when its checksum is already indexed
    #[arg(long, env = "DOCQA_DEDUPE", default_value_t = false)]
    pub dedupe: bool,

    /// Download timeout in seconds
    #[arg(long, env = "DOCQA_DOWNLOAD_TIMEOUT_SECS", default_value_t = 60)]
    pub download_timeout_secs: u64,
}

impl DocumentArgs {
    /// Parsed document location.
    pub fn source(&self) -> Result<DocumentSource> {
        let location = self
            .document
            .as_deref()
            .context("DOCQA_DOCUMENT_URL (or --document) is required")?;
        DocumentSource::parse(location)
    }

    /// Splitter with the configured sizes.
    pub fn splitter(&self) -> Result<RecursiveTextSplitter> {
        RecursiveTextSplitter::new(self.chunk_size, self.chunk_overlap)
    }

    /// Download timeout.
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

/// Verbosity flags.
#[derive(Args, Debug, Clone, Default)]
pub struct LogArgs {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// Installs the stderr subscriber. `DOCQA_LOG` overrides the flags.
pub fn init_tracing(log: &LogArgs) {
    let filter = if let Ok(env) = std::env::var("DOCQA_LOG") {
        EnvFilter::new(env)
    } else if log.quiet {
        EnvFilter::new("warn")
    } else {
        match log.verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .try_init();
}

/// Long-lived clients shared by indexing and answering.
pub struct Backends {
    credentials: Arc<AwsCredentials>,
    /// Embedding model.
    pub embedder: Arc<dyn Embeddings>,
    /// Vector store.
    pub store: Arc<dyn VectorStore>,
}

impl Backends {
    /// Validates configuration and builds the clients. No request is sent.
    pub fn connect(aws: &AwsArgs, search: &SearchArgs, embedding: &EmbeddingArgs) -> Result<Self> {
        let credentials = aws.credentials()?;
        let embedder = embedding.embedder(&credentials, aws)?;
        let store = search.store(&credentials, &aws.region)?;
        tracing::debug!(
            access_key = credentials.access_key_id(),
            index = %store.index(),
            model = embedder.model(),
            "configured backends"
        );
        Ok(Self {
            credentials,
            embedder: Arc::new(embedder),
            store: Arc::new(store),
        })
    }

    /// Answer pipeline over these backends.
    pub fn pipeline(
        &self,
        aws: &AwsArgs,
        search: &SearchArgs,
        generation: &GenerationArgs,
    ) -> Result<AnswerPipeline> {
        let llm = generation.provider(&self.credentials, aws)?;
        Ok(
            AnswerPipeline::new(Arc::clone(&self.embedder), Arc::clone(&self.store), llm)
                .with_prompt(generation.prompt())
                .with_sampling(generation.sampling())
                .with_top_k(search.top_k),
        )
    }

    /// Document indexer over these backends.
    pub fn indexer(&self, embedding: &EmbeddingArgs, document: &DocumentArgs) -> Result<DocumentIndexer> {
        Ok(
            DocumentIndexer::new(Arc::clone(&self.embedder), Arc::clone(&self.store))
                .with_splitter(document.splitter()?)
                .with_batch_size(embedding.embedding_batch_size)
                .with_dedupe(document.dedupe),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(flatten)]
        aws: AwsArgs,
        #[command(flatten)]
        search: SearchArgs,
        #[command(flatten)]
        embedding: EmbeddingArgs,
        #[command(flatten)]
        generation: GenerationArgs,
        #[command(flatten)]
        document: DocumentArgs,
    }

    fn parse(args: &[&str]) -> TestCli {
        let mut argv = vec!["test"];
        argv.extend_from_slice(args);
        TestCli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults_match_reference_setup() {
        let cli = parse(&[]);
        assert_eq!(cli.search.top_k, 4);
        assert_eq!(cli.search.search_auth, SearchAuthMode::Sigv4);
        assert_eq!(cli.generation.provider, ProviderKind::Bedrock);
        assert_eq!(cli.generation.sampling(), SamplingParams::default());
        assert_eq!(cli.document.chunk_size, 700);
        assert_eq!(cli.document.chunk_overlap, 70);
        assert!(!cli.document.dedupe);
        assert_eq!(cli.embedding.embedding_max_attempts, 1);
    }

    #[test]
    fn credentials_come_from_flags() {
        let cli = parse(&[
            "--aws-access-key-id",
            "AKID",
            "--aws-secret-access-key",
            "secret",
        ]);
        assert_eq!(cli.aws.credentials().unwrap().access_key_id(), "AKID");
    }

    #[test]
    fn expired_credentials_fail_at_startup() {
        let cli = parse(&[
            "--aws-access-key-id",
            "AKID",
            "--aws-secret-access-key",
            "secret",
            "--credentials-expire-at",
            "2001-01-01T00:00:00Z",
        ]);
        let err = cli.aws.credentials().unwrap_err();
        assert!(err.to_string().contains("expired"));
        let bad = parse(&[
            "--aws-access-key-id",
            "AKID",
            "--aws-secret-access-key",
            "secret",
            "--credentials-expire-at",
            "tomorrow",
        ]);
        assert!(bad.aws.credentials().is_err());
    }

    #[test]
    fn store_requires_host_and_basic_user() {
        let creds = Arc::new(AwsCredentials::new("AKID", "secret", None, None).unwrap());
        let mut cli = parse(&[]);
        cli.search.opensearch_host = None;
        let err = cli.search.store(&creds, "us-east-1").err().unwrap();
        assert!(err.to_string().contains("OPENSEARCH_HOST"));

        let mut cli = parse(&["--opensearch-host", "localhost:9200", "--search-auth", "basic"]);
        cli.search.search_user = None;
        let err = cli.search.store(&creds, "us-east-1").err().unwrap();
        assert!(err.to_string().contains("OPENSEARCH_USER"));

        let cli = parse(&["--opensearch-host", "http://localhost:9200", "--search-auth", "none"]);
        let store = cli.search.store(&creds, "us-east-1").unwrap();
        assert_eq!(store.index().as_str(), DEFAULT_INDEX_NAME);
    }

    #[test]
    fn anthropic_provider_needs_key() {
        let creds = Arc::new(AwsCredentials::new("AKID", "secret", None, None).unwrap());
        let mut cli = parse(&["--provider", "anthropic"]);
        cli.generation.anthropic_api_key = None;
        let err = cli.generation.provider(&creds, &cli.aws).err().unwrap();
        assert!(err.to_string().contains("ANTHROPIC_API_KEY"));
    }

    #[test]
    fn document_location_is_required() {
        let mut cli = parse(&[]);
        cli.document.document = None;
        assert!(cli.document.source().is_err());
        let cli = parse(&["--document", "https://example.com/rules.pdf"]);
        assert!(matches!(
            cli.document.source().unwrap(),
            DocumentSource::Remote(_)
        ));
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let cli = parse(&[
            "--aws-secret-access-key",
            "aws-secret-value",
            "--aws-session-token",
            "session-token-value",
            "--search-password",
            "search-password-value",
            "--anthropic-api-key",
            "anthropic-key-value",
        ]);
        let rendered = format!("{:?}", cli);
        for secret in [
            "aws-secret-value",
            "session-token-value",
            "search-password-value",
            "anthropic-key-value",
        ] {
            assert!(!rendered.contains(secret), "{secret} leaked: {rendered}");
        }
        assert!(rendered.contains("<redacted>"));

        let auth = Auth::Basic {
            user: "admin".into(),
            password: "search-password-value".into(),
        };
        let rendered = format!("{auth:?}");
        assert!(rendered.contains("admin"));
        assert!(!rendered.contains("search-password-value"));
    }
}
