use anyhow::{Context, Result};
use clap::Parser;
use docqa::config::{
    init_tracing, AwsArgs, Backends, DocumentArgs, EmbeddingArgs, LogArgs, SearchArgs,
};
use docqa::load_document;

#[derive(Parser, Debug)]
#[command(
    name = "docqa-index",
    about = "Split a PDF, embed its chunks with Bedrock and append them to OpenSearch"
)]
struct IndexCli {
    #[command(flatten)]
    aws: AwsArgs,

    #[command(flatten)]
    search: SearchArgs,

    #[command(flatten)]
    embedding: EmbeddingArgs,

    #[command(flatten)]
    document: DocumentArgs,

    #[command(flatten)]
    log: LogArgs,
}

fn main() -> Result<()> {
    let cli = IndexCli::parse();
    init_tracing(&cli.log);

    let source = cli.document.source()?;
    let backends = Backends::connect(&cli.aws, &cli.search, &cli.embedding)?;
    let indexer = backends.indexer(&cli.embedding, &cli.document)?;

    let document = load_document(&source, cli.document.download_timeout())
        .with_context(|| format!("failed to load {source}"))?;
    let report = indexer.index_document(&document)?;
    let total = backends.store.count().context("failed to count indexed chunks")?;

    if report.skipped_duplicate {
        println!(
            "{} is already indexed; nothing written ({} chunks in index)",
            report.source, total
        );
    } else {
        println!(
            "indexed {} of {} chunks from {} ({} pages); index now holds {} chunks",
            report.chunks_indexed,
            report.chunks_split,
            report.source,
            document.pages.len(),
            total
        );
    }
    Ok(())
}
