use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use clap::Parser;
use docqa::config::{
    init_tracing, AwsArgs, Backends, EmbeddingArgs, GenerationArgs, LogArgs, SearchArgs,
};
use docqa::{render_context, validate_question, AnswerPipeline};

#[derive(Parser, Debug)]
#[command(
    name = "docqa-ask",
    about = "Answer questions about the indexed document (one-shot or interactive)"
)]
struct AskCli {
    /// Question to answer; omit to read questions from stdin
    #[arg(long)]
    query: Option<String>,

    /// Print the retrieved chunks before the answer
    #[arg(long, default_value_t = false)]
    show_context: bool,

    #[command(flatten)]
    aws: AwsArgs,

    #[command(flatten)]
    search: SearchArgs,

    #[command(flatten)]
    embedding: EmbeddingArgs,

    #[command(flatten)]
    generation: GenerationArgs,

    #[command(flatten)]
    log: LogArgs,
}

fn main() -> Result<()> {
    let cli = AskCli::parse();
    init_tracing(&cli.log);

    if let Some(query) = cli.query.as_deref() {
        // nothing remote is configured for an empty question
        if let Err(err) = validate_question(query) {
            println!("warning: {err}");
            return Ok(());
        }
        let pipeline = build_pipeline(&cli)?;
        return ask(&pipeline, query, cli.show_context);
    }

    let pipeline = build_pipeline(&cli)?;
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        eprint!("question> ");
        io::stderr().flush().ok();
        let Some(line) = lines.next() else {
            break;
        };
        let line = line.context("failed to read question from stdin")?;
        if matches!(line.trim(), "exit" | "quit") {
            break;
        }
        if let Err(err) = validate_question(&line) {
            println!("warning: {err}");
            continue;
        }
        ask(&pipeline, &line, cli.show_context)?;
    }
    Ok(())
}

fn build_pipeline(cli: &AskCli) -> Result<AnswerPipeline> {
    let backends = Backends::connect(&cli.aws, &cli.search, &cli.embedding)?;
    backends.pipeline(&cli.aws, &cli.search, &cli.generation)
}

fn ask(pipeline: &AnswerPipeline, question: &str, show_context: bool) -> Result<()> {
    let answer = pipeline.answer(question, &[])?;
    if show_context {
        println!("--- Retrieved Context ---\n{}", render_context(&answer.context));
    }
    println!("--- Answer ---\n{}", answer.answer.trim());
    Ok(())
}
