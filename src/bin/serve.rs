use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use clap::Parser;
use docqa::config::{
    init_tracing, AwsArgs, Backends, DocumentArgs, EmbeddingArgs, GenerationArgs, LogArgs,
    SearchArgs,
};
use docqa::{load_document, validate_question, Answer, AnswerPipeline, RetrievedChunk};
use serde::{Deserialize, Serialize};

#[derive(Parser, Debug)]
#[command(
    name = "docqa-serve",
    about = "Serve a single-page question form and a JSON ask API over the indexed document"
)]
struct ServeCli {
    /// Address to bind the HTTP server to
    #[arg(long, env = "DOCQA_BIND", default_value = "127.0.0.1:8080")]
    bind: String,

    /// Index the configured document once before serving
    #[arg(long, default_value_t = false)]
    index_on_start: bool,

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

    #[command(flatten)]
    log: LogArgs,
}

#[derive(Clone)]
struct AppState {
    pipeline: Arc<AnswerPipeline>,
    topic: Arc<String>,
}

#[derive(Debug, Deserialize)]
struct AskForm {
    #[serde(default)]
    question: String,
}

#[derive(Debug, Deserialize)]
struct AskRequest {
    question: String,
    #[serde(default)]
    include_context: bool,
}

#[derive(Debug, Serialize)]
struct AskResponse {
    question: String,
    answer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<Vec<RetrievedChunk>>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

fn main() -> Result<()> {
    let cli = ServeCli::parse();
    init_tracing(&cli.log);

    // blocking clients are created and dropped outside the async runtime
    let backends = Backends::connect(&cli.aws, &cli.search, &cli.embedding)?;
    if cli.index_on_start {
        let source = cli.document.source()?;
        let document = load_document(&source, cli.document.download_timeout())
            .with_context(|| format!("failed to load {source}"))?;
        let report = backends
            .indexer(&cli.embedding, &cli.document)?
            .index_document(&document)?;
        tracing::info!(
            chunks = report.chunks_indexed,
            skipped = report.skipped_duplicate,
            "startup indexing finished"
        );
    }
    let pipeline = Arc::new(backends.pipeline(&cli.aws, &cli.search, &cli.generation)?);
    let state = AppState {
        pipeline: Arc::clone(&pipeline),
        topic: Arc::new(cli.generation.topic.clone()),
    };

    let addr: SocketAddr = cli
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", cli.bind))?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(serve(addr, state))?;
    drop(runtime);
    drop(pipeline);
    Ok(())
}

async fn serve(addr: SocketAddr, state: AppState) -> Result<()> {
    let app = Router::new()
        .route("/", get(index_page).post(form_handler))
        .route("/healthz", get(healthz))
        .route("/v1/ask", post(ask_handler))
        .with_state(state);

    println!("docqa-serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server shutdown")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for ctrl+c");
        std::future::pending::<()>().await;
    }
    tracing::info!("received shutdown signal");
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn index_page(State(state): State<AppState>) -> Html<String> {
    Html(render_page(&state.topic, "", None))
}

async fn form_handler(
    State(state): State<AppState>,
    Form(form): Form<AskForm>,
) -> (StatusCode, Html<String>) {
    if let Err(err) = validate_question(&form.question) {
        let body = Outcome::Warning(err.to_string());
        return (
            StatusCode::OK,
            Html(render_page(&state.topic, &form.question, Some(body))),
        );
    }
    match run_pipeline(&state, form.question.clone()).await {
        Ok(answer) => (
            StatusCode::OK,
            Html(render_page(
                &state.topic,
                &form.question,
                Some(Outcome::Answer(answer.answer)),
            )),
        ),
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "answer failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html(render_page(
                    &state.topic,
                    &form.question,
                    Some(Outcome::Error(format!("{err:#}"))),
                )),
            )
        }
    }
}

async fn ask_handler(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>, (StatusCode, Json<ErrorBody>)> {
    if let Err(err) = validate_question(&request.question) {
        return Err(bad_request(err.to_string()));
    }
    let answer = run_pipeline(&state, request.question)
        .await
        .map_err(internal_error)?;
    Ok(Json(AskResponse {
        question: answer.question,
        answer: answer.answer,
        context: request.include_context.then_some(answer.context),
    }))
}

async fn run_pipeline(state: &AppState, question: String) -> Result<Answer> {
    let pipeline = Arc::clone(&state.pipeline);
    tokio::task::spawn_blocking(move || pipeline.answer(&question, &[]))
        .await
        .map_err(|err| anyhow!("answer task join error: {err}"))?
}

fn bad_request(message: impl Into<String>) -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
}

fn internal_error(err: anyhow::Error) -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            message: format!("{err:#}"),
        }),
    )
}

enum Outcome {
    Answer(String),
    Warning(String),
    Error(String),
}

fn render_page(topic: &str, question: &str, outcome: Option<Outcome>) -> String {
    let result = match outcome {
        Some(Outcome::Answer(text)) => format!(
            "<section class=\"answer\"><h2>Answer</h2><p>{}</p></section>",
            escape_html(text.trim())
        ),
        Some(Outcome::Warning(text)) => {
            format!("<p class=\"warning\">{}</p>", escape_html(&text))
        }
        Some(Outcome::Error(text)) => format!("<p class=\"error\">{}</p>", escape_html(&text)),
        None => String::new(),
    };
    format!(
        "<!doctype html>\n<html><head><meta charset=\"utf-8\"><title>docqa</title>\
         <style>body{{font-family:sans-serif;max-width:48rem;margin:2rem auto}}\
         textarea{{width:100%;height:6rem}}.warning{{color:#a60}}.error{{color:#b00}}</style>\
         </head><body><h1>Ask about {topic}</h1>\
         <form method=\"post\" action=\"/\"><textarea name=\"question\">{question}</textarea>\
         <p><button type=\"submit\">Ask</button></p></form>{result}</body></html>",
        topic = escape_html(topic),
        question = escape_html(question),
    )
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup() {
        assert_eq!(
            escape_html("<b>\"fines\" & 'tolls'</b>"),
            "&lt;b&gt;&quot;fines&quot; &amp; &#39;tolls&#39;&lt;/b&gt;"
        );
    }

    #[test]
    fn page_shows_warning_and_keeps_question() {
        let page = render_page(
            "parking",
            "  ",
            Some(Outcome::Warning("please enter a question before submitting".into())),
        );
        assert!(page.contains("class=\"warning\""));
        assert!(page.contains("please enter a question before submitting"));
        assert!(page.contains("Ask about parking"));
    }

    #[test]
    fn empty_page_has_form_only() {
        let page = render_page("parking", "", None);
        assert!(page.contains("<form method=\"post\""));
        assert!(!page.contains("class=\"answer\""));
    }
}
