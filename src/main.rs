use anyhow::Result;
use clap::Parser;
use docx_review::cache::ResponseCache;
use docx_review::llm::OpenAiClient;
use docx_review::reviewer::{reviewed_path, DocxReviewer};
use log::info;

/// Review a .docx document and annotate proposed corrections as comments.
#[derive(Debug, Parser)]
#[command(name = "docx-review", version, about)]
struct Args {
    /// Path to the .docx document to review
    document_path: String,

    /// Model to use for the review
    #[arg(long, default_value = "gemma3:12b")]
    model: String,

    /// Base URL of an OpenAI-compatible chat-completions API
    #[arg(long, env = "LLM_BASE_URL", default_value = "http://localhost:11434/v1")]
    base_url: String,

    /// API key for the LLM provider
    #[arg(long, env = "LLM_API_KEY")]
    api_key: Option<String>,

    /// Optional context to add to the review prompt
    #[arg(long)]
    context: Option<String>,

    /// Directory where model responses are cached
    #[arg(long, default_value = ".review_cache")]
    cache_location: String,

    /// Author name recorded on the generated comments
    #[arg(long, default_value = "Reviewer")]
    author: String,

    /// Enable verbose DEBUG level logging to console
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .format_target(false)
        .init();

    info!(
        "Starting review of '{}' using model '{}'",
        args.document_path, args.model
    );
    let cache = ResponseCache::open(&args.cache_location)?;
    let mut provider = OpenAiClient::new(
        &args.model,
        &args.base_url,
        args.api_key,
        args.context,
        cache,
    );

    let mut reviewer = DocxReviewer::open(&args.document_path, &args.author)?;
    let summary = reviewer.review(&mut provider)?;
    info!(
        "Document review finished: {} units reviewed, {} comments added, {} failures.",
        summary.units_reviewed, summary.comments_added, summary.failures
    );

    let output_path = reviewed_path(&args.document_path);
    info!("Saving reviewed document to '{output_path}'");
    reviewer.save(&output_path)?;
    info!("Document saved.");

    Ok(())
}
