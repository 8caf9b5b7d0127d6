//! # ragserve CLI
//!
//! Commands for ingesting documents into the local vector index, asking
//! one-shot questions, and running the HTTP API.
//!
//! ## Usage
//!
//! ```bash
//! ragserve --config ./ragserve.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragserve ingest <paths>...` | Index local files (pdf, docx, txt) |
//! | `ragserve ingest-text "<text>"` | Index a snippet of raw text |
//! | `ragserve ingest-url <url>` | Fetch and index a single web page |
//! | `ragserve ingest-sitemap <domain>` | Crawl a sitemap and index every page |
//! | `ragserve query "<question>"` | Ask a one-shot question |
//! | `ragserve serve` | Start the JSON HTTP API |
//!
//! The `query`, `serve`, and all `ingest` commands need `OPENAI_API_KEY` in
//! the environment (or in a `.env` file next to the binary).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ragserve::config::{load_config, Config};
use ragserve::embedding::{EmbeddingProvider, OpenAiEmbeddings};
use ragserve::llm::{LlmProvider, OpenAiChat};
use ragserve::server::{run_server, AppState};

/// ragserve — a retrieval-augmented chatbot service over your own documents.
#[derive(Parser)]
#[command(
    name = "ragserve",
    about = "Retrieval-augmented chatbot service over your own documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). Missing file means defaults.
    #[arg(long, global = true, default_value = "./ragserve.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index local files into the vector index.
    ///
    /// Supported formats: pdf, docx, doc, txt. Unchanged files (by content
    /// hash) are skipped; changed files replace their previous chunks.
    Ingest {
        /// Files to index.
        paths: Vec<PathBuf>,
    },

    /// Fetch a web page and index its text content.
    IngestUrl {
        /// Page URL.
        url: String,
    },

    /// Index a snippet of raw text.
    IngestText {
        /// The text to index.
        text: String,

        /// Source label to attribute the text to.
        #[arg(long, default_value = "manual_input")]
        source: String,
    },

    /// Resolve a domain's sitemap and index every page it lists.
    IngestSitemap {
        /// Domain or explicit sitemap URL (e.g. `example.com` or
        /// `https://example.com/sitemap.xml`).
        domain: String,
    },

    /// Ask a one-shot question against the index.
    Query {
        /// The question.
        question: String,
    },

    /// Start the JSON HTTP API.
    ///
    /// Binds to the address configured in `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    // A missing config file is fine; explicit files must parse.
    let cfg = if cli.config.exists() {
        load_config(&cli.config)?
    } else {
        let cfg: Config = toml::from_str("").context("default config")?;
        cfg
    };

    match cli.command {
        Commands::Serve => run_server(&cfg).await?,
        Commands::Ingest { paths } => {
            if paths.is_empty() {
                anyhow::bail!("no files given");
            }
            let state = openai_state(&cfg)?;
            for path in paths {
                let bytes = std::fs::read(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                let name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(str::to_string)
                    .with_context(|| format!("bad filename: {}", path.display()))?;
                match state.ingestor.ingest_file(&name, &bytes).await {
                    Ok(report) if report.skipped_unchanged > 0 => {
                        println!("{name}: unchanged, skipped");
                    }
                    Ok(report) => {
                        println!("{name}: {} chunks indexed", report.chunks_created);
                    }
                    Err(e) => {
                        eprintln!("{name}: {e}");
                    }
                }
            }
        }
        Commands::IngestUrl { url } => {
            let state = openai_state(&cfg)?;
            let report = state.ingestor.ingest_url(&url).await?;
            println!("{url}: {} chunks indexed", report.chunks_created);
        }
        Commands::IngestText { text, source } => {
            let state = openai_state(&cfg)?;
            let report = state.ingestor.ingest_text(&text, Some(&source)).await?;
            println!("{source}: {} chunks indexed", report.chunks_created);
        }
        Commands::IngestSitemap { domain } => {
            let state = openai_state(&cfg)?;
            let report = state.ingestor.ingest_sitemap(&domain).await?;
            println!(
                "{} pages indexed, {} skipped, {} failed, {} chunks",
                report.processed, report.skipped_unchanged, report.failed, report.chunks_created
            );
            for failure in &report.failures {
                eprintln!("  failed: {} ({})", failure.source, failure.error);
            }
        }
        Commands::Query { question } => {
            let state = openai_state(&cfg)?;
            let outcome = state.chain.answer(&question, None, None).await?;
            println!("{}", outcome.answer);
            if !outcome.sources.is_empty() {
                println!("\nSources:");
                for source in &outcome.sources {
                    match source.metadata.page {
                        Some(page) => {
                            println!("  {} (page {})", source.metadata.source, page)
                        }
                        None => println!("  {}", source.metadata.source),
                    }
                }
            }
        }
    }

    Ok(())
}

/// Build the pipeline with OpenAI-backed providers for CLI commands.
fn openai_state(cfg: &Config) -> anyhow::Result<AppState> {
    let embeddings: Arc<dyn EmbeddingProvider> = Arc::new(OpenAiEmbeddings::new(&cfg.embedding)?);
    let llm: Arc<dyn LlmProvider> = Arc::new(OpenAiChat::new(&cfg.llm)?);
    Ok(AppState::new(cfg, embeddings, llm)?)
}
