//! Crate-wide error taxonomy.
//!
//! Per-source ingestion failures (`UnsupportedFormat`, `Parse`, `Fetch`,
//! `SitemapNotFound`, `SitemapParse`) are collected by batch callers and must
//! never abort a multi-source operation. `Config` errors are fatal at
//! startup. `Generation` errors are surfaced to the caller as-is — there is
//! no silent fallback to an ungrounded answer.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    /// Invalid configuration (bad chunk sizes, zero top-k, mismatched
    /// embedding dimensions). Fatal where it occurs.
    #[error("configuration error: {0}")]
    Config(String),

    /// File extension or content type we do not know how to normalize.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Corrupt or unreadable source content.
    #[error("parse error: {0}")]
    Parse(String),

    /// Network or HTTP failure while fetching a remote source.
    #[error("fetch error: {0}")]
    Fetch(String),

    /// The root sitemap fetch returned 404.
    #[error("sitemap not found: {0}")]
    SitemapNotFound(String),

    /// The sitemap body was not valid sitemap XML.
    #[error("sitemap parse error: {0}")]
    SitemapParse(String),

    /// Retrieval could not run, e.g. the query embedding's dimension does
    /// not match the indexed vectors.
    #[error("retrieval error: {0}")]
    Retrieval(String),

    /// The LLM call failed or timed out.
    #[error("generation error: {0}")]
    Generation(String),

    /// Embedding provider failure after retries were exhausted.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Failure persisting or loading durable state (index snapshot,
    /// ingestion records).
    #[error("persistence error: {0}")]
    Persist(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RagError {
    /// Machine-readable code used in HTTP error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            RagError::Config(_) => "config_error",
            RagError::UnsupportedFormat(_) => "unsupported_format",
            RagError::Parse(_) => "parse_error",
            RagError::Fetch(_) => "fetch_error",
            RagError::SitemapNotFound(_) => "sitemap_not_found",
            RagError::SitemapParse(_) => "sitemap_parse_error",
            RagError::Retrieval(_) => "retrieval_error",
            RagError::Generation(_) => "generation_error",
            RagError::Embedding(_) => "embedding_error",
            RagError::Persist(_) => "persistence_error",
            RagError::Io(_) => "io_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, RagError>;
