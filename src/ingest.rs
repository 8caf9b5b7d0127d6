//! Ingestion pipeline: normalize, dedupe, chunk, embed, index, persist.
//!
//! Every source is tracked in a sidecar record file next to the index. The
//! record maps a source id to the sha256 of its normalized text; re-ingesting
//! an unchanged source is a no-op, while a changed source has its old chunks
//! deleted and replaced wholesale. Batch URL ingestion runs the fetches
//! concurrently under a semaphore; individual failures are collected into
//! the report rather than aborting the batch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, Semaphore};
use tracing::{info, warn};

use crate::chunker::Chunker;
use crate::config::IngestionConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::index::VectorIndex;
use crate::models::{IngestFailure, IngestReport, NormalizedDocument};
use crate::normalize;
use crate::sitemap::SitemapResolver;

// ============ Ingestion records ============

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SourceRecord {
    content_hash: String,
    last_processed_at: DateTime<Utc>,
}

/// Sidecar file tracking which sources have been ingested and the hash of
/// their content at the time. Lives next to the index snapshot.
struct IngestionRecords {
    path: PathBuf,
    records: HashMap<String, SourceRecord>,
}

impl IngestionRecords {
    fn open(path: PathBuf) -> Self {
        let records = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(records) => records,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "corrupt ingestion records, starting fresh");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        Self { path, records }
    }

    fn is_unchanged(&self, source: &str, hash: &str) -> bool {
        self.records
            .get(source)
            .is_some_and(|r| r.content_hash == hash)
    }

    fn update(&mut self, source: &str, hash: &str) {
        self.records.insert(
            source.to_string(),
            SourceRecord {
                content_hash: hash.to_string(),
                last_processed_at: Utc::now(),
            },
        );
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec(&self.records)
            .map_err(|e| RagError::Persist(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Path of the ingestion-record sidecar for a given index snapshot path.
fn records_path(index_path: &Path) -> PathBuf {
    index_path.with_extension("ingested.json")
}

fn content_hash(docs: &[NormalizedDocument]) -> String {
    let mut hasher = Sha256::new();
    for doc in docs {
        hasher.update(doc.text.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

// ============ Pipeline ============

pub struct Ingestor {
    chunker: Chunker,
    embeddings: Arc<dyn EmbeddingProvider>,
    index: Arc<VectorIndex>,
    records: Mutex<IngestionRecords>,
    client: reqwest::Client,
    fetch_timeout: Duration,
    max_concurrency: usize,
}

impl Ingestor {
    pub fn new(
        chunker: Chunker,
        embeddings: Arc<dyn EmbeddingProvider>,
        index: Arc<VectorIndex>,
        index_path: &Path,
        config: &IngestionConfig,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| RagError::Config(format!("http client: {e}")))?;

        Ok(Self {
            chunker,
            embeddings,
            index,
            records: Mutex::new(IngestionRecords::open(records_path(index_path))),
            client,
            fetch_timeout: Duration::from_secs(config.fetch_timeout_secs),
            max_concurrency: config.max_concurrency.max(1),
        })
    }

    /// Ingest an uploaded file. The filename doubles as the source id.
    pub async fn ingest_file(&self, filename: &str, bytes: &[u8]) -> Result<IngestReport> {
        let docs = normalize::normalize_file(filename, bytes)?;
        self.ingest_documents(filename, docs).await
    }

    /// Ingest raw text pasted by a client.
    pub async fn ingest_text(&self, text: &str, source: Option<&str>) -> Result<IngestReport> {
        let doc = normalize::normalize_text(text, source);
        if doc.text.trim().is_empty() {
            return Err(RagError::Parse("empty text".into()));
        }
        let source_uri = doc.source_uri.clone();
        self.ingest_documents(&source_uri, vec![doc]).await
    }

    /// Fetch and ingest a single web page.
    pub async fn ingest_url(&self, url: &str) -> Result<IngestReport> {
        let doc = normalize::normalize_url(&self.client, url, self.fetch_timeout).await?;
        self.ingest_documents(url, vec![doc]).await
    }

    /// Resolve a domain's sitemap and ingest every page it lists. Page
    /// failures are collected in the report; only sitemap resolution itself
    /// is fatal.
    pub async fn ingest_sitemap(&self, domain_or_url: &str) -> Result<IngestReport> {
        let resolver = SitemapResolver::new(self.client.clone(), self.fetch_timeout);
        let urls = resolver.resolve_urls(domain_or_url).await?;
        info!(domain = domain_or_url, pages = urls.len(), "sitemap resolved");
        Ok(self.ingest_urls(urls).await)
    }

    /// Ingest a batch of URLs concurrently, bounded by the configured limit.
    pub async fn ingest_urls(&self, urls: Vec<String>) -> IngestReport {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut report = IngestReport::default();

        let mut tasks = tokio::task::JoinSet::new();
        for url in urls {
            let permit = semaphore.clone();
            let client = self.client.clone();
            let timeout = self.fetch_timeout;
            tasks.spawn(async move {
                // Closed-semaphore errors cannot happen; the semaphore
                // outlives every permit request here.
                let _permit = permit.acquire_owned().await;
                let result = normalize::normalize_url(&client, &url, timeout).await;
                (url, result)
            });
        }

        // Fetches overlap; indexing is serialized per source afterwards.
        let mut fetched = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(pair) => fetched.push(pair),
                Err(e) => warn!(error = %e, "fetch task panicked"),
            }
        }
        for (url, result) in fetched {
            match result {
                Ok(doc) => match self.ingest_documents(&url, vec![doc]).await {
                    Ok(one) => report.merge(one),
                    Err(e) => {
                        warn!(url, error = %e, "failed to index page");
                        report.failed += 1;
                        report.failures.push(IngestFailure {
                            source: url,
                            error: e.to_string(),
                        });
                    }
                },
                Err(e) => {
                    warn!(url, error = %e, "failed to fetch page");
                    report.failed += 1;
                    report.failures.push(IngestFailure {
                        source: url,
                        error: e.to_string(),
                    });
                }
            }
        }
        report
    }

    /// Shared tail of every ingestion path: hash-check, chunk, embed, index,
    /// persist, record.
    async fn ingest_documents(
        &self,
        source: &str,
        docs: Vec<NormalizedDocument>,
    ) -> Result<IngestReport> {
        let hash = content_hash(&docs);

        {
            let records = self.records.lock().await;
            if records.is_unchanged(source, &hash) {
                info!(source, "source unchanged, skipping");
                return Ok(IngestReport {
                    skipped_unchanged: 1,
                    sources: vec![source.to_string()],
                    ..Default::default()
                });
            }
        }

        let mut chunks = Vec::new();
        for doc in &docs {
            chunks.extend(self.chunker.chunk(&doc.text, &doc.source_uri, doc.page_number));
        }
        if chunks.is_empty() {
            return Err(RagError::Parse(format!("{source}: no chunkable text")));
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embeddings.embed(&texts).await?;

        // Replace, never append, when a source is re-ingested.
        let removed = self.index.delete_by_source(source).await;
        if removed > 0 {
            info!(source, removed, "replacing stale chunks");
        }

        let chunk_count = chunks.len();
        self.index.add(chunks, vectors).await?;
        self.index.persist().await?;

        {
            let mut records = self.records.lock().await;
            records.update(source, &hash);
            records.save()?;
        }

        info!(source, chunks = chunk_count, "source ingested");
        Ok(IngestReport {
            processed: 1,
            chunks_created: chunk_count,
            sources: vec![source.to_string()],
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IngestionConfig;
    use crate::embedding::HashEmbeddings;

    fn ingestor(dir: &Path) -> Ingestor {
        let index_path = dir.join("index.json");
        Ingestor::new(
            Chunker::new(100, 20).unwrap(),
            Arc::new(HashEmbeddings::new(32)),
            Arc::new(VectorIndex::open(&index_path)),
            &index_path,
            &IngestionConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn text_ingestion_creates_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let ing = ingestor(dir.path());

        let report = ing
            .ingest_text("The quick brown fox jumps over the lazy dog.", Some("note"))
            .await
            .unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.chunks_created, 1);
        assert_eq!(report.sources, vec!["note"]);
        assert_eq!(ing.index.len().await, 1);
    }

    #[tokio::test]
    async fn empty_text_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ing = ingestor(dir.path());
        let err = ing.ingest_text("   \n  ", None).await.unwrap_err();
        assert!(matches!(err, RagError::Parse(_)));
    }

    #[tokio::test]
    async fn unchanged_source_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let ing = ingestor(dir.path());

        let first = ing.ingest_text("same content", Some("doc")).await.unwrap();
        assert_eq!(first.processed, 1);

        let second = ing.ingest_text("same content", Some("doc")).await.unwrap();
        assert_eq!(second.processed, 0);
        assert_eq!(second.skipped_unchanged, 1);
        assert_eq!(ing.index.len().await, 1);
    }

    #[tokio::test]
    async fn changed_source_replaces_old_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let ing = ingestor(dir.path());

        ing.ingest_text("original version", Some("doc")).await.unwrap();
        let before = ing.index.len().await;

        ing.ingest_text("revised version, different text", Some("doc"))
            .await
            .unwrap();
        assert_eq!(ing.index.len().await, before);

        let q = ing
            .embeddings
            .embed(&["revised version, different text".to_string()])
            .await
            .unwrap();
        let hits = ing.index.search(&q[0], 1).await.unwrap();
        assert_eq!(hits[0].chunk.text, "revised version, different text");
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let ing = ingestor(dir.path());
            ing.ingest_text("persisted content", Some("doc")).await.unwrap();
        }
        // A new ingestor over the same paths sees the prior record.
        let ing = ingestor(dir.path());
        let report = ing
            .ingest_text("persisted content", Some("doc"))
            .await
            .unwrap();
        assert_eq!(report.skipped_unchanged, 1);
    }

    #[tokio::test]
    async fn unsupported_file_extension_fails() {
        let dir = tempfile::tempdir().unwrap();
        let ing = ingestor(dir.path());
        let err = ing.ingest_file("image.png", b"\x89PNG").await.unwrap_err();
        assert!(matches!(err, RagError::UnsupportedFormat(_)));
    }

    #[tokio::test]
    async fn txt_file_ingestion_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let ing = ingestor(dir.path());
        let report = ing
            .ingest_file("readme.txt", b"A plain text document about gardens.")
            .await
            .unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.sources, vec!["readme.txt"]);
    }

    #[test]
    fn hash_is_order_and_boundary_sensitive() {
        let doc = |text: &str| NormalizedDocument {
            text: text.to_string(),
            source_uri: "s".into(),
            page_number: None,
        };
        let ab = content_hash(&[doc("a"), doc("b")]);
        let ba = content_hash(&[doc("b"), doc("a")]);
        let joined = content_hash(&[doc("ab")]);
        assert_ne!(ab, ba);
        assert_ne!(ab, joined);
    }
}
