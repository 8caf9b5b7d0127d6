//! In-memory vector index with JSON snapshot persistence.
//!
//! Brute-force cosine similarity over a parallel array of chunks and
//! vectors. The chunk list and the vector list are a single `Vec` of
//! [`VectorEntry`], so they cannot diverge in length; adds and deletes
//! happen atomically under one write lock. Searches take the read lock and
//! may run concurrently.
//!
//! `load` on a missing or corrupt snapshot yields an empty index with a
//! warning rather than failing startup.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::embedding::cosine_similarity;
use crate::error::{RagError, Result};
use crate::models::{DocumentChunk, RetrievalResult};

/// Snapshot format version; bumped on incompatible layout changes.
const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorEntry {
    pub chunk: DocumentChunk,
    pub embedding: Vec<f32>,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    entries: Vec<VectorEntry>,
}

pub struct VectorIndex {
    entries: RwLock<Vec<VectorEntry>>,
    path: PathBuf,
}

impl VectorIndex {
    /// Create an index persisted at `path`, loading an existing snapshot if
    /// one is present and readable.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = load_snapshot(&path);
        Self {
            entries: RwLock::new(entries),
            path,
        }
    }

    /// Create an empty index persisted at `path`, ignoring any snapshot.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            path: path.into(),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Append chunks and their embeddings, aligned by position. The append
    /// is all-or-nothing: validation happens before the index is touched.
    pub async fn add(&self, chunks: Vec<DocumentChunk>, embeddings: Vec<Vec<f32>>) -> Result<()> {
        if chunks.len() != embeddings.len() {
            return Err(RagError::Config(format!(
                "chunk/embedding count mismatch: {} chunks, {} embeddings",
                chunks.len(),
                embeddings.len()
            )));
        }

        let mut entries = self.entries.write().await;

        if let Some(expected) = entries.first().map(|e| e.embedding.len()) {
            if let Some(v) = embeddings.iter().find(|v| v.len() != expected) {
                return Err(RagError::Config(format!(
                    "embedding dimension mismatch: index has {}, got {}",
                    expected,
                    v.len()
                )));
            }
        }

        entries.extend(
            chunks
                .into_iter()
                .zip(embeddings)
                .map(|(chunk, embedding)| VectorEntry { chunk, embedding }),
        );
        Ok(())
    }

    /// Top-`k` entries by descending cosine similarity. Ties resolve to the
    /// earliest-added entry. `k` larger than the index returns everything.
    /// A query whose dimension differs from the indexed vectors is a
    /// `Retrieval` error, not a silent zero-score result.
    pub async fn search(&self, query: &[f32], k: usize) -> Result<Vec<RetrievalResult>> {
        let entries = self.entries.read().await;

        if let Some(expected) = entries.first().map(|e| e.embedding.len()) {
            if query.len() != expected {
                return Err(RagError::Retrieval(format!(
                    "query dimension mismatch: index has {}, got {}",
                    expected,
                    query.len()
                )));
            }
        }

        let mut scored: Vec<(usize, f32)> = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, cosine_similarity(query, &e.embedding)))
            .collect();

        // Stable ordering: score desc, insertion order asc on ties.
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(k.min(entries.len()));

        Ok(scored
            .into_iter()
            .map(|(i, score)| RetrievalResult {
                chunk: entries[i].chunk.clone(),
                score,
            })
            .collect())
    }

    /// Remove every entry whose `source_uri` equals `source` or starts with
    /// it (domain-prefix deletes). Returns the number removed.
    pub async fn delete_by_source(&self, source: &str) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|e| {
            e.chunk.source_uri != source && !e.chunk.source_uri.starts_with(source)
        });
        before - entries.len()
    }

    /// Distinct source URIs currently indexed.
    pub async fn sources(&self) -> Vec<String> {
        let entries = self.entries.read().await;
        let mut sources: Vec<String> = entries.iter().map(|e| e.chunk.source_uri.clone()).collect();
        sources.sort();
        sources.dedup();
        sources
    }

    /// Write the full index to disk. The snapshot is written to a temp file
    /// and renamed, so a crash mid-write never corrupts the previous one.
    pub async fn persist(&self) -> Result<()> {
        let entries = self.entries.read().await;
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            entries: entries.clone(),
        };
        drop(entries);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_vec(&snapshot)
            .map_err(|e| RagError::Persist(e.to_string()))?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;

        info!(path = %self.path.display(), entries = snapshot.entries.len(), "index persisted");
        Ok(())
    }
}

fn load_snapshot(path: &Path) -> Vec<VectorEntry> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "no index snapshot, starting empty");
            return Vec::new();
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read index snapshot, starting empty");
            return Vec::new();
        }
    };

    match serde_json::from_slice::<Snapshot>(&bytes) {
        Ok(snapshot) if snapshot.version == SNAPSHOT_VERSION => {
            info!(
                path = %path.display(),
                entries = snapshot.entries.len(),
                "index snapshot loaded"
            );
            snapshot.entries
        }
        Ok(snapshot) => {
            warn!(
                version = snapshot.version,
                "unsupported index snapshot version, starting empty"
            );
            Vec::new()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "corrupt index snapshot, starting empty");
            Vec::new()
        }
    }
}
