//! Core data types that flow through the ingestion and query pipelines.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A bounded slice of source text, the unit of retrieval.
///
/// Immutable once created. Owned by the vector index; query paths hand out
/// clones inside [`RetrievalResult`]s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: String,
    pub text: String,
    pub source_uri: String,
    pub page_number: Option<u32>,
    /// Char offset of this chunk's start within the normalized source text.
    pub char_offset: usize,
    /// Position of this chunk within its source, contiguous from 0.
    pub chunk_index: usize,
}

impl DocumentChunk {
    pub fn new(
        text: String,
        source_uri: &str,
        page_number: Option<u32>,
        char_offset: usize,
        chunk_index: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text,
            source_uri: source_uri.to_string(),
            page_number,
            char_offset,
            chunk_index,
        }
    }
}

/// Plain-text record produced by the content normalizer, one per logical
/// unit of a source (PDFs yield one per page, everything else exactly one).
#[derive(Debug, Clone)]
pub struct NormalizedDocument {
    pub text: String,
    pub source_uri: String,
    pub page_number: Option<u32>,
}

/// A chunk with its similarity score, produced per query. Ephemeral.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub chunk: DocumentChunk,
    pub score: f32,
}

/// Role of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Source attribution returned alongside an answer. `content` is capped to a
/// snippet; `metadata` carries the source uri and optional page number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    pub content: String,
    pub metadata: SourceMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

/// Answer plus the chunks that were actually included in the prompt.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub answer: String,
    pub sources: Vec<SourceDocument>,
}

/// Aggregate result of a (possibly multi-source) ingestion operation.
///
/// Per-item failures are isolated: one failing source never prevents others
/// from succeeding, and both sides are reported.
#[derive(Debug, Default, Clone, Serialize)]
pub struct IngestReport {
    pub processed: usize,
    pub failed: usize,
    pub chunks_created: usize,
    pub skipped_unchanged: usize,
    pub sources: Vec<String>,
    pub failures: Vec<IngestFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestFailure {
    pub source: String,
    pub error: String,
}

impl IngestReport {
    pub fn merge(&mut self, other: IngestReport) {
        self.processed += other.processed;
        self.failed += other.failed;
        self.chunks_created += other.chunks_created;
        self.skipped_unchanged += other.skipped_unchanged;
        self.sources.extend(other.sources);
        self.failures.extend(other.failures);
    }
}
