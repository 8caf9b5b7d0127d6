//! Retrieval-augmented answering.
//!
//! The chain ties retrieval, session memory, and generation together: embed
//! the question, pull the top chunks, assemble a context block under the
//! character budget, and hand the system prompt plus session history to the
//! LLM. Server-side session memory is authoritative; history sent by the
//! client only seeds sessions the server has not seen.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::RetrievalConfig;
use crate::embedding::{embed_query, EmbeddingProvider};
use crate::error::Result;
use crate::index::VectorIndex;
use crate::llm::{LlmProvider, DEFAULT_SYSTEM_PROMPT, GENERAL_KNOWLEDGE_SUFFIX};
use crate::models::{ChatOutcome, ChatTurn, RetrievalResult, SourceDocument, SourceMetadata};
use crate::session::SessionStore;

/// Fixed reply when the index is empty and general knowledge is disabled.
/// No LLM call is made in that case.
pub const NO_CONTEXT_ANSWER: &str =
    "I don't have any documents to search yet. Please ingest some documents first.";

/// Cap on the content echoed back per source in the response payload.
const SOURCE_CONTENT_CAP: usize = 500;

pub struct RagChain {
    embeddings: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn LlmProvider>,
    index: Arc<VectorIndex>,
    sessions: Arc<SessionStore>,
    retrieval: RetrievalConfig,
}

impl RagChain {
    pub fn new(
        embeddings: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LlmProvider>,
        index: Arc<VectorIndex>,
        sessions: Arc<SessionStore>,
        retrieval: RetrievalConfig,
    ) -> Self {
        Self {
            embeddings,
            llm,
            index,
            sessions,
            retrieval,
        }
    }

    /// Answer `question` for the given session. `external_history` is used
    /// only when the server has no memory of the session yet.
    pub async fn answer(
        &self,
        question: &str,
        session_id: Option<&str>,
        external_history: Option<Vec<ChatTurn>>,
    ) -> Result<ChatOutcome> {
        if let (Some(id), Some(turns)) = (session_id, external_history) {
            if turns.is_empty() {
                // nothing to seed
            } else if self.sessions.has_history(id).await {
                debug!(session = id, "ignoring client history, session already has turns");
            } else {
                debug!(session = id, turns = turns.len(), "seeding fresh session from client history");
                self.sessions.seed(id, turns).await;
            }
        }

        if self.index.is_empty().await {
            if !self.retrieval.allow_general_knowledge {
                info!("chat on empty index, returning fixed answer");
                return Ok(ChatOutcome {
                    answer: NO_CONTEXT_ANSWER.to_string(),
                    sources: Vec::new(),
                });
            }
            return self.generate(question, session_id, &[], true).await;
        }

        let query_vec = embed_query(self.embeddings.as_ref(), question).await?;
        let retrieved = self.index.search(&query_vec, self.retrieval.top_k).await?;
        let admitted = admit_within_budget(retrieved, self.retrieval.context_char_budget);
        debug!(admitted = admitted.len(), "context assembled");

        self.generate(
            question,
            session_id,
            &admitted,
            self.retrieval.allow_general_knowledge,
        )
        .await
    }

    async fn generate(
        &self,
        question: &str,
        session_id: Option<&str>,
        context: &[RetrievalResult],
        general_knowledge: bool,
    ) -> Result<ChatOutcome> {
        let mut system = DEFAULT_SYSTEM_PROMPT.to_string();
        if general_knowledge {
            system.push_str(GENERAL_KNOWLEDGE_SUFFIX);
        }
        if !context.is_empty() {
            system.push_str("\n\nContext:\n");
            system.push_str(&render_context(context));
        }

        let history = match session_id {
            Some(id) => self.sessions.history(id).await,
            None => Vec::new(),
        };

        let answer = self.llm.generate(&system, &history, question).await?;

        if let Some(id) = session_id {
            self.sessions.append_exchange(id, question, &answer).await;
        }

        let sources = context
            .iter()
            .map(|r| SourceDocument {
                content: cap_chars(&r.chunk.text, SOURCE_CONTENT_CAP),
                metadata: SourceMetadata {
                    source: r.chunk.source_uri.clone(),
                    page: r.chunk.page_number,
                },
            })
            .collect();

        Ok(ChatOutcome { answer, sources })
    }
}

/// Keep retrieved chunks, best score first, while the running total of chunk
/// characters stays within `budget`. The first chunk is always admitted even
/// if it alone exceeds the budget, so the answer never loses its best match.
fn admit_within_budget(retrieved: Vec<RetrievalResult>, budget: usize) -> Vec<RetrievalResult> {
    let mut admitted = Vec::new();
    let mut used = 0usize;
    for result in retrieved {
        let len = result.chunk.text.chars().count();
        if !admitted.is_empty() && used + len > budget {
            break;
        }
        used += len;
        admitted.push(result);
    }
    admitted
}

fn render_context(context: &[RetrievalResult]) -> String {
    context
        .iter()
        .map(|r| {
            let page = r
                .chunk
                .page_number
                .map(|p| format!(", page {p}"))
                .unwrap_or_default();
            format!("[Source: {}{}]\n{}", r.chunk.source_uri, page, r.chunk.text)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn cap_chars(text: &str, cap: usize) -> String {
    if text.chars().count() <= cap {
        text.to_string()
    } else {
        text.chars().take(cap).collect()
    }
}
