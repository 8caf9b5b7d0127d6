//! JSON HTTP API for chat and ingestion.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/chat` | Ask a question, optionally within a session |
//! | `POST` | `/ingest/file` | Upload documents (multipart, pdf/docx/txt) |
//! | `POST` | `/ingest/text` | Ingest raw text |
//! | `POST` | `/ingest/url` | Fetch and ingest a single web page |
//! | `POST` | `/ingest/sitemap` | Crawl a domain's sitemap and ingest every page |
//! | `GET`  | `/health` | Health check with index and model info |
//!
//! # Error Contract
//!
//! All error responses share one shape:
//!
//! ```json
//! { "error": { "code": "unsupported_format", "message": "unsupported format: image.png" } }
//! ```
//!
//! Codes come from [`RagError::code`]. Client-side problems (bad formats,
//! unparseable content, bad config values in a request) map to 400, a missing
//! sitemap to 404, upstream fetch/LLM/embedding failures to 502, everything
//! else to 500.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! chat clients.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::chain::RagChain;
use crate::config::Config;
use crate::embedding::{EmbeddingProvider, OpenAiEmbeddings};
use crate::error::RagError;
use crate::chunker::Chunker;
use crate::index::VectorIndex;
use crate::ingest::Ingestor;
use crate::llm::{LlmProvider, OpenAiChat};
use crate::models::{ChatTurn, IngestReport, SourceDocument};
use crate::session::SessionStore;

/// Sitemap ingestion can touch thousands of pages; the response lists at
/// most this many sources.
const MAX_REPORTED_SOURCES: usize = 50;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub chain: Arc<RagChain>,
    pub ingestor: Arc<Ingestor>,
    pub index: Arc<VectorIndex>,
    pub sessions: Arc<SessionStore>,
    pub llm_model: String,
    pub embedding_model: String,
}

impl AppState {
    /// Wire up the full pipeline from config plus injected providers. Tests
    /// pass mock providers; `run_server` passes the OpenAI-backed ones.
    pub fn new(
        config: &Config,
        embeddings: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LlmProvider>,
    ) -> crate::error::Result<Self> {
        let index = Arc::new(VectorIndex::open(&config.index.path));
        let sessions = Arc::new(SessionStore::new(config.session.max_turns));

        let chunker = Chunker::new(config.chunking.chunk_size, config.chunking.chunk_overlap)?;
        let ingestor = Arc::new(Ingestor::new(
            chunker,
            embeddings.clone(),
            index.clone(),
            &config.index.path,
            &config.ingestion,
        )?);

        let llm_model = llm.model_name().to_string();
        let embedding_model = embeddings.model_name().to_string();
        let chain = Arc::new(RagChain::new(
            embeddings,
            llm,
            index.clone(),
            sessions.clone(),
            config.retrieval.clone(),
        ));

        Ok(Self {
            chain,
            ingestor,
            index,
            sessions,
            llm_model,
            embedding_model,
        })
    }
}

/// Starts the HTTP server with OpenAI-backed providers.
///
/// Binds to `[server].bind` and runs until the process is terminated. A
/// background task reaps idle sessions on a fixed interval.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let embeddings: Arc<dyn EmbeddingProvider> = Arc::new(OpenAiEmbeddings::new(&config.embedding)?);
    let llm: Arc<dyn LlmProvider> = Arc::new(OpenAiChat::new(&config.llm)?);

    let state = AppState::new(config, embeddings, llm)?;

    let sessions = state.sessions.clone();
    let max_idle = config.session.max_idle_secs;
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(60));
        loop {
            tick.tick().await;
            sessions.evict_inactive(max_idle).await;
        }
    });

    let app = build_router(state);
    let bind_addr = &config.server.bind;

    info!(addr = %bind_addr, "listening");
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Route table plus CORS. Split from `run_server` so tests can drive the
/// router directly.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/chat", post(handle_chat))
        .route("/ingest/file", post(handle_ingest_file))
        .route("/ingest/text", post(handle_ingest_text))
        .route("/ingest/url", post(handle_ingest_url))
        .route("/ingest/sitemap", post(handle_ingest_sitemap))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let status = match &err {
            RagError::Config(_)
            | RagError::UnsupportedFormat(_)
            | RagError::Parse(_)
            | RagError::SitemapParse(_) => StatusCode::BAD_REQUEST,
            RagError::SitemapNotFound(_) => StatusCode::NOT_FOUND,
            RagError::Fetch(_) | RagError::Generation(_) | RagError::Embedding(_) => {
                StatusCode::BAD_GATEWAY
            }
            RagError::Retrieval(_) | RagError::Persist(_) | RagError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            error!(code = err.code(), "request failed: {err}");
        }
        Self {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatRequest {
    query: String,
    #[serde(default)]
    session_id: Option<String>,
    /// Client-held history. Only consulted when the server has no memory of
    /// the session; server-side memory is authoritative.
    #[serde(default)]
    chat_history: Option<Vec<ChatTurn>>,
}

#[derive(Serialize)]
struct ChatResponse {
    answer: String,
    sources: Vec<SourceDocument>,
    session_id: String,
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    let session_id = req
        .session_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let outcome = state
        .chain
        .answer(&req.query, Some(&session_id), req.chat_history)
        .await?;

    Ok(Json(ChatResponse {
        answer: outcome.answer,
        sources: outcome.sources,
        session_id,
    }))
}

// ============ Ingestion endpoints ============

#[derive(Serialize)]
struct IngestResponse {
    /// `success` when every source went through, `partial` when some did,
    /// `failed` when none did.
    status: String,
    documents_processed: usize,
    failed: usize,
    chunks_created: usize,
    skipped_unchanged: usize,
    /// Set by `/ingest/file` when exactly one file was uploaded; multi-file
    /// uploads list everything in `sources` instead.
    #[serde(skip_serializing_if = "Option::is_none")]
    filename: Option<String>,
    sources: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    failures: Vec<crate::models::IngestFailure>,
}

impl From<IngestReport> for IngestResponse {
    fn from(mut report: IngestReport) -> Self {
        report.sources.truncate(MAX_REPORTED_SOURCES);
        let status = if report.failed == 0 {
            "success"
        } else if report.processed > 0 || report.skipped_unchanged > 0 {
            "partial"
        } else {
            "failed"
        };
        Self {
            status: status.to_string(),
            documents_processed: report.processed,
            failed: report.failed,
            chunks_created: report.chunks_created,
            skipped_unchanged: report.skipped_unchanged,
            filename: None,
            sources: report.sources,
            failures: report.failures,
        }
    }
}

/// Upload one or more documents as multipart fields. Per-file failures are
/// reported alongside successes; the request only fails outright when no
/// file field is present at all.
async fn handle_ingest_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<IngestResponse>, AppError> {
    let mut report = IngestReport::default();
    let mut uploaded: Vec<String> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart body: {e}")))?
    {
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        uploaded.push(filename.clone());

        let bytes = field
            .bytes()
            .await
            .map_err(|e| bad_request(format!("failed to read upload {filename}: {e}")))?;

        match state.ingestor.ingest_file(&filename, &bytes).await {
            Ok(one) => report.merge(one),
            Err(e) => {
                report.failed += 1;
                report.failures.push(crate::models::IngestFailure {
                    source: filename,
                    error: e.to_string(),
                });
            }
        }
    }

    if uploaded.is_empty() {
        return Err(bad_request("no file field in multipart body"));
    }
    let mut response = IngestResponse::from(report);
    if uploaded.len() == 1 {
        response.filename = uploaded.pop();
    }
    Ok(Json(response))
}

#[derive(Deserialize)]
struct IngestTextRequest {
    text: String,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    metadata: Option<IngestTextMetadata>,
}

/// Source label nested under `metadata`, the shape chat widgets send.
/// A top-level `source` wins when both are present.
#[derive(Deserialize)]
struct IngestTextMetadata {
    #[serde(default)]
    source: Option<String>,
}

async fn handle_ingest_text(
    State(state): State<AppState>,
    Json(req): Json<IngestTextRequest>,
) -> Result<Json<IngestResponse>, AppError> {
    let source = req
        .source
        .or_else(|| req.metadata.and_then(|m| m.source));
    let report = state
        .ingestor
        .ingest_text(&req.text, source.as_deref())
        .await?;
    Ok(Json(report.into()))
}

#[derive(Deserialize)]
struct IngestUrlRequest {
    url: String,
}

async fn handle_ingest_url(
    State(state): State<AppState>,
    Json(req): Json<IngestUrlRequest>,
) -> Result<Json<IngestResponse>, AppError> {
    if req.url.trim().is_empty() {
        return Err(bad_request("url must not be empty"));
    }
    let report = state.ingestor.ingest_url(&req.url).await?;
    Ok(Json(report.into()))
}

#[derive(Deserialize)]
struct IngestSitemapRequest {
    domain: String,
}

async fn handle_ingest_sitemap(
    State(state): State<AppState>,
    Json(req): Json<IngestSitemapRequest>,
) -> Result<Json<IngestResponse>, AppError> {
    if req.domain.trim().is_empty() {
        return Err(bad_request("domain must not be empty"));
    }
    let report = state.ingestor.ingest_sitemap(&req.domain).await?;
    Ok(Json(report.into()))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    documents_indexed: usize,
    model: String,
    embedding_model: String,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        documents_indexed: state.index.len().await,
        model: state.llm_model.clone(),
        embedding_model: state.embedding_model.clone(),
    })
}
