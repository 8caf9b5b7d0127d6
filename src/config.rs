use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Path to the vector index snapshot. The ingestion-record sidecar lives
    /// next to it with a `.ingested.json` suffix.
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
        }
    }
}

fn default_index_path() -> PathBuf {
    PathBuf::from("./data/index.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Max total chars of retrieved context admitted into a prompt. Chunks
    /// are admitted in descending similarity order; the rest are dropped.
    #[serde(default = "default_context_char_budget")]
    pub context_char_budget: usize,
    /// When true and the index is empty, answer from the LLM alone with no
    /// sources. When false, return a fixed insufficient-information answer
    /// without calling the LLM.
    #[serde(default)]
    pub allow_general_knowledge: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            context_char_budget: default_context_char_budget(),
            allow_general_knowledge: false,
        }
    }
}

fn default_top_k() -> usize {
    4
}
fn default_context_char_budget() -> usize {
    12_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// Max turns retained per session (a user/assistant exchange is two
    /// turns). Oldest evicted first.
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    /// Sessions idle longer than this are dropped.
    #[serde(default = "default_max_idle_secs")]
    pub max_idle_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            max_idle_secs: default_max_idle_secs(),
        }
    }
}

fn default_max_turns() -> usize {
    20
}
fn default_max_idle_secs() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestionConfig {
    /// Parallel fetch/normalize workers for batch (sitemap) ingestion.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_max_concurrency() -> usize {
    8
}
fn default_fetch_timeout_secs() -> u64 {
    15
}
fn default_user_agent() -> String {
    concat!("ragserve/", env!("CARGO_PKG_VERSION")).to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_llm_model(),
            temperature: 0.0,
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_dims")]
    pub dims: usize,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            dims: default_embedding_dims(),
            timeout_secs: default_embedding_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_embedding_dims() -> usize {
    1536
}
fn default_embedding_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    5
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Validate a config. Misconfiguration fails fast here, never silently
/// clamped downstream.
pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }

    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!(
            "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
            config.chunking.chunk_overlap,
            config.chunking.chunk_size
        );
    }

    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    if config.retrieval.context_char_budget == 0 {
        anyhow::bail!("retrieval.context_char_budget must be > 0");
    }

    if config.session.max_turns == 0 {
        anyhow::bail!("session.max_turns must be >= 1");
    }

    if config.ingestion.max_concurrency == 0 {
        anyhow::bail!("ingestion.max_concurrency must be >= 1");
    }

    if config.llm.timeout_secs == 0 || config.embedding.timeout_secs == 0 {
        anyhow::bail!("llm.timeout_secs and embedding.timeout_secs must be > 0");
    }

    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config: Config = toml::from_str("").unwrap();
        validate(&config).unwrap();
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.chunk_overlap, 200);
        assert_eq!(config.retrieval.top_k, 4);
        assert!(!config.retrieval.allow_general_knowledge);
    }

    #[test]
    fn overlap_ge_chunk_size_rejected() {
        let config: Config = toml::from_str(
            r#"
            [chunking]
            chunk_size = 100
            chunk_overlap = 100
            "#,
        )
        .unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn zero_chunk_size_rejected() {
        let config: Config = toml::from_str(
            r#"
            [chunking]
            chunk_size = 0
            "#,
        )
        .unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn zero_top_k_rejected() {
        let config: Config = toml::from_str(
            r#"
            [retrieval]
            top_k = 0
            "#,
        )
        .unwrap();
        assert!(validate(&config).is_err());
    }
}
