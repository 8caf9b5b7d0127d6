//! Embedding provider abstraction.
//!
//! The rest of the system treats embeddings as a narrow contract: a batch of
//! texts in, one fixed-dimension vector per text out, order preserved.
//! [`OpenAiEmbeddings`] is the production implementation; [`HashEmbeddings`]
//! is a deterministic offline provider used by the test suite and useful for
//! smoke-testing the pipeline without credentials.
//!
//! # Retry strategy (OpenAI)
//!
//! - HTTP 429 and 5xx → retry with exponential backoff (1s, 2s, 4s, ... capped)
//! - Other 4xx → fail immediately
//! - Network errors → retry

use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::config::EmbeddingConfig;
use crate::error::{RagError, Result};

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts; the result has one vector per input, in input
    /// order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Model identifier, reported by `/health`.
    fn model_name(&self) -> &str;
}

/// Embed a single query text.
pub async fn embed_query(provider: &dyn EmbeddingProvider, text: &str) -> Result<Vec<f32>> {
    let texts = [text.to_string()];
    let vectors = provider.embed(&texts).await?;
    vectors
        .into_iter()
        .next()
        .ok_or_else(|| RagError::Embedding("empty embedding response".into()))
}

// ============ OpenAI ============

pub struct OpenAiEmbeddings {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dims: usize,
    max_retries: u32,
}

impl OpenAiEmbeddings {
    /// Reads `OPENAI_API_KEY` from the environment.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| RagError::Config("OPENAI_API_KEY environment variable not set".into()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RagError::Config(e.to_string()))?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            dims: config.dims,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err: Option<RagError> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post("https://api.openai.com/v1/embeddings")
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| RagError::Embedding(e.to_string()))?;
                        let vectors = parse_embeddings_response(&json)?;
                        for v in &vectors {
                            if v.len() != self.dims {
                                return Err(RagError::Config(format!(
                                    "embedding dimension mismatch: expected {}, got {}",
                                    self.dims,
                                    v.len()
                                )));
                            }
                        }
                        return Ok(vectors);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(%status, attempt, "embedding API error, retrying");
                        last_err = Some(RagError::Embedding(format!(
                            "OpenAI API error {status}: {body_text}"
                        )));
                        continue;
                    }

                    // Client error other than rate limiting: no retry.
                    return Err(RagError::Embedding(format!(
                        "OpenAI API error {status}: {body_text}"
                    )));
                }
                Err(e) => {
                    last_err = Some(RagError::Embedding(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| RagError::Embedding("embedding failed after retries".into())))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

fn parse_embeddings_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| RagError::Embedding("invalid response: missing data array".into()))?;

    let mut vectors = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| RagError::Embedding("invalid response: missing embedding".into()))?;
        vectors.push(
            embedding
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect(),
        );
    }
    Ok(vectors)
}

// ============ Deterministic offline provider ============

/// Maps text to a fixed-dimension vector of hashed term frequencies
/// (L2-normalized). Texts sharing terms land near each other, which is
/// enough for retrieval tests and credential-free smoke runs. Deterministic
/// across processes.
pub struct HashEmbeddings {
    dims: usize,
}

impl HashEmbeddings {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddings {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| hash_embed(t, self.dims)).collect())
    }

    fn model_name(&self) -> &str {
        "hash-tf"
    }
}

fn hash_embed(text: &str, dims: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dims];
    for term in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let digest = Sha256::digest(term.as_bytes());
        let bucket = u64::from_le_bytes(digest[..8].try_into().expect("8 bytes")) as usize % dims;
        vector[bucket] += 1.0;
    }

    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

// ============ Vector math ============

/// Cosine similarity in `[-1, 1]`; `0.0` for empty or mismatched lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}
