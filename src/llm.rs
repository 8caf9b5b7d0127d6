//! LLM gateway.
//!
//! The chain sees a minimal contract: system prompt, prior turns, user
//! message in; generated text out. [`OpenAiChat`] calls the chat completions
//! API; failures and timeouts surface as [`RagError::Generation`] and are
//! never retried silently.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::LlmConfig;
use crate::error::{RagError, Result};
use crate::models::{ChatTurn, Role};

/// Grounding instructions prepended to every RAG prompt. Mirrors the
/// product behavior: answer only from the supplied context and admit when it
/// is insufficient.
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a helpful AI assistant that answers questions based ONLY on the provided context.

IMPORTANT RULES:
1. Answer questions using ONLY the information from the retrieved context/documents
2. If the answer is not in the context, you MUST respond with \"I don't have enough information to answer that question\"
3. Do NOT make up information or use external knowledge
4. Be concise and accurate
5. If you cite information, mention which source document it came from
6. Maintain a professional and helpful tone";

/// Appended to the system prompt when the general-knowledge fallback is
/// enabled in config, relaxing rule 2/3.
pub const GENERAL_KNOWLEDGE_SUFFIX: &str = "\
\n\nIf the context does not contain the answer, you MAY fall back to your \
general knowledge, but say explicitly that the answer is not based on the \
provided documents.";

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a completion for `user`, conditioned on `system` and the
    /// prior conversation `history`.
    async fn generate(&self, system: &str, history: &[ChatTurn], user: &str) -> Result<String>;

    /// Model identifier, reported by `/health`.
    fn model_name(&self) -> &str;
}

// ============ OpenAI chat completions ============

pub struct OpenAiChat {
    client: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f32,
}

impl OpenAiChat {
    /// Reads `OPENAI_API_KEY` from the environment.
    pub fn new(config: &LlmConfig) -> Result<Self> {
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
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiChat {
    async fn generate(&self, system: &str, history: &[ChatTurn], user: &str) -> Result<String> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(serde_json::json!({"role": "system", "content": system}));
        for turn in history {
            let role = match turn.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            messages.push(serde_json::json!({"role": role, "content": turn.content}));
        }
        messages.push(serde_json::json!({"role": "user", "content": user}));

        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": messages,
        });

        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| RagError::Generation(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(RagError::Generation(format!(
                "OpenAI API error {status}: {body_text}"
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RagError::Generation(e.to_string()))?;

        json.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| RagError::Generation("invalid response: missing message content".into()))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
