//! Chat-completion backends and the rotating backend ring.
//!
//! Each configured `[[llm.backends]]` entry becomes one [`Backend`]. The
//! [`BackendRing`] implements [`LanguageModel`] by starting at a random
//! backend and moving on to the next one whenever a backend reports a rate
//! limit. Any other failure ends the call immediately.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;

use docent_core::capability::{CompletionError, LanguageModel};

use crate::config::{BackendConfig, LlmConfig};

const ANTHROPIC_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const OPENAI_URL: &str = "https://api.openai.com";

/// Failure of one backend call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("backend is rate limited")]
    RateLimited,
    #[error("{0}")]
    Fatal(String),
}

/// Map a non-success HTTP status to a [`BackendError`].
pub fn classify_status(status: reqwest::StatusCode, body: &str) -> BackendError {
    match status.as_u16() {
        429 | 529 => BackendError::RateLimited,
        _ => BackendError::Fatal(format!("HTTP {}: {}", status, body)),
    }
}

/// One interchangeable chat model.
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;
    async fn generate(&self, prompt: &str) -> Result<String, BackendError>;
}

struct Sampling {
    max_tokens: u32,
    temperature: f32,
}

async fn post_chat(
    request: reqwest::RequestBuilder,
    body: &serde_json::Value,
) -> Result<serde_json::Value, BackendError> {
    let response = request
        .header("Content-Type", "application/json")
        .json(body)
        .send()
        .await
        .map_err(|e| BackendError::Fatal(format!("request failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(classify_status(status, &text));
    }
    response
        .json()
        .await
        .map_err(|e| BackendError::Fatal(format!("invalid response body: {}", e)))
}

/// Anthropic Messages API backend. Requires `ANTHROPIC_API_KEY`.
pub struct AnthropicBackend {
    model: String,
    url: String,
    api_key: String,
    sampling: Sampling,
    client: reqwest::Client,
}

impl AnthropicBackend {
    pub fn new(backend: &BackendConfig, llm: &LlmConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| anyhow::anyhow!("ANTHROPIC_API_KEY environment variable not set"))?;
        Ok(Self {
            model: backend.model.clone(),
            url: base_url(backend, ANTHROPIC_URL),
            api_key,
            sampling: Sampling {
                max_tokens: llm.max_tokens,
                temperature: llm.temperature,
            },
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(llm.timeout_secs))
                .build()?,
        })
    }
}

#[async_trait]
impl Backend for AnthropicBackend {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, BackendError> {
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.sampling.max_tokens,
            "temperature": self.sampling.temperature,
            "messages": [{"role": "user", "content": prompt}],
        });
        let request = self
            .client
            .post(format!("{}/v1/messages", self.url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION);
        let json = post_chat(request, &body).await?;
        parse_anthropic_response(&json)
    }
}

fn parse_anthropic_response(json: &serde_json::Value) -> Result<String, BackendError> {
    let blocks = json
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| BackendError::Fatal("response has no content blocks".to_string()))?;
    Ok(blocks
        .iter()
        .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
        .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
        .collect::<Vec<_>>()
        .join(""))
}

/// OpenAI-compatible chat completions backend. Requires `OPENAI_API_KEY`.
pub struct OpenAiChatBackend {
    model: String,
    url: String,
    api_key: String,
    sampling: Sampling,
    client: reqwest::Client,
}

impl OpenAiChatBackend {
    pub fn new(backend: &BackendConfig, llm: &LlmConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self {
            model: backend.model.clone(),
            url: base_url(backend, OPENAI_URL),
            api_key,
            sampling: Sampling {
                max_tokens: llm.max_tokens,
                temperature: llm.temperature,
            },
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(llm.timeout_secs))
                .build()?,
        })
    }
}

#[async_trait]
impl Backend for OpenAiChatBackend {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, BackendError> {
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.sampling.max_tokens,
            "temperature": self.sampling.temperature,
            "messages": [{"role": "user", "content": prompt}],
        });
        let request = self
            .client
            .post(format!("{}/v1/chat/completions", self.url))
            .header("Authorization", format!("Bearer {}", self.api_key));
        let json = post_chat(request, &body).await?;
        parse_openai_chat_response(&json)
    }
}

fn parse_openai_chat_response(json: &serde_json::Value) -> Result<String, BackendError> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| BackendError::Fatal("response has no message content".to_string()))
}

fn base_url(backend: &BackendConfig, default: &str) -> String {
    backend
        .url
        .as_deref()
        .unwrap_or(default)
        .trim_end_matches('/')
        .to_string()
}

/// Ordered ring of interchangeable backends.
pub struct BackendRing {
    backends: Vec<Arc<dyn Backend>>,
}

impl BackendRing {
    pub fn new(backends: Vec<Arc<dyn Backend>>) -> Self {
        Self { backends }
    }

    /// Build one backend per `[[llm.backends]]` entry.
    pub fn from_config(llm: &LlmConfig) -> anyhow::Result<Self> {
        let mut backends: Vec<Arc<dyn Backend>> = Vec::with_capacity(llm.backends.len());
        for backend in &llm.backends {
            match backend.provider.as_str() {
                "anthropic" => backends.push(Arc::new(AnthropicBackend::new(backend, llm)?)),
                "openai" => backends.push(Arc::new(OpenAiChatBackend::new(backend, llm)?)),
                other => anyhow::bail!("Unknown llm backend provider: {}", other),
            }
        }
        Ok(Self::new(backends))
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Try each backend once, beginning at `start`.
    pub async fn complete_from(
        &self,
        start: usize,
        prompt: &str,
    ) -> Result<String, CompletionError> {
        if self.backends.is_empty() {
            return Err(CompletionError::Backend(
                "no language model backends configured".to_string(),
            ));
        }
        let n = self.backends.len();
        for attempt in 0..n {
            let backend = &self.backends[(start + attempt) % n];
            match backend.generate(prompt).await {
                Ok(text) => return Ok(text),
                Err(BackendError::RateLimited) => {
                    tracing::warn!(backend = backend.name(), "backend throttled, rotating");
                }
                Err(BackendError::Fatal(message)) => {
                    return Err(CompletionError::Backend(format!(
                        "{}: {}",
                        backend.name(),
                        message
                    )));
                }
            }
        }
        tracing::warn!(backends = n, "every language model backend is throttled");
        Err(CompletionError::AllBackendsThrottled)
    }
}

#[async_trait]
impl LanguageModel for BackendRing {
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
        let start = if self.backends.is_empty() {
            0
        } else {
            rand::rng().random_range(0..self.backends.len())
        };
        self.complete_from(start, prompt).await
    }
}
