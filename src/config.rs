use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use docent_core::agent::AgentConfig;
use docent_core::search::SearchParams;
use docent_core::store::KeywordField;
use docent_core::structure::IngestOptions;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub links: Option<LinksConfig>,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_page_char_limit")]
    pub page_char_limit: usize,
    #[serde(default = "default_metadata_char_cap")]
    pub metadata_char_cap: usize,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub contextual_embeddings: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            page_char_limit: default_page_char_limit(),
            metadata_char_cap: default_metadata_char_cap(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            contextual_embeddings: false,
        }
    }
}

fn default_page_char_limit() -> usize {
    1800
}
fn default_metadata_char_cap() -> usize {
    10_000
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.txt".to_string(), "**/*.pdf".to_string()]
}

impl IngestConfig {
    pub fn options(&self, embedding: &EmbeddingConfig) -> IngestOptions {
        IngestOptions {
            metadata_char_cap: self.metadata_char_cap,
            contextual_embeddings: self.contextual_embeddings,
            embed_batch_size: embedding.batch_size,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_candidate_k")]
    pub candidate_k: usize,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    #[serde(default = "default_final_limit")]
    pub final_limit: usize,
    /// Lexical fields; empty means the default set.
    #[serde(default)]
    pub keyword_fields: Vec<String>,
    #[serde(default = "default_short_query_chars")]
    pub short_query_chars: usize,
    #[serde(default = "default_mode")]
    pub mode: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            candidate_k: default_candidate_k(),
            rrf_k: default_rrf_k(),
            final_limit: default_final_limit(),
            keyword_fields: Vec::new(),
            short_query_chars: default_short_query_chars(),
            mode: default_mode(),
        }
    }
}

fn default_candidate_k() -> usize {
    20
}
fn default_rrf_k() -> f64 {
    40.0
}
fn default_final_limit() -> usize {
    10
}
fn default_short_query_chars() -> usize {
    20
}
fn default_mode() -> String {
    "hybrid".to_string()
}

impl RetrievalConfig {
    pub fn params(&self) -> Result<SearchParams> {
        let keyword_fields = if self.keyword_fields.is_empty() {
            KeywordField::DEFAULT.to_vec()
        } else {
            self.keyword_fields
                .iter()
                .map(|f| f.parse::<KeywordField>())
                .collect::<Result<Vec<_>>>()?
        };
        Ok(SearchParams {
            candidate_k: self.candidate_k,
            rrf_k: self.rrf_k,
            keyword_fields,
            short_query_chars: self.short_query_chars,
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentSection {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_result_limit")]
    pub result_limit: usize,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            result_limit: default_result_limit(),
        }
    }
}

fn default_max_iterations() -> usize {
    6
}
fn default_result_limit() -> usize {
    5
}

impl AgentSection {
    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            max_iterations: self.max_iterations,
            result_limit: self.result_limit,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            temperature: 0.0,
            timeout_secs: default_llm_timeout_secs(),
            backends: Vec::new(),
        }
    }
}

fn default_max_tokens() -> u32 {
    4096
}
fn default_llm_timeout_secs() -> u64 {
    120
}

/// One interchangeable chat model in the backend ring.
#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LinksConfig {
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Key prefix prepended to file names.
    #[serde(default)]
    pub prefix: String,
    /// Custom endpoint for S3-compatible services.
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default = "default_expiry_secs")]
    pub expiry_secs: u64,
}

fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_expiry_secs() -> u64 {
    3600
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
    "127.0.0.1:7341".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.ingest.page_char_limit == 0 {
        anyhow::bail!("ingest.page_char_limit must be > 0");
    }
    if config.ingest.metadata_char_cap == 0 {
        anyhow::bail!("ingest.metadata_char_cap must be > 0");
    }

    if config.retrieval.final_limit < 1 {
        anyhow::bail!("retrieval.final_limit must be >= 1");
    }
    if config.retrieval.candidate_k < 1 {
        anyhow::bail!("retrieval.candidate_k must be >= 1");
    }
    if config.retrieval.rrf_k <= 0.0 {
        anyhow::bail!("retrieval.rrf_k must be > 0");
    }
    config.retrieval.params()?;
    config
        .retrieval
        .mode
        .parse::<docent_core::search::SearchMode>()?;

    if config.agent.max_iterations < 1 {
        anyhow::bail!("agent.max_iterations must be >= 1");
    }
    if config.agent.result_limit < 1 {
        anyhow::bail!("agent.result_limit must be >= 1");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    for backend in &config.llm.backends {
        match backend.provider.as_str() {
            "anthropic" | "openai" => {}
            other => anyhow::bail!(
                "Unknown llm backend provider: '{}'. Must be anthropic or openai.",
                other
            ),
        }
        if backend.model.trim().is_empty() {
            anyhow::bail!("llm.backends entries need a model");
        }
    }

    if let Some(links) = &config.links {
        if links.bucket.trim().is_empty() {
            anyhow::bail!("links.bucket must not be empty");
        }
        if links.expiry_secs == 0 || links.expiry_secs > 604_800 {
            anyhow::bail!("links.expiry_secs must be between 1 and 604800");
        }
    }

    Ok(config)
}
