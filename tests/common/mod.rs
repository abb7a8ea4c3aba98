//! Offline doubles shared by the integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use docent::config::{parse_config, Config};
use docent::services::Services;
use docent::sqlite_store::SqliteStore;
use docent::{db, migrate};
use docent_core::capability::{CompletionError, LanguageModel, LinkResolver};
use docent_core::embedding::EmbeddingProvider;

/// Words the embedder counts, one dimension each.
const VOCABULARY: [&str; 4] = ["torque", "seal", "oil", "pump"];

/// Deterministic bag-of-words embedder over [`VOCABULARY`].
pub struct KeywordEmbedder;

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword-test"
    }

    fn dims(&self) -> usize {
        VOCABULARY.len()
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let lower = t.to_lowercase();
                VOCABULARY
                    .iter()
                    .map(|w| lower.matches(w).count() as f32 + 0.1)
                    .collect()
            })
            .collect())
    }
}

/// Language model that answers ingestion prompts from the prompt itself
/// and agent decisions from a script.
#[derive(Default)]
pub struct DeskModel {
    decisions: Mutex<VecDeque<String>>,
    decision_prompts: Mutex<Vec<String>>,
}

impl DeskModel {
    pub fn with_decisions(decisions: &[&str]) -> Self {
        Self {
            decisions: Mutex::new(decisions.iter().map(|d| d.to_string()).collect()),
            decision_prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn decision_prompts(&self) -> Vec<String> {
        self.decision_prompts.lock().unwrap().clone()
    }
}

fn between<'a>(text: &'a str, open: &str, close: &str) -> &'a str {
    let start = text.find(open).map(|i| i + open.len()).unwrap_or(0);
    let end = text[start..].find(close).map(|i| start + i).unwrap_or(text.len());
    &text[start..end]
}

#[async_trait]
impl LanguageModel for DeskModel {
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
        if prompt.contains("# Document Assistant") {
            self.decision_prompts.lock().unwrap().push(prompt.to_string());
            return self
                .decisions
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| CompletionError::Backend("script exhausted".to_string()));
        }
        if prompt.contains("<CURRENT_PAGE>") {
            let page = between(prompt, "<CURRENT_PAGE>\n", "\n</CURRENT_PAGE>");
            return Ok(format!("<H1>Service</H1><BODY>{}</BODY>", page.trim()));
        }
        if prompt.contains("<TYPES>") {
            let document = between(prompt, "<DOCUMENT>\n", "\n</DOCUMENT>");
            if document.starts_with("hx200.txt") {
                return Ok("<NAME>HX-200 Service Manual</NAME><TYPE>service_manual</TYPE>\
                    <DESCRIPTION>Servicing the HX-200 pump.</DESCRIPTION>\
                    <MANUFACTURER>Acme</MANUFACTURER><MODEL>HX-200</MODEL>"
                    .to_string());
            }
            return Ok("<NAME>Seal Bulletin</NAME><TYPE>tech_bulletin</TYPE>\
                <DESCRIPTION>Seal replacement intervals.</DESCRIPTION>\
                <MANUFACTURER></MANUFACTURER><MODEL></MODEL>"
                .to_string());
        }
        Err(CompletionError::Backend("unexpected prompt".to_string()))
    }
}

/// Links of the form `https://files.example/<file>`.
pub struct FixedLinks;

#[async_trait]
impl LinkResolver for FixedLinks {
    async fn resolve(&self, file_name: &str, _expiry_secs: u64) -> Result<String> {
        Ok(format!("https://files.example/{}", file_name))
    }
}

pub fn test_config(root: &Path) -> Config {
    parse_config(&format!(
        r#"[db]
path = "{}/data/docent.sqlite"

[ingest]
contextual_embeddings = true

[retrieval]
final_limit = 5
"#,
        root.display()
    ))
    .unwrap()
}

/// Two short manuals under `root/docs`.
pub fn write_corpus(root: &Path) -> std::path::PathBuf {
    let docs = root.join("docs");
    std::fs::create_dir_all(&docs).unwrap();
    std::fs::write(
        docs.join("hx200.txt"),
        "Impeller bolt torque is 45 Nm. Apply thread locker before fitting.",
    )
    .unwrap();
    std::fs::write(
        docs.join("seals.txt"),
        "Replace the shaft seal every 2000 operating hours.",
    )
    .unwrap();
    std::fs::write(docs.join("photo.png"), "not a document").unwrap();
    docs
}

pub async fn services(root: &Path, model: Arc<DeskModel>) -> Services {
    let config = test_config(root);
    let pool = db::connect(&config).await.unwrap();
    migrate::apply(&pool).await.unwrap();
    Services::from_parts(
        config,
        Arc::new(SqliteStore::new(pool)),
        Arc::new(KeywordEmbedder),
        model,
        Arc::new(FixedLinks),
    )
    .unwrap()
}
