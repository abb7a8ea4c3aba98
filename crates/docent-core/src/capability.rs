//! Traits for the external collaborators the core depends on.
//!
//! The application crate constructs one implementation of each trait at
//! startup and hands references to the agent and the structurer. Tests
//! substitute scripted doubles.
//!
//! | Trait | Contract |
//! |-------|----------|
//! | [`LanguageModel`] | prompt → completion text |
//! | [`DocumentCatalog`] | () → all registered documents |
//! | [`Retriever`] | (text, filter, limit) → ranked chunks |
//! | [`LinkResolver`] | (file name, expiry) → time-limited URL |
//! | [`PageStructurer`] | page text → `H1`/`H2`/`H3`/`BODY` stream |
//! | [`MetadataExtractor`] | (head text, type catalog) → metadata |
//!
//! Embedding lives in [`crate::embedding::EmbeddingProvider`].

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

use crate::models::{DocFilter, Document, DocumentMetadata, SearchHit};

/// Failure of a [`LanguageModel`] call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompletionError {
    /// A single-backend model reported a rate limit.
    #[error("language model backend is rate limited")]
    RateLimited,
    /// Every backend in the rotation reported a rate limit.
    #[error("all language model backends are throttled or unavailable")]
    AllBackendsThrottled,
    /// A backend failed for a reason other than rate limiting.
    #[error("language model backend failed: {0}")]
    Backend(String),
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> std::result::Result<String, CompletionError>;
}

#[async_trait]
pub trait DocumentCatalog: Send + Sync {
    async fn list_documents(&self) -> Result<Vec<Document>>;
}

#[async_trait]
pub trait Retriever: Send + Sync {
    /// Rank chunks for `search_text`, restricted by `filter`.
    ///
    /// Implementations return an empty list when the query cannot be
    /// embedded; errors are reserved for store failures.
    async fn retrieve(
        &self,
        search_text: &str,
        filter: &DocFilter,
        limit: usize,
    ) -> Result<Vec<SearchHit>>;
}

#[async_trait]
pub trait LinkResolver: Send + Sync {
    /// Produce a URL for `file_name` valid for `expiry_secs` seconds.
    async fn resolve(&self, file_name: &str, expiry_secs: u64) -> Result<String>;
}

#[async_trait]
pub trait PageStructurer: Send + Sync {
    /// Classify one page into a stream of `H1`/`H2`/`H3`/`BODY` elements.
    async fn structure_page(&self, page_text: &str) -> Result<String>;
}

#[async_trait]
pub trait MetadataExtractor: Send + Sync {
    async fn extract(
        &self,
        file_name: &str,
        document_head: &str,
        type_catalog: &str,
    ) -> Result<DocumentMetadata>;
}
