//! Storage abstraction for Docent.
//!
//! The [`Store`] trait defines all storage operations needed by ingestion
//! and retrieval, enabling pluggable backends (SQLite in the app crate,
//! [`memory::InMemoryStore`] for tests).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::str::FromStr;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::{Chunk, DocFilter, Document};

/// A candidate chunk returned from keyword or vector search.
///
/// Carries enough information to build a
/// [`SearchHit`](crate::models::SearchHit) without another round-trip.
#[derive(Debug, Clone)]
pub struct ChunkCandidate {
    pub chunk_id: String,
    pub file_name: String,
    pub doc_name: String,
    pub page: u32,
    pub text: String,
    /// FTS rank score (higher is better) or cosine similarity.
    pub raw_score: f64,
}

/// Embeddings stored alongside one chunk.
#[derive(Debug, Clone, Default)]
pub struct ChunkVectors {
    /// Narrative embedding of [`Chunk::embedding_input`].
    pub vector: Option<Vec<f32>>,
    /// Attribute embedding of [`Chunk::context_input`].
    pub context_vector: Option<Vec<f32>>,
}

/// Which stored embedding a vector search compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorField {
    Narrative,
    Contextual,
}

/// Chunk fields the lexical search may be restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeywordField {
    Text,
    H1,
    H2,
    H3,
    DocName,
    DocType,
    Manufacturer,
    Model,
}

impl KeywordField {
    /// Field set used when the caller does not name one.
    pub const DEFAULT: &'static [KeywordField] = &[
        KeywordField::Text,
        KeywordField::H1,
        KeywordField::H2,
        KeywordField::H3,
        KeywordField::DocName,
        KeywordField::Manufacturer,
        KeywordField::Model,
    ];

    /// Column name in the chunk table and FTS index.
    pub fn column(&self) -> &'static str {
        match self {
            KeywordField::Text => "text",
            KeywordField::H1 => "h1",
            KeywordField::H2 => "h2",
            KeywordField::H3 => "h3",
            KeywordField::DocName => "doc_name",
            KeywordField::DocType => "doc_type",
            KeywordField::Manufacturer => "manufacturer",
            KeywordField::Model => "model",
        }
    }

    /// Read the matching field from a chunk.
    pub fn value<'a>(&self, chunk: &'a Chunk) -> &'a str {
        match self {
            KeywordField::Text => &chunk.text,
            KeywordField::H1 => &chunk.h1,
            KeywordField::H2 => &chunk.h2,
            KeywordField::H3 => &chunk.h3,
            KeywordField::DocName => &chunk.doc_name,
            KeywordField::DocType => &chunk.doc_type,
            KeywordField::Manufacturer => &chunk.manufacturer,
            KeywordField::Model => &chunk.model,
        }
    }
}

impl FromStr for KeywordField {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "text" => KeywordField::Text,
            "h1" => KeywordField::H1,
            "h2" => KeywordField::H2,
            "h3" => KeywordField::H3,
            "doc_name" => KeywordField::DocName,
            "doc_type" => KeywordField::DocType,
            "manufacturer" => KeywordField::Manufacturer,
            "model" => KeywordField::Model,
            other => bail!("Unknown keyword field: {}", other),
        })
    }
}

/// Abstract storage backend for Docent.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert_document`](Store::upsert_document) | Insert or replace a document record |
/// | [`replace_chunks`](Store::replace_chunks) | Replace all chunks (and vectors) of a file |
/// | [`list_documents`](Store::list_documents) | The full document catalog |
/// | [`get_document`](Store::get_document) | One document by file name |
/// | [`keyword_search`](Store::keyword_search) | Lexical search over chosen fields |
/// | [`vector_search`](Store::vector_search) | Cosine similarity over one embedding |
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or replace the record keyed by `doc.file_name`.
    async fn upsert_document(&self, doc: &Document) -> Result<()>;

    /// Replace every chunk of `file_name`. `vectors` is either empty or
    /// parallel to `chunks`.
    async fn replace_chunks(
        &self,
        file_name: &str,
        chunks: &[Chunk],
        vectors: &[ChunkVectors],
    ) -> Result<()>;

    async fn list_documents(&self) -> Result<Vec<Document>>;

    async fn get_document(&self, file_name: &str) -> Result<Option<Document>>;

    /// Rank chunks matching any term of `query` in `fields`, best first.
    async fn keyword_search(
        &self,
        query: &str,
        fields: &[KeywordField],
        limit: usize,
        filter: &DocFilter,
    ) -> Result<Vec<ChunkCandidate>>;

    /// Rank chunks by cosine similarity of `field` to `query_vec`, best first.
    async fn vector_search(
        &self,
        query_vec: &[f32],
        field: VectorField,
        limit: usize,
        filter: &DocFilter,
    ) -> Result<Vec<ChunkCandidate>>;
}

/// Split a lexical query into lowercase terms, dropping punctuation.
pub fn query_terms(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}
