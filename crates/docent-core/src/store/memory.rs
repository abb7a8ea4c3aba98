//! In-memory [`Store`] implementation for testing.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock` for thread safety.
//! Vector search is brute-force cosine similarity over all stored vectors.
//! Keyword search counts query terms that appear as whole words in the
//! selected fields.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::Result;
use async_trait::async_trait;

use crate::capability::DocumentCatalog;
use crate::embedding::cosine_similarity;
use crate::models::{Chunk, DocFilter, Document};

use super::{query_terms, ChunkCandidate, ChunkVectors, KeywordField, Store, VectorField};

struct StoredChunk {
    chunk: Chunk,
    vectors: ChunkVectors,
}

/// In-memory store for tests and throwaway sessions.
pub struct InMemoryStore {
    docs: RwLock<HashMap<String, Document>>,
    chunks: RwLock<Vec<StoredChunk>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(HashMap::new()),
            chunks: RwLock::new(Vec::new()),
        }
    }

    /// Number of stored chunks across all documents.
    pub fn chunk_count(&self) -> usize {
        read(&self.chunks).len()
    }

    /// Stored chunks of `file_name` in index order.
    pub fn chunks_for(&self, file_name: &str) -> Vec<Chunk> {
        let mut out: Vec<Chunk> = read(&self.chunks)
            .iter()
            .filter(|sc| sc.chunk.file_name == file_name)
            .map(|sc| sc.chunk.clone())
            .collect();
        out.sort_by_key(|c| c.chunk_index);
        out
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

// Lock poisoning is ignored.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

fn candidate(chunk: &Chunk, raw_score: f64) -> ChunkCandidate {
    ChunkCandidate {
        chunk_id: chunk.id.clone(),
        file_name: chunk.file_name.clone(),
        doc_name: chunk.doc_name.clone(),
        page: chunk.page,
        text: chunk.text.clone(),
        raw_score,
    }
}

fn sort_and_truncate(candidates: &mut Vec<ChunkCandidate>, limit: usize) {
    candidates.sort_by(|a, b| {
        b.raw_score
            .partial_cmp(&a.raw_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates.truncate(limit);
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert_document(&self, doc: &Document) -> Result<()> {
        write(&self.docs).insert(doc.file_name.clone(), doc.clone());
        Ok(())
    }

    async fn replace_chunks(
        &self,
        file_name: &str,
        chunks: &[Chunk],
        vectors: &[ChunkVectors],
    ) -> Result<()> {
        if !vectors.is_empty() && vectors.len() != chunks.len() {
            anyhow::bail!(
                "vector count {} does not match chunk count {}",
                vectors.len(),
                chunks.len()
            );
        }
        let mut stored = write(&self.chunks);
        stored.retain(|sc| sc.chunk.file_name != file_name);
        for (i, c) in chunks.iter().enumerate() {
            stored.push(StoredChunk {
                chunk: c.clone(),
                vectors: vectors.get(i).cloned().unwrap_or_default(),
            });
        }
        Ok(())
    }

    async fn list_documents(&self) -> Result<Vec<Document>> {
        let mut docs: Vec<Document> = read(&self.docs).values().cloned().collect();
        docs.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(docs)
    }

    async fn get_document(&self, file_name: &str) -> Result<Option<Document>> {
        Ok(read(&self.docs).get(file_name).cloned())
    }

    async fn keyword_search(
        &self,
        query: &str,
        fields: &[KeywordField],
        limit: usize,
        filter: &DocFilter,
    ) -> Result<Vec<ChunkCandidate>> {
        let terms: HashSet<String> = query_terms(query).into_iter().collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let fields = if fields.is_empty() {
            KeywordField::DEFAULT
        } else {
            fields
        };

        let stored = read(&self.chunks);
        let mut candidates: Vec<ChunkCandidate> = stored
            .iter()
            .filter(|sc| filter.matches(&sc.chunk.doc_name, &sc.chunk.file_name))
            .filter_map(|sc| {
                let words: HashSet<String> = fields
                    .iter()
                    .flat_map(|f| query_terms(f.value(&sc.chunk)))
                    .collect();
                let matches = terms.iter().filter(|t| words.contains(*t)).count();
                (matches > 0).then(|| candidate(&sc.chunk, matches as f64))
            })
            .collect();
        sort_and_truncate(&mut candidates, limit);
        Ok(candidates)
    }

    async fn vector_search(
        &self,
        query_vec: &[f32],
        field: VectorField,
        limit: usize,
        filter: &DocFilter,
    ) -> Result<Vec<ChunkCandidate>> {
        let stored = read(&self.chunks);
        let mut candidates: Vec<ChunkCandidate> = stored
            .iter()
            .filter(|sc| filter.matches(&sc.chunk.doc_name, &sc.chunk.file_name))
            .filter_map(|sc| {
                let v = match field {
                    VectorField::Narrative => sc.vectors.vector.as_ref(),
                    VectorField::Contextual => sc.vectors.context_vector.as_ref(),
                }?;
                let sim = cosine_similarity(query_vec, v) as f64;
                Some(candidate(&sc.chunk, sim))
            })
            .collect();
        sort_and_truncate(&mut candidates, limit);
        Ok(candidates)
    }
}

#[async_trait]
impl DocumentCatalog for InMemoryStore {
    async fn list_documents(&self) -> Result<Vec<Document>> {
        Store::list_documents(self).await
    }
}
