//! Hybrid retrieval with Reciprocal Rank Fusion.
//!
//! The algorithm operates entirely through the [`Store`] trait, with no
//! database or configuration dependencies. The caller embeds the query and
//! passes [`SearchParams`]; [`StoreRetriever`] bundles both for the agent.
//!
//! # Hybrid scoring
//!
//! 1. Fetch `candidate_k` vector candidates (cosine similarity).
//! 2. Fetch `candidate_k` lexical candidates over the keyword fields.
//! 3. Each list's 0-based rank `r` contributes `weight / (r + rrf_k)`.
//! 4. Weights are 0.8 vector / 0.2 lexical, or 0.5 / 0.5 when the lexical
//!    query differs from the semantic one or the semantic query is short.
//! 5. Total = vector contribution + lexical contribution (0 when absent).
//! 6. Sort by total (desc), first appearance breaking ties, and truncate.
//!
//! # Dual-embedding scoring
//!
//! The query vector is compared against both the narrative and the
//! contextual chunk embeddings; each chunk keeps its higher raw similarity.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::capability::Retriever;
use crate::embedding::EmbeddingProvider;
use crate::models::{DocFilter, SearchHit};
use crate::store::{ChunkCandidate, KeywordField, Store, VectorField};

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone)]
pub struct SearchParams {
    /// Candidates fetched from each ranked list.
    pub candidate_k: usize,
    /// RRF smoothing constant `K`.
    pub rrf_k: f64,
    /// Fields the lexical list searches. Empty means [`KeywordField::DEFAULT`].
    pub keyword_fields: Vec<KeywordField>,
    /// Semantic queries shorter than this use balanced weights.
    pub short_query_chars: usize,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            candidate_k: 20,
            rrf_k: 40.0,
            keyword_fields: KeywordField::DEFAULT.to_vec(),
            short_query_chars: 20,
        }
    }
}

/// Which fusion strategy a retrieval uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SearchMode {
    #[default]
    Hybrid,
    Dual,
}

impl FromStr for SearchMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "hybrid" => Ok(SearchMode::Hybrid),
            "dual" => Ok(SearchMode::Dual),
            other => bail!("Unknown search mode: {}. Use hybrid or dual.", other),
        }
    }
}

/// Per-list weights applied to RRF contributions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeights {
    pub vector: f64,
    pub lexical: f64,
}

impl FusionWeights {
    pub const VECTOR_LEANING: FusionWeights = FusionWeights {
        vector: 0.8,
        lexical: 0.2,
    };
    pub const BALANCED: FusionWeights = FusionWeights {
        vector: 0.5,
        lexical: 0.5,
    };

    /// Pick weights for one query pair.
    ///
    /// Balanced when the caller supplied a distinct lexical query, or when
    /// the semantic query has fewer than `short_query_chars` characters.
    pub fn select(semantic_query: &str, lexical_query: &str, short_query_chars: usize) -> Self {
        if lexical_query != semantic_query || semantic_query.chars().count() < short_query_chars {
            Self::BALANCED
        } else {
            Self::VECTOR_LEANING
        }
    }
}

/// Contribution of an item at 0-based `rank` in a list weighted `weight`.
pub fn rrf_contribution(weight: f64, rank: usize, rrf_k: f64) -> f64 {
    weight / (rank as f64 + rrf_k)
}

struct Fused<'a> {
    cand: &'a ChunkCandidate,
    vector: f64,
    lexical: f64,
}

impl Fused<'_> {
    fn hit(&self) -> SearchHit {
        SearchHit {
            id: self.cand.chunk_id.clone(),
            file_name: self.cand.file_name.clone(),
            doc_name: self.cand.doc_name.clone(),
            page: self.cand.page,
            text: self.cand.text.clone(),
            vector_score: self.vector,
            fulltext_score: self.lexical,
            score: self.vector + self.lexical,
        }
    }
}

/// Fuse two ranked candidate lists with weighted RRF.
///
/// An id appearing more than once in the same list keeps its best
/// contribution from that list.
pub fn fuse_ranked(
    vector: &[ChunkCandidate],
    lexical: &[ChunkCandidate],
    weights: FusionWeights,
    rrf_k: f64,
    limit: usize,
) -> Vec<SearchHit> {
    let mut order: Vec<Fused<'_>> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for (rank, cand) in vector.iter().enumerate() {
        let c = rrf_contribution(weights.vector, rank, rrf_k);
        let slot = *index.entry(cand.chunk_id.as_str()).or_insert_with(|| {
            order.push(Fused {
                cand,
                vector: 0.0,
                lexical: 0.0,
            });
            order.len() - 1
        });
        order[slot].vector = order[slot].vector.max(c);
    }
    for (rank, cand) in lexical.iter().enumerate() {
        let c = rrf_contribution(weights.lexical, rank, rrf_k);
        let slot = *index.entry(cand.chunk_id.as_str()).or_insert_with(|| {
            order.push(Fused {
                cand,
                vector: 0.0,
                lexical: 0.0,
            });
            order.len() - 1
        });
        order[slot].lexical = order[slot].lexical.max(c);
    }

    let mut hits: Vec<SearchHit> = order.iter().map(Fused::hit).collect();
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(limit);
    hits
}

/// Merge two similarity-ranked lists, keeping each id's higher raw score.
pub fn merge_by_similarity(
    narrative: &[ChunkCandidate],
    contextual: &[ChunkCandidate],
    limit: usize,
) -> Vec<SearchHit> {
    let mut best: Vec<&ChunkCandidate> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for cand in narrative.iter().chain(contextual) {
        match index.get(cand.chunk_id.as_str()) {
            Some(&i) => {
                if cand.raw_score > best[i].raw_score {
                    best[i] = cand;
                }
            }
            None => {
                index.insert(cand.chunk_id.as_str(), best.len());
                best.push(cand);
            }
        }
    }

    let mut hits: Vec<SearchHit> = best
        .into_iter()
        .map(|c| SearchHit {
            id: c.chunk_id.clone(),
            file_name: c.file_name.clone(),
            doc_name: c.doc_name.clone(),
            page: c.page,
            text: c.text.clone(),
            vector_score: c.raw_score,
            fulltext_score: 0.0,
            score: c.raw_score,
        })
        .collect();
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(limit);
    hits
}

/// Bundles all inputs for a single search invocation.
#[derive(Debug, Clone)]
pub struct SearchRequest<'a> {
    /// Semantic query text (the text that was embedded).
    pub query: &'a str,
    /// Lexical query; defaults to `query`.
    pub keywords: Option<&'a str>,
    /// Query embedding. `None` means embedding failed and yields no results.
    pub query_vec: Option<&'a [f32]>,
    pub filter: &'a DocFilter,
    pub limit: usize,
    pub mode: SearchMode,
}

/// Run one retrieval against a [`Store`] backend.
///
/// This is the function all frontends (agent, CLI, HTTP) delegate to.
pub async fn search<S: Store + ?Sized>(
    store: &S,
    req: &SearchRequest<'_>,
    params: &SearchParams,
) -> Result<Vec<SearchHit>> {
    let Some(query_vec) = req.query_vec else {
        return Ok(Vec::new());
    };
    if req.limit == 0 {
        return Ok(Vec::new());
    }

    match req.mode {
        SearchMode::Hybrid => {
            let keywords = req.keywords.unwrap_or(req.query);
            let vector = store
                .vector_search(
                    query_vec,
                    VectorField::Narrative,
                    params.candidate_k,
                    req.filter,
                )
                .await?;
            let lexical = store
                .keyword_search(
                    keywords,
                    &params.keyword_fields,
                    params.candidate_k,
                    req.filter,
                )
                .await?;
            let weights = FusionWeights::select(req.query, keywords, params.short_query_chars);
            Ok(fuse_ranked(
                &vector,
                &lexical,
                weights,
                params.rrf_k,
                req.limit,
            ))
        }
        SearchMode::Dual => {
            let narrative = store
                .vector_search(
                    query_vec,
                    VectorField::Narrative,
                    params.candidate_k,
                    req.filter,
                )
                .await?;
            let contextual = store
                .vector_search(
                    query_vec,
                    VectorField::Contextual,
                    params.candidate_k,
                    req.filter,
                )
                .await?;
            Ok(merge_by_similarity(&narrative, &contextual, req.limit))
        }
    }
}

/// [`Retriever`] backed by a [`Store`] and an embedding provider.
pub struct StoreRetriever {
    store: Arc<dyn Store>,
    embedder: Arc<dyn EmbeddingProvider>,
    params: SearchParams,
    mode: SearchMode,
}

impl StoreRetriever {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Arc<dyn EmbeddingProvider>,
        params: SearchParams,
        mode: SearchMode,
    ) -> Self {
        Self {
            store,
            embedder,
            params,
            mode,
        }
    }
}

#[async_trait]
impl Retriever for StoreRetriever {
    async fn retrieve(
        &self,
        search_text: &str,
        filter: &DocFilter,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let query_vec = match self.embedder.embed(search_text).await {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(error = %e, "query embedding failed, returning no results");
                None
            }
        };
        let req = SearchRequest {
            query: search_text,
            keywords: None,
            query_vec: query_vec.as_deref(),
            filter,
            limit,
            mode: self.mode,
        };
        search(self.store.as_ref(), &req, &self.params).await
    }
}
