//! Application-level search entry points.
//!
//! The fusion algorithms live in `docent_core::search` and run against the
//! [`Store`](docent_core::store::Store) trait. This wrapper embeds the
//! query, applies config defaults, and formats CLI output.
//!
//! # Search Modes
//!
//! - **Hybrid**: vector and FTS5 lists fused with weighted Reciprocal Rank Fusion.
//! - **Dual**: narrative and attribute embeddings merged by best similarity.

use anyhow::Result;

use docent_core::models::{DocFilter, SearchHit};
use docent_core::search::{self as core_search, SearchMode, SearchRequest};

use crate::config::Config;
use crate::services::Services;

/// Caller-facing search parameters; `None` fields fall back to config.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub query: String,
    pub keywords: Option<String>,
    /// Document names or file names to restrict to; empty means all.
    pub docs: Vec<String>,
    pub mode: Option<SearchMode>,
    pub limit: Option<usize>,
}

impl SearchOptions {
    pub fn filter(&self) -> DocFilter {
        let names: Vec<String> = self
            .docs
            .iter()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty() && d != "*")
            .collect();
        if names.is_empty() {
            DocFilter::All
        } else {
            DocFilter::Only(names)
        }
    }
}

/// Shared implementation behind `docent search` and `POST /search`.
///
/// A query that cannot be embedded yields no results rather than an error.
pub async fn search_documents(services: &Services, opts: &SearchOptions) -> Result<Vec<SearchHit>> {
    if opts.query.trim().is_empty() {
        return Ok(Vec::new());
    }

    let query_vec = match services.embedder.embed(&opts.query).await {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(error = %e, "query embedding failed, returning no results");
            None
        }
    };

    let filter = opts.filter();
    let keywords = opts
        .keywords
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty());
    let req = SearchRequest {
        query: &opts.query,
        keywords,
        query_vec: query_vec.as_deref(),
        filter: &filter,
        limit: opts.limit.unwrap_or(services.config.retrieval.final_limit),
        mode: opts.mode.unwrap_or(services.mode),
    };

    core_search::search(services.store.as_ref(), &req, &services.params).await
}

/// CLI entry point for `docent search`.
pub async fn run_search(config: &Config, opts: SearchOptions) -> Result<()> {
    let services = Services::connect(config.clone()).await?;
    let results = search_documents(&services, &opts).await?;
    services.store.pool().close().await;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in results.iter().enumerate() {
        let title = if hit.doc_name.is_empty() {
            "(untitled)"
        } else {
            hit.doc_name.as_str()
        };
        println!("{}. [{:.4}] {} / {}", i + 1, hit.score, hit.file_name, title);
        println!(
            "    scoring: vector={:.4}  fulltext={:.4}",
            hit.vector_score, hit.fulltext_score
        );
        println!("    page: {}", hit.page);
        println!("    excerpt: \"{}\"", excerpt(&hit.text, 240));
        println!("    id: {}", hit.id);
        println!();
    }

    Ok(())
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    let flat = flat.trim();
    if flat.chars().count() <= max_chars {
        return flat.to_string();
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}
