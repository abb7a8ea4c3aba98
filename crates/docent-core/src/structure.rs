//! Heading-aware document structuring.
//!
//! Turns the ordered pages of one document into chunks:
//!
//! 1. [`document_head`] bounds the text given to metadata extraction.
//! 2. Each page is classified by a [`PageStructurer`] into `H1`/`H2`/`H3`/
//!    `BODY` elements, which a [`HeadingWalker`] turns into sub-chunks.
//!    Headings carry over from one page to the next.
//! 3. [`merge_sub_chunks`] joins contiguous sub-chunks sharing a heading
//!    triple. A heading change always starts a new chunk, even when a later
//!    run returns to an earlier triple.
//! 4. [`Ingestor::ingest_document`] embeds and persists the result.

use anyhow::Result;

use crate::capability::{MetadataExtractor, PageStructurer};
use crate::embedding::EmbeddingProvider;
use crate::extract::type_catalog;
use crate::models::{Chunk, Document, DocumentMetadata, SubChunk};
use crate::store::{ChunkVectors, Store};
use crate::tags::elements;

/// Concatenate pages in order, stopping at `cap` characters.
pub fn document_head(pages: &[String], cap: usize) -> String {
    let mut head = String::new();
    let mut remaining = cap;
    for page in pages {
        if remaining == 0 {
            break;
        }
        let take: String = page.chars().take(remaining).collect();
        remaining -= take.chars().count();
        head.push_str(&take);
    }
    head
}

/// Tracks the current heading context while walking structured pages.
#[derive(Debug, Default)]
pub struct HeadingWalker {
    h1: String,
    h2: String,
    h3: String,
    sub_chunks: Vec<SubChunk>,
}

impl HeadingWalker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Walk one page's element stream. Unknown tags are skipped; the walk
    /// stops at the first point no complete element remains.
    pub fn feed(&mut self, page: u32, stream: &str) {
        for el in elements(stream) {
            let text = el.inner.trim();
            match el.name {
                "H1" => self.h1 = text.to_string(),
                "H2" => self.h2 = text.to_string(),
                "H3" => self.h3 = text.to_string(),
                "BODY" if !text.is_empty() => self.sub_chunks.push(SubChunk {
                    h1: self.h1.clone(),
                    h2: self.h2.clone(),
                    h3: self.h3.clone(),
                    page,
                    text: text.to_string(),
                }),
                _ => {}
            }
        }
    }

    pub fn finish(self) -> Vec<SubChunk> {
        self.sub_chunks
    }
}

/// Walk structured pages, numbered from 1, into sub-chunks.
pub fn walk_pages<S: AsRef<str>>(structured_pages: &[S]) -> Vec<SubChunk> {
    let mut walker = HeadingWalker::new();
    for (i, stream) in structured_pages.iter().enumerate() {
        walker.feed(i as u32 + 1, stream.as_ref());
    }
    walker.finish()
}

/// Merge contiguous sub-chunks with the same heading triple.
///
/// Bodies are joined with `"\n"` and the merged chunk keeps the page of its
/// first sub-chunk.
pub fn merge_sub_chunks(sub_chunks: Vec<SubChunk>) -> Vec<SubChunk> {
    let mut merged: Vec<SubChunk> = Vec::new();
    for sc in sub_chunks {
        match merged.last_mut() {
            Some(last) if last.same_headings(&sc) => {
                last.text.push('\n');
                last.text.push_str(&sc.text);
            }
            _ => merged.push(sc),
        }
    }
    merged
}

/// Attach document metadata and ids to merged sub-chunks.
pub fn build_chunks(doc: &Document, merged: Vec<SubChunk>) -> Vec<Chunk> {
    merged
        .into_iter()
        .enumerate()
        .map(|(i, sc)| Chunk::new(doc, i as i64, sc))
        .collect()
}

/// Ingestion tuning, decoupled from application config.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Characters of leading text passed to metadata extraction.
    pub metadata_char_cap: usize,
    /// Also compute the attribute embedding used by dual-embedding search.
    pub contextual_embeddings: bool,
    /// Texts per embedding request.
    pub embed_batch_size: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            metadata_char_cap: 10_000,
            contextual_embeddings: false,
            embed_batch_size: 64,
        }
    }
}

/// Summary of one ingested document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub file_name: String,
    pub doc_name: String,
    pub pages: usize,
    /// Pages the structurer failed on; they contribute no chunks.
    pub failed_pages: usize,
    pub sub_chunks: usize,
    pub chunks: usize,
    /// Chunks stored with a narrative embedding.
    pub embedded: usize,
}

/// Runs the structuring pipeline against injected collaborators.
pub struct Ingestor<'a> {
    pub store: &'a dyn Store,
    pub structurer: &'a dyn PageStructurer,
    pub extractor: &'a dyn MetadataExtractor,
    pub embedder: &'a dyn EmbeddingProvider,
    pub options: IngestOptions,
}

impl Ingestor<'_> {
    /// Ingest one document given its page texts in order.
    ///
    /// The document record is written before any page is structured, and
    /// re-ingesting a file replaces all of its chunks.
    pub async fn ingest_document(&self, file_name: &str, pages: &[String]) -> Result<IngestReport> {
        let head = document_head(pages, self.options.metadata_char_cap);
        let meta = match self
            .extractor
            .extract(file_name, &head, &type_catalog())
            .await
        {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(file = file_name, error = %e, "metadata extraction failed");
                DocumentMetadata::default()
            }
        };
        let doc = Document::from_metadata(file_name, meta);
        tracing::info!(
            file = file_name,
            name = %doc.doc_name,
            doc_type = %doc.doc_type,
            manufacturer = %doc.manufacturer,
            model = %doc.model,
            "document metadata"
        );
        self.store.upsert_document(&doc).await?;

        let mut walker = HeadingWalker::new();
        let mut failed_pages = 0;
        for (i, page_text) in pages.iter().enumerate() {
            let page = i as u32 + 1;
            tracing::debug!(file = file_name, page, chars = page_text.chars().count(), "structuring page");
            match self.structurer.structure_page(page_text).await {
                Ok(stream) => walker.feed(page, &stream),
                Err(e) => {
                    failed_pages += 1;
                    tracing::warn!(file = file_name, page, error = %e, "page structuring failed");
                }
            }
        }
        let sub_chunks = walker.finish();
        let sub_chunk_count = sub_chunks.len();
        let chunks = build_chunks(&doc, merge_sub_chunks(sub_chunks));

        let vectors = self.embed_chunks(file_name, &chunks).await;
        let embedded = vectors.iter().filter(|v| v.vector.is_some()).count();
        self.store.replace_chunks(file_name, &chunks, &vectors).await?;

        tracing::info!(
            file = file_name,
            pages = pages.len(),
            chunks = chunks.len(),
            embedded,
            "document ingested"
        );
        Ok(IngestReport {
            file_name: file_name.to_string(),
            doc_name: doc.doc_name,
            pages: pages.len(),
            failed_pages,
            sub_chunks: sub_chunk_count,
            chunks: chunks.len(),
            embedded,
        })
    }

    async fn embed_chunks(&self, file_name: &str, chunks: &[Chunk]) -> Vec<ChunkVectors> {
        let narrative: Vec<String> = chunks.iter().map(Chunk::embedding_input).collect();
        let narrative = self.embed_all(file_name, &narrative).await;
        let contextual = if self.options.contextual_embeddings {
            let inputs: Vec<String> = chunks.iter().map(Chunk::context_input).collect();
            self.embed_all(file_name, &inputs).await
        } else {
            vec![None; chunks.len()]
        };
        narrative
            .into_iter()
            .zip(contextual)
            .map(|(vector, context_vector)| ChunkVectors {
                vector,
                context_vector,
            })
            .collect()
    }

    /// Embed in batches. A failed batch leaves its chunks without vectors.
    async fn embed_all(&self, file_name: &str, texts: &[String]) -> Vec<Option<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.options.embed_batch_size.max(1)) {
            match self.embedder.embed_texts(batch).await {
                Ok(vecs) if vecs.len() == batch.len() => out.extend(vecs.into_iter().map(Some)),
                Ok(vecs) => {
                    tracing::warn!(
                        file = file_name,
                        expected = batch.len(),
                        got = vecs.len(),
                        "embedding count mismatch"
                    );
                    out.extend(std::iter::repeat(None).take(batch.len()));
                }
                Err(e) => {
                    tracing::warn!(file = file_name, error = %e, "embedding failed");
                    out.extend(std::iter::repeat(None).take(batch.len()));
                }
            }
        }
        out
    }
}
