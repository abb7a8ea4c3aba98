//! Core data models shared by ingestion and retrieval.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A source document registered in the catalog, keyed by `file_name`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub file_name: String,
    pub doc_name: String,
    pub doc_type: String,
    pub doc_description: String,
    pub manufacturer: String,
    pub model: String,
}

impl Document {
    /// Build the catalog record for `file_name` from extracted metadata.
    pub fn from_metadata(file_name: &str, meta: DocumentMetadata) -> Self {
        Self {
            file_name: file_name.to_string(),
            doc_name: meta.name,
            doc_type: meta.doc_type,
            doc_description: meta.description,
            manufacturer: meta.manufacturer,
            model: meta.model,
        }
    }

    /// The name the agent sees in the document directory, falling back to
    /// the file name when extraction produced no title.
    pub fn display_name(&self) -> &str {
        if self.doc_name.trim().is_empty() {
            &self.file_name
        } else {
            &self.doc_name
        }
    }
}

/// Output of the metadata-extraction capability. Any field may be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub name: String,
    pub doc_type: String,
    pub description: String,
    pub manufacturer: String,
    pub model: String,
}

/// One `BODY` element together with the heading context it was seen under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubChunk {
    pub h1: String,
    pub h2: String,
    pub h3: String,
    pub page: u32,
    pub text: String,
}

impl SubChunk {
    /// True when both sub-chunks sit under the same (H1, H2, H3) triple.
    pub fn same_headings(&self, other: &SubChunk) -> bool {
        self.h1 == other.h1 && self.h2 == other.h2 && self.h3 == other.h3
    }
}

/// A retrievable unit: a contiguous body-text run under one heading triple,
/// carrying a copy of its document's metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub file_name: String,
    pub chunk_index: i64,
    pub page: u32,
    pub h1: String,
    pub h2: String,
    pub h3: String,
    pub text: String,
    pub doc_name: String,
    pub doc_type: String,
    pub doc_description: String,
    pub manufacturer: String,
    pub model: String,
}

impl Chunk {
    /// Assemble a chunk from a merged sub-chunk run and its owning document.
    ///
    /// The id is derived from `file_name` and `index`, so re-ingesting the
    /// same file yields the same chunk ids.
    pub fn new(doc: &Document, index: i64, section: SubChunk) -> Self {
        Self {
            id: chunk_id(&doc.file_name, index),
            file_name: doc.file_name.clone(),
            chunk_index: index,
            page: section.page,
            h1: section.h1,
            h2: section.h2,
            h3: section.h3,
            text: section.text,
            doc_name: doc.doc_name.clone(),
            doc_type: doc.doc_type.clone(),
            doc_description: doc.doc_description.clone(),
            manufacturer: doc.manufacturer.clone(),
            model: doc.model.clone(),
        }
    }

    /// Text fed to the narrative embedding: heading context then body.
    pub fn embedding_input(&self) -> String {
        format!("{} {} {} {}", self.h1, self.h2, self.h3, self.text)
    }

    /// Text fed to the contextual (attribute) embedding.
    pub fn context_input(&self) -> String {
        let mut parts = Vec::new();
        if !self.doc_name.is_empty() {
            parts.push(format!("Document: {}.", self.doc_name));
        }
        if !self.doc_type.is_empty() {
            parts.push(format!("Type: {}.", self.doc_type));
        }
        let product = format!("{} {}", self.manufacturer, self.model);
        if !product.trim().is_empty() {
            parts.push(format!("Product: {}.", product.trim()));
        }
        let headings: Vec<&str> = [self.h1.as_str(), self.h2.as_str(), self.h3.as_str()]
            .into_iter()
            .filter(|h| !h.is_empty())
            .collect();
        if !headings.is_empty() {
            parts.push(format!("Section: {}.", headings.join(" > ")));
        }
        parts.join(" ")
    }
}

fn chunk_id(file_name: &str, index: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file_name.as_bytes());
    hasher.update([0u8]);
    hasher.update(index.to_le_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..32].to_string()
}

/// Which documents a retrieval may draw from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DocFilter {
    /// No restriction.
    #[default]
    All,
    /// Only chunks whose `doc_name` or `file_name` is listed.
    Only(Vec<String>),
}

impl DocFilter {
    /// Parse the agent's `DOCS` value: `*` means every document, anything
    /// else is a `|`-separated list of names. A blank list matches nothing.
    pub fn from_docs_tag(raw: &str) -> Self {
        if raw.trim() == "*" {
            return DocFilter::All;
        }
        let names = raw
            .split('|')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        DocFilter::Only(names)
    }

    pub fn matches(&self, doc_name: &str, file_name: &str) -> bool {
        match self {
            DocFilter::All => true,
            DocFilter::Only(names) => names.iter().any(|n| n == doc_name || n == file_name),
        }
    }

    pub fn names(&self) -> &[String] {
        match self {
            DocFilter::All => &[],
            DocFilter::Only(names) => names,
        }
    }
}

impl std::fmt::Display for DocFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocFilter::All => write!(f, "*"),
            DocFilter::Only(names) => write!(f, "{}", names.join(", ")),
        }
    }
}

/// A fused retrieval result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    /// Chunk id (the identity results are deduplicated by).
    pub id: String,
    pub file_name: String,
    pub doc_name: String,
    pub page: u32,
    pub text: String,
    /// Weighted RRF contribution from the vector list, or the raw
    /// similarity in dual-embedding mode.
    pub vector_score: f64,
    /// Weighted RRF contribution from the lexical list.
    pub fulltext_score: f64,
    /// Combined score results are sorted by.
    pub score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_docs_tag_wildcard() {
        assert_eq!(DocFilter::from_docs_tag("*"), DocFilter::All);
        assert_eq!(DocFilter::from_docs_tag("  * "), DocFilter::All);
    }

    #[test]
    fn test_blank_docs_tag_matches_nothing() {
        for raw in ["", "|", "  ", " | | "] {
            let f = DocFilter::from_docs_tag(raw);
            assert_ne!(f, DocFilter::All);
            assert_eq!(f, DocFilter::Only(vec![]));
            assert!(!f.matches("Pump Manual", "pump.pdf"));
        }
    }

    #[test]
    fn test_docs_tag_split_and_trim() {
        let f = DocFilter::from_docs_tag(" Pump Manual | Valve Guide |");
        assert_eq!(
            f,
            DocFilter::Only(vec!["Pump Manual".to_string(), "Valve Guide".to_string()])
        );
        assert!(f.matches("Valve Guide", "valve.pdf"));
        assert!(!f.matches("Other", "other.pdf"));
    }

    #[test]
    fn test_filter_matches_file_name() {
        let f = DocFilter::Only(vec!["pump.pdf".to_string()]);
        assert!(f.matches("Pump Manual", "pump.pdf"));
    }

    #[test]
    fn test_chunk_id_deterministic() {
        assert_eq!(chunk_id("a.pdf", 3), chunk_id("a.pdf", 3));
        assert_ne!(chunk_id("a.pdf", 3), chunk_id("a.pdf", 4));
        assert_eq!(chunk_id("a.pdf", 0).len(), 32);
    }

    #[test]
    fn test_embedding_input_prefixes_headings() {
        let doc = Document {
            file_name: "m.pdf".to_string(),
            ..Default::default()
        };
        let c = Chunk::new(
            &doc,
            0,
            SubChunk {
                h1: "Safety".to_string(),
                h2: "Gear".to_string(),
                h3: String::new(),
                page: 2,
                text: "Wear gloves.".to_string(),
            },
        );
        assert_eq!(c.embedding_input(), "Safety Gear  Wear gloves.");
        assert_eq!(c.page, 2);
    }
}
