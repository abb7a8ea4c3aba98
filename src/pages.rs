//! Split source files into ordered page texts.
//!
//! PDFs keep their real pages (via `pdf-extract`). Plain text has no page
//! structure, so it is cut into pseudo-pages of at most `page_char_limit`
//! characters, backing off to the previous space so words stay whole.

use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PageError {
    #[error("unsupported file type: {0}")]
    Unsupported(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
}

/// Source formats the ingester understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Text,
    Pdf,
}

impl SourceKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "txt" | "text" | "md" => Some(SourceKind::Text),
            "pdf" => Some(SourceKind::Pdf),
            _ => None,
        }
    }
}

/// Cut `text` into pseudo-pages of at most `limit` characters.
pub fn paginate_text(text: &str, limit: usize) -> Vec<String> {
    let chars: Vec<char> = text.trim().chars().collect();
    let limit = limit.max(1);
    let mut pages = Vec::new();
    let mut position = 0;

    while position < chars.len() {
        let mut end = (position + limit).min(chars.len());
        if end < chars.len() && !chars[end].is_whitespace() {
            if let Some(space) = chars[position..end].iter().rposition(|c| *c == ' ') {
                if space > 0 {
                    end = position + space;
                }
            }
        }

        let page: String = chars[position..end].iter().collect();
        let page = page.trim();
        if !page.is_empty() {
            pages.push(page.to_string());
        }
        position = end;
    }

    pages
}

/// Per-page text of a PDF held in memory.
pub fn pdf_pages(bytes: &[u8]) -> Result<Vec<String>, PageError> {
    pdf_extract::extract_text_from_mem_by_pages(bytes).map_err(|e| PageError::Pdf(e.to_string()))
}

/// Read `path` and return its pages in order.
pub fn load_pages(path: &Path, page_char_limit: usize) -> Result<Vec<String>, PageError> {
    let kind = SourceKind::from_path(path)
        .ok_or_else(|| PageError::Unsupported(path.display().to_string()))?;
    let bytes = std::fs::read(path).map_err(|source| PageError::Io {
        path: path.display().to_string(),
        source,
    })?;

    match kind {
        SourceKind::Text => Ok(paginate_text(
            &String::from_utf8_lossy(&bytes),
            page_char_limit,
        )),
        SourceKind::Pdf => pdf_pages(&bytes),
    }
}
