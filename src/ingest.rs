//! Ingestion of source files into the chunk store.
//!
//! A path is either a single file or a directory walked with include and
//! exclude globs. Each file is split into pages ([`crate::pages`]) and run
//! through the core [`Ingestor`], which extracts metadata, structures each
//! page, merges heading runs into chunks, embeds them, and stores them.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use docent_core::extract::{ModelMetadataExtractor, ModelPageStructurer};
use docent_core::structure::{IngestReport, Ingestor};

use crate::config::{Config, IngestConfig};
use crate::pages::load_pages;
use crate::services::Services;

/// One source file selected for ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Catalog key: the path relative to the ingest root, `/`-separated.
    pub file_name: String,
}

/// Totals for one `ingest` run.
#[derive(Debug, Default)]
pub struct IngestSummary {
    pub reports: Vec<IngestReport>,
    /// Files that could not be read or stored, with the reason.
    pub failed: Vec<(String, String)>,
}

impl IngestSummary {
    pub fn chunks(&self) -> usize {
        self.reports.iter().map(|r| r.chunks).sum()
    }

    pub fn embedded(&self) -> usize {
        self.reports.iter().map(|r| r.embedded).sum()
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Resolve `root` to the files to ingest, sorted by file name.
pub fn collect_sources(root: &Path, ingest: &IngestConfig) -> Result<Vec<SourceFile>> {
    if !root.exists() {
        bail!("Ingest path does not exist: {}", root.display());
    }

    if root.is_file() {
        let file_name = root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        return Ok(vec![SourceFile {
            path: root.to_path_buf(),
            file_name,
        }]);
    }

    let include_set = build_globset(&ingest.include_globs)?;
    let mut excludes = vec!["**/.git/**".to_string()];
    excludes.extend(ingest.exclude_globs.clone());
    let exclude_set = build_globset(&excludes)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join("/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }
        files.push(SourceFile {
            path: path.to_path_buf(),
            file_name: rel_str,
        });
    }

    files.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Ok(files)
}

/// Ingest every source under `root`. A failing file is recorded and the
/// run continues with the next one.
pub async fn ingest_path(services: &Services, root: &Path) -> Result<IngestSummary> {
    let config = &services.config;
    let sources = collect_sources(root, &config.ingest)?;

    let structurer = ModelPageStructurer::new(services.model.clone());
    let extractor = ModelMetadataExtractor::new(services.model.clone());
    let ingestor = Ingestor {
        store: services.store.as_ref(),
        structurer: &structurer,
        extractor: &extractor,
        embedder: services.embedder.as_ref(),
        options: config.ingest.options(&config.embedding),
    };

    let mut summary = IngestSummary::default();
    for source in &sources {
        let pages = match load_pages(&source.path, config.ingest.page_char_limit) {
            Ok(pages) => pages,
            Err(e) => {
                tracing::warn!(file = %source.file_name, error = %e, "skipping unreadable source");
                summary.failed.push((source.file_name.clone(), e.to_string()));
                continue;
            }
        };
        tracing::info!(file = %source.file_name, pages = pages.len(), "ingesting");

        match ingestor.ingest_document(&source.file_name, &pages).await {
            Ok(report) => summary.reports.push(report),
            Err(e) => {
                tracing::error!(file = %source.file_name, error = %e, "ingestion failed");
                summary.failed.push((source.file_name.clone(), e.to_string()));
            }
        }
    }

    Ok(summary)
}

/// CLI entry point for `docent ingest`.
pub async fn run_ingest(config: &Config, path: &Path) -> Result<()> {
    let services = Services::connect(config.clone()).await?;
    let summary = ingest_path(&services, path).await?;

    println!("ingest {}", path.display());
    for report in &summary.reports {
        println!(
            "  {} ({}): {} pages, {} chunks, {} embedded",
            report.file_name,
            if report.doc_name.is_empty() {
                "untitled"
            } else {
                report.doc_name.as_str()
            },
            report.pages,
            report.chunks,
            report.embedded
        );
    }
    for (file, reason) in &summary.failed {
        println!("  {} FAILED: {}", file, reason);
    }
    println!("  documents: {}", summary.reports.len());
    println!("  chunks written: {}", summary.chunks());
    if config.embedding.is_enabled() {
        println!("  embeddings written: {}", summary.embedded());
    }
    println!("ok");

    services.store.pool().close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_sources_applies_globs() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("pumps/.git")).unwrap();
        std::fs::write(tmp.path().join("pumps/manual.txt"), "x").unwrap();
        std::fs::write(tmp.path().join("pumps/.git/HEAD.txt"), "x").unwrap();
        std::fs::write(tmp.path().join("a.pdf"), "x").unwrap();
        std::fs::write(tmp.path().join("photo.png"), "x").unwrap();
        std::fs::write(tmp.path().join("draft.txt"), "x").unwrap();

        let ingest = IngestConfig {
            exclude_globs: vec!["draft.txt".to_string()],
            ..IngestConfig::default()
        };
        let files = collect_sources(tmp.path(), &ingest).unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.file_name.as_str()).collect();
        assert_eq!(names, vec!["a.pdf", "pumps/manual.txt"]);
    }

    #[test]
    fn test_collect_single_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bulletin.txt");
        std::fs::write(&path, "x").unwrap();
        let files = collect_sources(&path, &IngestConfig::default()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].file_name, "bulletin.txt");
    }

    #[test]
    fn test_missing_path_is_error() {
        let err = collect_sources(Path::new("/definitely/not/here"), &IngestConfig::default())
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
