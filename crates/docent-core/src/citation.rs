//! Rewrites inline `<SOURCE ...>` citation markers into markdown links.
//!
//! A marker looks like
//! `<SOURCE doc_file_name='manual.pdf' page='12'>quoted text</SOURCE>`
//! (single or double quotes, page may be unquoted). Each becomes
//! `quoted text [source 📄](url#page=12)` when a link can be resolved, or
//! just `quoted text` when it cannot.
//!
//! Resolutions are memoized per answer, failures included, and successful
//! links are kept in a process-wide [`LinkCache`] until their TTL lapses.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use moka::sync::Cache;
use regex::Regex;

use crate::capability::LinkResolver;

static SOURCE_MARKER: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r#"(?s)<SOURCE doc_file_name=['"]([^'"]+)['"] page=['"]?([^'"> ]+)['"]?>(.*?)</SOURCE>"#,
    )
    .ok()
});

type LinkKey = (String, String);

struct Marker<'a> {
    start: usize,
    end: usize,
    file: &'a str,
    page: &'a str,
    span: &'a str,
}

/// Entries kept before the least useful links are evicted.
pub const LINK_CACHE_CAPACITY: u64 = 10_000;

/// Process-wide cache of resolved citation links, bounded in size and age.
pub struct LinkCache {
    entries: Cache<LinkKey, String>,
}

impl LinkCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, LINK_CACHE_CAPACITY)
    }

    pub fn with_capacity(ttl: Duration, max_entries: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();
        Self { entries }
    }

    pub fn get(&self, file_name: &str, page: &str) -> Option<String> {
        self.entries
            .get(&(file_name.to_string(), page.to_string()))
    }

    pub fn insert(&self, file_name: &str, page: &str, link: String) {
        self.entries
            .insert((file_name.to_string(), page.to_string()), link);
    }

    /// Live entries, after pending evictions have been applied.
    pub fn len(&self) -> usize {
        self.entries.run_pending_tasks();
        self.entries.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Replaces citation markers in final answers.
pub struct CitationLinker {
    resolver: Arc<dyn LinkResolver>,
    cache: Arc<LinkCache>,
    expiry_secs: u64,
}

impl CitationLinker {
    /// Links are requested with `expiry_secs` validity and cached for half
    /// of that, so a cached link always has time left when served.
    pub fn new(resolver: Arc<dyn LinkResolver>, expiry_secs: u64) -> Self {
        let ttl = Duration::from_secs(expiry_secs / 2);
        Self::with_cache(resolver, Arc::new(LinkCache::new(ttl)), expiry_secs)
    }

    pub fn with_cache(
        resolver: Arc<dyn LinkResolver>,
        cache: Arc<LinkCache>,
        expiry_secs: u64,
    ) -> Self {
        Self {
            resolver,
            cache,
            expiry_secs,
        }
    }

    pub fn cache(&self) -> &LinkCache {
        &self.cache
    }

    async fn resolve(&self, file_name: &str, page: &str) -> Option<String> {
        if let Some(link) = self.cache.get(file_name, page) {
            return Some(link);
        }
        match self.resolver.resolve(file_name, self.expiry_secs).await {
            Ok(url) => {
                let link = format!("{}#page={}", url, page);
                self.cache.insert(file_name, page, link.clone());
                Some(link)
            }
            Err(e) => {
                tracing::warn!(file = file_name, error = %e, "citation link resolution failed");
                None
            }
        }
    }

    /// Rewrite every marker in `answer`. Never fails.
    pub async fn link(&self, answer: &str) -> String {
        let Some(re) = SOURCE_MARKER.as_ref() else {
            return answer.to_string();
        };

        let markers: Vec<Marker<'_>> = re
            .captures_iter(answer)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                Some(Marker {
                    start: whole.start(),
                    end: whole.end(),
                    file: caps.get(1)?.as_str(),
                    page: caps.get(2)?.as_str(),
                    span: caps.get(3)?.as_str().trim(),
                })
            })
            .collect();

        let mut resolved: HashMap<LinkKey, Option<String>> = HashMap::new();
        let mut out = String::with_capacity(answer.len());
        let mut last = 0;
        for m in markers {
            let key = (m.file.to_string(), m.page.to_string());
            let link = match resolved.get(&key) {
                Some(link) => link.clone(),
                None => {
                    let link = self.resolve(m.file, m.page).await;
                    resolved.insert(key, link.clone());
                    link
                }
            };

            out.push_str(&answer[last..m.start]);
            match link {
                Some(link) => out.push_str(&format!("{} [source 📄]({})", m.span, link)),
                None => out.push_str(m.span),
            }
            last = m.end;
        }
        out.push_str(&answer[last..]);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct CountingResolver {
        calls: Mutex<Vec<String>>,
        fail_for: Option<&'static str>,
    }

    impl CountingResolver {
        fn new(fail_for: Option<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                fail_for,
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LinkResolver for CountingResolver {
        async fn resolve(&self, file_name: &str, expiry_secs: u64) -> Result<String> {
            self.calls.lock().unwrap().push(file_name.to_string());
            if self.fail_for == Some(file_name) {
                bail!("no credentials");
            }
            Ok(format!("https://files.example/{}?ttl={}", file_name, expiry_secs))
        }
    }

    #[tokio::test]
    async fn test_marker_becomes_link() {
        let resolver = CountingResolver::new(None);
        let linker = CitationLinker::new(resolver.clone(), 3600);
        let out = linker
            .link("Torque: <SOURCE doc_file_name='pump.pdf' page='12'>  40 Nm  </SOURCE>.")
            .await;
        assert_eq!(
            out,
            "Torque: 40 Nm [source 📄](https://files.example/pump.pdf?ttl=3600#page=12)."
        );
    }

    #[tokio::test]
    async fn test_double_quotes_and_unquoted_page() {
        let linker = CitationLinker::new(CountingResolver::new(None), 60);
        let out = linker
            .link(r#"<SOURCE doc_file_name="a.pdf" page=3>x</SOURCE>"#)
            .await;
        assert_eq!(out, "x [source 📄](https://files.example/a.pdf?ttl=60#page=3)");
    }

    #[tokio::test]
    async fn test_multiline_span() {
        let linker = CitationLinker::new(CountingResolver::new(Some("a.pdf")), 60);
        let out = linker
            .link("<SOURCE doc_file_name='a.pdf' page='1'>\nline one\nline two\n</SOURCE>")
            .await;
        assert_eq!(out, "line one\nline two");
    }

    #[tokio::test]
    async fn test_resolves_each_pair_at_most_once_including_failures() {
        let resolver = CountingResolver::new(Some("bad.pdf"));
        let linker = CitationLinker::new(resolver.clone(), 60);
        let answer = "<SOURCE doc_file_name='bad.pdf' page='1'>a</SOURCE> \
                      <SOURCE doc_file_name='bad.pdf' page='1'>b</SOURCE> \
                      <SOURCE doc_file_name='ok.pdf' page='2'>c</SOURCE> \
                      <SOURCE doc_file_name='ok.pdf' page='2'>d</SOURCE>";
        let out = linker.link(answer).await;
        assert_eq!(resolver.calls(), vec!["bad.pdf", "ok.pdf"]);
        assert!(out.starts_with("a b c [source 📄]"));
    }

    #[tokio::test]
    async fn test_process_cache_reused_across_answers() {
        let resolver = CountingResolver::new(Some("bad.pdf"));
        let linker = CitationLinker::new(resolver.clone(), 60);
        let marker = "<SOURCE doc_file_name='ok.pdf' page='2'>c</SOURCE>\
                      <SOURCE doc_file_name='bad.pdf' page='2'>d</SOURCE>";
        linker.link(marker).await;
        linker.link(marker).await;
        assert_eq!(resolver.calls(), vec!["ok.pdf", "bad.pdf", "bad.pdf"]);
        assert_eq!(linker.cache().len(), 1);
    }

    #[tokio::test]
    async fn test_text_without_markers_unchanged() {
        let linker = CitationLinker::new(CountingResolver::new(None), 60);
        let text = "No <SOURCE> markers here </SOURCE> at all.";
        assert_eq!(linker.link(text).await, text);
    }

    #[test]
    fn test_cache_expires_entries() {
        let cache = LinkCache::new(Duration::from_millis(200));
        cache.insert("a.pdf", "1", "u".to_string());
        assert_eq!(cache.get("a.pdf", "1"), Some("u".to_string()));
        std::thread::sleep(Duration::from_millis(400));
        assert_eq!(cache.get("a.pdf", "1"), None);
    }

    #[test]
    fn test_cache_is_bounded() {
        let cache = LinkCache::with_capacity(Duration::from_secs(1800), 100);
        for page in 0..5_000 {
            cache.insert("manual.pdf", &page.to_string(), format!("u{}", page));
        }
        assert!(cache.len() <= 100);
    }
}
