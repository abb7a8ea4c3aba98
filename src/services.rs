//! External clients built once at startup and shared by every request.

use std::sync::Arc;

use anyhow::Result;

use docent_core::capability::{LanguageModel, LinkResolver};
use docent_core::citation::CitationLinker;
use docent_core::embedding::EmbeddingProvider;
use docent_core::search::{SearchMode, SearchParams, StoreRetriever};
use docent_core::store::Store;

use crate::config::Config;
use crate::embedding::create_provider;
use crate::links::{NoLinks, S3Presigner};
use crate::llm::BackendRing;
use crate::sqlite_store::SqliteStore;
use crate::{db, migrate};

/// Shared handles: the SQLite pool (inside the store), the embedding and
/// chat clients, and the citation link cache (inside the linker).
pub struct Services {
    pub config: Arc<Config>,
    pub store: Arc<SqliteStore>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub model: Arc<dyn LanguageModel>,
    pub linker: Arc<CitationLinker>,
    pub retriever: Arc<StoreRetriever>,
    pub params: SearchParams,
    pub mode: SearchMode,
}

impl Services {
    /// Open the database, apply migrations, and build clients from config.
    pub async fn connect(config: Config) -> Result<Self> {
        let pool = db::connect(&config).await?;
        migrate::apply(&pool).await?;
        let store = Arc::new(SqliteStore::new(pool));

        let embedder: Arc<dyn EmbeddingProvider> = Arc::from(create_provider(&config.embedding)?);
        let model: Arc<dyn LanguageModel> = Arc::new(BackendRing::from_config(&config.llm)?);
        let links: Arc<dyn LinkResolver> = match config.links.clone() {
            Some(links) => Arc::new(S3Presigner::from_env(links)?),
            None => Arc::new(NoLinks),
        };

        Self::from_parts(config, store, embedder, model, links)
    }

    /// Assemble from already-built collaborators.
    pub fn from_parts(
        config: Config,
        store: Arc<SqliteStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        model: Arc<dyn LanguageModel>,
        links: Arc<dyn LinkResolver>,
    ) -> Result<Self> {
        let params = config.retrieval.params()?;
        let mode: SearchMode = config.retrieval.mode.parse()?;
        let expiry_secs = config.links.as_ref().map(|l| l.expiry_secs).unwrap_or(3600);
        let linker = Arc::new(CitationLinker::new(links, expiry_secs));
        let retriever = Arc::new(StoreRetriever::new(
            store.clone() as Arc<dyn Store>,
            embedder.clone(),
            params.clone(),
            mode,
        ));

        Ok(Self {
            config: Arc::new(config),
            store,
            embedder,
            model,
            linker,
            retriever,
            params,
            mode,
        })
    }
}
