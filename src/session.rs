//! Wiring of store, embedder, LLM, indexer and query pipeline.
//!
//! A [`Session`] is what a front end (the CLI, or an interactive UI) holds.
//! Opening it checks the collection's dimensionality against the configured
//! embedding model; nothing else is initialised until first use. The
//! `spawn_*` methods run work on the runtime and hand back a `JoinHandle`,
//! so an event loop can keep going while embedding or generation happens.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::config::Config;
use crate::db;
use crate::embedding::{Embedder, LazyEmbedder};
use crate::error::Result;
use crate::indexer::{IndexReport, Indexer};
use crate::llm::{LlmClient, OllamaClient};
use crate::models::{QueryResult, ScoredChunk};
use crate::progress::ProgressReporter;
use crate::query::QueryPipeline;
use crate::store::{InMemoryStore, SearchFilter, SqliteStore, StoreStats, VectorStore};

#[derive(Clone)]
pub struct Session {
    config: Arc<Config>,
    store: Arc<dyn VectorStore>,
    indexer: Arc<Indexer>,
    pipeline: Arc<QueryPipeline>,
}

impl Session {
    /// Open a session on the configured SQLite store, embedding backend and
    /// Ollama host.
    pub async fn open(config: Config) -> Result<Self> {
        let store: Arc<dyn VectorStore> = Arc::new(SqliteStore::connect_lazy(&config.store)?);
        let embedder: Arc<dyn Embedder> =
            Arc::new(LazyEmbedder::new(&config.embedding, &config.store.collection)?);
        let llm: Arc<dyn LlmClient> = Arc::new(OllamaClient::new(&config.llm));
        Self::with_components(config, store, embedder, llm).await
    }

    /// Open a session that never writes to the store, for dry runs.
    ///
    /// A database that does not exist yet reads as an empty collection and
    /// is not created.
    pub async fn open_read_only(config: Config) -> Result<Self> {
        let store: Arc<dyn VectorStore> = if db::database_exists(&config.store.url) {
            Arc::new(SqliteStore::connect_read_only(&config.store)?)
        } else {
            Arc::new(InMemoryStore::new(&config.store.collection))
        };
        let embedder: Arc<dyn Embedder> =
            Arc::new(LazyEmbedder::new(&config.embedding, &config.store.collection)?);
        let llm: Arc<dyn LlmClient> = Arc::new(OllamaClient::new(&config.llm));
        Self::with_components(config, store, embedder, llm).await
    }

    /// Open a session on explicit components.
    ///
    /// Fails with `DimensionMismatch` when the collection already holds
    /// vectors of a different size than `embedder.dims()`.
    pub async fn with_components(
        config: Config,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn LlmClient>,
    ) -> Result<Self> {
        store
            .ensure_collection(embedder.dims(), embedder.model_name())
            .await?;

        let indexer = Indexer::new(&config, Arc::clone(&store), Arc::clone(&embedder))?;
        let pipeline = QueryPipeline::new(&config, Arc::clone(&store), embedder, llm);

        Ok(Self {
            config: Arc::new(config),
            store,
            indexer: Arc::new(indexer),
            pipeline: Arc::new(pipeline),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub async fn index(&self, dry_run: bool, progress: &dyn ProgressReporter) -> Result<IndexReport> {
        self.indexer.run(dry_run, progress).await
    }

    pub async fn ask(&self, question: &str, filter: &SearchFilter) -> Result<QueryResult> {
        self.pipeline.answer(question, filter).await
    }

    pub async fn search(
        &self,
        query: &str,
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredChunk>> {
        self.pipeline.search(query, k, filter).await
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        self.store.stats().await
    }

    /// Run an index pass in the background.
    pub fn spawn_index(
        &self,
        dry_run: bool,
        progress: Arc<dyn ProgressReporter>,
    ) -> JoinHandle<Result<IndexReport>> {
        let indexer = Arc::clone(&self.indexer);
        tokio::spawn(async move { indexer.run(dry_run, progress.as_ref()).await })
    }

    /// Answer a question in the background.
    pub fn spawn_ask(
        &self,
        question: String,
        filter: SearchFilter,
    ) -> JoinHandle<Result<QueryResult>> {
        let pipeline = Arc::clone(&self.pipeline);
        tokio::spawn(async move { pipeline.answer(&question, &filter).await })
    }
}
