use std::sync::Arc;

use chrono::{DateTime, Utc};

use ragd_cache::CacheService;
use ragd_graph::GraphStore;
use ragd_indexer::{ProjectIndexer, StatusMap};
use ragd_memory::MemoryService;
use ragd_protocol::{ApiError, Result};
use ragd_providers::{
    build_embedding, build_llm, EmbeddingProvider, EmbeddingSettings, LlmProvider, LlmSettings,
    ResilientEmbedding, ResilientLlm,
};
use ragd_reliability::{BreakerRegistry, RetryPolicy};
use ragd_retrieval::SearchEngine;
use ragd_session::{PredictiveLoader, SessionService, UsageTracker};
use ragd_vector_store::{MemoryStore, QdrantStore, ResilientStore, VectorStore};

use crate::config::AppConfig;
use crate::confluence::ConfluenceBridge;
use crate::metrics::Metrics;

/// Composition root. Everything downstream is constructor-injected from here.
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn VectorStore>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub llm: Arc<dyn LlmProvider>,
    pub graph: Arc<GraphStore>,
    pub cache: Arc<CacheService>,
    pub engine: Arc<SearchEngine>,
    pub memory: Arc<MemoryService>,
    pub sessions: Arc<SessionService>,
    pub prefetcher: Arc<PredictiveLoader>,
    pub tracker: Arc<UsageTracker>,
    pub indexer: Arc<ProjectIndexer>,
    pub breakers: Arc<BreakerRegistry>,
    pub metrics: Arc<Metrics>,
    pub confluence: Option<Arc<ConfluenceBridge>>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Wire the whole service. Failures here abort startup (exit code 1).
    pub async fn build(config: AppConfig) -> Result<Arc<Self>> {
        let breakers = Arc::new(BreakerRegistry::new());
        let metrics = Arc::new(Metrics::new()?);
        let cache = Arc::new(CacheService::new(10_000));

        let raw_store: Arc<dyn VectorStore> = match config.vector_backend.as_str() {
            "memory" => Arc::new(MemoryStore::new()),
            "qdrant" => Arc::new(QdrantStore::new(
                &config.qdrant_url,
                config.qdrant_api_key.clone(),
            )),
            other => {
                return Err(ApiError::Configuration(format!(
                    "unknown vector backend '{other}' (expected qdrant or memory)"
                )))
            }
        };
        let store: Arc<dyn VectorStore> = Arc::new(ResilientStore::new(
            raw_store,
            breakers.get("vector_store"),
        ));

        // Startup probe: an unreachable backend is a configuration problem,
        // not something to discover on the first request.
        store.list_collections().await.map_err(|err| {
            ApiError::Configuration(format!("vector store unavailable at startup: {err}"))
        })?;

        let raw_embedder = build_embedding(&EmbeddingSettings {
            provider: config.embedding_provider.clone(),
            url: config.embedding_url.clone(),
            model: config.embedding_model.clone(),
            dimension: config.vector_size,
            sparse_enabled: config.sparse_enabled,
        })?;
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(ResilientEmbedding::new(
            raw_embedder,
            breakers.get("embedding"),
            RetryPolicy::default(),
        ));

        let raw_llm = build_llm(&LlmSettings {
            provider: config.llm_provider.clone(),
            url: config.llm_url.clone(),
            model: config.llm_model.clone(),
        })?;
        let llm: Arc<dyn LlmProvider> = Arc::new(ResilientLlm::new(
            raw_llm,
            breakers.get("llm"),
            RetryPolicy::default(),
        ));

        let graph = Arc::new(GraphStore::new());
        let engine = Arc::new(SearchEngine::new(
            Arc::clone(&store),
            Arc::clone(&embedder),
            Arc::clone(&llm),
            Arc::clone(&graph),
            Some(Arc::clone(&cache)),
        ));
        let memory = Arc::new(MemoryService::new(
            Arc::clone(&store),
            Arc::clone(&embedder),
        ));
        let sessions = Arc::new(SessionService::new(
            Arc::clone(&store),
            Arc::clone(&embedder),
            Arc::clone(&memory),
            Arc::clone(&cache),
        ));
        let prefetcher = Arc::new(PredictiveLoader::new(Arc::clone(&engine)));
        let tracker = Arc::new(UsageTracker::new(Arc::clone(&embedder)));
        let indexer = Arc::new(ProjectIndexer::new(
            Arc::clone(&store),
            Arc::clone(&embedder),
            Arc::clone(&graph),
            Arc::new(StatusMap::new()),
        ));
        let confluence = ConfluenceBridge::from_config(&config).map(Arc::new);

        Ok(Arc::new(Self {
            config,
            store,
            embedder,
            llm,
            graph,
            cache,
            engine,
            memory,
            sessions,
            prefetcher,
            tracker,
            indexer,
            breakers,
            metrics,
            confluence,
            started_at: Utc::now(),
        }))
    }
}
