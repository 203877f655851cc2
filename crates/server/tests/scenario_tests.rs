//! End-to-end behaviour checks over the full composition: aging decay,
//! merge supersession, zero-downtime reindex visibility and breaker
//! fail-fast, all against the embedded backend.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;

use ragd_protocol::api::{MergeRequest, RecallRequest, RememberRequest, SearchRequest};
use ragd_protocol::{collections, ApiError, MemoryType};
use ragd_providers::{EmbeddingProvider, HashEmbedder, ResilientEmbedding};
use ragd_reliability::{BreakerConfig, CircuitBreaker, RetryPolicy};
use ragd_server::{test_config, AppState};
use ragd_vector_store::{Point, VectorStore};

async fn state() -> Arc<AppState> {
    AppState::build(test_config()).await.expect("state builds")
}

fn remember_request(content: &str, memory_type: MemoryType) -> RememberRequest {
    RememberRequest {
        memory_type,
        content: content.to_string(),
        tags: vec![],
        related_to: None,
        validated: None,
        source: None,
        confidence: None,
        metadata: Default::default(),
    }
}

/// A memory created 90 days ago, unvalidated, loses two 5% periods; the same
/// memory validated scores at face value.
#[tokio::test]
async fn test_aging_decay_at_ninety_days() {
    let state = state().await;
    let embedder = HashEmbedder::new(64);
    let content = "the index rebuild runs nightly at 02:00";
    let created_at = Utc::now() - Duration::days(90);

    let memory = json!({
        "id": "old-memory",
        "project": "demo",
        "type": "note",
        "content": content,
        "tags": [],
        "createdAt": created_at,
        "updatedAt": created_at,
    });
    let collection = collections::agent_memory("demo");
    state
        .store
        .ensure_collection(&collection, 64, false)
        .await
        .unwrap();
    state
        .store
        .upsert(
            &collection,
            vec![Point::new(
                "old-memory",
                embedder.embed(&format!("note: {content}")).await.unwrap(),
                memory.as_object().unwrap().clone(),
            )],
        )
        .await
        .unwrap();

    let recall = |state: Arc<AppState>| async move {
        state
            .memory
            .recall(
                "demo",
                RecallRequest {
                    query: format!("note: {content}"),
                    memory_type: None,
                    tag: None,
                    limit: 5,
                },
            )
            .await
            .unwrap()
    };

    let hits = recall(Arc::clone(&state)).await;
    // Raw cosine is 1.0 for the identical text; two periods past day 30.
    assert!((hits[0].score - 0.90).abs() < 1e-3, "decayed: {}", hits[0].score);

    state
        .memory
        .validate_memory("demo", "old-memory", true)
        .await
        .unwrap();
    let hits = recall(state).await;
    assert!((hits[0].score - 1.0).abs() < 1e-3, "validated: {}", hits[0].score);
}

/// Merge dry-run reports the cluster without mutating; executing retires all
/// but the newest member via supersession.
#[tokio::test]
async fn test_merge_dry_run_then_execute_supersession() {
    let state = state().await;
    let texts = [
        "retry uses jittered exponential backoff for upstream calls",
        "upstream retry logic is jittered exponential backoff",
        "we apply jittered exponential backoff on upstream retry",
    ];
    for text in texts {
        state
            .memory
            .remember("demo", remember_request(text, MemoryType::Decision))
            .await
            .unwrap();
    }

    let merge = |dry_run| MergeRequest {
        memory_type: Some(MemoryType::Decision),
        threshold: 0.6,
        dry_run,
        limit: 100,
    };
    let recall = RecallRequest {
        query: "jittered exponential backoff upstream".to_string(),
        memory_type: None,
        tag: None,
        limit: 10,
    };

    let dry = state.memory.merge_memories("demo", merge(true)).await.unwrap();
    assert_eq!(dry.clusters.as_ref().unwrap().len(), 1);
    assert_eq!(dry.clusters.unwrap()[0].count, 3);
    assert_eq!(state.memory.recall("demo", recall.clone()).await.unwrap().len(), 3);

    let executed = state.memory.merge_memories("demo", merge(false)).await.unwrap();
    assert_eq!(executed.merged, Some(2));

    let hits = state.memory.recall("demo", recall).await.unwrap();
    assert_eq!(hits.len(), 1, "only the canonical memory is active");
}

/// A reader querying through the alias sees the full old collection until the
/// swap, and the full new collection immediately after.
#[tokio::test]
async fn test_zero_downtime_reindex_visibility() {
    let state = state().await;
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    for i in 0..5 {
        std::fs::write(
            dir.path().join(format!("src/module_{i}.ts")),
            format!("export function handler_{i}(input: string) {{\n    return process(input);\n}}\n"),
        )
        .unwrap();
    }

    state
        .indexer
        .index_project("demo", dir.path(), &Default::default())
        .await
        .unwrap();
    let baseline = state
        .store
        .count(&collections::codebase("demo"), None)
        .await
        .unwrap();
    assert_eq!(baseline, 5);

    let reader_store = Arc::clone(&state.store);
    let reader = tokio::spawn(async move {
        let mut observed_min = usize::MAX;
        for _ in 0..50 {
            let count = reader_store
                .count(&collections::codebase("demo"), None)
                .await
                .unwrap_or(0);
            observed_min = observed_min.min(count);
            tokio::task::yield_now().await;
        }
        observed_min
    });

    state
        .indexer
        .reindex_zero_downtime("demo", dir.path(), &Default::default())
        .await
        .unwrap();

    let observed_min = reader.await.unwrap();
    assert_eq!(observed_min, baseline, "reader never saw a partial collection");

    let aliases = state.store.list_aliases().await.unwrap();
    assert_eq!(
        aliases.get("demo_codebase").map(String::as_str),
        Some("demo_codebase_v2")
    );
}

/// Three consecutive embedding failures trip the breaker; the next search
/// fails fast with CIRCUIT_OPEN without touching the embedder; a successful
/// probe after the open window restores service.
#[tokio::test(start_paused = true)]
async fn test_embedding_circuit_trips_and_recovers() {
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct FlakyEmbedder {
        healthy: AtomicBool,
        calls: AtomicU32,
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.healthy.load(Ordering::SeqCst) {
                Ok(vec![1.0, 0.0, 0.0])
            } else {
                Err(ApiError::external("embedding", "connection refused"))
            }
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
            let mut out = Vec::new();
            for text in texts {
                out.push(self.embed(text).await?);
            }
            Ok(out)
        }

        async fn embed_full(
            &self,
            text: &str,
        ) -> Result<ragd_protocol::FullEmbedding, ApiError> {
            Ok(ragd_protocol::FullEmbedding {
                dense: self.embed(text).await?,
                sparse: None,
            })
        }

        fn dimension(&self) -> usize {
            3
        }
    }

    let flaky = Arc::new(FlakyEmbedder {
        healthy: AtomicBool::new(false),
        calls: AtomicU32::new(0),
    });
    let breaker = Arc::new(CircuitBreaker::new(
        "embedding",
        BreakerConfig {
            failure_threshold: 3,
            open_duration: std::time::Duration::from_secs(30),
            success_threshold: 1,
        },
    ));
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(ResilientEmbedding::new(
        Arc::clone(&flaky) as Arc<dyn EmbeddingProvider>,
        Arc::clone(&breaker),
        RetryPolicy {
            max_attempts: 1,
            ..Default::default()
        },
    ));

    let store = Arc::new(ragd_vector_store::MemoryStore::new());
    store.ensure_collection("demo_codebase", 3, false).await.unwrap();
    let engine = ragd_retrieval::SearchEngine::new(
        store,
        Arc::clone(&embedder),
        Arc::new(ragd_providers::StaticLlm::new("x")),
        Arc::new(ragd_graph::GraphStore::new()),
        None,
    );
    let request = SearchRequest {
        query: "anything".to_string(),
        limit: 5,
        collection: None,
        score_threshold: None,
    };

    for _ in 0..3 {
        let _ = engine.search("demo", &request).await;
    }
    let calls_when_tripped = flaky.calls.load(Ordering::SeqCst);
    assert_eq!(calls_when_tripped, 3);

    // Fourth call fails fast without reaching the embedder.
    let err = engine.search("demo", &request).await.unwrap_err();
    assert!(matches!(err, ApiError::CircuitOpen(_)));
    assert_eq!(flaky.calls.load(Ordering::SeqCst), calls_when_tripped);

    // After the open window and one healthy probe, service is back.
    flaky.healthy.store(true, Ordering::SeqCst);
    tokio::time::advance(std::time::Duration::from_secs(31)).await;
    engine.search("demo", &request).await.unwrap();
}
