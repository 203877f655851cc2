use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use ragd_graph::GraphStore;
use ragd_protocol::api::{
    AskRequest, ContextPackRequest, ExplainRequest, FindFeatureRequest, GraphSearchRequest,
    HybridSearchRequest, SearchRequest,
};
use ragd_protocol::{ApiError, EdgeKind, FullEmbedding, GraphEdge};
use ragd_providers::{EmbeddingProvider, LlmProvider, StaticLlm};
use ragd_retrieval::SearchEngine;
use ragd_vector_store::{MemoryStore, Point, VectorStore};

/// Embedder with prescribed vectors per text; unknown texts get the query
/// axis so tests stay deterministic.
struct FixedEmbedder {
    vectors: HashMap<String, Vec<f32>>,
}

impl FixedEmbedder {
    fn new(pairs: &[(&str, Vec<f32>)]) -> Self {
        Self {
            vectors: pairs
                .iter()
                .map(|(text, vector)| (text.to_string(), vector.clone()))
                .collect(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for FixedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ApiError> {
        Ok(self
            .vectors
            .get(text)
            .cloned()
            .unwrap_or_else(|| vec![1.0, 0.0, 0.0]))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        let mut out = Vec::new();
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    async fn embed_full(&self, text: &str) -> Result<FullEmbedding, ApiError> {
        Ok(FullEmbedding {
            dense: self.embed(text).await?,
            sparse: None,
        })
    }

    fn dimension(&self) -> usize {
        3
    }
}

fn payload(file: &str, content: &str, chunk_type: &str, start: u64, end: u64) -> Map<String, Value> {
    json!({
        "file": file,
        "content": content,
        "language": "typescript",
        "chunkType": chunk_type,
        "startLine": start,
        "endLine": end,
        "project": "demo",
    })
    .as_object()
    .unwrap()
    .clone()
}

async fn engine_with(
    points: Vec<Point>,
    embedder: FixedEmbedder,
    llm: Arc<dyn LlmProvider>,
) -> (SearchEngine, Arc<GraphStore>) {
    let store = Arc::new(MemoryStore::new());
    store.ensure_collection("demo_codebase", 3, false).await.unwrap();
    store.upsert("demo_codebase", points).await.unwrap();
    let graph = Arc::new(GraphStore::new());
    let engine = SearchEngine::new(
        store,
        Arc::new(embedder),
        llm,
        Arc::clone(&graph),
        None,
    );
    (engine, graph)
}

fn search_request(query: &str, limit: usize) -> SearchRequest {
    SearchRequest {
        query: query.to_string(),
        limit,
        collection: None,
        score_threshold: None,
    }
}

#[tokio::test]
async fn test_search_dedups_by_file_keeping_best_chunk() {
    let points = vec![
        Point::new(
            "a1",
            vec![0.95, 0.3122, 0.0],
            payload("src/a.ts", "export function parse(input: string) {}", "code", 1, 20),
        ),
        Point::new(
            "a2",
            vec![0.7, 0.7141, 0.0],
            payload("src/a.ts", "function parseInner(tokens: Token[]) {}", "code", 21, 40),
        ),
        Point::new(
            "b",
            vec![0.5, 0.866, 0.0],
            payload("src/b.ts", "export function render() {}", "code", 1, 10),
        ),
    ];
    let (engine, _) = engine_with(points, FixedEmbedder::new(&[]), Arc::new(StaticLlm::new("x"))).await;

    let response = engine.search("demo", &search_request("parse", 5)).await.unwrap();

    let files: Vec<&str> = response.results.iter().map(|r| r.file.as_str()).collect();
    let unique: std::collections::HashSet<&&str> = files.iter().collect();
    assert_eq!(files.len(), unique.len(), "one result per file");

    let a = response.results.iter().find(|r| r.file == "src/a.ts").unwrap();
    assert_eq!(a.start_line, 1);
    assert_eq!(a.end_line, 20);
    assert!(a.score > 0.0);
}

#[tokio::test]
async fn test_code_boost_breaks_score_ties_in_favor_of_code() {
    let points = vec![
        Point::new(
            "docs",
            vec![0.8, 0.6, 0.0],
            payload("docs/auth.md", "authentication guide", "docs", 1, 5),
        ),
        Point::new(
            "code",
            vec![0.8, 0.0, 0.6],
            payload("src/auth.ts", "function authenticate() {}", "code", 1, 5),
        ),
    ];
    let (engine, _) = engine_with(points, FixedEmbedder::new(&[]), Arc::new(StaticLlm::new("x"))).await;

    let response = engine.search("demo", &search_request("auth", 2)).await.unwrap();
    assert_eq!(response.results[0].file, "src/auth.ts");
    assert!(response.results[0].score > response.results[1].score);
}

#[tokio::test]
async fn test_hybrid_fusion_arithmetic_matches_contract() {
    // Dense scores against the query axis: A 0.9, B 0.8, C 0.4.
    // Keywords "auth"+"middleware": B matches both, C one, A none.
    let points = vec![
        Point::new(
            "A",
            vec![0.9, 0.43589, 0.0],
            payload("src/a.ts", "retry configuration loader", "docs", 1, 5),
        ),
        Point::new(
            "B",
            vec![0.8, 0.6, 0.0],
            payload("src/b.ts", "auth middleware validates the auth middleware chain", "docs", 1, 5),
        ),
        Point::new(
            "C",
            vec![0.4, 0.91652, 0.0],
            payload("src/c.ts", "middleware registry", "docs", 1, 5),
        ),
    ];
    let (engine, _) = engine_with(points, FixedEmbedder::new(&[]), Arc::new(StaticLlm::new("x"))).await;

    let request = HybridSearchRequest {
        query: "auth middleware".to_string(),
        limit: 3,
        semantic_weight: 0.7,
        collection: None,
    };
    let response = engine.search_hybrid("demo", &request).await.unwrap();

    assert_eq!(response.mode.as_deref(), Some("text-match-fusion"));
    let order: Vec<&str> = response.results.iter().map(|r| r.file.as_str()).collect();
    assert_eq!(order, vec!["src/b.ts", "src/a.ts", "src/c.ts"]);

    let scores: Vec<f32> = response.results.iter().map(|r| r.score).collect();
    assert!((scores[0] - 0.86).abs() < 0.01, "B fused: {}", scores[0]);
    assert!((scores[1] - 0.63).abs() < 0.01, "A fused: {}", scores[1]);
    assert!((scores[2] - 0.43).abs() < 0.01, "C fused: {}", scores[2]);
}

#[tokio::test]
async fn test_graph_search_separates_seeds_from_expansion() {
    let points = vec![
        Point::new(
            "a",
            vec![1.0, 0.0, 0.0],
            payload("src/api.ts", "route registration", "code", 1, 10),
        ),
        Point::new(
            "b",
            vec![0.0, 1.0, 0.0],
            payload("src/auth.ts", "token validation", "code", 1, 10),
        ),
    ];
    let (engine, graph) =
        engine_with(points, FixedEmbedder::new(&[]), Arc::new(StaticLlm::new("x"))).await;
    graph.insert_edges(
        "demo",
        vec![GraphEdge {
            from_file: "src/api.ts".to_string(),
            from_symbol: "*".to_string(),
            to_file: "src/auth.ts".to_string(),
            to_symbol: "*".to_string(),
            edge_type: EdgeKind::Imports,
        }],
    );

    let request = GraphSearchRequest {
        query: "routes".to_string(),
        hops: 1,
        limit: 1,
    };
    let response = engine.search_graph("demo", &request).await.unwrap();

    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].file, "src/api.ts");
    assert_eq!(response.expanded_files, vec!["src/auth.ts"]);
    assert!(response
        .graph_expanded
        .iter()
        .all(|item| item.file == "src/auth.ts"));
}

#[tokio::test]
async fn test_ask_grounds_answer_in_sources() {
    let points = vec![Point::new(
        "a",
        vec![1.0, 0.0, 0.0],
        payload("src/retry.ts", "retries use exponential backoff", "code", 1, 12),
    )];
    let (engine, _) = engine_with(
        points,
        FixedEmbedder::new(&[]),
        Arc::new(StaticLlm::new("Retries back off exponentially, per src/retry.ts.")),
    )
    .await;

    let response = engine
        .ask("demo", &AskRequest { question: "how do retries work?".into() })
        .await
        .unwrap();
    assert!(response.answer.contains("exponentially"));
    assert_eq!(response.sources, vec!["src/retry.ts"]);
}

#[tokio::test]
async fn test_explain_parses_json_and_falls_back_on_garbage() {
    let (engine, _) = engine_with(
        vec![],
        FixedEmbedder::new(&[]),
        Arc::new(StaticLlm::new(
            r#"{"summary": "parses tokens", "purpose": "tokenization", "keyComponents": ["lexer"], "dependencies": []}"#,
        )),
    )
    .await;
    let request = ExplainRequest {
        code: "fn lex(src: &str) {}".to_string(),
        language: Some("rust".to_string()),
        collection: None,
    };
    let explanation = engine.explain("demo", &request).await.unwrap();
    assert_eq!(explanation.summary, "parses tokens");
    assert_eq!(explanation.key_components, vec!["lexer"]);

    let (engine, _) = engine_with(
        vec![],
        FixedEmbedder::new(&[]),
        Arc::new(StaticLlm::new("this is not json at all")),
    )
    .await;
    let explanation = engine.explain("demo", &request).await.unwrap();
    assert_eq!(explanation.summary, "this is not json at all");
    assert!(explanation.key_components.is_empty());
}

#[tokio::test]
async fn test_find_feature_splits_main_and_related_files() {
    let mut points = Vec::new();
    for (i, file) in ["f1.ts", "f2.ts", "f3.ts", "f4.ts", "f5.ts"].iter().enumerate() {
        let weight = 1.0 - i as f32 * 0.1;
        points.push(Point::new(
            format!("p{i}"),
            vec![weight, (1.0 - weight * weight).sqrt(), 0.0],
            payload(file, &format!("feature implementation part {i}"), "code", 1, 10),
        ));
    }
    let (engine, _) = engine_with(
        points,
        FixedEmbedder::new(&[]),
        Arc::new(StaticLlm::new("The feature lives in f1.ts.")),
    )
    .await;

    let response = engine
        .find_feature("demo", &FindFeatureRequest { feature: "the feature".into() })
        .await
        .unwrap();
    assert_eq!(response.main_files, vec!["f1.ts", "f2.ts", "f3.ts"]);
    assert_eq!(response.related_files, vec!["f4.ts", "f5.ts"]);
    assert!(!response.explanation.is_empty());
}

#[tokio::test]
async fn test_hybrid_native_sparse_path_when_provider_supports_it() {
    use ragd_providers::HashEmbedder;

    let store = Arc::new(MemoryStore::new());
    store.ensure_collection("demo_codebase", 64, true).await.unwrap();

    let embedder = HashEmbedder::with_sparse(64);
    let texts = [
        ("src/auth.ts", "auth middleware validates bearer tokens"),
        ("src/render.ts", "svg chart rendering with axis labels"),
    ];
    let mut points = Vec::new();
    for (file, text) in texts {
        let full = embedder.embed_full(text).await.unwrap();
        points.push(
            Point::new(file, full.dense, payload(file, text, "code", 1, 10))
                .with_sparse(full.sparse),
        );
    }
    store.upsert("demo_codebase", points).await.unwrap();

    let engine = SearchEngine::new(
        store,
        Arc::new(HashEmbedder::with_sparse(64)),
        Arc::new(StaticLlm::new("x")),
        Arc::new(GraphStore::new()),
        None,
    );
    let request = HybridSearchRequest {
        query: "auth middleware tokens".to_string(),
        limit: 2,
        semantic_weight: 0.7,
        collection: None,
    };
    let response = engine.search_hybrid("demo", &request).await.unwrap();

    assert_eq!(response.mode.as_deref(), Some("native-sparse"));
    assert_eq!(response.results[0].file, "src/auth.ts");
}

#[tokio::test]
async fn test_grouped_search_returns_group_size_chunks_per_file() {
    let points = vec![
        Point::new("a1", vec![1.0, 0.0, 0.0], payload("src/a.ts", "chunk one", "code", 1, 10)),
        Point::new("a2", vec![0.95, 0.3122, 0.0], payload("src/a.ts", "chunk two", "code", 11, 20)),
        Point::new("b1", vec![0.9, 0.43589, 0.0], payload("src/b.ts", "chunk three", "code", 1, 10)),
    ];
    let (engine, _) = engine_with(points, FixedEmbedder::new(&[]), Arc::new(StaticLlm::new("x"))).await;

    let request = ragd_protocol::api::GroupedSearchRequest {
        query: "chunk".to_string(),
        group_by: "file".to_string(),
        limit: 2,
        group_size: 2,
    };
    let response = engine.search_grouped("demo", &request).await.unwrap();

    assert_eq!(response.groups.len(), 2);
    let a_group = response.groups.iter().find(|g| g.key == "src/a.ts").unwrap();
    assert_eq!(a_group.results.len(), 2, "grouping replaces dedup");
}

#[tokio::test]
async fn test_similar_search_honours_threshold_without_boost() {
    let points = vec![
        Point::new("close", vec![0.9, 0.43589, 0.0], payload("src/a.ts", "close match", "code", 1, 5)),
        Point::new("far", vec![0.1, 0.99499, 0.0], payload("src/b.ts", "far match", "code", 1, 5)),
    ];
    let (engine, _) = engine_with(points, FixedEmbedder::new(&[]), Arc::new(StaticLlm::new("x"))).await;

    let request = ragd_protocol::api::SimilarSearchRequest {
        code: "fn snippet() {}".to_string(),
        limit: 10,
        score_threshold: 0.7,
    };
    let response = engine.search_similar("demo", &request).await.unwrap();

    assert_eq!(response.count, 1);
    assert_eq!(response.results[0].file, "src/a.ts");
    // Raw backend score: the 1.05 code boost is not applied on this path.
    assert!((response.results[0].score - 0.9).abs() < 1e-3);
}

#[tokio::test]
async fn test_context_pack_respects_token_budget_with_facet_attribution() {
    let long_content = "x".repeat(400); // ~100 tokens
    let points = vec![
        Point::new("p1", vec![1.0, 0.0, 0.0], payload("src/a.ts", &long_content, "code", 1, 10)),
        Point::new("p2", vec![0.9, 0.43589, 0.0], payload("src/b.ts", &long_content, "code", 1, 10)),
        Point::new(
            "p3",
            vec![0.8, 0.6, 0.0],
            payload("tests/a.test.ts", &long_content, "code", 1, 10),
        ),
    ];
    let (engine, _) = engine_with(points, FixedEmbedder::new(&[]), Arc::new(StaticLlm::new("x"))).await;

    let request = ContextPackRequest {
        query: "pack".to_string(),
        token_budget: 220,
        include_memories: false,
        include_tests: true,
        include_graph: false,
    };
    let response = engine.context_pack("demo", &request).await.unwrap();

    assert!(response.total_tokens <= 220);
    assert_eq!(response.items.len(), 2, "budget fits two ~100 token items");
    assert!(response.items.iter().all(|item| !item.facet.is_empty()));
    // Highest-scored first.
    assert!(response.items[0].score >= response.items[1].score);
}
