use std::sync::Arc;

use ragd_cache::CacheService;
use ragd_memory::MemoryService;
use ragd_protocol::api::{EndSessionRequest, MemoryListRequest, StartSessionRequest};
use ragd_protocol::{MemoryType, SessionActivity, SessionStatus, MAX_SESSION_FILES};
use ragd_providers::HashEmbedder;
use ragd_session::SessionService;
use ragd_vector_store::MemoryStore;

fn service() -> (SessionService, Arc<MemoryService>) {
    let store = Arc::new(MemoryStore::new());
    let embedder = Arc::new(HashEmbedder::new(64));
    let memory = Arc::new(MemoryService::new(
        Arc::clone(&store) as _,
        Arc::clone(&embedder) as _,
    ));
    let sessions = SessionService::new(
        store,
        embedder,
        Arc::clone(&memory),
        Arc::new(CacheService::new(1000)),
    );
    (sessions, memory)
}

fn activity() -> SessionActivity {
    SessionActivity {
        file: None,
        query: None,
        tool: None,
        feature: None,
        learning: None,
        decision: None,
    }
}

#[tokio::test]
async fn test_activity_stream_reflects_every_event_bounded() {
    let (sessions, _) = service();
    let context = sessions
        .start_session("demo", &StartSessionRequest::default())
        .await
        .unwrap();

    for i in 0..25 {
        let mut event = activity();
        event.file = Some(format!("src/file_{i}.ts"));
        event.query = Some(format!("query {i}"));
        sessions
            .record_activity("demo", &context.session_id, &event)
            .await
            .unwrap();
    }

    let reloaded = sessions
        .get_session("demo", &context.session_id)
        .await
        .unwrap();
    assert_eq!(reloaded.current_files.len(), MAX_SESSION_FILES);
    assert_eq!(reloaded.recent_queries.len(), 25);
    assert_eq!(reloaded.current_files[0], "src/file_5.ts");
}

#[tokio::test]
async fn test_resume_inherits_files_trailing_queries_and_decisions() {
    let (sessions, _) = service();
    let first = sessions
        .start_session("demo", &StartSessionRequest::default())
        .await
        .unwrap();

    for i in 0..8 {
        let mut event = activity();
        event.query = Some(format!("query {i}"));
        sessions
            .record_activity("demo", &first.session_id, &event)
            .await
            .unwrap();
    }
    let mut event = activity();
    event.file = Some("src/core.ts".to_string());
    event.decision = Some("stick with cursor pagination".to_string());
    sessions
        .record_activity("demo", &first.session_id, &event)
        .await
        .unwrap();

    let resumed = sessions
        .start_session(
            "demo",
            &StartSessionRequest {
                resume_from: Some(first.session_id.clone()),
                metadata: Default::default(),
            },
        )
        .await
        .unwrap();

    assert_eq!(resumed.current_files, vec!["src/core.ts"]);
    assert_eq!(resumed.recent_queries.len(), 5, "trailing five queries carry over");
    assert_eq!(resumed.recent_queries[0], "query 3");
    assert_eq!(resumed.decisions, vec!["stick with cursor pagination"]);
}

#[tokio::test]
async fn test_end_session_materialises_memories() {
    let (sessions, memory) = service();
    let context = sessions
        .start_session("demo", &StartSessionRequest::default())
        .await
        .unwrap();

    let mut event = activity();
    event.learning = Some("the parser chokes on BOM-prefixed files".to_string());
    event.tool = Some("search".to_string());
    sessions
        .record_activity("demo", &context.session_id, &event)
        .await
        .unwrap();
    let mut event = activity();
    event.decision = Some("treat BOM as whitespace in the lexer".to_string());
    sessions
        .record_activity("demo", &context.session_id, &event)
        .await
        .unwrap();

    let summary = sessions
        .end_session("demo", &context.session_id, &EndSessionRequest::default())
        .await
        .unwrap();
    assert_eq!(summary.learnings_saved, 1);
    assert_eq!(summary.decisions_saved, 1);
    assert!(summary.summary.contains("search"));

    let session_tag: String = context.session_id.chars().take(8).collect();
    let insights = memory
        .list(
            "demo",
            MemoryListRequest {
                memory_type: Some(MemoryType::Insight),
                tag: Some(session_tag),
                limit: 10,
            },
        )
        .await
        .unwrap();
    assert_eq!(insights.len(), 1);
    assert!(insights[0].content.contains("BOM"));
    assert_eq!(
        insights[0].metadata.get("sessionId").and_then(|v| v.as_str()),
        Some(context.session_id.as_str())
    );

    // Activity against an ended session is a conflict.
    let err = sessions
        .record_activity("demo", &context.session_id, &activity())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CONFLICT");
}

#[tokio::test]
async fn test_sessions_are_mirrored_to_the_vector_store() {
    let (sessions, _) = service();
    let context = sessions
        .start_session("demo", &StartSessionRequest::default())
        .await
        .unwrap();

    let listed = sessions.list_sessions("demo").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].session_id, context.session_id);
    assert_eq!(listed[0].status, SessionStatus::Active);
}
