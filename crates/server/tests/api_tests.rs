use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::{Extension, Json};

use ragd_protocol::api::{
    MemoryListRequest, RecallRequest, RememberRequest, SearchRequest, StartSessionRequest,
    TodoUpdateRequest,
};
use ragd_protocol::{MemoryType, TodoStatus};
use ragd_server::handlers::{index, memory, search, session};
use ragd_server::middleware::ProjectScope;
use ragd_server::{test_config, AppState};

type Scope = Option<Extension<ProjectScope>>;

fn scope() -> Scope {
    Some(Extension(ProjectScope {
        project: "demo".to_string(),
        path: None,
    }))
}

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

#[tokio::test]
async fn test_memory_endpoints_round_trip() {
    let state = state().await;

    let Json(stored) = memory::remember(
        State(Arc::clone(&state)),
        scope(),
        Json(remember_request(
            "we paginate with cursors, not offsets",
            MemoryType::Decision,
        )),
    )
    .await
    .unwrap_or_else(|_| panic!("remember failed"));

    let Json(hits) = memory::recall(
        State(Arc::clone(&state)),
        scope(),
        Json(RecallRequest {
            query: "cursor pagination".to_string(),
            memory_type: None,
            tag: None,
            limit: 5,
        }),
    )
    .await
    .unwrap_or_else(|_| panic!("recall failed"));
    assert_eq!(hits[0].memory.id, stored.id);

    // Hard delete, then recall finds nothing.
    memory::forget(State(Arc::clone(&state)), scope(), Path(stored.id.clone()))
        .await
        .unwrap_or_else(|_| panic!("forget failed"));
    let Json(hits) = memory::recall(
        State(Arc::clone(&state)),
        scope(),
        Json(RecallRequest {
            query: "cursor pagination".to_string(),
            memory_type: None,
            tag: None,
            limit: 5,
        }),
    )
    .await
    .unwrap_or_else(|_| panic!("recall failed"));
    assert!(hits.is_empty());
}

#[tokio::test]
async fn test_todo_endpoint_rejects_illegal_transition() {
    let state = state().await;

    let Json(todo) = memory::remember(
        State(Arc::clone(&state)),
        scope(),
        Json(remember_request("ship the drain window", MemoryType::Todo)),
    )
    .await
    .unwrap_or_else(|_| panic!("remember failed"));

    let failure = memory::update_todo(
        State(Arc::clone(&state)),
        scope(),
        Path(todo.id.clone()),
        Json(TodoUpdateRequest {
            status: TodoStatus::Done,
            note: None,
        }),
    )
    .await;
    assert!(failure.is_err());

    let Json(updated) = memory::update_todo(
        State(Arc::clone(&state)),
        scope(),
        Path(todo.id.clone()),
        Json(TodoUpdateRequest {
            status: TodoStatus::InProgress,
            note: Some("started".into()),
        }),
    )
    .await
    .unwrap_or_else(|_| panic!("legal transition failed"));
    assert_eq!(updated.status, Some(TodoStatus::InProgress));
}

#[tokio::test]
async fn test_index_then_search_through_handlers() {
    let state = state().await;
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    std::fs::write(
        dir.path().join("src/tokens.ts"),
        "export function refreshToken(token: string) {\n    return rotate(token);\n}\n",
    )
    .unwrap();

    // Index synchronously through the service (the handler spawns).
    state
        .indexer
        .index_project("demo", dir.path(), &Default::default())
        .await
        .unwrap();

    let Json(response) = search::search(
        State(Arc::clone(&state)),
        scope(),
        Json(SearchRequest {
            query: "refresh token".to_string(),
            limit: 5,
            collection: None,
            score_threshold: None,
        }),
    )
    .await
    .unwrap_or_else(|_| panic!("search failed"));

    assert!(response.count >= 1);
    assert_eq!(response.results[0].file, "src/tokens.ts");

    let Json(status) = index::index_status(
        State(Arc::clone(&state)),
        Path("demo_codebase".to_string()),
    )
    .await
    .unwrap_or_else(|_| panic!("status failed"));
    assert_eq!(status["status"], "completed");
}

#[tokio::test]
async fn test_session_lifecycle_through_handlers() {
    let state = state().await;

    let Json(context) = session::start(
        State(Arc::clone(&state)),
        scope(),
        Json(StartSessionRequest::default()),
    )
    .await
    .unwrap_or_else(|_| panic!("start failed"));

    let mut event = ragd_protocol::SessionActivity {
        file: Some("src/auth.ts".into()),
        query: None,
        tool: Some("search".into()),
        feature: None,
        learning: Some("auth paths are cached per session".into()),
        decision: None,
    };
    let Json(updated) = session::activity(
        State(Arc::clone(&state)),
        scope(),
        Path(context.session_id.clone()),
        Json(event.clone()),
    )
    .await
    .unwrap_or_else(|_| panic!("activity failed"));
    assert_eq!(updated.current_files, vec!["src/auth.ts"]);

    event.learning = None;
    let Json(summary) = session::end(
        State(Arc::clone(&state)),
        scope(),
        Path(context.session_id.clone()),
        Json(Default::default()),
    )
    .await
    .unwrap_or_else(|_| panic!("end failed"));
    assert_eq!(summary.learnings_saved, 1);

    // The learning is now recallable as an insight memory.
    let Json(memories) = memory::list(
        State(Arc::clone(&state)),
        scope(),
        Query(MemoryListRequest {
            memory_type: Some(MemoryType::Insight),
            tag: Some("session".into()),
            limit: 10,
        }),
    )
    .await
    .unwrap_or_else(|_| panic!("list failed"));
    assert_eq!(memories.len(), 1);
}

#[tokio::test]
async fn test_missing_project_header_is_a_validation_error() {
    let state = state().await;
    let result = search::search(
        State(Arc::clone(&state)),
        None,
        Json(SearchRequest {
            query: "anything".to_string(),
            limit: 5,
            collection: None,
            score_threshold: None,
        }),
    )
    .await;
    assert!(result.is_err());
}
