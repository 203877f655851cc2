use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, patch, post};
use axum::Router;

use crate::handlers::{collections, confluence, health, index, memory, search, session};
use crate::middleware::request_pipeline;
use crate::state::AppState;

/// Request bodies are capped at 10 MB.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/metrics", get(health::metrics))
        // Retrieval
        .route("/api/search", post(search::search))
        .route("/api/search-hybrid", post(search::search_hybrid))
        .route("/api/search-similar", post(search::search_similar))
        .route("/api/search-grouped", post(search::search_grouped))
        .route("/api/search-graph", post(search::search_graph))
        .route("/api/ask", post(search::ask))
        .route("/api/explain", post(search::explain))
        .route("/api/find-feature", post(search::find_feature))
        .route("/api/context-pack", post(search::context_pack))
        // Indexing
        .route("/api/index", post(index::index))
        .route("/api/reindex", post(index::reindex))
        .route("/api/index/status/:collection", get(index::index_status))
        .route("/api/stats/:collection", get(index::project_stats))
        // Collections & aliases
        .route("/api/collections", get(collections::list))
        .route("/api/collections/:name", delete(collections::delete))
        .route("/api/collections/:name/info", get(collections::info))
        .route("/api/collections/:name/clear", post(collections::clear))
        .route("/api/collections/:name/indexes", post(collections::create_indexes))
        .route("/api/collections/:name/snapshots", get(collections::snapshots))
        .route("/api/collections/:name/quantization", get(collections::quantization))
        .route("/api/aliases", get(collections::aliases))
        .route("/api/alias/:project", get(collections::alias_info))
        // Memory
        .route(
            "/api/memory",
            post(memory::remember).delete(memory::forget_by_type),
        )
        .route("/api/memory/recall", post(memory::recall))
        .route("/api/memory/list", get(memory::list))
        .route("/api/memory/merge", post(memory::merge))
        .route("/api/memory/batch", post(memory::batch))
        .route("/api/memory/extract", post(memory::extract))
        .route("/api/memory/stats", get(memory::stats))
        .route("/api/memory/quarantine", get(memory::quarantine))
        .route("/api/memory/unvalidated", get(memory::unvalidated))
        .route("/api/memory/todo/:id", patch(memory::update_todo))
        .route("/api/memory/:id", delete(memory::forget))
        .route("/api/memory/:id/validate", patch(memory::validate_memory))
        // Sessions
        .route("/api/session/start", post(session::start))
        .route("/api/session/:id", get(session::get))
        .route("/api/session/:id/activity", post(session::activity))
        .route("/api/session/:id/end", post(session::end))
        .route("/api/sessions", get(session::list))
        // Usage analytics
        .route("/api/tool-analytics", get(session::tool_analytics))
        .route("/api/knowledge-gaps", get(session::knowledge_gaps))
        .route("/api/track-usage", post(session::track_usage))
        .route("/api/similar-queries", post(session::similar_queries))
        .route("/api/patterns/:project", get(session::patterns))
        .route("/api/context/:project", get(session::context))
        .route("/api/changes/:project/:session_id", get(session::changes))
        // Confluence
        .route("/api/confluence/status", get(confluence::status))
        .route("/api/confluence/spaces", get(confluence::spaces))
        .route("/api/confluence/search", post(confluence::search))
        .route("/api/index/confluence", post(confluence::index))
        .layer(axum::middleware::from_fn_with_state(
            Arc::clone(&state),
            request_pipeline,
        ))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}
