use std::sync::Arc;

use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde_json::{json, Value};
use validator::Validate;

use ragd_protocol::api::{
    EndSessionRequest, SimilarQueriesRequest, StartSessionRequest, TrackUsageRequest,
};
use ragd_protocol::validate::into_api_error;
use ragd_protocol::{ApiError, SessionActivity, SessionContext, SessionStatus, SessionSummary};

use crate::error::HandlerResult;
use crate::middleware::{require_project, ProjectScope};
use crate::state::AppState;

type Scope = Option<Extension<ProjectScope>>;

fn project(scope: &Scope) -> Result<&ProjectScope, ApiError> {
    require_project(scope.as_ref().map(|e| &e.0))
}

pub async fn start(
    State(state): State<Arc<AppState>>,
    scope: Scope,
    Json(request): Json<StartSessionRequest>,
) -> HandlerResult<Json<SessionContext>> {
    let scope = project(&scope)?;
    request.validate().map_err(into_api_error)?;
    let context = state.sessions.start_session(&scope.project, &request).await?;
    // Warm caches for the queries this session is likely to run.
    state.prefetcher.spawn(context.clone());
    Ok(Json(context))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    scope: Scope,
    Path(id): Path<String>,
) -> HandlerResult<Json<SessionContext>> {
    let scope = project(&scope)?;
    Ok(Json(state.sessions.get_session(&scope.project, &id).await?))
}

pub async fn activity(
    State(state): State<Arc<AppState>>,
    scope: Scope,
    Path(id): Path<String>,
    Json(event): Json<SessionActivity>,
) -> HandlerResult<Json<SessionContext>> {
    let scope = project(&scope)?;
    let context = state
        .sessions
        .record_activity(&scope.project, &id, &event)
        .await?;
    state.prefetcher.spawn(context.clone());
    Ok(Json(context))
}

pub async fn end(
    State(state): State<Arc<AppState>>,
    scope: Scope,
    Path(id): Path<String>,
    Json(request): Json<EndSessionRequest>,
) -> HandlerResult<Json<SessionSummary>> {
    let scope = project(&scope)?;
    Ok(Json(
        state.sessions.end_session(&scope.project, &id, &request).await?,
    ))
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    scope: Scope,
) -> HandlerResult<Json<Vec<SessionContext>>> {
    let scope = project(&scope)?;
    Ok(Json(state.sessions.list_sessions(&scope.project).await?))
}

// ---- Usage analytics -------------------------------------------------------

pub async fn track_usage(
    State(state): State<Arc<AppState>>,
    scope: Scope,
    Json(request): Json<TrackUsageRequest>,
) -> HandlerResult<Json<Value>> {
    let scope = project(&scope)?;
    request.validate().map_err(into_api_error)?;
    state.tracker.track(&scope.project, &request);
    Ok(Json(json!({ "status": "tracked" })))
}

pub async fn tool_analytics(
    State(state): State<Arc<AppState>>,
    scope: Scope,
) -> HandlerResult<Json<Value>> {
    let scope = project(&scope)?;
    Ok(Json(json!({ "tools": state.tracker.tool_analytics(&scope.project) })))
}

pub async fn knowledge_gaps(
    State(state): State<Arc<AppState>>,
    scope: Scope,
) -> HandlerResult<Json<Value>> {
    let scope = project(&scope)?;
    Ok(Json(json!({ "gaps": state.tracker.knowledge_gaps(&scope.project) })))
}

pub async fn similar_queries(
    State(state): State<Arc<AppState>>,
    scope: Scope,
    Json(request): Json<SimilarQueriesRequest>,
) -> HandlerResult<Json<Value>> {
    let scope = project(&scope)?;
    request.validate().map_err(into_api_error)?;
    let similar = state
        .tracker
        .similar_queries(&scope.project, &request.query, request.limit)
        .await?;
    Ok(Json(json!({ "queries": similar })))
}

pub async fn patterns(
    State(state): State<Arc<AppState>>,
    Path(project): Path<String>,
) -> HandlerResult<Json<Value>> {
    Ok(Json(serde_json::to_value(state.tracker.patterns(&project)).map_err(ApiError::from)?))
}

/// Latest active session for the project, as "current context".
pub async fn context(
    State(state): State<Arc<AppState>>,
    Path(project): Path<String>,
) -> HandlerResult<Json<SessionContext>> {
    let sessions = state.sessions.list_sessions(&project).await?;
    sessions
        .into_iter()
        .filter(|s| s.status == SessionStatus::Active)
        .max_by_key(|s| s.last_activity_at)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no active session for {project}")).into())
}

/// Files touched during one session.
pub async fn changes(
    State(state): State<Arc<AppState>>,
    Path((project, session_id)): Path<(String, String)>,
) -> HandlerResult<Json<Value>> {
    let session = state.sessions.get_session(&project, &session_id).await?;
    Ok(Json(json!({
        "sessionId": session_id,
        "files": session.current_files,
        "queries": session.recent_queries,
    })))
}
