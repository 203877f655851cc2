use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde_json::{json, Value};

use ragd_protocol::api::{IndexRequest, ReindexRequest};
use ragd_protocol::{ApiError, IndexPhase};

use crate::error::HandlerResult;
use crate::middleware::{require_project, ProjectScope};
use crate::state::AppState;

type Scope = Option<Extension<ProjectScope>>;

fn resolve_root(scope: &ProjectScope, body_path: Option<&str>) -> Result<PathBuf, ApiError> {
    let path = body_path
        .map(str::to_string)
        .or_else(|| scope.path.clone())
        .ok_or_else(|| {
            ApiError::field("path", "missing: set the body path or the X-Project-Path header")
        })?;
    let root = PathBuf::from(path);
    if !root.is_dir() {
        return Err(ApiError::field("path", format!("{} is not a directory", root.display())));
    }
    Ok(root)
}

/// A project name also arrives as a collection name on the status routes;
/// strip the collection suffix when present.
fn project_of(name: &str) -> String {
    for suffix in ["_codebase", "_docs", "_confluence", "_agent_memory", "_sessions"] {
        if let Some(prefix) = name.split(suffix).next() {
            if name != prefix && name.starts_with(prefix) {
                return prefix.to_string();
            }
        }
    }
    name.to_string()
}

pub async fn index(
    State(state): State<Arc<AppState>>,
    scope: Scope,
    Json(request): Json<IndexRequest>,
) -> HandlerResult<Json<Value>> {
    let scope = require_project(scope.as_ref().map(|e| &e.0))?.clone();
    let root = resolve_root(&scope, request.path.as_deref())?;

    // Fast-fail a second submission; the job's own status claim is the
    // authoritative guard against the race.
    if state.indexer.status(&scope.project).status == IndexPhase::Indexing {
        return Err(ApiError::Conflict(format!(
            "already_indexing: project {} has a job in progress",
            scope.project
        ))
        .into());
    }

    let indexer = Arc::clone(&state.indexer);
    let metrics = Arc::clone(&state.metrics);
    let project = scope.project.clone();
    tokio::spawn(async move {
        metrics.active_index_jobs.inc();
        match indexer.index_project(&project, &root, &request).await {
            Ok(outcome) => log::info!(
                "indexed {project}: {} files, {} chunks, {} errors",
                outcome.files_indexed,
                outcome.chunks_indexed,
                outcome.errors.len()
            ),
            Err(err) => log::error!("indexing {project} failed: {err}"),
        }
        metrics.active_index_jobs.dec();
    });

    Ok(Json(json!({ "status": "started", "project": scope.project })))
}

pub async fn reindex(
    State(state): State<Arc<AppState>>,
    scope: Scope,
    Json(request): Json<ReindexRequest>,
) -> HandlerResult<Json<Value>> {
    let scope = require_project(scope.as_ref().map(|e| &e.0))?.clone();
    let root = resolve_root(&scope, request.path.as_deref())?;

    if state.indexer.status(&scope.project).status == IndexPhase::Indexing {
        return Err(ApiError::Conflict(format!(
            "already_indexing: project {} has a job in progress",
            scope.project
        ))
        .into());
    }

    let indexer = Arc::clone(&state.indexer);
    let metrics = Arc::clone(&state.metrics);
    let project = scope.project.clone();
    tokio::spawn(async move {
        metrics.active_index_jobs.inc();
        match indexer.reindex_zero_downtime(&project, &root, &request).await {
            Ok(outcome) => log::info!(
                "reindexed {project} with zero downtime: {} chunks",
                outcome.chunks_indexed
            ),
            Err(err) => log::error!("reindex of {project} failed: {err}"),
        }
        metrics.active_index_jobs.dec();
    });

    Ok(Json(json!({ "status": "started", "project": scope.project, "zeroDowntime": true })))
}

pub async fn index_status(
    State(state): State<Arc<AppState>>,
    Path(collection): Path<String>,
) -> HandlerResult<Json<Value>> {
    let status = state.indexer.status(&project_of(&collection));
    Ok(Json(serde_json::to_value(status).map_err(ApiError::from)?))
}

pub async fn project_stats(
    State(state): State<Arc<AppState>>,
    Path(collection): Path<String>,
) -> HandlerResult<Json<Value>> {
    let stats = state.indexer.project_stats(&project_of(&collection));
    Ok(Json(serde_json::to_value(stats).map_err(ApiError::from)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_of_strips_collection_suffixes() {
        assert_eq!(project_of("demo_codebase"), "demo");
        assert_eq!(project_of("demo_codebase_v3"), "demo");
        assert_eq!(project_of("demo_agent_memory"), "demo");
        assert_eq!(project_of("demo"), "demo");
    }
}
