use std::sync::Arc;

use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde_json::{json, Value};

use ragd_protocol::validate::validate_collection_name;
use ragd_protocol::ApiError;

use crate::error::HandlerResult;
use crate::middleware::ProjectScope;
use crate::state::AppState;

type Scope = Option<Extension<ProjectScope>>;

/// Bare names get the `{project}_` prefix when a project is in scope.
fn qualified(scope: &Scope, name: &str) -> Result<String, ApiError> {
    validate_collection_name(name)?;
    Ok(match scope.as_ref().map(|e| &e.0) {
        Some(scope) => ragd_protocol::collections::qualify(&scope.project, name),
        None => name.to_string(),
    })
}

pub async fn list(State(state): State<Arc<AppState>>) -> HandlerResult<Json<Value>> {
    let collections = state.store.list_collections().await?;
    Ok(Json(json!({ "collections": collections })))
}

pub async fn info(
    State(state): State<Arc<AppState>>,
    scope: Scope,
    Path(name): Path<String>,
) -> HandlerResult<Json<Value>> {
    let name = qualified(&scope, &name)?;
    let info = state.store.collection_info(&name).await?;
    Ok(Json(serde_json::to_value(info).map_err(ApiError::from)?))
}

pub async fn clear(
    State(state): State<Arc<AppState>>,
    scope: Scope,
    Path(name): Path<String>,
) -> HandlerResult<Json<Value>> {
    let name = qualified(&scope, &name)?;
    state.store.clear_collection(&name).await?;
    Ok(Json(json!({ "status": "cleared", "collection": name })))
}

pub async fn create_indexes(
    State(state): State<Arc<AppState>>,
    scope: Scope,
    Path(name): Path<String>,
) -> HandlerResult<Json<Value>> {
    let name = qualified(&scope, &name)?;
    state.store.ensure_payload_indexes(&name).await?;
    Ok(Json(json!({
        "status": "ok",
        "collection": name,
        "fields": ragd_vector_store::PAYLOAD_INDEX_FIELDS,
    })))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    scope: Scope,
    Path(name): Path<String>,
) -> HandlerResult<Json<Value>> {
    let name = qualified(&scope, &name)?;
    state.store.delete_collection(&name).await?;
    Ok(Json(json!({ "status": "deleted", "collection": name })))
}

/// Snapshots and quantization are backend-managed; this surface only reports
/// that they are delegated.
pub async fn snapshots(
    scope: Scope,
    Path(name): Path<String>,
) -> HandlerResult<Json<Value>> {
    let name = qualified(&scope, &name)?;
    Ok(Json(json!({
        "collection": name,
        "supported": false,
        "detail": "snapshots are managed by the vector backend",
    })))
}

pub async fn quantization(
    scope: Scope,
    Path(name): Path<String>,
) -> HandlerResult<Json<Value>> {
    let name = qualified(&scope, &name)?;
    Ok(Json(json!({
        "collection": name,
        "supported": false,
        "detail": "quantization is managed by the vector backend",
    })))
}

pub async fn aliases(State(state): State<Arc<AppState>>) -> HandlerResult<Json<Value>> {
    let aliases = state.store.list_aliases().await?;
    Ok(Json(json!({ "aliases": aliases })))
}

pub async fn alias_info(
    State(state): State<Arc<AppState>>,
    Path(project): Path<String>,
) -> HandlerResult<Json<Value>> {
    let alias = ragd_protocol::collections::codebase(&project);
    let target = state.store.list_aliases().await?.get(&alias).cloned();
    match target {
        Some(target) => Ok(Json(json!({ "alias": alias, "collection": target }))),
        None => Err(ApiError::NotFound(format!("no alias for project {project}")).into()),
    }
}
