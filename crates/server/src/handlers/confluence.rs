use std::sync::Arc;

use axum::extract::State;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use validator::Validate;

use ragd_protocol::validate::into_api_error;
use ragd_protocol::ApiError;

use crate::confluence::ConfluenceBridge;
use crate::error::HandlerResult;
use crate::middleware::{require_project, ProjectScope};
use crate::state::AppState;

type Scope = Option<Extension<ProjectScope>>;

fn bridge(state: &AppState) -> Result<&Arc<ConfluenceBridge>, ApiError> {
    state.confluence.as_ref().ok_or_else(|| {
        ApiError::Configuration(
            "Confluence is not configured (set CONFLUENCE_BASE_URL, CONFLUENCE_EMAIL, CONFLUENCE_API_TOKEN)"
                .into(),
        )
    })
}

pub async fn status(State(state): State<Arc<AppState>>) -> HandlerResult<Json<Value>> {
    match state.confluence.as_ref() {
        None => Ok(Json(json!({ "configured": false }))),
        Some(bridge) => {
            let breaker = state.breakers.get("confluence");
            let status = breaker.call(|| bridge.status()).await?;
            Ok(Json(status))
        }
    }
}

pub async fn spaces(State(state): State<Arc<AppState>>) -> HandlerResult<Json<Value>> {
    let bridge = bridge(&state)?;
    let breaker = state.breakers.get("confluence");
    let spaces = breaker.call(|| bridge.spaces()).await?;
    Ok(Json(json!({ "spaces": spaces })))
}

#[derive(Debug, Deserialize, Validate)]
pub struct ConfluenceSearchRequest {
    #[validate(length(min = 1, message = "must not be empty"))]
    pub query: String,
    #[serde(default = "default_limit")]
    #[validate(range(min = 1, max = 50))]
    pub limit: usize,
}

fn default_limit() -> usize {
    10
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ConfluenceSearchRequest>,
) -> HandlerResult<Json<Value>> {
    request.validate().map_err(into_api_error)?;
    let bridge = bridge(&state)?;
    let breaker = state.breakers.get("confluence");
    let results = breaker
        .call(|| bridge.search(&request.query, request.limit))
        .await?;
    Ok(Json(json!({ "results": results })))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct IndexConfluenceRequest {
    #[validate(length(min = 1, message = "must not be empty"))]
    pub space_key: String,
}

pub async fn index(
    State(state): State<Arc<AppState>>,
    scope: Scope,
    Json(request): Json<IndexConfluenceRequest>,
) -> HandlerResult<Json<Value>> {
    let scope = require_project(scope.as_ref().map(|e| &e.0))?;
    request.validate().map_err(into_api_error)?;
    let bridge = bridge(&state)?;
    let breaker = state.breakers.get("confluence");
    let indexed = breaker
        .call(|| {
            bridge.index_space(
                &scope.project,
                &request.space_key,
                &state.store,
                &state.embedder,
            )
        })
        .await?;
    Ok(Json(json!({
        "status": "completed",
        "space": request.space_key,
        "chunksIndexed": indexed,
    })))
}
