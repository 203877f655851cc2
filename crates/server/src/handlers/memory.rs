use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use validator::Validate;

use ragd_protocol::api::{
    BatchRememberRequest, BatchRememberResponse, MemoryListRequest, MemoryStats, MergeRequest,
    MergeResponse, RecallHit, RecallRequest, RememberRequest, TodoUpdateRequest,
    ValidateMemoryRequest,
};
use ragd_protocol::validate::into_api_error;
use ragd_protocol::{ApiError, Memory, MemoryType};
use ragd_providers::CompletionOptions;

use crate::error::HandlerResult;
use crate::middleware::{require_project, ProjectScope};
use crate::state::AppState;

type Scope = Option<Extension<ProjectScope>>;

fn project(scope: &Scope) -> Result<&ProjectScope, ApiError> {
    require_project(scope.as_ref().map(|e| &e.0))
}

pub async fn remember(
    State(state): State<Arc<AppState>>,
    scope: Scope,
    Json(request): Json<RememberRequest>,
) -> HandlerResult<Json<Memory>> {
    let scope = project(&scope)?;
    request.validate().map_err(into_api_error)?;
    Ok(Json(state.memory.remember(&scope.project, request).await?))
}

pub async fn recall(
    State(state): State<Arc<AppState>>,
    scope: Scope,
    Json(request): Json<RecallRequest>,
) -> HandlerResult<Json<Vec<RecallHit>>> {
    let scope = project(&scope)?;
    request.validate().map_err(into_api_error)?;
    Ok(Json(state.memory.recall(&scope.project, request).await?))
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    scope: Scope,
    Query(request): Query<MemoryListRequest>,
) -> HandlerResult<Json<Vec<Memory>>> {
    let scope = project(&scope)?;
    request.validate().map_err(into_api_error)?;
    Ok(Json(state.memory.list(&scope.project, request).await?))
}

pub async fn forget(
    State(state): State<Arc<AppState>>,
    scope: Scope,
    Path(id): Path<String>,
) -> HandlerResult<Json<Value>> {
    let scope = project(&scope)?;
    let deleted = state.memory.forget(&scope.project, &id).await;
    Ok(Json(json!({ "deleted": deleted, "id": id })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForgetByTypeQuery {
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
}

pub async fn forget_by_type(
    State(state): State<Arc<AppState>>,
    scope: Scope,
    Query(query): Query<ForgetByTypeQuery>,
) -> HandlerResult<Json<Value>> {
    let scope = project(&scope)?;
    let count = state
        .memory
        .forget_by_type(&scope.project, query.memory_type)
        .await?;
    Ok(Json(json!({ "deleted": count })))
}

pub async fn validate_memory(
    State(state): State<Arc<AppState>>,
    scope: Scope,
    Path(id): Path<String>,
    Json(request): Json<ValidateMemoryRequest>,
) -> HandlerResult<Json<Memory>> {
    let scope = project(&scope)?;
    Ok(Json(
        state
            .memory
            .validate_memory(&scope.project, &id, request.validated)
            .await?,
    ))
}

pub async fn update_todo(
    State(state): State<Arc<AppState>>,
    scope: Scope,
    Path(id): Path<String>,
    Json(request): Json<TodoUpdateRequest>,
) -> HandlerResult<Json<Memory>> {
    let scope = project(&scope)?;
    Ok(Json(
        state
            .memory
            .update_todo_status(&scope.project, &id, request.status, request.note)
            .await?,
    ))
}

pub async fn merge(
    State(state): State<Arc<AppState>>,
    scope: Scope,
    Json(request): Json<MergeRequest>,
) -> HandlerResult<Json<MergeResponse>> {
    let scope = project(&scope)?;
    request.validate().map_err(into_api_error)?;
    Ok(Json(state.memory.merge_memories(&scope.project, request).await?))
}

pub async fn batch(
    State(state): State<Arc<AppState>>,
    scope: Scope,
    Json(request): Json<BatchRememberRequest>,
) -> HandlerResult<Json<BatchRememberResponse>> {
    let scope = project(&scope)?;
    request.validate().map_err(into_api_error)?;
    Ok(Json(
        state.memory.batch_remember(&scope.project, request.items).await?,
    ))
}

#[derive(Debug, Deserialize, Validate)]
pub struct ExtractRequest {
    #[validate(length(min = 1, message = "must not be empty"))]
    pub text: String,
}

#[derive(Debug, Deserialize)]
struct ExtractedItem {
    #[serde(rename = "type")]
    memory_type: String,
    content: String,
    #[serde(default)]
    tags: Vec<String>,
}

/// LLM-assisted extraction: pull decisions/insights/todos out of free text
/// and store them as a batch.
pub async fn extract(
    State(state): State<Arc<AppState>>,
    scope: Scope,
    Json(request): Json<ExtractRequest>,
) -> HandlerResult<Json<BatchRememberResponse>> {
    let scope = project(&scope)?;
    request.validate().map_err(into_api_error)?;

    let prompt = format!(
        "Extract durable knowledge from the text below. Respond with a JSON array of \
{{\"type\": \"decision\"|\"insight\"|\"todo\", \"content\": string, \"tags\": string[]}}. \
Return [] when nothing is worth keeping.\n\nText:\n{}",
        request.text
    );
    let completion = state
        .llm
        .complete(&prompt, &CompletionOptions::default())
        .await?;

    let raw = completion.text.trim();
    let stripped = raw
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let extracted: Vec<ExtractedItem> = match serde_json::from_str(stripped) {
        Ok(items) => items,
        Err(err) => {
            return Ok(Json(BatchRememberResponse {
                saved: 0,
                errors: vec![format!("llm output was not parseable: {err}")],
            }))
        }
    };

    let items: Vec<RememberRequest> = extracted
        .into_iter()
        .filter_map(|item| {
            let memory_type = MemoryType::parse(&item.memory_type)?;
            Some(RememberRequest {
                memory_type,
                content: item.content,
                tags: item.tags,
                related_to: None,
                validated: None,
                source: Some("extract".to_string()),
                confidence: None,
                metadata: Default::default(),
            })
        })
        .collect();

    if items.is_empty() {
        return Ok(Json(BatchRememberResponse {
            saved: 0,
            errors: Vec::new(),
        }));
    }
    Ok(Json(state.memory.batch_remember(&scope.project, items).await?))
}

pub async fn stats(
    State(state): State<Arc<AppState>>,
    scope: Scope,
) -> HandlerResult<Json<MemoryStats>> {
    let scope = project(&scope)?;
    Ok(Json(state.memory.get_stats(&scope.project).await?))
}

pub async fn unvalidated(
    State(state): State<Arc<AppState>>,
    scope: Scope,
) -> HandlerResult<Json<Vec<Memory>>> {
    let scope = project(&scope)?;
    Ok(Json(state.memory.get_unvalidated(&scope.project, 50).await?))
}

/// Quarantine: unvalidated memories whose own confidence is low.
pub async fn quarantine(
    State(state): State<Arc<AppState>>,
    scope: Scope,
) -> HandlerResult<Json<Vec<Memory>>> {
    let scope = project(&scope)?;
    let memories = state.memory.get_unvalidated(&scope.project, 200).await?;
    Ok(Json(
        memories
            .into_iter()
            .filter(|m| m.confidence.map(|c| c < 0.5).unwrap_or(false))
            .collect(),
    ))
}
