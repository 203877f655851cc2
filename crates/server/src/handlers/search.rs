use std::sync::Arc;

use axum::extract::State;
use axum::{Extension, Json};
use validator::Validate;

use ragd_protocol::api::{
    AskRequest, AskResponse, ContextPackRequest, ContextPackResponse, Explanation, ExplainRequest,
    FindFeatureRequest, FindFeatureResponse, GraphSearchRequest, GraphSearchResponse,
    GroupedSearchRequest, GroupedSearchResponse, HybridSearchRequest, SearchRequest,
    SearchResponse, SimilarSearchRequest,
};
use ragd_protocol::validate::into_api_error;

use crate::error::HandlerResult;
use crate::middleware::{require_project, ProjectScope};
use crate::state::AppState;

type Scope = Option<Extension<ProjectScope>>;

fn project(scope: &Scope) -> Result<&ProjectScope, ragd_protocol::ApiError> {
    require_project(scope.as_ref().map(|e| &e.0))
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    scope: Scope,
    Json(request): Json<SearchRequest>,
) -> HandlerResult<Json<SearchResponse>> {
    let scope = project(&scope)?;
    request.validate().map_err(into_api_error)?;
    let response = state.engine.search(&scope.project, &request).await?;
    state.metrics.searches.with_label_values(&["semantic"]).inc();
    Ok(Json(response))
}

pub async fn search_hybrid(
    State(state): State<Arc<AppState>>,
    scope: Scope,
    Json(request): Json<HybridSearchRequest>,
) -> HandlerResult<Json<SearchResponse>> {
    let scope = project(&scope)?;
    request.validate().map_err(into_api_error)?;
    let response = state.engine.search_hybrid(&scope.project, &request).await?;
    let mode = response.mode.clone().unwrap_or_else(|| "hybrid".into());
    state.metrics.searches.with_label_values(&[mode.as_str()]).inc();
    Ok(Json(response))
}

pub async fn search_similar(
    State(state): State<Arc<AppState>>,
    scope: Scope,
    Json(request): Json<SimilarSearchRequest>,
) -> HandlerResult<Json<SearchResponse>> {
    let scope = project(&scope)?;
    request.validate().map_err(into_api_error)?;
    Ok(Json(state.engine.search_similar(&scope.project, &request).await?))
}

pub async fn search_grouped(
    State(state): State<Arc<AppState>>,
    scope: Scope,
    Json(request): Json<GroupedSearchRequest>,
) -> HandlerResult<Json<GroupedSearchResponse>> {
    let scope = project(&scope)?;
    request.validate().map_err(into_api_error)?;
    Ok(Json(state.engine.search_grouped(&scope.project, &request).await?))
}

pub async fn search_graph(
    State(state): State<Arc<AppState>>,
    scope: Scope,
    Json(request): Json<GraphSearchRequest>,
) -> HandlerResult<Json<GraphSearchResponse>> {
    let scope = project(&scope)?;
    request.validate().map_err(into_api_error)?;
    Ok(Json(state.engine.search_graph(&scope.project, &request).await?))
}

pub async fn ask(
    State(state): State<Arc<AppState>>,
    scope: Scope,
    Json(request): Json<AskRequest>,
) -> HandlerResult<Json<AskResponse>> {
    let scope = project(&scope)?;
    request.validate().map_err(into_api_error)?;
    Ok(Json(state.engine.ask(&scope.project, &request).await?))
}

pub async fn explain(
    State(state): State<Arc<AppState>>,
    scope: Scope,
    Json(request): Json<ExplainRequest>,
) -> HandlerResult<Json<Explanation>> {
    let scope = project(&scope)?;
    request.validate().map_err(into_api_error)?;
    Ok(Json(state.engine.explain(&scope.project, &request).await?))
}

pub async fn find_feature(
    State(state): State<Arc<AppState>>,
    scope: Scope,
    Json(request): Json<FindFeatureRequest>,
) -> HandlerResult<Json<FindFeatureResponse>> {
    let scope = project(&scope)?;
    request.validate().map_err(into_api_error)?;
    Ok(Json(state.engine.find_feature(&scope.project, &request).await?))
}

pub async fn context_pack(
    State(state): State<Arc<AppState>>,
    scope: Scope,
    Json(request): Json<ContextPackRequest>,
) -> HandlerResult<Json<ContextPackResponse>> {
    let scope = project(&scope)?;
    request.validate().map_err(into_api_error)?;
    Ok(Json(state.engine.context_pack(&scope.project, &request).await?))
}
