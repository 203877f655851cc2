use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::error::HandlerResult;
use crate::state::AppState;

pub async fn health(State(state): State<Arc<AppState>>) -> HandlerResult<Json<Value>> {
    Ok(Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now(),
        "uptimeSecs": (chrono::Utc::now() - state.started_at).num_seconds(),
        "config": state.config.summary(),
        "cache": state.cache.stats().await,
        "breakers": state.breakers.snapshot(),
    })))
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> String {
    state.metrics.render()
}
