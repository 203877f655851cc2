//! HTTP API surface and composition root.
//!
//! Thin dispatch over the engine crates: middleware resolves request id, API
//! key and project scope; handlers validate typed request bodies and call one
//! service; the error taxonomy maps to structured JSON bodies.

pub mod config;
pub mod confluence;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

use std::sync::Arc;

use ragd_protocol::{ApiError, Result};

pub use config::AppConfig;
pub use routes::app;
pub use state::AppState;

/// Bind and serve until the process is stopped.
pub async fn serve(config: AppConfig) -> Result<()> {
    let bind = config.bind.clone();
    let state = AppState::build(config).await?;
    let router = app(state);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .map_err(|e| ApiError::Configuration(format!("cannot bind {bind}: {e}")))?;
    log::info!("ragd listening on {bind}");

    axum::serve(listener, router)
        .await
        .map_err(|e| ApiError::Unknown(format!("server error: {e}")))?;
    Ok(())
}

/// Test/embedded construction helper: memory backend + hash embedder.
pub fn test_config() -> AppConfig {
    AppConfig {
        bind: "127.0.0.1:0".into(),
        default_project: Some("demo".into()),
        default_project_path: None,
        api_keys: Vec::new(),
        embedding_provider: "hash".into(),
        embedding_url: String::new(),
        embedding_model: "hash".into(),
        vector_size: 64,
        sparse_enabled: false,
        llm_provider: "ollama".into(),
        llm_url: "http://localhost:11434".into(),
        llm_model: "test".into(),
        vector_backend: "memory".into(),
        qdrant_url: String::new(),
        qdrant_api_key: None,
        confluence_base_url: None,
        confluence_email: None,
        confluence_api_token: None,
    }
}
