use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use ragd_protocol::{validate::validate_project_name, ApiError};

use crate::error::ApiFailure;
use crate::state::AppState;

pub const HEADER_PROJECT: &str = "x-project-name";
pub const HEADER_PROJECT_PATH: &str = "x-project-path";
pub const HEADER_API_KEY: &str = "x-api-key";
pub const HEADER_REQUEST_ID: &str = "x-request-id";

/// Upper bound for one request, propagated by cancelling the handler future.
const REQUEST_DEADLINE: Duration = Duration::from_secs(30);

/// Project scope resolved by the middleware; handlers never read headers.
#[derive(Debug, Clone)]
pub struct ProjectScope {
    pub project: String,
    pub path: Option<String>,
}

/// Request pipeline: request id, API key, project header, deadline, metrics.
pub async fn request_pipeline(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let endpoint = request.uri().path().to_string();

    let request_id = request
        .headers()
        .get(HEADER_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let mut response = match prepare(&state, &mut request) {
        Ok(()) => match tokio::time::timeout(REQUEST_DEADLINE, next.run(request)).await {
            Ok(response) => response,
            Err(_) => ApiFailure(ApiError::Timeout {
                elapsed_ms: started.elapsed().as_millis() as u64,
            })
            .into_response(),
        },
        Err(err) => ApiFailure(err).into_response(),
    };

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(HEADER_REQUEST_ID, value);
    }

    let status = response.status().as_u16().to_string();
    state
        .metrics
        .requests
        .with_label_values(&[endpoint.as_str(), status.as_str()])
        .inc();
    state
        .metrics
        .request_duration
        .with_label_values(&[endpoint.as_str()])
        .observe(started.elapsed().as_secs_f64());

    log::info!(
        "[{request_id}] {endpoint} -> {status} in {}ms",
        started.elapsed().as_millis()
    );

    response
}

/// Auth + project resolution; inserts [`ProjectScope`] for the handlers.
fn prepare(state: &AppState, request: &mut Request) -> Result<(), ApiError> {
    if !state.config.api_keys.is_empty() {
        let provided = request
            .headers()
            .get(HEADER_API_KEY)
            .and_then(|v| v.to_str().ok());
        match provided {
            Some(key) if state.config.api_keys.iter().any(|k| k == key) => {}
            Some(_) => return Err(ApiError::Auth("invalid API key".into())),
            None => return Err(ApiError::Auth("missing X-API-Key header".into())),
        }
    }

    let project = request
        .headers()
        .get(HEADER_PROJECT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| state.config.default_project.clone());

    let path = request
        .headers()
        .get(HEADER_PROJECT_PATH)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| state.config.default_project_path.clone());

    if let Some(project) = project {
        validate_project_name(&project)?;
        request.extensions_mut().insert(ProjectScope { project, path });
    }

    Ok(())
}

/// Extract the project scope or fail with a validation error. Handlers that
/// are project-scoped call this first.
pub fn require_project(request_scope: Option<&ProjectScope>) -> Result<&ProjectScope, ApiError> {
    request_scope.ok_or_else(|| {
        ApiError::field(
            "X-Project-Name",
            "header is required (or set PROJECT_NAME on the server)",
        )
    })
}
