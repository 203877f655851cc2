use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use ragd_protocol::ApiError;

/// Axum-facing wrapper for the shared error taxonomy.
///
/// Every handler returns `Result<T, ApiFailure>`; the body is always the
/// structured `{error, code, details?}` shape so programmatic callers can
/// discriminate by `code`. Only 5xx get logged with detail.
pub struct ApiFailure(pub ApiError);

impl From<ApiError> for ApiFailure {
    fn from(err: ApiError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            log::error!("{}: {}", self.0.code(), self.0);
        }
        (status, Json(self.0.to_body())).into_response()
    }
}

pub type HandlerResult<T> = std::result::Result<T, ApiFailure>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_survive_conversion() {
        let response = ApiFailure(ApiError::NotFound("memory m-1".into())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = ApiFailure(ApiError::CircuitOpen("embedding".into())).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = ApiFailure(ApiError::Timeout { elapsed_ms: 1 }).into_response();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
