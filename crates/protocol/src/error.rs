use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ApiError>;

/// Cross-cutting error taxonomy shared by every subsystem.
///
/// Each variant maps to a stable wire code and an HTTP status, and knows
/// whether the retry layer is allowed to replay the operation.
#[derive(Error, Debug, Clone)]
pub enum ApiError {
    #[error("validation failed: {message}")]
    Validation {
        message: String,
        /// Per-field violation paths, e.g. `limit: must be between 1 and 100`.
        fields: Vec<FieldViolation>,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Auth(String),

    #[error("rate limited by {service}")]
    RateLimit {
        service: String,
        /// Seconds the upstream asked us to wait, when it told us.
        retry_after_secs: Option<u64>,
    },

    #[error("circuit open for {0}")]
    CircuitOpen(String),

    #[error("{service} error: {message}")]
    ExternalService { service: String, message: String },

    #[error("operation timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Unknown(String),
}

/// A single field-level validation failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldViolation {
    pub path: String,
    pub message: String,
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(path: impl Into<String>, message: impl Into<String>) -> Self {
        let path = path.into();
        let message = message.into();
        Self::Validation {
            message: format!("{path}: {message}"),
            fields: vec![FieldViolation { path, message }],
        }
    }

    pub fn external(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalService {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Stable machine-readable code surfaced in the error body.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Auth(_) => "AUTH_ERROR",
            Self::RateLimit { .. } => "RATE_LIMIT",
            Self::CircuitOpen(_) => "CIRCUIT_OPEN",
            Self::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Conflict(_) => "CONFLICT",
            Self::Unknown(_) => "UNKNOWN_ERROR",
        }
    }

    /// HTTP status the API layer responds with.
    pub fn status(&self) -> u16 {
        match self {
            Self::Validation { .. } => 400,
            Self::NotFound(_) => 404,
            Self::Auth(_) => 401,
            Self::RateLimit { .. } => 429,
            Self::CircuitOpen(_) | Self::ExternalService { .. } => 503,
            Self::Timeout { .. } => 504,
            Self::Configuration(_) | Self::Unknown(_) => 500,
            Self::Conflict(_) => 409,
        }
    }

    /// Whether the retry layer may replay the failed operation.
    ///
    /// Circuit-open is deliberately non-retryable: the breaker already decided
    /// the dependency is down, replaying would just re-trip it.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimit { .. } | Self::ExternalService { .. } | Self::Timeout { .. }
        )
    }

    /// Wire body: `{error, code, details?}`.
    pub fn to_body(&self) -> serde_json::Value {
        let mut body = serde_json::json!({
            "error": self.to_string(),
            "code": self.code(),
        });
        match self {
            Self::Validation { fields, .. } if !fields.is_empty() => {
                body["details"] = serde_json::json!({ "fields": fields });
            }
            Self::RateLimit {
                retry_after_secs: Some(secs),
                ..
            } => {
                body["details"] = serde_json::json!({ "retryAfter": secs });
            }
            _ => {}
        }
        body
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Unknown(format!("serialization error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::validation("x").status(), 400);
        assert_eq!(ApiError::NotFound("m".into()).status(), 404);
        assert_eq!(ApiError::CircuitOpen("llm".into()).status(), 503);
        assert_eq!(ApiError::Timeout { elapsed_ms: 10 }.status(), 504);
        assert_eq!(ApiError::Conflict("merge busy".into()).status(), 409);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ApiError::Timeout { elapsed_ms: 1 }.is_retryable());
        assert!(ApiError::external("embedding", "connect refused").is_retryable());
        assert!(!ApiError::CircuitOpen("embedding".into()).is_retryable());
        assert!(!ApiError::validation("bad").is_retryable());
        assert!(!ApiError::Configuration("missing url".into()).is_retryable());
    }

    #[test]
    fn test_body_includes_field_details() {
        let err = ApiError::field("limit", "must be between 1 and 100");
        let body = err.to_body();
        assert_eq!(body["code"], "VALIDATION_ERROR");
        assert_eq!(body["details"]["fields"][0]["path"], "limit");
    }
}
