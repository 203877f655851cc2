use once_cell::sync::Lazy;
use regex::Regex;
use validator::{ValidationError, ValidationErrors};

use crate::error::{ApiError, FieldViolation};

/// Project namespaces are restricted so they can be embedded in collection names.
pub static PROJECT_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new("^[A-Za-z0-9_-]{1,50}$").expect("static regex"));

/// Collection names allow the same charset, longer.
pub static COLLECTION_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new("^[A-Za-z0-9_-]{1,100}$").expect("static regex"));

pub fn validate_project_name(name: &str) -> Result<(), ApiError> {
    if PROJECT_NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(ApiError::field(
            "project",
            "must match [A-Za-z0-9_-]{1,50}",
        ))
    }
}

pub fn validate_collection_name(name: &str) -> Result<(), ApiError> {
    if COLLECTION_NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(ApiError::field(
            "collection",
            "must match [A-Za-z0-9_-]{1,100}",
        ))
    }
}

/// `validator` custom check: reject blank strings.
pub fn non_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("non_blank"));
    }
    Ok(())
}

/// Flatten `validator`'s nested error map into the wire taxonomy.
pub fn into_api_error(errors: ValidationErrors) -> ApiError {
    let mut fields = Vec::new();
    for (path, kind) in errors.errors() {
        collect_violations(path.as_ref(), kind, &mut fields);
    }
    fields.sort_by(|a, b| a.path.cmp(&b.path));
    let message = fields
        .iter()
        .map(|f| f.path.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    ApiError::Validation {
        message: format!("invalid fields: {message}"),
        fields,
    }
}

fn collect_violations(
    path: &str,
    kind: &validator::ValidationErrorsKind,
    out: &mut Vec<FieldViolation>,
) {
    match kind {
        validator::ValidationErrorsKind::Field(errs) => {
            for err in errs {
                out.push(FieldViolation {
                    path: path.to_string(),
                    message: err
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| err.code.to_string()),
                });
            }
        }
        validator::ValidationErrorsKind::Struct(inner) => {
            for (sub, sub_kind) in inner.errors() {
                collect_violations(&format!("{path}.{sub}"), sub_kind, out);
            }
        }
        validator::ValidationErrorsKind::List(items) => {
            for (idx, inner) in items {
                for (sub, sub_kind) in inner.errors() {
                    collect_violations(&format!("{path}[{idx}].{sub}"), sub_kind, out);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_name_charset() {
        assert!(validate_project_name("demo-project_1").is_ok());
        assert!(validate_project_name("").is_err());
        assert!(validate_project_name("has space").is_err());
        assert!(validate_project_name(&"x".repeat(51)).is_err());
        assert!(validate_project_name(&"x".repeat(50)).is_ok());
    }

    #[test]
    fn test_collection_name_length() {
        assert!(validate_collection_name(&"c".repeat(100)).is_ok());
        assert!(validate_collection_name(&"c".repeat(101)).is_err());
    }
}
