//! HTTP error taxonomy.
//!
//! Every module error converges here so handlers can use `?` and still
//! produce the right status class: 401 auth, 400 malformed input, 403
//! policy, 404 unknown ids, 500 corrupt persistence.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::config::ConfigError;
use crate::kernel::executor::ExecError;
use crate::kernel::trace::StoreError;
use crate::models::ModelsError;

/// Client-visible error with a status class and a `detail` message.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or invalid bearer token.
    #[error("{0}")]
    Unauthorized(String),
    /// Malformed input.
    #[error("{0}")]
    BadRequest(String),
    /// Refused by policy.
    #[error("{0}")]
    Forbidden(String),
    /// Unknown identifier.
    #[error("{0}")]
    NotFound(String),
    /// Server-side failure, typically corrupt on-disk state.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

impl From<ConfigError> for ApiError {
    fn from(e: ConfigError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(_) => ApiError::NotFound(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<ModelsError> for ApiError {
    fn from(e: ModelsError) -> Self {
        match e {
            ModelsError::FileNotFound(_) => ApiError::BadRequest(e.to_string()),
            ModelsError::NotInstalled(_) => ApiError::NotFound(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<ExecError> for ApiError {
    fn from(e: ExecError) -> Self {
        match e {
            ExecError::Forbidden(message) => ApiError::Forbidden(message),
            ExecError::BadRequest(message) => ApiError::BadRequest(message),
            ExecError::Internal(message) => ApiError::Internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::Unauthorized(String::from("x")).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::Forbidden(String::from("x")).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::NotFound(String::from("x")).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Internal(String::from("x")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_store_errors_split_by_kind() {
        let missing: ApiError = StoreError::NotFound(uuid::Uuid::new_v4()).into();
        assert!(matches!(missing, ApiError::NotFound(_)));
    }
}
