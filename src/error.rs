//! Error types for the HTTP surface.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Request-level error, rendered as a JSON envelope.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// No route matched the request path.
    #[error("{0}")]
    NotFound(String),

    /// Missing or unverifiable authentication token.
    #[error("{0}")]
    Unauthorized(String),

    /// Internal failure. Detail is `None` outside the development environment.
    #[error("internal error")]
    Internal(Option<String>),
}

/// JSON body written for every `ApiError`.
#[derive(Serialize)]
pub struct ErrorBody {
    /// Error code (e.g. "not_found", "unauthorized", "internal_error").
    pub error: String,
    /// Human-readable error detail, if available.
    pub detail: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, detail) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg)),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", Some(msg)),
            ApiError::Internal(detail) => {
                if let Some(msg) = &detail {
                    tracing::error!(%msg, "internal server error");
                }
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", detail)
            }
        };

        let body = ErrorBody {
            error: error.to_string(),
            detail,
        };

        (status, axum::Json(body)).into_response()
    }
}
