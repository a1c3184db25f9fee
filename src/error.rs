//! Application error types and HTTP status mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Error model used throughout request parsing, validation, and inference.
///
/// Two tiers: client-caused errors map to `400`, server/dependency errors
/// to `500`. Every failure is terminal for its request; nothing retries.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error("{0}")]
    BadMultipart(String),
    #[error("Transcription failed: {0}")]
    Transcription(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// Creates a `400 Bad Request` validation error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Creates a multipart parsing/shape validation error.
    pub fn bad_multipart(message: impl Into<String>) -> Self {
        Self::BadMultipart(message.into())
    }

    /// Creates a `500` error carrying the underlying model failure text.
    pub fn transcription(message: impl Into<String>) -> Self {
        Self::Transcription(message.into())
    }

    /// Creates a generic internal server error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

#[derive(Debug, Serialize)]
struct ErrorPayload {
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::InvalidRequest(_) | ApiError::BadMultipart(_) => StatusCode::BAD_REQUEST,
            ApiError::Transcription(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let payload = ErrorPayload {
            detail: self.to_string(),
        };

        (status, Json(payload)).into_response()
    }
}
