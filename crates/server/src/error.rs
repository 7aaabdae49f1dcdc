//! API error types.

use crate::ingest::IngestError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chunkd_storage::{RegistryError, StorageError};
use serde::Serialize;

/// Detail returned for unknown or malformed upload ids.
pub const FILE_ID_NOT_FOUND: &str = "File ID not found";

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Human-readable error message.
    pub detail: String,
    /// Error code for programmatic handling.
    pub code: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Internal(_) => "internal_error",
            Self::Storage(e) if e.is_quota_exceeded() => "storage_quota_exceeded",
            Self::Storage(e) if e.is_transient() => "storage_unavailable",
            Self::Storage(_) => "storage_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Storage(e) if e.is_quota_exceeded() => StatusCode::INSUFFICIENT_STORAGE,
            Self::Storage(e) if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(_) => Self::NotFound(FILE_ID_NOT_FOUND.to_string()),
            RegistryError::Storage(e) => Self::Storage(e),
            corrupt @ RegistryError::Corrupt { .. } => Self::Internal(corrupt.to_string()),
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::InvalidFilename(e) => Self::BadRequest(e.to_string()),
            IngestError::Source(e) => Self::BadRequest(format!("failed to read upload body: {e}")),
            IngestError::Storage(e) => Self::Storage(e),
            IngestError::Registry(e) => e.into(),
            IngestError::Manifest(e) => Self::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "Request failed");
        }
        let body = ErrorResponse {
            detail: self.to_string(),
            code: self.code().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
