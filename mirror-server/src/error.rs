//! # Errors
//!
//! Every failure a client can observe is an [`AppError`]. Each variant maps
//! to one HTTP status and one machine-readable code, and is rendered as:
//!
//! ```json
//! {
//!   "error": "Human-readable error message",
//!   "code": "machine_readable_error_code",
//!   "timestamp": "2024-01-01T12:00:00Z"
//! }
//! ```
//!
//! - **Validation** (400): malformed crate name or version
//! - **Not Found** (404): unknown locally and at the origin
//! - **Forbidden** (403): blocked by local policy
//! - **Origin Error** (origin's status): the origin answered with an error
//! - **Upstream Unavailable** (503): the origin could not be reached
//! - **Storage / Internal** (500): local disk or metadata failures

use crate::coordinator::FetchError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Serialize;

/// JSON body of every error response.
#[derive(Serialize, Debug)]
pub struct ApiErrorResponse {
    pub error: String,
    pub code: String,
    pub timestamp: String,
}

/// Machine-readable classification of an [`AppError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ValidationError,
    NotFound,
    Forbidden,
    OriginError(StatusCode),
    UpstreamUnavailable,
    StorageError,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "validation_error",
            ErrorCode::NotFound => "not_found",
            ErrorCode::Forbidden => "forbidden",
            ErrorCode::OriginError(_) => "origin_error",
            ErrorCode::UpstreamUnavailable => "upstream_unavailable",
            ErrorCode::StorageError => "storage_error",
            ErrorCode::InternalError => "internal_error",
        }
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            ErrorCode::ValidationError => StatusCode::BAD_REQUEST,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::OriginError(status) => *status,
            ErrorCode::UpstreamUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::StorageError | ErrorCode::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Every failure a handler or startup step can report.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Origin returned {0}")]
    OriginError(StatusCode),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Metadata(#[from] mirror_metadata::MetadataError),
}

impl AppError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            AppError::BadRequest(_) | AppError::Json(_) => ErrorCode::ValidationError,
            AppError::NotFound(_) => ErrorCode::NotFound,
            AppError::Forbidden(_) => ErrorCode::Forbidden,
            AppError::OriginError(status) => ErrorCode::OriginError(*status),
            AppError::UpstreamUnavailable(_) => ErrorCode::UpstreamUnavailable,
            AppError::Storage(_) | AppError::Io(_) | AppError::Metadata(_) => {
                ErrorCode::StorageError
            }
            AppError::Initialization(_) => ErrorCode::InternalError,
        }
    }

    pub fn to_error_response(&self) -> ApiErrorResponse {
        ApiErrorResponse {
            error: self.to_string(),
            code: self.error_code().as_str().to_string(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl From<FetchError> for AppError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::NotFound(key) => AppError::NotFound(format!("Crate not found: {key}")),
            FetchError::Forbidden(key) => AppError::Forbidden(format!("Crate is forbidden: {key}")),
            FetchError::Origin(status) => AppError::OriginError(status),
            FetchError::UpstreamUnavailable(msg) => AppError::UpstreamUnavailable(msg),
            FetchError::Storage(msg) => AppError::Storage(msg),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.error_code();
        match code {
            ErrorCode::NotFound | ErrorCode::ValidationError => {
                tracing::debug!(error = %self, "Request rejected")
            }
            ErrorCode::StorageError | ErrorCode::InternalError => {
                tracing::error!(error = %self, "Request failed")
            }
            _ => tracing::warn!(error = %self, "Request failed"),
        }

        let status = code.http_status();
        (status, axum::Json(self.to_error_response())).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
