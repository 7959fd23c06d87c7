//! API error taxonomy and the uniform error envelope.

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::lifecycle::LifecycleError;
use crate::storage::StorageError;

/// Stable error codes surfaced to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    FileTooLarge,
    UnsupportedFormat,
    NotFound,
    StorageError,
    ProcessingError,
    DatabaseError,
    InternalError,
}

impl ErrorCode {
    pub fn status(self) -> StatusCode {
        match self {
            Self::ValidationError | Self::FileTooLarge | Self::UnsupportedFormat => {
                StatusCode::BAD_REQUEST
            }
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::StorageError
            | Self::ProcessingError
            | Self::DatabaseError
            | Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// An error a handler returns. Rendered as the uniform envelope by the
/// server layer, which stamps the request path.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<Value>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        let code = match &err {
            StorageError::NotFound(_) => ErrorCode::NotFound,
            StorageError::Database(_) | StorageError::Conflict(_) => ErrorCode::DatabaseError,
            _ => ErrorCode::StorageError,
        };
        Self::new(code, err.to_string())
    }
}

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::InvalidTransition { .. } => Self::validation(err.to_string()),
            LifecycleError::Storage(storage) => storage.into(),
        }
    }
}

/// The wire shape of every error response:
/// `{error, message, timestamp, path, details?}`.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: ErrorCode,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorBody {
    pub fn new(error: &ApiError, path: impl Into<String>) -> Self {
        Self {
            error: error.code,
            message: error.message.clone(),
            timestamp: Utc::now(),
            path: path.into(),
            details: error.details.clone(),
        }
    }
}
