//! Error types for GraphVault services
//!
//! Provides:
//! - Distinct error types for different failure modes
//! - HTTP status code mapping
//! - Structured error responses
//! - Retryability classification for the queue-driven worker

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    MissingField,

    // Resource errors (4xxx)
    NotFound,
    ProjectNotFound,
    JobNotFound,
    ObjectMissing,

    // Database errors (7xxx)
    DatabaseError,
    ConnectionError,

    // External service errors (8xxx)
    StorageError,
    JobStoreError,
    QueueError,
    EmbeddingError,
    LlmError,
    LlmCacheInvalid,
    UpstreamError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,
            ErrorCode::MissingField => 1002,

            ErrorCode::NotFound => 4001,
            ErrorCode::ProjectNotFound => 4002,
            ErrorCode::JobNotFound => 4003,
            ErrorCode::ObjectMissing => 4004,

            ErrorCode::DatabaseError => 7001,
            ErrorCode::ConnectionError => 7002,

            ErrorCode::StorageError => 8001,
            ErrorCode::JobStoreError => 8002,
            ErrorCode::QueueError => 8003,
            ErrorCode::EmbeddingError => 8004,
            ErrorCode::LlmError => 8005,
            ErrorCode::LlmCacheInvalid => 8006,
            ErrorCode::UpstreamError => 8007,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("Required field missing: {field}")]
    MissingField { field: String },

    // Resource errors
    #[error("Resource not found: {resource} with id {id}")]
    NotFound { resource: String, id: String },

    #[error("Project not found: {id}")]
    ProjectNotFound { id: String },

    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    #[error("Object missing in blob storage: {key}")]
    ObjectMissing { key: String },

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    // External service errors
    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Job store error: {message}")]
    JobStore { message: String },

    #[error("Queue error: {message}")]
    Queue { message: String },

    #[error("Embedding service error: {message}")]
    Embedding { message: String },

    #[error("LLM error: {message}")]
    Llm { message: String },

    #[error("LLM context cache invalid or expired: {message}")]
    LlmCacheInvalid { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::MissingField { .. } => ErrorCode::MissingField,
            AppError::NotFound { .. } => ErrorCode::NotFound,
            AppError::ProjectNotFound { .. } => ErrorCode::ProjectNotFound,
            AppError::JobNotFound { .. } => ErrorCode::JobNotFound,
            AppError::ObjectMissing { .. } => ErrorCode::ObjectMissing,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::Storage { .. } => ErrorCode::StorageError,
            AppError::JobStore { .. } => ErrorCode::JobStoreError,
            AppError::Queue { .. } => ErrorCode::QueueError,
            AppError::Embedding { .. } => ErrorCode::EmbeddingError,
            AppError::Llm { .. } => ErrorCode::LlmError,
            AppError::LlmCacheInvalid { .. } => ErrorCode::LlmCacheInvalid,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. } | AppError::MissingField { .. } => StatusCode::BAD_REQUEST,

            // 404 Not Found
            AppError::NotFound { .. }
            | AppError::ProjectNotFound { .. }
            | AppError::JobNotFound { .. }
            | AppError::ObjectMissing { .. } => StatusCode::NOT_FOUND,

            // 500 Internal Server Error
            AppError::Database(_)
            | AppError::DatabaseConnection { .. }
            | AppError::Internal { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_)
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::Embedding { .. }
            | AppError::Llm { .. }
            | AppError::LlmCacheInvalid { .. }
            | AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            AppError::Storage { .. } | AppError::JobStore { .. } | AppError::Queue { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }

    /// Whether the queue provider should retry the invocation that hit
    /// this error. Missing objects and bad payloads never heal on retry.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            AppError::Validation { .. }
                | AppError::MissingField { .. }
                | AppError::NotFound { .. }
                | AppError::ProjectNotFound { .. }
                | AppError::JobNotFound { .. }
                | AppError::ObjectMissing { .. }
                | AppError::Configuration { .. }
        )
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                details: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::JobNotFound { id: "test".into() };
        assert_eq!(err.code(), ErrorCode::JobNotFound);
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_retryability() {
        let missing = AppError::ObjectMissing { key: "uploads/x.pdf".into() };
        assert!(!missing.is_retryable());

        let storage = AppError::Storage { message: "timeout".into() };
        assert!(storage.is_retryable());

        let cache = AppError::LlmCacheInvalid { message: "expired".into() };
        assert!(cache.is_retryable());
    }

    #[test]
    fn test_server_error() {
        let err = AppError::Internal {
            message: "Something went wrong".into(),
        };
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.is_server_error());
    }
}
