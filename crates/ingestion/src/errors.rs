//! Ingestion service error types

use graphvault_common::errors::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("PDF parse error: {message}")]
    PdfParse { message: String },

    #[error("No text content extracted from PDF")]
    EmptyDocument,

    #[error("Chunking error: {0}")]
    Chunking(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<IngestionError> for AppError {
    fn from(e: IngestionError) -> Self {
        match e {
            // a malformed document never heals on retry
            IngestionError::PdfParse { message } => AppError::Validation {
                message: format!("PDF parse failed: {}", message),
            },
            IngestionError::EmptyDocument => AppError::Validation {
                message: "No text content extracted from PDF".to_string(),
            },
            other => AppError::Internal {
                message: other.to_string(),
            },
        }
    }
}
