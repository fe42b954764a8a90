//! GraphVault Common Library
//!
//! Shared code for all GraphVault services including:
//! - Database models and repository patterns
//! - Blob storage abstraction (S3-compatible + local)
//! - Job state store (REST key-value + in-process memory)
//! - Task queue publisher
//! - Embedding client abstraction
//! - LLM client with context caching and tolerant JSON parsing
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability

pub mod config;
pub mod db;
pub mod embeddings;
pub mod errors;
pub mod jobs;
pub mod llm;
pub mod metrics;
pub mod queue;
pub mod storage;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::Repository;
pub use embeddings::Embedder;
pub use errors::{AppError, Result};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Embedding dimension shared by every provider; fixed per project once
/// the first chunk is persisted.
pub const EMBEDDING_DIMENSION: usize = 1536;
