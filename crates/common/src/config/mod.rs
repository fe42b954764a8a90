//! Configuration management for GraphVault services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values
//!
//! Credential groups double as feature toggles: a subsystem with no
//! credentials configured runs in its local/in-process mode.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Blob storage configuration (S3-compatible or local)
    pub storage: StorageConfig,

    /// Job store configuration (REST key-value or in-process)
    pub job_store: JobStoreConfig,

    /// Task queue configuration
    pub task_queue: TaskQueueConfig,

    /// Embedding service configuration
    pub embedding: EmbeddingConfig,

    /// LLM configuration
    pub llm: LlmConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Database URL
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// S3-compatible endpoint URL (unset -> local filesystem fallback)
    pub s3_endpoint: Option<String>,

    /// Bucket name
    pub bucket: Option<String>,

    /// Access key id
    pub access_key_id: Option<String>,

    /// Secret access key
    pub secret_access_key: Option<String>,

    /// Root directory for the local filesystem fallback
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// TTL for presigned download URLs in seconds
    #[serde(default = "default_signed_url_ttl")]
    pub signed_url_ttl_secs: u64,
}

impl StorageConfig {
    /// All S3 credentials present?
    pub fn s3_configured(&self) -> bool {
        self.s3_endpoint.is_some()
            && self.bucket.is_some()
            && self.access_key_id.is_some()
            && self.secret_access_key.is_some()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobStoreConfig {
    /// REST endpoint of the external key-value store (unset -> in-memory)
    pub rest_url: Option<String>,

    /// Bearer token for the REST store
    pub rest_token: Option<String>,

    /// Job retention in seconds
    #[serde(default = "default_job_ttl")]
    pub ttl_secs: u64,
}

impl JobStoreConfig {
    pub fn rest_configured(&self) -> bool {
        self.rest_url.is_some() && self.rest_token.is_some()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TaskQueueConfig {
    /// Queue provider base URL
    #[serde(default = "default_queue_url")]
    pub url: String,

    /// Provider token (unset -> in-process background task fallback)
    pub token: Option<String>,

    /// Current request signing key
    #[serde(default)]
    pub current_signing_key: String,

    /// Next request signing key (rotation)
    #[serde(default)]
    pub next_signing_key: String,

    /// Publicly reachable worker URL; absent means no external queue
    pub worker_url: Option<String>,

    /// Provider-side retries per message
    #[serde(default = "default_queue_retries")]
    pub retries: u32,
}

impl TaskQueueConfig {
    /// External dispatch requires both a token and a reachable worker.
    pub fn external_configured(&self) -> bool {
        self.token.is_some() && self.worker_url.is_some()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding dimension (fixed per project)
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// Generation model id
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// API base URL
    #[serde(default = "default_llm_api_base")]
    pub api_base: String,

    /// Document context cache TTL in seconds
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_data_dir() -> String { "data".to_string() }
fn default_signed_url_ttl() -> u64 { 3600 }
fn default_job_ttl() -> u64 { 86_400 }
fn default_queue_url() -> String { "https://qstash.upstash.io".to_string() }
fn default_queue_retries() -> u32 { 3 }
fn default_embedding_dimension() -> usize { 1536 }
fn default_embedding_timeout() -> u64 { 30 }
fn default_embedding_retries() -> u32 { 3 }
fn default_llm_model() -> String { "gemini-2.0-flash".to_string() }
fn default_llm_api_base() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_cache_ttl() -> u64 { 3600 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "graphvault".to_string() }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with defaults
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__DATABASE__URL=postgres://...
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: default_host(),
                port: default_port(),
                shutdown_timeout_secs: default_shutdown_timeout(),
            },
            database: DatabaseConfig {
                url: "postgres://localhost/graphvault".to_string(),
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
            },
            storage: StorageConfig {
                s3_endpoint: None,
                bucket: None,
                access_key_id: None,
                secret_access_key: None,
                data_dir: default_data_dir(),
                signed_url_ttl_secs: default_signed_url_ttl(),
            },
            job_store: JobStoreConfig {
                rest_url: None,
                rest_token: None,
                ttl_secs: default_job_ttl(),
            },
            task_queue: TaskQueueConfig {
                url: default_queue_url(),
                token: None,
                current_signing_key: String::new(),
                next_signing_key: String::new(),
                worker_url: None,
                retries: default_queue_retries(),
            },
            embedding: EmbeddingConfig {
                dimension: default_embedding_dimension(),
                timeout_secs: default_embedding_timeout(),
                max_retries: default_embedding_retries(),
            },
            llm: LlmConfig {
                model: default_llm_model(),
                api_base: default_llm_api_base(),
                cache_ttl_secs: default_cache_ttl(),
            },
            observability: ObservabilityConfig {
                log_level: default_log_level(),
                json_logging: default_json_logging(),
                metrics_port: default_metrics_port(),
                service_name: default_service_name(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.embedding.dimension, 1536);
        assert_eq!(config.job_store.ttl_secs, 86_400);
    }

    #[test]
    fn test_subsystem_toggles() {
        let mut config = AppConfig::default();
        assert!(!config.storage.s3_configured());
        assert!(!config.job_store.rest_configured());
        assert!(!config.task_queue.external_configured());

        config.storage.s3_endpoint = Some("https://acct.r2.example.com".into());
        config.storage.bucket = Some("vault".into());
        config.storage.access_key_id = Some("key".into());
        config.storage.secret_access_key = Some("secret".into());
        assert!(config.storage.s3_configured());

        config.task_queue.token = Some("tok".into());
        // still local without a reachable worker url
        assert!(!config.task_queue.external_configured());
        config.task_queue.worker_url = Some("https://worker.example.com".into());
        assert!(config.task_queue.external_configured());
    }
}
