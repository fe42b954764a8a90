//! Blob storage abstraction
//!
//! Provides a content-addressed byte store over two backends:
//! - S3-compatible object storage (signature v4, custom endpoint, auto region)
//! - Local filesystem rooted at a data directory
//!
//! Backend selection is configuration-driven: all four S3 settings present
//! selects the remote store, anything less falls back to local disk.

use crate::config::StorageConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Byte store for uploads and export artifacts.
/// Keys are forward-slash-separated paths (`uploads/{uuid}.pdf`).
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes under a key
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()>;

    /// Fetch bytes by key
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Delete an object
    async fn delete(&self, key: &str) -> Result<()>;

    /// Produce a time-limited download URL for a key
    async fn signed_url(&self, key: &str, ttl: Duration) -> Result<String>;
}

/// S3-compatible blob store (works against R2 and friends)
pub struct S3BlobStore {
    client: S3Client,
    bucket: String,
}

impl S3BlobStore {
    pub fn new(endpoint: &str, bucket: &str, access_key_id: &str, secret_access_key: &str) -> Self {
        let credentials = Credentials::new(access_key_id, secret_access_key, None, None, "graphvault");

        let config = aws_sdk_s3::config::Builder::new()
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .endpoint_url(endpoint)
            .region(Region::new("auto"))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self {
            client: S3Client::from_conf(config),
            bucket: bucket.to_string(),
        }
    }

    fn map_get_error(key: &str, err: impl std::fmt::Display, not_found: bool) -> AppError {
        if not_found {
            AppError::ObjectMissing { key: key.to_string() }
        } else {
            AppError::Storage {
                message: format!("Failed to fetch '{}': {}", key, err),
            }
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| AppError::Storage {
                message: format!("Failed to upload '{}': {}", key, e),
            })?;

        debug!(key = %key, "Blob stored");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let not_found = e
                    .as_service_error()
                    .map(|se| se.is_no_such_key())
                    .unwrap_or(false);
                Self::map_get_error(key, e, not_found)
            })?;

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| AppError::Storage {
                message: format!("Failed to read body of '{}': {}", key, e),
            })?
            .into_bytes()
            .to_vec();

        debug!(key = %key, size = bytes.len(), "Blob fetched");
        Ok(bytes)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| AppError::Storage {
                message: format!("Failed to delete '{}': {}", key, e),
            })?;

        Ok(())
    }

    async fn signed_url(&self, key: &str, ttl: Duration) -> Result<String> {
        let presigning = PresigningConfig::expires_in(ttl).map_err(|e| AppError::Storage {
            message: format!("Invalid presigning TTL: {}", e),
        })?;

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| AppError::Storage {
                message: format!("Failed to presign '{}': {}", key, e),
            })?;

        Ok(request.uri().to_string())
    }
}

/// Local filesystem fallback mirroring the same key layout
pub struct LocalBlobStore {
    base_dir: PathBuf,
}

impl LocalBlobStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        // keys are store-internal paths, never user paths; still refuse
        // anything that climbs out of the data dir
        if key.split('/').any(|seg| seg == "..") {
            return Err(AppError::Validation {
                message: format!("invalid blob key: {}", key),
            });
        }
        Ok(self.base_dir.join(key))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let path = self.path_for(key)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(&path, bytes).await?;
        debug!(key = %key, "Blob written to local store");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;

        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AppError::ObjectMissing { key: key.to_string() })
            }
            Err(e) => Err(AppError::Storage {
                message: format!("Failed to read '{}': {}", key, e),
            }),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;

        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Storage {
                message: format!("Failed to delete '{}': {}", key, e),
            }),
        }
    }

    async fn signed_url(&self, key: &str, _ttl: Duration) -> Result<String> {
        let path = self.path_for(key)?;

        if !path.exists() {
            return Err(AppError::ObjectMissing { key: key.to_string() });
        }

        Ok(format!("file://{}", path.display()))
    }
}

/// Select the blob store backend from configuration
pub fn blob_store_from_config(config: &StorageConfig) -> Arc<dyn BlobStore> {
    if config.s3_configured() {
        info!("Initializing S3-compatible blob store");
        Arc::new(S3BlobStore::new(
            config.s3_endpoint.as_deref().unwrap(),
            config.bucket.as_deref().unwrap(),
            config.access_key_id.as_deref().unwrap(),
            config.secret_access_key.as_deref().unwrap(),
        ))
    } else {
        info!(data_dir = %config.data_dir, "S3 credentials missing, using local blob store");
        Arc::new(LocalBlobStore::new(config.data_dir.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_store_round_trip() {
        let dir = std::env::temp_dir().join(format!("graphvault-test-{}", uuid::Uuid::new_v4()));
        let store = LocalBlobStore::new(&dir);

        store
            .put("uploads/doc.pdf", b"pdf bytes".to_vec())
            .await
            .unwrap();
        let bytes = store.get("uploads/doc.pdf").await.unwrap();
        assert_eq!(bytes, b"pdf bytes");

        let url = store
            .signed_url("uploads/doc.pdf", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(url.starts_with("file://"));

        store.delete("uploads/doc.pdf").await.unwrap();
        let missing = store.get("uploads/doc.pdf").await;
        assert!(matches!(missing, Err(AppError::ObjectMissing { .. })));

        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn test_local_store_rejects_traversal() {
        let store = LocalBlobStore::new("data");
        let err = store.get("../etc/passwd").await;
        assert!(matches!(err, Err(AppError::Validation { .. })));
    }
}
