//! Document-scoped LLM context caches
//!
//! Uploads a full document once and reuses the server-side cache handle
//! across the ingestion and export phases of one project. The handle is
//! persisted in `project_metadata.gemini_cache_name` and deleted
//! explicitly after export assembly. Creation failures are soft: callers
//! fall back to the non-cached path.

use crate::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Serialize)]
struct CreateCacheRequest {
    model: String,
    contents: Vec<CacheContent>,
    ttl: String,
    #[serde(rename = "displayName")]
    display_name: String,
}

#[derive(Serialize)]
struct CacheContent {
    parts: Vec<CachePart>,
}

#[derive(Serialize)]
struct CachePart {
    text: String,
}

/// Cache metadata as returned by the provider
#[derive(Debug, Clone, Deserialize)]
pub struct CacheInfo {
    pub name: String,
    #[serde(rename = "displayName", default)]
    pub display_name: Option<String>,
    #[serde(rename = "expireTime", default)]
    pub expire_time: Option<String>,
}

/// Manages provider-side context caches for single documents
pub struct CacheService {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl CacheService {
    pub fn new(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(AppError::Configuration {
                message: "gemini key is required for CacheService. Strict BYOK is enabled."
                    .to_string(),
            });
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("Failed to create HTTP client");

        Ok(Self {
            http,
            api_key,
            model,
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
        })
    }

    /// Upload document text and return the opaque cache handle.
    /// Returns `None` on failure so the pipeline can continue uncached.
    pub async fn create(
        &self,
        document_text: &str,
        project_id: &str,
        ttl_seconds: u64,
    ) -> Option<String> {
        info!(
            project_id = %project_id,
            chars = document_text.len(),
            "Creating context cache"
        );

        let url = format!("{}/cachedContents?key={}", self.base_url, self.api_key);
        let body = CreateCacheRequest {
            model: format!("models/{}", self.model),
            contents: vec![CacheContent {
                parts: vec![CachePart {
                    text: document_text.to_string(),
                }],
            }],
            ttl: format!("{}s", ttl_seconds),
            display_name: format!("project_{}_cache", project_id),
        };

        let response = match self.http.post(&url).json(&body).send().await {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, "Failed to create context cache");
                return None;
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            error!(status = %status, body = %text, "Failed to create context cache");
            return None;
        }

        match response.json::<CacheInfo>().await {
            Ok(info) => {
                tracing::info!(cache = %info.name, "Created context cache");
                Some(info.name)
            }
            Err(e) => {
                error!(error = %e, "Failed to parse cache creation response");
                None
            }
        }
    }

    /// Verify a handle still exists and is not expired
    pub async fn get(&self, handle: &str) -> Option<CacheInfo> {
        let url = format!("{}/{}?key={}", self.base_url, handle, self.api_key);

        match self.http.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                response.json::<CacheInfo>().await.ok()
            }
            Ok(response) => {
                warn!(cache = %handle, status = %response.status(), "Cache not found or expired");
                None
            }
            Err(e) => {
                warn!(cache = %handle, error = %e, "Cache lookup failed");
                None
            }
        }
    }

    /// Explicitly delete a cache to save costs. Best-effort.
    pub async fn delete(&self, handle: &str) {
        let url = format!("{}/{}?key={}", self.base_url, handle, self.api_key);

        match self.http.delete(&url).send().await {
            Ok(response) if response.status().is_success() => {
                info!(cache = %handle, "Deleted context cache");
            }
            Ok(response) => {
                error!(cache = %handle, status = %response.status(), "Failed to delete cache");
            }
            Err(e) => {
                error!(cache = %handle, error = %e, "Failed to delete cache");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_key() {
        assert!(CacheService::new(String::new(), "gemini-2.0-flash".into()).is_err());
        assert!(CacheService::new("key".into(), "gemini-2.0-flash".into()).is_ok());
    }
}
