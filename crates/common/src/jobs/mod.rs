//! Job state store
//!
//! Manages async job state as one hash per job under `jobs:{id}`, with a
//! sibling string value at `jobs:{id}:cache` holding the serialized result
//! of the expensive extraction stage so queue-driven retries do not re-pay
//! that cost. All records expire after 24 hours.
//!
//! Two backends:
//! - `RestJobStore` against an Upstash-style REST key-value API
//! - `MemoryJobStore` holding process-wide state for local development
//!
//! Selection is driven by the presence of REST credentials.

use crate::config::JobStoreConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// Job lifecycle status. Transitions are monotone:
/// pending -> processing -> {completed|failed}
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl From<&str> for JobStatus {
    fn from(s: &str) -> Self {
        match s {
            "processing" => JobStatus::Processing,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            _ => JobStatus::Pending,
        }
    }
}

impl From<JobStatus> for String {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Pending => "pending".to_string(),
            JobStatus::Processing => "processing".to_string(),
            JobStatus::Completed => "completed".to_string(),
            JobStatus::Failed => "failed".to_string(),
        }
    }
}

/// Typed view over job metadata. Unknown keys survive via `extra`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct JobMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gemini_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai_key: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A job record as read back from the store
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: String,
    pub status: JobStatus,
    pub progress: i64,
    pub created_at: i64,
    pub updated_at: i64,
    pub metadata: JobMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn job_key(job_id: &str) -> String {
    format!("jobs:{}", job_id)
}

fn cache_key(job_id: &str) -> String {
    format!("jobs:{}:cache", job_id)
}

fn job_from_fields(fields: &HashMap<String, String>) -> Option<Job> {
    let id = fields.get("id")?.clone();

    let metadata = fields
        .get("metadata")
        .and_then(|m| serde_json::from_str(m).ok())
        .unwrap_or_default();

    let result = fields
        .get("result")
        .and_then(|r| serde_json::from_str(r).ok());

    Some(Job {
        id,
        job_type: fields.get("type").cloned().unwrap_or_default(),
        status: JobStatus::from(fields.get("status").map(String::as_str).unwrap_or("pending")),
        progress: fields
            .get("progress")
            .and_then(|p| p.parse().ok())
            .unwrap_or(0),
        created_at: fields
            .get("created_at")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        updated_at: fields
            .get("updated_at")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        metadata,
        result,
    })
}

/// Keyed job state with TTL and a separate per-job extraction cache
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Initialize a new job in `pending` at 0%
    async fn create(&self, job_id: &str, job_type: &str, metadata: JobMetadata) -> Result<Job>;

    /// Update status and optionally progress; `details` is merged into
    /// `result` only when the status is terminal. Progress never regresses.
    async fn update_progress(
        &self,
        job_id: &str,
        status: JobStatus,
        progress: Option<i64>,
        details: Option<serde_json::Value>,
    ) -> Result<()>;

    /// Merge a patch into the stored metadata
    async fn update_metadata(
        &self,
        job_id: &str,
        patch: serde_json::Map<String, serde_json::Value>,
    ) -> Result<()>;

    /// Fetch a job record
    async fn get(&self, job_id: &str) -> Result<Option<Job>>;

    /// Persist the expensive extraction stage output for retries
    async fn set_extraction_cache(&self, job_id: &str, data: &serde_json::Value) -> Result<()>;

    /// Retrieve the cached extraction output if present
    async fn get_extraction_cache(&self, job_id: &str) -> Result<Option<serde_json::Value>>;
}

// ============================================================================
// REST backend
// ============================================================================

#[derive(Deserialize)]
struct RestReply {
    result: serde_json::Value,
}

/// Job store over an Upstash-style REST key-value API: each request POSTs a
/// single command as a JSON array with a bearer token.
pub struct RestJobStore {
    http: reqwest::Client,
    base_url: String,
    token: String,
    ttl_secs: u64,
}

impl RestJobStore {
    pub fn new(base_url: String, token: String, ttl_secs: u64) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            ttl_secs,
        }
    }

    async fn command(&self, cmd: Vec<serde_json::Value>) -> Result<serde_json::Value> {
        let response = self
            .http
            .post(&self.base_url)
            .bearer_auth(&self.token)
            .json(&cmd)
            .send()
            .await
            .map_err(|e| AppError::JobStore {
                message: format!("Request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::JobStore {
                message: format!("API error {}: {}", status, body),
            });
        }

        let reply: RestReply = response.json().await.map_err(|e| AppError::JobStore {
            message: format!("Failed to parse response: {}", e),
        })?;

        Ok(reply.result)
    }

    async fn hset(&self, key: &str, fields: &[(&str, String)]) -> Result<()> {
        let mut cmd: Vec<serde_json::Value> = vec!["HSET".into(), key.into()];
        for (field, value) in fields {
            cmd.push((*field).into());
            cmd.push(value.clone().into());
        }
        self.command(cmd).await?;
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let result = self
            .command(vec!["HGETALL".into(), key.into()])
            .await?;

        // flat array of alternating field/value strings
        let mut fields = HashMap::new();
        if let serde_json::Value::Array(items) = result {
            let mut iter = items.into_iter();
            while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
                if let (Some(f), Some(v)) = (field.as_str(), value.as_str()) {
                    fields.insert(f.to_string(), v.to_string());
                }
            }
        }
        Ok(fields)
    }

    async fn expire(&self, key: &str) -> Result<()> {
        self.command(vec![
            "EXPIRE".into(),
            key.into(),
            self.ttl_secs.to_string().into(),
        ])
        .await?;
        Ok(())
    }
}

#[async_trait]
impl JobStore for RestJobStore {
    async fn create(&self, job_id: &str, job_type: &str, metadata: JobMetadata) -> Result<Job> {
        let now = now_epoch();
        let metadata_json = serde_json::to_string(&metadata)?;
        let key = job_key(job_id);

        self.hset(
            &key,
            &[
                ("id", job_id.to_string()),
                ("type", job_type.to_string()),
                ("status", String::from(JobStatus::Pending)),
                ("progress", "0".to_string()),
                ("created_at", now.to_string()),
                ("updated_at", now.to_string()),
                ("metadata", metadata_json),
            ],
        )
        .await?;
        self.expire(&key).await?;

        Ok(Job {
            id: job_id.to_string(),
            job_type: job_type.to_string(),
            status: JobStatus::Pending,
            progress: 0,
            created_at: now,
            updated_at: now,
            metadata,
            result: None,
        })
    }

    async fn update_progress(
        &self,
        job_id: &str,
        status: JobStatus,
        progress: Option<i64>,
        details: Option<serde_json::Value>,
    ) -> Result<()> {
        let key = job_key(job_id);

        let mut fields = vec![
            ("status", String::from(status)),
            ("updated_at", now_epoch().to_string()),
        ];

        if let Some(p) = progress {
            // read-back keeps progress monotone; late writers lose
            let current = self
                .command(vec!["HGET".into(), key.clone().into(), "progress".into()])
                .await?
                .as_str()
                .and_then(|s| s.parse::<i64>().ok())
                .unwrap_or(0);
            fields.push(("progress", p.max(current).to_string()));
        }

        let details_json;
        if let Some(d) = details {
            if status.is_terminal() {
                details_json = serde_json::to_string(&d)?;
                fields.push(("result", details_json));
            }
        }

        self.hset(&key, &fields).await?;
        Ok(())
    }

    async fn update_metadata(
        &self,
        job_id: &str,
        patch: serde_json::Map<String, serde_json::Value>,
    ) -> Result<()> {
        let Some(job) = self.get(job_id).await? else {
            return Ok(());
        };

        let mut metadata = serde_json::to_value(&job.metadata)?;
        if let Some(obj) = metadata.as_object_mut() {
            for (k, v) in patch {
                obj.insert(k, v);
            }
        }

        self.hset(
            &job_key(job_id),
            &[
                ("metadata", serde_json::to_string(&metadata)?),
                ("updated_at", now_epoch().to_string()),
            ],
        )
        .await?;
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>> {
        let fields = self.hgetall(&job_key(job_id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(job_from_fields(&fields))
    }

    async fn set_extraction_cache(&self, job_id: &str, data: &serde_json::Value) -> Result<()> {
        self.command(vec![
            "SET".into(),
            cache_key(job_id).into(),
            serde_json::to_string(data)?.into(),
            "EX".into(),
            self.ttl_secs.to_string().into(),
        ])
        .await?;

        info!(job_id = %job_id, "Cached extraction results");
        Ok(())
    }

    async fn get_extraction_cache(&self, job_id: &str) -> Result<Option<serde_json::Value>> {
        let result = self
            .command(vec!["GET".into(), cache_key(job_id).into()])
            .await?;

        match result.as_str() {
            Some(raw) => {
                info!(job_id = %job_id, "Found cached extraction results");
                Ok(Some(serde_json::from_str(raw)?))
            }
            None => Ok(None),
        }
    }
}

// ============================================================================
// In-process backend
// ============================================================================

type SharedMap = Mutex<HashMap<String, HashMap<String, String>>>;

// process-wide so state persists across requests in the same process
fn mem_jobs() -> &'static SharedMap {
    static STORE: OnceLock<SharedMap> = OnceLock::new();
    STORE.get_or_init(|| Mutex::new(HashMap::new()))
}

fn mem_caches() -> &'static Mutex<HashMap<String, String>> {
    static STORE: OnceLock<Mutex<HashMap<String, String>>> = OnceLock::new();
    STORE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// In-memory job store for local development
pub struct MemoryJobStore;

impl MemoryJobStore {
    pub fn new() -> Self {
        Self
    }

    /// Drop all state (tests)
    pub fn clear() {
        mem_jobs().lock().unwrap().clear();
        mem_caches().lock().unwrap().clear();
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job_id: &str, job_type: &str, metadata: JobMetadata) -> Result<Job> {
        let now = now_epoch();
        let metadata_json = serde_json::to_string(&metadata)?;

        let mut fields = HashMap::new();
        fields.insert("id".to_string(), job_id.to_string());
        fields.insert("type".to_string(), job_type.to_string());
        fields.insert("status".to_string(), String::from(JobStatus::Pending));
        fields.insert("progress".to_string(), "0".to_string());
        fields.insert("created_at".to_string(), now.to_string());
        fields.insert("updated_at".to_string(), now.to_string());
        fields.insert("metadata".to_string(), metadata_json);

        mem_jobs()
            .lock()
            .unwrap()
            .insert(job_key(job_id), fields.clone());

        Ok(job_from_fields(&fields).expect("freshly created job parses"))
    }

    async fn update_progress(
        &self,
        job_id: &str,
        status: JobStatus,
        progress: Option<i64>,
        details: Option<serde_json::Value>,
    ) -> Result<()> {
        let mut store = mem_jobs().lock().unwrap();
        let Some(fields) = store.get_mut(&job_key(job_id)) else {
            return Ok(());
        };

        fields.insert("status".to_string(), String::from(status));
        fields.insert("updated_at".to_string(), now_epoch().to_string());

        if let Some(p) = progress {
            let current = fields
                .get("progress")
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(0);
            fields.insert("progress".to_string(), p.max(current).to_string());
        }

        if let Some(d) = details {
            if status.is_terminal() {
                fields.insert("result".to_string(), serde_json::to_string(&d)?);
            }
        }

        Ok(())
    }

    async fn update_metadata(
        &self,
        job_id: &str,
        patch: serde_json::Map<String, serde_json::Value>,
    ) -> Result<()> {
        let mut store = mem_jobs().lock().unwrap();
        let Some(fields) = store.get_mut(&job_key(job_id)) else {
            return Ok(());
        };

        let mut metadata: serde_json::Value = fields
            .get("metadata")
            .and_then(|m| serde_json::from_str(m).ok())
            .unwrap_or_else(|| serde_json::json!({}));

        if let Some(obj) = metadata.as_object_mut() {
            for (k, v) in patch {
                obj.insert(k, v);
            }
        }

        fields.insert("metadata".to_string(), serde_json::to_string(&metadata)?);
        fields.insert("updated_at".to_string(), now_epoch().to_string());
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>> {
        let store = mem_jobs().lock().unwrap();
        Ok(store.get(&job_key(job_id)).and_then(job_from_fields))
    }

    async fn set_extraction_cache(&self, job_id: &str, data: &serde_json::Value) -> Result<()> {
        mem_caches()
            .lock()
            .unwrap()
            .insert(cache_key(job_id), serde_json::to_string(data)?);
        debug!(job_id = %job_id, "Cached extraction results in memory");
        Ok(())
    }

    async fn get_extraction_cache(&self, job_id: &str) -> Result<Option<serde_json::Value>> {
        let caches = mem_caches().lock().unwrap();
        match caches.get(&cache_key(job_id)) {
            Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
            None => Ok(None),
        }
    }
}

/// Select the job store backend from configuration
pub fn job_store_from_config(config: &JobStoreConfig) -> std::sync::Arc<dyn JobStore> {
    if config.rest_configured() {
        info!("Initializing REST job store");
        std::sync::Arc::new(RestJobStore::new(
            config.rest_url.clone().unwrap(),
            config.rest_token.clone().unwrap(),
            config.ttl_secs,
        ))
    } else {
        info!("REST credentials missing, falling back to in-memory job store");
        std::sync::Arc::new(MemoryJobStore::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryJobStore::new();
        let job_id = uuid::Uuid::new_v4().to_string();

        let metadata = JobMetadata {
            filename: Some("notes.pdf".into()),
            blob_key: Some("uploads/abc.pdf".into()),
            project_id: Some("p1".into()),
            gemini_key: Some("gk".into()),
            ..Default::default()
        };

        store.create(&job_id, "ingest_pdf", metadata).await.unwrap();

        let job = store.get(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        assert_eq!(job.metadata.filename.as_deref(), Some("notes.pdf"));
    }

    #[tokio::test]
    async fn test_progress_is_monotone() {
        let store = MemoryJobStore::new();
        let job_id = uuid::Uuid::new_v4().to_string();
        store
            .create(&job_id, "ingest_pdf", JobMetadata::default())
            .await
            .unwrap();

        for p in [10, 40, 20, 60, 5] {
            store
                .update_progress(&job_id, JobStatus::Processing, Some(p), None)
                .await
                .unwrap();
        }

        let job = store.get(&job_id).await.unwrap().unwrap();
        // read-back equals the max progress written
        assert_eq!(job.progress, 60);
    }

    #[tokio::test]
    async fn test_details_merged_only_on_terminal_status() {
        let store = MemoryJobStore::new();
        let job_id = uuid::Uuid::new_v4().to_string();
        store
            .create(&job_id, "ingest_pdf", JobMetadata::default())
            .await
            .unwrap();

        store
            .update_progress(
                &job_id,
                JobStatus::Processing,
                Some(50),
                Some(serde_json::json!({"partial": true})),
            )
            .await
            .unwrap();
        assert!(store.get(&job_id).await.unwrap().unwrap().result.is_none());

        store
            .update_progress(
                &job_id,
                JobStatus::Completed,
                Some(100),
                Some(serde_json::json!({"chunks_count": 7})),
            )
            .await
            .unwrap();

        let job = store.get(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result.unwrap()["chunks_count"], 7);
    }

    #[tokio::test]
    async fn test_extraction_cache() {
        let store = MemoryJobStore::new();
        let job_id = uuid::Uuid::new_v4().to_string();

        assert!(store.get_extraction_cache(&job_id).await.unwrap().is_none());

        let fragments = serde_json::json!([{"nodes": [{"id": "intro"}]}]);
        store
            .set_extraction_cache(&job_id, &fragments)
            .await
            .unwrap();

        let cached = store.get_extraction_cache(&job_id).await.unwrap().unwrap();
        assert_eq!(cached, fragments);
    }

    #[tokio::test]
    async fn test_metadata_patch() {
        let store = MemoryJobStore::new();
        let job_id = uuid::Uuid::new_v4().to_string();
        store
            .create(&job_id, "ingest_pdf", JobMetadata::default())
            .await
            .unwrap();

        let mut patch = serde_json::Map::new();
        patch.insert("gemini_key".to_string(), "fresh".into());
        store.update_metadata(&job_id, patch).await.unwrap();

        let job = store.get(&job_id).await.unwrap().unwrap();
        assert_eq!(job.metadata.gemini_key.as_deref(), Some("fresh"));
    }
}
