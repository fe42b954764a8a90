//! Task queue integration for async job processing
//!
//! Fire-and-forget publish of a JSON payload to a worker URL with
//! provider-side retries. When the queue is not configured the factory
//! yields `None` and callers schedule the identical worker code path on a
//! background task in the current process.

use crate::config::TaskQueueConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Worker task payload delivered by the queue provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_key: Option<String>,
    pub action: TaskAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gemini_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskAction {
    Ingest,
    PrepareExport,
}

/// Fire-and-forget publisher to a worker URL
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Publish a JSON payload; returns the provider message id
    async fn publish(&self, dest_url: &str, payload: &TaskPayload) -> Result<String>;
}

#[derive(Deserialize)]
struct PublishReply {
    #[serde(rename = "messageId")]
    message_id: String,
}

/// QStash-style HTTPS queue: POST `{base}/v2/publish/{dest_url}` with a
/// bearer token; the provider delivers the body to the worker and retries
/// on non-2xx responses.
pub struct QstashQueue {
    http: reqwest::Client,
    base_url: String,
    token: String,
    retries: u32,
}

impl QstashQueue {
    pub fn new(base_url: String, token: String, retries: u32) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            retries,
        }
    }
}

#[async_trait]
impl TaskQueue for QstashQueue {
    async fn publish(&self, dest_url: &str, payload: &TaskPayload) -> Result<String> {
        let url = format!("{}/v2/publish/{}", self.base_url, dest_url);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .header("Upstash-Retries", self.retries.to_string())
            .json(payload)
            .send()
            .await
            .map_err(|e| AppError::Queue {
                message: format!("Publish request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Queue {
                message: format!("Publish failed {}: {}", status, body),
            });
        }

        let reply: PublishReply = response.json().await.map_err(|e| AppError::Queue {
            message: format!("Failed to parse publish response: {}", e),
        })?;

        debug!(message_id = %reply.message_id, dest = %dest_url, "Task published");
        Ok(reply.message_id)
    }
}

/// Select the queue backend from configuration. `None` means callers must
/// run the worker path inline on a background task.
pub fn task_queue_from_config(config: &TaskQueueConfig) -> Option<Arc<dyn TaskQueue>> {
    if config.token.is_some() {
        info!("Initializing external task queue");
        Some(Arc::new(QstashQueue::new(
            config.url.clone(),
            config.token.clone().unwrap(),
            config.retries,
        )))
    } else {
        info!("Queue token missing, running without external queue");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_serialization() {
        let payload = TaskPayload {
            job_id: Some("job-1".into()),
            file_key: Some("uploads/a.pdf".into()),
            action: TaskAction::Ingest,
            project_id: None,
            user_id: None,
            gemini_key: Some("key".into()),
            openai_key: None,
        };

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["action"], "ingest");
        // unset optionals stay off the wire
        assert!(json.get("project_id").is_none());

        let parsed: TaskPayload = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.action, TaskAction::Ingest);
        assert_eq!(parsed.job_id.as_deref(), Some("job-1"));
    }

    #[test]
    fn test_export_action_wire_name() {
        let json = serde_json::to_string(&TaskAction::PrepareExport).unwrap();
        assert_eq!(json, "\"prepare_export\"");
    }
}
