//! Ingestion orchestration (API side)
//!
//! Upload to blob storage -> create the job record -> publish the task to
//! the queue. Without an external queue the same processors run on a
//! background task in this process; the worker code path is identical.

use crate::AppState;
use graphvault_common::errors::{AppError, Result};
use graphvault_common::jobs::JobMetadata;
use graphvault_common::queue::{TaskAction, TaskPayload};
use graphvault_export::{ExportProcessor, ExportStep};
use graphvault_ingestion::IngestionProcessor;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

/// Response for ingestion kickoff and retry
#[derive(Debug, Serialize)]
pub struct IngestionTicket {
    pub status: String,
    pub job_id: String,
    pub msg_id: String,
    pub filename: String,
}

pub struct Orchestrator<'a> {
    state: &'a AppState,
}

impl<'a> Orchestrator<'a> {
    pub fn new(state: &'a AppState) -> Self {
        Self { state }
    }

    /// Initialize ingestion for a new file: store bytes, create the job,
    /// dispatch the task.
    pub async fn init_ingestion(
        &self,
        filename: String,
        content: Vec<u8>,
        project_id: Uuid,
        user_id: Option<String>,
        gemini_key: Option<String>,
        openai_key: Option<String>,
    ) -> Result<IngestionTicket> {
        let file_id = Uuid::new_v4();
        let ext = std::path::Path::new(&filename)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let blob_key = format!("uploads/{}{}", file_id, ext);

        info!(filename = %filename, key = %blob_key, "Uploading to blob storage");
        self.state.storage.put(&blob_key, content).await?;

        let job_id = Uuid::new_v4().to_string();
        let metadata = JobMetadata {
            filename: Some(filename.clone()),
            file_id: Some(file_id.to_string()),
            blob_key: Some(blob_key.clone()),
            project_id: Some(project_id.to_string()),
            user_id: user_id.clone(),
            gemini_key: gemini_key.clone(),
            openai_key: openai_key.clone(),
            ..Default::default()
        };

        self.state.jobs.create(&job_id, "ingest_pdf", metadata).await?;

        let msg_id = self
            .dispatch_ingest(&job_id, &blob_key, user_id, gemini_key, openai_key)
            .await?;

        Ok(IngestionTicket {
            status: "queued".to_string(),
            job_id,
            msg_id,
            filename,
        })
    }

    /// Re-trigger ingestion for an existing job: refresh keys, reset the
    /// job record, re-publish.
    pub async fn retry_ingestion(
        &self,
        job_id: &str,
        user_id: Option<String>,
        gemini_key: Option<String>,
        openai_key: Option<String>,
    ) -> Result<IngestionTicket> {
        let job = self
            .state
            .jobs
            .get(job_id)
            .await?
            .ok_or_else(|| AppError::JobNotFound {
                id: job_id.to_string(),
            })?;

        let mut metadata = job.metadata;
        let blob_key = metadata.blob_key.clone().ok_or_else(|| AppError::Validation {
            message: format!("missing blob_key in job {} metadata", job_id),
        })?;
        let filename = metadata
            .filename
            .clone()
            .unwrap_or_else(|| "unknown.pdf".to_string());

        // fresher keys replace stale ones
        if user_id.is_some() {
            metadata.user_id = user_id.clone();
        }
        if gemini_key.is_some() {
            metadata.gemini_key = gemini_key.clone();
        }
        if openai_key.is_some() {
            metadata.openai_key = openai_key.clone();
        }

        // re-creating the record resets status to pending at 0%
        self.state.jobs.create(job_id, "ingest_pdf", metadata).await?;

        let msg_id = self
            .dispatch_ingest(job_id, &blob_key, user_id, gemini_key, openai_key)
            .await?;

        Ok(IngestionTicket {
            status: "re-queued".to_string(),
            job_id: job_id.to_string(),
            msg_id,
            filename,
        })
    }

    /// Publish an export task, or drive the batches locally until done.
    pub async fn trigger_export(
        &self,
        project_id: Uuid,
        user_id: Option<String>,
        gemini_key: String,
        openai_key: Option<String>,
    ) -> Result<String> {
        if let (Some(queue), Some(worker_url)) = (
            self.state.queue.as_ref(),
            self.state.config.task_queue.worker_url.as_ref(),
        ) {
            let payload = TaskPayload {
                job_id: None,
                file_key: None,
                action: TaskAction::PrepareExport,
                project_id: Some(project_id),
                user_id,
                gemini_key: Some(gemini_key),
                openai_key,
            };
            return queue.publish(worker_url, &payload).await;
        }

        warn!("No external queue configured, driving export batches locally");

        let processor = ExportProcessor::new(
            project_id,
            user_id,
            gemini_key,
            openai_key,
            self.state.repo.clone(),
            self.state.storage.clone(),
            None,
            None,
            self.state.config.llm.model.clone(),
            self.state.config.llm.cache_ttl_secs,
        );

        tokio::spawn(async move {
            // each call is one bounded batch; loop until assembly or failure
            loop {
                match processor.process().await {
                    ExportStep::BatchPartial { .. } => continue,
                    ExportStep::AssemblyCompleted | ExportStep::Failed { .. } => break,
                }
            }
        });

        Ok("local_only".to_string())
    }

    async fn dispatch_ingest(
        &self,
        job_id: &str,
        blob_key: &str,
        user_id: Option<String>,
        gemini_key: Option<String>,
        openai_key: Option<String>,
    ) -> Result<String> {
        if let (Some(queue), Some(worker_url)) = (
            self.state.queue.as_ref(),
            self.state.config.task_queue.worker_url.as_ref(),
        ) {
            let payload = TaskPayload {
                job_id: Some(job_id.to_string()),
                file_key: Some(blob_key.to_string()),
                action: TaskAction::Ingest,
                project_id: None,
                user_id,
                gemini_key,
                openai_key,
            };
            return queue.publish(worker_url, &payload).await;
        }

        warn!("No external queue configured, running ingestion on a background task");

        let processor = IngestionProcessor::new(
            job_id.to_string(),
            blob_key.to_string(),
            gemini_key,
            openai_key,
            user_id,
            self.state.repo.clone(),
            self.state.storage.clone(),
            self.state.jobs.clone(),
            self.state.config.llm.model.clone(),
            self.state.config.llm.cache_ttl_secs,
        );

        tokio::spawn(async move {
            // terminal bookkeeping happens inside the processor
            let _ = processor.process().await;
        });

        Ok("local_only".to_string())
    }
}
