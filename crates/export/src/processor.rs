//! Export processor
//!
//! Batch content generation and vault assembly, bounded per invocation to
//! fit worker time limits. Each run generates notes for up to ten nodes
//! that still lack content, then re-publishes itself until none remain;
//! the final run assembles the vault zip and uploads it.

use crate::note::NoteService;
use crate::vault::assemble_vault;
use graphvault_common::db::models::{ExportState, ExportStatus};
use graphvault_common::db::Repository;
use graphvault_common::embeddings::embedder_from_keys;
use graphvault_common::errors::{AppError, Result};
use graphvault_common::llm::{CacheService, GeminiClient};
use graphvault_common::metrics::record_export_outcome;
use graphvault_common::queue::{TaskAction, TaskPayload, TaskQueue};
use graphvault_common::storage::BlobStore;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Nodes processed per invocation; keeps one run inside the host timeout
const BATCH_SIZE: u64 = 10;

/// What one invocation accomplished
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportStep {
    /// A batch was generated and more nodes remain; the task was
    /// re-published (or the caller drives the next round locally)
    BatchPartial { nodes_processed: usize },
    /// All notes existed; the vault was assembled and uploaded
    AssemblyCompleted,
    /// The invocation failed; `project_metadata.export` records the error
    Failed { error: String },
}

#[derive(Clone)]
pub struct ExportProcessor {
    project_id: Uuid,
    user_id: Option<String>,
    gemini_key: String,
    openai_key: Option<String>,
    repo: Repository,
    storage: Arc<dyn BlobStore>,
    queue: Option<Arc<dyn TaskQueue>>,
    worker_url: Option<String>,
    llm_model: String,
    cache_ttl_secs: u64,
}

impl ExportProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        project_id: Uuid,
        user_id: Option<String>,
        gemini_key: String,
        openai_key: Option<String>,
        repo: Repository,
        storage: Arc<dyn BlobStore>,
        queue: Option<Arc<dyn TaskQueue>>,
        worker_url: Option<String>,
        llm_model: String,
        cache_ttl_secs: u64,
    ) -> Self {
        Self {
            project_id,
            user_id,
            gemini_key,
            openai_key,
            repo,
            storage,
            queue,
            worker_url,
            llm_model,
            cache_ttl_secs,
        }
    }

    /// Run one bounded invocation. Failures are recorded in
    /// `project_metadata.export` and reported as `ExportStep::Failed`.
    #[instrument(skip(self), fields(project_id = %self.project_id))]
    pub async fn process(&self) -> ExportStep {
        match self.run().await {
            Ok(step) => {
                record_export_outcome(match step {
                    ExportStep::BatchPartial { .. } => "batch_partial",
                    ExportStep::AssemblyCompleted => "assembly_completed",
                    ExportStep::Failed { .. } => "failed",
                });
                step
            }
            Err(e) => {
                error!(error = %e, "Export processing failed");
                record_export_outcome("failed");

                let message = e.to_string();
                let error_for_meta = message.clone();
                if let Err(meta_err) = self
                    .repo
                    .update_project_metadata(self.project_id, move |meta| {
                        let export = meta.export.get_or_insert(ExportState {
                            status: ExportStatus::Failed,
                            progress: 0,
                            message: None,
                            download_url: None,
                            error: None,
                        });
                        export.status = ExportStatus::Failed;
                        export.error = Some(error_for_meta);
                    })
                    .await
                {
                    error!(error = %meta_err, "Failed to record export failure");
                }

                ExportStep::Failed { error: message }
            }
        }
    }

    async fn run(&self) -> Result<ExportStep> {
        let project = self
            .repo
            .find_project_by_id(self.project_id)
            .await?
            .ok_or_else(|| AppError::ProjectNotFound {
                id: self.project_id.to_string(),
            })?;

        // cache lifecycle: verify the stored handle, recreate from the
        // stored document when expired
        let cache_service = CacheService::new(self.gemini_key.clone(), self.llm_model.clone())?;
        let mut cache_name = project.metadata().gemini_cache_name;

        if let Some(ref name) = cache_name {
            if cache_service.get(name).await.is_none() {
                warn!(cache = %name, "Cache expired, recreating");
                cache_name = None;
            }
        }

        if cache_name.is_none() {
            if let Some(file) = self.repo.first_file_for_project(self.project_id).await? {
                if !file.content.is_empty() {
                    cache_name = cache_service
                        .create(&file.content, &self.project_id.to_string(), self.cache_ttl_secs)
                        .await;

                    if let Some(ref name) = cache_name {
                        let name = name.clone();
                        self.repo
                            .update_project_metadata(self.project_id, move |meta| {
                                meta.gemini_cache_name = Some(name);
                            })
                            .await?;
                    }
                }
            }
        }

        // nodes still missing content, bounded per invocation
        let missing = self
            .repo
            .missing_content_nodes(self.project_id, BATCH_SIZE)
            .await?;

        if !missing.is_empty() {
            let processed = missing.len();
            self.process_batch(&missing, cache_name.as_deref()).await?;
            self.enqueue_next_step().await;
            return Ok(ExportStep::BatchPartial {
                nodes_processed: processed,
            });
        }

        // all notes generated; assemble and upload the vault
        info!("All notes generated, moving to assembly");
        self.assemble_and_upload(cache_name, &cache_service).await?;
        Ok(ExportStep::AssemblyCompleted)
    }

    async fn process_batch(
        &self,
        nodes: &[graphvault_common::db::models::GraphNode],
        cache_name: Option<&str>,
    ) -> Result<()> {
        let total_missing = self.repo.count_missing_content(self.project_id).await?;
        let total_nodes = self.repo.count_nodes(self.project_id).await?;
        let progress = export_progress(total_nodes, total_missing);

        info!(
            progress,
            done = total_nodes - total_missing,
            total = total_nodes,
            "Export progress"
        );

        let message = format!(
            "generating notes: {}/{}",
            total_nodes - total_missing,
            total_nodes
        );
        self.repo
            .update_project_metadata(self.project_id, move |meta| {
                meta.export = Some(ExportState {
                    status: ExportStatus::Generating,
                    progress,
                    message: Some(message),
                    download_url: None,
                    error: None,
                });
            })
            .await?;

        let embedder = embedder_from_keys(Some(&self.gemini_key), self.openai_key.as_deref())?;
        let generator = Arc::new(GeminiClient::with_model(
            self.gemini_key.clone(),
            self.llm_model.clone(),
        ));
        let note_service = NoteService::new(generator, embedder, self.repo.clone());

        // generate the batch concurrently; a failed node stays missing and
        // is retried by a later invocation
        let tasks = nodes.iter().map(|node| {
            let service = &note_service;
            async move {
                let result = service
                    .generate(
                        self.project_id,
                        &node.concept_id,
                        &node.outbound_links,
                        cache_name,
                    )
                    .await;
                (node, result)
            }
        });

        for (node, result) in join_all(tasks).await {
            match result {
                Ok(content) => {
                    self.repo.set_node_content(node.id, content).await?;
                    info!(concept = %node.concept_id, "Generated note");
                }
                Err(e) => {
                    error!(concept = %node.concept_id, error = %e, "Failed to generate note");
                }
            }
        }

        Ok(())
    }

    /// Re-publish the same export task; without an external queue the
    /// caller is responsible for driving the next round.
    async fn enqueue_next_step(&self) {
        let (Some(queue), Some(worker_url)) = (self.queue.as_ref(), self.worker_url.as_ref())
        else {
            info!("No external queue configured, caller drives the next export batch");
            return;
        };

        let payload = TaskPayload {
            job_id: None,
            file_key: None,
            action: TaskAction::PrepareExport,
            project_id: Some(self.project_id),
            user_id: self.user_id.clone(),
            gemini_key: Some(self.gemini_key.clone()),
            openai_key: self.openai_key.clone(),
        };

        match queue.publish(worker_url, &payload).await {
            Ok(msg_id) => info!(msg_id = %msg_id, "Re-published export task"),
            Err(e) => error!(error = %e, "Failed to re-publish export task"),
        }
    }

    async fn assemble_and_upload(
        &self,
        cache_name: Option<String>,
        cache_service: &CacheService,
    ) -> Result<()> {
        let nodes = self.repo.nodes_for_project(self.project_id).await?;
        let zip_bytes = assemble_vault(&nodes)?;

        let zip_key = format!("exports/{}.zip", self.project_id);
        self.storage.put(&zip_key, zip_bytes).await?;

        let download_key = zip_key.clone();
        self.repo
            .update_project_metadata(self.project_id, move |meta| {
                meta.export = Some(ExportState {
                    status: ExportStatus::Complete,
                    progress: 100,
                    message: Some("vault assembly complete.".to_string()),
                    download_url: Some(download_key),
                    error: None,
                });
            })
            .await?;

        info!(key = %zip_key, nodes = nodes.len(), "Vault assembled and uploaded");

        // the context cache is no longer needed; deletion is best-effort
        if let Some(name) = cache_name {
            cache_service.delete(&name).await;
            self.repo
                .update_project_metadata(self.project_id, |meta| {
                    meta.gemini_cache_name = None;
                })
                .await?;
            info!(cache = %name, "Cleaned up context cache");
        }

        Ok(())
    }
}

/// Progress of note generation: share of nodes that already have content
pub fn export_progress(total_nodes: u64, still_missing: u64) -> i32 {
    if total_nodes == 0 {
        return 0;
    }
    (((total_nodes - still_missing) * 100) / total_nodes) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_progress_monotone_over_batches() {
        // 23 nodes drained in batches of 10: each invocation computes
        // progress from the count before it generates
        let total = 23;
        let progression: Vec<i32> = [23u64, 13, 3, 0]
            .iter()
            .map(|&missing| export_progress(total, missing))
            .collect();

        assert_eq!(progression, vec![0, 43, 86, 100]);
        assert!(progression.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_export_progress_empty_project() {
        assert_eq!(export_progress(0, 0), 0);
    }
}
