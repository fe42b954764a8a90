//! Ingestion processor
//!
//! Orchestrates the multi-stage pipeline for one job:
//! download -> parse -> chunk -> embed -> extract graph -> resolve ->
//! connect -> persist. Each stage is followed by a progress update; the
//! extraction stage is checkpointed in the job store so a queue-driven
//! retry does not re-pay the expensive part. Terminal bookkeeping (job and
//! project marked failed) runs on every error exit.

use crate::chunker::RecursiveMarkdownSplitter;
use crate::extractor::GraphExtractor;
use crate::pdf;
use graphvault_common::db::{NewChunk, Repository};
use graphvault_common::embeddings::{embedder_from_keys, Embedder};
use graphvault_common::errors::{AppError, Result};
use graphvault_common::jobs::{JobStore, JobStatus};
use graphvault_common::llm::{CacheService, GeminiClient};
use graphvault_common::metrics::{record_ingest_outcome, record_stage};
use graphvault_common::storage::BlobStore;
use graphvault_common::db::models::ProjectStatus;
use graphvault_graph::{ConceptGraph, EntityResolver, GraphBuilder, GraphConnector, GraphFragment, GraphPersistence};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Pipeline result summary
#[derive(Debug, Clone)]
pub struct IngestionOutcome {
    pub project_id: Uuid,
    pub file_id: Uuid,
    pub chunks: usize,
    pub graph_nodes: usize,
}

/// Everything one worker invocation needs, wired at the edge
pub struct IngestionProcessor {
    job_id: String,
    file_key: String,
    gemini_key: Option<String>,
    openai_key: Option<String>,
    user_id: Option<String>,
    repo: Repository,
    storage: Arc<dyn BlobStore>,
    jobs: Arc<dyn JobStore>,
    llm_model: String,
    cache_ttl_secs: u64,
}

impl IngestionProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job_id: String,
        file_key: String,
        gemini_key: Option<String>,
        openai_key: Option<String>,
        user_id: Option<String>,
        repo: Repository,
        storage: Arc<dyn BlobStore>,
        jobs: Arc<dyn JobStore>,
        llm_model: String,
        cache_ttl_secs: u64,
    ) -> Self {
        Self {
            job_id,
            file_key,
            gemini_key,
            openai_key,
            user_id,
            repo,
            storage,
            jobs,
            llm_model,
            cache_ttl_secs,
        }
    }

    /// Run the full pipeline. On any uncaught failure the job is marked
    /// failed with the error string, the project (when known) is marked
    /// failed, and the error propagates for the queue to observe.
    #[instrument(skip(self), fields(job_id = %self.job_id, file_key = %self.file_key))]
    pub async fn process(&self) -> Result<IngestionOutcome> {
        let mut project_id: Option<Uuid> = None;

        match self.run_pipeline(&mut project_id).await {
            Ok(outcome) => {
                record_ingest_outcome("completed");
                Ok(outcome)
            }
            Err(e) => {
                error!(error = %e, "Pipeline failed");
                record_ingest_outcome("failed");

                if let Err(store_err) = self
                    .jobs
                    .update_progress(
                        &self.job_id,
                        JobStatus::Failed,
                        None,
                        Some(json!({"error": e.to_string()})),
                    )
                    .await
                {
                    error!(error = %store_err, "Failed to record job failure");
                }

                if let Some(pid) = project_id {
                    if let Err(db_err) =
                        self.repo.update_project_status(pid, ProjectStatus::Failed).await
                    {
                        error!(error = %db_err, "Failed to update project status");
                    }
                }

                Err(e)
            }
        }
    }

    async fn run_pipeline(&self, project_id_out: &mut Option<Uuid>) -> Result<IngestionOutcome> {
        let pipeline_start = Instant::now();
        let mut timings: BTreeMap<&'static str, f64> = BTreeMap::new();

        self.jobs
            .update_progress(&self.job_id, JobStatus::Processing, Some(10), None)
            .await?;

        // download file from storage
        info!(key = %self.file_key, "Downloading upload");
        let file_bytes = self.storage.get(&self.file_key).await?;
        self.jobs
            .update_progress(&self.job_id, JobStatus::Processing, Some(20), None)
            .await?;
        tokio::task::yield_now().await;

        // read the job; keys from the invocation payload take precedence
        // over stored metadata (they may be fresher on retry)
        let job = self
            .jobs
            .get(&self.job_id)
            .await?
            .ok_or_else(|| AppError::JobNotFound {
                id: self.job_id.clone(),
            })?;

        let filename = job
            .metadata
            .filename
            .clone()
            .unwrap_or_else(|| "unknown.pdf".to_string());

        let gemini_key = self
            .gemini_key
            .clone()
            .or_else(|| job.metadata.gemini_key.clone());
        let openai_key = self
            .openai_key
            .clone()
            .or_else(|| job.metadata.openai_key.clone());
        let _user_id = self.user_id.clone().or_else(|| job.metadata.user_id.clone());

        let Some(gemini_key) = gemini_key else {
            return Err(AppError::Configuration {
                message: format!(
                    "No Gemini API key found for job {}. Strict BYOK is enabled.",
                    self.job_id
                ),
            });
        };

        let project_id: Uuid = job
            .metadata
            .project_id
            .as_deref()
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| AppError::Validation {
                message: format!(
                    "No project_id found in metadata for job {}. Cannot process a file without a parent project.",
                    self.job_id
                ),
            })?;
        *project_id_out = Some(project_id);

        // services built with the per-request BYOK keys
        let embedder = embedder_from_keys(Some(&gemini_key), openai_key.as_deref())?;
        let generator = Arc::new(GeminiClient::with_model(
            gemini_key.clone(),
            self.llm_model.clone(),
        ));
        let extractor = GraphExtractor::new(generator);

        // file row is deduplicated by (project, blob key) so retries never
        // create duplicates
        let db_file = match self.repo.find_file_by_key(project_id, &self.file_key).await? {
            Some(existing) => {
                info!(filename = %filename, "File already exists in project, reusing row");
                existing
            }
            None => {
                self.repo
                    .create_file(project_id, filename.clone(), self.file_key.clone())
                    .await?
            }
        };

        // parse pdf to markdown
        info!("Parsing PDF");
        let parse_start = Instant::now();
        let markdown = pdf::extract_markdown(&file_bytes)?;
        self.repo.set_file_content(db_file.id, markdown.clone()).await?;
        timings.insert("pdf_parsing", parse_start.elapsed().as_secs_f64());
        record_stage("pdf_parsing", parse_start);
        self.jobs
            .update_progress(&self.job_id, JobStatus::Processing, Some(40), None)
            .await?;
        tokio::task::yield_now().await;

        // cache the full document server-side; failure is soft
        let cache_start = Instant::now();
        let cache_service = CacheService::new(gemini_key.clone(), self.llm_model.clone())?;
        let cache_name = cache_service
            .create(&markdown, &project_id.to_string(), self.cache_ttl_secs)
            .await;
        if let Some(ref name) = cache_name {
            let name = name.clone();
            self.repo
                .update_project_metadata(project_id, move |meta| {
                    meta.gemini_cache_name = Some(name);
                })
                .await?;
            info!("Saved cache handle to project metadata");
        }
        timings.insert("cache_creation", cache_start.elapsed().as_secs_f64());

        // chunk text and generate embeddings in a single batch
        info!("Chunking and embedding");
        let embed_start = Instant::now();
        let splitter = RecursiveMarkdownSplitter::default();
        let chunks = splitter.split(&markdown);
        let chunk_texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder.embed_batch(&chunk_texts).await?;

        let new_chunks: Vec<NewChunk> = chunks
            .iter()
            .zip(vectors.into_iter())
            .map(|(chunk, embedding)| NewChunk {
                content: chunk.text.clone(),
                embedding,
                metadata: serde_json::to_value(&chunk.metadata).unwrap_or_else(|_| json!({})),
            })
            .collect();
        let chunks_count = self.repo.create_chunks(db_file.id, new_chunks).await?;
        timings.insert("chunking_and_embedding", embed_start.elapsed().as_secs_f64());
        record_stage("chunking_and_embedding", embed_start);
        self.jobs
            .update_progress(&self.job_id, JobStatus::Processing, Some(60), None)
            .await?;
        tokio::task::yield_now().await;

        // extract conceptual graph, checkpointed in the job store
        info!("Extracting conceptual graph");
        let extract_start = Instant::now();
        let fragments = extraction_with_checkpoint(
            self.jobs.as_ref(),
            &self.job_id,
            &extractor,
            &markdown,
            cache_name.as_deref(),
        )
        .await?;
        timings.insert("total_extraction", extract_start.elapsed().as_secs_f64());
        record_stage("graph_extraction", extract_start);
        self.jobs
            .update_progress(&self.job_id, JobStatus::Processing, Some(80), None)
            .await?;
        tokio::task::yield_now().await;

        // resolve and merge concepts
        info!("Resolving concepts");
        let builder = GraphBuilder::new(EntityResolver::new(embedder.clone()));
        let resolved = builder.build(&fragments).await?;

        // connectivity phase: bridge orphan components into the main one
        info!("Connecting orphan components");
        let connector = GraphConnector::new(embedder.clone());
        let connected: ConceptGraph = connector.connect_orphans(resolved).await;

        // persist graph (atomic purge-then-insert)
        info!("Persisting graph");
        let persistence = GraphPersistence::new(self.repo.clone());
        let node_count = persistence.save(project_id, &connected).await?;

        timings.insert("total_pipeline", pipeline_start.elapsed().as_secs_f64());

        // finalize job
        let graph_preview = serde_json::to_value(&connected)?;
        self.jobs
            .update_progress(
                &self.job_id,
                JobStatus::Completed,
                Some(100),
                Some(json!({
                    "chunks_count": chunks_count,
                    "graph_nodes": node_count,
                    "graph_preview": graph_preview,
                    "timings": timings,
                })),
            )
            .await?;

        self.repo
            .update_project_status(project_id, ProjectStatus::Complete)
            .await?;

        info!(
            project_id = %project_id,
            chunks = chunks_count,
            nodes = node_count,
            "Pipeline complete, project is live"
        );

        Ok(IngestionOutcome {
            project_id,
            file_id: db_file.id,
            chunks: chunks_count,
            graph_nodes: node_count,
        })
    }

}

/// Reuse checkpointed extraction output when present; otherwise run the
/// extractor and store its fragments for potential retries.
pub async fn extraction_with_checkpoint(
    jobs: &dyn JobStore,
    job_id: &str,
    extractor: &GraphExtractor,
    markdown: &str,
    cache_name: Option<&str>,
) -> Result<Vec<GraphFragment>> {
    if let Some(cached) = jobs.get_extraction_cache(job_id).await? {
        info!("Using cached extraction results");
        let fragments: Vec<GraphFragment> = serde_json::from_value(cached)?;
        return Ok(fragments);
    }

    let fragments = extractor.run(markdown, cache_name).await?;
    jobs.set_extraction_cache(job_id, &serde_json::to_value(&fragments)?)
        .await?;

    Ok(fragments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use graphvault_common::jobs::{JobMetadata, MemoryJobStore};
    use graphvault_common::llm::{GenerateRequest, TextGenerator};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingGenerator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TextGenerator for CountingGenerator {
        async fn generate(&self, _request: &GenerateRequest) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::json!({
                "nodes": [{"id": "intro", "aliases": [], "outbound_links": []}]
            })
            .to_string())
        }
    }

    /// Checkpointed retry: once fragments are in the extraction cache, a
    /// re-run must not call the extractor again and must yield the same
    /// fragments.
    #[tokio::test]
    async fn test_extraction_checkpoint_skips_second_run() {
        let jobs: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let job_id = uuid::Uuid::new_v4().to_string();
        jobs.create(&job_id, "ingest_pdf", JobMetadata::default())
            .await
            .unwrap();

        let generator = Arc::new(CountingGenerator {
            calls: AtomicUsize::new(0),
        });
        let extractor = GraphExtractor::new(generator.clone());

        let markdown = "# Intro\n\nnothing.";

        // first run extracts and stores the checkpoint
        let first = extraction_with_checkpoint(jobs.as_ref(), &job_id, &extractor, markdown, None)
            .await
            .unwrap();
        let calls_after_first = generator.calls.load(Ordering::SeqCst);
        assert!(calls_after_first > 0);

        // second run reads the checkpoint; the generator is not called again
        let second = extraction_with_checkpoint(jobs.as_ref(), &job_id, &extractor, markdown, None)
            .await
            .unwrap();
        assert_eq!(generator.calls.load(Ordering::SeqCst), calls_after_first);
        assert_eq!(first, second);
    }

    /// Smallest possible document: one chunk, one root concept, no edges,
    /// no orphans to bridge.
    #[tokio::test]
    async fn test_empty_graph_scenario() {
        use crate::chunker::RecursiveMarkdownSplitter;
        use graphvault_common::embeddings::MockEmbedder;
        use graphvault_graph::{EntityResolver, GraphBuilder, GraphConnector};

        let markdown = "# Intro\n\nnothing.";

        let chunks = RecursiveMarkdownSplitter::default().split(markdown);
        assert_eq!(chunks.len(), 1);

        let embedder: Arc<graphvault_common::embeddings::MockEmbedder> =
            Arc::new(MockEmbedder::new(1536));
        let vectors = embedder
            .embed_batch(&chunks.iter().map(|c| c.text.clone()).collect::<Vec<_>>())
            .await
            .unwrap();
        assert_eq!(vectors.len(), 1);
        assert_eq!(vectors[0].len(), 1536);

        // skeleton yields one root concept and no edges
        let generator = Arc::new(CountingGenerator {
            calls: AtomicUsize::new(0),
        });
        let extractor = GraphExtractor::new(generator);
        let fragments = extractor.run(markdown, None).await.unwrap();

        let embedder: Arc<dyn graphvault_common::embeddings::Embedder> =
            Arc::new(MockEmbedder::new(8));
        let builder = GraphBuilder::new(EntityResolver::new(embedder.clone()));
        let graph = builder.build(&fragments).await.unwrap();

        let connected = GraphConnector::new(embedder).connect_orphans(graph).await;

        assert_eq!(connected.len(), 1);
        let node = connected.node("intro").unwrap();
        assert!(node.outbound_links.is_empty());
        assert!(node.inbound_links.is_empty());
    }
}
