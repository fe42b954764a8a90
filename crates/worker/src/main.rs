//! GraphVault Worker
//!
//! HTTP ingress for the task queue: the provider POSTs a JSON task payload
//! and retries on non-2xx responses. Dispatches to the ingestion pipeline
//! or the export processor; the exact same code paths run in-process when
//! no external queue is configured.

use axum::{extract::State, routing::get, routing::post, Json, Router};
use graphvault_common::{
    config::AppConfig,
    db::{DbPool, Repository},
    errors::{AppError, Result},
    jobs::{job_store_from_config, JobStore},
    metrics::register_metrics,
    queue::{task_queue_from_config, TaskAction, TaskPayload, TaskQueue},
    storage::{blob_store_from_config, BlobStore},
    VERSION,
};
use graphvault_export::{ExportProcessor, ExportStep};
use graphvault_ingestion::IngestionProcessor;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared state for the worker handlers
#[derive(Clone)]
struct WorkerState {
    config: Arc<AppConfig>,
    repo: Repository,
    storage: Arc<dyn BlobStore>,
    jobs: Arc<dyn JobStore>,
    queue: Option<Arc<dyn TaskQueue>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .json()
        .init();

    info!("Starting GraphVault Worker v{}", VERSION);

    let config = Arc::new(AppConfig::load().map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        e
    })?);

    register_metrics();
    if config.observability.metrics_port > 0 {
        let builder = metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], config.observability.metrics_port));
        builder.install()?;
    }

    let db = DbPool::new(&config.database).await?;
    db.migrate().await?;

    let state = WorkerState {
        repo: Repository::new(db),
        storage: blob_store_from_config(&config.storage),
        jobs: job_store_from_config(&config.job_store),
        queue: task_queue_from_config(&config.task_queue),
        config: config.clone(),
    };

    let app = Router::new()
        .route("/", post(handle_task))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!("Worker listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Worker shutdown complete");
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok", "version": VERSION}))
}

/// Dispatch one task. 2xx on success, 4xx on malformed payloads (the
/// provider must not retry those), 5xx to trigger a provider retry.
async fn handle_task(
    State(state): State<WorkerState>,
    Json(payload): Json<TaskPayload>,
) -> Result<Json<serde_json::Value>> {
    info!(action = ?payload.action, job_id = ?payload.job_id, "Received task");

    match payload.action {
        TaskAction::Ingest => {
            let job_id = payload.job_id.ok_or_else(|| AppError::Validation {
                message: "missing job_id".to_string(),
            })?;
            let file_key = payload.file_key.ok_or_else(|| AppError::Validation {
                message: "missing file_key".to_string(),
            })?;

            let processor = IngestionProcessor::new(
                job_id,
                file_key,
                payload.gemini_key,
                payload.openai_key,
                payload.user_id,
                state.repo.clone(),
                state.storage.clone(),
                state.jobs.clone(),
                state.config.llm.model.clone(),
                state.config.llm.cache_ttl_secs,
            );

            let outcome = processor.process().await?;

            Ok(Json(json!({
                "status": "completed",
                "project_id": outcome.project_id,
                "file_id": outcome.file_id,
                "chunks": outcome.chunks,
                "graph_nodes": outcome.graph_nodes,
            })))
        }
        TaskAction::PrepareExport => {
            let project_id = payload.project_id.ok_or_else(|| AppError::Validation {
                message: "missing project_id".to_string(),
            })?;
            let gemini_key = payload.gemini_key.ok_or_else(|| AppError::Validation {
                message: "missing gemini_key".to_string(),
            })?;

            let processor = ExportProcessor::new(
                project_id,
                payload.user_id,
                gemini_key,
                payload.openai_key,
                state.repo.clone(),
                state.storage.clone(),
                state.queue.clone(),
                state.config.task_queue.worker_url.clone(),
                state.config.llm.model.clone(),
                state.config.llm.cache_ttl_secs,
            );

            match processor.process().await {
                ExportStep::BatchPartial { nodes_processed } => Ok(Json(json!({
                    "export_status": "batch_partial",
                    "nodes_processed": nodes_processed,
                }))),
                ExportStep::AssemblyCompleted => Ok(Json(json!({
                    "export_status": "assembly_completed",
                }))),
                ExportStep::Failed { error } => Err(AppError::Internal { message: error }),
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
