//! GraphVault API Gateway
//!
//! The main entry point for external API requests:
//! - PDF uploads and ingestion kickoff
//! - Project CRUD and graph reads
//! - Job status and retry
//! - Export trigger / status / download

mod handlers;
mod orchestrator;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use graphvault_common::{
    config::AppConfig,
    db::{DbPool, Repository},
    jobs::{job_store_from_config, JobStore},
    metrics::register_metrics,
    queue::{task_queue_from_config, TaskQueue},
    storage::{blob_store_from_config, BlobStore},
    VERSION,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub repo: Repository,
    pub storage: Arc<dyn BlobStore>,
    pub jobs: Arc<dyn JobStore>,
    pub queue: Option<Arc<dyn TaskQueue>>,
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

    info!("Starting GraphVault API Gateway v{}", VERSION);

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

    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;
    db.migrate().await?;

    let state = AppState {
        repo: Repository::new(db),
        storage: blob_store_from_config(&config.storage),
        jobs: job_store_from_config(&config.job_store),
        queue: task_queue_from_config(&config.task_queue),
        config: config.clone(),
    };

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let api_routes = Router::new()
        // Health endpoints
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        // Project endpoints
        .route("/projects", post(handlers::projects::create_project))
        .route("/projects", get(handlers::projects::list_projects))
        .route("/projects/{id}", get(handlers::projects::get_project))
        .route("/projects/{id}", delete(handlers::projects::delete_project))
        .route("/projects/{id}/graph", get(handlers::graph::get_graph))
        // Ingestion endpoints
        .route("/projects/{id}/ingest", post(handlers::ingest::upload_and_ingest))
        .route("/jobs/{id}", get(handlers::jobs::get_job))
        .route("/jobs/{id}/retry", post(handlers::ingest::retry_ingestion))
        // Export endpoints
        .route("/projects/{id}/export", post(handlers::export::trigger_export))
        .route("/projects/{id}/export/status", get(handlers::export::export_status))
        .route("/projects/{id}/export/download", get(handlers::export::export_download));

    Router::new()
        .merge(api_routes)
        // uploads are PDFs; the default 2 MB body cap is far too small
        .layer(DefaultBodyLimit::max(60 * 1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
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
