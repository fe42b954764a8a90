//! Health and readiness handlers

use crate::AppState;
use axum::{extract::State, Json};
use graphvault_common::errors::Result;
use graphvault_common::VERSION;
use serde_json::json;

/// Liveness: the process is up
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok", "version": VERSION}))
}

/// Readiness: dependencies are reachable
pub async fn ready(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    state.repo.ping().await?;
    Ok(Json(json!({"status": "ready"})))
}
