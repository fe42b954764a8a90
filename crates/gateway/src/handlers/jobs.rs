//! Job status handlers

use crate::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use graphvault_common::errors::{AppError, Result};
use graphvault_common::jobs::Job;

/// Get job status. BYOK keys in the stored metadata never leave the store.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<Job>> {
    let mut job = state
        .jobs
        .get(&job_id)
        .await?
        .ok_or_else(|| AppError::JobNotFound { id: job_id })?;

    job.metadata.gemini_key = None;
    job.metadata.openai_key = None;

    Ok(Json(job))
}
