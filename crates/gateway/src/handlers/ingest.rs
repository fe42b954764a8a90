//! Upload and ingestion handlers
//!
//! Multipart PDF upload with BYOK headers; the heavy lifting happens in
//! the worker (external queue) or on a background task (local mode).

use crate::handlers::UserContext;
use crate::orchestrator::{IngestionTicket, Orchestrator};
use crate::AppState;
use axum::{
    extract::{Multipart, Path, State},
    http::HeaderMap,
    Json,
};
use graphvault_common::errors::{AppError, Result};
use uuid::Uuid;

const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Upload a PDF into a project and kick off ingestion.
/// Headers: `X-User-Id`, `X-Gemini-API-Key` (required), `X-OpenAI-API-Key`.
pub async fn upload_and_ingest(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<IngestionTicket>> {
    let ctx = UserContext::from_headers(&headers);
    // strict BYOK: reject before any bytes are stored
    let gemini_key = ctx.require_gemini_key()?;

    // the project must exist before a file can join it
    state
        .repo
        .find_project_by_id(project_id)
        .await?
        .ok_or_else(|| AppError::ProjectNotFound {
            id: project_id.to_string(),
        })?;

    let mut filename: Option<String> = None;
    let mut content: Option<Vec<u8>> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| AppError::Validation {
        message: format!("invalid multipart payload: {}", e),
    })? {
        if field.name() == Some("file") {
            filename = field.file_name().map(String::from);
            let bytes = field.bytes().await.map_err(|e| AppError::Validation {
                message: format!("failed to read upload: {}", e),
            })?;
            content = Some(bytes.to_vec());
        }
    }

    let filename = filename.unwrap_or_else(|| "upload.pdf".to_string());
    let content = content.ok_or_else(|| AppError::MissingField {
        field: "file".to_string(),
    })?;

    if content.is_empty() {
        return Err(AppError::Validation {
            message: "uploaded file is empty".to_string(),
        });
    }
    if content.len() > MAX_UPLOAD_BYTES {
        return Err(AppError::Validation {
            message: format!("upload exceeds {} bytes", MAX_UPLOAD_BYTES),
        });
    }

    let ticket = Orchestrator::new(&state)
        .init_ingestion(
            filename,
            content,
            project_id,
            ctx.user_id,
            Some(gemini_key),
            ctx.openai_key,
        )
        .await?;

    Ok(Json(ticket))
}

/// Re-trigger ingestion for an existing job, optionally with fresher keys
pub async fn retry_ingestion(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<IngestionTicket>> {
    let ctx = UserContext::from_headers(&headers);

    let ticket = Orchestrator::new(&state)
        .retry_ingestion(&job_id, ctx.user_id, ctx.gemini_key, ctx.openai_key)
        .await?;

    Ok(Json(ticket))
}
