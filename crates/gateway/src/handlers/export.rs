//! Export trigger, status, and download handlers

use crate::handlers::UserContext;
use crate::orchestrator::Orchestrator;
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use graphvault_common::db::models::{ExportState, ExportStatus};
use graphvault_common::errors::{AppError, Result};
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

/// Trigger the asynchronous vault export for a project
pub async fn trigger_export(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>> {
    let ctx = UserContext::from_headers(&headers);
    let gemini_key = ctx.require_gemini_key()?;

    state
        .repo
        .find_project_by_id(project_id)
        .await?
        .ok_or_else(|| AppError::ProjectNotFound {
            id: project_id.to_string(),
        })?;

    state
        .repo
        .update_project_metadata(project_id, |meta| {
            meta.export = Some(ExportState {
                status: ExportStatus::Pending,
                progress: 0,
                message: Some("export requested...".to_string()),
                download_url: None,
                error: None,
            });
        })
        .await?;

    let msg_id = Orchestrator::new(&state)
        .trigger_export(project_id, ctx.user_id, gemini_key, ctx.openai_key)
        .await?;

    Ok(Json(json!({"success": true, "msg_id": msg_id})))
}

/// Current export state, verbatim from project metadata
pub async fn export_status(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>> {
    let project = state
        .repo
        .find_project_by_id(project_id)
        .await?
        .ok_or_else(|| AppError::ProjectNotFound {
            id: project_id.to_string(),
        })?;

    match project.metadata().export {
        Some(export) => Ok(Json(serde_json::to_value(export)?)),
        None => Ok(Json(json!({"status": "none"}))),
    }
}

/// Pre-signed download URL for the assembled vault zip
pub async fn export_download(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>> {
    let project = state
        .repo
        .find_project_by_id(project_id)
        .await?
        .ok_or_else(|| AppError::ProjectNotFound {
            id: project_id.to_string(),
        })?;

    let export = project.metadata().export.ok_or_else(|| AppError::Validation {
        message: "export not ready".to_string(),
    })?;

    if export.status != ExportStatus::Complete {
        return Err(AppError::Validation {
            message: "export not ready".to_string(),
        });
    }

    let key = export.download_url.ok_or_else(|| AppError::NotFound {
        resource: "export artifact".to_string(),
        id: project_id.to_string(),
    })?;

    let ttl = Duration::from_secs(state.config.storage.signed_url_ttl_secs);
    let url = state.storage.signed_url(&key, ttl).await?;

    Ok(Json(json!({"download_url": url})))
}
