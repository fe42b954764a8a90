//! Project CRUD handlers

use crate::handlers::UserContext;
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use graphvault_common::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProjectRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
}

#[derive(Debug, Serialize)]
pub struct ProjectResponse {
    pub id: Uuid,
    pub title: String,
    pub status: String,
    pub project_metadata: serde_json::Value,
    pub created_at: String,
    pub updated_at: String,
}

impl From<graphvault_common::db::models::Project> for ProjectResponse {
    fn from(p: graphvault_common::db::models::Project) -> Self {
        Self {
            id: p.id,
            title: p.title.clone(),
            status: p.status.clone(),
            project_metadata: p.project_metadata.clone(),
            created_at: p.created_at.to_rfc3339(),
            updated_at: p.updated_at.to_rfc3339(),
        }
    }
}

/// Create a project in `processing` state
pub async fn create_project(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateProjectRequest>,
) -> Result<Json<ProjectResponse>> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
    })?;

    let ctx = UserContext::from_headers(&headers);
    let project = state
        .repo
        .create_project(request.title, ctx.user_uuid())
        .await?;

    Ok(Json(project.into()))
}

/// List projects, newest first
pub async fn list_projects(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ProjectResponse>>> {
    let ctx = UserContext::from_headers(&headers);
    let projects = state.repo.list_projects(ctx.user_uuid()).await?;

    Ok(Json(projects.into_iter().map(Into::into).collect()))
}

/// Fetch one project
pub async fn get_project(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ProjectResponse>> {
    let project = state
        .repo
        .find_project_by_id(id)
        .await?
        .ok_or_else(|| AppError::ProjectNotFound { id: id.to_string() })?;

    Ok(Json(project.into()))
}

/// Delete a project; files, chunks, and graph nodes cascade
pub async fn delete_project(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>> {
    let deleted = state.repo.delete_project(id).await?;
    if !deleted {
        return Err(AppError::ProjectNotFound { id: id.to_string() });
    }

    Ok(Json(serde_json::json!({"deleted": true})))
}
