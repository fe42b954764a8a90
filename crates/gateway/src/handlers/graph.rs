//! Concept graph read handlers

use crate::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use graphvault_common::errors::{AppError, Result};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct GraphNodeResponse {
    pub concept_id: String,
    pub content: Option<String>,
    pub aliases: Vec<String>,
    pub outbound_links: Vec<String>,
    pub inbound_links: Vec<String>,
    pub node_metadata: Value,
}

#[derive(Debug, Serialize)]
pub struct GraphResponse {
    pub project_id: Uuid,
    pub nodes: Vec<GraphNodeResponse>,
}

/// Full concept graph of a project, pagerank scores included in metadata
pub async fn get_graph(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> Result<Json<GraphResponse>> {
    state
        .repo
        .find_project_by_id(project_id)
        .await?
        .ok_or_else(|| AppError::ProjectNotFound {
            id: project_id.to_string(),
        })?;

    let nodes = state.repo.nodes_for_project(project_id).await?;

    Ok(Json(GraphResponse {
        project_id,
        nodes: nodes
            .into_iter()
            .map(|n| GraphNodeResponse {
                concept_id: n.concept_id,
                content: n.content,
                aliases: n.aliases,
                outbound_links: n.outbound_links,
                inbound_links: n.inbound_links,
                node_metadata: n.node_metadata,
            })
            .collect(),
    }))
}
