//! Graph persistence
//!
//! Saving is an atomic refresh: wipe the project's existing nodes and
//! insert the new consolidated set inside one transaction. Readers never
//! observe a partial graph.

use crate::fragment::ConceptGraph;
use crate::metrics::{pagerank, PageRankConfig};
use graphvault_common::db::models::GraphNode;
use graphvault_common::db::{GraphNodeRecord, Repository};
use graphvault_common::errors::Result;
use tracing::info;
use uuid::Uuid;

pub struct GraphPersistence {
    repo: Repository,
}

impl GraphPersistence {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// Persist the consolidated graph state for a project, replacing
    /// whatever was there. PageRank scores ride along in node metadata.
    pub async fn save(&self, project_id: Uuid, graph: &ConceptGraph) -> Result<usize> {
        let ranks = pagerank(graph, &PageRankConfig::default());

        let records: Vec<GraphNodeRecord> = graph
            .nodes
            .iter()
            .map(|node| GraphNodeRecord {
                concept_id: node.id.clone(),
                aliases: node.aliases.clone(),
                outbound_links: node.outbound_links.clone(),
                inbound_links: node.inbound_links.clone(),
                metadata: serde_json::json!({
                    "pagerank": ranks.get(&node.id).copied().unwrap_or(0.0),
                }),
            })
            .collect();

        let saved = self.repo.replace_graph_nodes(project_id, &records).await?;

        info!(
            project_id = %project_id,
            nodes = saved,
            "Persisted concept graph"
        );

        Ok(saved)
    }

    /// Read all nodes of a project
    pub async fn load(&self, project_id: Uuid) -> Result<Vec<GraphNode>> {
        self.repo.nodes_for_project(project_id).await
    }
}
