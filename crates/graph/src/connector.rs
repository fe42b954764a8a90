//! Orphan component bridging
//!
//! Connects orphan components to the main graph using semantic similarity
//! between high-degree representatives. Acts as a fallback so the final
//! graph is a single component wherever a plausible link exists; an orphan
//! with no match above the floor stays disconnected and the pipeline still
//! succeeds.

use crate::fragment::ConceptGraph;
use graphvault_common::embeddings::Embedder;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct GraphConnector {
    embedder: Arc<dyn Embedder>,
    /// Cosine-similarity floor for accepting a bridge. Deliberately
    /// lenient: a weak link beats an island.
    similarity_floor: f32,
    main_rep_limit: usize,
    orphan_rep_limit: usize,
}

impl GraphConnector {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            similarity_floor: 0.25,
            main_rep_limit: 50,
            orphan_rep_limit: 10,
        }
    }

    pub fn with_similarity_floor(mut self, floor: f32) -> Self {
        self.similarity_floor = floor;
        self
    }

    /// Bridge orphan components into the main component where similarity
    /// allows. Returns the (possibly) modified graph.
    pub async fn connect_orphans(&self, mut graph: ConceptGraph) -> ConceptGraph {
        // undirected view for component analysis
        let adjacency = undirected_adjacency(&graph);
        let mut components = connected_components(&adjacency);

        if components.len() <= 1 {
            info!("Graph is already fully connected");
            return graph;
        }

        // largest component is main; deterministic order for equal sizes
        components.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        let main_component = components[0].clone();
        let orphans = &components[1..];

        info!(
            main_size = main_component.len(),
            orphan_count = orphans.len(),
            "Bridging orphan components"
        );

        let main_reps = representatives(&adjacency, &main_component, self.main_rep_limit);
        if main_reps.is_empty() {
            return graph;
        }

        let main_embeddings = match self.embedder.embed_batch(&main_reps).await {
            Ok(e) => e,
            Err(e) => {
                error!(error = %e, "Failed to embed main component representatives");
                return graph;
            }
        };

        for orphan in orphans {
            let orphan_reps = representatives(&adjacency, orphan, self.orphan_rep_limit);
            if orphan_reps.is_empty() {
                continue;
            }

            let orphan_embeddings = match self.embedder.embed_batch(&orphan_reps).await {
                Ok(e) => e,
                Err(e) => {
                    error!(error = %e, "Failed to embed orphan representatives, skipping");
                    continue;
                }
            };

            // best (orphan, main) pair by cosine similarity
            let mut best = (0usize, 0usize, f32::MIN);
            for (i, oe) in orphan_embeddings.iter().enumerate() {
                for (j, me) in main_embeddings.iter().enumerate() {
                    let score = cosine_similarity(oe, me);
                    if score > best.2 {
                        best = (i, j, score);
                    }
                }
            }

            let (oi, mj, score) = best;
            if score > self.similarity_floor {
                let orphan_id = &orphan_reps[oi];
                let main_id = &main_reps[mj];
                info!(
                    orphan = %orphan_id,
                    main = %main_id,
                    score = format!("{:.2}", score),
                    "Bridging orphan into main component"
                );

                if let Some(orphan_node) = graph.node_mut(orphan_id) {
                    if !orphan_node.outbound_links.contains(main_id) {
                        orphan_node.outbound_links.push(main_id.clone());
                    }
                }
                if let Some(main_node) = graph.node_mut(main_id) {
                    if !main_node.inbound_links.contains(orphan_id) {
                        main_node.inbound_links.push(orphan_id.clone());
                    }
                }
            } else {
                warn!(
                    orphan = %orphan_reps[0],
                    max_score = format!("{:.2}", score),
                    "Orphan has no close semantic match, leaving disconnected"
                );
            }
        }

        graph
    }
}

fn undirected_adjacency(graph: &ConceptGraph) -> HashMap<String, HashSet<String>> {
    let ids: HashSet<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
    let mut adjacency: HashMap<String, HashSet<String>> = graph
        .nodes
        .iter()
        .map(|n| (n.id.clone(), HashSet::new()))
        .collect();

    for node in &graph.nodes {
        for target in &node.outbound_links {
            if ids.contains(target.as_str()) {
                adjacency.get_mut(&node.id).unwrap().insert(target.clone());
                adjacency.get_mut(target).unwrap().insert(node.id.clone());
            }
        }
    }

    adjacency
}

fn connected_components(adjacency: &HashMap<String, HashSet<String>>) -> Vec<Vec<String>> {
    let mut visited: HashSet<&String> = HashSet::new();
    let mut components = Vec::new();

    // iterate in sorted order for deterministic component output
    let mut ids: Vec<&String> = adjacency.keys().collect();
    ids.sort();

    for start in ids {
        if visited.contains(start) {
            continue;
        }

        let mut component = Vec::new();
        let mut queue = VecDeque::from([start]);
        visited.insert(start);

        while let Some(current) = queue.pop_front() {
            component.push(current.clone());
            if let Some(neighbors) = adjacency.get(current) {
                for neighbor in neighbors {
                    if !visited.contains(neighbor) {
                        visited.insert(neighbor);
                        queue.push_back(neighbor);
                    }
                }
            }
        }

        component.sort();
        components.push(component);
    }

    components
}

/// High-degree nodes represent the core of a component
fn representatives(
    adjacency: &HashMap<String, HashSet<String>>,
    component: &[String],
    limit: usize,
) -> Vec<String> {
    let mut by_degree: Vec<(&String, usize)> = component
        .iter()
        .map(|id| (id, adjacency.get(id).map(HashSet::len).unwrap_or(0)))
        .collect();

    by_degree.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    by_degree.into_iter().take(limit).map(|(id, _)| id.clone()).collect()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::ConceptNode;
    use graphvault_common::embeddings::MockEmbedder;
    use std::collections::HashMap as Map;

    fn graph_two_components() -> ConceptGraph {
        // a -> b and c -> d, with symmetric inbound already in place
        ConceptGraph {
            nodes: vec![
                ConceptNode {
                    id: "a".into(),
                    aliases: vec![],
                    outbound_links: vec!["b".into()],
                    inbound_links: vec![],
                },
                ConceptNode {
                    id: "b".into(),
                    aliases: vec![],
                    outbound_links: vec![],
                    inbound_links: vec!["a".into()],
                },
                ConceptNode {
                    id: "c".into(),
                    aliases: vec![],
                    outbound_links: vec!["d".into()],
                    inbound_links: vec![],
                },
                ConceptNode {
                    id: "d".into(),
                    aliases: vec![],
                    outbound_links: vec![],
                    inbound_links: vec!["c".into()],
                },
            ],
        }
    }

    fn embedder(similar: bool) -> Arc<dyn Embedder> {
        let mut fixtures = Map::new();
        fixtures.insert("a".to_string(), vec![1.0, 0.0]);
        fixtures.insert("b".to_string(), vec![0.9, 0.1]);
        if similar {
            // c sits close to a (similarity ~0.4 floor cleared)
            fixtures.insert("c".to_string(), vec![0.5, 0.86]);
            fixtures.insert("d".to_string(), vec![0.45, 0.9]);
        } else {
            // orthogonal: similarity 0, below the floor
            fixtures.insert("c".to_string(), vec![0.0, 1.0]);
            fixtures.insert("d".to_string(), vec![0.0, 1.0]);
        }
        Arc::new(MockEmbedder::with_fixtures(2, fixtures))
    }

    #[tokio::test]
    async fn test_single_component_untouched() {
        let connector = GraphConnector::new(embedder(true));
        let graph = ConceptGraph {
            nodes: vec![
                ConceptNode {
                    id: "a".into(),
                    aliases: vec![],
                    outbound_links: vec!["b".into()],
                    inbound_links: vec![],
                },
                ConceptNode {
                    id: "b".into(),
                    aliases: vec![],
                    outbound_links: vec![],
                    inbound_links: vec!["a".into()],
                },
            ],
        };

        let before = graph.clone();
        let after = connector.connect_orphans(graph).await;
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_orphan_bridged_when_similar() {
        let connector = GraphConnector::new(embedder(true));
        let graph = connector.connect_orphans(graph_two_components()).await;

        // one bridge edge appeared between a representative pair
        let bridged = graph.nodes.iter().any(|n| {
            n.outbound_links.iter().any(|t| {
                matches!(
                    (n.id.as_str(), t.as_str()),
                    ("c", "a") | ("c", "b") | ("d", "a") | ("d", "b")
                )
            })
        });
        assert!(bridged, "expected a bridge from the orphan into main");

        // and the graph is now a single component
        let adjacency = undirected_adjacency(&graph);
        assert_eq!(connected_components(&adjacency).len(), 1);
    }

    #[tokio::test]
    async fn test_orphan_left_when_dissimilar() {
        let connector = GraphConnector::new(embedder(false)).with_similarity_floor(0.25);
        let graph = connector.connect_orphans(graph_two_components()).await;

        let adjacency = undirected_adjacency(&graph);
        // best-effort: still two components, pipeline succeeded anyway
        assert_eq!(connected_components(&adjacency).len(), 2);
    }

    #[test]
    fn test_representatives_prefer_degree() {
        let graph = ConceptGraph {
            nodes: vec![
                ConceptNode {
                    id: "hub".into(),
                    aliases: vec![],
                    outbound_links: vec!["x".into(), "y".into()],
                    inbound_links: vec![],
                },
                ConceptNode::new("x"),
                ConceptNode::new("y"),
            ],
        };

        let adjacency = undirected_adjacency(&graph);
        let component: Vec<String> = vec!["hub".into(), "x".into(), "y".into()];
        let reps = representatives(&adjacency, &component, 1);
        assert_eq!(reps, vec!["hub"]);
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0], &[1.0]), 0.0);
    }
}
