//! Graph builder
//!
//! Merges raw fragment occurrences into one consolidated conceptual
//! network and computes bidirectional dependencies. Inbound links are
//! rebuilt from scratch at the end - extraction output is never trusted to
//! be symmetric.

use crate::fragment::{ConceptGraph, ConceptNode, GraphFragment};
use crate::resolver::EntityResolver;
use graphvault_common::errors::Result;
use std::collections::HashMap;
use tracing::info;

pub struct GraphBuilder {
    resolver: EntityResolver,
}

impl GraphBuilder {
    pub fn new(resolver: EntityResolver) -> Self {
        Self { resolver }
    }

    /// Merge multiple extracted fragments into one deduplicated graph
    pub async fn build(&self, fragments: &[GraphFragment]) -> Result<ConceptGraph> {
        let raw_nodes: Vec<ConceptNode> = fragments
            .iter()
            .flat_map(|f| f.nodes.iter().cloned())
            .collect();

        // resolve entity mapping (original_id -> canonical_id)
        let id_map = self.resolver.resolve(&raw_nodes).await?;

        // consolidate nodes, preserving first-seen order
        let mut order: Vec<String> = Vec::new();
        let mut merged: HashMap<String, ConceptNode> = HashMap::new();

        for raw in &raw_nodes {
            let canonical = id_map.get(&raw.id).cloned().unwrap_or_else(|| raw.id.clone());

            {
                let entry = merged.entry(canonical.clone()).or_insert_with(|| {
                    order.push(canonical.clone());
                    ConceptNode::new(canonical.clone())
                });

                // merge aliases as a set union; a remapped raw id becomes
                // an alias
                for alias in &raw.aliases {
                    if !entry.aliases.contains(alias) {
                        entry.aliases.push(alias.clone());
                    }
                }
                if raw.id != canonical && !entry.aliases.contains(&raw.id) {
                    entry.aliases.push(raw.id.clone());
                }

                // merge outbound links through the id map, dropping
                // self-loops and duplicates
                for raw_link in &raw.outbound_links {
                    let remapped =
                        id_map.get(raw_link).cloned().unwrap_or_else(|| raw_link.clone());
                    if remapped != canonical && !entry.outbound_links.contains(&remapped) {
                        entry.outbound_links.push(remapped);
                    }
                }
            }

            // a persisted edge must always point at a persisted concept:
            // targets no fragment defined get their own node, and a target
            // spelled differently from its canonical becomes an alias there
            for raw_link in &raw.outbound_links {
                let remapped = id_map.get(raw_link).cloned().unwrap_or_else(|| raw_link.clone());
                if remapped == canonical {
                    continue;
                }

                let target = merged.entry(remapped.clone()).or_insert_with(|| {
                    order.push(remapped.clone());
                    ConceptNode::new(remapped.clone())
                });
                if *raw_link != remapped && !target.aliases.contains(raw_link) {
                    target.aliases.push(raw_link.clone());
                }
            }

            // some sources also carry inbound edges; materialize them as
            // outbound edges on the remapped parent
            for raw_parent in &raw.inbound_links {
                let parent = id_map
                    .get(raw_parent)
                    .cloned()
                    .unwrap_or_else(|| raw_parent.clone());
                if parent == canonical {
                    continue;
                }

                let parent_entry = merged.entry(parent.clone()).or_insert_with(|| {
                    order.push(parent.clone());
                    ConceptNode::new(parent.clone())
                });
                if !parent_entry.outbound_links.contains(&canonical) {
                    parent_entry.outbound_links.push(canonical.clone());
                }
                if *raw_parent != parent && !parent_entry.aliases.contains(raw_parent) {
                    parent_entry.aliases.push(raw_parent.clone());
                }
            }
        }

        // rebuild all inbound links globally from the final outbound sets;
        // this holds the bidirectional invariant regardless of fragment order
        let ids: Vec<String> = order.clone();
        for id in &ids {
            let outbound = merged.get(id).map(|n| n.outbound_links.clone()).unwrap_or_default();
            for target in outbound {
                if let Some(target_node) = merged.get_mut(&target) {
                    if !target_node.inbound_links.contains(id) {
                        target_node.inbound_links.push(id.clone());
                    }
                }
            }
        }

        let nodes: Vec<ConceptNode> = order
            .into_iter()
            .filter_map(|id| merged.remove(&id))
            .collect();

        info!(
            fragments = fragments.len(),
            raw_nodes = raw_nodes.len(),
            merged_nodes = nodes.len(),
            "Graph merge complete"
        );

        Ok(ConceptGraph { nodes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphvault_common::embeddings::MockEmbedder;
    use std::collections::HashMap as Map;
    use std::sync::Arc;

    fn builder_with_fixtures(fixtures: Map<String, Vec<f32>>) -> GraphBuilder {
        let embedder = Arc::new(MockEmbedder::with_fixtures(3, fixtures));
        GraphBuilder::new(EntityResolver::new(embedder))
    }

    fn distinct_fixtures(ids: &[&str]) -> Map<String, Vec<f32>> {
        // orthogonal-ish vectors so nothing merges
        let mut fixtures = Map::new();
        for (i, id) in ids.iter().enumerate() {
            let mut v = vec![0.0f32; ids.len()];
            v[i] = 1.0;
            fixtures.insert(id.to_string(), v);
        }
        fixtures
    }

    fn assert_symmetric(graph: &ConceptGraph) {
        for node in &graph.nodes {
            for target in &node.outbound_links {
                let target_node = graph
                    .node(target)
                    .unwrap_or_else(|| panic!("dangling edge {} -> {}", node.id, target));
                assert!(
                    target_node.inbound_links.contains(&node.id),
                    "missing backlink {} <- {}",
                    target,
                    node.id
                );
            }
            for source in &node.inbound_links {
                let source_node = graph.node(source).expect("inbound refers to missing node");
                assert!(
                    source_node.outbound_links.contains(&node.id),
                    "inbound {} -> {} not backed by outbound",
                    source,
                    node.id
                );
            }
            assert!(
                !node.outbound_links.contains(&node.id),
                "self-loop on {}",
                node.id
            );
        }
    }

    #[tokio::test]
    async fn test_alias_merge_across_fragments() {
        let mut fixtures = Map::new();
        fixtures.insert("neural network".to_string(), vec![1.0, 0.0, 0.0]);
        fixtures.insert("neural net".to_string(), vec![0.99, 0.1, 0.0]);
        fixtures.insert("backpropagation".to_string(), vec![0.0, 1.0, 0.0]);
        fixtures.insert("backprop".to_string(), vec![0.05, 0.99, 0.0]);
        let builder = builder_with_fixtures(fixtures);

        // two windows describe the same pair with different spellings
        let fragments = vec![
            GraphFragment {
                nodes: vec![ConceptNode {
                    id: "neural network".into(),
                    aliases: vec!["ann".into()],
                    outbound_links: vec!["backpropagation".into()],
                    inbound_links: vec![],
                }],
            },
            GraphFragment {
                nodes: vec![ConceptNode {
                    id: "neural net".into(),
                    aliases: vec![],
                    outbound_links: vec!["backprop".into()],
                    inbound_links: vec![],
                }],
            },
        ];

        let graph = builder.build(&fragments).await.unwrap();
        assert_eq!(graph.len(), 2);

        let nn = graph.node("neural network").unwrap();
        assert!(nn.aliases.contains(&"neural net".to_string()));
        assert!(nn.aliases.contains(&"ann".to_string()));
        assert_eq!(nn.outbound_links, vec!["backpropagation"]);

        let bp = graph.node("backpropagation").unwrap();
        assert!(bp.aliases.contains(&"backprop".to_string()));
        assert_eq!(bp.inbound_links, vec!["neural network"]);

        assert_symmetric(&graph);
    }

    #[tokio::test]
    async fn test_self_loops_and_duplicates_dropped() {
        let builder = builder_with_fixtures(distinct_fixtures(&["a", "b"]));

        let fragments = vec![GraphFragment {
            nodes: vec![
                ConceptNode {
                    id: "a".into(),
                    aliases: vec![],
                    outbound_links: vec!["a".into(), "b".into(), "b".into()],
                    inbound_links: vec![],
                },
                ConceptNode::new("b"),
            ],
        }];

        let graph = builder.build(&fragments).await.unwrap();
        let a = graph.node("a").unwrap();
        assert_eq!(a.outbound_links, vec!["b"]);
        assert_symmetric(&graph);
    }

    #[tokio::test]
    async fn test_llm_inbound_materialized_as_outbound() {
        let builder = builder_with_fixtures(distinct_fixtures(&["limit", "derivative"]));

        let fragments = vec![GraphFragment {
            nodes: vec![ConceptNode {
                id: "derivative".into(),
                aliases: vec![],
                outbound_links: vec![],
                inbound_links: vec!["limit".into()],
            }],
        }];

        let graph = builder.build(&fragments).await.unwrap();
        let limit = graph.node("limit").unwrap();
        assert_eq!(limit.outbound_links, vec!["derivative"]);
        let derivative = graph.node("derivative").unwrap();
        assert_eq!(derivative.inbound_links, vec!["limit"]);
        assert_symmetric(&graph);
    }

    #[tokio::test]
    async fn test_targets_materialize_as_nodes() {
        let builder = builder_with_fixtures(distinct_fixtures(&["a", "prerequisite"]));

        // "prerequisite" is referenced but never defined by any fragment;
        // it still has to exist for the edge to be persistable
        let fragments = vec![GraphFragment {
            nodes: vec![ConceptNode {
                id: "a".into(),
                aliases: vec![],
                outbound_links: vec!["prerequisite".into()],
                inbound_links: vec![],
            }],
        }];

        let graph = builder.build(&fragments).await.unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.node("a").unwrap().outbound_links, vec!["prerequisite"]);
        assert_eq!(
            graph.node("prerequisite").unwrap().inbound_links,
            vec!["a"]
        );
        assert_symmetric(&graph);
    }

    #[tokio::test]
    async fn test_empty_fragments() {
        let builder = builder_with_fixtures(Map::new());
        let graph = builder.build(&[]).await.unwrap();
        assert!(graph.is_empty());
    }
}
