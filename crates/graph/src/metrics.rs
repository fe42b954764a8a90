//! Graph theory metrics for the conceptual network
//!
//! PageRank over directed outbound edges, normalized to [0, 1] by the top
//! score. Stored into node metadata at persistence time so readers get
//! concept importance for free.

use crate::fragment::ConceptGraph;
use std::collections::HashMap;

/// PageRank configuration
#[derive(Debug, Clone)]
pub struct PageRankConfig {
    /// Damping factor (typically 0.85)
    pub damping: f64,

    /// Maximum iterations
    pub max_iterations: usize,

    /// Convergence threshold
    pub epsilon: f64,
}

impl Default for PageRankConfig {
    fn default() -> Self {
        Self {
            damping: 0.85,
            max_iterations: 100,
            epsilon: 1e-6,
        }
    }
}

/// Compute PageRank scores for all concepts
pub fn pagerank(graph: &ConceptGraph, config: &PageRankConfig) -> HashMap<String, f64> {
    let n = graph.len();
    if n == 0 {
        return HashMap::new();
    }

    let n_f64 = n as f64;
    let damping = config.damping;
    let teleport = (1.0 - damping) / n_f64;

    let ids: Vec<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
    let id_set: HashMap<&str, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();

    // incoming edges and out-degrees, edges into unknown ids ignored
    let mut incoming: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut out_counts: Vec<usize> = vec![0; n];

    for (i, node) in graph.nodes.iter().enumerate() {
        for target in &node.outbound_links {
            if let Some(&j) = id_set.get(target.as_str()) {
                incoming[j].push(i);
                out_counts[i] += 1;
            }
        }
    }

    let mut scores = vec![1.0 / n_f64; n];

    for _ in 0..config.max_iterations {
        let mut new_scores = vec![0.0f64; n];
        let mut max_diff: f64 = 0.0;

        for j in 0..n {
            let citation_sum: f64 = incoming[j]
                .iter()
                .map(|&i| scores[i] / out_counts[i].max(1) as f64)
                .sum();

            let new_score = teleport + damping * citation_sum;
            max_diff = max_diff.max((new_score - scores[j]).abs());
            new_scores[j] = new_score;
        }

        scores = new_scores;

        if max_diff < config.epsilon {
            break;
        }
    }

    // normalize to 0-1 range
    let max_score = scores.iter().cloned().fold(0.0f64, f64::max);
    if max_score > 0.0 {
        for score in &mut scores {
            *score /= max_score;
        }
    }

    ids.into_iter()
        .zip(scores)
        .map(|(id, score)| (id.to_string(), score))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::ConceptNode;

    fn node(id: &str, outbound: &[&str]) -> ConceptNode {
        ConceptNode {
            id: id.into(),
            aliases: vec![],
            outbound_links: outbound.iter().map(|s| s.to_string()).collect(),
            inbound_links: vec![],
        }
    }

    #[test]
    fn test_pagerank_basic() {
        // a -> b -> c, d -> b; b is referenced most and should rank highest
        let graph = ConceptGraph {
            nodes: vec![
                node("a", &["b"]),
                node("b", &["c"]),
                node("c", &[]),
                node("d", &["b"]),
            ],
        };

        let scores = pagerank(&graph, &PageRankConfig::default());

        let b = scores["b"];
        let a = scores["a"];
        assert!(b > a, "b should rank higher than a");
        // normalized: the top node scores exactly 1
        assert!((scores.values().cloned().fold(0.0f64, f64::max) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_pagerank_empty_graph() {
        let graph = ConceptGraph::default();
        assert!(pagerank(&graph, &PageRankConfig::default()).is_empty());
    }

    #[test]
    fn test_pagerank_ignores_dangling_targets() {
        let graph = ConceptGraph {
            nodes: vec![node("a", &["ghost"])],
        };

        let scores = pagerank(&graph, &PageRankConfig::default());
        assert_eq!(scores.len(), 1);
        assert!(scores.contains_key("a"));
    }
}
