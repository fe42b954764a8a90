//! Entity resolution
//!
//! Conceptual deduplication within the graph: near-synonym ids emitted by
//! different extraction windows are clustered on their embeddings and
//! mapped to one canonical spelling.

use crate::fragment::ConceptNode;
use graphvault_common::embeddings::Embedder;
use graphvault_common::errors::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Embedding-based entity resolver using average-linkage agglomerative
/// clustering on Euclidean distance over L2-normalized vectors. The
/// distance threshold is the Euclidean equivalent of a cosine-similarity
/// floor: sqrt(2 * (1 - theta)).
pub struct EntityResolver {
    embedder: Arc<dyn Embedder>,
    /// Cosine-similarity threshold for merging two ids
    threshold: f32,
}

impl EntityResolver {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            threshold: 0.85,
        }
    }

    pub fn with_threshold(embedder: Arc<dyn Embedder>, threshold: f32) -> Self {
        Self { embedder, threshold }
    }

    /// Compute the mapping from raw ids to resolved canonical ids. Link
    /// targets count as ids too: a target spelled differently from every
    /// node id still has to land on a canonical concept.
    pub async fn resolve(&self, raw_nodes: &[ConceptNode]) -> Result<HashMap<String, String>> {
        if raw_nodes.is_empty() {
            return Ok(HashMap::new());
        }

        // stable de-duplication keeps cluster output deterministic
        let mut unique_ids: Vec<String> = Vec::new();
        for id in all_occurrences(raw_nodes) {
            if !unique_ids.contains(id) {
                unique_ids.push(id.clone());
            }
        }

        if unique_ids.len() < 2 {
            return Ok(unique_ids.into_iter().map(|id| (id.clone(), id)).collect());
        }

        // embed and normalize (zero vectors stay zero rather than dividing by 0)
        let embeddings = self.embedder.embed_batch(&unique_ids).await?;
        let normalized: Vec<Vec<f32>> = embeddings.into_iter().map(l2_normalize).collect();

        let dist_threshold = (2.0 * (1.0 - self.threshold)).sqrt();
        let clusters = agglomerative_clusters(&normalized, dist_threshold);

        debug!(
            unique = unique_ids.len(),
            clusters = clusters.len(),
            "Entity resolution clustering complete"
        );

        // canonical id per cluster: the member seen most often across all
        // fragments; ties go to the longer spelling (full form beats its
        // abbreviation), then lexicographic order
        let mut raw_counts: HashMap<&str, usize> = HashMap::new();
        for id in all_occurrences(raw_nodes) {
            *raw_counts.entry(id.as_str()).or_default() += 1;
        }

        let mut id_map = HashMap::new();
        for cluster in clusters {
            let mut members: Vec<&String> = cluster.iter().map(|&i| &unique_ids[i]).collect();
            members.sort();

            let canonical = members
                .iter()
                .max_by(|a, b| {
                    let ca = raw_counts.get(a.as_str()).copied().unwrap_or(0);
                    let cb = raw_counts.get(b.as_str()).copied().unwrap_or(0);
                    // members is sorted and max_by keeps the last maximal
                    // element, so invert the final comparison
                    ca.cmp(&cb)
                        .then_with(|| a.len().cmp(&b.len()))
                        .then_with(|| b.cmp(a))
                })
                .copied()
                .cloned()
                .expect("cluster is never empty");

            for member in members {
                id_map.insert(member.clone(), canonical.clone());
            }
        }

        Ok(id_map)
    }
}

/// Every id appearance: node ids plus outbound and inbound targets
fn all_occurrences(raw_nodes: &[ConceptNode]) -> impl Iterator<Item = &String> {
    raw_nodes.iter().flat_map(|node| {
        std::iter::once(&node.id)
            .chain(node.outbound_links.iter())
            .chain(node.inbound_links.iter())
    })
}

fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Average-linkage agglomerative clustering: no fixed cluster count, merge
/// while the smallest mean pairwise distance between two clusters is below
/// the threshold.
fn agglomerative_clusters(points: &[Vec<f32>], dist_threshold: f32) -> Vec<Vec<usize>> {
    let n = points.len();

    // pairwise point distances, computed once
    let mut dist = vec![vec![0.0f32; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let d = euclidean(&points[i], &points[j]);
            dist[i][j] = d;
            dist[j][i] = d;
        }
    }

    let mut clusters: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();

    loop {
        let mut best: Option<(usize, usize, f32)> = None;

        for a in 0..clusters.len() {
            for b in (a + 1)..clusters.len() {
                let mut sum = 0.0f32;
                for &i in &clusters[a] {
                    for &j in &clusters[b] {
                        sum += dist[i][j];
                    }
                }
                let linkage = sum / (clusters[a].len() * clusters[b].len()) as f32;

                if best.map(|(_, _, d)| linkage < d).unwrap_or(true) {
                    best = Some((a, b, linkage));
                }
            }
        }

        match best {
            Some((a, b, linkage)) if linkage < dist_threshold => {
                let merged = clusters.remove(b);
                clusters[a].extend(merged);
            }
            _ => break,
        }
    }

    clusters
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphvault_common::embeddings::MockEmbedder;
    use std::collections::HashMap as Map;

    fn fixture_embedder() -> Arc<dyn Embedder> {
        let mut fixtures = Map::new();
        // two tight groups, far apart
        fixtures.insert("neural network".to_string(), vec![1.0, 0.0, 0.0]);
        fixtures.insert("neural net".to_string(), vec![0.99, 0.1, 0.0]);
        fixtures.insert("backpropagation".to_string(), vec![0.0, 1.0, 0.0]);
        fixtures.insert("backprop".to_string(), vec![0.05, 0.99, 0.0]);
        Arc::new(MockEmbedder::with_fixtures(3, fixtures))
    }

    fn nodes(ids: &[&str]) -> Vec<ConceptNode> {
        ids.iter().map(|id| ConceptNode::new(*id)).collect()
    }

    #[tokio::test]
    async fn test_identity_map_for_single_id() {
        let resolver = EntityResolver::new(Arc::new(MockEmbedder::new(8)));
        let map = resolver.resolve(&nodes(&["calculus"])).await.unwrap();
        assert_eq!(map.get("calculus").unwrap(), "calculus");
        assert_eq!(map.len(), 1);
    }

    #[tokio::test]
    async fn test_synonyms_cluster_together() {
        let resolver = EntityResolver::new(fixture_embedder());

        // "neural network" occurs twice, so it wins its cluster
        let raw = nodes(&["neural network", "neural net", "neural network", "backpropagation", "backprop"]);
        let map = resolver.resolve(&raw).await.unwrap();

        assert_eq!(map.get("neural net").unwrap(), "neural network");
        assert_eq!(map.get("neural network").unwrap(), "neural network");
        // distinct concepts stay apart
        assert_ne!(map.get("backprop").unwrap(), "neural network");
        assert_eq!(map.get("backprop").unwrap(), map.get("backpropagation").unwrap());
    }

    #[tokio::test]
    async fn test_link_targets_participate_in_resolution() {
        let resolver = EntityResolver::new(fixture_embedder());

        // neither target is defined as a node, yet both must resolve
        let raw = vec![
            ConceptNode {
                id: "neural network".into(),
                aliases: vec![],
                outbound_links: vec!["backpropagation".into()],
                inbound_links: vec![],
            },
            ConceptNode {
                id: "neural net".into(),
                aliases: vec![],
                outbound_links: vec!["backprop".into()],
                inbound_links: vec![],
            },
        ];

        let map = resolver.resolve(&raw).await.unwrap();
        assert_eq!(map.get("neural net").unwrap(), "neural network");
        // tie on occurrence count goes to the longer spelling
        assert_eq!(map.get("backprop").unwrap(), "backpropagation");
    }

    #[tokio::test]
    async fn test_zero_vectors_do_not_panic() {
        let mut fixtures = Map::new();
        fixtures.insert("a".to_string(), vec![0.0, 0.0]);
        fixtures.insert("b".to_string(), vec![0.0, 0.0]);
        let resolver =
            EntityResolver::new(Arc::new(MockEmbedder::with_fixtures(2, fixtures)));

        let map = resolver.resolve(&nodes(&["a", "b"])).await.unwrap();
        // identical (zero) vectors merge; canonical is stable
        assert_eq!(map.get("a"), map.get("b"));
    }

    #[test]
    fn test_clustering_threshold_boundary() {
        // two points exactly at the threshold distance must not merge
        let points = vec![vec![0.0], vec![1.0]];
        let clusters = agglomerative_clusters(&points, 1.0);
        assert_eq!(clusters.len(), 2);

        let clusters = agglomerative_clusters(&points, 1.01);
        assert_eq!(clusters.len(), 1);
    }

    #[test]
    fn test_average_linkage_chain() {
        // c is close to b but the a/b cluster average keeps it out at a
        // tight threshold
        let points = vec![vec![0.0], vec![0.4], vec![0.9]];
        let clusters = agglomerative_clusters(&points, 0.5);
        // a-b merge (0.4), then c joins only if avg(0.9, 0.5) = 0.7 < 0.5, which fails
        assert_eq!(clusters.len(), 2);
    }
}
