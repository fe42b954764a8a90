//! In-memory graph types
//!
//! Fragments are what the extraction stage emits per window or batch; the
//! merged `ConceptGraph` is what gets connected and persisted. Edges are
//! stored as concept ids only - no back-pointers - and inbound lists are
//! always derived from outbound edges.

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// A single concept node. Used both for raw fragment nodes and for merged
/// graph nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptNode {
    pub id: String,

    #[serde(default)]
    pub aliases: Vec<String>,

    #[serde(default, alias = "links")]
    pub outbound_links: Vec<String>,

    #[serde(default)]
    pub inbound_links: Vec<String>,
}

impl ConceptNode {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            aliases: Vec::new(),
            outbound_links: Vec::new(),
            inbound_links: Vec::new(),
        }
    }
}

/// Output of one extraction call: a set of partial nodes not yet merged
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphFragment {
    #[serde(default)]
    pub nodes: Vec<ConceptNode>,
}

impl GraphFragment {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Merged graph with symmetric inbound links derived from outbound
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptGraph {
    pub nodes: Vec<ConceptNode>,
}

impl ConceptGraph {
    pub fn node(&self, id: &str) -> Option<&ConceptNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut ConceptNode> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

fn concept_id_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9 ]*$").expect("static regex"))
}

/// A valid concept id is lowercase alphanumeric with single spaces -
/// path-safe by construction, which the vault filenames rely on.
pub fn is_valid_concept_id(id: &str) -> bool {
    concept_id_pattern().is_match(id) && !id.ends_with(' ')
}

/// Normalize a raw id from the LLM: lowercase, underscores and hyphens to
/// spaces, collapse whitespace, strip anything outside [a-z0-9 ].
pub fn normalize_concept_id(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let spaced: String = lowered
        .chars()
        .map(|c| match c {
            '_' | '-' => ' ',
            _ => c,
        })
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == ' ')
        .collect();

    spaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Sanitize a fragment in place: normalize ids and link targets, keep the
/// original spelling as an alias when normalization changed it, and drop
/// nodes whose id is unusable even after normalization.
pub fn sanitize_fragment(fragment: &mut GraphFragment) {
    fragment.nodes.retain_mut(|node| {
        let normalized = normalize_concept_id(&node.id);
        if normalized.is_empty() {
            tracing::warn!(raw_id = %node.id, "Dropping node with unusable concept id");
            return false;
        }

        if normalized != node.id && !node.aliases.contains(&node.id) {
            node.aliases.push(node.id.clone());
        }
        node.id = normalized;

        for link in node
            .outbound_links
            .iter_mut()
            .chain(node.inbound_links.iter_mut())
        {
            *link = normalize_concept_id(link);
        }
        node.outbound_links.retain(|l| !l.is_empty());
        node.inbound_links.retain(|l| !l.is_empty());

        true
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_concept_ids() {
        assert!(is_valid_concept_id("neural network"));
        assert!(is_valid_concept_id("l2 regularization"));
        assert!(!is_valid_concept_id("Neural Network"));
        assert!(!is_valid_concept_id("neural_network"));
        assert!(!is_valid_concept_id(" neural"));
        assert!(!is_valid_concept_id("neural "));
        assert!(!is_valid_concept_id(""));
        // path separators are unrepresentable
        assert!(!is_valid_concept_id("a/b"));
    }

    #[test]
    fn test_normalize_concept_id() {
        assert_eq!(normalize_concept_id("Neural_Network"), "neural network");
        assert_eq!(normalize_concept_id("  Fourier   Transform "), "fourier transform");
        assert_eq!(normalize_concept_id("f(x) = x²"), "fx x");
        assert_eq!(normalize_concept_id("!!!"), "");
    }

    #[test]
    fn test_sanitize_keeps_original_spelling_as_alias() {
        let mut fragment = GraphFragment {
            nodes: vec![ConceptNode {
                id: "Neural_Network".into(),
                aliases: vec![],
                outbound_links: vec!["Back-Propagation".into()],
                inbound_links: vec![],
            }],
        };

        sanitize_fragment(&mut fragment);

        let node = &fragment.nodes[0];
        assert_eq!(node.id, "neural network");
        assert!(node.aliases.contains(&"Neural_Network".to_string()));
        assert_eq!(node.outbound_links, vec!["back propagation"]);
    }

    #[test]
    fn test_sanitize_drops_unusable_nodes() {
        let mut fragment = GraphFragment {
            nodes: vec![ConceptNode::new("∑∏"), ConceptNode::new("calculus")],
        };

        sanitize_fragment(&mut fragment);
        assert_eq!(fragment.nodes.len(), 1);
        assert_eq!(fragment.nodes[0].id, "calculus");
    }

    #[test]
    fn test_fragment_parses_links_alias() {
        // extraction responses may use "links" for outbound edges
        let raw = serde_json::json!({
            "nodes": [{"id": "set", "links": ["subset"]}]
        });
        let fragment: GraphFragment = serde_json::from_value(raw).unwrap();
        assert_eq!(fragment.nodes[0].outbound_links, vec!["subset"]);
    }
}
