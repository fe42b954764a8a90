//! Conceptual graph extraction
//!
//! Pulls a knowledge graph (nodes + links) out of document text using the
//! LLM. Two modes that produce the same fragment shape:
//!
//! - **Windowed** (no document cache): seed root concepts from the header
//!   skeleton, then walk overlapping text windows in order, feeding each
//!   window the accumulated concept ids so the model reuses them.
//! - **Paginated-cache** (document cached server-side): extract one global
//!   list of concept ids, then expand batches of 50 in parallel against
//!   the cache, every batch constrained to the same global id list.
//!
//! Non-conforming model output degrades to an empty fragment; the pipeline
//! continues.

use futures::future::join_all;
use graphvault_common::errors::Result;
use graphvault_common::llm::{parse_json_with_repair, GenerateRequest, TextGenerator};
use graphvault_graph::fragment::{normalize_concept_id, sanitize_fragment, GraphFragment};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Sliding window size over the raw document text, in characters
const WINDOW_SIZE: usize = 50_000;
/// Overlap between consecutive windows
const WINDOW_OVERLAP: usize = 5_000;
/// Concept ids handed back to the model are capped for prompt budget
const EXISTING_CONCEPTS_CAP: usize = 500;
/// Paginated-cache mode expands this many seed ids per call
const SEED_BATCH_SIZE: usize = 50;

const WINDOW_PROMPT: &str = r#"Analyze the following text and identify key concepts (nodes) and their relationships (links).

{existing}

Strict Output Rules:
1. Return ONLY a valid JSON object with key "nodes".
2. Nodes format:
   {
     "id": "concept name lowercase",
     "aliases": ["synonym", "acronym"],
     "outbound_links": ["related concept id 1", "related concept id 2"]
   }
3. IDs must be lowercase, singular, words separated by single spaces. No underscores.
4. Links: meaningful connections found IN THIS TEXT or to EXISTING CONCEPTS.
5. VALIDATE: Ensure every ID in "outbound_links" is either in the current "nodes" list OR in the "Existing Concept IDs" list.
6. REUSE IDs: If a concept in the text matches an ID in the "Existing Concept IDs" list (or is a synonym), use that existing ID.

Text to Analyze:
"#;

const SKELETON_PROMPT: &str = r#"The following is the header outline of a study document. Identify the core concepts the document is organized around.

Strict Output Rules:
1. Return ONLY a valid JSON object with key "nodes".
2. Nodes format:
   {
     "id": "concept name lowercase",
     "aliases": [],
     "outbound_links": ["related concept id"]
   }
3. IDs must be lowercase, singular, words separated by single spaces. No underscores.
4. Use the underlying concept, not the section title (e.g. "function", not "review of functions").
5. Link sub-concepts to the concepts they depend on within this list.

Document outline:
"#;

const GLOBAL_SEED_PROMPT: &str = r#"Read the entire cached document and produce the master list of every concept a student would need to study.

Strict Output Rules:
1. Return ONLY a valid JSON object: {"concepts": ["concept id", ...]}.
2. IDs must be lowercase, singular, words separated by single spaces. No underscores.
3. Use conceptual names, never formulas or notation.
4. Be comprehensive: include every definition, theorem, technique, and property worth studying.
5. No duplicates, no meta-entries like "introduction" or "chapter 1".
"#;

const PAGINATED_PROMPT: &str = r#"Using the cached document, expand the following concept ids into graph nodes with their relationships.

Concept ids to expand (produce EXACTLY one node per id, id copied verbatim):
{batch}

Global concept id list (the ONLY valid link targets):
{global}

Strict Output Rules:
1. Return ONLY a valid JSON object with key "nodes".
2. Nodes format:
   {
     "id": "concept id from the batch",
     "aliases": ["synonym", "acronym"],
     "outbound_links": ["concept id from the global list"]
   }
3. Every "id" must come from the batch list; every link target must come from the global list.
4. Link each concept to the concepts it depends on or is closely related to in the document.
"#;

pub struct GraphExtractor {
    generator: Arc<dyn TextGenerator>,
}

#[derive(Deserialize)]
struct SeedResponse {
    #[serde(default)]
    concepts: Vec<String>,
}

impl GraphExtractor {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    /// Run extraction end to end: paginated-cache mode when a live cache
    /// handle exists, windowed mode otherwise (and as fallback).
    pub async fn run(&self, text: &str, cache_handle: Option<&str>) -> Result<Vec<GraphFragment>> {
        if let Some(handle) = cache_handle {
            info!(cache = %handle, "Using full-context cache for paginated graph extraction");

            let global_ids = self.extract_global_seed(handle).await;
            info!(count = global_ids.len(), "Extracted global concept ids");

            if !global_ids.is_empty() {
                let batches: Vec<&[String]> = global_ids.chunks(SEED_BATCH_SIZE).collect();
                let total = batches.len();

                let tasks = batches.into_iter().enumerate().map(|(i, batch)| {
                    let global = &global_ids;
                    async move {
                        info!(batch = i + 1, total, "Extracting paginated batch");
                        self.extract_paginated_nodes(handle, batch, global).await
                    }
                });

                let fragments: Vec<GraphFragment> = join_all(tasks)
                    .await
                    .into_iter()
                    .filter(|f| !f.is_empty())
                    .collect();

                // every batch degrading to empty means the cache died
                // mid-flight; re-drive the non-cached path instead
                if !fragments.is_empty() {
                    return Ok(fragments);
                }
                warn!("Paginated extraction produced nothing, falling back to windowed extraction");
            } else {
                warn!("Failed to extract global seed, falling back to windowed extraction");
            }
        }

        info!("Running windowed graph extraction");
        self.run_windowed(text).await
    }

    /// Stateful windowing: skeleton seed first, then each window in order
    /// with the accumulated concept ids.
    async fn run_windowed(&self, text: &str) -> Result<Vec<GraphFragment>> {
        let windows = char_windows(text, WINDOW_SIZE, WINDOW_OVERLAP);

        let mut fragments: Vec<GraphFragment> = Vec::new();
        let mut accumulated_ids: Vec<String> = Vec::new();

        // pass 1: core concepts from the h1/h2 skeleton
        let skeleton = extract_skeleton(text);
        info!(chars = skeleton.len(), "Extracted skeleton context");

        if !skeleton.is_empty() {
            let seeded = self.extract_from_skeleton(&skeleton).await;
            accumulated_ids.extend(seeded.nodes.iter().map(|n| n.id.clone()));
            info!(seeded = seeded.nodes.len(), "Seeded core concepts");
            fragments.push(seeded);
        }

        // pass 2: windows, strictly sequential - each depends on all prior
        // windows' output
        let total = windows.len();
        for (i, window) in windows.iter().enumerate() {
            info!(window = i + 1, total, "Extracting window");

            let fragment = self.extract_from_window(window, &accumulated_ids).await;
            accumulated_ids.extend(fragment.nodes.iter().map(|n| n.id.clone()));
            fragments.push(fragment);
        }

        Ok(fragments.into_iter().filter(|f| !f.is_empty()).collect())
    }

    /// Extract concepts and links from one text window
    pub async fn extract_from_window(
        &self,
        window: &str,
        existing_concepts: &[String],
    ) -> GraphFragment {
        let existing = if existing_concepts.is_empty() {
            String::new()
        } else {
            let capped: Vec<&str> = existing_concepts
                .iter()
                .take(EXISTING_CONCEPTS_CAP)
                .map(String::as_str)
                .collect();
            format!(
                "Existing Concept IDs (REUSE THESE IF APPLICABLE): {}",
                capped.join(", ")
            )
        };

        let prompt = format!(
            "{}\n\n{}",
            WINDOW_PROMPT.replace("{existing}", &existing),
            window
        );

        self.generate_fragment(&prompt, None).await
    }

    /// Seed root concepts from the document skeleton
    pub async fn extract_from_skeleton(&self, skeleton: &str) -> GraphFragment {
        let prompt = format!("{}\n{}", SKELETON_PROMPT, skeleton);
        self.generate_fragment(&prompt, None).await
    }

    /// The full master list of candidate concept ids from the cached
    /// document. Empty on any failure.
    pub async fn extract_global_seed(&self, cache_handle: &str) -> Vec<String> {
        let request = GenerateRequest::new(GLOBAL_SEED_PROMPT)
            .json()
            .with_cache(Some(cache_handle.to_string()));

        let raw = match self.generator.generate(&request).await {
            Ok(raw) => raw,
            Err(e) => {
                error!(error = %e, "Global seed extraction failed");
                return Vec::new();
            }
        };

        match parse_json_with_repair::<SeedResponse>(&raw) {
            Ok(seed) => {
                let mut ids: Vec<String> = Vec::new();
                for raw_id in seed.concepts {
                    let id = normalize_concept_id(&raw_id);
                    if !id.is_empty() && !ids.contains(&id) {
                        ids.push(id);
                    }
                }
                ids
            }
            Err(e) => {
                error!(error = %e, "Global seed response did not parse");
                Vec::new()
            }
        }
    }

    /// Expand one batch of seed ids against the cached document
    pub async fn extract_paginated_nodes(
        &self,
        cache_handle: &str,
        batch_ids: &[String],
        global_ids: &[String],
    ) -> GraphFragment {
        let prompt = PAGINATED_PROMPT
            .replace("{batch}", &batch_ids.join(", "))
            .replace("{global}", &global_ids.join(", "));

        let mut fragment = self
            .generate_fragment(&prompt, Some(cache_handle.to_string()))
            .await;

        // hold the contract even when the model strays: ids limited to the
        // batch, targets limited to the global list
        fragment.nodes.retain(|n| batch_ids.contains(&n.id));
        for node in &mut fragment.nodes {
            node.outbound_links.retain(|t| global_ids.contains(t));
        }

        fragment
    }

    async fn generate_fragment(&self, prompt: &str, cache: Option<String>) -> GraphFragment {
        let request = GenerateRequest::new(prompt).json().with_cache(cache);

        let raw = match self.generator.generate(&request).await {
            Ok(raw) => raw,
            Err(e) => {
                error!(error = %e, "Graph extraction call failed");
                return GraphFragment::default();
            }
        };

        match parse_json_with_repair::<GraphFragment>(&raw) {
            Ok(mut fragment) => {
                sanitize_fragment(&mut fragment);
                fragment
            }
            Err(e) => {
                // treated as an empty fragment; the pipeline continues
                error!(error = %e, "Graph extraction response did not parse");
                GraphFragment::default()
            }
        }
    }
}

/// The document skeleton: every h1/h2 header line, in order
pub fn extract_skeleton(text: &str) -> String {
    text.lines()
        .filter(|line| {
            let trimmed = line.trim_start_matches('#');
            let hashes = line.len() - trimmed.len();
            (1..=2).contains(&hashes) && trimmed.starts_with(' ')
        })
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Overlapping character windows over the document text
fn char_windows(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();

    if total <= size {
        return vec![text.to_string()];
    }

    let step = size - overlap;
    let mut windows = Vec::new();
    let mut start = 0usize;

    loop {
        let end = (start + size).min(total);
        windows.push(chars[start..end].iter().collect());
        if end == total {
            break;
        }
        start += step;
    }

    windows
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use graphvault_common::errors::AppError;
    use std::sync::Mutex;

    /// Scripted generator: pops canned responses in order and records the
    /// requests it saw.
    struct ScriptedGenerator {
        responses: Mutex<Vec<Result<String>>>,
        requests: Mutex<Vec<GenerateRequest>>,
    }

    impl ScriptedGenerator {
        fn new(responses: Vec<Result<String>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        fn request_prompt(&self, index: usize) -> String {
            self.requests.lock().unwrap()[index].prompt.clone()
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn generate(&self, request: &GenerateRequest) -> Result<String> {
            self.requests.lock().unwrap().push(request.clone());
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(AppError::Llm {
                    message: "script exhausted".into(),
                });
            }
            responses.remove(0)
        }
    }

    fn nodes_json(entries: &[(&str, &[&str])]) -> String {
        let nodes: Vec<serde_json::Value> = entries
            .iter()
            .map(|(id, links)| {
                serde_json::json!({
                    "id": id,
                    "aliases": [],
                    "outbound_links": links,
                })
            })
            .collect();
        serde_json::json!({ "nodes": nodes }).to_string()
    }

    #[test]
    fn test_extract_skeleton() {
        let text = "# Title\nbody\n## Section\nmore\n### too deep\n#not a header\n## Another";
        assert_eq!(extract_skeleton(text), "# Title\n## Section\n## Another");
    }

    #[test]
    fn test_char_windows_overlap() {
        let text = "abcdefghij";
        let windows = char_windows(text, 4, 2);
        assert_eq!(windows, vec!["abcd", "cdef", "efgh", "ghij"]);

        // short texts yield a single window
        assert_eq!(char_windows("short", 100, 10), vec!["short"]);
    }

    #[tokio::test]
    async fn test_windowed_run_accumulates_concepts() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            // skeleton pass
            Ok(nodes_json(&[("calculus", &[])])),
            // single window pass
            Ok(nodes_json(&[("limit", &["calculus"])])),
        ]));

        let extractor = GraphExtractor::new(generator.clone());
        let text = "# Calculus\n\nsome body text about limits.";
        let fragments = extractor.run(text, None).await.unwrap();

        assert_eq!(fragments.len(), 2);
        assert_eq!(generator.request_count(), 2);
        // the window prompt carries the concepts seeded by the skeleton
        assert!(generator.request_prompt(1).contains("calculus"));
    }

    #[tokio::test]
    async fn test_malformed_response_becomes_empty_fragment() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            Ok("sorry, no json today".into()),
            Ok(nodes_json(&[("set", &[])])),
        ]));

        let extractor = GraphExtractor::new(generator);
        let fragments = extractor
            .run("# Sets\n\ncontent", None)
            .await
            .unwrap();

        // skeleton fragment degraded to empty and was filtered out
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].nodes[0].id, "set");
    }

    #[tokio::test]
    async fn test_paginated_mode_constrains_ids() {
        let batch = vec!["limit".to_string(), "derivative".to_string()];
        let global = vec![
            "limit".to_string(),
            "derivative".to_string(),
            "integral".to_string(),
        ];

        let generator = Arc::new(ScriptedGenerator::new(vec![Ok(nodes_json(&[
            ("limit", &["integral", "hallucinated concept"]),
            ("derivative", &["limit"]),
            ("off batch id", &["limit"]),
        ]))]));

        let extractor = GraphExtractor::new(generator);
        let fragment = extractor
            .extract_paginated_nodes("cachedContents/x", &batch, &global)
            .await;

        assert_eq!(fragment.nodes.len(), 2);
        let limit = fragment.nodes.iter().find(|n| n.id == "limit").unwrap();
        // target outside the global list was dropped
        assert_eq!(limit.outbound_links, vec!["integral"]);
    }

    #[tokio::test]
    async fn test_cache_mode_falls_back_on_empty_seed() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            // global seed comes back empty
            Ok(serde_json::json!({"concepts": []}).to_string()),
            // fallback windowed pass (no headers, so no skeleton call)
            Ok(nodes_json(&[("topology", &[])])),
        ]));

        let extractor = GraphExtractor::new(generator.clone());
        let fragments = extractor
            .run("plain text without headers", Some("cachedContents/x"))
            .await
            .unwrap();

        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].nodes[0].id, "topology");
    }

    #[tokio::test]
    async fn test_existing_concepts_capped() {
        let generator = Arc::new(ScriptedGenerator::new(vec![Ok(nodes_json(&[]))]));
        let extractor = GraphExtractor::new(generator.clone());

        let existing: Vec<String> = (0..800).map(|i| format!("concept {}", i)).collect();
        extractor.extract_from_window("text", &existing).await;

        let prompt = generator.request_prompt(0);
        assert!(prompt.contains("concept 499"));
        assert!(!prompt.contains("concept 500,"));
        assert!(!prompt.contains("concept 799"));
    }
}
