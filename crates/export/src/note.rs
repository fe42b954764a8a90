//! Study note generation
//!
//! Generates concise, wiki-style research notes for graph nodes. Context
//! comes from the document-scoped LLM cache when a live handle exists,
//! otherwise from RAG over the project's chunk embeddings. A cache that
//! expired mid-flight triggers exactly one retry in RAG mode.

use crate::repair::{append_missing_links, repair_note_markdown};
use graphvault_common::db::Repository;
use graphvault_common::embeddings::Embedder;
use graphvault_common::errors::{AppError, Result};
use graphvault_common::llm::{GenerateRequest, TextGenerator};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// How many chunks ground a note in RAG mode
const RAG_CHUNK_LIMIT: usize = 5;

const NOTE_PROMPT: &str = r#"summarize the concept '{concept}' based on the provided context.
strict requirements:
1. use wiki-style markdown syntax.
2. mention all related concepts using double brackets: {links}
3. use latex for any mathematical formulas or technical symbols (e.g. $e = mc^2$).
4. strictly lowercase output.
5. short and concise research notes. max 5 sentences.
6. if the context is insufficient, use your general knowledge to write a high-quality academic note.

context:
{context}

note:
"#;

pub struct NoteService {
    generator: Arc<dyn TextGenerator>,
    embedder: Arc<dyn Embedder>,
    repo: Repository,
}

impl NoteService {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        embedder: Arc<dyn Embedder>,
        repo: Repository,
    ) -> Self {
        Self {
            generator,
            embedder,
            repo,
        }
    }

    /// Generate a grounded, repaired markdown note for one concept
    pub async fn generate(
        &self,
        project_id: Uuid,
        concept_id: &str,
        outbound_links: &[String],
        cache_handle: Option<&str>,
    ) -> Result<String> {
        let valid_ids: HashSet<String> = self
            .repo
            .concept_ids_for_project(project_id)
            .await?
            .into_iter()
            .collect();

        let raw = match cache_handle {
            Some(handle) => {
                let request = self
                    .build_request(concept_id, outbound_links, "use the cached course document.")
                    .with_cache(Some(handle.to_string()));

                match self.generator.generate(&request).await {
                    Ok(raw) => raw,
                    Err(AppError::LlmCacheInvalid { message }) => {
                        // expired mid-flight; retry once grounded on RAG
                        warn!(concept = %concept_id, error = %message, "Cache invalid, retrying in RAG mode");
                        self.generate_rag(project_id, concept_id, outbound_links)
                            .await?
                    }
                    Err(e) => return Err(e),
                }
            }
            None => {
                self.generate_rag(project_id, concept_id, outbound_links)
                    .await?
            }
        };

        Ok(finalize_note(&raw, &valid_ids, outbound_links))
    }

    async fn generate_rag(
        &self,
        project_id: Uuid,
        concept_id: &str,
        outbound_links: &[String],
    ) -> Result<String> {
        let context = self.rag_context(project_id, concept_id).await?;
        let request = self.build_request(concept_id, outbound_links, &context);
        self.generator.generate(&request).await
    }

    /// Vector search for the chunks most relevant to the concept
    async fn rag_context(&self, project_id: Uuid, concept_id: &str) -> Result<String> {
        let query = self.embedder.embed(concept_id).await?;
        let chunks = self
            .repo
            .top_chunks_for_project(project_id, &query, RAG_CHUNK_LIMIT)
            .await?;

        if chunks.is_empty() {
            info!(concept = %concept_id, "No context chunks found");
            return Ok("no specific course context found.".to_string());
        }

        Ok(chunks.join("\n\n"))
    }

    fn build_request(
        &self,
        concept_id: &str,
        outbound_links: &[String],
        context: &str,
    ) -> GenerateRequest {
        let links = outbound_links
            .iter()
            .map(|l| format!("[[{}]]", l))
            .collect::<Vec<_>>()
            .join(", ");

        let prompt = NOTE_PROMPT
            .replace("{concept}", concept_id)
            .replace("{links}", &links)
            .replace("{context}", context);

        GenerateRequest::new(prompt).with_temperature(0.0)
    }
}

/// The deterministic tail of note generation: lowercase, repair, and
/// guarantee every requested outbound link appears.
pub fn finalize_note(
    raw: &str,
    valid_ids: &HashSet<String>,
    outbound_links: &[String],
) -> String {
    let lowered = raw.trim().to_lowercase();
    let repaired = repair_note_markdown(&lowered, Some(valid_ids));
    append_missing_links(&repaired, outbound_links)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> HashSet<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_finalize_lowercases_and_repairs() {
        let raw = "```markdown\nThe [[Derivative]] MEASURES change.\n```";
        let out = finalize_note(&raw, &ids(&["derivative"]), &[]);
        assert_eq!(out, "the [[derivative]] measures change.");
    }

    #[test]
    fn test_finalize_strips_unknown_links_and_appends_missing() {
        let raw = "[[nonexistent]] and [[known]]";
        let out = finalize_note(
            raw,
            &ids(&["known", "also known"]),
            &["also known".to_string()],
        );

        assert!(out.starts_with("nonexistent and [[known]]"));
        assert!(out.contains("## related"));
        assert!(out.contains("- [[also known]]"));
    }

    #[test]
    fn test_finalize_even_delimiters_and_links_present() {
        let raw = "The $formula is **important** and `unclosed";
        let links = vec!["gradient".to_string()];
        let out = finalize_note(raw, &ids(&["gradient"]), &links);

        assert_eq!(out.matches('$').count() % 2, 0);
        assert_eq!(out.matches('`').count() % 2, 0);
        assert_eq!(out.matches("**").count() % 2, 0);
        // every requested outbound link appears at least once
        for link in &links {
            assert!(out.to_lowercase().contains(&link.to_lowercase()));
        }
    }
}
