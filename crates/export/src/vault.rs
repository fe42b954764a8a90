//! Vault assembly
//!
//! Renders every graph node as a standalone markdown file (frontmatter +
//! note body) and packs them into a single zip archive. Filenames are the
//! concept ids, which are path-safe by construction.

use graphvault_common::db::models::GraphNode;
use graphvault_common::errors::{AppError, Result};
use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Render one node as a markdown vault file
pub fn format_node_markdown(node: &GraphNode) -> String {
    let mut lines: Vec<String> = vec!["---".to_string()];

    if !node.aliases.is_empty() {
        lines.push(format!("aliases: [{}]", node.aliases.join(", ")));
    }
    lines.push("---".to_string());
    lines.push(String::new());

    if let Some(content) = node.content.as_deref() {
        if !content.is_empty() {
            lines.push(content.to_string());
            lines.push(String::new());
        }
    }

    lines.join("\n")
}

/// Zip all nodes into one archive keyed `{concept_id}.md`
pub fn assemble_vault(nodes: &[GraphNode]) -> Result<Vec<u8>> {
    if nodes.is_empty() {
        return Err(AppError::Validation {
            message: "no nodes found for project export".to_string(),
        });
    }

    let mut buffer = Cursor::new(Vec::new());
    {
        let mut zip = ZipWriter::new(&mut buffer);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        for node in nodes {
            let filename = format!("{}.md", node.concept_id);
            let content = format_node_markdown(node);

            zip.start_file(filename, options)
                .map_err(|e| AppError::Internal {
                    message: format!("zip entry failed: {}", e),
                })?;
            zip.write_all(content.as_bytes())
                .map_err(|e| AppError::Internal {
                    message: format!("zip write failed: {}", e),
                })?;
        }

        zip.finish().map_err(|e| AppError::Internal {
            message: format!("zip finish failed: {}", e),
        })?;
    }

    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use uuid::Uuid;

    fn node(concept_id: &str, aliases: &[&str], content: Option<&str>) -> GraphNode {
        GraphNode {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            concept_id: concept_id.into(),
            content: content.map(String::from),
            aliases: aliases.iter().map(|s| s.to_string()).collect(),
            outbound_links: vec![],
            inbound_links: vec![],
            node_metadata: serde_json::json!({}),
            created_at: chrono::Utc::now().into(),
            updated_at: chrono::Utc::now().into(),
        }
    }

    #[test]
    fn test_frontmatter_with_aliases() {
        let md = format_node_markdown(&node(
            "neural network",
            &["neural net", "ann"],
            Some("a note body"),
        ));

        assert!(md.starts_with("---\naliases: [neural net, ann]\n---\n"));
        assert!(md.contains("a note body"));
    }

    #[test]
    fn test_frontmatter_omits_empty_aliases() {
        let md = format_node_markdown(&node("limit", &[], Some("body")));
        assert!(md.starts_with("---\n---\n"));
        assert!(!md.contains("aliases"));
    }

    #[test]
    fn test_vault_entries_named_by_concept_id() {
        let nodes = vec![
            node("limit", &[], Some("limit note")),
            node("chain rule", &[], Some("chain note")),
        ];

        let bytes = assemble_vault(&nodes).unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();

        let mut names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["chain rule.md", "limit.md"]);

        let mut entry = archive.by_name("limit.md").unwrap();
        let mut content = String::new();
        entry.read_to_string(&mut content).unwrap();
        assert!(content.contains("limit note"));
    }

    #[test]
    fn test_empty_vault_rejected() {
        assert!(assemble_vault(&[]).is_err());
    }
}
