//! PDF to markdown extraction
//!
//! Extracts text content from PDF bytes using lopdf and renders it as
//! markdown: heading levels inferred from font-size jumps, bullets
//! normalized to `- `, tab-aligned runs rendered as pipe table rows.
//!
//! Cleanup rules run in a fixed order (tests depend on it):
//! hyphen-newline joins, space-run collapse, newline cap at 2, bullet
//! mapping, replacement-character strip, trailing-whitespace trim.

use crate::errors::IngestionError;
use regex_lite::Regex;
use tracing::{debug, warn};

/// A line of text with the font size it was set in
#[derive(Debug, Clone)]
struct TextLine {
    size: f32,
    text: String,
}

/// Extract markdown content from PDF bytes
pub fn extract_markdown(bytes: &[u8]) -> Result<String, IngestionError> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| IngestionError::PdfParse {
        message: format!("Failed to load PDF: {}", e),
    })?;

    let pages = doc.get_pages();
    debug!(page_count = pages.len(), "Extracting text from PDF");

    let mut lines: Vec<TextLine> = Vec::new();

    for (page_num, page_id) in pages.iter() {
        match doc.get_page_content(*page_id) {
            Ok(content) => {
                lines.extend(extract_lines_from_content(&content));
            }
            Err(e) => {
                warn!(page = page_num, error = %e, "Failed to read page content, skipping");
            }
        }
    }

    if lines.iter().all(|l| l.text.trim().is_empty()) {
        return Err(IngestionError::EmptyDocument);
    }

    let markdown = render_markdown(&lines);
    let cleaned = clean_markdown(&markdown);

    debug!(
        lines = lines.len(),
        output_len = cleaned.len(),
        "PDF extraction complete"
    );

    Ok(cleaned)
}

/// Walk a content stream and collect text lines with their font size.
/// Text between BT and ET belongs to one block; the Tf operator carries
/// the active font size.
fn extract_lines_from_content(content: &[u8]) -> Vec<TextLine> {
    let content_str = String::from_utf8_lossy(content);
    let mut lines = Vec::new();

    let mut in_text_block = false;
    let mut current_size = 0.0f32;
    let mut current_text = String::new();

    for line in content_str.lines() {
        let trimmed = line.trim();

        if trimmed == "BT" {
            in_text_block = true;
            continue;
        }

        if trimmed == "ET" {
            in_text_block = false;
            if !current_text.trim().is_empty() {
                lines.push(TextLine {
                    size: current_size,
                    text: std::mem::take(&mut current_text),
                });
            } else {
                current_text.clear();
            }
            continue;
        }

        if in_text_block {
            if let Some(size) = parse_font_size(trimmed) {
                current_size = size;
            }
            if let Some(text) = extract_text_from_operator(trimmed) {
                if !current_text.is_empty() {
                    current_text.push(' ');
                }
                current_text.push_str(&text);
            }
        }
    }

    lines
}

/// Parse "/F1 24 Tf" into the size operand
fn parse_font_size(line: &str) -> Option<f32> {
    if !line.ends_with("Tf") {
        return None;
    }
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() >= 3 {
        parts[parts.len() - 2].parse().ok()
    } else {
        None
    }
}

/// Extract text from a PDF text-showing operator
fn extract_text_from_operator(line: &str) -> Option<String> {
    // Handle (text) Tj operator
    if line.ends_with("Tj") || line.ends_with('\'') || line.ends_with('"') {
        if let Some(start) = line.find('(') {
            if let Some(end) = line.rfind(')') {
                if start < end {
                    let text = &line[start + 1..end];
                    return Some(decode_pdf_string(text));
                }
            }
        }
    }

    // Handle [(text) num (text) num] TJ operator (array of text)
    if line.ends_with("TJ") {
        let mut result = String::new();
        let mut in_paren = false;
        let mut current = String::new();

        for ch in line.chars() {
            match ch {
                '(' if !in_paren => {
                    in_paren = true;
                }
                ')' if in_paren => {
                    in_paren = false;
                    result.push_str(&decode_pdf_string(&current));
                    current.clear();
                }
                _ if in_paren => {
                    current.push(ch);
                }
                _ => {}
            }
        }

        if !result.is_empty() {
            return Some(result);
        }
    }

    None
}

/// Decode PDF string escapes
fn decode_pdf_string(s: &str) -> String {
    let mut result = String::new();
    let mut chars = s.chars();

    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some('n') => result.push('\n'),
                Some('r') => result.push('\r'),
                Some('t') => result.push('\t'),
                Some('\\') => result.push('\\'),
                Some('(') => result.push('('),
                Some(')') => result.push(')'),
                Some(c) => result.push(c),
                None => {}
            }
        } else {
            result.push(ch);
        }
    }

    result
}

/// Render collected lines as markdown. Heading levels come from font-size
/// jumps relative to the dominant body size.
fn render_markdown(lines: &[TextLine]) -> String {
    let body_size = dominant_size(lines);
    let mut out = String::new();

    for line in lines {
        let text = line.text.trim();
        if text.is_empty() {
            continue;
        }

        let rendered = if body_size > 0.0 && line.size >= body_size * 1.5 {
            format!("# {}", text)
        } else if body_size > 0.0 && line.size >= body_size * 1.15 {
            format!("## {}", text)
        } else if let Some(row) = render_table_row(text) {
            row
        } else if is_bullet(text) {
            format!("- {}", strip_bullet(text))
        } else {
            text.to_string()
        };

        out.push_str(&rendered);
        out.push('\n');
        out.push('\n');
    }

    out
}

/// The most common font size carries the body text
fn dominant_size(lines: &[TextLine]) -> f32 {
    use std::collections::HashMap;

    let mut counts: HashMap<i64, usize> = HashMap::new();
    for line in lines {
        if line.size > 0.0 {
            // tenth-of-a-point buckets
            *counts.entry((line.size * 10.0).round() as i64).or_default() += 1;
        }
    }

    counts
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .map(|(bucket, _)| bucket as f32 / 10.0)
        .unwrap_or(0.0)
}

fn is_bullet(text: &str) -> bool {
    text.starts_with("• ")
        || text.starts_with("· ")
        || text.starts_with("* ")
        || text.starts_with("- ")
}

fn strip_bullet(text: &str) -> &str {
    text.trim_start_matches("• ")
        .trim_start_matches("· ")
        .trim_start_matches("* ")
        .trim_start_matches("- ")
}

/// Tab-separated runs with at least three cells become a pipe table row
fn render_table_row(text: &str) -> Option<String> {
    let cells: Vec<&str> = text
        .split('\t')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .collect();

    if cells.len() >= 3 {
        Some(format!("| {} |", cells.join(" | ")))
    } else {
        None
    }
}

/// Post-processing rules, applied in order
pub fn clean_markdown(text: &str) -> String {
    // 1. join words broken by hyphen-newline: "foo-\nbar" -> "foobar"
    let hyphen_break = Regex::new(r"(\w)-\n(\w)").expect("static regex");
    let mut out = hyphen_break.replace_all(text, "$1$2").to_string();

    // 2. collapse runs of spaces
    let space_runs = Regex::new(r"[ \t]{2,}").expect("static regex");
    out = space_runs.replace_all(&out, " ").to_string();

    // 3. cap consecutive newlines at 2
    let newline_runs = Regex::new(r"\n{3,}").expect("static regex");
    out = newline_runs.replace_all(&out, "\n\n").to_string();

    // 4. normalize bullets
    out = out.replace("• ", "- ");

    // 5. strip the Unicode replacement character
    out = out.replace('\u{FFFD}', "");

    // trailing whitespace: per line and at the end
    let trimmed: Vec<&str> = out.lines().map(str::trim_end).collect();
    trimmed.join("\n").trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_pdf_string() {
        assert_eq!(decode_pdf_string("Hello\\nWorld"), "Hello\nWorld");
        assert_eq!(decode_pdf_string("Test\\(paren\\)"), "Test(paren)");
    }

    #[test]
    fn test_operator_extraction() {
        assert_eq!(
            extract_text_from_operator("(Hello World) Tj").as_deref(),
            Some("Hello World")
        );
        assert_eq!(
            extract_text_from_operator("[(Hel) -20 (lo)] TJ").as_deref(),
            Some("Hello")
        );
        assert!(extract_text_from_operator("1 0 0 1 50 700 Tm").is_none());
    }

    #[test]
    fn test_font_size_parsing() {
        assert_eq!(parse_font_size("/F1 24 Tf"), Some(24.0));
        assert_eq!(parse_font_size("/Helv 9.5 Tf"), Some(9.5));
        assert_eq!(parse_font_size("BT"), None);
    }

    #[test]
    fn test_heading_render_from_font_jump() {
        let lines = vec![
            TextLine { size: 24.0, text: "Introduction".into() },
            TextLine { size: 10.0, text: "Body text one.".into() },
            TextLine { size: 10.0, text: "Body text two.".into() },
            TextLine { size: 12.0, text: "A Subsection".into() },
        ];

        let md = render_markdown(&lines);
        assert!(md.contains("# Introduction"));
        assert!(md.contains("## A Subsection"));
        assert!(md.contains("Body text one."));
    }

    #[test]
    fn test_clean_hyphen_breaks() {
        assert_eq!(clean_markdown("transfor-\nmation"), "transformation");
        // a list dash at line start is not a hyphen break
        assert_eq!(clean_markdown("- item\n- item2"), "- item\n- item2");
    }

    #[test]
    fn test_clean_space_and_newline_runs() {
        assert_eq!(clean_markdown("a    b"), "a b");
        assert_eq!(clean_markdown("a\n\n\n\n\nb"), "a\n\nb");
    }

    #[test]
    fn test_clean_bullets_and_replacement_char() {
        assert_eq!(clean_markdown("• first\n• second"), "- first\n- second");
        assert_eq!(clean_markdown("bro\u{FFFD}ken"), "broken");
    }

    #[test]
    fn test_clean_trailing_whitespace() {
        assert_eq!(clean_markdown("line one   \nline two\n\n\n"), "line one\nline two");
    }

    #[test]
    fn test_table_row() {
        assert_eq!(
            render_table_row("name\tsize\tcount").as_deref(),
            Some("| name | size | count |")
        );
        assert!(render_table_row("just\ttwo").is_none());
    }
}
