//! Markdown repair for generated study notes
//!
//! Safe, non-destructive fixes for the markdown the model actually emits:
//! fence unwrapping, self-link normalization, HTML super/subscript to
//! LaTeX, hallucinated-link stripping, delimiter balancing, whitespace
//! hygiene. Applied in a fixed order.

use regex_lite::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

fn wiki_link() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[\[([^\]]+)\]\]").expect("static regex"))
}

/// Repair common LLM markdown issues in a study note.
/// `valid_concept_ids`: when provided, any `[[x]]` whose `x` is not in the
/// set is converted to plain text (prevents links to concepts that do not
/// exist in the graph).
pub fn repair_note_markdown(text: &str, valid_concept_ids: Option<&HashSet<String>>) -> String {
    if text.trim().is_empty() {
        return text.to_string();
    }

    let mut out = text.trim().to_string();

    // unwrap if the model wrapped the whole note in a code fence
    for opener in ["```markdown", "```md", "```"] {
        if let Some(rest) = out.strip_prefix(opener) {
            if rest.starts_with('\n') || rest.starts_with("\r\n") {
                out = rest.trim_start().to_string();
                break;
            }
        }
    }
    if out.ends_with("```") {
        out = out[..out.len() - 3].trim_end().to_string();
    }

    // normalize [text](text) -> [[text]] so wiki-link parsing works
    let self_link = Regex::new(r"\[([^\]]+)\]\(([^)]+)\)").expect("static regex");
    out = self_link
        .replace_all(&out, |caps: &regex_lite::Captures| {
            if caps[1] == caps[2] {
                format!("[[{}]]", &caps[1])
            } else {
                caps[0].to_string()
            }
        })
        .to_string();

    // convert html superscript/subscript to latex
    // (e.g. r<sup>3</sup> -> $r^{3}$, h<sub>0</sub> -> $h_{0}$)
    let sup = Regex::new(r"([^<\s]*)<sup>([^<]+)</sup>").expect("static regex");
    out = sup.replace_all(&out, "$$${1}^{${2}}$$").to_string();
    let sub = Regex::new(r"([^<\s]*)<sub>([^<]+)</sub>").expect("static regex");
    out = sub.replace_all(&out, "$$${1}_{${2}}$$").to_string();

    // strip invalid [[concept]] links (hallucinated concepts not in graph)
    if let Some(valid) = valid_concept_ids {
        let valid_lower: HashSet<String> = valid.iter().map(|c| c.to_lowercase()).collect();
        out = wiki_link()
            .replace_all(&out, |caps: &regex_lite::Captures| {
                let concept = caps[1].trim();
                if valid_lower.contains(&concept.to_lowercase()) {
                    caps[0].to_string()
                } else {
                    concept.to_string()
                }
            })
            .to_string();
    }

    // fix isolated delimiters that break rendering: remove the last stray
    // occurrence of each
    if out.matches('$').count() % 2 == 1 {
        out = remove_last(&out, "$");
    }
    if out.matches("```").count() % 2 == 1 {
        out = remove_last(&out, "```");
    }
    if out.matches('`').count() % 2 == 1 {
        out = remove_last(&out, "`");
    }
    if out.matches("**").count() % 2 == 1 {
        out = remove_last(&out, "**");
    }

    // normalize excessive newlines (keep max 2 consecutive)
    let newline_runs = Regex::new(r"\n{3,}").expect("static regex");
    out = newline_runs.replace_all(&out, "\n\n").to_string();

    // fix list items missing a space after the marker: "-word" -> "- word"
    let list_marker = Regex::new(r"(?m)^(\s*)([-*])([^\s*\-])").expect("static regex");
    out = list_marker.replace_all(&out, "$1$2 $3").to_string();

    // fix numbered lists: "1.word" -> "1. word"
    let numbered = Regex::new(r"(?m)^(\s*)(\d+)\.([^\s\d])").expect("static regex");
    out = numbered.replace_all(&out, "$1$2. $3").to_string();

    // trim each line, drop leading/trailing blank lines
    let lines: Vec<&str> = out.lines().map(str::trim_end).collect();
    let start = lines.iter().position(|l| !l.trim().is_empty()).unwrap_or(0);
    let end = lines
        .iter()
        .rposition(|l| !l.trim().is_empty())
        .map(|i| i + 1)
        .unwrap_or(lines.len());

    lines[start..end].join("\n")
}

/// Append a `## related` section listing outbound links that the note body
/// does not mention (case-insensitive).
pub fn append_missing_links(note: &str, outbound_links: &[String]) -> String {
    let haystack = note.to_lowercase();
    let missing: Vec<&String> = outbound_links
        .iter()
        .filter(|link| !haystack.contains(&link.to_lowercase()))
        .collect();

    if missing.is_empty() {
        return note.to_string();
    }

    let mut out = note.trim_end().to_string();
    out.push_str("\n\n## related\n");
    for link in missing {
        out.push_str(&format!("- [[{}]]\n", link));
    }
    out.trim_end().to_string()
}

fn remove_last(text: &str, pattern: &str) -> String {
    match text.rfind(pattern) {
        Some(idx) => {
            let mut out = String::with_capacity(text.len());
            out.push_str(&text[..idx]);
            out.push_str(&text[idx + pattern.len()..]);
            out
        }
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_fence_unwrap() {
        let note = "```markdown\nthe note body\n```";
        assert_eq!(repair_note_markdown(note, None), "the note body");
    }

    #[test]
    fn test_self_link_normalization() {
        let note = "see [limit](limit) and [a link](https://example.com)";
        let repaired = repair_note_markdown(note, None);
        assert!(repaired.contains("[[limit]]"));
        // real links with differing text and target are untouched
        assert!(repaired.contains("[a link](https://example.com)"));
    }

    #[test]
    fn test_sup_sub_to_latex() {
        assert_eq!(repair_note_markdown("r<sup>3</sup>", None), "$r^{3}$");
        assert_eq!(repair_note_markdown("h<sub>0</sub>", None), "$h_{0}$");
    }

    #[test]
    fn test_invalid_links_stripped() {
        let note = "[[nonexistent]] and [[known]]";
        let repaired = repair_note_markdown(note, Some(&valid(&["known"])));
        assert_eq!(repaired, "nonexistent and [[known]]");
    }

    #[test]
    fn test_link_validation_is_case_insensitive() {
        let note = "[[Known]]";
        let repaired = repair_note_markdown(note, Some(&valid(&["known"])));
        assert_eq!(repaired, "[[Known]]");
    }

    #[test]
    fn test_delimiter_balancing() {
        let repaired = repair_note_markdown("odd $math and **bold** plus `code", None);
        assert_eq!(repaired.matches('$').count() % 2, 0);
        assert_eq!(repaired.matches('`').count() % 2, 0);
        assert_eq!(repaired.matches("**").count() % 2, 0);
    }

    #[test]
    fn test_newline_cap_and_list_spacing() {
        let note = "-item one\n\n\n\n1.numbered";
        let repaired = repair_note_markdown(note, None);
        assert_eq!(repaired, "- item one\n\n1. numbered");
    }

    #[test]
    fn test_line_trimming() {
        let note = "\n\nfirst line   \nsecond\n\n\n";
        assert_eq!(repair_note_markdown(note, None), "first line\nsecond");
    }

    #[test]
    fn test_append_missing_links() {
        let note = "mentions [[known]] only";
        let out = append_missing_links(note, &["known".into(), "also known".into()]);
        assert!(out.contains("## related"));
        assert!(out.contains("- [[also known]]"));
        // present links are not repeated
        assert_eq!(out.matches("[[known]]").count(), 1);
    }

    #[test]
    fn test_no_related_section_when_all_present() {
        let note = "mentions [[a]] and [[b]]";
        let out = append_missing_links(note, &["a".into(), "b".into()]);
        assert!(!out.contains("## related"));
    }

    #[test]
    fn test_empty_note_passthrough() {
        assert_eq!(repair_note_markdown("   ", None), "   ");
    }
}
