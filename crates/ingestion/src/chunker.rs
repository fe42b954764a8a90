//! Recursive markdown splitter
//!
//! Splits markdown into chunks while respecting document structure: first
//! at headers (carrying the header stack as metadata), then oversized
//! sections by blank-line paragraphs, then oversized paragraphs by
//! sentences. Ordering, greediness, and the paragraph-to-sentence cascade
//! are part of the contract - the fixtures below depend on them.

use graphvault_common::db::models::ChunkMetadata;
use regex_lite::Regex;
use std::sync::OnceLock;

/// Splitter configuration
#[derive(Debug, Clone)]
pub struct SplitterConfig {
    /// Target chunk size in characters
    pub chunk_size: usize,
    /// Accepted for compatibility; windowed overlap is not applied
    pub chunk_overlap: usize,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

/// A text chunk with its header-path metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    pub metadata: ChunkMetadata,
}

struct Section {
    text: String,
    headers: Vec<String>,
}

pub struct RecursiveMarkdownSplitter {
    config: SplitterConfig,
}

fn header_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(#{1,6})\s+(.+)$").expect("static regex"))
}

impl RecursiveMarkdownSplitter {
    pub fn new(config: SplitterConfig) -> Self {
        Self { config }
    }

    /// Split text into chunks preserving hierarchy
    pub fn split(&self, text: &str) -> Vec<Chunk> {
        let sections = self.split_by_headers(text);

        let mut final_chunks = Vec::new();
        for section in sections {
            if section.text.chars().count() <= self.config.chunk_size {
                final_chunks.push(Chunk {
                    text: section.text,
                    metadata: ChunkMetadata {
                        headers: section.headers,
                    },
                });
            } else {
                final_chunks.extend(self.recursive_split(&section.text, &section.headers));
            }
        }

        final_chunks
    }

    /// Parse content into sections based on markdown headers. A header at
    /// level L truncates the stack to L-1 titles before pushing its own.
    fn split_by_headers(&self, text: &str) -> Vec<Section> {
        let mut sections = Vec::new();
        let mut current_headers: Vec<String> = Vec::new();
        let mut current_buffer: Vec<&str> = Vec::new();

        for line in text.split('\n') {
            if let Some(captures) = header_pattern().captures(line) {
                // flush buffer with the previous header context
                if !current_buffer.is_empty() {
                    let content = current_buffer.join("\n").trim().to_string();
                    if !content.is_empty() {
                        sections.push(Section {
                            text: content,
                            headers: current_headers.clone(),
                        });
                    }
                    current_buffer.clear();
                }

                // maintain hierarchy: truncate deeper levels
                let level = captures.get(1).map(|m| m.as_str().len()).unwrap_or(1);
                let title = captures
                    .get(2)
                    .map(|m| m.as_str().trim().to_string())
                    .unwrap_or_default();

                if current_headers.len() >= level {
                    current_headers.truncate(level - 1);
                }
                current_headers.push(title);
                current_buffer.push(line);
            } else {
                current_buffer.push(line);
            }
        }

        // flush remaining
        if !current_buffer.is_empty() {
            let content = current_buffer.join("\n").trim().to_string();
            if !content.is_empty() {
                sections.push(Section {
                    text: content,
                    headers: current_headers,
                });
            }
        }

        sections
    }

    /// Split large text blocks by paragraph, then by sentence
    fn recursive_split(&self, text: &str, headers: &[String]) -> Vec<Chunk> {
        let chunk_size = self.config.chunk_size;
        let metadata = ChunkMetadata {
            headers: headers.to_vec(),
        };

        let blank_lines = Regex::new(r"\n\n+").expect("static regex");
        let paragraphs: Vec<&str> = blank_lines.split(text).collect();

        let mut chunks: Vec<Chunk> = Vec::new();
        let mut current_chunk: Vec<&str> = Vec::new();
        let mut current_len = 0usize;

        let emit = |chunks: &mut Vec<Chunk>, parts: &[&str]| {
            chunks.push(Chunk {
                text: parts.join("\n\n"),
                metadata: metadata.clone(),
            });
        };

        for para in paragraphs {
            let para_len = para.chars().count();

            if para_len > chunk_size {
                // flush whatever was being packed
                if !current_chunk.is_empty() {
                    emit(&mut chunks, &current_chunk);
                    current_chunk.clear();
                    current_len = 0;
                }

                // split the oversized paragraph by sentences, packing
                // greedily
                let sentences = split_sentences(para);
                let mut sent_buffer: Vec<&str> = Vec::new();
                let mut sent_len = 0usize;

                for sent in sentences {
                    let len = sent.chars().count();
                    if sent_len + len > chunk_size {
                        if !sent_buffer.is_empty() {
                            chunks.push(Chunk {
                                text: sent_buffer.join(" "),
                                metadata: metadata.clone(),
                            });
                        }
                        sent_buffer = vec![sent];
                        sent_len = len;
                    } else {
                        sent_buffer.push(sent);
                        sent_len += len;
                    }
                }

                if !sent_buffer.is_empty() {
                    chunks.push(Chunk {
                        text: sent_buffer.join(" "),
                        metadata: metadata.clone(),
                    });
                }
            } else if current_len + para_len + 2 > chunk_size {
                emit(&mut chunks, &current_chunk);
                current_chunk = vec![para];
                current_len = para_len;
            } else {
                current_chunk.push(para);
                current_len += para_len + 2;
            }
        }

        // final flush
        if !current_chunk.is_empty() {
            emit(&mut chunks, &current_chunk);
        }

        chunks
    }
}

impl Default for RecursiveMarkdownSplitter {
    fn default() -> Self {
        Self::new(SplitterConfig::default())
    }
}

/// Split at whitespace following sentence-ending punctuation. The
/// terminator stays with its sentence; the whitespace is consumed.
fn split_sentences(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        let b = bytes[i];
        if (b == b'.' || b == b'!' || b == b'?')
            && i + 1 < bytes.len()
            && (bytes[i + 1] as char).is_ascii_whitespace()
        {
            sentences.push(&text[start..=i]);
            // consume the whitespace run
            let mut j = i + 1;
            while j < bytes.len() && (bytes[j] as char).is_ascii_whitespace() {
                j += 1;
            }
            start = j;
            i = j;
        } else {
            i += 1;
        }
    }

    if start < text.len() {
        sentences.push(&text[start..]);
    }

    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    fn splitter(chunk_size: usize) -> RecursiveMarkdownSplitter {
        RecursiveMarkdownSplitter::new(SplitterConfig {
            chunk_size,
            chunk_overlap: 0,
        })
    }

    #[test]
    fn test_header_stack_metadata() {
        let text = "# Calculus\n\nintro text\n\n## Limits\n\nlimit text\n\n### One-Sided\n\nsided text\n\n## Derivatives\n\nderiv text";
        let chunks = RecursiveMarkdownSplitter::default().split(text);

        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].metadata.headers, vec!["Calculus"]);
        assert_eq!(chunks[1].metadata.headers, vec!["Calculus", "Limits"]);
        assert_eq!(
            chunks[2].metadata.headers,
            vec!["Calculus", "Limits", "One-Sided"]
        );
        // a level-2 header truncates back past the level-3 entry
        assert_eq!(chunks[3].metadata.headers, vec!["Calculus", "Derivatives"]);
    }

    #[test]
    fn test_small_sections_stay_whole() {
        let text = "# Intro\n\nnothing.";
        let chunks = RecursiveMarkdownSplitter::default().split(text);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "# Intro\n\nnothing.");
        assert_eq!(chunks[0].metadata.headers, vec!["Intro"]);
    }

    #[test]
    fn test_paragraph_packing_is_greedy() {
        // paragraphs of 40 chars; chunk_size 100 fits two (40 + 2 + 40)
        let para = "x".repeat(40);
        let text = format!("{p}\n\n{p}\n\n{p}\n\n{p}\n\n{p}", p = para);

        let chunks = splitter(100).split(&text);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text, format!("{p}\n\n{p}", p = para));
        assert_eq!(chunks[1].text, format!("{p}\n\n{p}", p = para));
        assert_eq!(chunks[2].text, para);
    }

    #[test]
    fn test_sentence_cascade_for_huge_paragraph() {
        let sentence = "This sentence has exactly forty characs.";
        assert_eq!(sentence.chars().count(), 40);
        let para = [sentence; 5].join(" ");

        let chunks = splitter(100).split(&para);
        // 40+40 fits under 100, a third would not
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text, format!("{s} {s}", s = sentence));
        assert_eq!(chunks[2].text, sentence);
    }

    #[test]
    fn test_sentence_chunks_inherit_section_headers() {
        let long_para = "A sentence here. ".repeat(100);
        let text = format!("## Methods\n\n{}", long_para.trim());

        let chunks = RecursiveMarkdownSplitter::default().split(&text);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert_eq!(chunk.metadata.headers, vec!["Methods"]);
        }
    }

    #[test]
    fn test_concatenation_preserves_characters() {
        // for inputs whose sections all fit the chunk size, the chunk
        // concatenation carries the same non-whitespace character sequence
        let text = "# A\n\nalpha beta gamma\n\n## B\n\ndelta epsilon";
        let chunks = RecursiveMarkdownSplitter::default().split(text);

        let strip = |s: &str| s.chars().filter(|c| !c.is_whitespace()).collect::<String>();
        let joined: String = chunks.iter().map(|c| strip(&c.text)).collect();
        assert_eq!(joined, strip(text));
    }

    #[test]
    fn test_empty_input() {
        let chunks = RecursiveMarkdownSplitter::default().split("");
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_split_sentences() {
        assert_eq!(
            split_sentences("One. Two! Three? Four"),
            vec!["One.", "Two!", "Three?", "Four"]
        );
        // no terminator-whitespace pair means no split
        assert_eq!(split_sentences("e.g.test"), vec!["e.g.test"]);
    }
}
