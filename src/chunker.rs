//! Document chunker.
//!
//! Splits normalized Markdown text into ordered [`Chunk`]s under one of
//! four strategies:
//!
//! - **fixed** — sliding character window with overlap, cut back to the
//!   nearest sentence boundary.
//! - **sentence** — greedy sentence accumulation bounded by size and a
//!   sentence window.
//! - **semantic** — greedy paragraph accumulation at blank-line
//!   boundaries; oversized paragraphs are re-split by sentence.
//! - **adaptive** (default) — picks single-chunk / sentence / semantic /
//!   header-aware hybrid by document length.
//!
//! All strategies operate on preprocessed text ([`preprocess`]), measure
//! length in characters, and emit chunks whose ids are derived from their
//! normalized text by [`Document::fix`].

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::config::{ChunkingConfig, Language, Strategy};
use crate::error::RagError;
use crate::models::{Chunk, Document};

fn horizontal_ws_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\S\n]+").unwrap())
}

fn extra_newlines_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").unwrap())
}

fn header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // ATX headers and Setext underlines.
    RE.get_or_init(|| Regex::new(r"(?m)^#{1,6}\s+.+$|^.+\n[=-]+\s*$").unwrap())
}

/// Normalizes raw document text before chunking.
///
/// Strips `U+0000`, normalizes CR/LF to LF, collapses runs of horizontal
/// whitespace to a single space, collapses three or more newlines to a
/// blank line, and trims. Idempotent.
pub fn preprocess(text: &str) -> String {
    let text = text.replace('\u{0000}', "");
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let text = horizontal_ws_re().replace_all(&text, " ");
    let text = extra_newlines_re().replace_all(&text, "\n\n");
    text.trim().to_string()
}

/// Strategy-driven document chunker.
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self {
            config: config.clamp(),
        }
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Chunks one document and assigns ids.
    ///
    /// Fails with `InvalidInput` when the text is empty after
    /// preprocessing.
    pub fn chunk(&self, content: &str, file_path: &str) -> Result<Document, RagError> {
        let content = preprocess(content);
        if content.is_empty() {
            return Err(RagError::InvalidInput(
                "document text is empty after preprocessing".to_string(),
            ));
        }

        let texts = match self.config.strategy {
            Strategy::Fixed => self.fixed_chunking(&content),
            Strategy::Semantic => self.semantic_chunking(&content),
            Strategy::Sentence => self.sentence_chunking(&content),
            Strategy::Adaptive => self.adaptive_chunking(&content),
        };

        let file_path = file_path.to_string();
        let file_name = Path::new(&file_path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_path.clone());

        let mut doc = Document {
            file_name,
            file_path,
            document_id: String::new(),
            chunks: texts
                .into_iter()
                .map(|text| Chunk {
                    id: String::new(),
                    document_id: String::new(),
                    file_path: String::new(),
                    text,
                    index: 0,
                    embedding: None,
                })
                .collect(),
        };
        doc.fix();
        Ok(doc)
    }

    fn is_sentence_boundary(&self, c: char) -> bool {
        if c == '\n' {
            return true;
        }
        match self.config.language {
            Language::En => matches!(c, '.' | '!' | '?'),
            Language::Zh => matches!(c, '。' | '！' | '？'),
            Language::Auto => matches!(c, '.' | '!' | '?' | '。' | '！' | '？'),
        }
    }

    /// Sliding window of `max_chunk_size` characters, cut back to the
    /// nearest sentence boundary, advancing by `max - overlap`.
    fn fixed_chunking(&self, content: &str) -> Vec<String> {
        let runes: Vec<char> = content.chars().collect();
        let total = runes.len();
        let max = self.config.max_chunk_size;
        let min = self.config.min_chunk_size;
        let mut chunks = Vec::new();

        let mut i = 0;
        while i < total {
            let mut end = (i + max).min(total);

            if end < total {
                let mut j = end;
                while j > i + min && j > i {
                    if self.is_sentence_boundary(runes[j]) {
                        end = j + 1;
                        break;
                    }
                    j -= 1;
                }
            }

            let text: String = runes[i..end].iter().collect();
            let text = text.trim().to_string();
            if text.chars().count() >= min {
                chunks.push(text);
            }

            // A window reaching the text end covers everything that is
            // left; stepping back by the overlap would only re-emit a
            // contained tail.
            if end >= total {
                break;
            }
            let next = end.saturating_sub(self.config.overlap_size);
            i = if next <= i { i + 1 } else { next };
        }

        chunks
    }

    /// Greedy sentence accumulation bounded by size and sentence window.
    fn sentence_chunking(&self, content: &str) -> Vec<String> {
        let max = self.config.max_chunk_size;
        let min = self.config.min_chunk_size;
        let window = self.config.sentence_window;

        let mut chunks = Vec::new();
        let mut current = String::new();
        let mut count = 0usize;

        for sentence in self.split_sentences(content) {
            let potential = if current.is_empty() {
                sentence.clone()
            } else {
                format!("{current} {sentence}")
            };

            if potential.chars().count() > max || count >= window {
                if !current.is_empty() && current.chars().count() >= min {
                    chunks.push(current.trim().to_string());
                }
                current = sentence;
                count = 1;
            } else {
                current = potential;
                count += 1;
            }
        }

        if !current.is_empty() && current.chars().count() >= min {
            chunks.push(current.trim().to_string());
        }
        chunks
    }

    /// Greedy paragraph accumulation at blank-line boundaries.
    fn semantic_chunking(&self, content: &str) -> Vec<String> {
        let max = self.config.max_chunk_size;
        let min = self.config.min_chunk_size;

        let mut chunks = Vec::new();
        let mut current = String::new();

        for paragraph in split_paragraphs(content) {
            if paragraph.chars().count() > max {
                if !current.is_empty() {
                    chunks.push(current.trim().to_string());
                    current.clear();
                }
                chunks.extend(self.split_long_paragraph(paragraph));
                continue;
            }

            let potential = if current.is_empty() {
                paragraph.to_string()
            } else {
                format!("{current}\n\n{paragraph}")
            };

            if potential.chars().count() > max {
                if !current.is_empty() {
                    chunks.push(current.trim().to_string());
                }
                current = paragraph.to_string();
            } else {
                current = potential;
            }
        }

        if !current.is_empty() && current.chars().count() >= min {
            chunks.push(current.trim().to_string());
        }
        chunks
    }

    /// Length-dispatched strategy selection.
    fn adaptive_chunking(&self, content: &str) -> Vec<String> {
        match content.chars().count() {
            0..=499 => vec![content.to_string()],
            500..=1999 => self.sentence_chunking(content),
            2000..=9999 => self.semantic_chunking(content),
            _ => self.hybrid_chunking(content),
        }
    }

    /// Header-aware chunking for long documents: sections that fit become
    /// chunks, oversized sections fall back to the semantic strategy.
    fn hybrid_chunking(&self, content: &str) -> Vec<String> {
        if !self.config.preserve_sections {
            return self.semantic_chunking(content);
        }

        let max = self.config.max_chunk_size;
        let min = self.config.min_chunk_size;
        let mut chunks = Vec::new();

        for section in self.split_sections(content) {
            let len = section.chars().count();
            if len <= max {
                if len >= min {
                    chunks.push(section.trim().to_string());
                }
            } else {
                chunks.extend(self.semantic_chunking(&section));
            }
        }
        chunks
    }

    /// Re-splits a paragraph that alone exceeds the size bound.
    fn split_long_paragraph(&self, paragraph: &str) -> Vec<String> {
        let max = self.config.max_chunk_size;
        let min = self.config.min_chunk_size;

        let mut chunks = Vec::new();
        let mut current = String::new();

        for sentence in self.split_sentences(paragraph) {
            let potential = if current.is_empty() {
                sentence.clone()
            } else {
                format!("{current} {sentence}")
            };

            if potential.chars().count() > max {
                if !current.is_empty() && current.chars().count() >= min {
                    chunks.push(current.trim().to_string());
                }
                current = sentence;
            } else {
                current = potential;
            }
        }

        if !current.is_empty() && current.chars().count() >= min {
            chunks.push(current.trim().to_string());
        }
        chunks
    }

    fn split_sentences(&self, content: &str) -> Vec<String> {
        let mut sentences = Vec::new();
        let mut current = String::new();

        for c in content.chars() {
            current.push(c);
            if self.is_sentence_boundary(c) {
                let trimmed = current.trim();
                if !trimmed.is_empty() {
                    sentences.push(trimmed.to_string());
                }
                current.clear();
            }
        }

        let trimmed = current.trim();
        if !trimmed.is_empty() {
            sentences.push(trimmed.to_string());
        }
        sentences
    }

    /// Splits at ATX/Setext headers; text before the first header is its
    /// own section. Falls back to paragraphs when no header is present.
    fn split_sections(&self, content: &str) -> Vec<String> {
        let starts: Vec<usize> = header_re().find_iter(content).map(|m| m.start()).collect();
        if starts.is_empty() {
            return split_paragraphs(content)
                .into_iter()
                .map(|p| p.to_string())
                .collect();
        }

        let mut boundaries = Vec::with_capacity(starts.len() + 1);
        if starts[0] != 0 {
            boundaries.push(0);
        }
        boundaries.extend(starts);

        let mut sections = Vec::new();
        for (k, &start) in boundaries.iter().enumerate() {
            let end = boundaries.get(k + 1).copied().unwrap_or(content.len());
            let section = content[start..end].trim();
            if !section.is_empty() {
                sections.push(section.to_string());
            }
        }
        sections
    }
}

fn split_paragraphs(content: &str) -> Vec<&str> {
    content
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}
