//! Core data models.
//!
//! These types flow through the ingestion and retrieval pipeline:
//!
//! ```text
//! file → chunk() → Document { Chunk, ... } → upsert → Store
//!                                                └── embed() fills Chunk.embedding
//! query → retrieve → Vec<Chunk> → rerank → answer
//! ```
//!
//! A [`Chunk`] is content-addressed: its `id` is the xxh64 of its
//! normalized text, so re-ingesting unchanged text is a no-op upsert.
//! A [`Document`] is the transient, ordered chunk list produced from one
//! source file; it is persisted only through its chunks.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::hash;

/// A bounded fragment of a document's preprocessed text.
///
/// `index` is the 0-based position within the document's emitted sequence;
/// it is informational only and not persisted in the store. `embedding`
/// is filled by the embedding pool and always has the store's bound
/// dimension when present.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    /// Source path, carried in the store but not in the chunk-file
    /// format (the enclosing document records it once).
    #[serde(default, skip_serializing)]
    pub file_path: String,
    pub text: String,
    #[serde(default)]
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Chunk {
    /// Normalizes the text and re-derives the content id and parent linkage.
    fn fix(&mut self, document_id: &str, file_path: &str) {
        self.text = self.text.replace('\u{0000}', "").trim().to_string();
        self.id = hash::hash_text(&self.text);
        self.document_id = document_id.to_string();
        self.file_path = file_path.to_string();
    }
}

/// The ordered chunk list produced from a single source file.
///
/// Serialized as the `*.md.chunks.json` interchange format (pretty-printed,
/// ids populated). Unknown fields are rejected on read so a stray file is
/// caught early instead of half-imported.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Document {
    pub file_name: String,
    #[serde(default)]
    pub file_path: String,
    #[serde(default)]
    pub document_id: String,
    pub chunks: Vec<Chunk>,
}

impl Document {
    /// Re-derives the document id and every chunk's id and linkage.
    ///
    /// The document id is path-based; when no path was recorded the file
    /// name is resolved to an absolute path so two scans of the same file
    /// agree.
    pub fn fix(&mut self) {
        if self.file_path.is_empty() && !self.file_name.is_empty() {
            self.file_path = std::path::absolute(&self.file_name)
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_else(|_| self.file_name.clone());
        }
        self.document_id = hash::document_id(&self.file_path);
        for (i, chunk) in self.chunks.iter_mut().enumerate() {
            chunk.fix(&self.document_id, &self.file_path);
            chunk.index = i;
        }
    }

    /// Reads a chunk file written by [`Document::write_chunks_file`].
    pub fn read_chunks_file(path: impl AsRef<Path>) -> Result<Self, crate::error::RagError> {
        let buf = std::fs::read_to_string(path)?;
        serde_json::from_str(&buf)
            .map_err(|e| crate::error::RagError::InvalidInput(format!("bad chunk file: {e}")))
    }

    /// Writes the document as pretty-printed JSON.
    pub fn write_chunks_file(&self, path: impl AsRef<Path>) -> Result<(), crate::error::RagError> {
        let data = serde_json::to_string_pretty(self)
            .map_err(|e| crate::error::RagError::InvalidInput(e.to_string()))?;
        std::fs::write(path, data)?;
        Ok(())
    }
}

/// A row of the `processed_files` tracking table.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub file_path: String,
    pub file_name: String,
    pub file_hash: String,
}

/// Parameters for the two-stage ask pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskParameter {
    pub query: String,
    pub retrieval_limit: usize,
    pub selected_limit: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_chunk(text: &str) -> Chunk {
        Chunk {
            id: String::new(),
            document_id: String::new(),
            file_path: String::new(),
            text: text.to_string(),
            index: 0,
            embedding: None,
        }
    }

    #[test]
    fn fix_assigns_content_ids() {
        let mut doc = Document {
            file_name: "a.md".to_string(),
            file_path: "docs/a.md".to_string(),
            document_id: String::new(),
            chunks: vec![bare_chunk("  hello\u{0000} world  "), bare_chunk("second")],
        };
        doc.fix();

        assert_eq!(doc.document_id, hash::document_id("docs/a.md"));
        assert_eq!(doc.chunks[0].text, "hello world");
        assert_eq!(doc.chunks[0].id, hash::hash_text("hello world"));
        assert_eq!(doc.chunks[0].document_id, doc.document_id);
        assert_eq!(doc.chunks[1].index, 1);
    }

    #[test]
    fn chunk_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.md.chunks.json");

        let mut doc = Document {
            file_name: "a.md".to_string(),
            file_path: "docs/a.md".to_string(),
            document_id: String::new(),
            chunks: vec![bare_chunk("hello world")],
        };
        doc.fix();
        doc.write_chunks_file(&path).unwrap();

        let loaded = Document::read_chunks_file(&path).unwrap();
        assert_eq!(loaded.document_id, doc.document_id);
        assert_eq!(loaded.chunks.len(), 1);
        assert_eq!(loaded.chunks[0].id, doc.chunks[0].id);
    }

    #[test]
    fn chunk_file_rejects_unknown_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.chunks.json");
        std::fs::write(&path, r#"{"file_name":"a.md","chunks":[],"surprise":1}"#).unwrap();
        assert!(Document::read_chunks_file(&path).is_err());
    }
}
