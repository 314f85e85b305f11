use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::RagError;

/// Chunking strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Fixed,
    Semantic,
    Sentence,
    #[default]
    Adaptive,
}

/// Sentence segmenter language. `Auto` recognizes both ASCII and
/// full-width sentence terminators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Zh,
    En,
    #[default]
    Auto,
}

/// Chunker configuration.
///
/// Loaded from a JSON file where present; unknown keys are tolerated,
/// missing keys take defaults, and out-of-range values are clamped back
/// to their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Upper bound on chunk length, in characters.
    pub max_chunk_size: usize,
    /// Lower bound on chunk length, in characters.
    pub min_chunk_size: usize,
    /// Overlap between adjacent fixed-size chunks, in characters.
    pub overlap_size: usize,
    /// Maximum sentences per sentence-strategy chunk.
    pub sentence_window: usize,
    pub strategy: Strategy,
    pub language: Language,
    /// Respect Markdown headers as hard boundaries in the hybrid strategy.
    pub preserve_sections: bool,
    /// Reserved for semantic-merge variants.
    pub similarity_threshold: f64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 1000,
            min_chunk_size: 100,
            overlap_size: 50,
            sentence_window: 3,
            strategy: Strategy::Adaptive,
            language: Language::Auto,
            preserve_sections: true,
            similarity_threshold: 0.7,
        }
    }
}

impl ChunkingConfig {
    /// Clamps out-of-range values back to their defaults.
    pub fn clamp(mut self) -> Self {
        let d = ChunkingConfig::default();
        if self.max_chunk_size == 0 {
            self.max_chunk_size = d.max_chunk_size;
        }
        if self.min_chunk_size == 0 {
            self.min_chunk_size = d.min_chunk_size;
        }
        if self.sentence_window == 0 {
            self.sentence_window = d.sentence_window;
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            self.similarity_threshold = d.similarity_threshold;
        }
        self
    }
}

/// Loads a chunking config from a JSON file.
///
/// A missing path (or `None`) yields the defaults; a present but
/// malformed file is an error.
pub fn load_chunking_config(path: Option<&Path>) -> Result<ChunkingConfig, RagError> {
    let path = match path {
        Some(p) => p,
        None => return Ok(ChunkingConfig::default()),
    };
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(ChunkingConfig::default())
        }
        Err(e) => return Err(e.into()),
    };
    let config: ChunkingConfig = serde_json::from_str(&content)
        .map_err(|e| RagError::InvalidInput(format!("bad chunking config: {e}")))?;
    Ok(config.clamp())
}
