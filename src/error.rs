use thiserror::Error;

/// Errors surfaced by the mdrag core.
///
/// The embedding pool and the ingestion coordinator absorb per-chunk and
/// per-file failures internally (they log and continue); everything else
/// propagates one of these to the caller.
#[derive(Debug, Error)]
pub enum RagError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The embedding dimension is bound for the lifetime of the database
    /// once vectors exist; rebinding requires an empty embedding set.
    #[error("embedding dimension is locked to {stored}: {count} chunks already have embeddings")]
    DimensionLocked { stored: usize, count: u64 },

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("store error: {0}")]
    Store(#[from] duckdb::Error),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("no valid indices in model selection response")]
    RankingEmpty,

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for RagError {
    fn from(e: reqwest::Error) -> Self {
        RagError::Upstream(e.to_string())
    }
}
