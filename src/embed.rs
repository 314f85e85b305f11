//! Bounded-parallel embedding computation.
//!
//! A producer drains the candidate chunk scan while up to `workers`
//! concurrent tasks call the embedding endpoint, one chunk each. Per-chunk
//! failures are logged and never abort the run; the final embedding set is
//! the union of all successful writes, observable afterwards via
//! [`Store::find_invalid`] and the returned counters.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use tracing::error;

use crate::client::EmbeddingApi;
use crate::error::RagError;
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::store::Store;

/// Cooperative cancellation flag, checked at chunk boundaries. In-flight
/// endpoint calls are allowed to drain.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Counters for one embedding run.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmbedStats {
    pub embedded: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// Fills embeddings for candidate chunks.
///
/// With `only_empty` the scan is restricted to chunks without a vector
/// and chunks that somehow already carry one are counted as skipped;
/// without it every chunk is recomputed. No ordering between workers is
/// guaranteed.
pub async fn compute_embeddings(
    store: &Store,
    embedder: &dyn EmbeddingApi,
    only_empty: bool,
    workers: usize,
    cancel: &CancelFlag,
    progress: &dyn ProgressReporter,
) -> Result<EmbedStats, RagError> {
    let chunks = store.scan_chunks(only_empty)?;
    let dimension = store.dimension();

    let embedded = AtomicU64::new(0);
    let skipped = AtomicU64::new(0);
    let failed = AtomicU64::new(0);
    let handled = AtomicU64::new(0);

    stream::iter(chunks)
        .for_each_concurrent(workers.max(1), |chunk| {
            let embedded = &embedded;
            let skipped = &skipped;
            let failed = &failed;
            let handled = &handled;
            async move {
                if cancel.is_cancelled() {
                    return;
                }

                if chunk.text.is_empty() || (only_empty && chunk.embedding.is_some()) {
                    skipped.fetch_add(1, Ordering::Relaxed);
                    progress.report(ProgressEvent::EmbeddingTick {
                        done: handled.fetch_add(1, Ordering::Relaxed) + 1,
                    });
                    return;
                }

                match embedder.embed(&chunk.text, dimension).await {
                    Ok(vector) => match store.set_embedding(&chunk.id, &vector) {
                        Ok(()) => {
                            embedded.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            error!(chunk_id = %chunk.id, error = %e, "persist embedding");
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    },
                    Err(e) => {
                        error!(chunk_id = %chunk.id, error = %e, "compute embedding");
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
                progress.report(ProgressEvent::EmbeddingTick {
                    done: handled.fetch_add(1, Ordering::Relaxed) + 1,
                });
            }
        })
        .await;

    if cancel.is_cancelled() {
        return Err(RagError::Cancelled);
    }

    Ok(EmbedStats {
        embedded: embedded.into_inner(),
        skipped: skipped.into_inner(),
        failed: failed.into_inner(),
    })
}
