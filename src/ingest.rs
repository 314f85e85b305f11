//! Ingestion pipeline orchestration.
//!
//! Coordinates the full update flow: walk the corpus, diff against the
//! `processed_files` table, chunk and upsert changed files, sweep deleted
//! ones, then fill missing embeddings.
//!
//! # Update pipeline
//!
//! 1. **Enumerate** — walk the root recursively and collect regular files
//!    whose base name matches the glob (default `*.md`).
//! 2. **Reconcile** — scan `processed_files`: rows whose path left the
//!    candidate set are re-examined (reprocessed if the file still exists,
//!    swept if it is gone); candidate files are hashed and enqueued when
//!    new or changed. `--force` skips the diff and enqueues everything.
//! 3. **Replace** — per enqueued file: read, chunk, delete the document's
//!    old chunks, upsert the fresh set, record the new hash. Chunks that
//!    carry the same content hash keep their embeddings through the
//!    upsert.
//! 4. **Embed** — run the embedding pool over chunks without vectors.
//!
//! Per-file failures are logged and do not abort the run.

use std::collections::HashSet;
use std::path::Path;

use globset::Glob;
use tracing::{error, info};
use walkdir::WalkDir;

use crate::chunker::Chunker;
use crate::client::EmbeddingApi;
use crate::embed::{self, CancelFlag, EmbedStats};
use crate::error::RagError;
use crate::hash;
use crate::models::FileInfo;
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::store::Store;

/// Options for one update run.
#[derive(Debug, Clone)]
pub struct UpdateOptions {
    /// Base-name glob for corpus files.
    pub glob: String,
    /// Embedding pool size.
    pub workers: usize,
    /// Reprocess every candidate regardless of recorded hashes.
    pub force: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            glob: "*.md".to_string(),
            workers: 3,
            force: false,
        }
    }
}

/// Counters for one update run.
#[derive(Debug, Default, Clone, Copy)]
pub struct UpdateStats {
    pub scanned: usize,
    pub processed: usize,
    pub skipped: usize,
    pub removed: usize,
    pub failed: usize,
    pub embed: EmbedStats,
}

/// Reconciles the on-disk corpus under `root` with the store and fills
/// missing embeddings.
pub async fn run_update(
    store: &Store,
    embedder: &dyn EmbeddingApi,
    chunker: &Chunker,
    root: &Path,
    options: &UpdateOptions,
    cancel: &CancelFlag,
    progress: &dyn ProgressReporter,
) -> Result<UpdateStats, RagError> {
    let candidates = enumerate(root, &options.glob)?;
    info!(total_files = candidates.len(), "found corpus files");

    let mut stats = UpdateStats {
        scanned: candidates.len(),
        ..Default::default()
    };

    let to_process = find_files_to_process(store, &candidates, options.force, &mut stats)?;

    for file in &to_process {
        if cancel.is_cancelled() {
            return Err(RagError::Cancelled);
        }
        match process_file(store, chunker, file) {
            Ok(Processed::Replaced { chunks }) => {
                stats.processed += 1;
                progress.report(ProgressEvent::FileProcessed {
                    path: file.file_path.clone(),
                    chunks,
                });
            }
            Ok(Processed::Deleted) => {
                stats.removed += 1;
                info!(file = %file.file_path, "removed deleted file from store");
            }
            Err(e) => {
                stats.failed += 1;
                error!(file = %file.file_path, error = %e, "failed to process file");
            }
        }
    }

    info!(
        processed = stats.processed,
        skipped = stats.skipped,
        removed = stats.removed,
        failed = stats.failed,
        "file processing completed"
    );

    if stats.processed > 0 {
        stats.embed =
            embed::compute_embeddings(store, embedder, true, options.workers, cancel, progress)
                .await?;
    }

    Ok(stats)
}

/// Walks the corpus and collects files whose base name matches the glob.
fn enumerate(root: &Path, glob: &str) -> Result<Vec<String>, RagError> {
    let matcher = Glob::new(glob)
        .map_err(|e| RagError::InvalidInput(format!("bad glob {glob:?}: {e}")))?
        .compile_matcher();

    let mut candidates = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                error!(error = %e, "walk error, skipping entry");
                continue;
            }
        };
        if entry.file_type().is_file() && matcher.is_match(entry.file_name()) {
            candidates.push(entry.path().to_string_lossy().into_owned());
        }
    }
    Ok(candidates)
}

/// The change diff: decides which files need (re)processing and counts
/// unchanged ones.
///
/// Stale `processed_files` rows (path no longer in the candidate set) are
/// enqueued too; [`process_file`] resolves them to a removal when the
/// file is gone from disk. A hashing error other than not-found logs and
/// skips the file for this run.
fn find_files_to_process(
    store: &Store,
    candidates: &[String],
    force: bool,
    stats: &mut UpdateStats,
) -> Result<Vec<FileInfo>, RagError> {
    let mut to_process = Vec::new();

    if force {
        for path in candidates {
            match hash::hash_file(path) {
                Ok(file_hash) => to_process.push(file_info(path, file_hash)),
                Err(e) => {
                    stats.failed += 1;
                    error!(file = %path, error = %e, "failed to hash file");
                }
            }
        }
        return Ok(to_process);
    }

    let candidate_set: HashSet<&str> = candidates.iter().map(String::as_str).collect();

    for row in store.all_processed_files()? {
        if !candidate_set.contains(row.file_path.as_str()) {
            to_process.push(row);
        }
    }

    for path in candidates {
        let file_hash = match hash::hash_file(path) {
            Ok(h) => h,
            Err(e) => {
                stats.failed += 1;
                error!(file = %path, error = %e, "failed to hash file");
                continue;
            }
        };
        match store.file_hash(path)? {
            Some(stored) if stored == file_hash && !file_hash.is_empty() => {
                stats.skipped += 1;
            }
            _ => to_process.push(file_info(path, file_hash)),
        }
    }

    Ok(to_process)
}

enum Processed {
    Replaced { chunks: usize },
    Deleted,
}

/// Replaces one file's chunks in the store, or sweeps it when the file
/// no longer exists.
fn process_file(store: &Store, chunker: &Chunker, file: &FileInfo) -> Result<Processed, RagError> {
    let current_hash = hash::hash_file(&file.file_path)?;
    if current_hash.is_empty() {
        store.remove_file(&file.file_path)?;
        return Ok(Processed::Deleted);
    }

    let content = std::fs::read_to_string(&file.file_path)?;
    let doc = chunker.chunk(&content, &file.file_path)?;

    // Old chunks go first so a shrinking chunk set leaves no orphans.
    store.remove_document_chunks(&doc.document_id)?;
    let chunks = store.upsert_chunks(&doc)?;
    store.mark_processed(&file.file_path, &current_hash)?;

    Ok(Processed::Replaced { chunks })
}

fn file_info(path: &str, file_hash: String) -> FileInfo {
    FileInfo {
        file_path: path.to_string(),
        file_name: Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string()),
        file_hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::EmbeddingApi;
    use crate::config::ChunkingConfig;
    use crate::progress::NoProgress;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEmbedding(AtomicUsize);

    #[async_trait]
    impl EmbeddingApi for CountingEmbedding {
        fn model(&self) -> &str {
            "counting"
        }
        async fn embed(&self, _text: &str, dimensions: usize) -> Result<Vec<f32>, RagError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(vec![0.5; dimensions])
        }
    }

    fn corpus(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, body) in files {
            std::fs::write(dir.path().join(name), body).unwrap();
        }
        dir
    }

    async fn update(
        store: &Store,
        embedder: &dyn EmbeddingApi,
        root: &Path,
    ) -> UpdateStats {
        let chunker = Chunker::new(ChunkingConfig {
            min_chunk_size: 1,
            ..ChunkingConfig::default()
        });
        run_update(
            store,
            embedder,
            &chunker,
            root,
            &UpdateOptions::default(),
            &CancelFlag::new(),
            &NoProgress,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn update_is_idempotent() {
        let dir = corpus(&[("a.md", "Alpha document body."), ("b.md", "Beta document body.")]);
        let store = Store::open("", 4).unwrap();
        let embedder = CountingEmbedding(AtomicUsize::new(0));

        let first = update(&store, &embedder, dir.path()).await;
        assert_eq!(first.processed, 2);
        assert_eq!(first.skipped, 0);
        let calls_after_first = embedder.0.load(Ordering::SeqCst);
        assert!(calls_after_first > 0);

        // Second run over an unchanged tree: no upserts, no embedding calls.
        let second = update(&store, &embedder, dir.path()).await;
        assert_eq!(second.processed, 0);
        assert_eq!(second.skipped, 2);
        assert_eq!(embedder.0.load(Ordering::SeqCst), calls_after_first);
    }

    #[tokio::test]
    async fn changed_file_is_replaced() {
        let dir = corpus(&[("a.md", "Original body."), ("b.md", "Untouched body.")]);
        let store = Store::open("", 4).unwrap();
        let embedder = CountingEmbedding(AtomicUsize::new(0));

        update(&store, &embedder, dir.path()).await;
        let a_path = dir.path().join("a.md").to_string_lossy().into_owned();
        let b_path = dir.path().join("b.md").to_string_lossy().into_owned();
        let a_hash = store.file_hash(&a_path).unwrap().unwrap();
        let b_hash = store.file_hash(&b_path).unwrap().unwrap();

        std::fs::write(dir.path().join("a.md"), "Rewritten body.").unwrap();
        let stats = update(&store, &embedder, dir.path()).await;

        assert_eq!(stats.processed, 1);
        assert_eq!(stats.skipped, 1);
        assert_ne!(store.file_hash(&a_path).unwrap().unwrap(), a_hash);
        assert_eq!(store.file_hash(&b_path).unwrap().unwrap(), b_hash);

        // The old chunk text is gone, the new one is present.
        let all = store.scan_chunks(false).unwrap();
        assert!(all.iter().any(|c| c.text == "Rewritten body."));
        assert!(!all.iter().any(|c| c.text == "Original body."));
    }

    #[tokio::test]
    async fn removed_file_is_swept() {
        let dir = corpus(&[("a.md", "Doomed body."), ("b.md", "Survivor body.")]);
        let store = Store::open("", 4).unwrap();
        let embedder = CountingEmbedding(AtomicUsize::new(0));

        update(&store, &embedder, dir.path()).await;
        assert_eq!(store.all_processed_files().unwrap().len(), 2);

        let a_path = dir.path().join("a.md");
        let doomed_id = hash::document_id(&a_path.to_string_lossy());
        std::fs::remove_file(&a_path).unwrap();

        let stats = update(&store, &embedder, dir.path()).await;
        assert_eq!(stats.removed, 1);
        assert_eq!(store.all_processed_files().unwrap().len(), 1);
        let residual = store
            .scan_chunks(false)
            .unwrap()
            .into_iter()
            .filter(|c| c.document_id == doomed_id)
            .count();
        assert_eq!(residual, 0);
    }

    #[tokio::test]
    async fn force_reprocesses_unchanged_files() {
        let dir = corpus(&[("a.md", "Stable body.")]);
        let store = Store::open("", 4).unwrap();
        let embedder = CountingEmbedding(AtomicUsize::new(0));

        update(&store, &embedder, dir.path()).await;

        let chunker = Chunker::new(ChunkingConfig {
            min_chunk_size: 1,
            ..ChunkingConfig::default()
        });
        let stats = run_update(
            &store,
            &embedder,
            &chunker,
            dir.path(),
            &UpdateOptions {
                force: true,
                ..UpdateOptions::default()
            },
            &CancelFlag::new(),
            &NoProgress,
        )
        .await
        .unwrap();

        assert_eq!(stats.processed, 1);
        assert_eq!(stats.skipped, 0);
    }

    #[tokio::test]
    async fn glob_filters_candidates() {
        let dir = corpus(&[("a.md", "Markdown body."), ("b.txt", "Plain text body.")]);
        let store = Store::open("", 4).unwrap();
        let embedder = CountingEmbedding(AtomicUsize::new(0));

        let stats = update(&store, &embedder, dir.path()).await;
        assert_eq!(stats.scanned, 1);
        assert_eq!(stats.processed, 1);
    }
}
