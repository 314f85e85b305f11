//! DuckDB-backed chunk store.
//!
//! Persists chunks, their fixed-dimension embeddings, and per-file
//! processing state in an in-process analytic database with the `vss`
//! vector-search extension.
//!
//! # Schema
//!
//! | Table | Purpose |
//! |-------|---------|
//! | `meta` | key/value metadata; `embedding_dimension` binds `D` |
//! | `document_chunks` | chunk rows with an `embedding FLOAT[D]` column |
//! | `processed_files` | file path → content hash, for change detection |
//!
//! An HNSW index over `document_chunks.embedding` backs approximate
//! nearest-neighbor search; `hnsw_enable_experimental_persistence` is set
//! at open so file-backed databases keep the index across restarts.
//!
//! # Dimension contract
//!
//! `D` is resolved once per database: from `meta.embedding_dimension` when
//! present, otherwise from the caller's default, and then persisted. Every
//! stored vector has exactly `D` components. Rebinding `D` is a one-way
//! table rebuild and is refused once any embedding exists.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use duckdb::types::Value;
use duckdb::{params, Connection};
use tracing::warn;

use crate::error::RagError;
use crate::hash;
use crate::models::{Chunk, Document, FileInfo};

/// Handle to the embedded store. Cheap to clone; writers serialize on an
/// internal lock, readers share it.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    dimension: Arc<AtomicUsize>,
}

impl Store {
    /// Opens (or creates) a database and resolves the embedding dimension.
    ///
    /// An empty DSN opens an in-process ephemeral database. The stored
    /// dimension wins over `default_dimension` when they differ.
    pub fn open(dsn: &str, default_dimension: usize) -> Result<Self, RagError> {
        if default_dimension == 0 {
            return Err(RagError::InvalidInput(
                "embedding dimension must be positive".to_string(),
            ));
        }

        let conn = if dsn.is_empty() {
            Connection::open_in_memory()?
        } else {
            Connection::open(dsn)?
        };

        conn.execute_batch(
            "INSTALL vss; LOAD vss; SET hnsw_enable_experimental_persistence = true;",
        )?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS meta (key VARCHAR PRIMARY KEY, value VARCHAR NOT NULL);",
        )?;

        let dimension = match read_meta_dimension(&conn)? {
            Some(stored) => {
                if stored != default_dimension {
                    warn!(
                        stored,
                        requested = default_dimension,
                        "stored embedding dimension differs from requested default, using stored value"
                    );
                }
                stored
            }
            None => {
                conn.execute(
                    "INSERT INTO meta (key, value) VALUES ('embedding_dimension', ?)",
                    params![default_dimension.to_string()],
                )?;
                default_dimension
            }
        };

        create_chunk_tables(&conn, dimension)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            dimension: Arc::new(AtomicUsize::new(dimension)),
        })
    }

    /// The bound embedding dimension `D`.
    pub fn dimension(&self) -> usize {
        self.dimension.load(Ordering::SeqCst)
    }

    /// Rebinds the embedding dimension.
    ///
    /// Allowed only while no embeddings are stored: the chunk table is
    /// rebuilt with the new `FLOAT[D]` column (rows preserved, embeddings
    /// reset). With any embedding present this fails with
    /// [`RagError::DimensionLocked`].
    pub fn set_dimension(&self, dimension: usize) -> Result<(), RagError> {
        if dimension == 0 {
            return Err(RagError::InvalidInput(
                "embedding dimension must be positive".to_string(),
            ));
        }
        let current = self.dimension();
        if dimension == current {
            return Ok(());
        }

        let mut conn = self.conn();
        let embedded: i64 = conn.query_row(
            "SELECT COUNT(*) FROM document_chunks WHERE embedding IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        if embedded > 0 {
            return Err(RagError::DimensionLocked {
                stored: current,
                count: embedded as u64,
            });
        }

        let tx = conn.transaction()?;
        tx.execute_batch(&format!(
            "CREATE TABLE document_chunks_rebuild (
                id VARCHAR PRIMARY KEY,
                document_id VARCHAR,
                file_path VARCHAR,
                text VARCHAR,
                embedding FLOAT[{dimension}]
            );
            INSERT INTO document_chunks_rebuild (id, document_id, file_path, text)
                SELECT id, document_id, file_path, text FROM document_chunks;
            DROP TABLE document_chunks;
            ALTER TABLE document_chunks_rebuild RENAME TO document_chunks;"
        ))?;
        tx.execute(
            "UPDATE meta SET value = ? WHERE key = 'embedding_dimension'",
            params![dimension.to_string()],
        )?;
        tx.commit()?;

        conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS hnsw_idx ON document_chunks USING HNSW (embedding);",
        )?;

        self.dimension.store(dimension, Ordering::SeqCst);
        Ok(())
    }

    /// Inserts a document's chunks; on id conflict the text and linkage
    /// are refreshed and any existing embedding is preserved.
    pub fn upsert_chunks(&self, document: &Document) -> Result<usize, RagError> {
        if document.chunks.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO document_chunks (id, document_id, file_path, text)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT (id) DO UPDATE SET
                     text = excluded.text,
                     document_id = excluded.document_id,
                     file_path = excluded.file_path",
            )?;
            for chunk in &document.chunks {
                stmt.execute(params![
                    chunk.id,
                    chunk.document_id,
                    chunk.file_path,
                    chunk.text
                ])?;
            }
        }
        tx.commit()?;
        Ok(document.chunks.len())
    }

    /// Materializes chunks, optionally restricted to those without an
    /// embedding.
    pub fn scan_chunks(&self, only_empty: bool) -> Result<Vec<Chunk>, RagError> {
        let sql = if only_empty {
            "SELECT id, document_id, file_path, text, CAST(embedding AS FLOAT[])
             FROM document_chunks WHERE embedding IS NULL"
        } else {
            "SELECT id, document_id, file_path, text, CAST(embedding AS FLOAT[])
             FROM document_chunks"
        };

        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], chunk_from_row)?;
        let mut chunks = Vec::new();
        for row in rows {
            chunks.push(row?);
        }
        Ok(chunks)
    }

    /// Persists a vector for a chunk. The vector length must equal `D`.
    pub fn set_embedding(&self, chunk_id: &str, vector: &[f32]) -> Result<(), RagError> {
        let dimension = self.dimension();
        if vector.len() != dimension {
            return Err(RagError::DimensionMismatch {
                expected: dimension,
                actual: vector.len(),
            });
        }

        let conn = self.conn();
        conn.execute(
            &format!(
                "UPDATE document_chunks SET embedding = {} WHERE id = ?",
                vector_literal(vector, dimension)
            ),
            params![chunk_id],
        )?;
        Ok(())
    }

    /// Nearest-neighbor search: chunks ordered by ascending L2 distance
    /// to the query vector.
    pub fn query_ann(&self, vector: &[f32], limit: usize) -> Result<Vec<Chunk>, RagError> {
        let dimension = self.dimension();
        if vector.len() != dimension {
            return Err(RagError::DimensionMismatch {
                expected: dimension,
                actual: vector.len(),
            });
        }

        let literal = vector_literal(vector, dimension);
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT id, document_id, file_path, text, CAST(embedding AS FLOAT[])
             FROM document_chunks
             WHERE embedding IS NOT NULL
             ORDER BY array_distance(embedding, {literal})
             LIMIT ?"
        ))?;
        let rows = stmt.query_map(params![limit as i64], chunk_from_row)?;
        let mut chunks = Vec::new();
        for row in rows {
            chunks.push(row?);
        }
        Ok(chunks)
    }

    pub fn get_chunk(&self, id: &str) -> Result<Chunk, RagError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, document_id, file_path, text, CAST(embedding AS FLOAT[])
             FROM document_chunks WHERE id = ?",
        )?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(chunk_from_row(row)?),
            None => Err(RagError::NotFound(format!("chunk {id}"))),
        }
    }

    /// Enumerates chunks that cannot serve retrieval: missing embedding,
    /// empty text, a zero vector, or non-finite components.
    pub fn find_invalid<F: FnMut(&Chunk)>(&self, mut callback: F) -> Result<(), RagError> {
        let dimension = self.dimension();
        let zero = vector_literal(&vec![0.0; dimension], dimension);

        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT id, document_id, file_path, text, CAST(embedding AS FLOAT[])
             FROM document_chunks
             WHERE embedding IS NULL
                OR text = ''
                OR array_distance(embedding, {zero}) = 0
                OR NOT isfinite(array_distance(embedding, {zero}))"
        ))?;
        let rows = stmt.query_map([], chunk_from_row)?;
        for row in rows {
            callback(&row?);
        }
        Ok(())
    }

    pub fn delete_chunk(&self, id: &str) -> Result<(), RagError> {
        let conn = self.conn();
        conn.execute("DELETE FROM document_chunks WHERE id = ?", params![id])?;
        Ok(())
    }

    /// Deletes every chunk belonging to a document.
    pub fn remove_document_chunks(&self, document_id: &str) -> Result<usize, RagError> {
        let conn = self.conn();
        let n = conn.execute(
            "DELETE FROM document_chunks WHERE document_id = ?",
            params![document_id],
        )?;
        Ok(n)
    }

    /// The recorded content hash for a file, if it was ever processed.
    pub fn file_hash(&self, file_path: &str) -> Result<Option<String>, RagError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT file_hash FROM processed_files WHERE file_path = ?")?;
        let mut rows = stmt.query(params![file_path])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    /// Records (or refreshes) a file's content hash.
    pub fn mark_processed(&self, file_path: &str, file_hash: &str) -> Result<(), RagError> {
        let file_name = std::path::Path::new(file_path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_path.to_string());

        let conn = self.conn();
        conn.execute(
            "INSERT INTO processed_files (file_path, file_name, file_hash, processed_at)
             VALUES (?, ?, ?, CURRENT_TIMESTAMP)
             ON CONFLICT (file_path) DO UPDATE SET
                 file_name = excluded.file_name,
                 file_hash = excluded.file_hash,
                 processed_at = CURRENT_TIMESTAMP",
            params![file_path, file_name, file_hash],
        )?;
        Ok(())
    }

    /// Removes a file's tracking row and every chunk under its document id.
    pub fn remove_file(&self, file_path: &str) -> Result<(), RagError> {
        let document_id = hash::document_id(file_path);

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM document_chunks WHERE document_id = ?",
            params![document_id],
        )?;
        tx.execute(
            "DELETE FROM processed_files WHERE file_path = ?",
            params![file_path],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn all_processed_files(&self) -> Result<Vec<FileInfo>, RagError> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT file_path, file_name, file_hash FROM processed_files")?;
        let rows = stmt.query_map([], |row| {
            Ok(FileInfo {
                file_path: row.get(0)?,
                file_name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                file_hash: row.get(2)?,
            })
        })?;
        let mut files = Vec::new();
        for row in rows {
            files.push(row?);
        }
        Ok(files)
    }

    pub fn chunk_count(&self, only_empty: bool) -> Result<u64, RagError> {
        let sql = if only_empty {
            "SELECT COUNT(*) FROM document_chunks WHERE embedding IS NULL"
        } else {
            "SELECT COUNT(*) FROM document_chunks"
        };
        let conn = self.conn();
        let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
        Ok(n as u64)
    }

    pub fn ping(&self) -> Result<(), RagError> {
        let conn = self.conn();
        conn.query_row("SELECT 1", [], |row| row.get::<_, i32>(0))?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn read_meta_dimension(conn: &Connection) -> Result<Option<usize>, RagError> {
    let mut stmt = conn.prepare("SELECT value FROM meta WHERE key = 'embedding_dimension'")?;
    let mut rows = stmt.query([])?;
    match rows.next()? {
        Some(row) => {
            let value: String = row.get(0)?;
            let dimension = value.parse::<usize>().ok().filter(|d| *d > 0).ok_or_else(|| {
                RagError::InvalidInput(format!("corrupt embedding_dimension in meta: {value:?}"))
            })?;
            Ok(Some(dimension))
        }
        None => Ok(None),
    }
}

fn create_chunk_tables(conn: &Connection, dimension: usize) -> Result<(), RagError> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS document_chunks (
            id VARCHAR PRIMARY KEY,
            document_id VARCHAR,
            file_path VARCHAR,
            text VARCHAR,
            embedding FLOAT[{dimension}]
        );
        CREATE TABLE IF NOT EXISTS processed_files (
            file_path VARCHAR PRIMARY KEY,
            file_name VARCHAR,
            file_hash VARCHAR NOT NULL,
            processed_at TIMESTAMP DEFAULT current_timestamp
        );
        CREATE INDEX IF NOT EXISTS hnsw_idx ON document_chunks USING HNSW (embedding);"
    ))?;
    Ok(())
}

fn chunk_from_row(row: &duckdb::Row<'_>) -> duckdb::Result<Chunk> {
    let embedding: Value = row.get(4)?;
    Ok(Chunk {
        id: row.get(0)?,
        document_id: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        file_path: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        text: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        index: 0,
        embedding: value_to_embedding(embedding),
    })
}

fn value_to_embedding(value: Value) -> Option<Vec<f32>> {
    match value {
        Value::List(items) => Some(
            items
                .into_iter()
                .map(|item| match item {
                    Value::Float(f) => f,
                    Value::Double(d) => d as f32,
                    _ => 0.0,
                })
                .collect(),
        ),
        _ => None,
    }
}

/// Renders a vector as a typed SQL array literal.
///
/// DuckDB's client bindings cannot bind fixed-size array parameters, so
/// vectors travel inline. Non-finite components use the engine's quoted
/// special float literals.
fn vector_literal(vector: &[f32], dimension: usize) -> String {
    let mut s = String::with_capacity(vector.len() * 12 + 16);
    s.push('[');
    for (i, v) in vector.iter().enumerate() {
        if i > 0 {
            s.push(',');
        }
        if v.is_finite() {
            let _ = write!(s, "{v}");
        } else if v.is_nan() {
            s.push_str("'NaN'::FLOAT");
        } else if v.is_sign_positive() {
            s.push_str("'Infinity'::FLOAT");
        } else {
            s.push_str("'-Infinity'::FLOAT");
        }
    }
    let _ = write!(s, "]::FLOAT[{dimension}]");
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_text;

    fn chunk(text: &str, document_id: &str, file_path: &str) -> Chunk {
        Chunk {
            id: hash_text(text),
            document_id: document_id.to_string(),
            file_path: file_path.to_string(),
            text: text.to_string(),
            index: 0,
            embedding: None,
        }
    }

    fn doc(file_path: &str, texts: &[&str]) -> Document {
        let document_id = hash::document_id(file_path);
        Document {
            file_name: file_path.to_string(),
            file_path: file_path.to_string(),
            document_id: document_id.clone(),
            chunks: texts
                .iter()
                .map(|t| chunk(t, &document_id, file_path))
                .collect(),
        }
    }

    fn open_store() -> Store {
        Store::open("", 4).unwrap()
    }

    #[test]
    fn upsert_and_get_round_trip() {
        let store = open_store();
        let d = doc("a.md", &["first chunk", "second chunk"]);
        assert_eq!(store.upsert_chunks(&d).unwrap(), 2);

        let got = store.get_chunk(&d.chunks[0].id).unwrap();
        assert_eq!(got.text, "first chunk");
        assert_eq!(got.document_id, d.document_id);
        assert!(got.embedding.is_none());

        assert!(matches!(
            store.get_chunk("ffffffffffffffff"),
            Err(RagError::NotFound(_))
        ));
    }

    #[test]
    fn upsert_conflict_preserves_embedding() {
        let store = open_store();
        let d = doc("a.md", &["stable text"]);
        store.upsert_chunks(&d).unwrap();
        store
            .set_embedding(&d.chunks[0].id, &[0.1, 0.2, 0.3, 0.4])
            .unwrap();

        // Same content hash arriving from another path keeps the vector.
        let d2 = doc("b.md", &["stable text"]);
        store.upsert_chunks(&d2).unwrap();

        let got = store.get_chunk(&d.chunks[0].id).unwrap();
        assert_eq!(got.document_id, d2.document_id);
        assert_eq!(got.embedding.as_deref(), Some(&[0.1, 0.2, 0.3, 0.4][..]));
    }

    #[test]
    fn set_embedding_enforces_dimension() {
        let store = open_store();
        let d = doc("a.md", &["text"]);
        store.upsert_chunks(&d).unwrap();

        let err = store.set_embedding(&d.chunks[0].id, &[1.0, 2.0]).unwrap_err();
        assert!(matches!(
            err,
            RagError::DimensionMismatch {
                expected: 4,
                actual: 2
            }
        ));
    }

    #[test]
    fn dimension_rebind_allowed_only_before_embeddings() {
        let store = open_store();
        let d = doc("a.md", &["text"]);
        store.upsert_chunks(&d).unwrap();

        // No embeddings yet: rebind rebuilds the table and keeps rows.
        store.set_dimension(8).unwrap();
        assert_eq!(store.dimension(), 8);
        assert_eq!(store.chunk_count(false).unwrap(), 1);

        store
            .set_embedding(&d.chunks[0].id, &[0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0])
            .unwrap();
        assert!(matches!(
            store.set_dimension(16),
            Err(RagError::DimensionLocked { stored: 8, .. })
        ));
        // Rebinding to the current value stays a no-op.
        store.set_dimension(8).unwrap();
    }

    #[test]
    fn query_ann_orders_by_distance() {
        let store = open_store();
        let d = doc("a.md", &["near", "mid", "far"]);
        store.upsert_chunks(&d).unwrap();
        store
            .set_embedding(&d.chunks[0].id, &[1.0, 0.0, 0.0, 0.0])
            .unwrap();
        store
            .set_embedding(&d.chunks[1].id, &[0.0, 1.0, 0.0, 0.0])
            .unwrap();
        store
            .set_embedding(&d.chunks[2].id, &[0.0, 0.0, 5.0, 0.0])
            .unwrap();

        let hits = store.query_ann(&[1.0, 0.1, 0.0, 0.0], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "near");
        assert_eq!(hits[1].text, "mid");

        assert!(matches!(
            store.query_ann(&[1.0], 2),
            Err(RagError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn scan_chunks_only_empty_filters() {
        let store = open_store();
        let d = doc("a.md", &["one", "two"]);
        store.upsert_chunks(&d).unwrap();
        store
            .set_embedding(&d.chunks[0].id, &[0.5, 0.5, 0.5, 0.5])
            .unwrap();

        let empty = store.scan_chunks(true).unwrap();
        assert_eq!(empty.len(), 1);
        assert_eq!(empty[0].text, "two");
        assert_eq!(store.scan_chunks(false).unwrap().len(), 2);
    }

    #[test]
    fn find_invalid_flags_null_empty_and_zero() {
        let store = open_store();
        let d = doc("a.md", &["no vector", "zero vector", "ok"]);
        store.upsert_chunks(&d).unwrap();
        store
            .set_embedding(&d.chunks[1].id, &[0.0, 0.0, 0.0, 0.0])
            .unwrap();
        store
            .set_embedding(&d.chunks[2].id, &[0.3, 0.1, 0.2, 0.9])
            .unwrap();

        let mut invalid = Vec::new();
        store.find_invalid(|c| invalid.push(c.text.clone())).unwrap();
        invalid.sort();
        assert_eq!(invalid, vec!["no vector", "zero vector"]);
    }

    #[test]
    fn processed_files_track_and_remove() {
        let store = open_store();
        let d = doc("docs/a.md", &["chunk body"]);
        store.upsert_chunks(&d).unwrap();
        store.mark_processed("docs/a.md", "deadbeef").unwrap();

        assert_eq!(
            store.file_hash("docs/a.md").unwrap().as_deref(),
            Some("deadbeef")
        );
        assert_eq!(store.all_processed_files().unwrap().len(), 1);

        store.remove_file("docs/a.md").unwrap();
        assert!(store.file_hash("docs/a.md").unwrap().is_none());
        assert_eq!(store.chunk_count(false).unwrap(), 0);
    }

    #[test]
    fn delete_chunk_removes_row() {
        let store = open_store();
        let d = doc("a.md", &["bye"]);
        store.upsert_chunks(&d).unwrap();
        store.delete_chunk(&d.chunks[0].id).unwrap();
        assert!(store.get_chunk(&d.chunks[0].id).is_err());
    }
}
