//! Content and file hashing.
//!
//! Chunk ids are the hex-encoded 64-bit xxHash of the chunk text, so the
//! same text always maps to the same row. File hashes use the same digest
//! over the raw bytes and drive change detection in the ingestion
//! coordinator. Document ids combine the path hash with the base filename,
//! which keeps a document's identity stable across content edits.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use xxhash_rust::xxh64::Xxh64;

use crate::error::RagError;

/// Hex-encoded xxh64 of a string.
pub fn hash_text(s: &str) -> String {
    let mut h = Xxh64::new(0);
    h.update(s.as_bytes());
    format!("{:016x}", h.digest())
}

/// Streaming xxh64 of a file's bytes.
///
/// Returns an empty string when the file does not exist — the coordinator
/// reads that as "deleted". Any other I/O error is propagated.
pub fn hash_file(path: impl AsRef<Path>) -> Result<String, RagError> {
    let mut file = match File::open(path.as_ref()) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(String::new()),
        Err(e) => return Err(e.into()),
    };

    let mut h = Xxh64::new(0);
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        h.update(&buf[..n]);
    }
    Ok(format!("{:016x}", h.digest()))
}

/// Document id for a source file: `hex(xxh64(path)) + ":" + basename`.
pub fn document_id(file_path: &str) -> String {
    let base = Path::new(file_path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_path.to_string());
    format!("{}:{}", hash_text(file_path), base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_text_stable() {
        let a = hash_text("Hello world.");
        let b = hash_text("Hello world.");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert_ne!(a, hash_text("Hello world!"));
    }

    #[test]
    fn hash_file_missing_is_empty() {
        let h = hash_file("/no/such/file.md").unwrap();
        assert_eq!(h, "");
    }

    #[test]
    fn hash_file_matches_text_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.md");
        std::fs::write(&path, "hello rag").unwrap();
        assert_eq!(hash_file(&path).unwrap(), hash_text("hello rag"));
    }

    #[test]
    fn document_id_embeds_basename() {
        let id = document_id("docs/guide.md");
        assert!(id.ends_with(":guide.md"));
        assert_eq!(id, document_id("docs/guide.md"));
        assert_ne!(id, document_id("other/guide.md"));
    }
}
