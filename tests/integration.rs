use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;

fn mdrag_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("mdrag");
    path
}

fn run_mdrag(args: &[&str]) -> (String, String, bool) {
    let binary = mdrag_binary();
    let output = Command::new(&binary)
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run mdrag binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn write_corpus_file(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    path
}

#[test]
fn chunk_writes_chunks_json() {
    let tmp = TempDir::new().unwrap();
    let input = write_corpus_file(tmp.path(), "hello.md", "Hello world.");

    let (stdout, stderr, success) = run_mdrag(&["chunk", input.to_str().unwrap()]);
    assert!(success, "chunk failed: stdout={stdout}, stderr={stderr}");
    assert!(stdout.contains("Successfully chunked document"));
    assert!(stdout.contains("(1 chunks)"));

    let output = tmp.path().join("hello.md.chunks.json");
    assert!(output.exists());

    let doc: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(doc["file_name"], "hello.md");
    assert!(doc["document_id"].as_str().unwrap().ends_with(":hello.md"));

    let chunks = doc["chunks"].as_array().unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0]["text"], "Hello world.");
    assert_eq!(chunks[0]["index"], 0);
    assert_eq!(chunks[0]["document_id"], doc["document_id"]);
    // No embedding yet, so the key is omitted entirely.
    assert!(chunks[0].get("embedding").is_none());
}

#[test]
fn chunk_sentence_strategy_flags() {
    let tmp = TempDir::new().unwrap();
    let input = write_corpus_file(tmp.path(), "s.md", "A. B. C. D. E.");
    let output = tmp.path().join("out.json");

    let (stdout, stderr, success) = run_mdrag(&[
        "chunk",
        input.to_str().unwrap(),
        "-o",
        output.to_str().unwrap(),
        "--strategy",
        "sentence",
        "--min-size",
        "1",
    ]);
    assert!(success, "chunk failed: stdout={stdout}, stderr={stderr}");

    let doc: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
    let texts: Vec<&str> = doc["chunks"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["text"].as_str().unwrap())
        .collect();
    assert_eq!(texts, vec!["A. B. C.", "D. E."]);
}

#[test]
fn chunk_honors_config_file() {
    let tmp = TempDir::new().unwrap();
    let input = write_corpus_file(tmp.path(), "s.md", "A. B. C. D. E.");
    let config = write_corpus_file(
        tmp.path(),
        "chunking.json",
        r#"{"strategy": "sentence", "sentence_window": 2, "min_chunk_size": 1}"#,
    );
    let output = tmp.path().join("out.json");

    let (stdout, stderr, success) = run_mdrag(&[
        "chunk",
        input.to_str().unwrap(),
        "-o",
        output.to_str().unwrap(),
        "-c",
        config.to_str().unwrap(),
    ]);
    assert!(success, "chunk failed: stdout={stdout}, stderr={stderr}");

    let doc: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
    let texts: Vec<&str> = doc["chunks"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["text"].as_str().unwrap())
        .collect();
    assert_eq!(texts, vec!["A. B.", "C. D.", "E."]);
}

#[test]
fn chunk_missing_input_fails() {
    let (_stdout, _stderr, success) = run_mdrag(&["chunk", "/no/such/input.md"]);
    assert!(!success);
}

#[test]
fn chunk_rejects_unknown_strategy() {
    let tmp = TempDir::new().unwrap();
    let input = write_corpus_file(tmp.path(), "a.md", "text");
    let (_stdout, stderr, success) =
        run_mdrag(&["chunk", input.to_str().unwrap(), "--strategy", "mystery"]);
    assert!(!success);
    assert!(stderr.contains("unknown strategy"));
}

#[test]
fn chunk_ids_stable_across_invocations() {
    let tmp = TempDir::new().unwrap();
    let input = write_corpus_file(tmp.path(), "stable.md", "Hello world.");
    let out_a = tmp.path().join("a.json");
    let out_b = tmp.path().join("b.json");

    for out in [&out_a, &out_b] {
        let (_stdout, _stderr, success) = run_mdrag(&[
            "chunk",
            input.to_str().unwrap(),
            "-o",
            out.to_str().unwrap(),
        ]);
        assert!(success);
    }

    let a: serde_json::Value = serde_json::from_str(&fs::read_to_string(&out_a).unwrap()).unwrap();
    let b: serde_json::Value = serde_json::from_str(&fs::read_to_string(&out_b).unwrap()).unwrap();
    assert_eq!(a["chunks"][0]["id"], b["chunks"][0]["id"]);
    assert_eq!(a["document_id"], b["document_id"]);
}
