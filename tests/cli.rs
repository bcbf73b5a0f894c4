use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn chatu_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("chatu");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let exports = root.join("exports");
    fs::create_dir_all(exports.join("claude")).unwrap();
    fs::create_dir_all(exports.join("chatgpt")).unwrap();

    fs::write(
        exports.join("claude/rust.json"),
        r#"{
  "provider": "claude",
  "externalThreadId": "c-1",
  "title": "Rust lifetimes",
  "sourcePath": "claude/rust.json",
  "turns": [
    {"turnIndex": 0, "role": "user", "content": "How do Rust lifetimes interact with the borrow checker?"},
    {"turnIndex": 1, "role": "assistant", "content": "Lifetimes describe how long borrows stay valid."}
  ]
}"#,
    )
    .unwrap();
    fs::write(
        exports.join("chatgpt/batch.json"),
        r#"[
  {"provider": "chatgpt", "title": "Borrowing in Rust", "sourcePath": "chatgpt/a.json",
   "turns": [{"turnIndex": 0, "role": "user", "content": "Explain the borrow checker in Rust"}]},
  {"provider": "chatgpt", "title": "Bread", "sourcePath": "chatgpt/b.json",
   "turns": [{"turnIndex": 0, "role": "user", "content": "Sourdough hydration ratios"}]}
]"#,
    )
    .unwrap();
    fs::write(exports.join("corrupt.json"), "{\"provider\": ").unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/chatu.sqlite"

[retrieval]
final_limit = 12

[logging]
level = "warn"
"#,
        root.display()
    );

    let config_path = config_dir.join("chatu.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_chatu(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = chatu_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run chatu binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn imported_env() -> (TempDir, PathBuf) {
    let (tmp, config_path) = setup_test_env();
    let exports = tmp.path().join("exports");
    run_chatu(&config_path, &["init"]);
    let (stdout, stderr, success) =
        run_chatu(&config_path, &["import", exports.to_str().unwrap()]);
    assert!(success, "import failed: stdout={}, stderr={}", stdout, stderr);
    (tmp, config_path)
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_chatu(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_chatu(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_chatu(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_import_reports_counts() {
    let (tmp, config_path) = setup_test_env();
    let exports = tmp.path().join("exports");

    run_chatu(&config_path, &["init"]);
    let (stdout, stderr, success) =
        run_chatu(&config_path, &["import", exports.to_str().unwrap()]);
    assert!(success, "import failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("status: completed"), "got: {}", stdout);
    assert!(stdout.contains("files scanned: 3"));
    assert!(stdout.contains("files quarantined: 1"));
    assert!(stdout.contains("chats ingested: 3"));
    assert!(stdout.contains("policy report:"));
    assert!(tmp.path().join("data/reports").is_dir());
}

#[test]
fn test_reimport_no_duplicates() {
    let (tmp, config_path) = imported_env();
    let exports = tmp.path().join("exports");

    run_chatu(&config_path, &["import", exports.to_str().unwrap()]);

    let (stdout, _, success) = run_chatu(&config_path, &["stats", "--json"]);
    assert!(success);
    let summary: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(summary["threads"], 3);
    assert_eq!(summary["providers"], 2);
    assert_eq!(summary["ingestRuns"], 2);
}

#[test]
fn test_chats_and_terms() {
    let (_tmp, config_path) = imported_env();

    let (stdout, _, success) = run_chatu(&config_path, &["chats", "chatgpt", "--json"]);
    assert!(success);
    let page: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(page["total"], 2);

    let (stdout, _, success) = run_chatu(&config_path, &["terms", "borrow"]);
    assert!(success);
    assert!(stdout.contains("borrow (in 2 threads)"), "got: {}", stdout);

    let (_, stderr, success) = run_chatu(&config_path, &["chats", "myspace"]);
    assert!(!success);
    assert!(stderr.contains("unknown provider"));
}

#[test]
fn test_parallel_after_reindex() {
    let (_tmp, config_path) = imported_env();

    let (stdout, stderr, success) = run_chatu(&config_path, &["reindex"]);
    assert!(success, "reindex failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("status: completed"));
    assert!(stdout.contains("threads: 3"));

    let (stdout, _, success) =
        run_chatu(&config_path, &["parallel", "--cross-provider", "--json"]);
    assert!(success);
    let page: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    // The two borrow-checker threads link both ways; the bread thread stays alone.
    assert_eq!(page["total"], 2);
    assert_eq!(page["items"][0]["edgeType"], "cooccurrence");
}

#[test]
fn test_search_requires_embeddings_without_fallback() {
    let (_tmp, config_path) = imported_env();

    let (_, stderr, success) = run_chatu(&config_path, &["search", "borrow checker"]);
    assert!(!success);
    assert!(stderr.contains("Embedding"), "got: {}", stderr);

    let (stdout, stderr, success) = run_chatu(
        &config_path,
        &["search", "borrow checker", "--keyword-fallback"],
    );
    assert!(success, "search failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Rust lifetimes"), "got: {}", stdout);
    assert!(stdout.contains("Borrowing in Rust"));
    assert!(!stdout.contains("Bread"));
}

#[test]
fn test_search_no_results() {
    let (_tmp, config_path) = imported_env();

    let (stdout, _, success) = run_chatu(
        &config_path,
        &["search", "xyzzyplugh", "--keyword-fallback"],
    );
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_embed_pending_requires_provider() {
    let (_tmp, config_path) = imported_env();

    let (_, stderr, success) = run_chatu(&config_path, &["embed", "pending"]);
    assert!(!success);
    assert!(stderr.contains("disabled"));
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_chatu(&tmp.path().join("nope.toml"), &["stats"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}
