use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn forge_memory_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("forge-memory");
    path
}

fn setup_project() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let mem = tmp.path().join(".forge/memory");
    fs::create_dir_all(mem.join("agents")).unwrap();

    fs::write(
        mem.join("config.toml"),
        "[embedding]\nprovider = \"hash\"\ndims = 64\n",
    )
    .unwrap();
    fs::write(
        mem.join("MEMORY.md"),
        "# Project Memory\n\n## Storage\n\nThe index lives in SQLite with an FTS5 mirror.\n",
    )
    .unwrap();
    fs::write(
        mem.join("agents/dev.md"),
        "# Dev\n\n## Habits\n\nRun the linter before every push.\n",
    )
    .unwrap();

    tmp
}

/// Run the binary from `dir` and return (stdout, stderr, success).
fn run_in(dir: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = forge_memory_binary();
    let output = Command::new(&binary)
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run forge-memory binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_sync_reports_counts() {
    let tmp = setup_project();

    let (stdout, stderr, ok) = run_in(tmp.path(), &["sync"]);
    assert!(ok, "sync failed: {}", stderr);
    assert!(stdout.contains("Sync complete: +2 added, ~0 updated, -0 deleted, =0 unchanged"));

    let (stdout, _, ok) = run_in(tmp.path(), &["sync"]);
    assert!(ok);
    assert!(stdout.contains("=2 unchanged"));
}

#[test]
fn test_sync_verbose_lists_files_on_stderr() {
    let tmp = setup_project();
    let (_, stderr, ok) = run_in(tmp.path(), &["sync", "--verbose"]);
    assert!(ok);
    assert!(stderr.contains("Project root:"));
    assert!(stderr.contains("+ Added .forge/memory/MEMORY.md"));
}

#[test]
fn test_runs_from_subdirectory() {
    let tmp = setup_project();
    let nested = tmp.path().join("src/deep");
    fs::create_dir_all(&nested).unwrap();

    let (stdout, stderr, ok) = run_in(&nested, &["sync"]);
    assert!(ok, "sync failed: {}", stderr);
    assert!(stdout.contains("+2 added"));
}

#[test]
fn test_missing_memory_dir_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, ok) = run_in(tmp.path(), &["status"]);
    assert!(!ok);
    assert!(stderr.contains(".forge/memory"));
}

#[test]
fn test_search_json_output() {
    let tmp = setup_project();

    // No explicit sync: search indexes the stale project itself.
    let (stdout, stderr, ok) = run_in(
        tmp.path(),
        &["search", "linter push", "--threshold", "0", "--limit", "3"],
    );
    assert!(ok, "search failed: {}", stderr);

    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let results = json["results"].as_array().unwrap();
    assert!(!results.is_empty());
    assert!(results.len() <= 3);
    let first = &results[0];
    for key in ["text", "file", "namespace", "heading", "start_line", "end_line", "score"] {
        assert!(first.get(key).is_some(), "missing key {}", key);
    }
    assert!(results
        .iter()
        .any(|r| r["file"] == ".forge/memory/agents/dev.md"));
}

#[test]
fn test_search_namespace_filter() {
    let tmp = setup_project();
    let (stdout, _, ok) = run_in(
        tmp.path(),
        &["search", "index", "--namespace", "agent", "--agent", "dev", "--threshold", "0"],
    );
    assert!(ok);
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    for r in json["results"].as_array().unwrap() {
        assert_eq!(r["namespace"], "agent");
    }
}

#[test]
fn test_search_pretty_without_hits() {
    let tmp = setup_project();
    let (stdout, _, ok) = run_in(tmp.path(), &["search", "anything", "--threshold", "1.5", "--pretty"]);
    assert!(ok);
    assert!(stdout.contains("No results found."));
}

#[test]
fn test_search_rejects_unknown_namespace() {
    let tmp = setup_project();
    let (_, _, ok) = run_in(tmp.path(), &["search", "x", "--namespace", "everything"]);
    assert!(!ok);
}

#[test]
fn test_status_before_and_after_sync() {
    let tmp = setup_project();
    let db = tmp.path().join(".forge/memory/index.sqlite");

    let (stdout, _, ok) = run_in(tmp.path(), &["status"]);
    assert!(ok);
    assert!(stdout.contains("Index not built yet"));
    assert!(!db.exists(), "status must not create the index");

    run_in(tmp.path(), &["sync"]);
    let (stdout, _, ok) = run_in(tmp.path(), &["status", "--json"]);
    assert!(ok);
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["files"], 2);
    assert_eq!(json["embedding_model"], "fnv1a-hash");
    assert_eq!(json["embedding_dim"], 64);
    assert_eq!(json["namespaces"]["agent"], 1);
}

#[test]
fn test_reset_requires_confirm() {
    let tmp = setup_project();
    run_in(tmp.path(), &["sync"]);
    let db = tmp.path().join(".forge/memory/index.sqlite");
    assert!(db.exists());

    let (_, stderr, ok) = run_in(tmp.path(), &["reset"]);
    assert!(!ok);
    assert!(stderr.contains("--confirm"));
    assert!(db.exists());

    let (stdout, _, ok) = run_in(tmp.path(), &["reset", "--confirm"]);
    assert!(ok);
    assert!(stdout.contains("Database recreated (empty)."));

    let (stdout, _, _) = run_in(tmp.path(), &["status", "--json"]);
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["files"], 0);
}

#[test]
fn test_log_then_consolidate() {
    let tmp = setup_project();

    let (stdout, _, ok) = run_in(
        tmp.path(),
        &["log", "Fixed the flaky test", "--agent", "qa", "--story", "STORY-7"],
    );
    assert!(ok);
    assert!(stdout.starts_with("Logged to "));

    let sessions = tmp.path().join(".forge/memory/sessions");
    let logs: Vec<_> = fs::read_dir(&sessions).unwrap().collect();
    assert_eq!(logs.len(), 1);
    let content = fs::read_to_string(logs[0].as_ref().unwrap().path()).unwrap();
    assert!(content.starts_with("# Session — "));
    assert!(content.contains("[qa] (STORY-7) — Fixed the flaky test"));

    let (stdout, _, ok) = run_in(tmp.path(), &["consolidate"]);
    assert!(ok);
    assert!(stdout.contains("Consolidation complete: 1 entries merged into MEMORY.md"));

    let memory = fs::read_to_string(tmp.path().join(".forge/memory/MEMORY.md")).unwrap();
    assert!(memory.contains("### Consolidation — "));
    assert!(memory.contains("**STORY-7**:"));

    let (stdout, _, ok) = run_in(tmp.path(), &["consolidate"]);
    assert!(ok);
    assert!(stdout.contains("Nothing to consolidate."));
}

#[test]
fn test_log_rejects_empty_message() {
    let tmp = setup_project();
    let (_, _, ok) = run_in(tmp.path(), &["log", "  "]);
    assert!(!ok);
}

#[test]
fn test_explicit_config_flag() {
    let tmp = setup_project();
    let config = tmp.path().join("alt.toml");
    fs::write(
        &config,
        "[paths]\ndb_file = \"alt.sqlite\"\n\n[embedding]\nprovider = \"hash\"\ndims = 32\n",
    )
    .unwrap();

    let (_, stderr, ok) = run_in(tmp.path(), &["--config", config.to_str().unwrap(), "sync"]);
    assert!(ok, "sync failed: {}", stderr);
    assert!(tmp.path().join(".forge/memory/alt.sqlite").exists());
    assert!(!tmp.path().join(".forge/memory/index.sqlite").exists());
}
