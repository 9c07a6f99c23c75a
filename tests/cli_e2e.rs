//! End-to-end CLI tests for the docfetch binary and its exit-code contract.

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

mod support;
use support::socket_guard::{socket_skip_return, start_mock_server_or_skip};

macro_rules! require_mock_server {
    () => {{
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return socket_skip_return();
        };
        mock_server
    }};
}

fn docfetch() -> Command {
    let mut cmd = Command::cargo_bin("docfetch").unwrap();
    cmd.env_remove("DOCFETCH_BLOB_CONNECTION_STRING")
        .env_remove("RUST_LOG");
    cmd
}

fn write_manifest(dir: &Path, body: &str) -> std::path::PathBuf {
    let manifest = dir.join("documents.json");
    std::fs::write(&manifest, body).unwrap();
    manifest
}

/// Runs the binary on a blocking thread so the mock server keeps serving.
async fn run_blocking(mut cmd: Command) -> assert_cmd::assert::Assert {
    tokio::task::spawn_blocking(move || cmd.assert())
        .await
        .unwrap()
}

#[test]
fn test_binary_help_displays_usage() {
    docfetch()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Fetch every document in a manifest"));
}

#[test]
fn test_binary_version_displays_version() {
    docfetch()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("docfetch"));
}

#[test]
fn test_binary_missing_input_is_usage_error() {
    docfetch()
        .assert()
        .failure()
        .stderr(predicate::str::contains("<INPUT>"));
}

#[test]
fn test_unreadable_manifest_exits_with_startup_code() {
    let dir = TempDir::new().unwrap();
    docfetch()
        .arg(dir.path().join("missing.json"))
        .arg("--output")
        .arg(dir.path().join("pdfs"))
        .assert()
        .code(3)
        .stderr(predicate::str::contains("failed to load documents"));
}

#[test]
fn test_blob_without_connection_string_exits_with_startup_code() {
    let dir = TempDir::new().unwrap();
    let manifest = write_manifest(dir.path(), "[]");
    docfetch()
        .arg(&manifest)
        .args(["--storage", "blob"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("connection string"));
}

#[test]
fn test_empty_manifest_exits_nothing_new() {
    let dir = TempDir::new().unwrap();
    let manifest = write_manifest(dir.path(), "[]");
    docfetch()
        .arg(&manifest)
        .arg("--output")
        .arg(dir.path().join("pdfs"))
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Total documents:  0"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_successful_run_exits_zero_then_one_on_rerun() {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/a.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.4 a".to_vec()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let manifest = write_manifest(
        dir.path(),
        &format!(
            r#"[{{"id": "a", "title": "Plan 2015", "url": "{}/a.pdf", "country": "Peru", "major_doc_type": "Plan"}}]"#,
            mock_server.uri()
        ),
    );
    let output = dir.path().join("pdfs");

    let mut first = docfetch();
    first
        .arg(&manifest)
        .arg("--output")
        .arg(&output)
        .args(["--delay", "0", "--heartbeat-secs", "60"]);
    run_blocking(first).await.code(0);
    assert!(output.join("Peru/Plan/2015/a.pdf").is_file());

    let mut second = docfetch();
    second
        .arg(&manifest)
        .arg("--output")
        .arg(&output)
        .args(["--delay", "0"]);
    run_blocking(second)
        .await
        .code(1)
        .stdout(predicate::str::contains("Already present:  1"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failed_document_exits_two_and_logs_failure() {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/broken.pdf"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let manifest = write_manifest(
        dir.path(),
        &format!(
            "{{\"id\": \"b\", \"title\": \"Broken\", \"url\": \"{}/broken.pdf\", \"year\": \"2001\"}}\n",
            mock_server.uri()
        ),
    );
    let output = dir.path().join("pdfs");
    let failure_log = dir.path().join("failures.jsonl");

    let mut cmd = docfetch();
    cmd.arg(&manifest)
        .arg("--output")
        .arg(&output)
        .arg("--failure-log")
        .arg(&failure_log)
        .args(["-r", "1", "--retry-base-delay-ms", "5", "--delay", "0"]);
    run_blocking(cmd)
        .await
        .code(2)
        .stdout(predicate::str::contains("HTTP 500"));

    let placeholder = output.join("unknown/unknown/2001/b_Broken_URL_ONLY.txt");
    let text = std::fs::read_to_string(placeholder).unwrap();
    assert!(text.contains(&format!("{}/broken.pdf", mock_server.uri())));

    let log = std::fs::read_to_string(failure_log).unwrap();
    let entry: serde_json::Value = serde_json::from_str(log.lines().next().unwrap()).unwrap();
    assert_eq!(entry["id"], "b");
    assert_eq!(entry["attempts"], 2);
    assert_eq!(entry["status"], "URL_ONLY");
}
