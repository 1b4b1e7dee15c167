//! End-to-end CLI tests for the newswire binary.

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::NamedTempFile;

const VALID_CONFIG: &str = r#"
[settings]
concurrency = 2
keywords = ["earnings"]

[[sources]]
name = "wire"
base_url = "https://example.com/markets"
kind = "markup"
pages = ["", "/page/2"]
[sources.selectors]
container = "article"
headline = "h2"
link = "a"

[[sources]]
name = "api"
base_url = "https://api.example.com/v1/news"
kind = "schema"
[sources.api]
pagination = "offset"
records_path = "items"
"#;

fn config_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn newswire() -> Command {
    let mut cmd = Command::cargo_bin("newswire").unwrap();
    // Keep the developer's environment out of path resolution.
    cmd.env_remove("NEWSWIRE_CONFIG").env_remove("RUST_LOG");
    cmd
}

/// Test that --help displays usage information and exits with code 0.
#[test]
fn test_binary_help_displays_usage() {
    newswire()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Ingest business news"));
}

/// Test that --version displays version and exits with code 0.
#[test]
fn test_binary_version_displays_version() {
    newswire()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("newswire"));
}

#[test]
fn test_validate_only_accepts_valid_config() {
    let file = config_file(VALID_CONFIG);
    newswire()
        .arg("--config")
        .arg(file.path())
        .arg("--validate-only")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "configuration ok: 2 sources (1 markup, 1 schema)",
        ));
}

#[test]
fn test_config_path_from_environment() {
    let file = config_file(VALID_CONFIG);
    newswire()
        .env("NEWSWIRE_CONFIG", file.path())
        .arg("--validate-only")
        .assert()
        .success();
}

#[test]
fn test_missing_container_exits_with_config_status() {
    let file = config_file(
        r#"
[[sources]]
name = "wire"
base_url = "https://example.com"
kind = "markup"
[sources.selectors]
headline = "h2"
"#,
    );
    newswire()
        .arg("--config")
        .arg(file.path())
        .arg("--validate-only")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("container"));
}

#[test]
fn test_schema_source_without_api_table_is_rejected() {
    let file = config_file(
        r#"
[[sources]]
name = "api"
base_url = "https://api.example.com"
kind = "schema"
"#,
    );
    newswire()
        .arg("--config")
        .arg(file.path())
        .arg("--validate-only")
        .assert()
        .code(2);
}

#[test]
fn test_unreadable_config_exits_with_config_status() {
    newswire()
        .arg("--config")
        .arg("/nonexistent/newswire/sources.toml")
        .assert()
        .code(2);
}

#[test]
fn test_empty_source_list_runs_and_prints_summary() {
    let file = config_file("[settings]\nconcurrency = 1\n");
    let output = tempfile::tempdir().unwrap();
    let out_path = output.path().join("run.json");

    newswire()
        .arg("--config")
        .arg(file.path())
        .arg("--output")
        .arg(&out_path)
        .arg("-q")
        .assert()
        .success();

    let written = std::fs::read_to_string(&out_path).unwrap();
    let run: serde_json::Value = serde_json::from_str(&written).unwrap();
    assert_eq!(run["records"], serde_json::json!([]));
    assert_eq!(run["summary"]["sources_attempted"], 0);
}
