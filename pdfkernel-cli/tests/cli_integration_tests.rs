//! Integration tests for the pdfkernel CLI
//!
//! Tests command-line interface functionality including:
//! - Reading snapshots and reporting page tree state
//! - Page removal and insertion written to new snapshots
//! - Consistency checks on malformed trees
//! - Error handling for bad input

use anyhow::Result;
use pdfkernel::test_helpers;
use pdfkernel::{MemoryStore, ObjectId, OpenMode};
use pretty_assertions::assert_eq;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::{tempdir, TempDir};

/// Test helper to get the CLI binary path
fn get_cli_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_pdfkernel"))
}

fn setup_temp_dir() -> TempDir {
    tempdir().expect("Failed to create temp directory")
}

fn run_cli_command(args: &[&str]) -> Result<Output> {
    let output = Command::new(get_cli_path())
        .env_remove("RUST_LOG")
        .args(args)
        .output()?;
    Ok(output)
}

fn write_store(dir: &TempDir, name: &str, store: MemoryStore) -> PathBuf {
    let path = dir.path().join(name);
    store.save_to(&path).expect("Failed to write snapshot");
    path
}

fn page_ids(path: &Path) -> Vec<ObjectId> {
    let store = MemoryStore::open(path).expect("Failed to read snapshot");
    let doc = pdfkernel::Document::open(store, OpenMode::ReadOnly).expect("Failed to open");
    (1..=doc.page_count())
        .map(|position| doc.get_page(position).unwrap().id())
        .collect()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_cli_info_command() {
    let temp_dir = setup_temp_dir();
    let input = write_store(&temp_dir, "nested.json", test_helpers::nested_store());

    let output = run_cli_command(&["info", input.to_str().unwrap()]).unwrap();
    assert!(output.status.success(), "Command should succeed");

    let stdout = stdout(&output);
    assert!(stdout.contains("Revisions: 1"));
    assert!(stdout.contains("Page tree root: 2 0 R"));
    assert!(stdout.contains("Pages: 4"));
}

#[test]
fn test_cli_info_without_page_tree() {
    let temp_dir = setup_temp_dir();
    let input = write_store(&temp_dir, "empty.json", test_helpers::empty_store());

    let output = run_cli_command(&["info", input.to_str().unwrap()]).unwrap();
    assert!(output.status.success());
    let stdout = stdout(&output);
    assert!(stdout.contains("Page tree root: none"));
    assert!(stdout.contains("Pages: 0"));
}

#[test]
fn test_cli_pages_command() {
    let temp_dir = setup_temp_dir();
    let input = write_store(&temp_dir, "nested.json", test_helpers::nested_store());

    let output = run_cli_command(&["pages", input.to_str().unwrap()]).unwrap();
    assert!(output.status.success());

    let lines: Vec<String> = stdout(&output).lines().map(str::to_string).collect();
    assert_eq!(
        lines,
        vec![
            "Page 1: 5 0 R",
            "Page 2: 6 0 R",
            "Page 3: 4 0 R",
            "Page 4: 7 0 R"
        ]
    );
}

#[test]
fn test_cli_remove_command() {
    let temp_dir = setup_temp_dir();
    let input = write_store(&temp_dir, "flat.json", test_helpers::flat_store(3));
    let output_path = temp_dir.path().join("removed.json");

    let output = run_cli_command(&[
        "remove",
        input.to_str().unwrap(),
        "--page",
        "2",
        "-o",
        output_path.to_str().unwrap(),
    ])
    .unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout(&output).contains("2 page(s) left"));

    assert_eq!(
        page_ids(&output_path),
        vec![test_helpers::id(3), test_helpers::id(5)]
    );
    // The input is left alone
    assert_eq!(page_ids(&input).len(), 3);
}

#[test]
fn test_cli_remove_incremental() {
    let temp_dir = setup_temp_dir();
    let input = write_store(&temp_dir, "flat.json", test_helpers::flat_store(2));
    let output_path = temp_dir.path().join("removed.json");

    let output = run_cli_command(&[
        "remove",
        input.to_str().unwrap(),
        "-p",
        "1",
        "-o",
        output_path.to_str().unwrap(),
        "--incremental",
    ])
    .unwrap();
    assert!(output.status.success());

    let snapshot: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&output_path).unwrap()).unwrap();
    assert_eq!(snapshot["revisions"].as_array().map(Vec::len), Some(2));
}

#[test]
fn test_cli_remove_out_of_range() {
    let temp_dir = setup_temp_dir();
    let input = write_store(&temp_dir, "flat.json", test_helpers::flat_store(2));
    let output_path = temp_dir.path().join("removed.json");

    let output = run_cli_command(&[
        "remove",
        input.to_str().unwrap(),
        "--page",
        "9",
        "-o",
        output_path.to_str().unwrap(),
    ])
    .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("page 9"));
    assert!(!output_path.exists());
}

#[test]
fn test_cli_insert_command() {
    let temp_dir = setup_temp_dir();
    let input = write_store(&temp_dir, "flat.json", test_helpers::flat_store(2));
    let source = write_store(&temp_dir, "nested.json", test_helpers::nested_store());
    let output_path = temp_dir.path().join("inserted.json");

    let output = run_cli_command(&[
        "insert",
        input.to_str().unwrap(),
        "--from",
        source.to_str().unwrap(),
        "--page",
        "1",
        "--at",
        "2",
        "-o",
        output_path.to_str().unwrap(),
    ])
    .unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout(&output).contains("at position 2"));

    let ids = page_ids(&output_path);
    assert_eq!(ids.len(), 3);
    assert_eq!(ids[0], test_helpers::id(3));
    assert_eq!(ids[2], test_helpers::id(4));

    let store = MemoryStore::open(&output_path).unwrap();
    let doc = pdfkernel::Document::open(store, OpenMode::ReadOnly).unwrap();
    let page = doc.resolve(ids[1]);
    let page = page.as_dict().unwrap();
    assert!(page.contains_key("Resources"));
    assert_eq!(page.get_reference("Parent"), Some(test_helpers::ROOT));
}

#[test]
fn test_cli_check_clean_tree() {
    let temp_dir = setup_temp_dir();
    let input = write_store(&temp_dir, "nested.json", test_helpers::nested_store());

    let output = run_cli_command(&["check", input.to_str().unwrap()]).unwrap();
    assert!(output.status.success());
    assert!(stdout(&output).contains("No problems found"));
}

#[test]
fn test_cli_check_reports_problems() {
    let temp_dir = setup_temp_dir();
    let counts = write_store(
        &temp_dir,
        "counts.json",
        test_helpers::grouped_store(&[2, 1], true),
    );
    let duplicate = write_store(&temp_dir, "dup.json", test_helpers::duplicate_store());

    let output = run_cli_command(&["check", counts.to_str().unwrap()]).unwrap();
    assert!(!output.status.success());
    let report = stdout(&output);
    assert!(report.contains("2 0 R: Count is 0, should be 3"));
    assert!(report.contains("3 0 R: Count is 9, should be 2"));

    let output = run_cli_command(&["check", duplicate.to_str().unwrap()]).unwrap();
    assert!(!output.status.success());
    assert!(stdout(&output).contains("3 0 R: listed more than once"));
}

#[test]
fn test_cli_missing_file() {
    let temp_dir = setup_temp_dir();
    let missing = temp_dir.path().join("missing.json");

    let output = run_cli_command(&["info", missing.to_str().unwrap()]).unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Failed to read snapshot"));
}

#[test]
fn test_cli_invalid_snapshot() {
    let temp_dir = setup_temp_dir();
    let path = temp_dir.path().join("garbage.json");
    std::fs::write(&path, b"not json").unwrap();

    let output = run_cli_command(&["pages", path.to_str().unwrap()]).unwrap();
    assert!(!output.status.success());
}

#[test]
fn test_cli_help() {
    let output = run_cli_command(&["--help"]).unwrap();
    assert!(output.status.success());
    let stdout = stdout(&output);
    for command in ["info", "pages", "remove", "insert", "check"] {
        assert!(stdout.contains(command), "help should list {command}");
    }
}
