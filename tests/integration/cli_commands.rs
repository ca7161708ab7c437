//! Integration tests for the shelf binary
//!
//! Runs the CLI as a subprocess against a temp storage root.

use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn shelf(workdir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_shelf"))
        .current_dir(workdir)
        .env_remove("SHELF_LOG")
        .env_remove("SHELF_LOG_FORMAT")
        .env("SHELF_LOG_OUTPUT", "file")
        .arg("--root")
        .arg(workdir.join("storage"))
        .args(args)
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    assert!(
        output.status.success(),
        "shelf should succeed: stderr={:?}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

#[test]
fn test_put_get_ids_rm() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();

    let id = stdout(&shelf(
        dir,
        &["put", "widgets", "--id", "w1", r#"{"name":"bolt","count":5}"#],
    ));
    assert_eq!(id, "w1");
    assert!(dir.join("storage/widgets/w1.json").exists());

    let value: serde_json::Value =
        serde_json::from_str(&stdout(&shelf(dir, &["get", "widgets", "w1"]))).unwrap();
    assert_eq!(value["count"], 5);

    let generated = stdout(&shelf(dir, &["put", "widgets", r#"{"name":"nut"}"#]));
    let mut expected = vec!["w1".to_string(), generated];
    expected.sort();
    assert_eq!(
        stdout(&shelf(dir, &["ids", "widgets"])),
        expected.join("\n")
    );

    stdout(&shelf(dir, &["rm", "widgets", "w1"]));
    assert!(!dir.join("storage/widgets/w1.json").exists());
}

#[test]
fn test_missing_entry_fails() {
    let temp_dir = TempDir::new().unwrap();
    let output = shelf(temp_dir.path(), &["get", "widgets", "ghost"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("ghost"));
}

#[test]
fn test_logs_written_to_file() {
    let temp_dir = TempDir::new().unwrap();
    stdout(&shelf(temp_dir.path(), &["ids", "widgets"]));

    let log = std::fs::read_to_string(temp_dir.path().join("shelf.log")).unwrap();
    assert!(log.contains("Shelf CLI starting"));
}
