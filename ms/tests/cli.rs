//! CLI tests for the ms binary

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

#[test]
fn test_put_then_get_round_trip() {
    let temp = TempDir::new().unwrap();
    let input = temp.path().join("delta.bin");
    std::fs::write(&input, b"delta-bytes").unwrap();
    let store_dir = temp.path().join("store");

    let output = Command::cargo_bin("ms")
        .unwrap()
        .arg("--store")
        .arg(&store_dir)
        .arg("put")
        .arg(&input)
        .output()
        .unwrap();
    assert!(output.status.success());
    let reference = String::from_utf8(output.stdout).unwrap().trim().to_string();
    assert!(reference.starts_with("sha256:"));

    Command::cargo_bin("ms")
        .unwrap()
        .arg("--store")
        .arg(&store_dir)
        .arg("get")
        .arg(&reference)
        .assert()
        .success()
        .stdout(predicate::eq(b"delta-bytes" as &[u8]));
}

#[test]
fn test_get_unknown_reference_fails() {
    let temp = TempDir::new().unwrap();
    let missing = format!("sha256:{}", "0".repeat(64));

    Command::cargo_bin("ms")
        .unwrap()
        .arg("--store")
        .arg(temp.path())
        .arg("get")
        .arg(&missing)
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_ls_empty_store() {
    let temp = TempDir::new().unwrap();

    Command::cargo_bin("ms")
        .unwrap()
        .arg("--store")
        .arg(temp.path())
        .arg("ls")
        .assert()
        .success()
        .stdout(predicate::str::contains("No objects found"));
}

#[test]
fn test_store_dir_from_environment() {
    let temp = TempDir::new().unwrap();
    let store_dir = temp.path().join("env-store");
    let input = temp.path().join("snapshot.bin");
    std::fs::write(&input, b"snapshot").unwrap();

    Command::cargo_bin("ms")
        .unwrap()
        .current_dir(temp.path())
        .env("FEDNEST_MODEL_DIR", &store_dir)
        .arg("put")
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::starts_with("sha256:"));

    Command::cargo_bin("ms")
        .unwrap()
        .arg("--store")
        .arg(&store_dir)
        .arg("stats")
        .assert()
        .success()
        .stdout(predicate::str::contains("Objects: 1"));
}

#[test]
fn test_verify_reports_corruption() {
    let temp = TempDir::new().unwrap();
    let store_dir = temp.path().join("store");
    let input = temp.path().join("delta.bin");
    std::fs::write(&input, b"original").unwrap();

    let output = Command::cargo_bin("ms")
        .unwrap()
        .arg("--store")
        .arg(&store_dir)
        .arg("put")
        .arg(&input)
        .output()
        .unwrap();
    let reference = String::from_utf8(output.stdout).unwrap().trim().to_string();
    let hex = reference.trim_start_matches("sha256:");
    std::fs::write(store_dir.join("objects").join(&hex[..2]).join(&hex[2..]), b"tampered").unwrap();

    Command::cargo_bin("ms")
        .unwrap()
        .arg("--store")
        .arg(&store_dir)
        .arg("verify")
        .assert()
        .failure()
        .stdout(predicate::str::contains("bad"))
        .stderr(predicate::str::contains("1 of 1 objects failed verification"));
}
