//! CLI tests for the fednestd binary

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// A fednestd invocation isolated to a temp dir (config, data and cwd)
fn fednestd(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("fednestd").unwrap();
    cmd.current_dir(home)
        .env("HOME", home)
        .env("XDG_DATA_HOME", home.join("data"))
        .env("XDG_CONFIG_HOME", home.join("config"))
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG");
    cmd
}

fn write_config(home: &Path) -> PathBuf {
    let path = home.join("fednestd.yml");
    let yaml = format!(
        "storage:\n  state_dir: {}\n  model_dir: {}\nround:\n  min_contributors: 2\n  timeout_seconds: 30\n",
        home.join("state").display(),
        home.join("models").display()
    );
    std::fs::write(&path, yaml).unwrap();
    path
}

#[test]
fn test_init_config_prints_template() {
    let temp = TempDir::new().unwrap();

    fednestd(temp.path())
        .args(["init-config", "tier2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("participant_id: tier2-edge-001"))
        .stdout(predicate::str::contains("bootstrap_servers"));
}

#[test]
fn test_init_config_written_file_loads() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("node.yml");

    fednestd(temp.path())
        .args(["init-config", "tier1", "-o"])
        .arg(&path)
        .assert()
        .success();
    assert!(path.exists());

    // Refuses to clobber without --force
    fednestd(temp.path())
        .args(["init-config", "tier1", "-o"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    fednestd(temp.path())
        .arg("-c")
        .arg(&path)
        .args(["messaging", "bootstrap-topics", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("tasks.training"));
}

#[test]
fn test_bootstrap_topics_creates_all() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path());

    fednestd(temp.path())
        .arg("-c")
        .arg(&config)
        .args(["messaging", "bootstrap-topics"])
        .assert()
        .success()
        .stdout(predicate::str::contains("created control.federation_rounds"))
        .stdout(predicate::str::contains("4 created, 0 existing"));
}

#[test]
fn test_unknown_config_field_is_rejected() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("bad.yml");
    std::fs::write(&path, "round:\n  min_contributers: 2\n").unwrap();

    fednestd(temp.path())
        .arg("-c")
        .arg(&path)
        .args(["tier1", "status"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load"));
}

#[test]
fn test_operator_round_commands() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path());
    let run = |args: &[&str]| {
        let mut cmd = fednestd(temp.path());
        cmd.arg("-c").arg(&config).args(args);
        cmd
    };

    // No genesis yet
    run(&["tier1", "start-round", "-p", "edge-a,edge-b"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("publish-genesis"));

    run(&["tier1", "publish-genesis", "--dim", "4"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Genesis model version 1"));

    // Threshold above the participant count
    run(&["tier1", "start-round", "-p", "edge-a", "--min-contributors", "2"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid policy"));

    run(&["tier1", "start-round", "-p", "edge-a,edge-b,edge-c"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created round 1"));

    run(&["tier1", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("announced"))
        .stdout(predicate::str::contains("0/3"));

    run(&["tier1", "cancel-round", "1", "--reason", "maintenance"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Round 1 cancelled"));

    run(&["tier1", "cancel-round", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("already finished"));

    run(&["tier1", "status", "--round", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("failed"))
        .stdout(predicate::str::contains("cancelled: maintenance"));

    run(&["tier1", "versions"])
        .assert()
        .success()
        .stdout(predicate::str::contains("genesis"));

    run(&["tier1", "suspend", "edge-b"])
        .assert()
        .success()
        .stdout(predicate::str::contains("edge-b is now suspended"));

    run(&["tier1", "participants"])
        .assert()
        .success()
        .stdout(predicate::str::contains("suspended"));
}

#[test]
fn test_status_json_is_parseable() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path());

    let output = fednestd(temp.path())
        .arg("-c")
        .arg(&config)
        .args(["tier1", "status", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let rounds: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(rounds, serde_json::json!([]));
}

#[test]
fn test_simulate_aggregates_a_round() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path());

    fednestd(temp.path())
        .arg("-c")
        .arg(&config)
        .args([
            "simulate",
            "--clients",
            "3",
            "--rounds",
            "1",
            "--dim",
            "4",
            "--timeout-secs",
            "3",
        ])
        .arg("--dir")
        .arg(temp.path().join("sim"))
        .timeout(std::time::Duration::from_secs(60))
        .assert()
        .success()
        .stdout(predicate::str::contains("Round 1: aggregated"))
        .stdout(predicate::str::contains("2 model version(s)"));
}
