//! CLI integration tests for c2pl
//!
//! Tests the c2pl CLI commands end-to-end using assert_cmd.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const SCRIPT: &str = "\
transaction
r(x)
m x = x + 10;
w(x)

# copy y into z
transaction
r(y)
m z = y
w(z)
";

/// Command isolated from the user's config directory
#[allow(deprecated)]
fn c2pl_cmd(config_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("c2pl").unwrap();
    cmd.env("C2PL_CONFIG_DIR", config_dir.path());
    cmd.env_remove("RUST_LOG");
    cmd
}

fn write_script(dir: &TempDir, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join("site.txt");
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_help_lists_subcommands() {
    let dir = TempDir::new().unwrap();
    c2pl_cmd(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("coordinator"))
        .stdout(predicate::str::contains("site"))
        .stdout(predicate::str::contains("parse"));
}

#[test]
fn test_parse_prints_numbered_transactions() {
    let dir = TempDir::new().unwrap();
    let script = write_script(&dir, SCRIPT);

    c2pl_cmd(&dir)
        .args(["parse", script.to_str().unwrap(), "--site-id", "3"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "T30001 (site 3): r(x); m x = x + 10; w(x);",
        ))
        .stdout(predicate::str::contains("T30002 (site 3): r(y); m z = y + 0; w(z);"));
}

#[test]
fn test_parse_json_output() {
    let dir = TempDir::new().unwrap();
    let script = write_script(&dir, SCRIPT);

    let output = c2pl_cmd(&dir)
        .args(["--format", "json", "parse", script.to_str().unwrap()])
        .output()
        .unwrap();
    assert!(output.status.success());

    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let transactions = parsed.as_array().unwrap();
    assert_eq!(transactions.len(), 2);
    assert_eq!(transactions[0]["id"], 10001);
    assert_eq!(transactions[0]["operations"][0]["kind"], "read");
}

#[test]
fn test_parse_reports_bad_line() {
    let dir = TempDir::new().unwrap();
    let script = write_script(&dir, "transaction\nr(x)\nq(x)\n");

    c2pl_cmd(&dir)
        .args(["parse", script.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("line 3"));
}

#[test]
fn test_parse_missing_file_fails() {
    let dir = TempDir::new().unwrap();
    c2pl_cmd(&dir)
        .args(["parse", "/definitely/not/here.txt"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read transaction script"));
}

#[test]
fn test_config_show_defaults() {
    let dir = TempDir::new().unwrap();
    c2pl_cmd(&dir)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("coordinator.port = 1099"))
        .stdout(predicate::str::contains("coordinator.deadlock_check_interval_ms = 5000"))
        .stdout(predicate::str::contains("site.operation_delay_ms = 100"));
}

#[test]
fn test_config_reads_file() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("config.toml"),
        "[coordinator]\nport = 4242\n",
    )
    .unwrap();

    c2pl_cmd(&dir)
        .args(["config", "get", "coordinator.port"])
        .assert()
        .success()
        .stdout("4242\n");
}

#[test]
fn test_config_get_unknown_key_fails() {
    let dir = TempDir::new().unwrap();
    c2pl_cmd(&dir)
        .args(["config", "get", "coordinator.color"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown configuration key"));
}

#[test]
fn test_config_path_uses_env_dir() {
    let dir = TempDir::new().unwrap();
    c2pl_cmd(&dir)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"))
        .stdout(predicate::str::contains(
            dir.path().to_string_lossy().to_string(),
        ));
}

#[test]
fn test_site_without_coordinator_fails() {
    let dir = TempDir::new().unwrap();
    let script = write_script(&dir, SCRIPT);
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    c2pl_cmd(&dir)
        .args([
            "site",
            "--transactions",
            script.to_str().unwrap(),
            "--port",
            &port.to_string(),
            "--database",
            dir.path().join("items.db").to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to register with coordinator"));
}
