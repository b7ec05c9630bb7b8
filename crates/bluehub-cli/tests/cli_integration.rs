//! CLI Integration Tests
//!
//! These tests run the `bluehub` binary. Tests that talk to a real adapter
//! are marked with #[ignore].
//!
//! Run hardware tests:
//! ```
//! BLUEHUB_DEVICE="AA:BB:CC:DD:EE:FF" cargo test --package bluehub-cli --test cli_integration -- --ignored --nocapture
//! ```

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn run_bluehub(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_bluehub"))
        .args(args)
        .env_remove("BLUEHUB_DEVICE")
        .env_remove("BLUEHUB_CONFIG")
        .output()
        .expect("Failed to run bluehub binary")
}

/// Config file keeping the database inside `dir`.
fn write_config(dir: &Path, bluetooth: &str) -> PathBuf {
    let path = dir.join("config.toml");
    let db = dir.join("entities.db");
    let content = format!(
        "[bluetooth]\n{bluetooth}\n\n[store]\npath = {:?}\n",
        db.display().to_string()
    );
    std::fs::write(&path, content).unwrap();
    path
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

// =============================================================================
// Help and Version Tests (no hardware required)
// =============================================================================

#[test]
fn test_help() {
    let output = run_bluehub(&["--help"]);
    assert!(output.status.success());
    let text = stdout(&output);
    for command in ["scan", "status", "connect", "read", "write", "send-file", "set", "run"] {
        assert!(text.contains(command), "help is missing {command}");
    }
}

#[test]
fn test_version() {
    let output = run_bluehub(&["--version"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_subcommand_help() {
    for command in ["scan", "status", "connect", "disconnect", "read", "write", "send-file", "set", "run"] {
        let output = run_bluehub(&[command, "--help"]);
        assert!(output.status.success(), "{command} --help failed");
    }
    let text = stdout(&run_bluehub(&["read", "--help"]));
    assert!(text.contains("--port"));
    assert!(text.contains("--uuid"));
}

#[test]
fn test_completions() {
    let output = run_bluehub(&["completions", "bash"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("bluehub"));
}

#[test]
fn test_connect_requires_device() {
    let output = run_bluehub(&["connect"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("--device"));
}

// =============================================================================
// Configuration and argument errors (no hardware required)
// =============================================================================

#[test]
fn test_invalid_config_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "scan_duration = 0");

    let output = run_bluehub(&["--config", config.to_str().unwrap(), "status"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("scan_duration"));
}

#[test]
fn test_unparsable_config_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[bluetooth\n").unwrap();

    let output = run_bluehub(&["--config", path.to_str().unwrap(), "status"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Failed to parse config"));
}

#[test]
fn test_invalid_hex_payload() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "");

    let output = run_bluehub(&[
        "--config",
        config.to_str().unwrap(),
        "write",
        "--device",
        "AA:BB:CC:DD:EE:FF",
        "zz",
    ]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Invalid hex payload"));
}

#[test]
fn test_invalid_uuid_argument() {
    let output = run_bluehub(&["read", "--device", "Sensor1", "--uuid", "nope"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("invalid UUID"));
}

#[test]
fn test_status_of_empty_store() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "");
    let config = config.to_str().unwrap();

    let output = run_bluehub(&["--config", config, "--no-color", "status"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert_eq!(stdout(&output), "No devices found.\n");

    let output = run_bluehub(&["--config", config, "--json", "--compact", "status"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert_eq!(stdout(&output), "[]\n");
    assert!(dir.path().join("entities.db").exists());
}

#[test]
fn test_output_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "");
    let out = dir.path().join("status.json");

    let output = run_bluehub(&[
        "--config",
        config.to_str().unwrap(),
        "--json",
        "--output",
        out.to_str().unwrap(),
        "status",
    ]);
    assert!(output.status.success(), "{}", stderr(&output));
    let devices: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(devices, serde_json::json!([]));
}

// =============================================================================
// Hardware tests
// =============================================================================

#[test]
#[ignore = "requires BLE hardware"]
fn test_scan_finds_device() {
    let Some(device) = std::env::var("BLUEHUB_DEVICE").ok().filter(|s| !s.is_empty()) else {
        eprintln!("BLUEHUB_DEVICE not set, skipping");
        return;
    };
    let output = run_bluehub(&["--json", "scan", "--duration", "10", "--device", &device]);
    assert!(output.status.success(), "{}", stderr(&output));
    let devices: Vec<serde_json::Value> = serde_json::from_str(&stdout(&output)).unwrap();
    assert!(!devices.is_empty());
}
