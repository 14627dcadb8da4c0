//! Command line surface: selectors, env overrides and early rejection.

use std::process::Command;

use clap::Parser;
use fetch_harness::config::{Backend, Cli, Config};
use serial_test::serial;
use tokio::time::Duration;

#[test]
#[serial]
fn test_env_overrides_defaults() {
    std::env::set_var("HARNESS_WORKERS", "3");
    std::env::set_var("HARNESS_REQUEST_TIMEOUT", "750ms");
    std::env::set_var("HARNESS_FIELD", "en");

    let cli = Cli::try_parse_from(["fetch_harness", "flask_gunicorn", "json"]);

    std::env::remove_var("HARNESS_WORKERS");
    std::env::remove_var("HARNESS_REQUEST_TIMEOUT");
    std::env::remove_var("HARNESS_FIELD");

    let config = Config::try_from(cli.unwrap()).unwrap();
    assert_eq!(config.backend, Backend::FlaskGunicorn);
    assert_eq!(config.num_workers, 3);
    assert_eq!(config.request_timeout, Duration::from_millis(750));
    assert_eq!(config.field, "en");
}

#[test]
#[serial]
fn test_flags_beat_env() {
    std::env::set_var("HARNESS_TASKS", "99");
    let cli = Cli::try_parse_from(["fetch_harness", "flask", "db", "--tasks", "12"]);
    std::env::remove_var("HARNESS_TASKS");

    let config = Config::try_from(cli.unwrap()).unwrap();
    assert_eq!(config.num_tasks, 12);
}

#[test]
fn test_huge_duration_is_a_parse_error() {
    let err = Cli::try_parse_from(["fetch_harness", "flask", "db", "--settle-delay", "99999999999999999h"])
        .unwrap_err();
    assert!(err.to_string().contains("out of range"), "{}", err);
}

#[test]
#[serial]
fn test_all_selector_exits_before_any_work() {
    let dir = tempfile::tempdir().unwrap();
    let output = Command::new(env!("CARGO_BIN_EXE_fetch_harness"))
        .args(["all", "db"])
        .current_dir(dir.path())
        .output()
        .expect("Failed to run binary");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not implemented"), "stderr: {}", stderr);
    // No log directory, no artifacts.
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
#[serial]
fn test_all_path_exits_before_any_work() {
    let dir = tempfile::tempdir().unwrap();
    let output = Command::new(env!("CARGO_BIN_EXE_fetch_harness"))
        .args(["fastapi", "all", "--delay"])
        .current_dir(dir.path())
        .output()
        .expect("Failed to run binary");

    assert_eq!(output.status.code(), Some(1));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_unknown_server_is_rejected_by_parser() {
    let output = Command::new(env!("CARGO_BIN_EXE_fetch_harness"))
        .args(["tornado", "db"])
        .output()
        .expect("Failed to run binary");
    assert!(!output.status.success());
}
