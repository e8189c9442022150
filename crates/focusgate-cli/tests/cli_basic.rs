//! Basic CLI E2E tests.
//!
//! Each test runs the built binary against its own data directory and
//! checks the JSON it prints.

use std::path::Path;
use std::process::Command;

/// Run a CLI command and return (stdout, stderr, exit code).
fn run_cli(home: &Path, args: &[&str]) -> (String, String, i32) {
    let output = Command::new(env!("CARGO_BIN_EXE_focusgate"))
        .args(args)
        .env("FOCUSGATE_HOME", home)
        .env("RUST_LOG", "warn")
        .output()
        .expect("Failed to execute CLI command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let code = output.status.code().unwrap_or(-1);

    (stdout, stderr, code)
}

fn run_json(home: &Path, args: &[&str]) -> serde_json::Value {
    let (stdout, stderr, code) = run_cli(home, args);
    assert_eq!(code, 0, "{args:?} failed: {stderr}");
    serde_json::from_str(&stdout).expect("Failed to parse JSON output")
}

#[test]
fn test_mode_add_and_list() {
    let home = tempfile::tempdir().unwrap();
    let added = run_json(home.path(), &["mode", "add", "Work", "--id", "work", "--app", "com.social"]);
    assert_eq!(added["outcome"], "SUCCESS");

    let modes = run_json(home.path(), &["mode", "list"]);
    let modes = modes.as_array().unwrap();
    assert_eq!(modes.len(), 1);
    assert_eq!(modes[0]["id"], "work");
    assert_eq!(modes[0]["policy"], "BLOCK_SELECTED");
    assert_eq!(modes[0]["active"], false);
}

#[test]
fn test_policy_conflict_exits_nonzero() {
    let home = tempfile::tempdir().unwrap();
    run_json(home.path(), &["mode", "add", "Block", "--id", "b", "--policy", "block"]);
    run_json(home.path(), &["mode", "add", "Allow", "--id", "a", "--policy", "allow"]);
    run_json(home.path(), &["mode", "activate", "b"]);

    let (stdout, stderr, code) = run_cli(home.path(), &["mode", "activate", "a"]);
    assert_ne!(code, 0);
    assert!(stdout.contains("POLICY_CONFLICT"));
    assert!(stderr.contains("policy conflict"));
}

#[test]
fn test_timed_activation_reports_timer() {
    let home = tempfile::tempdir().unwrap();
    run_json(home.path(), &["mode", "add", "Work", "--id", "work"]);
    let activated = run_json(home.path(), &["mode", "activate", "work", "--for", "30"]);
    let events = activated["events"].as_array().unwrap();
    assert!(events.iter().any(|e| e["type"] == "TimerSet"));

    let modes = run_json(home.path(), &["mode", "list"]);
    assert!(modes[0]["timed_until"].is_string());
}

#[test]
fn test_schedule_add_start_stop() {
    let home = tempfile::tempdir().unwrap();
    run_json(home.path(), &["mode", "add", "Work", "--id", "work"]);
    run_json(
        home.path(),
        &["schedule", "add", "Office", "--id", "office", "--day", "mon=09:00-17:00", "--day", "fri=22:00-02:00", "--mode", "work"],
    );

    let schedules = run_json(home.path(), &["schedule", "list"]);
    assert_eq!(schedules[0]["days"], serde_json::json!(["mon=09:00-17:00", "fri=22:00-02:00"]));

    run_json(home.path(), &["schedule", "start", "office"]);
    let state = run_json(home.path(), &["state", "show"]);
    assert_eq!(state["active_schedules"], serde_json::json!(["office"]));

    run_json(home.path(), &["schedule", "stop", "office"]);
    let state = run_json(home.path(), &["state", "show"]);
    assert_eq!(state["deactivated_schedules"], serde_json::json!(["office"]));
    assert_eq!(state["active_modes"], serde_json::json!([]));
}

#[test]
fn test_schedule_rejects_bad_day() {
    let home = tempfile::tempdir().unwrap();
    let (_, _, code) = run_cli(home.path(), &["schedule", "add", "Bad", "--day", "mon=25:00-26:00"]);
    assert_ne!(code, 0);
}

#[test]
fn test_token_tap_unlocks() {
    let home = tempfile::tempdir().unwrap();
    run_json(home.path(), &["mode", "add", "Work", "--id", "work"]);
    run_json(home.path(), &["token", "register", "04:A2:19:7B", "--name", "Desk tag", "--mode", "work", "--require"]);
    run_json(home.path(), &["token", "register", "DE:AD:BE:EF", "--name", "Spare tag"]);
    run_json(home.path(), &["mode", "activate", "work"]);

    let wrong = run_json(home.path(), &["token", "tap", "deadbeef"]);
    assert_eq!(wrong["feedback"], "wrong_token");

    let tapped = run_json(home.path(), &["token", "tap", "04a2197b"]);
    assert_eq!(tapped["feedback"], "unlocked");
    assert_eq!(tapped["modes_deactivated"], serde_json::json!(["work"]));
}

#[test]
fn test_mode_edit_keeps_released_token() {
    let home = tempfile::tempdir().unwrap();
    run_json(home.path(), &["mode", "add", "Work", "--id", "work"]);
    run_json(home.path(), &["token", "register", "04:A2:19:7B", "--name", "Desk tag", "--mode", "work", "--require"]);
    let tokens = run_json(home.path(), &["token", "list"]);
    let token_id = tokens[0]["id"].as_str().unwrap().to_string();
    run_json(home.path(), &["token", "delete", &token_id]);

    let edited = run_json(home.path(), &["mode", "edit", "work", "--name", "Deep work"]);
    assert_eq!(edited["outcome"], "SUCCESS");
    let modes = run_json(home.path(), &["mode", "list"]);
    assert_eq!(modes[0]["name"], "Deep work");
    assert!(modes[0]["required_token_id"].is_null());

    let (stdout, _, code) = run_cli(home.path(), &["mode", "edit", "missing", "--name", "X"]);
    assert_ne!(code, 0);
    assert!(stdout.contains("MODE_NOT_FOUND"));
}

#[test]
fn test_state_reset() {
    let home = tempfile::tempdir().unwrap();
    run_json(home.path(), &["mode", "add", "Work", "--id", "work"]);
    let reset = run_json(home.path(), &["state", "reset"]);
    assert_eq!(reset["reset"], true);

    let state = run_json(home.path(), &["state", "show"]);
    assert_eq!(state["modes"], serde_json::json!({}));
}

#[test]
fn test_config_get_set() {
    let home = tempfile::tempdir().unwrap();
    let (stdout, _, code) = run_cli(home.path(), &["config", "get", "enforcement.poll_interval_ms"]);
    assert_eq!(code, 0);
    assert_eq!(stdout.trim(), "500");

    let (_, _, code) = run_cli(home.path(), &["config", "set", "enforcement.poll_interval_ms", "250"]);
    assert_eq!(code, 0);
    let (stdout, _, _) = run_cli(home.path(), &["config", "get", "enforcement.poll_interval_ms"]);
    assert_eq!(stdout.trim(), "250");

    let (_, _, code) = run_cli(home.path(), &["config", "set", "no.such.key", "1"]);
    assert_ne!(code, 0);
}

#[test]
fn test_foreground_writes_file() {
    let home = tempfile::tempdir().unwrap();
    let (_, _, code) = run_cli(home.path(), &["foreground", "com.social"]);
    assert_eq!(code, 0);
    let content = std::fs::read_to_string(home.path().join("foreground")).unwrap();
    assert_eq!(content.trim(), "com.social");
}
