//! CLI behavior that doesn't require a running daemon.
//!
//! Grounded on the teacher's `cli/tests/friendly_errors.rs` (spawn the real
//! binary via `assert_cmd`, point XDG/env vars at an isolated temp
//! directory, assert on stdout/stderr content).

use assert_cmd::prelude::*;
use std::process::Command;
use tempfile::TempDir;

fn isolated_cmd(home: &TempDir) -> Command {
  let mut cmd = Command::cargo_bin("muxd").expect("compile bin");
  cmd.env("XDG_CONFIG_HOME", home.path().join("config"));
  cmd.env("XDG_STATE_HOME", home.path().join("state"));
  cmd.env("HOME", home.path());
  cmd.env_remove("MUXD_BIND_PORT");
  cmd
}

#[test]
fn status_reports_stopped_with_no_daemon() {
  let home = TempDir::new().unwrap();
  let output = isolated_cmd(&home).arg("status").output().unwrap();
  assert!(output.status.success());
  let stdout = String::from_utf8_lossy(&output.stdout);
  assert!(stdout.contains("stopped"), "stdout: {stdout}");
}

#[test]
fn token_reports_none_generated_before_first_start() {
  let home = TempDir::new().unwrap();
  let output = isolated_cmd(&home).arg("token").output().unwrap();
  assert!(output.status.success());
  let stdout = String::from_utf8_lossy(&output.stdout);
  assert!(stdout.contains("no token"), "stdout: {stdout}");
}

#[test]
fn stop_reports_not_running_when_no_daemon_is_up() {
  let home = TempDir::new().unwrap();
  let output = isolated_cmd(&home).arg("stop").output().unwrap();
  assert!(output.status.success());
  let stdout = String::from_utf8_lossy(&output.stdout);
  assert!(stdout.contains("not running"), "stdout: {stdout}");
}

#[test]
fn list_fails_gracefully_without_a_daemon() {
  let home = TempDir::new().unwrap();
  let output = isolated_cmd(&home).arg("list").output().unwrap();
  assert!(!output.status.success());
}

#[test]
fn bare_invocation_prints_help() {
  let home = TempDir::new().unwrap();
  let output = isolated_cmd(&home).output().unwrap();
  assert!(output.status.success());
  let stdout = String::from_utf8_lossy(&output.stdout);
  assert!(stdout.contains("muxd"), "stdout: {stdout}");
}
