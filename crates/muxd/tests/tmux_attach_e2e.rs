//! Live end-to-end test driving the real daemon through a real tmux
//! session: spawn the daemon, create a shell session over the CLI, attach
//! to it through an actual PTY with `expectrl` (the same terminal client
//! `muxd attach` execs into), and confirm a round-tripped command and a
//! clean detach.
//!
//! Grounded on the teacher's `crates/agency/tests/pty_attach.rs` (spawn the
//! real daemon binary, wait for it to come up, drive an attached PTY
//! session with `expectrl`, detach, tear the daemon down), adapted from its
//! Unix-socket handshake to this crate's TCP port + `tmux attach-session`.

#![cfg(unix)]

use std::net::{TcpListener, TcpStream};
use std::process::{Child, Command};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use assert_cmd::prelude::*;
use expectrl::{Eof, Expect, Session};
use predicates::prelude::*;
use regex::Regex;
use serial_test::serial;
use tempfile::TempDir;

fn bin() -> std::path::PathBuf {
  assert_cmd::cargo::cargo_bin!("muxd").to_path_buf()
}

fn free_port() -> Result<u16> {
  let listener = TcpListener::bind("127.0.0.1:0").context("bind ephemeral port")?;
  Ok(listener.local_addr()?.port())
}

fn wait_for_port(port: u16, timeout: Duration) -> Result<()> {
  let start = Instant::now();
  while start.elapsed() < timeout {
    if TcpStream::connect(("127.0.0.1", port)).is_ok() {
      return Ok(());
    }
    std::thread::sleep(Duration::from_millis(50));
  }
  anyhow::bail!("daemon did not start listening on port {port} within {timeout:?}")
}

fn isolated_env(cmd: &mut Command, home: &TempDir) {
  cmd.env("XDG_CONFIG_HOME", home.path().join("config"));
  cmd.env("XDG_STATE_HOME", home.path().join("state"));
  cmd.env("HOME", home.path());
}

fn spawn_daemon(home: &TempDir, port: u16) -> Result<Child> {
  let mut cmd = Command::new(bin());
  isolated_env(&mut cmd, home);
  cmd
    .arg("start")
    .arg("-f")
    .arg("-p")
    .arg(port.to_string())
    .stdin(std::process::Stdio::null())
    .stdout(std::process::Stdio::null())
    .stderr(std::process::Stdio::null());
  cmd.spawn().context("spawn daemon")
}

fn session_id_from_stdout(stdout: &str) -> Result<String> {
  let re = Regex::new(r"created session ([0-9A-Za-z]{12})").expect("valid id regex");
  let caps = re
    .captures(stdout)
    .with_context(|| format!("no session id in stdout: {stdout}"))?;
  Ok(caps[1].to_string())
}

#[test]
#[serial]
fn create_attach_roundtrip_and_kill() -> Result<()> {
  let home = TempDir::new()?;
  let project = TempDir::new()?;
  let port = free_port()?;

  let mut daemon = spawn_daemon(&home, port)?;
  wait_for_port(port, Duration::from_secs(5))?;

  let mut new_cmd = Command::new(bin());
  isolated_env(&mut new_cmd, &home);
  new_cmd.arg("new").arg("--shell").arg("-p").arg(project.path());
  let new_output = new_cmd.output().context("run `muxd new --shell`")?;
  assert!(new_output.status.success(), "new_output: {new_output:?}");
  let stdout = String::from_utf8_lossy(&new_output.stdout).into_owned();
  let session_id = session_id_from_stdout(&stdout)?;

  let mut attach_cmd = Command::new(bin());
  isolated_env(&mut attach_cmd, &home);
  attach_cmd.arg("attach").arg(&session_id);
  let mut attach_session = Session::spawn(attach_cmd).context("spawn attach under a pty")?;
  attach_session.set_expect_timeout(Some(Duration::from_secs(5)));

  attach_session.send_line("echo MUXD_E2E_READY")?;
  attach_session.expect("MUXD_E2E_READY")?;

  // tmux's default prefix (C-b) followed by `d` detaches the client
  // cleanly without tearing down the hosted session.
  attach_session.send("\x02d")?;
  attach_session.expect(Eof)?;

  let mut kill_cmd = Command::new(bin());
  isolated_env(&mut kill_cmd, &home);
  kill_cmd.arg("kill").arg(&session_id);
  kill_cmd
    .assert()
    .success()
    .stdout(predicates::str::contains("killed session"));

  let mut list_cmd = Command::new(bin());
  isolated_env(&mut list_cmd, &home);
  list_cmd.arg("list");
  let list_output = list_cmd.output().context("run `muxd list`")?;
  let list_stdout = String::from_utf8_lossy(&list_output.stdout);
  assert!(!list_stdout.contains(&session_id), "list_stdout: {list_stdout}");

  let _ = daemon.kill();
  let _ = daemon.wait();
  Ok(())
}
