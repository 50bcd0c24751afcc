use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use super::common::{GUARD_SESSION, SERVER_READY_TIMEOUT, tmux_args_base};
use crate::config::Config;

/// Ensure the socket directory exists with proper permissions (0700).
fn ensure_socket_directory(cfg: &Config) -> Result<()> {
  use std::os::unix::fs::PermissionsExt;

  let Some(dir) = cfg.paths.tmux_socket.parent() else {
    return Ok(());
  };
  std::fs::create_dir_all(dir)
    .with_context(|| format!("failed to create socket directory: {}", dir.display()))?;
  std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
    .with_context(|| format!("failed to set permissions on socket directory: {}", dir.display()))?;
  Ok(())
}

/// Remove a stale socket file if it exists but the server isn't running.
fn cleanup_stale_socket(cfg: &Config) {
  let sock = &cfg.paths.tmux_socket;
  if !sock.exists() {
    return;
  }
  let responsive = std::process::Command::new("tmux")
    .args(tmux_args_base(cfg))
    .arg("list-sessions")
    .stdout(std::process::Stdio::null())
    .stderr(std::process::Stdio::null())
    .status()
    .is_ok_and(|st| st.success());
  if !responsive {
    let _ = std::fs::remove_file(sock);
  }
}

fn wait_for_server_ready(cfg: &Config, timeout: Duration) -> Result<()> {
  let start = Instant::now();
  let mut delay_ms = 10u64;
  let max_delay_ms = 200u64;
  let mut last_stderr = String::new();

  while start.elapsed() < timeout {
    let output = std::process::Command::new("tmux")
      .args(tmux_args_base(cfg))
      .arg("list-sessions")
      .stdout(std::process::Stdio::null())
      .output();
    match output {
      Ok(out) if out.status.success() => return Ok(()),
      Ok(out) => last_stderr = String::from_utf8_lossy(&out.stderr).trim().to_string(),
      Err(err) => last_stderr = err.to_string(),
    }
    std::thread::sleep(Duration::from_millis(delay_ms));
    delay_ms = (delay_ms * 2).min(max_delay_ms);
  }

  if last_stderr.is_empty() {
    anyhow::bail!("tmux server did not become ready within {timeout:?}");
  }
  anyhow::bail!("tmux server did not become ready within {timeout:?}: {last_stderr}");
}

/// Ensure a dedicated tmux server is running on our socket by maintaining a
/// hidden guard session. Fatal to session start on failure.
pub fn ensure_server(cfg: &Config) -> Result<()> {
  ensure_socket_directory(cfg)?;
  cleanup_stale_socket(cfg);

  if is_server_running(cfg) {
    return Ok(());
  }

  let output = std::process::Command::new("tmux")
    .args(tmux_args_base(cfg))
    .arg("new-session")
    .arg("-d")
    .arg("-s")
    .arg(GUARD_SESSION)
    .output()
    .context("failed to spawn tmux new-session")?;

  if !output.status.success() {
    if is_server_running(cfg) {
      return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    anyhow::bail!("failed to create tmux guard session: {}", stderr.trim());
  }

  if !is_server_running(cfg) {
    anyhow::bail!(
      "tmux guard session exited immediately after start on socket {}",
      cfg.paths.tmux_socket.display()
    );
  }

  wait_for_server_ready(cfg, SERVER_READY_TIMEOUT)
}

/// Check if the tmux server is running by probing for the guard session.
pub fn is_server_running(cfg: &Config) -> bool {
  std::process::Command::new("tmux")
    .args(tmux_args_base(cfg))
    .arg("has-session")
    .arg("-t")
    .arg(GUARD_SESSION)
    .stdout(std::process::Stdio::null())
    .stderr(std::process::Stdio::null())
    .status()
    .is_ok_and(|st| st.success())
}

/// List every live multiplexer session name on our dedicated server.
pub fn list_session_names(cfg: &Config) -> Result<Vec<String>> {
  let output = std::process::Command::new("tmux")
    .args(tmux_args_base(cfg))
    .arg("list-sessions")
    .arg("-F")
    .arg("#{session_name}")
    .output()
    .context("tmux list-sessions")?;
  if !output.status.success() {
    return Ok(Vec::new());
  }
  Ok(
    String::from_utf8_lossy(&output.stdout)
      .lines()
      .map(str::to_string)
      .collect(),
  )
}

/// Stop the dedicated tmux server, killing every hosted session with it.
pub fn stop_server(cfg: &Config) -> Result<()> {
  let output = std::process::Command::new("tmux")
    .args(tmux_args_base(cfg))
    .arg("kill-server")
    .output()
    .context("failed to run tmux kill-server")?;
  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.contains("no server running") {
      anyhow::bail!("tmux kill-server failed: {}", stderr.trim());
    }
  }
  let _ = std::fs::remove_file(&cfg.paths.tmux_socket);
  Ok(())
}
