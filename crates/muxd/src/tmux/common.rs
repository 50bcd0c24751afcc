use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::config::Config;

pub const GUARD_SESSION: &str = "__muxd_guard__";
pub const SERVER_READY_TIMEOUT: Duration = Duration::from_secs(2);

/// Base tmux command arguments pinning every invocation to our dedicated
/// server socket, so a developer's personal tmux habit never collides with
/// hosted sessions.
pub fn tmux_args_base(cfg: &Config) -> Vec<String> {
  vec!["-S".to_string(), cfg.paths.tmux_socket.display().to_string()]
}

/// Run a command and return an error if it fails.
pub fn run_cmd(cmd: &mut std::process::Command) -> Result<()> {
  let status = cmd.status().with_context(|| format!("spawn {cmd:?}"))?;
  if status.success() {
    Ok(())
  } else {
    anyhow::bail!("command failed: {cmd:?}")
  }
}

/// Escape a path for use in shell commands.
pub fn shell_escape(path: &Path) -> String {
  path
    .display()
    .to_string()
    .replace('\\', "\\\\")
    .replace('"', "\\\"")
    .replace('\'', "'\\''")
}
