//! Multiplexer driver: the public surface every session owns a handle to.
//!
//! All state lives inside tmux itself; this driver only shells out to it.
//! There is deliberately no in-process terminal emulation here (the teacher's
//! `pty` module parses a local PTY with `vt100`; we don't own the PTY, tmux
//! does, and `capture-pane -e` hands us an already-rendered screen).

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, unbounded};

use super::common::{run_cmd, shell_escape, tmux_args_base};
use super::pane::{self, Key};
use super::server;
use crate::config::Config;

/// Handle to a live read-only byte stream piped from a pane. Dropping or
/// calling `stop` ends the background tailing thread.
pub struct Reader {
  rx: Receiver<Vec<u8>>,
  stop: Arc<AtomicBool>,
}

impl Reader {
  #[must_use]
  pub fn receiver(&self) -> &Receiver<Vec<u8>> {
    &self.rx
  }

  pub fn stop(&self) {
    self.stop.store(true, Ordering::Relaxed);
  }
}

/// Apply the fixed set of session options every hosted session must carry:
/// hidden status bar, full-size window regardless of which client is
/// attached, mouse reporting, and a scrollback deep enough to satisfy
/// `readAllScrollback`.
fn apply_session_options(cfg: &Config, target: &str) -> Result<()> {
  let opts: &[(&str, String)] = &[
    ("status", "off".to_string()),
    ("window-size", "largest".to_string()),
    ("mouse", "on".to_string()),
    ("history-limit", cfg.history_limit.to_string()),
  ];
  for (name, value) in opts {
    let mut cmd = std::process::Command::new("tmux");
    cmd
      .args(tmux_args_base(cfg))
      .arg("set-option")
      .arg("-t")
      .arg(target)
      .arg(name)
      .arg(value);
    run_cmd(&mut cmd).with_context(|| format!("set-option {name}"))?;
  }
  Ok(())
}

/// Create a new detached session hosting `argv`, sized `cols x rows`,
/// started in `cwd`.
pub fn create(
  cfg: &Config,
  target: &str,
  cwd: &std::path::Path,
  argv: &[String],
) -> Result<()> {
  server::ensure_server(cfg)?;

  let mut cmd = std::process::Command::new("tmux");
  cmd
    .args(tmux_args_base(cfg))
    .arg("new-session")
    .arg("-d")
    .arg("-s")
    .arg(target)
    .arg("-c")
    .arg(cwd);
  if !argv.is_empty() {
    cmd.arg(argv.join(" "));
  }
  run_cmd(&mut cmd).context("tmux new-session")?;

  apply_session_options(cfg, target)
}

/// Attach a read-only streaming reader to a pane's live output. Safe to call
/// again after a prior `Reader` was stopped (e.g. on client reconnect): each
/// call starts tailing from the file's current end, so callers rely on
/// `capturePane`/`readAllScrollback` for anything already on screen.
pub fn attach_reader(cfg: &Config, target: &str, pipe_dir: &std::path::Path) -> Result<Reader> {
  std::fs::create_dir_all(pipe_dir).context("create pipe directory")?;
  let pipe_path = pipe_dir.join(format!("{target}.pipe"));

  // pipe-pane toggles: calling it once starts streaming pane bytes into the
  // file, appending. Calling it again on an already-piped pane would stop
  // it, so make sure we only arm it if it isn't already active.
  let already_piping = std::process::Command::new("tmux")
    .args(tmux_args_base(cfg))
    .arg("display-message")
    .arg("-p")
    .arg("-t")
    .arg(target)
    .arg("#{pane_pipe}")
    .output()
    .ok()
    .map(|out| String::from_utf8_lossy(&out.stdout).trim() == "1")
    .unwrap_or(false);

  if !already_piping {
    let mut cmd = std::process::Command::new("tmux");
    cmd
      .args(tmux_args_base(cfg))
      .arg("pipe-pane")
      .arg("-o")
      .arg("-t")
      .arg(target)
      .arg(format!("cat >> '{}'", shell_escape(&pipe_path)));
    run_cmd(&mut cmd).context("tmux pipe-pane")?;
  }

  if !pipe_path.exists() {
    std::fs::write(&pipe_path, []).context("create pipe file")?;
  }

  let (tx, rx) = unbounded();
  let stop = Arc::new(AtomicBool::new(false));
  let thread_stop = Arc::clone(&stop);
  let thread_path = pipe_path.clone();

  std::thread::spawn(move || {
    let Ok(mut file) = std::fs::File::open(&thread_path) else {
      return;
    };
    use std::io::Seek;
    let _ = file.seek(std::io::SeekFrom::End(0));
    let mut buf = [0u8; 8192];
    while !thread_stop.load(Ordering::Relaxed) {
      match file.read(&mut buf) {
        Ok(0) => std::thread::sleep(Duration::from_millis(10)),
        Ok(n) => {
          if tx.send(buf[..n].to_vec()).is_err() {
            break;
          }
        }
        Err(_) => std::thread::sleep(Duration::from_millis(10)),
      }
    }
  });

  Ok(Reader { rx, stop })
}

pub fn send_keys(cfg: &Config, target: &str, key: &Key) -> Result<()> {
  pane::send_keys(cfg, target, key)
}

pub fn send_input_line(cfg: &Config, target: &str, text: &str) -> Result<()> {
  pane::send_input_line(cfg, target, text)
}

#[must_use]
pub fn capture_pane(cfg: &Config, target: &str) -> Vec<u8> {
  pane::capture_pane(cfg, target).unwrap_or_default()
}

#[must_use]
pub fn cursor_position(cfg: &Config, target: &str) -> (u32, u32) {
  pane::cursor_position(cfg, target)
}

#[must_use]
pub fn read_all_scrollback(cfg: &Config, target: &str) -> Vec<u8> {
  pane::read_all_scrollback(cfg, target).unwrap_or_default()
}

#[must_use]
pub fn is_alive(cfg: &Config, target: &str) -> bool {
  let has_session = std::process::Command::new("tmux")
    .args(tmux_args_base(cfg))
    .arg("has-session")
    .arg("-t")
    .arg(target)
    .stdout(std::process::Stdio::null())
    .stderr(std::process::Stdio::null())
    .status()
    .is_ok_and(|st| st.success());
  has_session && !pane::pane_dead(cfg, target)
}

pub fn kill(cfg: &Config, target: &str) -> Result<()> {
  let output = std::process::Command::new("tmux")
    .args(tmux_args_base(cfg))
    .arg("kill-session")
    .arg("-t")
    .arg(target)
    .output()
    .context("tmux kill-session")?;
  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.contains("session not found") && !stderr.contains("can't find session") {
      anyhow::bail!("tmux kill-session failed: {}", stderr.trim());
    }
  }
  Ok(())
}

/// Resize a pane's window. Combined with `window-size largest`, the largest
/// attached client wins; this is the per-client resize-settle path.
pub fn resize(cfg: &Config, target: &str, cols: u16, rows: u16) -> Result<()> {
  let mut cmd = std::process::Command::new("tmux");
  cmd
    .args(tmux_args_base(cfg))
    .arg("resize-window")
    .arg("-t")
    .arg(target)
    .arg("-x")
    .arg(cols.to_string())
    .arg("-y")
    .arg(rows.to_string());
  run_cmd(&mut cmd).context("tmux resize-window")
}

#[must_use]
pub fn pipe_file_path(pipe_dir: &std::path::Path, target: &str) -> PathBuf {
  pipe_dir.join(format!("{target}.pipe"))
}
