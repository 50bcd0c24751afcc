use anyhow::{Context, Result};

use super::common::{run_cmd, tmux_args_base};
use crate::config::Config;

/// A single key sent to a pane: either verbatim literal text or one of the
/// multiplexer's named keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
  Literal(String),
  Named(NamedKey),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamedKey {
  CtrlC,
  Escape,
  Enter,
  Tab,
  BSpace,
  Up,
  Down,
  Left,
  Right,
  PageUp,
  PageDown,
}

impl NamedKey {
  fn tmux_name(self) -> &'static str {
    match self {
      NamedKey::CtrlC => "C-c",
      NamedKey::Escape => "Escape",
      NamedKey::Enter => "Enter",
      NamedKey::Tab => "Tab",
      NamedKey::BSpace => "BSpace",
      NamedKey::Up => "Up",
      NamedKey::Down => "Down",
      NamedKey::Left => "Left",
      NamedKey::Right => "Right",
      NamedKey::PageUp => "PageUp",
      NamedKey::PageDown => "PageDown",
    }
  }
}

/// Map one of the closed set of recognized raw input encodings (escape
/// sequences produced by a real terminal) to a named key. Any other byte
/// sequence is sent literally, verbatim, with no interpretation.
#[must_use]
pub fn map_raw_key(bytes: &[u8]) -> Key {
  match bytes {
    b"\x03" => Key::Named(NamedKey::CtrlC),
    b"\x1b" => Key::Named(NamedKey::Escape),
    b"\r" | b"\n" => Key::Named(NamedKey::Enter),
    b"\t" => Key::Named(NamedKey::Tab),
    b"\x7f" | b"\x08" => Key::Named(NamedKey::BSpace),
    b"\x1b[A" => Key::Named(NamedKey::Up),
    b"\x1b[B" => Key::Named(NamedKey::Down),
    b"\x1b[C" => Key::Named(NamedKey::Right),
    b"\x1b[D" => Key::Named(NamedKey::Left),
    b"\x1b[5~" => Key::Named(NamedKey::PageUp),
    b"\x1b[6~" => Key::Named(NamedKey::PageDown),
    other => Key::Literal(String::from_utf8_lossy(other).into_owned()),
  }
}

/// Send a key to a pane. Literal text is sent verbatim (`send-keys -l`);
/// named keys are sent by name with no `-l` so tmux interprets them.
pub fn send_keys(cfg: &Config, target: &str, key: &Key) -> Result<()> {
  let mut cmd = std::process::Command::new("tmux");
  cmd.args(tmux_args_base(cfg)).arg("send-keys").arg("-t").arg(target);
  match key {
    Key::Literal(text) => {
      cmd.arg("-l").arg(text);
    }
    Key::Named(named) => {
      cmd.arg(named.tmux_name());
    }
  }
  run_cmd(&mut cmd)
}

/// Send literal text followed by Enter, as two separate driver calls.
pub fn send_input_line(cfg: &Config, target: &str, text: &str) -> Result<()> {
  send_keys(cfg, target, &Key::Literal(text.to_string()))?;
  send_keys(cfg, target, &Key::Named(NamedKey::Enter))
}

/// Capture the full current pane, including color escapes, as raw bytes
/// with one LF-terminated row per line.
pub fn capture_pane(cfg: &Config, target: &str) -> Result<Vec<u8>> {
  let out = std::process::Command::new("tmux")
    .args(tmux_args_base(cfg))
    .arg("capture-pane")
    .arg("-e")
    .arg("-p")
    .arg("-t")
    .arg(target)
    .output()
    .context("tmux capture-pane failed")?;
  if !out.status.success() {
    return Ok(Vec::new());
  }
  Ok(out.stdout)
}

/// Capture the entire scrollback history buffer, verbatim.
pub fn read_all_scrollback(cfg: &Config, target: &str) -> Result<Vec<u8>> {
  let out = std::process::Command::new("tmux")
    .args(tmux_args_base(cfg))
    .arg("capture-pane")
    .arg("-e")
    .arg("-p")
    .arg("-S")
    .arg("-")
    .arg("-E")
    .arg("-")
    .arg("-t")
    .arg(target)
    .output()
    .context("tmux capture-pane (scrollback) failed")?;
  if !out.status.success() {
    return Ok(Vec::new());
  }
  Ok(out.stdout)
}

/// Best-effort 0-based cursor position `(row, col)`. Failure yields `(0, 0)`.
#[must_use]
pub fn cursor_position(cfg: &Config, target: &str) -> (u32, u32) {
  let out = std::process::Command::new("tmux")
    .args(tmux_args_base(cfg))
    .arg("display-message")
    .arg("-p")
    .arg("-t")
    .arg(target)
    .arg("#{cursor_y} #{cursor_x}")
    .output();
  let Ok(out) = out else {
    return (0, 0);
  };
  if !out.status.success() {
    return (0, 0);
  }
  let text = String::from_utf8_lossy(&out.stdout);
  let mut parts = text.trim().split_whitespace();
  let row = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
  let col = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
  (row, col)
}

/// Probe whether a pane is dead (the hosted process has exited but tmux
/// kept the pane around).
#[must_use]
pub fn pane_dead(cfg: &Config, target: &str) -> bool {
  let out = std::process::Command::new("tmux")
    .args(tmux_args_base(cfg))
    .arg("list-panes")
    .arg("-F")
    .arg("#{pane_dead}")
    .arg("-t")
    .arg(target)
    .output();
  let Ok(out) = out else {
    return false;
  };
  if !out.status.success() {
    return false;
  }
  String::from_utf8_lossy(&out.stdout)
    .lines()
    .any(|l| l.trim() == "1")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn maps_known_raw_encodings() {
    assert_eq!(map_raw_key(b"\x03"), Key::Named(NamedKey::CtrlC));
    assert_eq!(map_raw_key(b"\x1b"), Key::Named(NamedKey::Escape));
    assert_eq!(map_raw_key(b"\r"), Key::Named(NamedKey::Enter));
    assert_eq!(map_raw_key(b"\n"), Key::Named(NamedKey::Enter));
    assert_eq!(map_raw_key(b"\t"), Key::Named(NamedKey::Tab));
    assert_eq!(map_raw_key(b"\x7f"), Key::Named(NamedKey::BSpace));
    assert_eq!(map_raw_key(b"\x1b[A"), Key::Named(NamedKey::Up));
    assert_eq!(map_raw_key(b"\x1b[B"), Key::Named(NamedKey::Down));
    assert_eq!(map_raw_key(b"\x1b[C"), Key::Named(NamedKey::Right));
    assert_eq!(map_raw_key(b"\x1b[D"), Key::Named(NamedKey::Left));
    assert_eq!(map_raw_key(b"\x1b[5~"), Key::Named(NamedKey::PageUp));
    assert_eq!(map_raw_key(b"\x1b[6~"), Key::Named(NamedKey::PageDown));
  }

  #[test]
  fn unknown_bytes_are_literal() {
    assert_eq!(map_raw_key(b"hello"), Key::Literal("hello".to_string()));
    assert_eq!(map_raw_key(b"\x1b[999~"), Key::Literal("\u{1b}[999~".to_string()));
  }
}
