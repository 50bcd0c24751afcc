//! Debounced screen-capture pipeline.
//!
//! Coalesces bursts of pane activity into at most one `capturePane` call per
//! debounce window, and guards against overlapping captures with a
//! `captureInFlight` flag, mirroring the way the teacher keeps a dedicated
//! background thread per concern instead of a shared executor.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::Config;
use crate::tmux;

use super::Session;

struct Shared {
  debounce: Duration,
  resize_settle: Duration,
  generation: AtomicU64,
  capture_in_flight: AtomicBool,
  last_emitted: Mutex<Option<Vec<u8>>>,
  bound: Mutex<Option<(Weak<Session>, Config)>>,
}

pub struct CapturePipeline {
  shared: Arc<Shared>,
}

impl CapturePipeline {
  #[must_use]
  pub fn new(debounce: Duration, resize_settle: Duration) -> Self {
    Self {
      shared: Arc::new(Shared {
        debounce,
        resize_settle,
        generation: AtomicU64::new(0),
        capture_in_flight: AtomicBool::new(false),
        last_emitted: Mutex::new(None),
        bound: Mutex::new(None),
      }),
    }
  }

  pub fn bind(&self, session: Weak<Session>, cfg: Config) {
    *self.shared.bound.lock() = Some((session, cfg));
  }

  /// Called on every `activity` event while `hasReceivedResize` is true.
  /// Trailing debounce: bumps a generation counter and arms a timer thread
  /// that, if no newer trigger arrives within the debounce window, runs the
  /// capture.
  pub fn notify(&self, _now: Instant) {
    let gen = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
    let shared = Arc::clone(&self.shared);
    std::thread::spawn(move || {
      std::thread::sleep(shared.debounce);
      if shared.generation.load(Ordering::SeqCst) == gen {
        run_capture(&shared);
      }
    });
  }

  /// On resize: clear the last-emitted screen so the next capture always
  /// emits, and schedule a forced re-capture after the settle delay.
  pub fn on_resize(&self) {
    *self.shared.last_emitted.lock() = None;
    let shared = Arc::clone(&self.shared);
    std::thread::spawn(move || {
      std::thread::sleep(shared.resize_settle);
      run_capture(&shared);
    });
  }

  /// The last post-processed screen the debounce pipeline emitted, or a
  /// synchronous capture taken on the spot if nothing has been captured yet
  /// (e.g. `get_output` arriving before the session's first debounce fires).
  pub fn last_screen(&self, cfg: &Config, session: &Session) -> Vec<u8> {
    if let Some(existing) = self.shared.last_emitted.lock().clone() {
      return existing;
    }
    let raw = tmux::driver::capture_pane(cfg, session.mux_name());
    let (row, col) = tmux::driver::cursor_position(cfg, session.mux_name());
    post_process(&raw, row, col)
  }
}

fn run_capture(shared: &Arc<Shared>) {
  if shared
    .capture_in_flight
    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
    .is_err()
  {
    return;
  }
  let result = (|| -> Option<()> {
    let guard = shared.bound.lock();
    let (weak, cfg) = guard.as_ref()?;
    let session = weak.upgrade()?;
    let cfg = cfg.clone();
    drop(guard);

    let raw = tmux::driver::capture_pane(&cfg, session.mux_name());
    let (row, col) = tmux::driver::cursor_position(&cfg, session.mux_name());
    let processed = post_process(&raw, row, col);

    let mut last = shared.last_emitted.lock();
    if last.as_ref() != Some(&processed) {
      *last = Some(processed.clone());
      drop(last);
      session.emit_output(String::from_utf8_lossy(&processed).into_owned());
    }
    Some(())
  })();
  let _ = result;
  shared.capture_in_flight.store(false, Ordering::SeqCst);
}

/// Trim trailing whitespace per row, strip trailing empty rows, append a
/// cursor-position escape.
fn post_process(raw: &[u8], row: u32, col: u32) -> Vec<u8> {
  let text = String::from_utf8_lossy(raw);
  let mut rows: Vec<&str> = text.lines().map(|l| l.trim_end()).collect();
  while rows.last().is_some_and(|l| l.is_empty()) {
    rows.pop();
  }
  let mut out = rows.join("\n").into_bytes();
  if !out.is_empty() {
    out.push(b'\n');
  }
  out.extend_from_slice(format!("\x1b[{};{}H", row + 1, col + 1).as_bytes());
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn post_process_trims_trailing_rows_and_appends_cursor() {
    let raw = b"hello   \nworld\n\n\n";
    let out = post_process(raw, 1, 2);
    let text = String::from_utf8_lossy(&out);
    assert!(text.starts_with("hello\nworld\n"));
    assert!(text.ends_with("\x1b[2;3H"));
  }
}
