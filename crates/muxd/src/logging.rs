//! Daemon logging.
//!
//! The CLI-facing tints (`log_info!`/`log_success!`/`log_warn!`/`log_error!`
//! in `utils::log`) are for commands a human runs at a terminal. The daemon
//! itself runs detached with no terminal attached, so its `log`/`env_logger`
//! init (same crates, same `from_env(Env::default().default_filter_or(...))`
//! pattern the teacher uses) is pointed at a tee writer that duplicates
//! every formatted line to stdout (useful under `-f` foreground / a service
//! manager's journal capture) and appends it to the configured log file.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use env_logger::{Builder, Env, Target};

struct Tee {
  file: Mutex<File>,
}

impl Write for Tee {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    io::stdout().write_all(buf)?;
    self
      .file
      .lock()
      .unwrap_or_else(std::sync::PoisonError::into_inner)
      .write_all(buf)?;
    Ok(buf.len())
  }

  fn flush(&mut self) -> io::Result<()> {
    io::stdout().flush()?;
    self
      .file
      .lock()
      .unwrap_or_else(std::sync::PoisonError::into_inner)
      .flush()
  }
}

/// Initialize the global logger for the daemon process: `info` by default,
/// overridable with `MUXD_LOG`, every line teed to `log_file`.
pub fn init_daemon(log_file: &Path) -> Result<()> {
  let file = OpenOptions::new()
    .create(true)
    .append(true)
    .open(log_file)
    .with_context(|| format!("open log file {}", log_file.display()))?;
  let tee = Tee { file: Mutex::new(file) };
  Builder::from_env(Env::default().filter_or("MUXD_LOG", "info"))
    .format_timestamp_secs()
    .target(Target::Pipe(Box::new(tee)))
    .try_init()
    .ok();
  Ok(())
}

