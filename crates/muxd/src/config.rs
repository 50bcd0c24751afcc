//! Configuration loading and XDG path resolution.
//!
//! Three-tier merge, mirroring the teacher's `agency.toml` pattern: embedded
//! defaults (`defaults/muxd.toml`) are parsed first, then overridden by
//! `$XDG_CONFIG_HOME/muxd/muxd.toml` if present. There is no project-level
//! tier here -- a daemon has no single project root.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

const DEFAULT_TOML: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/defaults/muxd.toml"));

#[derive(Debug, Clone, Default, Deserialize)]
struct PartialConfig {
  bind_port: Option<u16>,
  tmux_prefix: Option<String>,
  idle_threshold_ms: Option<u64>,
  debounce_ms: Option<u64>,
  liveness_probe_ms: Option<u64>,
  history_limit: Option<u32>,
  resize_settle_ms: Option<u64>,
  restart_grace_ms: Option<u64>,
  client_send_queue: Option<usize>,
}

impl PartialConfig {
  fn merge(mut self, other: PartialConfig) -> Self {
    if other.bind_port.is_some() {
      self.bind_port = other.bind_port;
    }
    if other.tmux_prefix.is_some() {
      self.tmux_prefix = other.tmux_prefix;
    }
    if other.idle_threshold_ms.is_some() {
      self.idle_threshold_ms = other.idle_threshold_ms;
    }
    if other.debounce_ms.is_some() {
      self.debounce_ms = other.debounce_ms;
    }
    if other.liveness_probe_ms.is_some() {
      self.liveness_probe_ms = other.liveness_probe_ms;
    }
    if other.history_limit.is_some() {
      self.history_limit = other.history_limit;
    }
    if other.resize_settle_ms.is_some() {
      self.resize_settle_ms = other.resize_settle_ms;
    }
    if other.restart_grace_ms.is_some() {
      self.restart_grace_ms = other.restart_grace_ms;
    }
    if other.client_send_queue.is_some() {
      self.client_send_queue = other.client_send_queue;
    }
    self
  }
}

/// Resolved daemon configuration, merged from embedded defaults and the
/// user's global config file.
#[derive(Debug, Clone)]
pub struct Config {
  pub bind_port: u16,
  pub tmux_prefix: String,
  pub idle_threshold: Duration,
  pub debounce: Duration,
  pub liveness_probe: Duration,
  pub history_limit: u32,
  pub resize_settle: Duration,
  pub restart_grace: Duration,
  pub client_send_queue: usize,
  pub paths: Paths,
}

impl Config {
  /// Load configuration by merging embedded defaults with the global config
  /// file, if one exists.
  pub fn load() -> Result<Self> {
    let paths = Paths::resolve()?;
    let defaults: PartialConfig =
      toml::from_str(DEFAULT_TOML).context("parse embedded defaults/muxd.toml")?;
    let merged = match std::fs::read_to_string(&paths.config_file) {
      Ok(contents) => {
        let user: PartialConfig = toml::from_str(&contents)
          .with_context(|| format!("parse {}", paths.config_file.display()))?;
        defaults.merge(user)
      }
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => defaults,
      Err(e) => {
        return Err(e).with_context(|| format!("read {}", paths.config_file.display()));
      }
    };
    let mut cfg = Self::from_partial(merged, paths);
    // `muxd start -p <port>` threads the override through the detached
    // supervisor/daemon process tree via the environment rather than a
    // rewritten config file, since the daemon may outlive the CLI invocation
    // that started it.
    if let Ok(raw) = std::env::var("MUXD_BIND_PORT")
      && let Ok(port) = raw.parse()
    {
      cfg.bind_port = port;
    }
    Ok(cfg)
  }

  fn from_partial(p: PartialConfig, paths: Paths) -> Self {
    Self {
      bind_port: p.bind_port.unwrap_or(7913),
      tmux_prefix: p.tmux_prefix.unwrap_or_else(|| "muxd".to_string()),
      idle_threshold: Duration::from_millis(p.idle_threshold_ms.unwrap_or(3000)),
      debounce: Duration::from_millis(p.debounce_ms.unwrap_or(30)),
      liveness_probe: Duration::from_millis(p.liveness_probe_ms.unwrap_or(5000)),
      history_limit: p.history_limit.unwrap_or(10_000),
      resize_settle: Duration::from_millis(p.resize_settle_ms.unwrap_or(150)),
      restart_grace: Duration::from_millis(p.restart_grace_ms.unwrap_or(2000)),
      client_send_queue: p.client_send_queue.unwrap_or(256),
      paths,
    }
  }

  /// Build the multiplexer session name for a session id.
  #[must_use]
  pub fn mux_name(&self, id: &str) -> String {
    format!("{}-{}", self.tmux_prefix, id)
  }
}

/// Filesystem layout for persisted daemon state.
#[derive(Debug, Clone)]
pub struct Paths {
  pub config_dir: PathBuf,
  pub config_file: PathBuf,
  pub state_dir: PathBuf,
  pub store_file: PathBuf,
  pub pid_file: PathBuf,
  pub log_file: PathBuf,
  pub tmux_socket: PathBuf,
}

impl Paths {
  fn resolve() -> Result<Self> {
    let xdg = xdg::BaseDirectories::with_prefix("muxd");
    let config_dir = xdg
      .get_config_home()
      .ok_or_else(|| anyhow::anyhow!("unable to resolve XDG config home"))?;
    let state_dir = resolve_state_home();
    Ok(Self {
      config_file: config_dir.join("muxd.toml"),
      config_dir,
      store_file: state_dir.join("store.sqlite3"),
      pid_file: state_dir.join("muxd.pid"),
      log_file: state_dir.join("muxd.log"),
      tmux_socket: state_dir.join("tmux.sock"),
      state_dir,
    })
  }

  pub fn ensure_state_dir(&self) -> Result<()> {
    std::fs::create_dir_all(&self.state_dir)
      .with_context(|| format!("create state dir {}", self.state_dir.display()))
  }
}

/// Resolve `$XDG_STATE_HOME/muxd`, falling back to `~/.local/state/muxd`.
fn resolve_state_home() -> PathBuf {
  if let Ok(dir) = std::env::var("XDG_STATE_HOME")
    && !dir.trim().is_empty()
  {
    return PathBuf::from(dir).join("muxd");
  }
  let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
  PathBuf::from(home).join(".local/state/muxd")
}
