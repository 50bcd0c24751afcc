//! Implementations for each CLI subcommand.
//!
//! Grounded on the teacher's `cli::commands::{daemon,status,attach,new}`:
//! each command is a free function that talks directly to stdout/stderr and
//! calls `std::process::exit` on failure rather than bubbling a `Result` up
//! to `main`, matching the teacher's `fn foo() { ... }` (no return value)
//! command shape.

use std::io::Write as _;
use std::os::unix::process::CommandExt as _;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use anyhow::{Context, Result};

use crate::config::Config;
use crate::protocol::{C2D, D2C, SessionState, SessionType, SessionView};
use crate::store::Store;
use crate::utils::term::print_table;
use crate::{log_error, log_info, log_success, log_warn};

use super::client::Client;
use super::{AttachArgs, KillArgs, NewArgs, StartArgs, StopArgs, TokenArgs};

fn load_config_or_exit() -> Config {
  match Config::load() {
    Ok(cfg) => cfg,
    Err(err) => {
      log_error!("failed to load configuration: {err:#}");
      std::process::exit(1);
    }
  }
}

/// pid of a live daemon process, if the pid file names one that still
/// responds to signal 0.
fn running_pid(cfg: &Config) -> Option<u32> {
  let raw = std::fs::read_to_string(&cfg.paths.pid_file).ok()?;
  let pid: u32 = raw.trim().parse().ok()?;
  let status = Command::new("kill").arg("-0").arg(pid.to_string()).status().ok()?;
  status.success().then_some(pid)
}

fn open_store(cfg: &Config) -> Result<Store> {
  cfg.paths.ensure_state_dir().context("prepare state directory")?;
  Store::open(&cfg.paths.store_file).context("open durable store")
}

fn daemon_token(cfg: &Config) -> Result<String> {
  let store = open_store(cfg)?;
  store.get_auth_token()?.context("no token has been generated yet -- start the daemon first")
}

fn connect(cfg: &Config) -> Result<Client> {
  let token = daemon_token(cfg)?;
  Client::connect(cfg.bind_port, &token)
}

pub fn start(args: StartArgs) {
  if let Some(port) = args.port {
    // Set before `Config::load()` so `-p` applies whether or not the
    // daemon ends up detached: `load_config_or_exit` reads `MUXD_BIND_PORT`
    // regardless of path, and the detached branch re-threads the same env
    // var through the child it spawns below.
    unsafe {
      std::env::set_var("MUXD_BIND_PORT", port.to_string());
    }
  }
  let cfg = load_config_or_exit();

  if args.foreground {
    if let Err(err) = cfg.paths.ensure_state_dir().and_then(|()| crate::logging::init_daemon(&cfg.paths.log_file)) {
      log_error!("failed to initialize logging: {err:#}");
      std::process::exit(1);
    }
    if let Err(err) = crate::daemon::run_foreground(cfg) {
      log_error!("daemon exited with an error: {err:#}");
      std::process::exit(1);
    }
    return;
  }

  if let Some(pid) = running_pid(&cfg) {
    log_warn!("daemon already running (pid {pid})");
    return;
  }

  let exe = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("muxd"));
  let mut cmd = Command::new(exe);
  cmd.arg("__supervise");
  if let Some(port) = args.port {
    cmd.env("MUXD_BIND_PORT", port.to_string());
  }
  cmd.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());
  match cmd.spawn() {
    Ok(_) => {
      if wait_until_running(&cfg) {
        log_success!("daemon started on port {}", cfg.bind_port);
      } else {
        log_error!("daemon did not come up in time; check {}", cfg.paths.log_file.display());
        std::process::exit(1);
      }
    }
    Err(err) => {
      log_error!("failed to spawn daemon: {err}");
      std::process::exit(1);
    }
  }
}

fn wait_until_running(cfg: &Config) -> bool {
  for _ in 0..50u8 {
    if running_pid(cfg).is_some() {
      return true;
    }
    std::thread::sleep(std::time::Duration::from_millis(100));
  }
  false
}

/// Entry point for the hidden `__supervise` subcommand: re-exec `start -f`
/// under `supervisor::run`'s restart-on-crash loop.
pub fn supervise() {
  let cfg = load_config_or_exit();
  if let Err(err) = cfg.paths.ensure_state_dir().and_then(|()| crate::logging::init_daemon(&cfg.paths.log_file)) {
    log_error!("failed to initialize logging: {err:#}");
    std::process::exit(1);
  }
  let exe = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("muxd"));
  let result = crate::supervisor::run(move || {
    Command::new(&exe)
      .arg("start")
      .arg("-f")
      .stdin(Stdio::null())
      .stdout(Stdio::null())
      .stderr(Stdio::null())
      .spawn()
      .context("spawn daemon child")
  });
  if let Err(err) = result {
    log_error!("supervisor exited with an error: {err:#}");
    std::process::exit(1);
  }
}

pub fn stop(args: StopArgs) {
  let cfg = load_config_or_exit();
  let Some(pid) = running_pid(&cfg) else {
    log_info!("daemon is not running");
    return;
  };
  let signal = if args.kill_sessions { "-USR1" } else { "-TERM" };
  if let Err(err) = Command::new("kill").arg(signal).arg(pid.to_string()).status() {
    log_error!("failed to signal daemon (pid {pid}): {err}");
    std::process::exit(1);
  }
  for _ in 0..50u8 {
    if running_pid(&cfg).is_none() {
      log_success!("daemon stopped");
      return;
    }
    std::thread::sleep(std::time::Duration::from_millis(100));
  }
  log_warn!("sent shutdown signal, but the daemon (pid {pid}) is still running");
}

pub fn status() {
  let cfg = load_config_or_exit();
  match running_pid(&cfg) {
    Some(pid) => {
      let sessions = connect(&cfg).and_then(|mut c| {
        c.request(&C2D::GetSessions, |m| matches!(m, D2C::SessionsList { .. }))
      });
      match sessions {
        Ok(D2C::SessionsList { sessions }) => {
          log_info!("daemon: running (pid {pid}, port {}, {} session(s))", cfg.bind_port, sessions.len());
        }
        _ => log_info!("daemon: running (pid {pid}, port {})", cfg.bind_port),
      }
    }
    None => log_info!("daemon: stopped"),
  }
}

pub fn token(args: TokenArgs) {
  let cfg = load_config_or_exit();
  let store = match open_store(&cfg) {
    Ok(s) => s,
    Err(err) => {
      log_error!("{err:#}");
      std::process::exit(1);
    }
  };

  if args.regenerate {
    let new_token = crate::auth::generate_token();
    if let Err(err) = store.set_auth_token(&new_token) {
      log_error!("failed to persist new token: {err}");
      std::process::exit(1);
    }
    log_success!("generated a new token: {new_token}");
    if running_pid(&cfg).is_some() {
      log_warn!("restart the daemon for the new token to take effect");
    }
    return;
  }

  match store.get_auth_token() {
    Ok(Some(t)) => log_info!("{t}"),
    Ok(None) => log_info!("no token has been generated yet -- start the daemon first"),
    Err(err) => {
      log_error!("failed to read token: {err}");
      std::process::exit(1);
    }
  }
}

pub fn qr() {
  let cfg = load_config_or_exit();
  let token = match daemon_token(&cfg) {
    Ok(t) => t,
    Err(err) => {
      log_error!("{err:#}");
      std::process::exit(1);
    }
  };
  let url = format!("muxd://127.0.0.1:{}/{}", cfg.bind_port, token);
  match qrcode::QrCode::new(url.as_bytes()) {
    Ok(code) => {
      let rendered = code
        .render::<char>()
        .quiet_zone(true)
        .module_dimensions(2, 1)
        .light_color(' ')
        .dark_color('#')
        .build();
      println!("{rendered}");
      log_info!("connect url: {url}");
    }
    Err(err) => {
      log_error!("failed to render qr code: {err}");
      std::process::exit(1);
    }
  }
}

pub fn new_session(args: NewArgs) {
  let cfg = load_config_or_exit();
  let mut client = match connect(&cfg) {
    Ok(c) => c,
    Err(err) => {
      log_error!("{err:#}");
      std::process::exit(1);
    }
  };

  let project_path = args.path.unwrap_or_else(|| ".".to_string());
  let project_path = std::fs::canonicalize(&project_path).map(|p| p.display().to_string()).unwrap_or(project_path);
  let session_type = if args.shell { Some(SessionType::Shell) } else { None };

  let reply = client.request(
    &C2D::CreateSession { project_path, model: args.model, plan_mode: Some(args.plan), session_type },
    |m| matches!(m, D2C::SessionCreated { .. }),
  );
  match reply {
    Ok(D2C::SessionCreated { session }) => {
      log_success!("created session {}", session.id);
      print_table(&["ID", "TYPE", "STATE", "PATH"], &[session_row(&session)]);
    }
    Ok(_) => unreachable!(),
    Err(err) => {
      log_error!("{err:#}");
      std::process::exit(1);
    }
  }
}

pub fn list() {
  let cfg = load_config_or_exit();
  let mut client = match connect(&cfg) {
    Ok(c) => c,
    Err(err) => {
      log_error!("{err:#}");
      std::process::exit(1);
    }
  };
  match client.request(&C2D::GetSessions, |m| matches!(m, D2C::SessionsList { .. })) {
    Ok(D2C::SessionsList { sessions }) => {
      let rows: Vec<Vec<String>> = sessions.iter().map(session_row).collect();
      print_table(&["ID", "TYPE", "STATE", "PATH"], &rows);
    }
    Ok(_) => unreachable!(),
    Err(err) => {
      log_error!("{err:#}");
      std::process::exit(1);
    }
  }
}

fn session_row(s: &SessionView) -> Vec<String> {
  vec![s.id.clone(), session_type_label(s.session_type).to_string(), state_label(s.state).to_string(), s.project_path.clone()]
}

fn session_type_label(t: SessionType) -> &'static str {
  match t {
    SessionType::Assistant => "assistant",
    SessionType::Shell => "shell",
  }
}

fn state_label(s: SessionState) -> &'static str {
  match s {
    SessionState::Starting => "starting",
    SessionState::Idle => "idle",
    SessionState::Working => "working",
    SessionState::AwaitingInput => "awaiting_input",
    SessionState::AwaitingConfirmation => "awaiting_confirmation",
    SessionState::ContextLimit => "context_limit",
    SessionState::Dead => "dead",
    SessionState::Error => "error",
  }
}

pub fn attach(args: AttachArgs) {
  let cfg = load_config_or_exit();
  if running_pid(&cfg).is_none() {
    log_error!("daemon is not running");
    std::process::exit(1);
  }
  let mux_name = cfg.mux_name(&args.id);
  let err = Command::new("tmux")
    .arg("-S")
    .arg(&cfg.paths.tmux_socket)
    .arg("attach-session")
    .arg("-t")
    .arg(&mux_name)
    .exec();
  log_error!("failed to exec tmux attach: {err}");
  std::process::exit(1);
}

pub fn kill(args: KillArgs) {
  let cfg = load_config_or_exit();
  let mut client = match connect(&cfg) {
    Ok(c) => c,
    Err(err) => {
      log_error!("{err:#}");
      std::process::exit(1);
    }
  };
  let reply = client.request(&C2D::KillSession { session_id: args.id.clone() }, |m| {
    matches!(m, D2C::SessionKilled { .. })
  });
  match reply {
    Ok(D2C::SessionKilled { session_id }) => log_success!("killed session {session_id}"),
    Ok(_) => unreachable!(),
    Err(err) => {
      log_error!("{err:#}");
      std::process::exit(1);
    }
  }
}

const SERVICE_NAME: &str = "muxd.service";

fn systemd_user_dir() -> Result<PathBuf> {
  let home = std::env::var("HOME").context("HOME is not set")?;
  Ok(PathBuf::from(home).join(".config/systemd/user"))
}

pub fn install() {
  let exe = match std::env::current_exe() {
    Ok(p) => p,
    Err(err) => {
      log_error!("failed to resolve the current executable: {err}");
      std::process::exit(1);
    }
  };
  let dir = match systemd_user_dir() {
    Ok(d) => d,
    Err(err) => {
      log_error!("{err}");
      std::process::exit(1);
    }
  };
  if let Err(err) = std::fs::create_dir_all(&dir) {
    log_error!("failed to create {}: {err}", dir.display());
    std::process::exit(1);
  }

  let unit = format!(
    "[Unit]\nDescription=muxd terminal session daemon\nAfter=default.target\n\n\
     [Service]\nType=simple\nExecStart={} start -f\nRestart=on-failure\n\n\
     [Install]\nWantedBy=default.target\n",
    exe.display()
  );
  let unit_path = dir.join(SERVICE_NAME);
  if let Err(err) = std::fs::File::create(&unit_path).and_then(|mut f| f.write_all(unit.as_bytes())) {
    log_error!("failed to write {}: {err}", unit_path.display());
    std::process::exit(1);
  }

  let reload = Command::new("systemctl").args(["--user", "daemon-reload"]).status();
  let enable = Command::new("systemctl").args(["--user", "enable", "--now", SERVICE_NAME]).status();
  match (reload, enable) {
    (Ok(r), Ok(e)) if r.success() && e.success() => {
      log_success!("installed and started {SERVICE_NAME}");
    }
    _ => {
      log_warn!("wrote {} but `systemctl --user enable --now {SERVICE_NAME}` did not succeed; enable it manually", unit_path.display());
    }
  }
}

pub fn uninstall() {
  let _ = Command::new("systemctl").args(["--user", "disable", "--now", SERVICE_NAME]).status();
  let Ok(dir) = systemd_user_dir() else {
    log_warn!("HOME is not set; nothing to remove");
    return;
  };
  let unit_path = dir.join(SERVICE_NAME);
  match std::fs::remove_file(&unit_path) {
    Ok(()) => log_success!("removed {}", unit_path.display()),
    Err(err) if err.kind() == std::io::ErrorKind::NotFound => log_info!("{SERVICE_NAME} was not installed"),
    Err(err) => {
      log_error!("failed to remove {}: {err}", unit_path.display());
      std::process::exit(1);
    }
  }
  let _ = Command::new("systemctl").args(["--user", "daemon-reload"]).status();
}
