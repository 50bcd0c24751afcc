//! Session lifecycle: owns one hosted multiplexer session, its reader
//! stream, its classifier, and its debounced capture pipeline.
//!
//! Grounded on the teacher's `pty::session::Session` (owns PTY handle +
//! idle tracker + output sinks + read-pump thread), generalized so the
//! "PTY" is a tmux pane we reach over the driver rather than one we hold
//! open ourselves.

mod capture;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crossbeam_channel::Sender;
use parking_lot::Mutex;

use crate::classifier::{Classifier, ClassifierEvent, InputKind};
use crate::config::Config;
use crate::error::MuxdError;
use crate::protocol::{InputType, SessionState as WireState, SessionType, SessionView};
use crate::tmux::{self, Key};

pub use capture::CapturePipeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
  Assistant,
  Shell,
}

impl From<SessionKind> for SessionType {
  fn from(k: SessionKind) -> Self {
    match k {
      SessionKind::Assistant => SessionType::Assistant,
      SessionKind::Shell => SessionType::Shell,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
  Starting,
  Idle,
  Working,
  AwaitingInput,
  AwaitingConfirmation,
  ContextLimit,
  Dead,
  Error,
}

impl From<State> for WireState {
  fn from(s: State) -> Self {
    match s {
      State::Starting => WireState::Starting,
      State::Idle => WireState::Idle,
      State::Working => WireState::Working,
      State::AwaitingInput => WireState::AwaitingInput,
      State::AwaitingConfirmation => WireState::AwaitingConfirmation,
      State::ContextLimit => WireState::ContextLimit,
      State::Dead => WireState::Dead,
      State::Error => WireState::Error,
    }
  }
}

/// Events a Session publishes. The hub subscribes; the registry relays to
/// the durable store. Breaks the registry <-> session <-> hub cycle the
/// teacher resolves with `D2CControlChannel`/`D2COutputChannel`: here
/// everything downstream holds only an id and talks to the registry.
#[derive(Debug, Clone)]
pub enum SessionEvent {
  Created { view: SessionView },
  StateChanged { id: String, state: State, view: SessionView },
  Output { id: String, content: String },
  InputRequired {
    id: String,
    kind: InputKind,
    question: String,
    options: Vec<String>,
  },
  ContextLimit { id: String, message: String },
  Exited { id: String },
}

pub struct SessionConfig {
  pub id: String,
  pub project_path: PathBuf,
  pub model: Option<String>,
  pub plan_mode: bool,
  pub auto_accept: bool,
  pub kind: SessionKind,
}

struct Inner {
  state: State,
  cols: u16,
  rows: u16,
  has_received_resize: bool,
  plan_mode: bool,
  auto_accept: bool,
  created_at: SystemTime,
  updated_at: SystemTime,
  ended_at: Option<SystemTime>,
}

/// Owns one hosted session end to end.
pub struct Session {
  pub cfg: SessionConfig,
  mux_name: String,
  inner: Mutex<Inner>,
  classifier: Mutex<Classifier>,
  capture: CapturePipeline,
  events: Sender<SessionEvent>,
  reader: Mutex<Option<tmux::Reader>>,
  stopping: Arc<AtomicBool>,
}

fn now_ms() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_millis() as u64)
    .unwrap_or(0)
}

fn sys_ms(t: SystemTime) -> u64 {
  t.duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

impl Session {
  /// Build the argv for a fresh start: `[--model M] [--plan]
  /// [--dangerously-skip-permissions]` for assistant sessions, the user's
  /// login shell for shell sessions.
  fn build_argv(sess_cfg: &SessionConfig) -> Vec<String> {
    match sess_cfg.kind {
      SessionKind::Assistant => {
        let mut argv = vec!["claude".to_string()];
        if let Some(model) = &sess_cfg.model {
          argv.push("--model".to_string());
          argv.push(model.clone());
        }
        if sess_cfg.plan_mode {
          argv.push("--plan".to_string());
        }
        if sess_cfg.auto_accept {
          argv.push("--dangerously-skip-permissions".to_string());
        }
        argv
      }
      SessionKind::Shell => {
        let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
        vec![shell]
      }
    }
  }

  /// Fresh start: create the multiplexer session, apply options, attach the
  /// reader, and transition `starting -> idle`.
  pub fn start_fresh(
    cfg: &Config,
    sess_cfg: SessionConfig,
    events: Sender<SessionEvent>,
  ) -> anyhow::Result<Arc<Self>> {
    let mux_name = cfg.mux_name(&sess_cfg.id);
    let argv = Self::build_argv(&sess_cfg);
    tmux::driver::create(cfg, &mux_name, &sess_cfg.project_path, &argv)?;
    Self::finish_startup(cfg, sess_cfg, mux_name, events)
  }

  /// Attach-to-existing: verify liveness, re-apply options idempotently,
  /// attach the reader. Used on daemon restart rediscovery.
  pub fn attach_existing(
    cfg: &Config,
    sess_cfg: SessionConfig,
    events: Sender<SessionEvent>,
  ) -> anyhow::Result<Arc<Self>> {
    let mux_name = cfg.mux_name(&sess_cfg.id);
    if !tmux::driver::is_alive(cfg, &mux_name) {
      anyhow::bail!("multiplexer session {mux_name} is not alive");
    }
    Self::finish_startup(cfg, sess_cfg, mux_name, events)
  }

  fn finish_startup(
    cfg: &Config,
    sess_cfg: SessionConfig,
    mux_name: String,
    events: Sender<SessionEvent>,
  ) -> anyhow::Result<Arc<Self>> {
    let now = SystemTime::now();
    let plan_mode = sess_cfg.plan_mode;
    let auto_accept = sess_cfg.auto_accept;
    let session = Arc::new(Self {
      cfg: sess_cfg,
      mux_name,
      inner: Mutex::new(Inner {
        state: State::Starting,
        cols: 0,
        rows: 0,
        has_received_resize: false,
        plan_mode,
        auto_accept,
        created_at: now,
        updated_at: now,
        ended_at: None,
      }),
      classifier: Mutex::new(Classifier::new(Instant::now(), cfg.idle_threshold)),
      capture: CapturePipeline::new(cfg.debounce, cfg.resize_settle),
      events,
      reader: Mutex::new(None),
      stopping: Arc::new(AtomicBool::new(false)),
    });

    let pipe_dir = cfg.paths.state_dir.join("pipes");
    let reader = tmux::driver::attach_reader(cfg, &session.mux_name, &pipe_dir)?;
    *session.reader.lock() = Some(reader);

    session.capture.bind(Arc::downgrade(&session), cfg.clone());
    // Silent: the registry announces this session with `SessionEvent::Created`
    // once it's in the registry/store, already reflecting this state. A
    // broadcast `StateChanged` here would race ahead of that announcement.
    {
      let mut inner = session.inner.lock();
      inner.state = State::Idle;
      inner.updated_at = SystemTime::now();
    }
    session.spawn_reader_pump(cfg.clone());
    session.spawn_liveness_probe(cfg.clone());
    session.spawn_idle_poll();
    Ok(session)
  }

  fn transition(&self, new_state: State) {
    let mut inner = self.inner.lock();
    if inner.state == new_state {
      return;
    }
    inner.state = new_state;
    inner.updated_at = SystemTime::now();
    drop(inner);
    let _ = self.events.send(SessionEvent::StateChanged {
      id: self.cfg.id.clone(),
      state: new_state,
      view: self.to_view(),
    });
  }

  fn spawn_reader_pump(self: &Arc<Self>, cfg: Config) {
    let session = Arc::clone(self);
    std::thread::spawn(move || {
      let rx = {
        let guard = session.reader.lock();
        guard.as_ref().map(|r| r.receiver().clone())
      };
      let Some(rx) = rx else { return };
      loop {
        match rx.recv() {
          Ok(chunk) => session.on_chunk(&cfg, &chunk),
          Err(_) => break,
        }
        if session.stopping.load(Ordering::Relaxed) {
          break;
        }
      }
    });
  }

  fn spawn_liveness_probe(self: &Arc<Self>, cfg: Config) {
    let session = Arc::clone(self);
    std::thread::spawn(move || {
      loop {
        std::thread::sleep(cfg.liveness_probe);
        if session.stopping.load(Ordering::Relaxed) {
          return;
        }
        if matches!(session.state(), State::Dead) {
          return;
        }
        if !tmux::driver::is_alive(&cfg, &session.mux_name) {
          session.mark_dead();
          return;
        }
      }
    });
  }

  /// Poll the classifier's idle timer on a fixed cadence. The classifier
  /// itself never owns a timer thread (mirrors the teacher's poll-based
  /// `IdleTracker`); this is the thread that calls it back.
  fn spawn_idle_poll(self: &Arc<Self>) {
    let session = Arc::clone(self);
    std::thread::spawn(move || {
      loop {
        std::thread::sleep(Duration::from_millis(250));
        if session.stopping.load(Ordering::Relaxed) || matches!(session.state(), State::Dead) {
          return;
        }
        if let Some(ev) = session.classifier.lock().poll_idle(Instant::now()) {
          session.apply_classifier_event(ev);
        }
      }
    });
  }

  fn mark_dead(&self) {
    {
      let mut inner = self.inner.lock();
      inner.state = State::Dead;
      inner.updated_at = SystemTime::now();
      inner.ended_at = Some(inner.updated_at);
    }
    let _ = self.events.send(SessionEvent::StateChanged {
      id: self.cfg.id.clone(),
      state: State::Dead,
      view: self.to_view(),
    });
    let _ = self.events.send(SessionEvent::Exited { id: self.cfg.id.clone() });
  }

  fn on_chunk(&self, _cfg: &Config, chunk: &[u8]) {
    let now = Instant::now();
    let events = self.classifier.lock().on_chunk(chunk, now);
    for ev in events {
      self.apply_classifier_event(ev);
    }
    if self.inner.lock().has_received_resize {
      self.capture.notify(now);
    }
  }

  fn apply_classifier_event(&self, ev: ClassifierEvent) {
    match ev {
      ClassifierEvent::Activity => {}
      ClassifierEvent::Working => self.transition(State::Working),
      ClassifierEvent::PossiblyIdle => {
        if self.state() == State::Working {
          self.transition(State::Idle);
        }
      }
      ClassifierEvent::InputRequired { kind, question, options } => {
        let new_state = if kind == InputKind::Confirmation {
          State::AwaitingConfirmation
        } else {
          State::AwaitingInput
        };
        self.transition(new_state);
        let _ = self.events.send(SessionEvent::InputRequired {
          id: self.cfg.id.clone(),
          kind,
          question,
          options,
        });
      }
      ClassifierEvent::ContextExhausted { window } => {
        self.transition(State::ContextLimit);
        let _ = self.events.send(SessionEvent::ContextLimit {
          id: self.cfg.id.clone(),
          message: window,
        });
      }
    }
  }

  #[must_use]
  pub fn state(&self) -> State {
    self.inner.lock().state
  }

  #[must_use]
  pub fn mux_name(&self) -> &str {
    &self.mux_name
  }

  pub fn send_input_line(&self, cfg: &Config, text: &str) -> anyhow::Result<()> {
    self.require_live()?;
    tmux::driver::send_input_line(cfg, &self.mux_name, text)?;
    if self.cfg.kind == SessionKind::Assistant {
      self.transition(State::Working);
    }
    Ok(())
  }

  pub fn send_key(&self, cfg: &Config, raw: &[u8]) -> anyhow::Result<()> {
    self.require_live()?;
    let key = tmux::map_raw_key(raw);
    tmux::driver::send_keys(cfg, &self.mux_name, &key)
  }

  /// Input can be sent to any live session (even `ContextLimit`/`Error`, in
  /// case the user is typing `/compact`); only a session that has fully
  /// exited rejects it.
  fn require_live(&self) -> Result<(), MuxdError> {
    if self.state() == State::Dead {
      return Err(MuxdError::state(format!(
        "session {} is not live and cannot accept input",
        self.cfg.id
      )));
    }
    Ok(())
  }

  pub fn send_key_named(&self, cfg: &Config, key: &Key) -> anyhow::Result<()> {
    tmux::driver::send_keys(cfg, &self.mux_name, key)
  }

  /// Explicit client resize. Clears `lastEmittedScreen` and schedules a
  /// forced re-capture after the configured settle delay.
  pub fn resize(&self, cfg: &Config, cols: u16, rows: u16) {
    {
      let mut inner = self.inner.lock();
      inner.cols = cols;
      inner.rows = rows;
      inner.has_received_resize = true;
    }
    let _ = tmux::driver::resize(cfg, &self.mux_name, cols, rows);
    self.capture.on_resize();
  }

  #[must_use]
  pub fn viewport(&self) -> (u16, u16) {
    let inner = self.inner.lock();
    (inner.cols, inner.rows)
  }

  pub fn emit_output(&self, content: String) {
    let _ = self.events.send(SessionEvent::Output {
      id: self.cfg.id.clone(),
      content,
    });
  }

  #[must_use]
  pub fn get_scrollback(&self, cfg: &Config) -> Vec<u8> {
    tmux::driver::read_all_scrollback(cfg, &self.mux_name)
  }

  /// `get_output`: the current/last screen (not the full history `scroll`
  /// returns), optionally truncated to the last `lines` lines.
  #[must_use]
  pub fn current_output(&self, cfg: &Config, lines: Option<u32>) -> String {
    let screen = self.capture.last_screen(cfg, self);
    let text = String::from_utf8_lossy(&screen).into_owned();
    match lines {
      Some(n) if n > 0 => {
        let wanted = n as usize;
        let all: Vec<&str> = text.lines().collect();
        let start = all.len().saturating_sub(wanted);
        all[start..].join("\n")
      }
      _ => text,
    }
  }

  /// Tear down the reader and background timers, but leave the
  /// multiplexer session itself running.
  pub fn disconnect(&self) {
    self.stopping.store(true, Ordering::Relaxed);
    if let Some(reader) = self.reader.lock().take() {
      reader.stop();
    }
  }

  pub fn kill(&self, cfg: &Config) -> anyhow::Result<()> {
    self.disconnect();
    tmux::driver::kill(cfg, &self.mux_name)?;
    self.mark_dead();
    Ok(())
  }

  /// Flip `plan_mode`/`auto_accept` on a live session and broadcast the
  /// resulting `session_updated`. Unlike `model`, which only changes via a
  /// restart, these two flags apply to the session's current run.
  pub fn set_mode(&self, mode: &str, enabled: bool) -> Result<(), MuxdError> {
    {
      let mut inner = self.inner.lock();
      match mode {
        "plan" => inner.plan_mode = enabled,
        "auto_accept" => inner.auto_accept = enabled,
        other => return Err(MuxdError::user(format!("unknown mode '{other}'"))),
      }
      inner.updated_at = SystemTime::now();
    }
    let state = self.state();
    let _ = self.events.send(SessionEvent::StateChanged {
      id: self.cfg.id.clone(),
      state,
      view: self.to_view(),
    });
    Ok(())
  }

  #[must_use]
  pub fn to_view(&self) -> SessionView {
    let inner = self.inner.lock();
    SessionView {
      id: self.cfg.id.clone(),
      project_path: self.cfg.project_path.display().to_string(),
      model: self.cfg.model.clone(),
      plan_mode: inner.plan_mode,
      auto_accept: inner.auto_accept,
      state: inner.state.into(),
      session_type: self.cfg.kind.into(),
      created_at_ms: sys_ms(inner.created_at),
      updated_at_ms: sys_ms(inner.updated_at),
      ended_at_ms: inner.ended_at.map(sys_ms),
    }
  }
}

#[must_use]
pub fn input_kind_to_wire(kind: InputKind) -> InputType {
  match kind {
    InputKind::Confirmation => InputType::Confirmation,
    InputKind::Selection => InputType::Selection,
    InputKind::OpenQuestion => InputType::OpenQuestion,
  }
}

#[must_use]
pub fn now_ms_public() -> u64 {
  now_ms()
}
