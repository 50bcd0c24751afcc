//! Client hub: accepts duplex TCP connections, authenticates them, and fans
//! out session-registry events to every authenticated client.
//!
//! Grounded on the teacher's `pty::daemon::Daemon` (accept loop, per-client
//! reader/writer thread pair, control channel with a bounded lossy output
//! channel) generalized from a single-attachment Unix-socket daemon to a
//! many-client TCP hub.

use std::collections::HashMap;
use std::io::BufReader;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use log::{info, warn};
use parking_lot::Mutex;

use crate::auth::tokens_match;
use crate::config::Config;
use crate::protocol::{C2D, D2C, SessionType, read_frame, write_frame};
use crate::registry::SessionRegistry;
use crate::session::{self, SessionEvent, SessionKind};

const KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(35);

struct ClientHandle {
  tx: Sender<D2C>,
  authenticated: bool,
  viewport: Option<(u16, u16)>,
}

pub struct Hub {
  cfg: Config,
  registry: Arc<SessionRegistry>,
  token: String,
  clients: Mutex<HashMap<u64, ClientHandle>>,
  next_client_id: AtomicU64,
}

impl Hub {
  #[must_use]
  pub fn new(cfg: Config, registry: Arc<SessionRegistry>, token: String) -> Arc<Self> {
    Arc::new(Self {
      cfg,
      registry,
      token,
      clients: Mutex::new(HashMap::new()),
      next_client_id: AtomicU64::new(1),
    })
  }

  /// Binds the TCP listener and runs the accept loop; spawns the broadcast
  /// thread that drains registry events. Blocks until the listener errors.
  pub fn run(self: &Arc<Self>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("127.0.0.1", self.cfg.bind_port))?;
    info!("client hub listening on 127.0.0.1:{}", self.cfg.bind_port);

    self.spawn_broadcast_thread();

    for stream in listener.incoming() {
      match stream {
        Ok(stream) => {
          let hub = Arc::clone(self);
          std::thread::spawn(move || hub.handle_connection(stream));
        }
        Err(err) => warn!("accept error: {err}"),
      }
    }
    Ok(())
  }

  fn spawn_broadcast_thread(self: &Arc<Self>) {
    let hub = Arc::clone(self);
    let rx = self.registry.event_receiver();
    std::thread::spawn(move || {
      while let Ok(ev) = rx.recv() {
        hub.broadcast_event(ev);
      }
    });
  }

  fn broadcast_event(&self, ev: SessionEvent) {
    let Some(msg) = self.session_event_to_wire(ev) else {
      return;
    };
    let mut clients = self.clients.lock();
    let mut dead = Vec::new();
    for (id, client) in clients.iter() {
      if !client.authenticated {
        continue;
      }
      match client.tx.try_send(msg.clone()) {
        Ok(()) | Err(TrySendError::Disconnected(_)) => {}
        Err(TrySendError::Full(_)) => dead.push(*id),
      }
    }
    for id in dead {
      warn!("client {id} send queue overflowed; disconnecting");
      clients.remove(&id);
    }
  }

  fn session_event_to_wire(&self, ev: SessionEvent) -> Option<D2C> {
    match ev {
      SessionEvent::Created { view } => Some(D2C::SessionCreated { session: view }),
      SessionEvent::StateChanged { view, .. } => Some(D2C::SessionUpdated { session: view }),
      SessionEvent::Output { id, content } => Some(D2C::OutputUpdate { session_id: id, content }),
      SessionEvent::InputRequired { id, kind, question, options } => Some(D2C::InputRequired {
        session_id: id,
        input_type: session::input_kind_to_wire(kind),
        context: question.clone(),
        question,
        options: if options.is_empty() { None } else { Some(options) },
        timestamp_ms: session::now_ms_public(),
      }),
      SessionEvent::ContextLimit { id, message } => Some(D2C::ContextLimit { session_id: id, message }),
      SessionEvent::Exited { id } => Some(D2C::SessionKilled { session_id: id }),
    }
  }

  fn handle_connection(self: Arc<Self>, stream: TcpStream) {
    let _ = stream.set_read_timeout(Some(KEEP_ALIVE_TIMEOUT));
    let Ok(writer_stream) = stream.try_clone() else {
      return;
    };

    let client_id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
    let (tx, rx) = bounded::<D2C>(self.cfg.client_send_queue);
    self.clients.lock().insert(
      client_id,
      ClientHandle {
        tx,
        authenticated: false,
        viewport: None,
      },
    );

    let writer_handle = std::thread::spawn(move || Self::writer_loop(writer_stream, rx));

    let mut reader = BufReader::new(stream);
    if !self.handshake(&mut reader, client_id) {
      self.clients.lock().remove(&client_id);
      let _ = writer_handle.join();
      return;
    }

    loop {
      let msg: C2D = match read_frame(&mut reader) {
        Ok(m) => m,
        Err(_) => break,
      };
      if let C2D::Auth { .. } = msg {
        self.reply(client_id, D2C::Error {
          message: "already authenticated".to_string(),
          session_id: None,
        });
        continue;
      }
      self.dispatch(client_id, msg);
    }

    self.clients.lock().remove(&client_id);
    let _ = writer_handle.join();
  }

  fn writer_loop(mut stream: TcpStream, rx: Receiver<D2C>) {
    while let Ok(msg) = rx.recv() {
      if write_frame(&mut stream, &msg).is_err() {
        break;
      }
    }
  }

  /// First inbound message MUST be `auth{token}`. Any other first message
  /// gets one `error` and the channel is closed.
  fn handshake<R: std::io::Read>(&self, reader: &mut R, client_id: u64) -> bool {
    let first: anyhow::Result<C2D> = read_frame(reader);
    let Ok(C2D::Auth { token }) = first else {
      self.reply(client_id, D2C::Error {
        message: "first message must be auth".to_string(),
        session_id: None,
      });
      return false;
    };

    if !tokens_match(&self.token, &token) {
      self.reply(client_id, D2C::AuthResult { success: false });
      return false;
    }

    if let Some(client) = self.clients.lock().get_mut(&client_id) {
      client.authenticated = true;
    }
    self.reply(client_id, D2C::AuthResult { success: true });
    self.reply(client_id, D2C::Capabilities {
      models: vec!["sonnet".to_string(), "opus".to_string(), "haiku".to_string()],
      modes: vec!["plan".to_string(), "auto_accept".to_string()],
      commands: vec!["clear".to_string(), "compact".to_string()],
    });
    let sessions = self.registry.list().iter().map(|s| s.to_view()).collect();
    self.reply(client_id, D2C::SessionsList { sessions });
    true
  }

  fn reply(&self, client_id: u64, msg: D2C) {
    if let Some(client) = self.clients.lock().get(&client_id) {
      let _ = client.tx.try_send(msg);
    }
  }

  fn error(&self, client_id: u64, session_id: Option<String>, message: impl Into<String>) {
    self.reply(client_id, D2C::Error { message: message.into(), session_id });
  }

  /// Auto-resize a session to a client's last-declared viewport when they
  /// differ; "the last interactor wins".
  fn arbitrate_viewport(&self, client_id: u64, session_id: &str) {
    let viewport = self.clients.lock().get(&client_id).and_then(|c| c.viewport);
    let Some((cols, rows)) = viewport else { return };
    let Some(session) = self.registry.get(session_id) else { return };
    if session.viewport() != (cols, rows) {
      session.resize(&self.cfg, cols, rows);
    }
  }

  fn dispatch(&self, client_id: u64, msg: C2D) {
    match msg {
      C2D::Auth { .. } => unreachable!("handled in handshake/auth-reject path"),
      C2D::Ping => self.reply(client_id, D2C::Pong),
      C2D::GetSessions => {
        let sessions = self.registry.list().iter().map(|s| s.to_view()).collect();
        self.reply(client_id, D2C::SessionsList { sessions });
      }
      C2D::GetOutput { session_id, lines } => {
        let Some(session) = self.registry.get(&session_id) else {
          return self.error(client_id, Some(session_id), "unknown session id");
        };
        let content = session.current_output(&self.cfg, lines);
        self.reply(client_id, D2C::OutputUpdate { session_id, content });
      }
      C2D::CreateSession { project_path, model, plan_mode, session_type } => {
        let kind = match session_type {
          Some(SessionType::Shell) => SessionKind::Shell,
          _ => SessionKind::Assistant,
        };
        match self.registry.create(project_path.into(), model, plan_mode.unwrap_or(false), kind) {
          Ok(session) => self.reply(client_id, D2C::SessionCreated { session: session.to_view() }),
          Err(err) => self.error(client_id, None, err.to_string()),
        }
      }
      C2D::KillSession { session_id } => match self.registry.kill(&session_id) {
        Ok(()) => self.reply(client_id, D2C::SessionKilled { session_id }),
        Err(err) => self.error(client_id, Some(session_id), err.to_string()),
      },
      C2D::RestartSession { session_id, with_summary } => {
        match self.registry.restart_with_summary(&session_id, with_summary, None) {
          Ok(session) => self.reply(client_id, D2C::SessionCreated { session: session.to_view() }),
          Err(err) => self.error(client_id, Some(session_id), err.to_string()),
        }
      }
      C2D::ChangeModel { session_id, model } => {
        match self.registry.restart_with_summary(&session_id, true, Some(model)) {
          Ok(session) => self.reply(client_id, D2C::SessionCreated { session: session.to_view() }),
          Err(err) => self.error(client_id, Some(session_id), err.to_string()),
        }
      }
      C2D::ToggleMode { session_id, mode, enabled } => {
        let Some(session) = self.registry.get(&session_id) else {
          return self.error(client_id, Some(session_id), "unknown session id");
        };
        match session.set_mode(&mode, enabled) {
          Ok(()) => self.reply(client_id, D2C::SessionUpdated { session: session.to_view() }),
          Err(err) => self.error(client_id, Some(session_id), err.to_string()),
        }
      }
      C2D::SendInput { session_id, input } => {
        self.arbitrate_viewport(client_id, &session_id);
        let Some(session) = self.registry.get(&session_id) else {
          return self.error(client_id, Some(session_id), "unknown session id");
        };
        if let Err(err) = session.send_input_line(&self.cfg, &input) {
          self.error(client_id, Some(session_id), err.to_string());
        }
      }
      C2D::SendCommand { session_id, command } => {
        let Some(session) = self.registry.get(&session_id) else {
          return self.error(client_id, Some(session_id), "unknown session id");
        };
        if let Err(err) = session.send_input_line(&self.cfg, &command) {
          self.error(client_id, Some(session_id), err.to_string());
        }
      }
      C2D::SendKey { session_id, key } => {
        self.arbitrate_viewport(client_id, &session_id);
        let Some(session) = self.registry.get(&session_id) else {
          return self.error(client_id, Some(session_id), "unknown session id");
        };
        if let Err(err) = session.send_key(&self.cfg, key.as_bytes()) {
          self.error(client_id, Some(session_id), err.to_string());
        }
      }
      C2D::ResizeTerminal { session_id, cols, rows } => {
        if let Some(client) = self.clients.lock().get_mut(&client_id) {
          client.viewport = Some((cols, rows));
        }
        let Some(session) = self.registry.get(&session_id) else {
          return self.error(client_id, Some(session_id), "unknown session id");
        };
        session.resize(&self.cfg, cols, rows);
      }
      C2D::Scroll { session_id } => {
        let Some(session) = self.registry.get(&session_id) else {
          return self.error(client_id, Some(session_id), "unknown session id");
        };
        let content = String::from_utf8_lossy(&session.get_scrollback(&self.cfg)).into_owned();
        self.reply(client_id, D2C::ScrollbackContent { session_id, content });
      }
      C2D::BrowseDirectory { path } => {
        let listing = crate::directory_browser::list(&path);
        self.reply(client_id, D2C::DirectoryListing {
          path: listing.path,
          directories: listing.directories,
          error: listing.error,
        });
      }
      C2D::BrowseFiles { session_id, path } => {
        let Some(session) = self.registry.get(&session_id) else {
          return self.error(client_id, Some(session_id), "unknown session id");
        };
        match crate::fs_proxy::browse(&session.cfg.project_path, &path) {
          Ok(entries) => self.reply(client_id, D2C::FileListing { session_id, path, entries, error: None }),
          Err(err) => self.reply(client_id, D2C::FileListing { session_id, path, entries: Vec::new(), error: Some(err.to_string()) }),
        }
      }
      C2D::ReadFile { session_id, path } => {
        let Some(session) = self.registry.get(&session_id) else {
          return self.error(client_id, Some(session_id), "unknown session id");
        };
        match crate::fs_proxy::read(&session.cfg.project_path, &path) {
          Ok(content) => self.reply(client_id, D2C::FileContent { session_id, path, content: Some(content), error: None }),
          Err(err) => self.reply(client_id, D2C::FileContent { session_id, path, content: None, error: Some(err.to_string()) }),
        }
      }
      C2D::WriteFile { session_id, path, content } => {
        let Some(session) = self.registry.get(&session_id) else {
          return self.error(client_id, Some(session_id), "unknown session id");
        };
        match crate::fs_proxy::write(&session.cfg.project_path, &path, &content) {
          Ok(()) => self.reply(client_id, D2C::FileWriteResult { session_id, path, success: true, error: None }),
          Err(err) => self.reply(client_id, D2C::FileWriteResult { session_id, path, success: false, error: Some(err.to_string()) }),
        }
      }
      C2D::CreateFile { session_id, path } => self.file_op_result(client_id, &session_id, crate::fs_proxy::create_file(&self.project_root(&session_id), &path)),
      C2D::CreateDirectory { session_id, path } => self.file_op_result(client_id, &session_id, crate::fs_proxy::create_directory(&self.project_root(&session_id), &path)),
      C2D::RenameFile { session_id, from, to } => self.file_op_result(client_id, &session_id, crate::fs_proxy::rename(&self.project_root(&session_id), &from, &to)),
      C2D::DeleteFile { session_id, path } => self.file_op_result(client_id, &session_id, crate::fs_proxy::delete(&self.project_root(&session_id), &path)),
    }
  }

  fn project_root(&self, session_id: &str) -> std::path::PathBuf {
    self
      .registry
      .get(session_id)
      .map(|s| s.cfg.project_path.clone())
      .unwrap_or_default()
  }

  fn file_op_result(&self, client_id: u64, session_id: &str, result: anyhow::Result<()>) {
    match result {
      Ok(()) => self.reply(client_id, D2C::FileOpResult { session_id: session_id.to_string(), success: true, error: None }),
      Err(err) => self.reply(client_id, D2C::FileOpResult { session_id: session_id.to_string(), success: false, error: Some(err.to_string()) }),
    }
  }
}
