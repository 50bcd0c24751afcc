//! Session registry: create/attach/kill, rediscovery on daemon start,
//! shutdown modes. Grounded on the teacher's `pty::registry::SessionRegistry`
//! (owns a `HashMap` of sessions, hands out client attachments) generalized
//! so sessions are keyed by our base62 id instead of a sequential `u64`, and
//! attachment tracking lives in the hub instead of here.

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, unbounded};
use log::{info, warn};
use parking_lot::Mutex;

use crate::config::Config;
use crate::id;
use crate::session::{Session, SessionConfig, SessionEvent, SessionKind};
use crate::store::Store;
use crate::tmux;

pub struct SessionRegistry {
  cfg: Config,
  store: Store,
  sessions: Mutex<HashMap<String, Arc<Session>>>,
  events_tx: Sender<SessionEvent>,
  events_rx: Receiver<SessionEvent>,
}

impl SessionRegistry {
  pub fn new(cfg: Config, store: Store) -> Self {
    let (events_tx, events_rx) = unbounded();
    Self {
      cfg,
      store,
      sessions: Mutex::new(HashMap::new()),
      events_tx,
      events_rx,
    }
  }

  #[must_use]
  pub fn event_receiver(&self) -> Receiver<SessionEvent> {
    self.events_rx.clone()
  }

  #[must_use]
  pub fn get(&self, id: &str) -> Option<Arc<Session>> {
    self.sessions.lock().get(id).cloned()
  }

  #[must_use]
  pub fn list(&self) -> Vec<Arc<Session>> {
    self.sessions.lock().values().cloned().collect()
  }

  pub fn create(
    &self,
    project_path: std::path::PathBuf,
    model: Option<String>,
    plan_mode: bool,
    kind: SessionKind,
  ) -> anyhow::Result<Arc<Session>> {
    let new_id = id::generate();
    let sess_cfg = SessionConfig {
      id: new_id.clone(),
      project_path: project_path.clone(),
      model: model.clone(),
      plan_mode,
      auto_accept: false,
      kind,
    };
    let session = Session::start_fresh(&self.cfg, sess_cfg, self.events_tx.clone())?;
    self.store.insert_session(&session.to_view())?;
    self.sessions.lock().insert(new_id, Arc::clone(&session));
    let _ = self.events_tx.send(SessionEvent::Created { view: session.to_view() });
    Ok(session)
  }

  pub fn kill(&self, session_id: &str) -> anyhow::Result<()> {
    let session = self
      .sessions
      .lock()
      .remove(session_id)
      .ok_or_else(|| anyhow::anyhow!("unknown session id"))?;
    session.kill(&self.cfg)?;
    self.store.mark_ended(session_id)?;
    Ok(())
  }

  /// Restart-with-summary: capture recent output, kill, start a new session
  /// with the same config (optionally a new model), and once idle (after a
  /// grace period) send the recent output as continuation context.
  pub fn restart_with_summary(
    &self,
    session_id: &str,
    with_summary: bool,
    new_model: Option<String>,
  ) -> anyhow::Result<Arc<Session>> {
    let old = self
      .sessions
      .lock()
      .remove(session_id)
      .ok_or_else(|| anyhow::anyhow!("unknown session id"))?;
    let summary = if with_summary {
      Some(String::from_utf8_lossy(&tmux::driver::read_all_scrollback(&self.cfg, old.mux_name())).into_owned())
    } else {
      None
    };
    let project_path = old.cfg.project_path.clone();
    let plan_mode = old.cfg.plan_mode;
    let kind = old.cfg.kind;
    let model = new_model.or_else(|| old.cfg.model.clone());
    old.kill(&self.cfg)?;
    self.store.mark_ended(session_id)?;

    let new_session = self.create(project_path, model, plan_mode, kind)?;
    if let Some(summary) = summary {
      let cfg = self.cfg.clone();
      let grace = cfg.restart_grace;
      let session = Arc::clone(&new_session);
      std::thread::spawn(move || {
        std::thread::sleep(grace);
        let labeled = format!("Continuing from a prior session. Recent output:\n{summary}");
        let _ = session.send_input_line(&cfg, &labeled);
      });
    }
    Ok(new_session)
  }

  /// Daemon-start rediscovery: enumerate live multiplexer sessions matching
  /// our prefix, reattach each one, reconcile the durable store.
  pub fn rediscover(&self) -> anyhow::Result<()> {
    let live_names = tmux::server::list_session_names(&self.cfg).unwrap_or_default();
    let mut live_ids = Vec::new();

    for name in &live_names {
      let Some(sid) = id::parse_mux_name(name, &self.cfg.tmux_prefix) else {
        continue;
      };
      let sid = sid.to_string();
      live_ids.push(sid.clone());

      let record = self.store.get_session(&sid)?;
      let sess_cfg = match record {
        Some(r) => SessionConfig {
          id: sid.clone(),
          project_path: std::path::PathBuf::from(r.project_path),
          model: r.model,
          plan_mode: r.plan_mode,
          auto_accept: r.auto_accept,
          kind: r.session_type,
        },
        None => SessionConfig {
          id: sid.clone(),
          project_path: std::env::current_dir().unwrap_or_else(|_| std::path::PathBuf::from(".")),
          model: None,
          plan_mode: false,
          auto_accept: false,
          kind: SessionKind::Assistant,
        },
      };

      match Session::attach_existing(&self.cfg, sess_cfg, self.events_tx.clone()) {
        Ok(session) => {
          self.store.insert_session(&session.to_view())?;
          self.sessions.lock().insert(sid, session.clone());
          let _ = self.events_tx.send(SessionEvent::Created { view: session.to_view() });
        }
        Err(err) => {
          warn!("dropping dead rediscovered session {sid}: {err:#}");
          self.store.mark_ended(&sid)?;
        }
      }
    }

    for ended in self.store.ids_missing_from(&live_ids)? {
      self.store.mark_ended(&ended)?;
    }
    info!("rediscovery complete: {} sessions attached", live_ids.len());
    Ok(())
  }

  /// Graceful shutdown: disconnect every session (multiplexer sessions keep
  /// running), close the store.
  pub fn shutdown_graceful(&self) {
    let sessions: Vec<_> = self.sessions.lock().values().cloned().collect();
    for session in sessions {
      session.disconnect();
    }
  }

  /// Purge shutdown: kill every session, then proceed with the graceful path.
  pub fn shutdown_purge(&self) {
    let ids: Vec<String> = self.sessions.lock().keys().cloned().collect();
    for sid in ids {
      let _ = self.kill(&sid);
    }
    self.shutdown_graceful();
  }
}
