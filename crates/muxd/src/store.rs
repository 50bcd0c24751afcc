//! Durable record store: session rows and a single auth-token key/value
//! row. Single connection, WAL mode, tables created on open -- grounded on
//! `jazzenchen-VibeAround`'s `db::open_db` (the teacher has no durable-store
//! concern of its own).

use std::path::Path;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};

use crate::session::SessionKind;

pub struct SessionRecord {
  pub id: String,
  pub project_path: String,
  pub model: Option<String>,
  pub plan_mode: bool,
  pub auto_accept: bool,
  pub session_type: SessionKind,
}

pub struct Store {
  conn: Mutex<Connection>,
}

impl Store {
  pub fn open(path: &Path) -> Result<Self> {
    let conn = Connection::open(path).with_context(|| format!("open store {}", path.display()))?;
    conn.pragma_update(None, "journal_mode", "WAL").context("set WAL mode")?;
    conn.pragma_update(None, "foreign_keys", "ON").context("enable foreign keys")?;
    create_tables(&conn)?;
    Ok(Self { conn: Mutex::new(conn) })
  }

  pub fn insert_session(&self, view: &crate::protocol::SessionView) -> Result<()> {
    let conn = self.conn.lock();
    conn
      .execute(
        "INSERT INTO sessions (id, project_path, model, plan_mode, auto_accept, session_type, created_at_ms, updated_at_ms, ended_at_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(id) DO UPDATE SET
           project_path = excluded.project_path,
           model = excluded.model,
           plan_mode = excluded.plan_mode,
           auto_accept = excluded.auto_accept,
           session_type = excluded.session_type,
           updated_at_ms = excluded.updated_at_ms,
           ended_at_ms = excluded.ended_at_ms",
        params![
          view.id,
          view.project_path,
          view.model,
          view.plan_mode,
          view.auto_accept,
          session_type_str(view.session_type),
          view.created_at_ms as i64,
          view.updated_at_ms as i64,
          view.ended_at_ms.map(|v| v as i64),
        ],
      )
      .context("insert session row")?;
    Ok(())
  }

  pub fn mark_ended(&self, id: &str) -> Result<()> {
    let now = crate::session::now_ms_public() as i64;
    self
      .conn
      .lock()
      .execute(
        "UPDATE sessions SET ended_at_ms = ?2, updated_at_ms = ?2 WHERE id = ?1 AND ended_at_ms IS NULL",
        params![id, now],
      )
      .context("mark session ended")?;
    Ok(())
  }

  pub fn get_session(&self, id: &str) -> Result<Option<SessionRecord>> {
    let conn = self.conn.lock();
    conn
      .query_row(
        "SELECT id, project_path, model, plan_mode, auto_accept, session_type FROM sessions WHERE id = ?1",
        params![id],
        |row| {
          let session_type: String = row.get(5)?;
          Ok(SessionRecord {
            id: row.get(0)?,
            project_path: row.get(1)?,
            model: row.get(2)?,
            plan_mode: row.get(3)?,
            auto_accept: row.get(4)?,
            session_type: parse_session_type(&session_type),
          })
        },
      )
      .optional()
      .context("query session row")
  }

  /// Ids of non-ended rows not present in `live_ids`.
  pub fn ids_missing_from(&self, live_ids: &[String]) -> Result<Vec<String>> {
    let conn = self.conn.lock();
    let mut stmt = conn
      .prepare("SELECT id FROM sessions WHERE ended_at_ms IS NULL")
      .context("prepare missing-ids query")?;
    let rows = stmt
      .query_map([], |row| row.get::<_, String>(0))
      .context("query session ids")?;
    let mut missing = Vec::new();
    for row in rows {
      let id = row.context("read session id")?;
      if !live_ids.contains(&id) {
        missing.push(id);
      }
    }
    Ok(missing)
  }

  pub fn set_auth_token(&self, token: &str) -> Result<()> {
    self
      .conn
      .lock()
      .execute(
        "INSERT INTO kv (key, value) VALUES ('auth_token', ?1)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![token],
      )
      .context("persist auth token")?;
    Ok(())
  }

  pub fn get_auth_token(&self) -> Result<Option<String>> {
    self
      .conn
      .lock()
      .query_row("SELECT value FROM kv WHERE key = 'auth_token'", [], |row| row.get(0))
      .optional()
      .context("query auth token")
  }
}

fn session_type_str(kind: crate::protocol::SessionType) -> &'static str {
  match kind {
    crate::protocol::SessionType::Assistant => "assistant",
    crate::protocol::SessionType::Shell => "shell",
  }
}

fn parse_session_type(s: &str) -> SessionKind {
  match s {
    "shell" => SessionKind::Shell,
    _ => SessionKind::Assistant,
  }
}

fn create_tables(conn: &Connection) -> rusqlite::Result<()> {
  conn.execute_batch(
    "
    CREATE TABLE IF NOT EXISTS sessions (
      id             TEXT PRIMARY KEY,
      project_path   TEXT NOT NULL,
      model          TEXT,
      plan_mode      INTEGER NOT NULL DEFAULT 0,
      auto_accept    INTEGER NOT NULL DEFAULT 0,
      session_type   TEXT NOT NULL,
      created_at_ms  INTEGER NOT NULL,
      updated_at_ms  INTEGER NOT NULL,
      ended_at_ms    INTEGER
    );

    CREATE TABLE IF NOT EXISTS kv (
      key   TEXT PRIMARY KEY,
      value TEXT NOT NULL
    );
    ",
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::protocol::{SessionState, SessionType, SessionView};
  use pretty_assertions::assert_eq;

  fn sample_view() -> SessionView {
    SessionView {
      id: "abcdefghijkl".to_string(),
      project_path: "/tmp/proj".to_string(),
      model: Some("opus".to_string()),
      plan_mode: false,
      auto_accept: false,
      state: SessionState::Idle,
      session_type: SessionType::Assistant,
      created_at_ms: 1,
      updated_at_ms: 1,
      ended_at_ms: None,
    }
  }

  #[test]
  fn round_trips_a_session_row() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(&dir.path().join("store.sqlite3")).unwrap();
    store.insert_session(&sample_view()).unwrap();
    let record = store.get_session("abcdefghijkl").unwrap().unwrap();
    assert_eq!(record.project_path, "/tmp/proj");
    assert_eq!(record.model.as_deref(), Some("opus"));
    assert!(matches!(record.session_type, SessionKind::Assistant));
  }

  #[test]
  fn ended_sessions_are_excluded_from_missing_check() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(&dir.path().join("store.sqlite3")).unwrap();
    store.insert_session(&sample_view()).unwrap();
    store.mark_ended("abcdefghijkl").unwrap();
    assert!(store.ids_missing_from(&[]).unwrap().is_empty());
  }

  #[test]
  fn auth_token_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(&dir.path().join("store.sqlite3")).unwrap();
    assert!(store.get_auth_token().unwrap().is_none());
    store.set_auth_token("secret-token").unwrap();
    assert_eq!(store.get_auth_token().unwrap().as_deref(), Some("secret-token"));
  }
}
