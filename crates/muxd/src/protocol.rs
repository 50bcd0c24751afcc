//! Wire protocol: duplex length-prefixed frames carrying UTF-8 JSON.
//!
//! Framing mirrors the teacher's `pty::protocol::write_frame`/`read_frame`
//! (4-byte little-endian length header followed by the payload), but the
//! payload codec is `serde_json` instead of `bincode` -- clients are
//! expected to be written in other languages, so the wire format needs to
//! be inspectable and not Rust-specific.

use std::io::{Read, Write};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde::{Serialize as SerdeSerialize, de::DeserializeOwned};

pub const FRAME_HEADER_LEN: usize = 4;
/// Frames larger than this are rejected outright; guards against a
/// corrupted or malicious length header causing an unbounded allocation.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// Write one length-prefixed JSON frame.
pub fn write_frame<W: Write, T: SerdeSerialize>(mut writer: W, payload: &T) -> Result<()> {
  let data = serde_json::to_vec(payload).context("encode frame as json")?;
  let len = u32::try_from(data.len()).context("frame payload too large")?;
  writer.write_all(&len.to_le_bytes()).context("write frame header")?;
  writer.write_all(&data).context("write frame payload")?;
  Ok(())
}

/// Read one length-prefixed JSON frame.
pub fn read_frame<R: Read, T: DeserializeOwned>(mut reader: R) -> Result<T> {
  let mut hdr = [0u8; FRAME_HEADER_LEN];
  reader.read_exact(&mut hdr).context("read frame header")?;
  let len = u32::from_le_bytes(hdr);
  if len > MAX_FRAME_LEN {
    anyhow::bail!("frame length {len} exceeds maximum {MAX_FRAME_LEN}");
  }
  let mut buf = vec![0u8; len as usize];
  reader.read_exact(&mut buf).context("read frame payload")?;
  serde_json::from_slice(&buf).context("decode frame json")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
  Assistant,
  Shell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
  Starting,
  Idle,
  Working,
  AwaitingInput,
  AwaitingConfirmation,
  ContextLimit,
  Dead,
  Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionView {
  pub id: String,
  pub project_path: String,
  pub model: Option<String>,
  pub plan_mode: bool,
  pub auto_accept: bool,
  pub state: SessionState,
  pub session_type: SessionType,
  pub created_at_ms: u64,
  pub updated_at_ms: u64,
  pub ended_at_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
  Confirmation,
  Selection,
  OpenQuestion,
}

/// Client -> daemon messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum C2D {
  Auth { token: String },
  Ping,
  GetSessions,
  GetOutput { session_id: String, lines: Option<u32> },
  CreateSession {
    project_path: String,
    model: Option<String>,
    plan_mode: Option<bool>,
    session_type: Option<SessionType>,
  },
  KillSession { session_id: String },
  RestartSession { session_id: String, with_summary: bool },
  ChangeModel { session_id: String, model: String },
  ToggleMode { session_id: String, mode: String, enabled: bool },
  SendInput { session_id: String, input: String },
  SendCommand { session_id: String, command: String },
  SendKey { session_id: String, key: String },
  ResizeTerminal { session_id: String, cols: u16, rows: u16 },
  Scroll { session_id: String },
  BrowseDirectory { path: String },
  BrowseFiles { session_id: String, path: String },
  ReadFile { session_id: String, path: String },
  WriteFile { session_id: String, path: String, content: String },
  CreateFile { session_id: String, path: String },
  CreateDirectory { session_id: String, path: String },
  RenameFile { session_id: String, from: String, to: String },
  DeleteFile { session_id: String, path: String },
}

/// Daemon -> client messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum D2C {
  AuthResult { success: bool },
  Pong,
  Error { message: String, session_id: Option<String> },
  Capabilities { models: Vec<String>, modes: Vec<String>, commands: Vec<String> },
  SessionsList { sessions: Vec<SessionView> },
  SessionCreated { session: SessionView },
  SessionUpdated { session: SessionView },
  SessionKilled { session_id: String },
  InputRequired {
    session_id: String,
    input_type: InputType,
    context: String,
    question: String,
    options: Option<Vec<String>>,
    timestamp_ms: u64,
  },
  OutputUpdate { session_id: String, content: String },
  ContextLimit { session_id: String, message: String },
  DirectoryListing { path: String, directories: Vec<String>, error: Option<String> },
  ScrollbackContent { session_id: String, content: String },
  FileListing { session_id: String, path: String, entries: Vec<String>, error: Option<String> },
  FileContent { session_id: String, path: String, content: Option<String>, error: Option<String> },
  FileWriteResult { session_id: String, path: String, success: bool, error: Option<String> },
  FileOpResult { session_id: String, success: bool, error: Option<String> },
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn round_trips_through_frame_encoding() {
    let msg = C2D::SendKey {
      session_id: "abc123456789".to_string(),
      key: "\u{1b}[A".to_string(),
    };
    let mut buf = Vec::new();
    write_frame(&mut buf, &msg).unwrap();
    let decoded: C2D = read_frame(buf.as_slice()).unwrap();
    match decoded {
      C2D::SendKey { session_id, key } => {
        assert_eq!(session_id, "abc123456789");
        assert_eq!(key, "\u{1b}[A");
      }
      other => panic!("unexpected variant: {other:?}"),
    }
  }

  #[test]
  fn rejects_oversized_frame_header() {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(MAX_FRAME_LEN + 1).to_le_bytes());
    let result: Result<C2D> = read_frame(buf.as_slice());
    assert!(result.is_err());
  }
}
