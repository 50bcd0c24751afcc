//! Error taxonomy used at the boundaries named in the component design.
//!
//! Most call sites propagate with `anyhow`, the teacher's idiom. This enum
//! exists only at the few places that need to decide *how* to surface a
//! failure: as a wire-level `error` message, a silent retry, or a process
//! exit for the supervisor to restart.

use std::fmt;

/// Classifies a failure so the caller can decide how to surface it.
#[derive(Debug)]
pub enum MuxdError {
  /// Bad input from a client: unknown session id, invalid token, path
  /// traversal attempt, oversized file, etc. Surfaced verbatim to the
  /// client; CLI callers exit 1.
  User(String),
  /// External command or I/O failure expected to be transient (tmux not
  /// responding, a capture that failed). Callers degrade gracefully and
  /// retry on the next trigger.
  Transient(anyhow::Error),
  /// An operation was attempted against a session that is not in a state
  /// that supports it (e.g. `send_input` on a dead session).
  State(String),
  /// Unrecoverable initialization failure. The daemon process exits; the
  /// supervisor restarts it under backoff.
  Fatal(anyhow::Error),
}

impl fmt::Display for MuxdError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      MuxdError::User(msg) => write!(f, "{msg}"),
      MuxdError::Transient(err) => write!(f, "{err}"),
      MuxdError::State(msg) => write!(f, "{msg}"),
      MuxdError::Fatal(err) => write!(f, "{err}"),
    }
  }
}

impl std::error::Error for MuxdError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      MuxdError::Transient(err) | MuxdError::Fatal(err) => err.source(),
      MuxdError::User(_) | MuxdError::State(_) => None,
    }
  }
}

impl MuxdError {
  #[must_use]
  pub fn user(msg: impl Into<String>) -> Self {
    Self::User(msg.into())
  }

  #[must_use]
  pub fn state(msg: impl Into<String>) -> Self {
    Self::State(msg.into())
  }

  /// The message to send back to a client over the wire protocol.
  #[must_use]
  pub fn wire_message(&self) -> String {
    self.to_string()
  }
}
