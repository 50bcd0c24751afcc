//! Synchronous RPC client used by every CLI subcommand that talks to a
//! running daemon: dial, authenticate, send one request, wait for the
//! paired reply.
//!
//! Grounded on the teacher's `cli::rpc::client` (connect, send, await a
//! specific reply tag, map transport errors to a friendly message), adapted
//! from its Unix-socket/JSON-RPC transport to our TCP/length-prefixed-frame
//! one (`protocol::{read_frame, write_frame}`).

use std::net::TcpStream;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use crate::protocol::{C2D, D2C, read_frame, write_frame};

/// Connection attempts from CLI helpers have a 5s handshake timeout.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
/// RPC-style requests that expect a specific reply tag time out after 10s.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Client {
  stream: TcpStream,
}

impl Client {
  /// Dial the daemon on localhost and authenticate with `token`.
  pub fn connect(port: u16, token: &str) -> Result<Self> {
    let addr = format!("127.0.0.1:{port}");
    let socket_addr = addr.parse().with_context(|| format!("parse address {addr}"))?;
    let stream =
      TcpStream::connect_timeout(&socket_addr, HANDSHAKE_TIMEOUT).with_context(|| format!("connect to {addr}"))?;
    stream.set_read_timeout(Some(REQUEST_TIMEOUT)).context("set read timeout")?;
    stream.set_nodelay(true).ok();

    let mut client = Self { stream };
    write_frame(&mut client.stream, &C2D::Auth { token: token.to_string() }).context("send auth frame")?;
    match client.recv_until(|msg| matches!(msg, D2C::AuthResult { .. }))? {
      D2C::AuthResult { success: true } => {}
      D2C::AuthResult { success: false } => bail!("authentication rejected by daemon"),
      _ => unreachable!("recv_until only returns matches"),
    }
    // The daemon unconditionally follows a successful auth with `Capabilities`
    // then `SessionsList` (see `Hub::handshake`); drain both here so a
    // subsequent `request(GetSessions, ...)` can't match this stale push
    // instead of its own reply.
    let _: D2C = read_frame(&mut client.stream).context("read capabilities frame")?;
    let _: D2C = read_frame(&mut client.stream).context("read initial sessions-list frame")?;
    Ok(client)
  }

  /// Send a request and return the first reply matching `is_match`, skipping
  /// unrelated broadcasts (e.g. the session list the daemon pushes right
  /// after a successful handshake).
  pub fn request(&mut self, msg: &C2D, is_match: impl Fn(&D2C) -> bool) -> Result<D2C> {
    write_frame(&mut self.stream, msg).context("send request frame")?;
    self.recv_until(is_match)
  }

  fn recv_until(&mut self, is_match: impl Fn(&D2C) -> bool) -> Result<D2C> {
    let deadline = std::time::Instant::now() + REQUEST_TIMEOUT;
    loop {
      if std::time::Instant::now() >= deadline {
        bail!("timed out waiting for daemon reply");
      }
      let reply: D2C = read_frame(&mut self.stream).context("read reply frame")?;
      if let D2C::Error { message, .. } = &reply {
        bail!("daemon error: {message}");
      }
      if is_match(&reply) {
        return Ok(reply);
      }
    }
  }
}
