//! Supervisor: wraps the daemon as a child process and restarts it under
//! exponential backoff, forwarding `SIGTERM`/`SIGINT`/`SIGUSR1` so the two
//! shutdown modes (graceful vs. purge) reach the daemon unchanged.
//!
//! Grounded on the signal-handling shape of the two terminal-multiplexing
//! daemons in the retrieval pack (`shell-pool-shpool`'s daemon server,
//! `otty-shell-otty`'s terminal driver) generalized from "handle signals
//! inside the single long-running process" to "handle them in an outer
//! process that can also decide to respawn its child."

use std::process::{Child, Command};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::time::{Duration, Instant};

use log::{info, warn};
use signal_hook::consts::{SIGINT, SIGTERM, SIGUSR1};
use signal_hook::iterator::Signals;

const QUICK_DEATH_THRESHOLD: Duration = Duration::from_secs(5);
const BASE_BACKOFF_MS: u64 = 1000;
const MAX_BACKOFF_MS: u64 = 60_000;

/// Run the supervisor loop forever (until a terminating signal arrives).
/// `spawn_child` builds and spawns one daemon process; called again on
/// every respawn.
pub fn run(mut spawn_child: impl FnMut() -> anyhow::Result<Child>) -> anyhow::Result<()> {
  let stopping = Arc::new(AtomicBool::new(false));
  let child_pid = Arc::new(AtomicI32::new(0));
  spawn_signal_forwarder(Arc::clone(&stopping), Arc::clone(&child_pid));

  let mut quick_deaths: u32 = 0;

  loop {
    if stopping.load(Ordering::SeqCst) {
      return Ok(());
    }

    let start = Instant::now();
    let mut child = spawn_child()?;
    child_pid.store(child.id() as i32, Ordering::SeqCst);
    info!("daemon child started, pid {}", child.id());

    let status = child.wait()?;
    child_pid.store(0, Ordering::SeqCst);

    if stopping.load(Ordering::SeqCst) {
      return Ok(());
    }

    if status.success() {
      info!("daemon child exited cleanly; supervisor exiting");
      return Ok(());
    }

    if start.elapsed() >= QUICK_DEATH_THRESHOLD {
      quick_deaths = 0;
    } else {
      quick_deaths += 1;
    }

    let delay_ms = backoff_ms(quick_deaths);
    warn!(
      "daemon child exited unexpectedly ({status}); respawning in {delay_ms}ms (quick_deaths={quick_deaths})"
    );
    std::thread::sleep(Duration::from_millis(delay_ms));
  }
}

/// `min(1000 * 2^quickDeaths, 60_000)`.
#[must_use]
fn backoff_ms(quick_deaths: u32) -> u64 {
  BASE_BACKOFF_MS.saturating_mul(1u64 << quick_deaths.min(20)).min(MAX_BACKOFF_MS)
}

/// `SIGTERM`/`SIGINT` set `stopping` and forward the signal; the main loop
/// notices once the child exits and returns. `SIGUSR1` forwards the purge
/// signal and exits the supervisor process immediately, without waiting
/// for the child -- the daemon performs its own purge-then-graceful
/// shutdown on its own time.
fn spawn_signal_forwarder(stopping: Arc<AtomicBool>, child_pid: Arc<AtomicI32>) {
  let Ok(mut signals) = Signals::new([SIGTERM, SIGINT, SIGUSR1]) else {
    return;
  };
  std::thread::spawn(move || {
    for sig in signals.forever() {
      stopping.store(true, Ordering::SeqCst);
      let pid = child_pid.load(Ordering::SeqCst);
      if pid > 0 {
        let signame = if sig == SIGUSR1 { "-USR1" } else { "-TERM" };
        let _ = Command::new("kill").arg(signame).arg(pid.to_string()).status();
      }
      if sig == SIGUSR1 {
        std::process::exit(0);
      }
    }
  });
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn backoff_doubles_up_to_the_cap() {
    assert_eq!(backoff_ms(0), 1000);
    assert_eq!(backoff_ms(1), 2000);
    assert_eq!(backoff_ms(5), 32_000);
    assert_eq!(backoff_ms(6), 60_000);
    assert_eq!(backoff_ms(20), 60_000);
  }

  #[test]
  fn sixth_restart_after_five_quick_deaths_is_at_least_32s() {
    // Five consecutive sub-5s exits bump quick_deaths to 5 before the
    // sixth respawn computes its delay.
    assert!(backoff_ms(5) >= 32_000);
  }
}
