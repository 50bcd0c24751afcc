//! Daemon entry point: wires `Config` + `Store` + `SessionRegistry` + `Hub`
//! together, runs rediscovery, and blocks serving clients until a shutdown
//! signal arrives.
//!
//! Grounded on the teacher's `pty::daemon::Daemon` for the overall
//! "construct everything, install signal handlers, run the accept loop"
//! shape, generalized to the two shutdown modes this spec names (graceful
//! vs. purge) instead of the teacher's single shutdown path.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use log::info;
use signal_hook::consts::{SIGINT, SIGTERM, SIGUSR1};
use signal_hook::iterator::Signals;

use crate::auth;
use crate::config::Config;
use crate::hub::Hub;
use crate::registry::SessionRegistry;
use crate::store::Store;

/// Run the daemon in the foreground of the current process. Blocks until a
/// shutdown signal is received.
pub fn run_foreground(cfg: Config) -> Result<()> {
  cfg.paths.ensure_state_dir().context("prepare state directory")?;
  write_pid_file(&cfg)?;

  let store = Store::open(&cfg.paths.store_file).context("open durable store")?;
  let token = match store.get_auth_token()? {
    Some(t) => t,
    None => {
      let t = auth::generate_token();
      store.set_auth_token(&t)?;
      info!("generated a new bearer token");
      t
    }
  };

  let registry = Arc::new(SessionRegistry::new(cfg.clone(), store));
  registry.rediscover().context("rediscover sessions on startup")?;

  let shutdown = Arc::new(AtomicBool::new(false));
  let purge = Arc::new(AtomicBool::new(false));
  spawn_signal_watcher(Arc::clone(&shutdown), Arc::clone(&purge));

  let hub = Hub::new(cfg.clone(), Arc::clone(&registry), token);
  let hub_for_shutdown = Arc::clone(&hub);
  let registry_for_shutdown = Arc::clone(&registry);
  std::thread::spawn(move || {
    loop {
      std::thread::sleep(std::time::Duration::from_millis(100));
      if shutdown.load(Ordering::SeqCst) {
        if purge.load(Ordering::SeqCst) {
          info!("purge shutdown: killing every hosted session");
          registry_for_shutdown.shutdown_purge();
        } else {
          info!("graceful shutdown: disconnecting every hosted session");
          registry_for_shutdown.shutdown_graceful();
        }
        let _ = hub_for_shutdown;
        std::process::exit(0);
      }
    }
  });

  info!("muxd daemon ready on 127.0.0.1:{}", cfg.bind_port);
  hub.run()
}

fn write_pid_file(cfg: &Config) -> Result<()> {
  std::fs::write(&cfg.paths.pid_file, std::process::id().to_string())
    .with_context(|| format!("write pid file {}", cfg.paths.pid_file.display()))
}

fn spawn_signal_watcher(shutdown: Arc<AtomicBool>, purge: Arc<AtomicBool>) {
  let Ok(mut signals) = Signals::new([SIGTERM, SIGINT, SIGUSR1]) else {
    return;
  };
  std::thread::spawn(move || {
    for sig in signals.forever() {
      if sig == SIGUSR1 {
        purge.store(true, Ordering::SeqCst);
      }
      shutdown.store(true, Ordering::SeqCst);
    }
  });
}
