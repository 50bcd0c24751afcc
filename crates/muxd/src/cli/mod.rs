//! CLI surface: argument parsing and dispatch.
//!
//! Grounded on the teacher's `cli::args`/`cli::lib::run` (a top-level
//! `Option<Commands>` that falls back to printing help, one module per
//! command group) and `cli::commands::daemon` (background spawn via
//! re-exec'ing the same binary, polling the daemon until it responds before
//! reporting success).

mod client;
mod commands;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(version, about = "muxd -- multiplex long-lived terminal sessions over tmux", long_about = None, bin_name = "muxd")]
pub struct Cli {
  #[command(subcommand)]
  pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
  /// Start the daemon (detached by default)
  Start(StartArgs),
  /// Stop the daemon
  Stop(StopArgs),
  /// Show whether the daemon is running
  Status,
  /// Print (or regenerate) the bearer token clients authenticate with
  Token(TokenArgs),
  /// Render a QR code encoding a connect URL for this daemon
  Qr,
  /// Create a new hosted session
  New(NewArgs),
  /// List hosted sessions
  List,
  /// Attach a terminal directly to a hosted session via tmux
  Attach(AttachArgs),
  /// Kill a hosted session
  Kill(KillArgs),
  /// Install a systemd user service that starts the daemon at login
  Install,
  /// Remove the systemd user service installed by `install`
  Uninstall,
  /// Internal: run the restart-on-crash supervisor loop around the daemon.
  #[command(hide = true, name = "__supervise")]
  Supervise,
}

#[derive(Debug, clap::Args)]
pub struct StartArgs {
  /// Bind the client hub to this port instead of the configured default
  #[arg(short, long)]
  pub port: Option<u16>,
  /// Run in the foreground instead of spawning a detached daemon
  #[arg(short = 'f', long)]
  pub foreground: bool,
}

#[derive(Debug, clap::Args)]
pub struct StopArgs {
  /// Also kill every hosted tmux session instead of leaving them detached
  #[arg(long = "kill-sessions")]
  pub kill_sessions: bool,
}

#[derive(Debug, clap::Args)]
pub struct TokenArgs {
  /// Generate a new token, invalidating the old one
  #[arg(short = 'r', long)]
  pub regenerate: bool,
}

#[derive(Debug, clap::Args)]
pub struct NewArgs {
  /// Project directory the session should start in (defaults to cwd)
  #[arg(short, long)]
  pub path: Option<String>,
  /// Model identifier to launch the assistant with
  #[arg(short, long)]
  pub model: Option<String>,
  /// Start the assistant in plan mode
  #[arg(long)]
  pub plan: bool,
  /// Host a plain shell instead of the assistant
  #[arg(long)]
  pub shell: bool,
}

#[derive(Debug, clap::Args)]
pub struct AttachArgs {
  /// Session id
  pub id: String,
}

#[derive(Debug, clap::Args)]
pub struct KillArgs {
  /// Session id
  pub id: String,
}

pub fn run() {
  if std::env::args_os().len() == 1 {
    print_help();
    return;
  }

  let cli = Cli::parse();
  match cli.command {
    Some(Commands::Start(a)) => commands::start(a),
    Some(Commands::Stop(a)) => commands::stop(a),
    Some(Commands::Status) => commands::status(),
    Some(Commands::Token(a)) => commands::token(a),
    Some(Commands::Qr) => commands::qr(),
    Some(Commands::New(a)) => commands::new_session(a),
    Some(Commands::List) => commands::list(),
    Some(Commands::Attach(a)) => commands::attach(a),
    Some(Commands::Kill(a)) => commands::kill(a),
    Some(Commands::Install) => commands::install(),
    Some(Commands::Uninstall) => commands::uninstall(),
    Some(Commands::Supervise) => commands::supervise(),
    None => print_help(),
  }
}

fn print_help() {
  use clap::CommandFactory as _;
  let mut cmd = Cli::command();
  cmd.print_help().expect("print help");
  println!();
}
