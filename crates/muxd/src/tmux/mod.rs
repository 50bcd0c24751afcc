//! tmux driver: every call the rest of the daemon makes against the
//! multiplexer goes through this module, pinned to our own dedicated tmux
//! server (`common::tmux_args_base`) so a developer's personal tmux session
//! never collides with hosted ones.

pub mod common;
pub mod driver;
pub mod pane;
pub mod server;

pub use driver::Reader;
pub use pane::{Key, NamedKey, map_raw_key};
