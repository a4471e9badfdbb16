//! Single-threaded readiness runtime.
//!
//! - `Server`: owns the listener and the mio poll loop
//! - `Connection`: socket, command buffer, pending output and working directory
//! - `CommandBuffer`: turns read bursts into trimmed command strings

mod buffer;
mod connection;
mod event_loop;

pub use event_loop::Server;

use crate::config::Config;

/// Bind the configured address and serve until the process exits.
pub fn run(config: Config) -> std::io::Result<()> {
    Server::bind(config)?.run()
}
