//! telnet-shell: A minimal remote shell server
//!
//! Clients connect over plain TCP and send newline-terminated commands:
//! - `ls`, `cd`, `touch`, `mkdir` against a server-side working directory
//! - `cat` to dump a file's bytes
//! - anything else without a space is echoed back
//!
//! Features:
//! - Single-threaded mio event loop (epoll/kqueue)
//! - Shared or per-connection navigation state
//! - Configuration via CLI arguments or TOML file

mod config;
mod runtime;
mod shell;

use config::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        root = %config.root.display(),
        navigation = ?config.navigation,
        confine_to_root = config.confine_to_root,
        cat_base = ?config.cat_base,
        framing = ?config.framing,
        max_connections = config.max_connections,
        "Starting telnet-shell server"
    );

    runtime::run(config)?;
    Ok(())
}
