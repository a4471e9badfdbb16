//! Shell protocol implementation.
//!
//! A tiny line-oriented command set operating on a server-side directory:
//!
//! ```text
//! ls               -> entry names, one per line, then "\n"
//! cd <dir|..>      -> "Changed directory to: <path>\n"
//! touch <name>     -> "Created file: <name>\n" (silent if it exists)
//! mkdir <name>     -> "Created directory: <name>\n" (silent if it exists)
//! cat <path>       -> "File bytes: [72, 105]\n" (silent if missing or empty)
//! hello            -> "hello" (no space: echoed back, no newline)
//! foo bar          -> nothing
//! ```
//!
//! Responses carry no framing or status; the client decides when one is over.

pub mod handler;
pub mod parser;
pub mod workdir;

pub use handler::Dispatcher;
pub use workdir::WorkingDir;

use std::io;
use std::path::{Path, PathBuf};

/// A filesystem failure while executing a command.
#[derive(Debug)]
pub struct ShellError {
    operation: &'static str,
    path: PathBuf,
    source: io::Error,
}

impl ShellError {
    pub fn io(operation: &'static str, path: &Path, source: io::Error) -> Self {
        Self {
            operation,
            path: path.to_path_buf(),
            source,
        }
    }

    /// The command that failed.
    pub fn operation(&self) -> &'static str {
        self.operation
    }
}

impl std::fmt::Display for ShellError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} failed on '{}': {}",
            self.operation,
            self.path.display(),
            self.source
        )
    }
}

impl std::error::Error for ShellError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

impl From<ShellError> for io::Error {
    fn from(e: ShellError) -> Self {
        io::Error::new(e.source.kind(), e)
    }
}
