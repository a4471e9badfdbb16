//! Command dispatch.
//!
//! Executes parsed commands against a working directory and the local
//! filesystem, producing the exact bytes to send back to the client.

use super::parser::{parse, Command, ParseResult};
use super::workdir::WorkingDir;
use super::ShellError;
use crate::config::CatBase;
use bytes::{BufMut, BytesMut};
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Maps command lines to filesystem actions and responses.
#[derive(Debug, Clone, Copy)]
pub struct Dispatcher {
    cat_base: CatBase,
}

impl Dispatcher {
    pub fn new(cat_base: CatBase) -> Self {
        Self { cat_base }
    }

    /// Parse and execute one trimmed command line.
    ///
    /// `Ok(None)` means nothing is written back. Errors are filesystem
    /// failures scoped to the connection that sent the command.
    pub fn dispatch(
        &self,
        line: &str,
        workdir: &mut WorkingDir,
    ) -> Result<Option<BytesMut>, ShellError> {
        match parse(line) {
            ParseResult::Complete(command) => {
                trace!(?command, "Processing command");
                self.execute(&command, workdir)
            }
            ParseResult::Unknown => {
                trace!(line, "Ignoring unknown command");
                Ok(None)
            }
            ParseResult::Usage(text) => {
                debug!(line, "Malformed command");
                Ok(Some(BytesMut::from(text)))
            }
        }
    }

    /// Execute a parsed command.
    pub fn execute(
        &self,
        command: &Command,
        workdir: &mut WorkingDir,
    ) -> Result<Option<BytesMut>, ShellError> {
        match command {
            Command::List => list(workdir.current()).map(Some),

            Command::ChangeDir(name) => {
                let current = workdir.change(name);
                Ok(Some(line(format_args!(
                    "Changed directory to: {}",
                    current.display()
                ))))
            }

            Command::Touch(name) => {
                let path = workdir.resolve(name);
                if path.exists() {
                    return Ok(None);
                }
                OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&path)
                    .map_err(|e| ShellError::io("touch", &path, e))?;
                Ok(Some(line(format_args!("Created file: {name}"))))
            }

            Command::MakeDir(name) => {
                let path = workdir.resolve(name);
                if path.is_dir() {
                    return Ok(None);
                }
                fs::create_dir(&path).map_err(|e| ShellError::io("mkdir", &path, e))?;
                Ok(Some(line(format_args!("Created directory: {name}"))))
            }

            Command::Cat(name) => {
                let path = match self.cat_base {
                    CatBase::Process => PathBuf::from(name),
                    CatBase::WorkingDir => workdir.resolve(name),
                };
                if !path.exists() {
                    return Ok(None);
                }
                let bytes = fs::read(&path).map_err(|e| ShellError::io("cat", &path, e))?;
                if bytes.is_empty() {
                    return Ok(None);
                }
                Ok(Some(byte_dump(&bytes)))
            }

            Command::Echo(text) => Ok(Some(BytesMut::from(text.as_str()))),
        }
    }
}

/// Base names of the entries in `dir`, sorted, one per line.
fn list(dir: &Path) -> Result<BytesMut, ShellError> {
    let entries = fs::read_dir(dir).map_err(|e| ShellError::io("ls", dir, e))?;
    let mut names = entries
        .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
        .collect::<io::Result<Vec<_>>>()
        .map_err(|e| ShellError::io("ls", dir, e))?;
    names.sort();

    let mut response = BytesMut::with_capacity(names.iter().map(|n| n.len() + 1).sum());
    response.put_slice(names.join("\n").as_bytes());
    response.put_u8(b'\n');
    Ok(response)
}

/// `File bytes: [b0, b1, ...]` with each byte as a signed value.
fn byte_dump(bytes: &[u8]) -> BytesMut {
    let values: Vec<String> = bytes.iter().map(|&b| (b as i8).to_string()).collect();
    line(format_args!("File bytes: [{}]", values.join(", ")))
}

fn line(args: std::fmt::Arguments<'_>) -> BytesMut {
    let mut response = BytesMut::from(args.to_string().as_str());
    response.put_u8(b'\n');
    response
}
