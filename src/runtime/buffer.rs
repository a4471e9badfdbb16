//! Per-connection command accumulation.
//!
//! A readable event triggers one *burst*: non-blocking reads of a fixed-size
//! chunk until the socket reports `WouldBlock`. The accumulated bytes are
//! then split into commands according to the configured [`Framing`].
//!
//! ## Framing
//!
//! - `Burst`: the whole burst is one command. A command split across two
//!   bursts is seen as two commands; two commands in one burst are seen as one.
//! - `Line`: each `\n`-terminated line is a command. Bytes after the last
//!   newline stay buffered until a later burst completes the line.

use crate::config::Framing;
use bytes::BytesMut;
use std::io::{self, Read};

/// Outcome of draining a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// No more data right now; the peer is still connected.
    Open,
    /// The peer closed its side.
    Closed,
}

/// Accumulates raw bytes and hands out trimmed command strings.
pub struct CommandBuffer {
    /// Bytes not yet handed out as a command.
    pending: BytesMut,
    /// Scratch space for a single read.
    chunk: Vec<u8>,
    /// Bytes since the last `\n` in `pending` (line framing).
    partial_len: usize,
    framing: Framing,
    max_command_len: usize,
}

impl CommandBuffer {
    /// Create a buffer reading `chunk_size` bytes at a time.
    pub fn new(framing: Framing, chunk_size: usize, max_command_len: usize) -> Self {
        Self {
            pending: BytesMut::with_capacity(chunk_size),
            chunk: vec![0u8; chunk_size.max(1)],
            partial_len: 0,
            framing,
            max_command_len,
        }
    }

    /// Read from `reader` until it would block or reaches end of stream.
    ///
    /// Fails with `InvalidData` as soon as one command grows past
    /// `max_command_len`: the whole burst for `Burst`, any single line for `Line`.
    pub fn drain<R: Read>(&mut self, reader: &mut R) -> io::Result<DrainOutcome> {
        loop {
            match reader.read(&mut self.chunk) {
                Ok(0) => return Ok(DrainOutcome::Closed),
                Ok(n) => {
                    self.pending.extend_from_slice(&self.chunk[..n]);
                    self.check_length(n)?;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(DrainOutcome::Open)
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Enforce the command limit after `added` bytes were appended.
    fn check_length(&mut self, added: usize) -> io::Result<()> {
        let len = match self.framing {
            Framing::Burst => self.pending.len(),
            Framing::Line => {
                let start = self.pending.len() - added;
                for &b in &self.pending[start..] {
                    if b == b'\n' {
                        self.partial_len = 0;
                    } else {
                        self.partial_len += 1;
                        if self.partial_len > self.max_command_len {
                            break;
                        }
                    }
                }
                self.partial_len
            }
        };
        if len > self.max_command_len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("command too long: {} > {}", len, self.max_command_len),
            ));
        }
        Ok(())
    }

    /// Take the next complete command, trimmed of surrounding whitespace.
    pub fn extract(&mut self) -> Option<String> {
        let raw = match self.framing {
            Framing::Burst => {
                if self.pending.is_empty() {
                    return None;
                }
                self.pending.split()
            }
            Framing::Line => {
                let pos = self.pending.iter().position(|&b| b == b'\n')?;
                self.pending.split_to(pos + 1)
            }
        };
        // Control bytes count as padding, so a telnet `\r\0` ending is dropped
        let text = String::from_utf8_lossy(&raw);
        Some(text.trim_matches(|c: char| c <= ' ').to_string())
    }

    /// Bytes buffered but not yet extracted.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
