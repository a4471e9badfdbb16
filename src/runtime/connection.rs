//! Connection state for the shell server.
//!
//! Each connection owns its socket, its inbound command buffer, any response
//! bytes the socket has not accepted yet, and its own working directory.

use crate::runtime::buffer::{CommandBuffer, DrainOutcome};
use crate::shell::WorkingDir;
use bytes::{Buf, BytesMut};
use mio::net::TcpStream;
use mio::Interest;
use slab::Slab;
use std::io::{self, Write};
use std::net::SocketAddr;

/// Registration state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Interested in read readiness only.
    Reading,
    /// Output is pending; also interested in write readiness.
    Flushing,
}

impl ConnState {
    pub fn interest(self) -> Interest {
        match self {
            ConnState::Reading => Interest::READABLE,
            ConnState::Flushing => Interest::READABLE | Interest::WRITABLE,
        }
    }
}

/// A single client connection.
pub struct Connection {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub input: CommandBuffer,
    /// Response bytes not yet written to the socket.
    output: BytesMut,
    /// Navigation state when each connection navigates on its own.
    pub workdir: WorkingDir,
    state: ConnState,
}

impl Connection {
    /// Create a new connection in initial reading state.
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        input: CommandBuffer,
        workdir: WorkingDir,
    ) -> Self {
        Self {
            stream,
            peer,
            input,
            output: BytesMut::new(),
            workdir,
            state: ConnState::Reading,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Drain the socket into the command buffer.
    pub fn fill(&mut self) -> io::Result<DrainOutcome> {
        self.input.drain(&mut self.stream)
    }

    /// Append response bytes to the outbound queue.
    pub fn queue(&mut self, response: &[u8]) {
        self.output.extend_from_slice(response);
    }

    /// Bytes waiting to be written.
    pub fn pending_output(&self) -> usize {
        self.output.len()
    }

    /// Write as much queued output as the socket accepts.
    ///
    /// Returns the state the connection should be registered with next.
    pub fn flush(&mut self) -> io::Result<ConnState> {
        while !self.output.is_empty() {
            match self.stream.write(&self.output) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
                }
                Ok(n) => self.output.advance(n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(ConnState::Flushing)
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(ConnState::Reading)
    }

    /// Record a new registration state, returning whether it changed.
    pub fn transition(&mut self, next: ConnState) -> bool {
        let changed = self.state != next;
        self.state = next;
        changed
    }
}

/// Registry of active connections using slab allocation.
///
/// Provides O(1) insert, lookup, and remove operations.
pub struct ConnectionRegistry {
    connections: Slab<Connection>,
    max_connections: usize,
}

impl ConnectionRegistry {
    /// Create a new registry with specified maximum capacity.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections.min(1024)),
            max_connections,
        }
    }

    /// Insert a new connection into the registry.
    ///
    /// Hands the connection back if the registry is at capacity.
    pub fn insert(&mut self, conn: Connection) -> Result<usize, Connection> {
        if self.connections.len() >= self.max_connections {
            return Err(conn);
        }
        Ok(self.connections.insert(conn))
    }

    /// Get a mutable reference to a connection.
    pub fn get_mut(&mut self, id: usize) -> Option<&mut Connection> {
        self.connections.get_mut(id)
    }

    /// Remove a connection from the registry.
    pub fn remove(&mut self, id: usize) -> Option<Connection> {
        self.connections.try_remove(id)
    }

    /// Check if a connection exists.
    pub fn contains(&self, id: usize) -> bool {
        self.connections.contains(id)
    }

    /// Number of active connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Framing;
    use std::io::Read;
    use std::path::PathBuf;

    /// A connected (server side, client side) socket pair.
    fn pair() -> (TcpStream, SocketAddr, std::net::TcpStream) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, peer) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        (TcpStream::from_std(server), peer, client)
    }

    fn connection() -> (Connection, std::net::TcpStream) {
        let (stream, peer, client) = pair();
        let conn = Connection::new(
            stream,
            peer,
            CommandBuffer::new(Framing::Burst, 256, 1024),
            WorkingDir::new(PathBuf::from("/"), true),
        );
        (conn, client)
    }

    #[test]
    fn test_connection_state_transitions() {
        let (mut conn, _client) = connection();
        assert_eq!(conn.state(), ConnState::Reading);

        assert!(conn.transition(ConnState::Flushing));
        assert!(!conn.transition(ConnState::Flushing));
        assert_eq!(conn.state().interest(), Interest::READABLE | Interest::WRITABLE);

        assert!(conn.transition(ConnState::Reading));
        assert_eq!(conn.state().interest(), Interest::READABLE);
    }

    #[test]
    fn test_queue_and_flush() {
        let (mut conn, mut client) = connection();
        conn.queue(b"hello");
        conn.queue(b"\n");
        assert_eq!(conn.pending_output(), 6);

        assert_eq!(conn.flush().unwrap(), ConnState::Reading);
        assert_eq!(conn.pending_output(), 0);

        let mut buf = [0u8; 6];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello\n");
    }

    #[test]
    fn test_connection_registry() {
        let mut registry = ConnectionRegistry::new(2);

        let (c1, _k1) = connection();
        let (c2, _k2) = connection();
        let (c3, _k3) = connection();

        let id1 = registry.insert(c1).ok().unwrap();
        let id2 = registry.insert(c2).ok().unwrap();

        // At capacity
        assert!(registry.insert(c3).is_err());

        assert_eq!(registry.len(), 2);
        assert!(registry.get_mut(id2).is_some());

        registry.remove(id1);
        assert!(!registry.contains(id1));
        assert!(registry.remove(id1).is_none());
        assert_eq!(registry.len(), 1);
    }
}
