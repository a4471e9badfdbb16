//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready,
//! then we perform non-blocking read/write syscalls.
//! Uses epoll on Linux, kqueue on macOS.
//!
//! Everything runs on one thread. Each event is handled to completion,
//! filesystem calls included, before the next one is looked at, so the
//! shared working directory never needs a lock.

use crate::config::{Config, NavigationMode};
use crate::runtime::buffer::{CommandBuffer, DrainOutcome};
use crate::runtime::connection::{ConnState, Connection, ConnectionRegistry};
use crate::shell::{Dispatcher, WorkingDir};
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use tracing::{debug, error, info, trace, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);

/// Where commands find their working directory.
enum Navigation {
    /// One directory mutated by every client.
    Shared(WorkingDir),
    /// Each connection uses its own `Connection::workdir`.
    PerConnection,
}

impl Navigation {
    fn workdir<'a>(&'a mut self, conn: &'a mut Connection) -> &'a mut WorkingDir {
        match self {
            Navigation::Shared(workdir) => workdir,
            Navigation::PerConnection => &mut conn.workdir,
        }
    }
}

/// A bound, not yet running, shell server.
pub struct Server {
    poll: Poll,
    listener: TcpListener,
    local_addr: SocketAddr,
    connections: ConnectionRegistry,
    navigation: Navigation,
    dispatcher: Dispatcher,
    config: Config,
}

impl Server {
    /// Bind the listening socket and register it for accept readiness.
    pub fn bind(config: Config) -> io::Result<Self> {
        let addr = resolve_listen_addr(&config.listen)?;
        let listener = create_listener(addr).map_err(|e| {
            io::Error::new(e.kind(), format!("failed to bind {addr}: {e}"))
        })?;
        let mut listener = TcpListener::from_std(listener);
        let local_addr = listener.local_addr()?;

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        let navigation = match config.navigation {
            NavigationMode::Shared => Navigation::Shared(WorkingDir::new(
                config.root.clone(),
                config.confine_to_root,
            )),
            NavigationMode::PerConnection => Navigation::PerConnection,
        };

        Ok(Self {
            poll,
            listener,
            local_addr,
            connections: ConnectionRegistry::new(config.max_connections),
            navigation,
            dispatcher: Dispatcher::new(config.cat_base),
            config,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve forever. Only readiness-wait failures end the loop.
    pub fn run(mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(self.config.events_capacity);

        info!(
            addr = %self.local_addr,
            root = %self.config.root.display(),
            navigation = ?self.config.navigation,
            framing = ?self.config.framing,
            "Listening"
        );

        loop {
            if let Err(e) = self.poll.poll(&mut events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e);
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER_TOKEN => self.accept_connections(),
                    Token(conn_id) => {
                        if let Err(e) = self.handle_connection_event(conn_id, event) {
                            debug!(conn_id, error = %e, "Connection error");
                            self.close_connection(conn_id);
                        }
                    }
                }
            }
        }
    }

    /// Accept every pending connection.
    ///
    /// Readiness is edge-triggered, so the backlog is drained until it
    /// would block; a pending connection left behind would get no new event.
    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let input = CommandBuffer::new(
                        self.config.framing,
                        self.config.read_chunk_size,
                        self.config.max_command_len,
                    );
                    // Only read in per-connection navigation
                    let workdir =
                        WorkingDir::new(self.config.root.clone(), self.config.confine_to_root);
                    let conn = Connection::new(stream, peer, input, workdir);

                    let conn_id = match self.connections.insert(conn) {
                        Ok(id) => id,
                        Err(_) => {
                            warn!(peer = %peer, "Connection limit reached");
                            continue;
                        }
                    };

                    // Re-borrow after insert
                    let Some(conn) = self.connections.get_mut(conn_id) else {
                        continue;
                    };
                    if let Err(e) = self.poll.registry().register(
                        &mut conn.stream,
                        Token(conn_id),
                        Interest::READABLE,
                    ) {
                        error!(conn_id, error = %e, "Failed to register connection");
                        self.connections.remove(conn_id);
                        continue;
                    }

                    info!(
                        conn_id,
                        peer = %peer,
                        active = self.connections.len(),
                        "Client accepted"
                    );
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("Accept error: {}", e);
                    break;
                }
            }
        }
    }

    fn handle_connection_event(
        &mut self,
        conn_id: usize,
        event: &mio::event::Event,
    ) -> io::Result<()> {
        if !self.connections.contains(conn_id) {
            return Ok(());
        }

        if event.is_error() {
            return Err(io::Error::new(io::ErrorKind::Other, "socket error"));
        }

        if event.is_readable() {
            self.handle_readable(conn_id)?;
        }

        if event.is_writable() {
            self.handle_writable(conn_id)?;
        }

        Ok(())
    }

    /// Drain one burst, run every complete command, and send the replies.
    fn handle_readable(&mut self, conn_id: usize) -> io::Result<()> {
        let conn = self
            .connections
            .get_mut(conn_id)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "connection not found"))?;

        if conn.fill()? == DrainOutcome::Closed {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "EOF"));
        }

        while let Some(line) = conn.input.extract() {
            trace!(conn_id, line = %line, "Received command");
            let workdir = self.navigation.workdir(conn);
            match self.dispatcher.dispatch(&line, workdir) {
                Ok(Some(response)) => conn.queue(&response),
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        conn_id,
                        peer = %conn.peer,
                        operation = e.operation(),
                        error = %e,
                        "Command failed"
                    );
                    return Err(e.into());
                }
            }
        }

        let next = conn.flush()?;
        if next == ConnState::Flushing {
            trace!(conn_id, pending = conn.pending_output(), "Socket full, awaiting writable");
        }
        if conn.transition(next) {
            self.poll
                .registry()
                .reregister(&mut conn.stream, Token(conn_id), next.interest())?;
        }

        Ok(())
    }

    /// Continue writing output the socket refused earlier.
    fn handle_writable(&mut self, conn_id: usize) -> io::Result<()> {
        let Some(conn) = self.connections.get_mut(conn_id) else {
            return Ok(());
        };
        if conn.state() != ConnState::Flushing {
            return Ok(());
        }

        let next = conn.flush()?;
        if conn.transition(next) {
            self.poll
                .registry()
                .reregister(&mut conn.stream, Token(conn_id), next.interest())?;
        }

        Ok(())
    }

    fn close_connection(&mut self, conn_id: usize) {
        if let Some(mut conn) = self.connections.remove(conn_id) {
            let _ = self.poll.registry().deregister(&mut conn.stream);
            debug!(
                conn_id,
                peer = %conn.peer,
                unprocessed = conn.input.pending_len(),
                "Connection closed"
            );
        }
    }
}

fn resolve_listen_addr(listen: &str) -> io::Result<SocketAddr> {
    listen.to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("no address for '{listen}'"),
        )
    })
}

/// Create a non-blocking TCP listener.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CatBase, Framing};
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::path::Path;
    use std::thread;
    use std::time::Duration;

    fn test_config(root: &Path) -> Config {
        Config {
            listen: "127.0.0.1:0".to_string(),
            root: root.canonicalize().unwrap(),
            navigation: NavigationMode::PerConnection,
            confine_to_root: true,
            cat_base: CatBase::WorkingDir,
            framing: Framing::Burst,
            read_chunk_size: 256,
            max_command_len: 64 * 1024,
            max_connections: 16,
            events_capacity: 64,
            log_level: "info".to_string(),
        }
    }

    fn spawn(config: Config) -> SocketAddr {
        let server = Server::bind(config).unwrap();
        let addr = server.local_addr();
        thread::spawn(move || server.run());
        addr
    }

    fn connect(addr: SocketAddr) -> TcpStream {
        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_millis(300)))
            .unwrap();
        stream
    }

    /// Send one command and collect whatever arrives before the line goes quiet.
    fn send(stream: &mut TcpStream, command: &str) -> String {
        stream.write_all(command.as_bytes()).unwrap();
        let mut out = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => out.extend_from_slice(&buf[..n]),
                Err(ref e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    break
                }
                Err(e) => panic!("read failed: {e}"),
            }
        }
        String::from_utf8(out).unwrap()
    }

    fn cd_line(path: &Path) -> String {
        format!("Changed directory to: {}\n", path.display())
    }

    #[test]
    fn test_bind_reports_address() {
        let dir = tempfile::tempdir().unwrap();
        let server = Server::bind(test_config(dir.path())).unwrap();
        assert_ne!(server.local_addr().port(), 0);
    }

    #[test]
    fn test_bind_conflict_fails() {
        let dir = tempfile::tempdir().unwrap();
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut config = test_config(dir.path());
        config.listen = taken.local_addr().unwrap().to_string();

        assert!(Server::bind(config).is_err());
    }

    #[test]
    fn test_session_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let root = config.root.clone();
        let mut client = connect(spawn(config));

        assert_eq!(send(&mut client, "mkdir a\n"), "Created directory: a\n");
        assert_eq!(send(&mut client, "ls\n"), "a\n");
        assert_eq!(send(&mut client, "cd a\n"), cd_line(&root.join("a")));
        assert_eq!(send(&mut client, "touch f.txt\n"), "Created file: f.txt\n");
        assert_eq!(send(&mut client, "ls\n"), "f.txt\n");
        assert_eq!(send(&mut client, "cd ..\n"), cd_line(&root));
        assert_eq!(send(&mut client, "cd ..\n"), cd_line(&root));
    }

    #[test]
    fn test_echo_and_silence() {
        let dir = tempfile::tempdir().unwrap();
        let mut client = connect(spawn(test_config(dir.path())));

        assert_eq!(send(&mut client, "hello\r\n"), "hello");
        assert_eq!(send(&mut client, "frobnicate now\n"), "");
        assert_eq!(send(&mut client, "cd\n"), "usage: cd <dir|..>\n");
        // Still serving after the malformed command
        assert_eq!(send(&mut client, "ls\n"), "\n");
    }

    #[test]
    fn test_cat_over_the_wire() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("greeting"), b"Hi").unwrap();
        let mut client = connect(spawn(test_config(dir.path())));

        assert_eq!(send(&mut client, "cat greeting\n"), "File bytes: [72, 105]\n");
    }

    #[test]
    fn test_filesystem_error_closes_only_that_connection() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let addr = spawn(test_config(dir.path()));
        let mut bad = connect(addr);
        let mut good = connect(addr);

        // Reading a directory fails; the server hangs up on this client
        assert_eq!(send(&mut bad, "cat sub\n"), "");
        let mut buf = [0u8; 1];
        assert_eq!(bad.read(&mut buf).unwrap(), 0);

        assert_eq!(send(&mut good, "ls\n"), "sub\n");
    }

    #[test]
    fn test_per_connection_navigation() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("inner"), b"").unwrap();
        let config = test_config(dir.path());
        let root = config.root.clone();
        let addr = spawn(config);
        let mut a = connect(addr);
        let mut b = connect(addr);

        assert_eq!(send(&mut a, "cd sub\n"), cd_line(&root.join("sub")));
        assert_eq!(send(&mut b, "ls\n"), "sub\n");
        assert_eq!(send(&mut a, "ls\n"), "inner\n");
    }

    #[test]
    fn test_shared_navigation() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("inner"), b"").unwrap();
        let mut config = test_config(dir.path());
        config.navigation = NavigationMode::Shared;
        let root = config.root.clone();
        let addr = spawn(config);
        let mut a = connect(addr);
        let mut b = connect(addr);

        assert_eq!(send(&mut a, "cd sub\n"), cd_line(&root.join("sub")));
        assert_eq!(send(&mut b, "ls\n"), "inner\n");
    }

    #[test]
    fn test_line_framing_handles_pipelined_commands() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.framing = Framing::Line;
        let mut client = connect(spawn(config));

        assert_eq!(
            send(&mut client, "mkdir a\nmkdir b\nls\n"),
            "Created directory: a\nCreated directory: b\na\nb\n"
        );
        assert_eq!(send(&mut client, "l"), "");
        assert_eq!(send(&mut client, "s\n"), "a\nb\n");
    }

    #[test]
    fn test_large_response_is_flushed() {
        let dir = tempfile::tempdir().unwrap();
        let payload = vec![7u8; 256 * 1024];
        std::fs::write(dir.path().join("big"), &payload).unwrap();
        let mut client = connect(spawn(test_config(dir.path())));

        let expected_len = "File bytes: [".len() + payload.len() * 3 - 2 + "]\n".len();
        client.write_all(b"cat big\n").unwrap();
        let mut out = Vec::with_capacity(expected_len);
        let mut buf = [0u8; 64 * 1024];
        while out.len() < expected_len {
            let n = client.read(&mut buf).unwrap();
            assert_ne!(n, 0);
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out.len(), expected_len);
        assert!(out.ends_with(b"7, 7]\n"));
    }

    #[test]
    fn test_resolve_listen_addr() {
        let addr = resolve_listen_addr("127.0.0.1:8189").unwrap();
        assert_eq!(addr.port(), 8189);
        assert!(resolve_listen_addr("not an address").is_err());
    }
}
