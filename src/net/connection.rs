//! Connected TCP sockets.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Establish client connections (non-blocking connect, bounded wait, SO_ERROR check)
//! - Send and receive raw segments with dynamic buffering
//! - Best-effort shutdown and close

use std::io::{self, Read};
use std::net::{Shutdown, SocketAddr, ToSocketAddrs};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use socket2::Socket;

use crate::error::TransportError;
use crate::net::poll::{self, Interest};
use crate::net::socket::{open_stream, shutdown_socket, terminate_socket, IpVersion, Role, SocketState};
use crate::net::{Received, SocketOptions, SCRATCH_LEN};

/// Source of connection IDs. Relaxed ordering: only uniqueness matters.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a socket handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// An established, non-blocking TCP stream.
///
/// Owns its descriptor. A [`TlsSession`](crate::tls::TlsSession) may borrow the
/// connection but never takes the descriptor away from it.
#[derive(Debug)]
pub struct TcpConnection {
    socket: Socket,
    id: ConnectionId,
    role: Role,
    peer_addr: Option<SocketAddr>,
    options: SocketOptions,
}

impl TcpConnection {
    /// Connect to `hostname:port` with default socket options.
    pub fn initialize_client(port: u16, hostname: &str, ip_version: IpVersion) -> Result<Self, TransportError> {
        Self::initialize_client_with(port, hostname, ip_version, SocketOptions::default())
    }

    /// Connect to `hostname:port` over `ip_version`.
    ///
    /// A connect that is still in progress is awaited for at most
    /// `options.connect_timeout`. The socket then counts as connected only if
    /// `SO_ERROR` reports nothing.
    pub fn initialize_client_with(
        port: u16,
        hostname: &str,
        ip_version: IpVersion,
        options: SocketOptions,
    ) -> Result<Self, TransportError> {
        let addr = resolve(hostname, port, ip_version)?;
        let socket = open_stream(ip_version)?;
        let id = ConnectionId::new();

        tracing::debug!(connection_id = %id, peer_addr = %addr, state = ?SocketState::Connecting, "Connecting");

        let outcome = match socket.connect(&addr.into()) {
            Ok(()) => Ok(()),
            Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) || e.kind() == io::ErrorKind::WouldBlock => {
                tracing::debug!(connection_id = %id, "Connect in progress, waiting until the socket is writable");
                await_connect(&socket, options.connect_timeout)
            }
            Err(e) => Err(e),
        };

        if let Err(e) = outcome {
            tracing::error!(fatal = true, connection_id = %id, peer_addr = %addr, error = %e, "Connection to server failed");
            terminate_socket(socket, id);
            return Err(TransportError::Connect { addr, source: e });
        }

        tracing::info!(connection_id = %id, peer_addr = %addr, state = ?SocketState::Connected, "Connected to server");

        Ok(Self {
            socket,
            id,
            role: Role::Client,
            peer_addr: Some(addr),
            options,
        })
    }

    /// Wrap a socket returned by `accept(2)`.
    pub(crate) fn from_accepted(
        socket: Socket,
        peer_addr: Option<SocketAddr>,
        options: SocketOptions,
    ) -> Result<Self, TransportError> {
        let id = ConnectionId::new();

        // accept(2) does not carry O_NONBLOCK over from the listener.
        if let Err(e) = socket.set_nonblocking(true) {
            tracing::error!(connection_id = %id, error = %e, "Could not make accepted socket non-blocking");
            terminate_socket(socket, id);
            return Err(TransportError::Accept(e));
        }

        match peer_addr {
            Some(addr) => tracing::info!(
                connection_id = %id,
                peer_ip = %addr.ip(),
                peer_port = addr.port(),
                "Accepted client"
            ),
            None => tracing::info!(connection_id = %id, "Accepted client with unknown address"),
        }

        Ok(Self {
            socket,
            id,
            role: Role::Server,
            peer_addr,
            options,
        })
    }

    /// Receive whatever the peer has sent, growing the buffer across reads.
    ///
    /// Reads in `SCRATCH_LEN` chunks until a read comes back short, the socket
    /// has nothing more buffered, or the peer closes. Waits (bounded) only while
    /// nothing has been received yet.
    pub fn receive_segment(&self) -> Result<Received, TransportError> {
        let mut scratch = [0u8; SCRATCH_LEN];
        let mut received = Vec::new();

        loop {
            match (&self.socket).read(&mut scratch) {
                Ok(0) => {
                    if received.is_empty() {
                        tracing::info!(
                            connection_id = %self.id,
                            "Peer sent 0 bytes. The communication might have been shut down"
                        );
                        return Ok(Received::Closed);
                    }
                    break;
                }
                Ok(n) => {
                    received.extend_from_slice(&scratch[..n]);
                    if n < SCRATCH_LEN {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if !received.is_empty() {
                        break;
                    }
                    self.wait(Interest::Readable, "receive a segment")?;
                }
                Err(e) => {
                    tracing::error!(connection_id = %self.id, error = %e, "Failed to receive message");
                    return Err(TransportError::Receive(e));
                }
            }
        }

        tracing::info!(connection_id = %self.id, bytes = received.len(), "Received segment");
        Ok(Received::Data(received))
    }

    /// Send `bytes` in a single attempt.
    ///
    /// Would-block and interrupts are retried; a short write is logged but not
    /// retried, so the returned count may be less than `bytes.len()`.
    pub fn send_segment(&self, bytes: &[u8]) -> Result<usize, TransportError> {
        let sent = loop {
            match self.socket.send(bytes) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.wait(Interest::Writable, "send a segment")?;
                }
                Err(e) => {
                    tracing::error!(connection_id = %self.id, error = %e, "Failed to send message");
                    return Err(TransportError::Send(e));
                }
            }
        };

        if sent != bytes.len() {
            tracing::warn!(
                connection_id = %self.id,
                expected = bytes.len(),
                sent,
                "Mismatch between buffer size and bytes sent"
            );
        }

        tracing::info!(connection_id = %self.id, bytes = sent, "Sent segment");
        Ok(sent)
    }

    /// Best-effort `shutdown(2)` without closing the descriptor.
    pub fn shutdown(&self, how: Shutdown) {
        shutdown_socket(&self.socket, how, self.id);
    }

    /// Shutdown both directions and close the descriptor.
    pub fn terminate(self) {
        terminate_socket(self.socket, self.id);
    }

    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Which side initiated the connection.
    pub fn role(&self) -> Role {
        self.role
    }

    /// A live connection is always connected; `terminate` consumes it.
    pub fn state(&self) -> SocketState {
        SocketState::Connected
    }

    /// Address of the remote endpoint, when the OS reported one.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Local address of the socket.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.local_addr().ok().and_then(|a| a.as_socket())
    }

    /// Wait bounds applied by this connection.
    pub fn options(&self) -> SocketOptions {
        self.options
    }

    pub(crate) fn socket(&self) -> &Socket {
        &self.socket
    }

    /// Wait for readiness, bounded by `io_timeout`. `Ok(false)` on timeout.
    pub(crate) fn wait_ready(&self, interest: Interest) -> io::Result<bool> {
        poll::wait_ready(self.as_raw_fd(), interest, self.options.io_timeout)
    }

    fn wait(&self, interest: Interest, what: &'static str) -> Result<(), TransportError> {
        match self.wait_ready(interest) {
            Ok(true) => Ok(()),
            Ok(false) => {
                tracing::warn!(connection_id = %self.id, "Timed out waiting to {}", what);
                Err(TransportError::Timeout(what))
            }
            Err(e) => {
                tracing::error!(connection_id = %self.id, error = %e, "Readiness wait failed");
                Err(match interest {
                    Interest::Readable => TransportError::Receive(e),
                    Interest::Writable => TransportError::Send(e),
                })
            }
        }
    }
}

impl AsRawFd for TcpConnection {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

impl AsFd for TcpConnection {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.socket.as_fd()
    }
}

/// Resolve `hostname` and keep the first address of the requested family.
fn resolve(hostname: &str, port: u16, ip_version: IpVersion) -> Result<SocketAddr, TransportError> {
    let addrs = (hostname, port).to_socket_addrs().map_err(|e| {
        tracing::error!(fatal = true, host = hostname, error = %e, "Hostname requested is unreachable");
        TransportError::Resolve {
            host: hostname.to_string(),
            source: e,
        }
    })?;

    addrs
        .into_iter()
        .find(|addr| ip_version.matches(addr))
        .ok_or_else(|| {
            tracing::error!(fatal = true, host = hostname, version = %ip_version, "Hostname has no address of the requested family");
            TransportError::NoAddress {
                host: hostname.to_string(),
                version: ip_version,
            }
        })
}

/// Wait for an in-progress connect, then confirm it through `SO_ERROR`.
fn await_connect(socket: &Socket, timeout: Duration) -> io::Result<()> {
    if !poll::wait_ready(socket.as_raw_fd(), Interest::Writable, Some(timeout))? {
        return Err(io::Error::new(io::ErrorKind::TimedOut, "connect did not complete in time"));
    }
    match socket.take_error()? {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
