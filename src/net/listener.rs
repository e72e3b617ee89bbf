//! TCP listener.
//!
//! # Responsibilities
//! - Bind a non-blocking socket to the wildcard address of the requested IP version
//! - Listen with the platform's maximum backlog
//! - Accept clients, waiting (bounded) while none is pending
//! - Tear the socket down on any setup failure

use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, RawFd};

use socket2::Socket;

use crate::error::TransportError;
use crate::net::poll::{self, Interest};
use crate::net::socket::{open_stream, terminate_socket, IpVersion, Role, SocketState};
use crate::net::{ConnectionId, SocketOptions, TcpConnection};

/// A listening server socket.
#[derive(Debug)]
pub struct Listener {
    /// The underlying non-blocking socket.
    socket: Socket,
    /// Identifier used in log fields.
    id: ConnectionId,
    /// Address the socket is actually bound to.
    local_addr: SocketAddr,
    /// Wait bounds, inherited by accepted connections.
    options: SocketOptions,
}

impl Listener {
    /// Listen on the wildcard address of `ip_version` with default socket options.
    pub fn initialize_server(port: u16, ip_version: IpVersion) -> Result<Self, TransportError> {
        Self::initialize_server_with(port, ip_version, SocketOptions::default())
    }

    /// Listen on the wildcard address of `ip_version`.
    ///
    /// Port 0 asks the OS for an ephemeral port; see [`Listener::local_addr`].
    pub fn initialize_server_with(
        port: u16,
        ip_version: IpVersion,
        options: SocketOptions,
    ) -> Result<Self, TransportError> {
        let socket = open_stream(ip_version)?;
        let id = ConnectionId::new();
        tracing::debug!(connection_id = %id, state = ?SocketState::Created, "Created server socket");

        match socket.set_reuse_address(true) {
            Ok(()) => tracing::debug!(connection_id = %id, "Set SO_REUSEADDR for the server socket"),
            Err(e) => tracing::error!(
                connection_id = %id,
                error = %e,
                "Could not set reusable address for the server socket"
            ),
        }

        let addr = ip_version.wildcard(port);
        if let Err(e) = socket.bind(&addr.into()) {
            tracing::error!(fatal = true, connection_id = %id, address = %addr, error = %e, "Bind failed");
            terminate_socket(socket, id);
            return Err(TransportError::Bind { addr, source: e });
        }

        if let Err(e) = socket.listen(libc::SOMAXCONN) {
            tracing::error!(fatal = true, connection_id = %id, error = %e, "Listening failed");
            terminate_socket(socket, id);
            return Err(TransportError::Listen(e));
        }

        let local_addr = socket
            .local_addr()
            .ok()
            .and_then(|a| a.as_socket())
            .unwrap_or(addr);

        tracing::info!(
            connection_id = %id,
            address = %local_addr,
            backlog = libc::SOMAXCONN,
            "Server now listening"
        );

        Ok(Self {
            socket,
            id,
            local_addr,
            options,
        })
    }

    /// Accept one pending client.
    ///
    /// Waits up to the configured accept timeout while no client is pending.
    /// The returned connection is non-blocking and inherits this listener's options.
    pub fn accept_client(&self) -> Result<TcpConnection, TransportError> {
        loop {
            match self.socket.accept() {
                Ok((socket, peer)) => {
                    return TcpConnection::from_accepted(socket, peer.as_socket(), self.options);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    let ready = poll::wait_ready(self.as_raw_fd(), Interest::Readable, self.options.accept_timeout)
                        .map_err(|e| {
                            tracing::error!(connection_id = %self.id, error = %e, "Failed to wait for clients");
                            TransportError::Accept(e)
                        })?;
                    if !ready {
                        tracing::warn!(connection_id = %self.id, "No client connected before the accept timeout");
                        return Err(TransportError::Timeout("accept a client"));
                    }
                }
                Err(e) => {
                    tracing::error!(connection_id = %self.id, error = %e, "Failed to accept client");
                    return Err(TransportError::Accept(e));
                }
            }
        }
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get the identifier used in this listener's log fields.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// A listener always plays the server role.
    pub fn role(&self) -> Role {
        Role::Server
    }

    /// A live listener is always listening; `terminate` consumes it.
    pub fn state(&self) -> SocketState {
        SocketState::Listening
    }

    /// Wait bounds applied by this listener.
    pub fn options(&self) -> SocketOptions {
        self.options
    }

    /// Shutdown and close the listening socket.
    pub fn terminate(self) {
        terminate_socket(self.socket, self.id);
    }
}

impl AsRawFd for Listener {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn quick_options() -> SocketOptions {
        SocketOptions {
            connect_timeout: Duration::from_secs(1),
            accept_timeout: Some(Duration::from_millis(50)),
            io_timeout: Some(Duration::from_secs(1)),
        }
    }

    #[test]
    fn binds_ephemeral_port() {
        let listener = Listener::initialize_server_with(0, IpVersion::V4, quick_options()).unwrap();
        assert_ne!(listener.local_addr().port(), 0);
        assert!(listener.local_addr().ip().is_unspecified());
        assert_eq!(listener.state(), SocketState::Listening);
        assert_eq!(listener.role(), Role::Server);
        listener.terminate();
    }

    #[test]
    fn accept_times_out_without_clients() {
        let listener = Listener::initialize_server_with(0, IpVersion::V4, quick_options()).unwrap();
        let err = listener.accept_client().unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)));
        listener.terminate();
    }

    #[test]
    fn second_bind_on_same_port_fails() {
        let first = Listener::initialize_server_with(0, IpVersion::V4, quick_options()).unwrap();
        let port = first.local_addr().port();

        let err = Listener::initialize_server_with(port, IpVersion::V4, quick_options()).unwrap_err();
        assert!(matches!(err, TransportError::Bind { .. }));

        first.terminate();
    }
}
