//! Socket primitives shared by listeners and connections.
//!
//! # Responsibilities
//! - Map `IpVersion` onto address families and wildcard addresses
//! - Create non-blocking stream sockets
//! - Best-effort shutdown and close, logging instead of failing

use std::fmt;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr};
use std::os::fd::IntoRawFd;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, Socket, Type};

use crate::error::TransportError;
use crate::net::ConnectionId;

/// IP protocol version used to pick the address family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpVersion {
    #[default]
    V4,
    V6,
}

impl IpVersion {
    /// Socket domain for this version.
    pub fn domain(self) -> Domain {
        match self {
            IpVersion::V4 => Domain::IPV4,
            IpVersion::V6 => Domain::IPV6,
        }
    }

    /// Wildcard ("any") address on `port`.
    pub fn wildcard(self, port: u16) -> SocketAddr {
        match self {
            IpVersion::V4 => SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            IpVersion::V6 => SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)),
        }
    }

    /// Whether `addr` belongs to this version's family.
    pub fn matches(self, addr: &SocketAddr) -> bool {
        match self {
            IpVersion::V4 => addr.is_ipv4(),
            IpVersion::V6 => addr.is_ipv6(),
        }
    }
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpVersion::V4 => write!(f, "IPv4"),
            IpVersion::V6 => write!(f, "IPv6"),
        }
    }
}

/// Error returned when parsing an `IpVersion`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown IP version '{0}' (expected 4 or 6)")]
pub struct ParseIpVersionError(String);

impl FromStr for IpVersion {
    type Err = ParseIpVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "4" | "v4" | "ipv4" => Ok(IpVersion::V4),
            "6" | "v6" | "ipv6" => Ok(IpVersion::V6),
            _ => Err(ParseIpVersionError(s.to_string())),
        }
    }
}

impl TryFrom<u8> for IpVersion {
    type Error = ParseIpVersionError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            4 => Ok(IpVersion::V4),
            6 => Ok(IpVersion::V6),
            other => Err(ParseIpVersionError(other.to_string())),
        }
    }
}

/// Which side of the connection a socket plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Server => write!(f, "server"),
            Role::Client => write!(f, "client"),
        }
    }
}

/// Lifecycle state of a socket handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    /// Socket exists but is neither listening nor connected.
    Created,
    /// Bound and accepting connections.
    Listening,
    /// Non-blocking connect issued, completion not yet confirmed.
    Connecting,
    /// Stream established.
    Connected,
    /// Both directions shut down.
    Shutdown,
    /// Descriptor released.
    Closed,
}

/// Create a non-blocking TCP stream socket for `version`.
pub(crate) fn open_stream(version: IpVersion) -> Result<Socket, TransportError> {
    let socket = Socket::new(version.domain(), Type::STREAM, Some(Protocol::TCP)).map_err(|e| {
        tracing::error!(fatal = true, error = %e, "Impossible to create socket");
        TransportError::Socket(e)
    })?;

    socket.set_nonblocking(true).map_err(|e| {
        tracing::error!(fatal = true, error = %e, "Could not make socket non-blocking");
        TransportError::Socket(e)
    })?;

    tracing::debug!(version = %version, "Created non-blocking stream socket");
    Ok(socket)
}

/// Best-effort `shutdown(2)`. Failures are logged, never returned.
pub(crate) fn shutdown_socket(socket: &Socket, how: Shutdown, id: ConnectionId) {
    match socket.shutdown(how) {
        Ok(()) => tracing::trace!(connection_id = %id, how = ?how, "Socket shut down"),
        // Listeners and never-connected sockets have nothing to shut down.
        Err(e) if e.kind() == io::ErrorKind::NotConnected => {
            tracing::debug!(connection_id = %id, "Socket not connected, skipping shutdown");
        }
        Err(e) => tracing::error!(connection_id = %id, error = %e, "Could not shutdown socket"),
    }
}

/// Shutdown both directions, then close the descriptor.
///
/// Each step is best-effort: the descriptor is released whatever happens.
pub(crate) fn terminate_socket(socket: Socket, id: ConnectionId) {
    shutdown_socket(&socket, Shutdown::Both, id);

    let fd = socket.into_raw_fd();
    // SAFETY: `into_raw_fd` released ownership of `fd`; it is closed exactly once, here.
    if unsafe { libc::close(fd) } == -1 {
        let err = io::Error::last_os_error();
        tracing::error!(connection_id = %id, fd, error = %err, "Could not close socket");
    }

    tracing::debug!(connection_id = %id, fd, state = ?SocketState::Closed, "Socket terminated");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ip_versions() {
        assert_eq!("4".parse::<IpVersion>().unwrap(), IpVersion::V4);
        assert_eq!("V6".parse::<IpVersion>().unwrap(), IpVersion::V6);
        assert_eq!("ipv6".parse::<IpVersion>().unwrap(), IpVersion::V6);
        assert!("5".parse::<IpVersion>().is_err());
        assert_eq!(IpVersion::try_from(6u8).unwrap(), IpVersion::V6);
        assert!(IpVersion::try_from(0u8).is_err());
    }

    #[test]
    fn wildcard_matches_family() {
        let v4 = IpVersion::V4.wildcard(9000);
        let v6 = IpVersion::V6.wildcard(9000);
        assert!(IpVersion::V4.matches(&v4));
        assert!(IpVersion::V6.matches(&v6));
        assert!(!IpVersion::V4.matches(&v6));
        assert!(v4.ip().is_unspecified());
        assert_eq!(v6.port(), 9000);
    }

    #[test]
    fn opened_socket_is_non_blocking() {
        use std::os::fd::AsRawFd;

        let socket = open_stream(IpVersion::V4).unwrap();
        let flags = unsafe { libc::fcntl(socket.as_raw_fd(), libc::F_GETFL) };
        assert_ne!(flags & libc::O_NONBLOCK, 0);
        terminate_socket(socket, ConnectionId::new());
    }
}
