//! Transport layer.
//!
//! # Data Flow
//! ```text
//! Server:  Listener::initialize_server → accept_client → TcpConnection
//! Client:  TcpConnection::initialize_client (connect, bounded writability wait, SO_ERROR check)
//!
//! TcpConnection:
//!     send_segment / receive_segment (dynamic buffering)
//!     → optionally wrapped by tls::TlsSession
//!     → terminate (shutdown + close)
//!
//! Socket States:
//!     Created → Listening (server) | Connecting → Connected (client) → Shutdown → Closed
//! ```
//!
//! # Design Decisions
//! - Every socket is non-blocking; waits are bounded `poll(2)` calls made inline
//! - `terminate` consumes the handle, so nothing can touch a closed socket
//! - Receive returns an owned buffer; orderly shutdown is `Received::Closed`, not an error

pub mod connection;
pub mod listener;
pub(crate) mod poll;
pub mod socket;

use std::time::Duration;

pub use connection::{ConnectionId, TcpConnection};
pub use listener::Listener;
pub use socket::{IpVersion, Role, SocketState};

use crate::config::TimeoutConfig;

/// Size of the scratch buffer used by each individual read.
pub const SCRATCH_LEN: usize = 8192;

/// Outcome of a receive operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// Bytes collected by this call, exactly as many as were read.
    Data(Vec<u8>),
    /// The peer shut the stream down and nothing was pending.
    Closed,
}

impl Received {
    /// True when the peer performed an orderly shutdown.
    pub fn is_closed(&self) -> bool {
        matches!(self, Received::Closed)
    }

    /// Number of bytes received (0 for `Closed`).
    pub fn len(&self) -> usize {
        match self {
            Received::Data(bytes) => bytes.len(),
            Received::Closed => 0,
        }
    }

    /// True when no bytes were received.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take the received bytes, if any.
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            Received::Data(bytes) => Some(bytes),
            Received::Closed => None,
        }
    }
}

/// Bounds applied to the blocking waits of a socket.
///
/// `None` means "wait indefinitely".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketOptions {
    /// Upper bound on the writability wait after a non-blocking connect.
    pub connect_timeout: Duration,
    /// Upper bound on waiting for a pending client in `accept_client`.
    pub accept_timeout: Option<Duration>,
    /// Upper bound on each readiness wait during send/receive and TLS I/O.
    pub io_timeout: Option<Duration>,
}

impl Default for SocketOptions {
    fn default() -> Self {
        SocketOptions::from(&TimeoutConfig::default())
    }
}

impl From<&TimeoutConfig> for SocketOptions {
    fn from(config: &TimeoutConfig) -> Self {
        let bounded = |ms: u64| (ms > 0).then(|| Duration::from_millis(ms));
        Self {
            connect_timeout: Duration::from_millis(config.connect_ms.max(1)),
            accept_timeout: bounded(config.accept_ms),
            io_timeout: bounded(config.io_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_timeouts_mean_unbounded() {
        let config = TimeoutConfig {
            connect_ms: 250,
            accept_ms: 0,
            io_ms: 0,
        };
        let options = SocketOptions::from(&config);
        assert_eq!(options.connect_timeout, Duration::from_millis(250));
        assert_eq!(options.accept_timeout, None);
        assert_eq!(options.io_timeout, None);
    }

    #[test]
    fn received_reports_length() {
        assert_eq!(Received::Data(b"ping".to_vec()).len(), 4);
        assert!(Received::Closed.is_closed());
        assert!(Received::Closed.is_empty());
        assert_eq!(Received::Closed.into_bytes(), None);
    }
}
