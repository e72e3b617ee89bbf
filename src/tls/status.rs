//! Classification of TLS engine results.
//!
//! Every outcome of a record-layer step is translated into a [`TlsStatus`] so
//! callers can tell flow control apart from failure by matching on an enum.

use std::fmt;
use std::io;

use crate::net::poll::Interest;

/// Outcome of one step of the TLS engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TlsStatus {
    /// The step completed.
    Complete,
    /// More ciphertext must arrive from the peer before progress is possible.
    WantRead,
    /// Ciphertext is queued but the socket cannot take it yet.
    WantWrite,
    /// The peer sent close_notify.
    ZeroReturn,
    /// The transport failed or was closed without close_notify.
    Syscall,
    /// The peer violated the protocol or the handshake was rejected.
    Protocol,
}

impl TlsStatus {
    /// Flow-control signal: retry once the socket is ready.
    pub fn is_transient(self) -> bool {
        matches!(self, TlsStatus::WantRead | TlsStatus::WantWrite)
    }

    /// The session cannot be used any further.
    pub fn is_fatal(self) -> bool {
        matches!(self, TlsStatus::Syscall | TlsStatus::Protocol)
    }

    /// Stable, human-readable name.
    pub fn as_str(self) -> &'static str {
        match self {
            TlsStatus::Complete => "complete",
            TlsStatus::WantRead => "want-read",
            TlsStatus::WantWrite => "want-write",
            TlsStatus::ZeroReturn => "zero-return",
            TlsStatus::Syscall => "syscall",
            TlsStatus::Protocol => "protocol",
        }
    }

    /// Translate an I/O error raised while moving data through the session.
    ///
    /// `blocked` is the status to report when the socket would block, which
    /// depends on the direction of the step.
    pub(crate) fn from_io(err: &io::Error, blocked: TlsStatus) -> TlsStatus {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => blocked,
            io::ErrorKind::InvalidData if carries_rustls_error(err) => TlsStatus::Protocol,
            _ => TlsStatus::Syscall,
        }
    }

    /// Readiness to wait for before retrying a transient status.
    pub(crate) fn interest(self) -> Interest {
        match self {
            TlsStatus::WantWrite => Interest::Writable,
            _ => Interest::Readable,
        }
    }
}

impl fmt::Display for TlsStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn carries_rustls_error(err: &io::Error) -> bool {
    err.get_ref().is_some_and(|inner| inner.is::<rustls::Error>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn would_block_follows_direction() {
        let err = io::Error::from(io::ErrorKind::WouldBlock);
        assert_eq!(TlsStatus::from_io(&err, TlsStatus::WantRead), TlsStatus::WantRead);
        assert_eq!(TlsStatus::from_io(&err, TlsStatus::WantWrite), TlsStatus::WantWrite);
    }

    #[test]
    fn transport_failures_are_syscall() {
        for kind in [
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::BrokenPipe,
            io::ErrorKind::UnexpectedEof,
        ] {
            let err = io::Error::from(kind);
            assert_eq!(TlsStatus::from_io(&err, TlsStatus::WantRead), TlsStatus::Syscall);
        }
    }

    #[test]
    fn engine_errors_are_protocol() {
        let err = io::Error::new(io::ErrorKind::InvalidData, rustls::Error::DecryptError);
        assert_eq!(TlsStatus::from_io(&err, TlsStatus::WantRead), TlsStatus::Protocol);

        let plain = io::Error::new(io::ErrorKind::InvalidData, "garbage");
        assert_eq!(TlsStatus::from_io(&plain, TlsStatus::WantRead), TlsStatus::Syscall);
    }

    #[test]
    fn only_want_states_are_transient() {
        assert!(TlsStatus::WantRead.is_transient());
        assert!(TlsStatus::WantWrite.is_transient());
        assert!(!TlsStatus::ZeroReturn.is_transient());
        assert!(!TlsStatus::ZeroReturn.is_fatal());
        assert!(TlsStatus::Protocol.is_fatal());
        assert_eq!(TlsStatus::WantWrite.to_string(), "want-write");
    }
}
