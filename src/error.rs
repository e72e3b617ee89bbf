//! Error types for the transport and secure record layers.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

use crate::net::IpVersion;
use crate::tls::TlsStatus;

/// Errors raised by the plain TCP transport layer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The OS refused to create a socket.
    #[error("Could not create socket: {0}")]
    Socket(#[source] io::Error),

    /// Binding the server socket failed.
    #[error("Bind to {addr} failed: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Marking the socket as listening failed.
    #[error("Listening failed: {0}")]
    Listen(#[source] io::Error),

    /// Name resolution failed.
    #[error("Hostname {host} is unreachable: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    /// The hostname resolved, but not to an address of the requested family.
    #[error("Hostname {host} has no {version} address")]
    NoAddress { host: String, version: IpVersion },

    /// The connect attempt failed (immediately or after the writability wait).
    #[error("Connection to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Accepting a pending client failed.
    #[error("Failed to accept client: {0}")]
    Accept(#[source] io::Error),

    /// Reading from the socket failed.
    #[error("Failed to receive segment: {0}")]
    Receive(#[source] io::Error),

    /// Writing to the socket failed.
    #[error("Failed to send segment: {0}")]
    Send(#[source] io::Error),

    /// A bounded readiness wait expired.
    #[error("Timed out waiting to {0}")]
    Timeout(&'static str),
}

/// Errors raised by the TLS record layer.
#[derive(Debug, Error)]
pub enum TlsError {
    /// A `TlsLibrary` is already alive in this process.
    #[error("TLS library is already initialized")]
    AlreadyInitialized,

    /// The server configuration could not be built.
    #[error("Could not create TLS context: {0}")]
    Context(#[source] rustls::Error),

    /// The certificate file could not be read or parsed.
    #[error("Could not load certificate file '{path}': {source}")]
    Certificate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The certificate file holds no certificate.
    #[error("No certificate found in '{0}'")]
    NoCertificate(PathBuf),

    /// The private key file could not be read or parsed.
    #[error("Could not load private key file '{path}': {source}")]
    PrivateKey {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The private key file holds no supported key.
    #[error("No private key found in '{0}'")]
    NoPrivateKey(PathBuf),

    /// A session could not be allocated from the context.
    #[error("Could not create a connection: {0}")]
    Session(#[source] rustls::Error),

    /// The server-side handshake did not complete.
    #[error("Could not accept secure connection ({status}): {source}")]
    Handshake {
        status: TlsStatus,
        #[source]
        source: io::Error,
    },

    /// Reading a record failed.
    #[error("Could not read from the secure connection ({status}): {source}")]
    Read {
        status: TlsStatus,
        #[source]
        source: io::Error,
    },

    /// Writing a record failed.
    #[error("Could not send record ({status}): {source}")]
    Write {
        status: TlsStatus,
        #[source]
        source: io::Error,
    },

    /// A bounded readiness wait expired.
    #[error("Timed out waiting to {0}")]
    Timeout(&'static str),
}

impl TlsError {
    /// Classification of the failure, when it came from the record engine.
    pub fn status(&self) -> Option<TlsStatus> {
        match self {
            TlsError::Handshake { status, .. }
            | TlsError::Read { status, .. }
            | TlsError::Write { status, .. } => Some(*status),
            _ => None,
        }
    }
}
