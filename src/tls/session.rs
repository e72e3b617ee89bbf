//! Server-side TLS session bound to a TCP connection.
//!
//! The session drives a `rustls::ServerConnection` by hand over the
//! connection's non-blocking socket: ciphertext is moved with
//! `read_tls`/`write_tls`, plaintext with `reader()`/`writer()`. Each step's
//! outcome is classified as a [`TlsStatus`]; want-read and want-write wait
//! for socket readiness (bounded by the connection's I/O timeout) and retry.

use std::fmt;
use std::io::{self, Read, Write};

use rustls::{ProtocolVersion, ServerConnection};

use crate::error::TlsError;
use crate::net::{Received, TcpConnection, SCRATCH_LEN};
use crate::tls::{TlsContext, TlsStatus};

/// A TLS session layered over a borrowed [`TcpConnection`].
///
/// The session cannot outlive its context or its connection, and destroying
/// it leaves the connection open.
pub struct TlsSession<'a> {
    conn: ServerConnection,
    socket: &'a TcpConnection,
    context: &'a TlsContext,
}

/// Which public operation a step failure belongs to.
#[derive(Debug, Clone, Copy)]
enum Operation {
    Handshake,
    Read,
    Write,
}

/// A step that stopped short, with its classification.
#[derive(Debug)]
struct StepFailure {
    status: TlsStatus,
    source: io::Error,
}

impl StepFailure {
    fn new(status: TlsStatus, source: io::Error) -> Self {
        Self { status, source }
    }

    fn from_io(source: io::Error, blocked: TlsStatus) -> Self {
        Self {
            status: TlsStatus::from_io(&source, blocked),
            source,
        }
    }

    /// A transient status that reaches this point means the wait ran out.
    fn into_error(self, operation: Operation) -> TlsError {
        let StepFailure { status, source } = self;
        match operation {
            _ if status.is_transient() => TlsError::Timeout(match operation {
                Operation::Handshake => "complete the handshake",
                Operation::Read => "read a record",
                Operation::Write => "write a record",
            }),
            Operation::Handshake => TlsError::Handshake { status, source },
            Operation::Read => TlsError::Read { status, source },
            Operation::Write => TlsError::Write { status, source },
        }
    }
}

impl<'a> TlsSession<'a> {
    /// Allocate a server session from `context` and link it to `socket`.
    pub fn create(context: &'a TlsContext, socket: &'a TcpConnection) -> Result<Self, TlsError> {
        let conn = ServerConnection::new(context.config()).map_err(|e| {
            tracing::error!(connection_id = %socket.id(), error = %e, "Could not create a new connection");
            TlsError::Session(e)
        })?;
        tracing::debug!(connection_id = %socket.id(), "Created new secure connection");
        tracing::info!(connection_id = %socket.id(), "Linked secure connection to the client socket");

        Ok(Self { conn, socket, context })
    }

    /// Run the server side of the handshake to completion.
    pub fn accept_client(&mut self) -> Result<(), TlsError> {
        match self.complete_handshake() {
            Ok(()) => {
                tracing::info!(
                    connection_id = %self.socket.id(),
                    version = ?self.conn.protocol_version(),
                    cipher_suite = ?self.conn.negotiated_cipher_suite().map(|s| s.suite()),
                    "Accepted secure connection"
                );
                Ok(())
            }
            Err(failure) => {
                tracing::debug!(connection_id = %self.socket.id(), status = %failure.status, "Handshake stopped");
                tracing::error!(
                    connection_id = %self.socket.id(),
                    error = %failure.source,
                    "Could not accept secure connection"
                );
                Err(failure.into_error(Operation::Handshake))
            }
        }
    }

    /// Read whatever plaintext the peer has sent.
    ///
    /// Keeps draining while the session holds decrypted bytes. Waits (bounded)
    /// only while nothing has been received yet. Data received before a
    /// close_notify is returned first; the close shows up on the next call.
    pub fn receive_record(&mut self) -> Result<Received, TlsError> {
        let mut scratch = [0u8; SCRATCH_LEN];
        let mut received = Vec::new();

        loop {
            let step = match self.read_plaintext(&mut scratch) {
                Ok(n) => {
                    received.extend_from_slice(&scratch[..n]);
                    self.buffered_plaintext()
                }
                Err(failure) => Err(failure),
            };
            match step {
                Ok(0) => break,
                Ok(_) => {}
                Err(failure) => match failure.status {
                    TlsStatus::ZeroReturn => {
                        tracing::info!(connection_id = %self.socket.id(), "Client stopped sending data");
                        if received.is_empty() {
                            return Ok(Received::Closed);
                        }
                        break;
                    }
                    status if status.is_transient() => {
                        tracing::debug!(connection_id = %self.socket.id(), %status, "Read would block");
                        if !received.is_empty() {
                            break;
                        }
                        self.await_ready(status)
                            .map_err(|f| f.into_error(Operation::Read))?;
                    }
                    status => {
                        tracing::error!(
                            fatal = true,
                            connection_id = %self.socket.id(),
                            %status,
                            error = %failure.source,
                            "Could not read from the secure connection"
                        );
                        return Err(failure.into_error(Operation::Read));
                    }
                },
            }
        }

        tracing::info!(connection_id = %self.socket.id(), bytes = received.len(), "Received record");
        Ok(Received::Data(received))
    }

    /// Encrypt `bytes` and push the resulting records to the peer.
    ///
    /// Only want-write is retried. The engine buffers a bounded amount of
    /// plaintext, so the returned count may be less than `bytes.len()`.
    pub fn send_record(&mut self, bytes: &[u8]) -> Result<usize, TlsError> {
        let accepted = self.conn.writer().write(bytes).map_err(|e| {
            let failure = StepFailure::from_io(e, TlsStatus::WantWrite);
            tracing::error!(connection_id = %self.socket.id(), status = %failure.status, error = %failure.source, "Could not send record");
            failure.into_error(Operation::Write)
        })?;

        if let Err(failure) = self.flush() {
            tracing::error!(
                connection_id = %self.socket.id(),
                status = %failure.status,
                error = %failure.source,
                "Could not send record"
            );
            return Err(failure.into_error(Operation::Write));
        }

        if is_short_write(bytes.len(), accepted) {
            tracing::warn!(
                connection_id = %self.socket.id(),
                expected = bytes.len(),
                sent = accepted,
                "Mismatch between buffer size and bytes sent"
            );
        }

        tracing::info!(connection_id = %self.socket.id(), bytes = accepted, "Sent record");
        Ok(accepted)
    }

    /// Decrypted bytes already held by the session.
    ///
    /// A session that has failed holds nothing readable; the failure itself
    /// surfaces from the next [`TlsSession::receive_record`].
    pub fn pending(&mut self) -> usize {
        match self.buffered_plaintext() {
            Ok(n) => n,
            Err(failure) => {
                tracing::debug!(
                    connection_id = %self.socket.id(),
                    status = %failure.status,
                    error = %failure.source,
                    "No pending data, session has failed"
                );
                0
            }
        }
    }

    /// Whether the handshake is still in progress.
    pub fn is_handshaking(&self) -> bool {
        self.conn.is_handshaking()
    }

    /// Negotiated protocol version, once the handshake has progressed far enough.
    pub fn protocol_version(&self) -> Option<ProtocolVersion> {
        self.conn.protocol_version()
    }

    /// The TCP connection this session runs over.
    pub fn connection(&self) -> &'a TcpConnection {
        self.socket
    }

    /// The context this session was created from.
    pub fn context(&self) -> &'a TlsContext {
        self.context
    }

    /// Send close_notify and release the session. The connection stays open.
    pub fn destroy(mut self) {
        self.conn.send_close_notify();
        if let Err(failure) = self.flush() {
            tracing::debug!(
                connection_id = %self.socket.id(),
                status = %failure.status,
                error = %failure.source,
                "Could not deliver close_notify"
            );
        }
        tracing::debug!(connection_id = %self.socket.id(), "Secure connection destroyed");
    }

    fn complete_handshake(&mut self) -> Result<(), StepFailure> {
        while self.conn.is_handshaking() {
            if self.conn.wants_write() {
                self.flush()?;
                continue;
            }
            match self.read_ciphertext() {
                Ok(_) => {}
                Err(failure) if failure.status.is_transient() => {
                    tracing::debug!(connection_id = %self.socket.id(), status = %failure.status, "Handshake waiting on the peer");
                    self.await_ready(failure.status)?;
                }
                Err(failure) => return Err(failure),
            }
        }
        // Post-handshake messages such as session tickets.
        self.flush()
    }

    /// One plaintext read, pulling ciphertext from the socket when none is buffered.
    ///
    /// Close_notify is reported as `ZeroReturn`.
    fn read_plaintext(&mut self, buf: &mut [u8]) -> Result<usize, StepFailure> {
        loop {
            match self.conn.reader().read(buf) {
                Ok(0) => {
                    return Err(StepFailure::new(
                        TlsStatus::ZeroReturn,
                        io::Error::new(io::ErrorKind::UnexpectedEof, "peer sent close_notify"),
                    ))
                }
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.read_ciphertext()?;
                    // Alerts and key updates may need an answer.
                    if self.conn.wants_write() {
                        self.flush()?;
                    }
                }
                Err(e) => return Err(StepFailure::from_io(e, TlsStatus::WantRead)),
            }
        }
    }

    fn buffered_plaintext(&mut self) -> Result<usize, StepFailure> {
        match self.conn.process_new_packets() {
            Ok(state) => Ok(state.plaintext_bytes_to_read()),
            Err(e) => Err(StepFailure::new(
                TlsStatus::Protocol,
                io::Error::new(io::ErrorKind::InvalidData, e),
            )),
        }
    }

    /// Move one batch of ciphertext in from the socket and process it.
    fn read_ciphertext(&mut self) -> Result<usize, StepFailure> {
        let mut transport = self.socket.socket();
        let n = match self.conn.read_tls(&mut transport) {
            Ok(0) => {
                return Err(StepFailure::new(
                    TlsStatus::Syscall,
                    io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed the transport without close_notify"),
                ))
            }
            Ok(n) => n,
            Err(e) => return Err(StepFailure::from_io(e, TlsStatus::WantRead)),
        };

        if let Err(e) = self.conn.process_new_packets() {
            // Best effort: tell the peer why before giving up.
            let _ = self.conn.write_tls(&mut transport);
            return Err(StepFailure::new(
                TlsStatus::Protocol,
                io::Error::new(io::ErrorKind::InvalidData, e),
            ));
        }

        tracing::trace!(connection_id = %self.socket.id(), bytes = n, "Read ciphertext");
        Ok(n)
    }

    /// Push all queued ciphertext to the socket, waiting on want-write.
    fn flush(&mut self) -> Result<(), StepFailure> {
        while self.conn.wants_write() {
            let mut transport = self.socket.socket();
            match self.conn.write_tls(&mut transport) {
                Ok(n) => {
                    tracing::trace!(connection_id = %self.socket.id(), bytes = n, "Wrote ciphertext");
                }
                Err(e) => {
                    let failure = StepFailure::from_io(e, TlsStatus::WantWrite);
                    if failure.status != TlsStatus::WantWrite {
                        return Err(failure);
                    }
                    tracing::debug!(connection_id = %self.socket.id(), "Write would block, retrying");
                    self.await_ready(failure.status)?;
                }
            }
        }
        Ok(())
    }

    fn await_ready(&self, status: TlsStatus) -> Result<(), StepFailure> {
        let interest = status.interest();
        match self.socket.wait_ready(interest) {
            Ok(true) => Ok(()),
            Ok(false) => {
                tracing::warn!(connection_id = %self.socket.id(), %status, "Peer did not become ready in time");
                Err(StepFailure::new(
                    status,
                    io::Error::new(io::ErrorKind::TimedOut, "readiness wait expired"),
                ))
            }
            Err(e) => Err(StepFailure::new(TlsStatus::Syscall, e)),
        }
    }
}

/// Fewer bytes taken than offered, but some. Nothing taken is not a short write.
fn is_short_write(requested: usize, accepted: usize) -> bool {
    accepted != 0 && accepted != requested
}

impl fmt::Debug for TlsSession<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsSession")
            .field("connection", &self.socket.id())
            .field("handshaking", &self.conn.is_handshaking())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_failure_becomes_timeout() {
        let failure = StepFailure::new(
            TlsStatus::WantRead,
            io::Error::new(io::ErrorKind::TimedOut, "readiness wait expired"),
        );
        assert!(matches!(failure.into_error(Operation::Read), TlsError::Timeout(_)));
    }

    #[test]
    fn only_partial_nonzero_writes_are_short() {
        assert!(is_short_write(40_000, 16_384));
        assert!(!is_short_write(40_000, 0));
        assert!(!is_short_write(5, 5));
        assert!(!is_short_write(0, 0));
    }

    #[test]
    fn fatal_failure_keeps_its_status() {
        let failure = StepFailure::new(TlsStatus::Protocol, io::Error::from(io::ErrorKind::InvalidData));
        let err = failure.into_error(Operation::Handshake);
        assert!(matches!(err, TlsError::Handshake { .. }));
        assert_eq!(err.status(), Some(TlsStatus::Protocol));
    }
}
