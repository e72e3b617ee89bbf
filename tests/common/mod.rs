//! Shared utilities for integration testing.
#![allow(dead_code)]

use std::fs;
use std::io::{self, BufReader, Write};
use std::net::TcpStream;
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned};
use tempfile::TempDir;

use secure_transport::net::{Received, SocketOptions, TcpConnection};
use secure_transport::TlsLibrary;

/// Short waits so a broken test fails instead of hanging.
pub fn quick_options() -> SocketOptions {
    SocketOptions {
        connect_timeout: Duration::from_secs(2),
        accept_timeout: Some(Duration::from_secs(5)),
        io_timeout: Some(Duration::from_secs(5)),
    }
}

/// Deterministic, non-repeating-looking payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// Send all of `bytes`, tolerating short writes.
pub fn send_all(connection: &TcpConnection, bytes: &[u8]) {
    let mut offset = 0;
    while offset < bytes.len() {
        offset += connection.send_segment(&bytes[offset..]).unwrap();
    }
}

/// Receive until exactly `len` bytes arrived.
pub fn receive_exactly(connection: &TcpConnection, len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        match connection.receive_segment().unwrap() {
            Received::Data(bytes) => out.extend_from_slice(&bytes),
            Received::Closed => panic!("peer closed after {} of {} bytes", out.len(), len),
        }
    }
    out
}

/// Self-signed certificate and key for `localhost`, written as PEM files.
pub struct Credentials {
    _dir: TempDir,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl Credentials {
    pub fn generate() -> Self {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("server.crt");
        let key_path = dir.path().join("server.key");
        fs::write(&cert_path, certified.cert.pem()).unwrap();
        fs::write(&key_path, certified.key_pair.serialize_pem()).unwrap();
        Self {
            _dir: dir,
            cert_path,
            key_path,
        }
    }

    /// Client configuration trusting only this certificate.
    pub fn client_config(&self) -> Arc<ClientConfig> {
        let mut roots = RootCertStore::empty();
        let pem = fs::read(&self.cert_path).unwrap();
        for cert in rustls_pemfile::certs(&mut BufReader::new(pem.as_slice())) {
            roots.add(cert.unwrap()).unwrap();
        }

        let config = ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_root_certificates(roots)
            .with_no_client_auth();
        Arc::new(config)
    }

    /// Blocking TLS client connected to `127.0.0.1:port`.
    pub fn connect(&self, port: u16) -> StreamOwned<ClientConnection, TcpStream> {
        let server_name = ServerName::try_from("localhost").unwrap();
        let conn = ClientConnection::new(self.client_config(), server_name).unwrap();
        let sock = TcpStream::connect(("127.0.0.1", port)).unwrap();
        sock.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        StreamOwned::new(conn, sock)
    }
}

static LIBRARY_LOCK: Mutex<()> = Mutex::new(());

/// Serialises the tests of one binary that need the process-wide TLS library.
pub fn library_lock() -> MutexGuard<'static, ()> {
    LIBRARY_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A `TlsLibrary` held exclusively by one test at a time.
pub struct ExclusiveLibrary {
    library: TlsLibrary,
    _lock: MutexGuard<'static, ()>,
}

impl ExclusiveLibrary {
    pub fn acquire() -> Self {
        let lock = library_lock();
        Self {
            library: TlsLibrary::initialize().unwrap(),
            _lock: lock,
        }
    }
}

impl Deref for ExclusiveLibrary {
    type Target = TlsLibrary;

    fn deref(&self) -> &TlsLibrary {
        &self.library
    }
}

/// In-memory log destination.
#[derive(Clone, Default)]
pub struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for Capture {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
