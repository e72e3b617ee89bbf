//! TLS context: shared server configuration and credential loading.

use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;

use crate::error::TlsError;
use crate::tls::TlsLibrary;

/// Server-role TLS configuration shared read-only by every session.
pub struct TlsContext {
    config: Arc<ServerConfig>,
}

impl TlsContext {
    /// Build a server context from a PEM certificate chain and private key.
    ///
    /// The configuration, the certificate and the key are set up in that
    /// order; the first failure aborts the whole operation.
    pub fn create(
        library: &TlsLibrary,
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> Result<Self, TlsError> {
        let cert_path = cert_path.as_ref();
        let key_path = key_path.as_ref();

        let builder = ServerConfig::builder_with_provider(Arc::clone(library.provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| {
                tracing::error!(fatal = true, error = %e, "Could not create context");
                TlsError::Context(e)
            })?;
        tracing::debug!("Created context with the best protocols available");

        let certs = load_certs(cert_path)?;
        tracing::debug!(path = %cert_path.display(), certificates = certs.len(), "Loaded server certificate");

        let key = load_private_key(key_path)?;
        tracing::debug!(path = %key_path.display(), "Loaded server private key");

        let config = builder
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| {
                tracing::error!(
                    fatal = true,
                    cert = %cert_path.display(),
                    key = %key_path.display(),
                    error = %e,
                    "Private key does not fit the certificate"
                );
                TlsError::Context(e)
            })?;

        Ok(Self {
            config: Arc::new(config),
        })
    }

    pub(crate) fn config(&self) -> Arc<ServerConfig> {
        Arc::clone(&self.config)
    }

    /// Release the configuration.
    pub fn destroy(self) {
        tracing::debug!("Context destroyed");
    }
}

impl fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsContext").finish_non_exhaustive()
    }
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let certificate_error = |e: std::io::Error| {
        tracing::error!(fatal = true, path = %path.display(), error = %e, "Could not load certificate file");
        TlsError::Certificate {
            path: path.to_path_buf(),
            source: e,
        }
    };

    let file = File::open(path).map_err(certificate_error)?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(certificate_error)?;

    if certs.is_empty() {
        tracing::error!(fatal = true, path = %path.display(), "No certificate found in file");
        return Err(TlsError::NoCertificate(path.to_path_buf()));
    }

    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let key_error = |e: std::io::Error| {
        tracing::error!(fatal = true, path = %path.display(), error = %e, "Could not load private key file");
        TlsError::PrivateKey {
            path: path.to_path_buf(),
            source: e,
        }
    };

    let file = File::open(path).map_err(key_error)?;
    match rustls_pemfile::private_key(&mut BufReader::new(file)).map_err(key_error)? {
        Some(key) => Ok(key),
        None => {
            tracing::error!(fatal = true, path = %path.display(), "No private key found in file");
            Err(TlsError::NoPrivateKey(path.to_path_buf()))
        }
    }
}
