//! Process-wide TLS engine state.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rustls::crypto::CryptoProvider;

use crate::error::TlsError;

/// Set while a `TlsLibrary` value is alive.
static LIBRARY_ACTIVE: AtomicBool = AtomicBool::new(false);

/// The TLS engine's algorithm registry.
///
/// At most one exists per process. It is created at startup with
/// [`TlsLibrary::initialize`], passed by reference to
/// [`TlsContext::create`](crate::tls::TlsContext::create), and torn down with
/// [`TlsLibrary::terminate`] (or on drop).
pub struct TlsLibrary {
    provider: Arc<CryptoProvider>,
}

impl TlsLibrary {
    /// Set up the engine. Fails if another `TlsLibrary` is alive.
    pub fn initialize() -> Result<Self, TlsError> {
        if LIBRARY_ACTIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::error!("TLS library is already initialized");
            return Err(TlsError::AlreadyInitialized);
        }

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        tracing::debug!(
            cipher_suites = provider.cipher_suites.len(),
            kx_groups = provider.kx_groups.len(),
            "Loaded the cipher and key exchange algorithms"
        );

        Ok(Self { provider })
    }

    /// Algorithms used by every context built from this library.
    pub fn provider(&self) -> &Arc<CryptoProvider> {
        &self.provider
    }

    /// Tear the engine down.
    pub fn terminate(self) {
        tracing::debug!("Terminating TLS library");
    }

    /// Whether a library is currently alive in this process.
    pub fn is_initialized() -> bool {
        LIBRARY_ACTIVE.load(Ordering::Acquire)
    }
}

impl Drop for TlsLibrary {
    fn drop(&mut self) {
        LIBRARY_ACTIVE.store(false, Ordering::Release);
        tracing::debug!("TLS library released");
    }
}

impl fmt::Debug for TlsLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsLibrary")
            .field("cipher_suites", &self.provider.cipher_suites.len())
            .finish()
    }
}
