//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files, and
//! every section falls back to its default so an empty file is a valid config.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::net::IpVersion;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TransportConfig {
    /// Server-side listener.
    pub listener: ListenerConfig,

    /// Client-side connect target.
    pub client: ClientConfig,

    /// Bounds on the blocking waits.
    pub timeouts: TimeoutConfig,

    /// Server credentials. Plain TCP when absent.
    pub tls: Option<TlsConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Port bound on the wildcard address (0 picks an ephemeral port).
    pub port: u16,

    /// Address family.
    pub ip_version: IpVersion,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            port: 9000,
            ip_version: IpVersion::V4,
        }
    }
}

/// Client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Hostname or literal address of the server.
    pub host: String,

    /// Server port.
    pub port: u16,

    /// Address family the hostname must resolve to.
    pub ip_version: IpVersion,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 9000,
            ip_version: IpVersion::V4,
        }
    }
}

/// Timeout configuration, in milliseconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Wait for a non-blocking connect to complete.
    pub connect_ms: u64,

    /// Wait for a pending client in accept. 0 waits indefinitely.
    pub accept_ms: u64,

    /// Each readiness wait during send/receive. 0 waits indefinitely.
    pub io_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 5_000,
            accept_ms: 0,
            io_ms: 30_000,
        }
    }
}

/// TLS credentials for the server role.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate chain file (PEM).
    pub cert_path: PathBuf,

    /// Path to private key file (PEM).
    pub key_path: PathBuf,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error), used when `RUST_LOG` is unset.
    pub log_level: String,

    /// Colourise log output.
    pub ansi: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            ansi: true,
        }
    }
}
