//! Synchronous TCP transport with a server-side TLS record layer.
//!
//! # Architecture Overview
//!
//! ```text
//!   ┌──────────────────────────────────────────────────────────┐
//!   │                    caller (echo demo, tests)              │
//!   └───────────────┬──────────────────────────┬───────────────┘
//!                   │ plain bytes              │ plaintext records
//!                   ▼                          ▼
//!   ┌───────────────────────────┐   ┌───────────────────────────┐
//!   │ net                       │◀──│ tls                       │
//!   │ Listener / TcpConnection  │   │ TlsLibrary → TlsContext   │
//!   │ non-blocking + poll waits │   │ → TlsSession<'conn>       │
//!   └───────────────────────────┘   └───────────────────────────┘
//!                   │                          │
//!                   └──────────┬───────────────┘
//!                              ▼
//!              observability (tracing → DiagnosticSink)
//! ```

pub mod config;
pub mod error;
pub mod net;
pub mod observability;
pub mod tls;

pub use config::TransportConfig;
pub use error::{TlsError, TransportError};
pub use net::{IpVersion, Listener, Received, SocketOptions, TcpConnection};
pub use observability::{init_logging, DiagnosticSink, Severity};
pub use tls::{TlsContext, TlsLibrary, TlsSession, TlsStatus};
