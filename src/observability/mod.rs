//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! net / tls / main produce:
//!     → tracing events with structured fields (connection_id, bytes, status, fatal)
//!     → logging.rs subscriber (EnvFilter + fmt layer)
//!     → DiagnosticSink (one serialised write per event)
//! ```
//!
//! # Design Decisions
//! - Fatal conditions are ERROR events carrying `fatal = true`
//! - The sink is the only process-wide mutable state

pub mod logging;

pub use logging::{init_logging, DiagnosticSink, LoggingError, Severity};
