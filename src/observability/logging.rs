//! Structured logging.
//!
//! # Responsibilities
//! - Initialize logging subsystem
//! - Route every log event to a `DiagnosticSink`
//! - Configure log level at runtime
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - One message is one `write_all` under the sink's lock, so concurrent
//!   writers never interleave
//! - Log level configurable via config and environment (`RUST_LOG` wins)

use std::fmt::{self, Write as _};
use std::io::{self, Write};
use std::panic::Location;
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tracing::{Level, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::ObservabilityConfig;

/// Message severity, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// An operation failed and its handle is unusable. Logged as ERROR with `fatal=true`.
    Fatal,
    Error,
    Warning,
    Info,
    Debug,
}

impl Severity {
    /// Matching `tracing` level.
    pub fn level(self) -> Level {
        match self {
            Severity::Fatal | Severity::Error => Level::ERROR,
            Severity::Warning => Level::WARN,
            Severity::Info => Level::INFO,
            Severity::Debug => Level::DEBUG,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Severity::Fatal => "FATAL",
            Severity::Error => "ERROR",
            Severity::Warning => "WARN",
            Severity::Info => "INFO",
            Severity::Debug => "DEBUG",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Errors raised while installing the global subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("Logging is already initialized")]
    AlreadyInitialized,
}

/// Shared, serialised destination for diagnostic output.
///
/// Cloning is cheap; every clone writes to the same destination.
#[derive(Clone)]
pub struct DiagnosticSink {
    out: Arc<Mutex<Box<dyn Write + Send>>>,
    max_level: Level,
}

impl DiagnosticSink {
    pub fn new<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            out: Arc::new(Mutex::new(Box::new(writer))),
            max_level: Level::TRACE,
        }
    }

    /// Drop direct messages more verbose than `level`.
    ///
    /// Only [`DiagnosticSink::emit`] is filtered here; events routed through
    /// a subscriber are filtered by its `EnvFilter`.
    pub fn with_max_level(mut self, level: Level) -> Self {
        self.max_level = level;
        self
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }

    /// Write one complete message tagged with its severity and origin.
    ///
    /// The message is fully formatted before the lock is taken and is on the
    /// destination when this returns.
    pub fn emit(&self, severity: Severity, location: &Location<'_>, args: fmt::Arguments<'_>) -> io::Result<()> {
        if severity.level() > self.max_level {
            return Ok(());
        }
        let mut line = String::new();
        // Writing into a String cannot fail.
        let _ = writeln!(line, "{} {}:{}: {}", severity, location.file(), location.line(), args);
        self.write_message(line.as_bytes())
    }

    /// [`DiagnosticSink::emit`] with the caller's location.
    #[track_caller]
    pub fn log(&self, severity: Severity, args: fmt::Arguments<'_>) -> io::Result<()> {
        self.emit(severity, Location::caller(), args)
    }

    fn write_message(&self, bytes: &[u8]) -> io::Result<()> {
        // A writer that panicked mid-message leaves the destination usable.
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        out.write_all(bytes)?;
        out.flush()
    }
}

impl fmt::Debug for DiagnosticSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagnosticSink")
            .field("max_level", &self.max_level)
            .finish_non_exhaustive()
    }
}

impl<'a> MakeWriter<'a> for DiagnosticSink {
    type Writer = EventWriter;

    fn make_writer(&'a self) -> Self::Writer {
        EventWriter {
            sink: self.clone(),
            buf: Vec::with_capacity(256),
        }
    }
}

/// Collects one formatted event and hands it to the sink when dropped.
pub struct EventWriter {
    sink: DiagnosticSink,
    buf: Vec<u8>,
}

impl Write for EventWriter {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for EventWriter {
    fn drop(&mut self) {
        if !self.buf.is_empty() {
            let _ = self.sink.write_message(&self.buf);
        }
    }
}

/// Build a subscriber that filters per `config` (or `RUST_LOG`) and writes to `sink`.
pub fn subscriber(
    config: &ObservabilityConfig,
    sink: DiagnosticSink,
) -> Result<impl Subscriber + Send + Sync + 'static, LoggingError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level)?,
    };

    Ok(tracing_subscriber::registry().with(filter).with(
        tracing_subscriber::fmt::layer()
            .with_writer(sink)
            .with_ansi(config.ansi),
    ))
}

/// Install the process-wide subscriber. A second call fails.
pub fn init_logging(config: &ObservabilityConfig, sink: DiagnosticSink) -> Result<(), LoggingError> {
    subscriber(config, sink)?
        .try_init()
        .map_err(|_| LoggingError::AlreadyInitialized)
}
