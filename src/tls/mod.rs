//! Secure record layer.
//!
//! # Data Flow
//! ```text
//! TlsLibrary::initialize → TlsContext::create(&library, cert, key)
//!     → TlsSession::create(&context, &connection)
//!     → accept_client (handshake)
//!     → receive_record / send_record
//!     → destroy (close_notify; the TCP connection stays open)
//! ```

pub mod context;
pub mod library;
pub mod session;
pub mod status;

pub use context::TlsContext;
pub use library::TlsLibrary;
pub use session::TlsSession;
pub use status::TlsStatus;
