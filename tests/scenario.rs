//! End-to-end ping/pong on port 9000 over IPv4.

mod common;

use secure_transport::config::ObservabilityConfig;
use secure_transport::net::{IpVersion, Listener, Received, TcpConnection};
use secure_transport::observability::logging::subscriber;
use secure_transport::DiagnosticSink;

use common::{quick_options, receive_exactly, Capture};

const PORT: u16 = 9000;

#[test]
fn ping_pong_logs_no_fatal_errors() {
    let capture = Capture::default();
    let config = ObservabilityConfig {
        log_level: "debug".to_string(),
        ansi: false,
    };
    let subscriber = subscriber(&config, DiagnosticSink::new(capture.clone())).unwrap();

    // Single thread: the connect completes against the listen backlog
    // before the server accepts.
    tracing::subscriber::with_default(subscriber, || {
        let listener = Listener::initialize_server_with(PORT, IpVersion::V4, quick_options()).unwrap();
        let client = TcpConnection::initialize_client_with(PORT, "localhost", IpVersion::V4, quick_options()).unwrap();
        let server = listener.accept_client().unwrap();

        assert_eq!(client.send_segment(b"ping").unwrap(), 4);
        assert_eq!(receive_exactly(&server, 4), b"ping");

        assert_eq!(server.send_segment(b"pong").unwrap(), 4);
        assert_eq!(receive_exactly(&client, 4), b"pong");

        client.terminate();
        assert_eq!(server.receive_segment().unwrap(), Received::Closed);

        server.terminate();
        listener.terminate();
    });

    let logs = capture.contents();
    assert!(logs.contains("Server now listening"), "missing listener log:\n{logs}");
    assert!(logs.contains("Accepted client"), "missing accept log:\n{logs}");
    assert!(!logs.contains("fatal=true"), "fatal log during scenario:\n{logs}");
}
