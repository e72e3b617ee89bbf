//! Plain TCP round-trips through `Listener` and `TcpConnection`.

mod common;

use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use socket2::SockRef;

use secure_transport::net::{IpVersion, Listener, Received, TcpConnection};
use secure_transport::TransportError;

use common::{payload, quick_options, receive_exactly, send_all};

fn echo_round_trip(len: usize) {
    let listener = Listener::initialize_server_with(0, IpVersion::V4, quick_options()).unwrap();
    let port = listener.local_addr().port();
    let sent = payload(len);

    let client = {
        let sent = sent.clone();
        thread::spawn(move || {
            let connection =
                TcpConnection::initialize_client_with(port, "127.0.0.1", IpVersion::V4, quick_options()).unwrap();
            send_all(&connection, &sent);
            let echoed = receive_exactly(&connection, sent.len());
            connection.terminate();
            echoed
        })
    };

    let server = listener.accept_client().unwrap();
    let received = receive_exactly(&server, len);
    assert_eq!(received, sent);
    send_all(&server, &received);

    let echoed = client.join().unwrap();
    assert_eq!(echoed, sent);

    server.terminate();
    listener.terminate();
}

#[test]
fn short_payload_round_trips() {
    echo_round_trip(10);
}

#[test]
fn payload_larger_than_scratch_buffer_round_trips() {
    echo_round_trip(20_000);
}

#[test]
fn orderly_shutdown_is_closed() {
    let listener = Listener::initialize_server_with(0, IpVersion::V4, quick_options()).unwrap();
    let port = listener.local_addr().port();

    let client = TcpConnection::initialize_client_with(port, "127.0.0.1", IpVersion::V4, quick_options()).unwrap();
    let server = listener.accept_client().unwrap();

    client.send_segment(b"last words").unwrap();
    client.terminate();

    // Data sent before the shutdown is delivered first.
    assert_eq!(server.receive_segment().unwrap(), Received::Data(b"last words".to_vec()));
    assert_eq!(server.receive_segment().unwrap(), Received::Closed);

    server.terminate();
    listener.terminate();
}

#[test]
fn peer_reset_is_an_error() {
    let listener = Listener::initialize_server_with(0, IpVersion::V4, quick_options()).unwrap();
    let port = listener.local_addr().port();

    let peer = TcpStream::connect(("127.0.0.1", port)).unwrap();
    let server = listener.accept_client().unwrap();

    // Zero linger turns the close into a RST.
    SockRef::from(&peer).set_linger(Some(Duration::ZERO)).unwrap();
    drop(peer);
    thread::sleep(Duration::from_millis(100));

    match server.receive_segment() {
        Err(TransportError::Receive(e)) => assert_eq!(e.kind(), std::io::ErrorKind::ConnectionReset),
        other => panic!("expected a receive error, got {other:?}"),
    }

    server.terminate();
    listener.terminate();
}

#[test]
fn half_close_keeps_the_other_direction_open() {
    let listener = Listener::initialize_server_with(0, IpVersion::V4, quick_options()).unwrap();
    let port = listener.local_addr().port();

    let client = TcpConnection::initialize_client_with(port, "127.0.0.1", IpVersion::V4, quick_options()).unwrap();
    let server = listener.accept_client().unwrap();

    client.send_segment(b"ping").unwrap();
    client.shutdown(std::net::Shutdown::Write);

    assert_eq!(receive_exactly(&server, 4), b"ping");
    assert_eq!(server.receive_segment().unwrap(), Received::Closed);

    server.send_segment(b"pong").unwrap();
    assert_eq!(receive_exactly(&client, 4), b"pong");

    client.terminate();
    server.terminate();
    listener.terminate();
}
