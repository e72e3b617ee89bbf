//! secure-transport
//!
//! Echo server and client built on the transport and TLS record layers.
//!
//! ```text
//! secure-transport [--config transport.toml] serve [--port 9000] [--ip v4] [--cert c.pem --key k.pem]
//! secure-transport [--config transport.toml] send --host localhost --port 9000 "ping"
//! ```

use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use secure_transport::config::{load_config, TlsConfig, TransportConfig};
use secure_transport::{
    init_logging, DiagnosticSink, IpVersion, Listener, Received, SocketOptions, TcpConnection, TlsContext,
    TlsError, TlsLibrary, TlsSession, TransportError,
};

#[derive(Parser)]
#[command(name = "secure-transport", version)]
#[command(about = "Echo server and client over plain TCP or TLS", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Echo every segment back, one client at a time
    Serve {
        #[arg(short, long)]
        port: Option<u16>,

        /// v4 or v6
        #[arg(long)]
        ip: Option<IpVersion>,

        /// PEM certificate chain; serves TLS when given with --key
        #[arg(long, requires = "key")]
        cert: Option<PathBuf>,

        /// PEM private key
        #[arg(long, requires = "cert")]
        key: Option<PathBuf>,

        /// Exit after this many clients
        #[arg(long)]
        clients: Option<usize>,
    },
    /// Send one message over plain TCP and print the reply
    Send {
        #[arg(long)]
        host: Option<String>,

        #[arg(short, long)]
        port: Option<u16>,

        /// v4 or v6
        #[arg(long)]
        ip: Option<IpVersion>,

        message: String,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => TransportConfig::default(),
    };

    // stdout carries the replies printed by `send`.
    init_logging(&config.observability, DiagnosticSink::stderr())?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "secure-transport starting");

    let options = SocketOptions::from(&config.timeouts);

    match cli.command {
        Commands::Serve {
            port,
            ip,
            cert,
            key,
            clients,
        } => {
            if let Some(port) = port {
                config.listener.port = port;
            }
            if let Some(ip) = ip {
                config.listener.ip_version = ip;
            }
            if let (Some(cert_path), Some(key_path)) = (cert, key) {
                config.tls = Some(TlsConfig { cert_path, key_path });
            }
            serve(&config, options, clients)?;
        }
        Commands::Send {
            host,
            port,
            ip,
            message,
        } => {
            if let Some(host) = host {
                config.client.host = host;
            }
            if let Some(port) = port {
                config.client.port = port;
            }
            if let Some(ip) = ip {
                config.client.ip_version = ip;
            }
            send(&config, options, &message)?;
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

fn serve(config: &TransportConfig, options: SocketOptions, limit: Option<usize>) -> Result<(), Box<dyn Error>> {
    let listener = Listener::initialize_server_with(config.listener.port, config.listener.ip_version, options)?;

    let result = match &config.tls {
        Some(tls) => serve_tls(&listener, tls, limit),
        None => serve_plain(&listener, limit),
    };

    listener.terminate();
    result
}

fn serve_plain(listener: &Listener, limit: Option<usize>) -> Result<(), Box<dyn Error>> {
    let mut served = 0;
    while limit.map_or(true, |max| served < max) {
        let Some(connection) = next_client(listener)? else {
            continue;
        };

        if let Err(e) = echo_segments(&connection) {
            tracing::warn!(connection_id = %connection.id(), error = %e, "Client session ended with an error");
        }
        connection.terminate();
        served += 1;
    }
    Ok(())
}

fn serve_tls(listener: &Listener, tls: &TlsConfig, limit: Option<usize>) -> Result<(), Box<dyn Error>> {
    let library = TlsLibrary::initialize()?;
    let context = TlsContext::create(&library, &tls.cert_path, &tls.key_path)?;

    let mut served = 0;
    while limit.map_or(true, |max| served < max) {
        let Some(connection) = next_client(listener)? else {
            continue;
        };

        if let Err(e) = echo_secure(&context, &connection) {
            tracing::warn!(connection_id = %connection.id(), error = %e, "Secure session ended with an error");
        }
        connection.terminate();
        served += 1;
    }

    context.destroy();
    library.terminate();
    Ok(())
}

/// Accept the next client. `None` when the accept wait timed out.
fn next_client(listener: &Listener) -> Result<Option<TcpConnection>, TransportError> {
    match listener.accept_client() {
        Ok(connection) => Ok(Some(connection)),
        Err(TransportError::Timeout(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

fn echo_segments(connection: &TcpConnection) -> Result<(), TransportError> {
    loop {
        match connection.receive_segment()? {
            Received::Closed => return Ok(()),
            Received::Data(bytes) => {
                connection.send_segment(&bytes)?;
            }
        }
    }
}

fn echo_secure(context: &TlsContext, connection: &TcpConnection) -> Result<(), TlsError> {
    let mut session = TlsSession::create(context, connection)?;
    let result = echo_records(&mut session);
    session.destroy();
    result
}

fn echo_records(session: &mut TlsSession<'_>) -> Result<(), TlsError> {
    session.accept_client()?;
    loop {
        match session.receive_record()? {
            Received::Closed => return Ok(()),
            Received::Data(bytes) => {
                session.send_record(&bytes)?;
            }
        }
    }
}

fn send(config: &TransportConfig, options: SocketOptions, message: &str) -> Result<(), Box<dyn Error>> {
    let connection =
        TcpConnection::initialize_client_with(config.client.port, &config.client.host, config.client.ip_version, options)?;

    let result = exchange(&connection, message.as_bytes());
    connection.terminate();

    let reply = result?;
    println!("{}", String::from_utf8_lossy(&reply));
    Ok(())
}

/// Send `message` and collect the reply until as many bytes came back or the server closed.
fn exchange(connection: &TcpConnection, message: &[u8]) -> Result<Vec<u8>, TransportError> {
    let sent = connection.send_segment(message)?;

    let mut reply = Vec::with_capacity(sent);
    while reply.len() < sent {
        match connection.receive_segment()? {
            Received::Data(bytes) => reply.extend_from_slice(&bytes),
            Received::Closed => break,
        }
    }
    Ok(reply)
}
