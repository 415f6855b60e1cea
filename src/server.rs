use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::{ServerConfig, TimeoutConfig};
use crate::gordafarid::{Conn, Listener, ServerHandshakeConfig};
use crate::nonce_cache::{spawn_sweeper, NonceCache, DEFAULT_SWEEP_INTERVAL};
use crate::relay::relay;

/// Runs the remote server: terminates Gordafarid tunnels, dials each
/// requested destination over plain TCP, and relays bytes until close.
pub async fn run_server(config: ServerConfig) -> std::io::Result<()> {
    let cipher = config.cipher()?;
    let init_password = config.init_password()?;

    // Traffic and greeting nonces live in separate caches so the two layers
    // can never collide.
    let stream_nonces = Arc::new(NonceCache::with_default_retention());
    let greeting_nonces = Arc::new(NonceCache::with_default_retention());
    let _stream_sweeper = spawn_sweeper(stream_nonces.clone(), DEFAULT_SWEEP_INTERVAL);
    let _greeting_sweeper = spawn_sweeper(greeting_nonces.clone(), DEFAULT_SWEEP_INTERVAL);

    let handshake_config = Arc::new(ServerHandshakeConfig::new(
        &config.to_credentials(),
        cipher,
        init_password,
        stream_nonces,
        greeting_nonces,
    ));

    let listener = Listener::bind(&config.server.address, handshake_config).await?;
    info!(
        "listening for gordafarid connections on {}",
        config.server.address
    );

    loop {
        let (conn, peer_addr) = match listener.accept().await {
            Ok(v) => v,
            Err(e) => {
                warn!("accept failed: {}", e);
                continue;
            }
        };
        debug!("accepted connection from {}", peer_addr);

        let timeouts = config.timeout;
        tokio::spawn(async move {
            if let Err(e) = handle_connection(conn, timeouts).await {
                error!("{} finished with error: {}", peer_addr, e);
            } else {
                debug!("{} finished", peer_addr);
            }
        });
    }
}

async fn handle_connection(mut conn: Conn, timeouts: TimeoutConfig) -> std::io::Result<()> {
    let handshake_deadline = Duration::from_secs(timeouts.gordafarid_handshake_timeout);
    let destination = match timeout(handshake_deadline, conn.handshake_result()).await {
        Ok(Ok(destination)) => destination,
        Ok(Err(e)) => {
            return Err(std::io::Error::new(
                e.kind(),
                format!("gordafarid handshake failed: {}", e),
            ));
        }
        Err(_) => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "gordafarid handshake timed out",
            ));
        }
    };

    debug!("connecting to {}", destination);
    let dial_deadline = Duration::from_secs(timeouts.dial_timeout);
    let target = match timeout(dial_deadline, dial_destination(&destination)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            return Err(std::io::Error::new(
                e.kind(),
                format!("failed to dial {}: {}", destination, e),
            ));
        }
        Err(_) => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("dial to {} timed out", destination),
            ));
        }
    };
    debug!("connected to {}", destination);

    relay(Box::new(conn), Box::new(target)).await
}

async fn dial_destination(
    destination: &crate::address::NetLocation,
) -> std::io::Result<TcpStream> {
    match destination.to_socket_addr() {
        Some(addr) => TcpStream::connect(addr).await,
        // Hostnames are resolved at dial time.
        None => TcpStream::connect(destination.to_string()).await,
    }
}
