use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use crate::config::ClientConfig;
use crate::gordafarid::{ClientHandshakeConfig, Dialer};
use crate::nonce_cache::{spawn_sweeper, NonceCache, DEFAULT_SWEEP_INTERVAL};
use crate::relay::relay;
use crate::socks_handler::Socks5ServerHandler;

// Hard bound on how long a proxied connection may live.
const CONNECTION_LIFETIME: Duration = Duration::from_secs(60 * 60);

/// Runs the local client: accepts SOCKS5 connections from user applications
/// and relays each one through a Gordafarid tunnel to the remote server.
pub async fn run_client(config: ClientConfig) -> std::io::Result<()> {
    let cipher = config.cipher()?;
    let init_password = config.init_password()?;

    let stream_nonces = Arc::new(NonceCache::with_default_retention());
    let greeting_nonces = Arc::new(NonceCache::with_default_retention());
    let _stream_sweeper = spawn_sweeper(stream_nonces.clone(), DEFAULT_SWEEP_INTERVAL);
    let _greeting_sweeper = spawn_sweeper(greeting_nonces.clone(), DEFAULT_SWEEP_INTERVAL);

    let handshake_config = Arc::new(ClientHandshakeConfig::new(
        &config.account.to_credential(),
        cipher,
        init_password,
        stream_nonces,
        greeting_nonces,
    ));
    let dialer = Dialer::new(
        handshake_config,
        config.server.address.clone(),
        Duration::from_secs(config.timeout.dial_timeout),
        Duration::from_secs(config.timeout.gordafarid_handshake_timeout),
    );

    let socks_credentials = if config.is_socks5_auth_enabled() {
        Some(config.socks5_credentials.clone())
    } else {
        None
    };
    let socks_handler = Arc::new(Socks5ServerHandler::new(socks_credentials));
    let socks5_handshake_timeout = Duration::from_secs(config.timeout.socks5_handshake_timeout);

    let listener = TcpListener::bind(&config.client.address).await?;
    info!(
        "listening for socks5 connections on {}",
        config.client.address
    );

    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(v) => v,
            Err(e) => {
                warn!("accept failed: {}", e);
                continue;
            }
        };
        debug!("accepted socks5 connection from {}", peer_addr);

        let cloned_handler = socks_handler.clone();
        let cloned_dialer = dialer.clone();
        tokio::spawn(async move {
            let result = timeout(
                CONNECTION_LIFETIME,
                handle_connection(
                    stream,
                    cloned_handler,
                    cloned_dialer,
                    socks5_handshake_timeout,
                ),
            )
            .await;
            match result {
                Ok(Ok(())) => debug!("{} finished", peer_addr),
                Ok(Err(e)) => error!("{} finished with error: {}", peer_addr, e),
                Err(_) => warn!("{} exceeded connection lifetime, closing", peer_addr),
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    socks_handler: Arc<Socks5ServerHandler>,
    dialer: Dialer,
    socks5_handshake_timeout: Duration,
) -> std::io::Result<()> {
    let setup = match timeout(
        socks5_handshake_timeout,
        socks_handler.setup_server_stream(Box::new(stream)),
    )
    .await
    {
        Ok(Ok(setup)) => setup,
        Ok(Err(e)) => {
            return Err(std::io::Error::new(
                e.kind(),
                format!("socks5 handshake failed: {}", e),
            ));
        }
        Err(_) => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "socks5 handshake timed out",
            ));
        }
    };
    debug!("socks5 connect request for {}", setup.remote_location);

    // Dial and handshake deadlines are enforced by the dialer. A failure
    // here simply closes the application connection; the SOCKS5 success
    // reply has already been sent.
    let conn = dialer.connect(setup.remote_location.clone()).await?;
    debug!("tunnel established for {}", setup.remote_location);

    relay(setup.stream, Box::new(conn)).await
}
