mod conn;
mod handshake;
pub mod proto;

pub use conn::Conn;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use crate::address::NetLocation;
use crate::crypto::{Cipher, INIT_PASSWORD_LEN};
use crate::nonce_cache::NonceCache;

use proto::{account_hash, HASH_LEN};

/// A username and password pair. The password doubles as the AEAD key for
/// the user's traffic.
#[derive(Debug, Clone)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Everything the server side needs to complete handshakes: the credential
/// map keyed by account hash, the negotiated-by-config cipher, the shared
/// init-password, and the two process-wide nonce caches.
pub struct ServerHandshakeConfig {
    pub(crate) credentials: FxHashMap<[u8; HASH_LEN], Vec<u8>>,
    pub(crate) cipher: Cipher,
    pub(crate) init_password: [u8; INIT_PASSWORD_LEN],
    pub(crate) stream_nonces: Arc<NonceCache>,
    pub(crate) greeting_nonces: Arc<NonceCache>,
}

impl ServerHandshakeConfig {
    pub fn new(
        credentials: &[Credential],
        cipher: Cipher,
        init_password: [u8; INIT_PASSWORD_LEN],
        stream_nonces: Arc<NonceCache>,
        greeting_nonces: Arc<NonceCache>,
    ) -> Self {
        let credentials = credentials
            .iter()
            .map(|credential| {
                (
                    account_hash(&credential.username, &credential.password),
                    credential.password.as_bytes().to_vec(),
                )
            })
            .collect();
        Self {
            credentials,
            cipher,
            init_password,
            stream_nonces,
            greeting_nonces,
        }
    }
}

/// The client-side counterpart: the account identity and key material used
/// to greet and authenticate.
pub struct ClientHandshakeConfig {
    pub(crate) hash: [u8; HASH_LEN],
    pub(crate) password: Vec<u8>,
    pub(crate) cipher: Cipher,
    pub(crate) init_password: [u8; INIT_PASSWORD_LEN],
    pub(crate) stream_nonces: Arc<NonceCache>,
    pub(crate) greeting_nonces: Arc<NonceCache>,
}

impl ClientHandshakeConfig {
    pub fn new(
        account: &Credential,
        cipher: Cipher,
        init_password: [u8; INIT_PASSWORD_LEN],
        stream_nonces: Arc<NonceCache>,
        greeting_nonces: Arc<NonceCache>,
    ) -> Self {
        Self {
            hash: account_hash(&account.username, &account.password),
            password: account.password.as_bytes().to_vec(),
            cipher,
            init_password,
            stream_nonces,
            greeting_nonces,
        }
    }
}

/// Accepts raw TCP connections and wraps each in a server-role `Conn`. The
/// caller runs the handshake, typically under a deadline.
pub struct Listener {
    listener: TcpListener,
    config: Arc<ServerHandshakeConfig>,
}

impl Listener {
    pub async fn bind(address: &str, config: Arc<ServerHandshakeConfig>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(address).await?;
        Ok(Self { listener, config })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn accept(&self) -> std::io::Result<(Conn, SocketAddr)> {
        let (stream, peer_addr) = self.listener.accept().await?;
        let conn = Conn::server(Box::new(stream), self.config.clone());
        Ok((conn, peer_addr))
    }
}

/// Dials the remote server over TCP and completes the client-role handshake,
/// both under their own deadlines.
#[derive(Clone)]
pub struct Dialer {
    config: Arc<ClientHandshakeConfig>,
    server_address: String,
    dial_timeout: Duration,
    handshake_timeout: Duration,
}

impl Dialer {
    pub fn new(
        config: Arc<ClientHandshakeConfig>,
        server_address: String,
        dial_timeout: Duration,
        handshake_timeout: Duration,
    ) -> Self {
        Self {
            config,
            server_address,
            dial_timeout,
            handshake_timeout,
        }
    }

    pub async fn connect(&self, target: NetLocation) -> std::io::Result<Conn> {
        let stream = match timeout(
            self.dial_timeout,
            TcpStream::connect(self.server_address.as_str()),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("dial to {} timed out", self.server_address),
                ));
            }
        };

        let mut conn = Conn::client(Box::new(stream), self.config.clone(), target);
        match timeout(self.handshake_timeout, conn.handshake()).await {
            Ok(Ok(())) => Ok(conn),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "gordafarid handshake timed out",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use crate::address::Address;
    use crate::crypto::seal;
    use proto::{GreetingHeader, SEALED_GREETING_LEN};

    const INIT_PASSWORD: &[u8; 32] = b"00000000000000000000000000000000";
    const PASSWORD: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    fn fresh_caches() -> (Arc<NonceCache>, Arc<NonceCache>) {
        (
            Arc::new(NonceCache::with_default_retention()),
            Arc::new(NonceCache::with_default_retention()),
        )
    }

    fn server_config(credentials: &[Credential]) -> Arc<ServerHandshakeConfig> {
        let (stream_nonces, greeting_nonces) = fresh_caches();
        Arc::new(ServerHandshakeConfig::new(
            credentials,
            Cipher::Chacha20Poly1305,
            *INIT_PASSWORD,
            stream_nonces,
            greeting_nonces,
        ))
    }

    fn client_config(account: &Credential, init_password: [u8; 32]) -> Arc<ClientHandshakeConfig> {
        let (stream_nonces, greeting_nonces) = fresh_caches();
        Arc::new(ClientHandshakeConfig::new(
            account,
            Cipher::Chacha20Poly1305,
            init_password,
            stream_nonces,
            greeting_nonces,
        ))
    }

    fn target() -> NetLocation {
        NetLocation::new(Address::Ipv4(Ipv4Addr::new(93, 184, 216, 34)), 80)
    }

    #[tokio::test]
    async fn test_handshake_happy_path() {
        let account = Credential::new("u", PASSWORD);
        let server_cfg = server_config(&[account.clone()]);
        let client_cfg = client_config(&account, *INIT_PASSWORD);

        let (client_raw, server_raw) = tokio::io::duplex(65536 * 2);
        let mut client = Conn::client(Box::new(client_raw), client_cfg, target());
        let mut server = Conn::server(Box::new(server_raw), server_cfg);

        let client_task = tokio::spawn(async move {
            client.handshake().await.unwrap();

            client.write_all(b"HELLO\n").await.unwrap();
            client.flush().await.unwrap();

            let mut buf = [0u8; 6];
            client.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"WORLD\n");
        });

        let destination = server.handshake_result().await.unwrap();
        assert_eq!(destination, target());
        assert!(server.is_handshake_complete());

        let mut buf = [0u8; 6];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"HELLO\n");

        server.write_all(b"WORLD\n").await.unwrap();
        server.flush().await.unwrap();

        client_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_handshake_is_idempotent() {
        let account = Credential::new("u", PASSWORD);
        let server_cfg = server_config(&[account.clone()]);
        let client_cfg = client_config(&account, *INIT_PASSWORD);

        let (client_raw, server_raw) = tokio::io::duplex(65536 * 2);
        let mut client = Conn::client(Box::new(client_raw), client_cfg, target());
        let mut server = Conn::server(Box::new(server_raw), server_cfg);

        let client_task = tokio::spawn(async move {
            client.handshake().await.unwrap();
            client.handshake().await.unwrap();
        });

        server.handshake().await.unwrap();
        server.handshake().await.unwrap();
        assert_eq!(server.handshake_result().await.unwrap(), target());

        client_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_wrong_init_password_closes_without_response() {
        let account = Credential::new("u", PASSWORD);
        let server_cfg = server_config(&[account.clone()]);
        let client_cfg = client_config(&account, *b"11111111111111111111111111111111");

        let (client_raw, server_raw) = tokio::io::duplex(65536 * 2);
        let mut client = Conn::client(Box::new(client_raw), client_cfg, target());
        let mut server = Conn::server(Box::new(server_raw), server_cfg);

        let client_task = tokio::spawn(async move {
            // The greeting is written, then the first framed read observes
            // EOF once the server drops the connection.
            client.handshake().await.unwrap_err()
        });

        let err = server.handshake().await.unwrap_err();
        assert!(err.to_string().contains("decrypt failed"));
        drop(server);

        let client_err = client_task.await.unwrap();
        assert_eq!(client_err.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_unknown_user_rejected() {
        let server_cfg = server_config(&[Credential::new("u", PASSWORD)]);
        let client_cfg = client_config(&Credential::new("x", PASSWORD), *INIT_PASSWORD);

        let (client_raw, server_raw) = tokio::io::duplex(65536 * 2);
        let mut client = Conn::client(Box::new(client_raw), client_cfg, target());
        let mut server = Conn::server(Box::new(server_raw), server_cfg);

        let client_task = tokio::spawn(async move { client.handshake().await.unwrap_err() });

        let err = server.handshake().await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::PermissionDenied);
        drop(server);

        // The client's read of the greeting response fails.
        client_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_replayed_greeting_rejected() {
        let account = Credential::new("u", PASSWORD);
        let server_cfg = server_config(&[account.clone()]);

        let greeting = GreetingHeader::new(proto::account_hash("u", PASSWORD));
        let attacker_nonces = NonceCache::with_default_retention();
        let blob = seal(&greeting.encode(), INIT_PASSWORD, &attacker_nonces).unwrap();
        assert_eq!(blob.len(), SEALED_GREETING_LEN);

        // First delivery gets past the greeting; the handshake then fails
        // on the missing request, not on the greeting itself.
        let (mut attacker, server_raw) = tokio::io::duplex(65536 * 2);
        let mut server = Conn::server(Box::new(server_raw), server_cfg.clone());
        attacker.write_all(&blob).await.unwrap();
        attacker.shutdown().await.unwrap();
        let err = server.handshake().await.unwrap_err();
        assert!(!err.to_string().contains("replay"));

        // Replaying the captured 62 bytes trips the nonce cache, with an
        // error distinguishable from a decrypt failure.
        let (mut attacker, server_raw) = tokio::io::duplex(65536 * 2);
        let mut server = Conn::server(Box::new(server_raw), server_cfg.clone());
        attacker.write_all(&blob).await.unwrap();
        attacker.shutdown().await.unwrap();
        let err = server.handshake().await.unwrap_err();
        assert!(err.to_string().contains("replay"));

        // A full session with a freshly drawn nonce still succeeds against
        // the same server after the replay was rejected.
        let client_cfg = client_config(&account, *INIT_PASSWORD);
        let (client_raw, server_raw) = tokio::io::duplex(65536 * 2);
        let mut client = Conn::client(Box::new(client_raw), client_cfg, target());
        let mut server = Conn::server(Box::new(server_raw), server_cfg);

        let client_task = tokio::spawn(async move { client.handshake().await });
        assert_eq!(server.handshake_result().await.unwrap(), target());
        client_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_dialer_handshake_timeout() {
        // A listener that accepts but never answers the greeting.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server_address = listener.local_addr().unwrap().to_string();
        let accept_task = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
            drop(stream);
        });

        let client_cfg = client_config(&Credential::new("u", PASSWORD), *INIT_PASSWORD);
        let dialer = Dialer::new(
            client_cfg,
            server_address,
            Duration::from_secs(5),
            Duration::from_millis(50),
        );

        let err = dialer.connect(target()).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::TimedOut);
        accept_task.abort();
    }

    #[tokio::test]
    async fn test_read_runs_handshake_lazily() {
        let account = Credential::new("u", PASSWORD);
        let server_cfg = server_config(&[account.clone()]);
        let client_cfg = client_config(&account, *INIT_PASSWORD);

        let (client_raw, server_raw) = tokio::io::duplex(65536 * 2);
        let mut client = Conn::client(Box::new(client_raw), client_cfg, target());
        let mut server = Conn::server(Box::new(server_raw), server_cfg);

        // Neither side calls handshake explicitly; the first I/O drives it.
        let client_task = tokio::spawn(async move {
            client.write_all(b"ping").await.unwrap();
            client.flush().await.unwrap();
        });

        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        assert!(server.is_handshake_complete());

        client_task.await.unwrap();
    }
}
