use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::ready;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::address::NetLocation;
use crate::async_stream::AsyncStream;
use crate::cipher_stream::CipherStream;

use super::handshake::{client_handshake, server_handshake, HandshakeOutcome};
use super::{ClientHandshakeConfig, ServerHandshakeConfig};

type HandshakeFuture = Pin<Box<dyn Future<Output = std::io::Result<HandshakeOutcome>> + Send>>;

enum ConnState {
    ClientPending {
        stream: Box<dyn AsyncStream>,
        config: Arc<ClientHandshakeConfig>,
        target: NetLocation,
    },
    ServerPending {
        stream: Box<dyn AsyncStream>,
        config: Arc<ServerHandshakeConfig>,
    },
    InProgress(HandshakeFuture),
    Established(CipherStream),
    Failed,
}

/// A Gordafarid connection in either role.
///
/// The handshake runs lazily on the first read or write (or explicitly via
/// `handshake`), and both operations only complete once it has succeeded.
/// After that the connection behaves as an encrypted byte stream.
pub struct Conn {
    state: ConnState,
    handshake_complete: AtomicBool,
    request: Option<NetLocation>,
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("handshake_complete", &self.handshake_complete)
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

impl Conn {
    pub fn client(
        stream: Box<dyn AsyncStream>,
        config: Arc<ClientHandshakeConfig>,
        target: NetLocation,
    ) -> Self {
        Self {
            state: ConnState::ClientPending {
                stream,
                config,
                target,
            },
            handshake_complete: AtomicBool::new(false),
            request: None,
        }
    }

    pub fn server(stream: Box<dyn AsyncStream>, config: Arc<ServerHandshakeConfig>) -> Self {
        Self {
            state: ConnState::ServerPending { stream, config },
            handshake_complete: AtomicBool::new(false),
            request: None,
        }
    }

    pub fn is_handshake_complete(&self) -> bool {
        self.handshake_complete.load(Ordering::Acquire)
    }

    fn poll_handshake(&mut self, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        loop {
            match self.state {
                ConnState::Established(_) => return Poll::Ready(Ok(())),
                ConnState::Failed => {
                    return Poll::Ready(Err(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        "handshake previously failed",
                    )));
                }
                ConnState::ClientPending { .. } | ConnState::ServerPending { .. } => {
                    let pending = std::mem::replace(&mut self.state, ConnState::Failed);
                    let future: HandshakeFuture = match pending {
                        ConnState::ClientPending {
                            stream,
                            config,
                            target,
                        } => Box::pin(client_handshake(stream, config, target)),
                        ConnState::ServerPending { stream, config } => {
                            Box::pin(server_handshake(stream, config))
                        }
                        _ => unreachable!(),
                    };
                    self.state = ConnState::InProgress(future);
                }
                ConnState::InProgress(ref mut future) => {
                    match ready!(future.as_mut().poll(cx)) {
                        Ok(outcome) => {
                            self.request = Some(outcome.request);
                            self.state = ConnState::Established(outcome.stream);
                            self.handshake_complete.store(true, Ordering::Release);
                            return Poll::Ready(Ok(()));
                        }
                        Err(e) => {
                            self.state = ConnState::Failed;
                            return Poll::Ready(Err(e));
                        }
                    }
                }
            }
        }
    }

    /// Runs the handshake to completion. A no-op returning success when the
    /// handshake has already completed.
    pub async fn handshake(&mut self) -> std::io::Result<()> {
        std::future::poll_fn(|cx| self.poll_handshake(cx)).await
    }

    /// Returns the destination the peer asked for, running the handshake
    /// first if necessary. Only meaningful on the server side, where the
    /// request was parsed from the client; on the client side it is the
    /// target that was sent.
    pub async fn handshake_result(&mut self) -> std::io::Result<NetLocation> {
        self.handshake().await?;
        self.request.clone().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::Other, "handshake result missing")
        })
    }
}

impl AsyncRead for Conn {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_handshake(cx))?;
        match this.state {
            ConnState::Established(ref mut stream) => Pin::new(stream).poll_read(cx, buf),
            _ => unreachable!("poll_handshake returned Ready(Ok) without establishing"),
        }
    }
}

impl AsyncWrite for Conn {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        ready!(this.poll_handshake(cx))?;
        match this.state {
            ConnState::Established(ref mut stream) => Pin::new(stream).poll_write(cx, buf),
            _ => unreachable!("poll_handshake returned Ready(Ok) without establishing"),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_handshake(cx))?;
        match this.state {
            ConnState::Established(ref mut stream) => Pin::new(stream).poll_flush(cx),
            _ => unreachable!("poll_handshake returned Ready(Ok) without establishing"),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_handshake(cx))?;
        match this.state {
            ConnState::Established(ref mut stream) => Pin::new(stream).poll_shutdown(cx),
            _ => unreachable!("poll_handshake returned Ready(Ok) without establishing"),
        }
    }
}

impl AsyncStream for Conn {}
