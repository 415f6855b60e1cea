use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Marker trait for the byte streams this crate relays and wraps: plain TCP
/// connections, cipher-wrapped streams, and in-memory pipes in tests.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl AsyncStream for TcpStream {}

// Used by the in-memory stream pairs in tests.
impl AsyncStream for tokio::io::DuplexStream {}

impl<T: ?Sized + AsyncStream + Unpin> AsyncStream for Box<T> {}
impl<T: ?Sized + AsyncStream + Unpin> AsyncStream for &mut T {}
