//! Connection wrapping seam
//!
//! A [`ConnectionWrapper`] receives the freshly opened outbound TCP stream and
//! returns the stream the relay should use. Protocol-specific session setup
//! (TLS, HTTP `CONNECT`, credentials) happens here so the forwarding core
//! never needs to know what the remote speaks.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Anything the relay can copy bytes to and from
pub trait ForwardStreamIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> ForwardStreamIo for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

pub type BoxedStream = Box<dyn ForwardStreamIo>;

/// Failure to establish a session on one outbound connection.
///
/// Local to that connection: the forwarding keeps serving new ones.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("IO error during handshake: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Remote rejected the session: {status_line}")]
    Rejected { status_line: String },

    #[error("Malformed handshake response: {0}")]
    MalformedResponse(String),

    #[error("Invalid console location: {0}")]
    InvalidLocation(String),

    #[error("Handshake did not complete within {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait ConnectionWrapper: Send + Sync + 'static {
    /// Perform session setup on `stream` and hand back the stream to relay on
    async fn wrap(&self, stream: TcpStream) -> Result<BoxedStream, HandshakeError>;
}

/// Relays the raw outbound stream unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityWrapper;

#[async_trait]
impl ConnectionWrapper for IdentityWrapper {
    async fn wrap(&self, stream: TcpStream) -> Result<BoxedStream, HandshakeError> {
        Ok(Box::new(stream))
    }
}

/// Closure-backed wrapper, see [`wrap_fn`]
pub struct FnWrapper<F>(F);

/// Build a [`ConnectionWrapper`] from an async closure.
///
/// ```ignore
/// let wrapper = wrap_fn(|stream| async move {
///     Ok(Box::new(stream) as BoxedStream)
/// });
/// ```
pub fn wrap_fn<F, Fut>(f: F) -> FnWrapper<F>
where
    F: Fn(TcpStream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<BoxedStream, HandshakeError>> + Send + 'static,
{
    FnWrapper(f)
}

#[async_trait]
impl<F, Fut> ConnectionWrapper for FnWrapper<F>
where
    F: Fn(TcpStream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<BoxedStream, HandshakeError>> + Send + 'static,
{
    async fn wrap(&self, stream: TcpStream) -> Result<BoxedStream, HandshakeError> {
        (self.0)(stream).await
    }
}
