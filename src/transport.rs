//! The byte-stream boundary: anything ordered and reliable can carry a
//! connection, TCP by default.

use std::future::Future;
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::trace;

use crate::endpoint::EndpointKey;
use crate::error::Result;

/// An ordered, reliable, bidirectional byte stream.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Type-erased transport held by pooled connections.
pub type BoxTransport = Box<dyn Transport>;

/// Future returned by [`Connector::connect`].
pub type ConnectFuture<'a> = Pin<Box<dyn Future<Output = Result<BoxTransport>> + Send + 'a>>;

/// Opens new transports on a pool miss.
pub trait Connector: Send + Sync + 'static {
    /// Open a transport to `endpoint`.
    fn connect<'a>(&'a self, endpoint: &'a EndpointKey) -> ConnectFuture<'a>;
}

/// Plain TCP with `TCP_NODELAY`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect<'a>(&'a self, endpoint: &'a EndpointKey) -> ConnectFuture<'a> {
        Box::pin(async move {
            let stream = TcpStream::connect((endpoint.host(), endpoint.port())).await?;
            stream.set_nodelay(true)?;
            trace!(endpoint = %endpoint, "tcp connected");
            Ok(Box::new(stream) as BoxTransport)
        })
    }
}
