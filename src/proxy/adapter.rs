//! Raw-stream adapter.
//!
//! Connections on the TLS listener never speak HTTP to us, yet they go
//! through the same CONNECT pipeline as real CONNECT requests. The adapter
//! is the response side of that synthetic exchange: acknowledgement frames
//! written by the CONNECT handler are swallowed, anything else passes
//! through, and once a decision is made the caller hijacks the underlying
//! stream.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use hyper::{HeaderMap, Method, StatusCode};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::{error, trace};

use super::decision::TLS_PORT;
use super::error::ProxyError;

/// Acknowledgement of an HTTP/1.0 CONNECT.
pub const HTTP10_OK: &[u8] = b"HTTP/1.0 200 OK\r\n\r\n";

/// Acknowledgement of an HTTP/1.1 CONNECT.
pub const CONNECTION_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection established\r\n\r\n";

/// A CONNECT request built from a sniffed SNI name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    host: String,
    remote_addr: SocketAddr,
}

impl ConnectRequest {
    /// Build the request for `host` (possibly empty) on behalf of `remote_addr`.
    pub fn synthesize(host: impl Into<String>, remote_addr: SocketAddr) -> Self {
        Self {
            host: host.into(),
            remote_addr,
        }
    }

    /// Always `CONNECT`.
    pub fn method(&self) -> Method {
        Method::CONNECT
    }

    /// Sniffed host, empty when the client sent no SNI.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Request target in `host:port` form.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, TLS_PORT)
    }

    /// Address of the connecting client.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }
}

/// Response side of a synthetic CONNECT over a bare connection.
#[derive(Debug)]
pub struct RawStreamAdapter<S> {
    inner: S,
    swallowed: usize,
}

impl<S> RawStreamAdapter<S> {
    /// Wrap a bare connection.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            swallowed: 0,
        }
    }

    /// There is no response header map on a raw connection.
    pub fn header_mut(&mut self) -> Result<&mut HeaderMap, ProxyError> {
        error!("header_mut called on a raw-stream adapter");
        Err(ProxyError::AdapterMisuse("header_mut"))
    }

    /// There is no status line on a raw connection.
    pub fn write_header(&mut self, status: StatusCode) -> Result<(), ProxyError> {
        error!("write_header({}) called on a raw-stream adapter", status);
        Err(ProxyError::AdapterMisuse("write_header"))
    }

    /// Number of acknowledgement frames dropped so far.
    pub fn swallowed(&self) -> usize {
        self.swallowed
    }

    /// Take back the underlying stream.
    pub fn hijack(self) -> S {
        self.inner
    }
}

fn is_ack(buf: &[u8]) -> bool {
    buf == HTTP10_OK || buf == CONNECTION_ESTABLISHED
}

impl<S: AsyncRead + Unpin> AsyncRead for RawStreamAdapter<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for RawStreamAdapter<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if is_ack(buf) {
            trace!("Swallowing {} byte CONNECT acknowledgement", buf.len());
            this.swallowed += 1;
            return Poll::Ready(Ok(buf.len()));
        }
        Pin::new(&mut this.inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
