//! Pre-handshake inspection of inbound HTTP requests.
//!
//! The acceptor reads the request head itself so that anything other than a
//! WebSocket upgrade can be answered with `400 Bad Request` instead of a
//! handshake error. Heads are parsed with `httparse`, the parser tungstenite
//! uses for the upgrade itself. The bytes already read are replayed to
//! tungstenite through [`Rewind`].

// ============================================================================
// Imports
// ============================================================================

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use httparse::Status;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};

use crate::error::Result;

// ============================================================================
// Constants
// ============================================================================

/// Upper bound for a request head.
pub(crate) const MAX_REQUEST_HEAD: usize = 8 * 1024;

/// Upper bound for the number of request headers.
const MAX_HEADERS: usize = 64;

const BAD_REQUEST: &[u8] =
    b"HTTP/1.1 400 Bad Request\r\nConnection: close\r\nContent-Length: 0\r\n\r\n";

// ============================================================================
// Request head
// ============================================================================

/// What the client sent before the handshake.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum RequestHead {
    /// The client left without sending anything.
    Empty,

    /// A complete WebSocket upgrade request. Holds every byte read so far.
    Upgrade(Vec<u8>),

    /// Plain HTTP, a malformed or truncated head, or one over the limits.
    NotUpgrade,
}

/// Reads and classifies the request head.
///
/// May read past the head when the client pipelines data; an
/// [`Upgrade`](RequestHead::Upgrade) carries everything read.
pub(crate) async fn read_request_head<S>(stream: &mut S) -> Result<RequestHead>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(if buf.is_empty() {
                RequestHead::Empty
            } else {
                RequestHead::NotUpgrade
            });
        }
        buf.extend_from_slice(&chunk[..n]);

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut request = httparse::Request::new(&mut headers);

        match request.parse(&buf) {
            Ok(Status::Complete(_)) => {
                let upgrade = is_websocket_upgrade(&request);
                return Ok(if upgrade {
                    RequestHead::Upgrade(buf)
                } else {
                    RequestHead::NotUpgrade
                });
            }
            Ok(Status::Partial) if buf.len() < MAX_REQUEST_HEAD => {}
            Ok(Status::Partial) | Err(_) => return Ok(RequestHead::NotUpgrade),
        }
    }
}

/// Returns `true` for a `GET` carrying `Upgrade: websocket`.
fn is_websocket_upgrade(request: &httparse::Request<'_, '_>) -> bool {
    if request.method != Some("GET") {
        return false;
    }

    request
        .headers
        .iter()
        .filter(|header| header.name.eq_ignore_ascii_case("upgrade"))
        .filter_map(|header| std::str::from_utf8(header.value).ok())
        .any(|value| {
            value
                .split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("websocket"))
        })
}

/// Answers a non-upgrade request with `400 Bad Request` and closes.
pub(crate) async fn reject_plain_http<S>(stream: &mut S) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(BAD_REQUEST).await?;
    stream.shutdown().await?;
    Ok(())
}

// ============================================================================
// Rewind
// ============================================================================

/// A stream that yields `prefix` before reading from `inner`.
#[derive(Debug)]
pub(crate) struct Rewind<S> {
    prefix: Vec<u8>,
    consumed: usize,
    inner: S,
}

impl<S> Rewind<S> {
    pub(crate) fn new(prefix: Vec<u8>, inner: S) -> Self {
        Self {
            prefix,
            consumed: 0,
            inner,
        }
    }
}

impl<S> AsyncRead for Rewind<S>
where
    S: AsyncRead + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.consumed < this.prefix.len() {
            let pending = &this.prefix[this.consumed..];
            let n = pending.len().min(buf.remaining());
            buf.put_slice(&pending[..n]);
            this.consumed += n;

            if this.consumed == this.prefix.len() {
                this.prefix = Vec::new();
                this.consumed = 0;
            }
            return Poll::Ready(Ok(()));
        }

        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S> AsyncWrite for Rewind<S>
where
    S: AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

// ============================================================================
// Tests
// ============================================================================
