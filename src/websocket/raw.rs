//! WebSocket variant of the raw connection.

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::trace;

use crate::error::Result;
use crate::transport::{RawConnection, RawFrame, RawReceiver, RawSender, RawSignal};

// ============================================================================
// WsRawConnection
// ============================================================================

/// One established WebSocket session.
///
/// Ping/pong is answered by the substrate and never reaches the transport.
#[derive(Debug)]
pub struct WsRawConnection<S> {
    stream: WebSocketStream<S>,
    remote_addr: Option<SocketAddr>,
}

impl<S> WsRawConnection<S> {
    /// Wraps an upgraded stream.
    #[inline]
    #[must_use]
    pub fn new(stream: WebSocketStream<S>, remote_addr: Option<SocketAddr>) -> Self {
        Self {
            stream,
            remote_addr,
        }
    }
}

impl<S> RawConnection for WsRawConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    fn split(self) -> (Box<dyn RawSender>, Box<dyn RawReceiver>) {
        let (sink, stream) = self.stream.split();
        (
            Box::new(WsSender { sink }),
            Box::new(WsReceiver {
                stream,
                done: false,
            }),
        )
    }
}

// ============================================================================
// Halves
// ============================================================================

struct WsSender<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
}

#[async_trait]
impl<S> RawSender for WsSender<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.sink.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        match self.sink.close().await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn abort(self: Box<Self>) {
        trace!("Dropping WebSocket without close handshake");
    }
}

struct WsReceiver<S> {
    stream: SplitStream<WebSocketStream<S>>,
    done: bool,
}

#[async_trait]
impl<S> RawReceiver for WsReceiver<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn next_signal(&mut self) -> RawSignal {
        if self.done {
            return RawSignal::Closed;
        }

        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return RawSignal::Message(RawFrame::Text(text.as_str().to_owned()));
                }

                Some(Ok(Message::Binary(bytes))) => {
                    return RawSignal::Message(RawFrame::Binary(bytes.to_vec()));
                }

                Some(Ok(Message::Close(frame))) => {
                    trace!(?frame, "WebSocket close frame received");
                    self.done = true;
                    return RawSignal::Closed;
                }

                // Ping, Pong, raw frames
                Some(Ok(_)) => {}

                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                    self.done = true;
                    return RawSignal::Closed;
                }

                Some(Err(e)) => {
                    self.done = true;
                    return RawSignal::Faulted(e.into());
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
