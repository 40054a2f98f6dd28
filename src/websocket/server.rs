//! Server-side acceptor for inbound WebSocket connections.
//!
//! # Connection Flow
//!
//! 1. The server binds a TCP listener (port 0 picks a random port)
//! 2. The accept loop hands every TCP connection to its own handshake task
//! 3. The request head is read; plain HTTP gets `400 Bad Request`
//! 4. The origin policy is consulted; a rejected origin gets `403 Forbidden`
//! 5. The client must offer [`PROTOCOL_NAME`]; otherwise `400 Bad Request`
//! 6. The upgraded stream is wrapped into a [`Transport`] and surfaced as
//!    [`ServerEvent::Connection`]
//!
//! Handshake faults are surfaced as [`ServerEvent::Error`]. Origin rejections
//! are a policy outcome and only logged.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, ORIGIN, SEC_WEBSOCKET_PROTOCOL};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::protocol::{JsonRecordFormat, RecordFormat, ServerEvent};
use crate::relay;
use crate::transport::Transport;

use super::PROTOCOL_NAME;
use super::config::ServerOptions;
use super::raw::WsRawConnection;
use super::upgrade::{self, RequestHead, Rewind};

// ============================================================================
// Constants
// ============================================================================

/// Pause after the first failed accept.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);

/// Longest pause between failed accepts.
const MAX_ACCEPT_BACKOFF: Duration = Duration::from_millis(500);

// ============================================================================
// ServerEvents
// ============================================================================

/// Receiving side of a server's events.
pub struct ServerEvents<F: RecordFormat> {
    rx: mpsc::UnboundedReceiver<ServerEvent<F>>,
}

impl<F: RecordFormat> ServerEvents<F> {
    /// Waits for the next event.
    ///
    /// Returns `None` once the server has stopped and all events were read.
    pub async fn recv(&mut self) -> Option<ServerEvent<F>> {
        self.rx.recv().await
    }

    /// Returns an already queued event without waiting.
    pub fn try_recv(&mut self) -> Option<ServerEvent<F>> {
        self.rx.try_recv().ok()
    }
}

impl<F: RecordFormat> fmt::Debug for ServerEvents<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerEvents").finish_non_exhaustive()
    }
}

// ============================================================================
// WebSocketServer
// ============================================================================

/// A listening WebSocket server.
///
/// The accept loop runs until [`shutdown`](Self::shutdown) is called or the
/// server is dropped. Transports already handed out keep running.
///
/// # Example
///
/// ```ignore
/// use packet_transport::protocol::{JsonRecordFormat, ServerEvent};
/// use packet_transport::websocket::{AllowAllOrigins, ServerOptions, WebSocketServer};
///
/// let server = WebSocketServer::bind(
///     "127.0.0.1:0",
///     ServerOptions::new(AllowAllOrigins),
///     JsonRecordFormat,
/// )
/// .await?;
///
/// let mut events = server.take_events().expect("first take");
/// while let Some(event) = events.recv().await {
///     if let ServerEvent::Connection(transport) = event {
///         transport.send("[\"welcome\"]")?;
///     }
/// }
/// ```
pub struct WebSocketServer<F: RecordFormat = JsonRecordFormat> {
    /// Bound address.
    local_addr: SocketAddr,
    /// Stops the accept loop.
    shutdown_tx: watch::Sender<bool>,
    /// Events, until taken.
    events: Mutex<Option<ServerEvents<F>>>,
}

impl<F> WebSocketServer<F>
where
    F: RecordFormat + Clone,
{
    /// Binds a listener and starts accepting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind(
        addr: impl ToSocketAddrs,
        options: ServerOptions,
        format: F,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Self::from_listener(listener, options, format)
    }

    /// Starts accepting on an already bound listener.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the local address cannot be read.
    pub fn from_listener(
        listener: TcpListener,
        options: ServerOptions,
        format: F,
    ) -> Result<Self> {
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        // Handshake faults travel on their own channel and are relayed as
        // server error events.
        let (fault_tx, fault_rx) = mpsc::unbounded_channel();
        relay::forward_event(fault_rx, event_tx.clone(), ServerEvent::Error);

        tokio::spawn(Self::run_accept_loop(
            listener,
            Arc::new(options),
            format,
            event_tx,
            fault_tx,
            shutdown_rx,
        ));

        info!(%local_addr, "WebSocket server listening");

        Ok(Self {
            local_addr,
            shutdown_tx,
            events: Mutex::new(Some(ServerEvents { rx: event_rx })),
        })
    }
}

impl<F: RecordFormat> WebSocketServer<F> {
    /// Returns the bound address.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the bound port.
    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Returns the WebSocket URL of this server.
    ///
    /// Format: `ws://{ip}:{port}`
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.local_addr)
    }

    /// Takes the event receiver. Returns `None` after the first call.
    pub fn take_events(&self) -> Option<ServerEvents<F>> {
        self.events.lock().take()
    }

    /// Stops accepting new connections. Idempotent.
    pub fn shutdown(&self) {
        if !self.shutdown_tx.send_replace(true) {
            debug!(local_addr = %self.local_addr, "WebSocket server shutting down");
        }
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) was called.
    #[inline]
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_tx.borrow()
    }
}

impl<F: RecordFormat> Drop for WebSocketServer<F> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<F: RecordFormat> fmt::Debug for WebSocketServer<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketServer")
            .field("local_addr", &self.local_addr)
            .field("shutdown", &self.is_shutdown())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Accept loop
// ============================================================================

/// A run of consecutive accept errors.
///
/// Only the first error of a run is reported as a server event; the loop
/// pauses for [`backoff`](Self::backoff) after each one.
#[derive(Debug, Default)]
struct AcceptFailures {
    streak: u32,
}

impl AcceptFailures {
    /// Counts one failure. Returns `true` if it starts a new run.
    fn record(&mut self) -> bool {
        self.streak = self.streak.saturating_add(1);
        self.streak == 1
    }

    fn reset(&mut self) {
        self.streak = 0;
    }

    /// Pause before the next accept: doubles per failure, capped.
    fn backoff(&self) -> Duration {
        let exponent = self.streak.saturating_sub(1).min(6);
        (ACCEPT_BACKOFF * 2u32.pow(exponent)).min(MAX_ACCEPT_BACKOFF)
    }
}

/// Outcome of the handshake callback, read after the upgrade returns.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Verdict {
    Accepted,
    OriginRejected(Option<String>),
    MissingProtocol,
}

impl<F> WebSocketServer<F>
where
    F: RecordFormat + Clone,
{
    async fn run_accept_loop(
        listener: TcpListener,
        options: Arc<ServerOptions>,
        format: F,
        events: mpsc::UnboundedSender<ServerEvent<F>>,
        faults: mpsc::UnboundedSender<Error>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut failures = AcceptFailures::default();

        loop {
            tokio::select! {
                // Shutdown requested or server dropped
                _ = shutdown_rx.changed() => break,

                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            failures.reset();
                            debug!(%peer, "TCP connection accepted");
                            tokio::spawn(Self::handle_connection(
                                stream,
                                peer,
                                Arc::clone(&options),
                                format.clone(),
                                events.clone(),
                                faults.clone(),
                            ));
                        }
                        Err(e) => {
                            if failures.record() {
                                warn!(error = %e, "Accept failed");
                                let _ = faults.send(Error::Io(e));
                            } else {
                                let streak = failures.streak;
                                debug!(error = %e, streak, "Accept still failing");
                            }

                            // Errors such as EMFILE persist across retries.
                            tokio::select! {
                                _ = shutdown_rx.changed() => break,
                                () = sleep(failures.backoff()) => {}
                            }
                        }
                    }
                }
            }
        }

        debug!("Accept loop terminated");
    }

    async fn handle_connection(
        stream: TcpStream,
        peer: SocketAddr,
        options: Arc<ServerOptions>,
        format: F,
        events: mpsc::UnboundedSender<ServerEvent<F>>,
        faults: mpsc::UnboundedSender<Error>,
    ) {
        let limit = options.handshake_timeout();

        let outcome = match timeout(limit, Self::upgrade(stream, peer, &options)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::connection_timeout(limit.as_millis() as u64)),
        };

        match outcome {
            Ok(Some(raw)) => {
                let transport = Transport::new(raw, format);
                info!(%peer, id = %transport.id(), "Inbound WebSocket connection established");
                let _ = events.send(ServerEvent::Connection(transport));
            }
            Ok(None) => {}
            Err(e) => {
                debug!(%peer, error = %e, "Inbound handshake failed");
                let _ = faults.send(e);
            }
        }
    }

    /// Runs the handshake. `Ok(None)` means the request was turned away
    /// without a fault.
    async fn upgrade(
        mut stream: TcpStream,
        peer: SocketAddr,
        options: &ServerOptions,
    ) -> Result<Option<WsRawConnection<Rewind<TcpStream>>>> {
        let head = match upgrade::read_request_head(&mut stream).await? {
            RequestHead::Upgrade(head) => head,

            RequestHead::Empty => {
                debug!(%peer, "Client left before sending a request");
                return Ok(None);
            }

            RequestHead::NotUpgrade => {
                debug!(%peer, "Not a WebSocket upgrade, answering 400");
                if let Err(e) = upgrade::reject_plain_http(&mut stream).await {
                    debug!(%peer, error = %e, "Could not answer plain HTTP request");
                }
                return Ok(None);
            }
        };

        let policy = options.origin_policy();
        let mut verdict = Verdict::Accepted;

        let callback = |request: &Request, mut response: Response| {
            let origin = request
                .headers()
                .get(ORIGIN)
                .and_then(|value| value.to_str().ok());

            if !policy.is_allowed(origin) {
                verdict = Verdict::OriginRejected(origin.map(str::to_owned));
                return Err(refusal(StatusCode::FORBIDDEN, "origin not allowed"));
            }

            let offers_protocol = request
                .headers()
                .get_all(SEC_WEBSOCKET_PROTOCOL)
                .iter()
                .filter_map(|value| value.to_str().ok())
                .flat_map(|value| value.split(','))
                .any(|protocol| protocol.trim() == PROTOCOL_NAME);

            if !offers_protocol {
                verdict = Verdict::MissingProtocol;
                return Err(refusal(StatusCode::BAD_REQUEST, "unsupported subprotocol"));
            }

            response
                .headers_mut()
                .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(PROTOCOL_NAME));
            Ok(response)
        };

        let stream = Rewind::new(head, stream);
        let config = Some(options.ws_config());
        let result = accept_hdr_async_with_config(stream, callback, config).await;

        match (result, verdict) {
            (Ok(ws), _) => Ok(Some(WsRawConnection::new(ws, Some(peer)))),

            (Err(_), Verdict::OriginRejected(origin)) => {
                debug!(%peer, ?origin, "Origin rejected");
                Ok(None)
            }

            (Err(_), Verdict::MissingProtocol) => Err(Error::connection(format!(
                "client did not offer the '{PROTOCOL_NAME}' subprotocol"
            ))),

            (Err(e), Verdict::Accepted) => Err(Error::connection(format!(
                "WebSocket handshake failed: {e}"
            ))),
        }
    }
}

fn refusal(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::{IpAddr, Ipv4Addr};

    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use crate::protocol::TransportEvent;
    use crate::transport::ConnectionFactory;
    use crate::websocket::{AllowAllOrigins, WebSocketClientConfig, WebSocketConnector};

    async fn open_server(options: ServerOptions) -> WebSocketServer {
        WebSocketServer::bind("127.0.0.1:0", options, JsonRecordFormat)
            .await
            .expect("bind should succeed")
    }

    async fn next_server_event(
        events: &mut ServerEvents<JsonRecordFormat>,
    ) -> ServerEvent<JsonRecordFormat> {
        timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("event within timeout")
            .expect("server events open")
    }

    #[tokio::test]
    async fn test_server_bind_random_port() {
        let server = open_server(ServerOptions::new(AllowAllOrigins)).await;

        assert!(server.port() > 0);
        assert_eq!(server.local_addr().ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(server.ws_url(), format!("ws://127.0.0.1:{}", server.port()));
    }

    #[tokio::test]
    async fn test_accepts_and_wraps_connection() {
        let server = open_server(ServerOptions::new(AllowAllOrigins)).await;
        let mut events = server.take_events().unwrap();
        assert!(server.take_events().is_none());

        let config = WebSocketClientConfig::new(server.ws_url());
        let raw = WebSocketConnector.open_raw(&config).await.unwrap();
        let client = WebSocketConnector.wrap(raw, JsonRecordFormat);

        let ServerEvent::Connection(inbound) = next_server_event(&mut events).await else {
            panic!("expected a connection");
        };
        assert_eq!(
            inbound.remote_addr().map(|a| a.ip()),
            Some(IpAddr::V4(Ipv4Addr::LOCALHOST))
        );

        let mut inbound_events = inbound.take_events().unwrap();
        client.send_record(&json!(["hello"])).unwrap();

        let event = timeout(Duration::from_secs(2), inbound_events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.into_packet(), Some(json!(["hello"])));
        client.end();
    }

    #[tokio::test]
    async fn test_rejected_origin_is_not_an_error() {
        let server = open_server(ServerOptions::new(|_: Option<&str>| false)).await;
        let mut events = server.take_events().unwrap();

        let config =
            WebSocketClientConfig::new(server.ws_url()).with_origin("https://evil.example");
        let err = WebSocketConnector.open_raw(&config).await.unwrap_err();
        assert!(err.is_connection_error());

        let quiet = timeout(Duration::from_millis(200), events.recv()).await;
        assert!(quiet.is_err(), "no event expected for a policy rejection");
    }

    #[tokio::test]
    async fn test_missing_subprotocol_is_refused() {
        let server = open_server(ServerOptions::new(AllowAllOrigins)).await;
        let mut events = server.take_events().unwrap();

        let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();
        stream
            .write_all(
                b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: Upgrade\r\n\
                  Upgrade: websocket\r\nSec-WebSocket-Version: 13\r\n\
                  Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n",
            )
            .await
            .unwrap();

        let mut response = vec![0u8; 256];
        let n = stream.read(&mut response).await.unwrap();
        assert!(String::from_utf8_lossy(&response[..n]).starts_with("HTTP/1.1 400"));

        match next_server_event(&mut events).await {
            ServerEvent::Error(e) => assert!(e.is_connection_error()),
            ServerEvent::Connection(_) => panic!("connection must not be created"),
        }
    }

    #[tokio::test]
    async fn test_plain_http_gets_bad_request() {
        let server = open_server(ServerOptions::new(AllowAllOrigins)).await;

        let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();

        let mut response = String::new();
        timeout(Duration::from_secs(2), stream.read_to_string(&mut response))
            .await
            .unwrap()
            .unwrap();
        assert!(response.starts_with("HTTP/1.1 400 Bad Request"));
    }

    #[tokio::test]
    async fn test_bare_lf_request_is_answered_promptly() {
        let options =
            ServerOptions::new(AllowAllOrigins).with_handshake_timeout(Duration::from_secs(5));
        let server = open_server(options).await;
        let mut events = server.take_events().unwrap();

        let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();
        stream
            .write_all(b"GET / HTTP/1.1\nHost: localhost\n\n")
            .await
            .unwrap();

        // Well inside the handshake timeout.
        let mut response = String::new();
        timeout(Duration::from_secs(1), stream.read_to_string(&mut response))
            .await
            .expect("answered before the handshake timeout")
            .unwrap();
        assert!(response.starts_with("HTTP/1.1 400"));

        let quiet = timeout(Duration::from_millis(200), events.recv()).await;
        assert!(quiet.is_err(), "no event expected for a plain request");
    }

    #[test]
    fn test_accept_failures_report_once_per_run() {
        let mut failures = AcceptFailures::default();
        assert!(failures.record());
        assert!(!failures.record());
        assert!(!failures.record());

        failures.reset();
        assert!(failures.record());
    }

    #[test]
    fn test_accept_backoff_doubles_and_caps() {
        let mut failures = AcceptFailures::default();
        failures.record();
        assert_eq!(failures.backoff(), ACCEPT_BACKOFF);
        failures.record();
        assert_eq!(failures.backoff(), ACCEPT_BACKOFF * 2);
        failures.record();
        assert_eq!(failures.backoff(), ACCEPT_BACKOFF * 4);

        for _ in 0..20 {
            failures.record();
        }
        assert_eq!(failures.backoff(), MAX_ACCEPT_BACKOFF);

        failures.reset();
        failures.record();
        assert_eq!(failures.backoff(), ACCEPT_BACKOFF);
    }

    #[tokio::test]
    async fn test_shutdown_stops_accepting() {
        let server = open_server(ServerOptions::new(AllowAllOrigins)).await;
        let mut events = server.take_events().unwrap();

        server.shutdown();
        server.shutdown();
        assert!(server.is_shutdown());

        // The relay and accept loop end, closing the event stream.
        let closed = timeout(Duration::from_secs(2), events.recv()).await.unwrap();
        assert!(closed.is_none());

        let config = WebSocketClientConfig::new(server.ws_url())
            .with_connect_timeout(Duration::from_millis(500));
        assert!(WebSocketConnector.open_raw(&config).await.is_err());
    }

    #[tokio::test]
    async fn test_transport_close_reaches_server_side() {
        let server = open_server(ServerOptions::new(AllowAllOrigins)).await;
        let mut events = server.take_events().unwrap();

        let raw = WebSocketConnector
            .open_raw(&WebSocketClientConfig::new(server.ws_url()))
            .await
            .unwrap();
        let client = WebSocketConnector.wrap(raw, JsonRecordFormat);

        let ServerEvent::Connection(inbound) = next_server_event(&mut events).await else {
            panic!("expected a connection");
        };
        let mut inbound_events = inbound.take_events().unwrap();

        client.end();

        let event = timeout(Duration::from_secs(2), inbound_events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, TransportEvent::Close));
    }
}
