//! WebSocket client and server configuration.
//!
//! Substrate tuning is passed straight through to tungstenite; everything
//! else here is what the connector and acceptor need to do their job.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use packet_transport::websocket::{AllowedOrigins, ServerOptions, WebSocketClientConfig};
//!
//! let client = WebSocketClientConfig::new("ws://127.0.0.1:8080")
//!     .with_origin("https://app.example")
//!     .with_connect_timeout(Duration::from_secs(5));
//!
//! let server = ServerOptions::new(AllowedOrigins::new(["https://app.example"]))
//!     .with_max_message_size(1 << 20);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::{
    HeaderName, HeaderValue, ORIGIN, SEC_WEBSOCKET_PROTOCOL,
};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use url::Url;

use crate::error::{Error, Result};

use super::PROTOCOL_NAME;
use super::origin::OriginPolicy;

// ============================================================================
// Constants
// ============================================================================

/// Default limit for one inbound handshake (request head and upgrade).
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Substrate limits
// ============================================================================

/// Builds tungstenite's config, overriding only the limits that were set.
fn substrate_config(
    max_message_size: Option<usize>,
    max_frame_size: Option<usize>,
) -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    if let Some(size) = max_message_size {
        config = config.max_message_size(Some(size));
    }
    if let Some(size) = max_frame_size {
        config = config.max_frame_size(Some(size));
    }
    config
}

// ============================================================================
// WebSocketClientConfig
// ============================================================================

/// Configuration for one outbound WebSocket connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSocketClientConfig {
    /// Server URL (`ws://` or `wss://`).
    pub url: String,

    /// `Origin` header to declare.
    pub origin: Option<String>,

    /// Extra request headers.
    pub headers: Vec<(String, String)>,

    /// Abandon the attempt after this long. `None` waits for the substrate.
    pub connect_timeout: Option<Duration>,

    /// Maximum inbound message size.
    pub max_message_size: Option<usize>,

    /// Maximum inbound frame size.
    pub max_frame_size: Option<usize>,

    /// Disable Nagle's algorithm on the TCP socket.
    pub nodelay: bool,
}

impl WebSocketClientConfig {
    /// Creates a configuration for `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            origin: None,
            headers: Vec::new(),
            connect_timeout: None,
            max_message_size: None,
            max_frame_size: None,
            nodelay: false,
        }
    }

    /// Declares an `Origin` header.
    #[inline]
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Adds a request header.
    ///
    /// A `Sec-WebSocket-Protocol` header is ignored; the subprotocol is
    /// always [`PROTOCOL_NAME`].
    #[inline]
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets a connect timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets the maximum inbound message size.
    #[inline]
    #[must_use]
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = Some(size);
        self
    }

    /// Sets the maximum inbound frame size.
    #[inline]
    #[must_use]
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = Some(size);
        self
    }

    /// Disables Nagle's algorithm.
    #[inline]
    #[must_use]
    pub fn with_nodelay(mut self) -> Self {
        self.nodelay = true;
        self
    }

    /// Parses and checks the URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a malformed URL or a non-WebSocket
    /// scheme.
    pub fn parsed_url(&self) -> Result<Url> {
        let url = Url::parse(&self.url)
            .map_err(|e| Error::config(format!("invalid URL '{}': {e}", self.url)))?;

        match url.scheme() {
            "ws" | "wss" => Ok(url),
            scheme => Err(Error::config(format!(
                "unsupported scheme '{scheme}', expected ws or wss"
            ))),
        }
    }

    /// Builds the upgrade request.
    ///
    /// The subprotocol header is forced to [`PROTOCOL_NAME`] whatever the
    /// caller configured.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an invalid URL or header.
    pub fn client_request(&self) -> Result<Request> {
        let url = self.parsed_url()?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::config(format!("invalid WebSocket request: {e}")))?;

        let headers = request.headers_mut();

        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::config(format!("invalid header name '{name}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::config(format!("invalid value for header '{name}': {e}")))?;
            headers.append(name, value);
        }

        if let Some(origin) = &self.origin {
            let value = HeaderValue::from_str(origin)
                .map_err(|e| Error::config(format!("invalid origin '{origin}': {e}")))?;
            headers.insert(ORIGIN, value);
        }

        headers.insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(PROTOCOL_NAME));

        Ok(request)
    }

    pub(crate) fn ws_config(&self) -> WebSocketConfig {
        substrate_config(self.max_message_size, self.max_frame_size)
    }
}

// ============================================================================
// ServerOptions
// ============================================================================

/// Configuration of a listening WebSocket server.
///
/// The origin policy is mandatory; pass
/// [`AllowAllOrigins`](super::AllowAllOrigins) to accept every origin.
#[derive(Clone)]
pub struct ServerOptions {
    origin_policy: Arc<dyn OriginPolicy>,
    max_message_size: Option<usize>,
    max_frame_size: Option<usize>,
    handshake_timeout: Duration,
}

impl ServerOptions {
    /// Creates options with the given origin policy.
    #[must_use]
    pub fn new(origin_policy: impl OriginPolicy) -> Self {
        Self {
            origin_policy: Arc::new(origin_policy),
            max_message_size: None,
            max_frame_size: None,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// Sets the maximum inbound message size.
    #[inline]
    #[must_use]
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = Some(size);
        self
    }

    /// Sets the maximum inbound frame size.
    #[inline]
    #[must_use]
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = Some(size);
        self
    }

    /// Sets the time one inbound handshake may take.
    #[inline]
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Returns the origin policy.
    #[inline]
    #[must_use]
    pub fn origin_policy(&self) -> &dyn OriginPolicy {
        self.origin_policy.as_ref()
    }

    /// Returns the handshake timeout.
    #[inline]
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    pub(crate) fn ws_config(&self) -> WebSocketConfig {
        substrate_config(self.max_message_size, self.max_frame_size)
    }
}

impl fmt::Debug for ServerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerOptions")
            .field("max_message_size", &self.max_message_size)
            .field("max_frame_size", &self.max_frame_size)
            .field("handshake_timeout", &self.handshake_timeout)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::websocket::{AllowAllOrigins, AllowedOrigins};

    #[test]
    fn test_client_defaults() {
        let config = WebSocketClientConfig::new("ws://127.0.0.1:9000");
        assert_eq!(config.origin, None);
        assert_eq!(config.connect_timeout, None);
        assert!(!config.nodelay);
    }

    #[test]
    fn test_protocol_header_is_forced() {
        let request = WebSocketClientConfig::new("ws://127.0.0.1:9000/path")
            .with_header("Sec-WebSocket-Protocol", "chat")
            .with_header("X-Trace", "abc")
            .client_request()
            .unwrap();

        let protocols: Vec<_> = request
            .headers()
            .get_all(SEC_WEBSOCKET_PROTOCOL)
            .iter()
            .collect();
        assert_eq!(protocols, vec![PROTOCOL_NAME]);
        assert_eq!(request.headers()["x-trace"], "abc");
        assert_eq!(request.uri().path(), "/path");
    }

    #[test]
    fn test_origin_header() {
        let request = WebSocketClientConfig::new("ws://localhost:1")
            .with_origin("https://app.example")
            .client_request()
            .unwrap();
        assert_eq!(request.headers()[ORIGIN], "https://app.example");
    }

    #[test]
    fn test_rejects_non_websocket_scheme() {
        let err = WebSocketClientConfig::new("http://localhost:1")
            .client_request()
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));

        let err = WebSocketClientConfig::new("not a url").parsed_url().unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_rejects_invalid_header() {
        let err = WebSocketClientConfig::new("ws://localhost:1")
            .with_header("bad header", "x")
            .client_request()
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_limits_pass_through() {
        let config = WebSocketClientConfig::new("ws://localhost:1")
            .with_max_message_size(1024)
            .with_max_frame_size(512)
            .ws_config();
        assert_eq!(config.max_message_size, Some(1024));
        assert_eq!(config.max_frame_size, Some(512));
    }

    #[test]
    fn test_server_options() {
        let options = ServerOptions::new(AllowedOrigins::new(["https://a.example"]))
            .with_handshake_timeout(Duration::from_secs(3));

        assert_eq!(options.handshake_timeout(), Duration::from_secs(3));
        assert!(options.origin_policy().is_allowed(Some("https://a.example")));
        assert!(!options.origin_policy().is_allowed(None));

        let open = ServerOptions::new(AllowAllOrigins);
        assert!(open.origin_policy().is_allowed(None));
        assert_eq!(open.handshake_timeout(), DEFAULT_HANDSHAKE_TIMEOUT);
    }
}
