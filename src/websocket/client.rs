//! Client-side WebSocket connection factory.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, connect_async_with_config};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::transport::ConnectionFactory;

use super::config::WebSocketClientConfig;
use super::raw::WsRawConnection;

// ============================================================================
// Types
// ============================================================================

/// Raw connection produced by [`WebSocketConnector`].
pub type ClientRawConnection = WsRawConnection<MaybeTlsStream<TcpStream>>;

// ============================================================================
// WebSocketConnector
// ============================================================================

/// Opens outbound WebSocket connections negotiating
/// [`PROTOCOL_NAME`](super::PROTOCOL_NAME).
///
/// # Example
///
/// ```ignore
/// use packet_transport::protocol::JsonRecordFormat;
/// use packet_transport::transport::ConnectionFactory;
/// use packet_transport::websocket::{WebSocketClientConfig, WebSocketConnector};
///
/// let config = WebSocketClientConfig::new("ws://127.0.0.1:8080");
/// let raw = WebSocketConnector.open_raw(&config).await?;
/// let transport = WebSocketConnector.wrap(raw, JsonRecordFormat);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    async fn handshake(config: &WebSocketClientConfig) -> Result<ClientRawConnection> {
        let request = config.client_request()?;

        let (stream, response) =
            connect_async_with_config(request, Some(config.ws_config()), config.nodelay)
                .await
                .map_err(|e| Error::connection(format!("WebSocket handshake failed: {e}")))?;

        debug!(status = %response.status(), url = %config.url, "WebSocket handshake completed");

        let remote_addr = match stream.get_ref() {
            MaybeTlsStream::Plain(tcp) => tcp.peer_addr().ok(),
            _ => None,
        };

        Ok(WsRawConnection::new(stream, remote_addr))
    }
}

#[async_trait]
impl ConnectionFactory for WebSocketConnector {
    type Config = WebSocketClientConfig;
    type Raw = ClientRawConnection;

    async fn open_raw(&self, config: &WebSocketClientConfig) -> Result<ClientRawConnection> {
        let raw = match config.connect_timeout {
            Some(limit) => timeout(limit, Self::handshake(config))
                .await
                .map_err(|_| Error::connection_timeout(limit.as_millis() as u64))??,
            None => Self::handshake(config).await?,
        };

        info!(url = %config.url, "WebSocket connection established");
        Ok(raw)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_invalid_url_is_config_error() {
        let config = WebSocketClientConfig::new("http://127.0.0.1:1");
        let err = WebSocketConnector.open_raw(&config).await.unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[tokio::test]
    async fn test_refused_is_connection_error() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = WebSocketClientConfig::new(format!("ws://127.0.0.1:{port}"));
        let err = WebSocketConnector.open_raw(&config).await.unwrap_err();
        assert!(err.is_connection_error());
    }

    #[tokio::test]
    async fn test_connect_timeout() {
        // Accepts TCP but never answers the upgrade.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _hold = tokio::spawn(async move {
            let _conn = listener.accept().await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let config = WebSocketClientConfig::new(format!("ws://127.0.0.1:{port}"))
            .with_connect_timeout(Duration::from_millis(100));
        let err = WebSocketConnector.open_raw(&config).await.unwrap_err();

        assert!(err.is_timeout());
        assert!(matches!(err, Error::ConnectionTimeout { timeout_ms: 100 }));
    }
}
