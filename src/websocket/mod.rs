//! WebSocket substrate.
//!
//! Client factory, server acceptor and the raw connection they both produce.
//! Both sides negotiate the [`PROTOCOL_NAME`] subprotocol; a peer that does
//! not offer it is refused.
//!
//! | Module | Description |
//! |--------|-------------|
//! | `client` | [`WebSocketConnector`], the client connection factory |
//! | `config` | [`WebSocketClientConfig`] and [`ServerOptions`] |
//! | `origin` | Origin check policies |
//! | `raw` | [`WsRawConnection`] |
//! | `server` | [`WebSocketServer`] acceptor |

// ============================================================================
// Submodules
// ============================================================================

pub mod client;
pub mod config;
pub mod origin;
pub mod raw;
pub mod server;

mod upgrade;

// ============================================================================
// Re-exports
// ============================================================================

pub use client::{ClientRawConnection, WebSocketConnector};
pub use config::{ServerOptions, WebSocketClientConfig};
pub use origin::{AllowAllOrigins, AllowedOrigins, OriginPolicy};
pub use raw::WsRawConnection;
pub use server::{ServerEvents, WebSocketServer};

// ============================================================================
// Imports
// ============================================================================

use crate::error::Result;
use crate::protocol::RecordFormat;
use crate::transport::{self, SessionClient};

// ============================================================================
// Constants
// ============================================================================

/// Application subprotocol negotiated on every WebSocket connection.
pub const PROTOCOL_NAME: &str = "jstp";

// ============================================================================
// Entry Points
// ============================================================================

/// Connects over WebSocket and runs the session handshake.
///
/// Shorthand for [`transport::connect`] with [`WebSocketConnector`].
///
/// # Errors
///
/// Returns the connect error of this attempt, or the handshake error.
pub async fn connect<C, F>(
    app_name: &str,
    client: &C,
    config: &WebSocketClientConfig,
    format: F,
) -> Result<C::Session>
where
    C: SessionClient<F>,
    F: RecordFormat,
{
    transport::connect(&WebSocketConnector, app_name, client, config, format).await
}

/// Connects over WebSocket, runs the handshake and introspects `interfaces`.
///
/// # Errors
///
/// Returns the connect, handshake or introspection error.
pub async fn connect_and_introspect<C, F>(
    app_name: &str,
    client: &C,
    interfaces: &[String],
    config: &WebSocketClientConfig,
    format: F,
) -> Result<(C::Session, C::Api)>
where
    C: SessionClient<F>,
    F: RecordFormat,
{
    transport::connect_and_introspect(
        &WebSocketConnector,
        app_name,
        client,
        interfaces,
        config,
        format,
    )
    .await
}
