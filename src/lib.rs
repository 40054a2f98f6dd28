//! Packet Transport - uniform packet channels over heterogeneous substrates.
//!
//! This library turns framed network connections into one small,
//! protocol-agnostic contract: a [`Transport`] that emits parsed records,
//! errors and a single close, and accepts outbound frames.
//!
//! # Architecture
//!
//! ```text
//! WebSocketServer ─┐                              ┌─► TransportEvent::Packet
//!                  ├─► RawConnection ─► Transport ├─► TransportEvent::Error
//! ConnectionFactory┘                              └─► TransportEvent::Close
//! ```
//!
//! Key design principles:
//!
//! - A raw connection is exclusively owned by its transport's event loop
//! - Inbound frames are parsed in arrival order, never concurrently
//! - Parse failures are reported and the connection stays open
//! - Origin policies are explicit; rejection is not an error
//!
//! # Quick Start
//!
//! ```no_run
//! use packet_transport::protocol::{JsonRecordFormat, ServerEvent, TransportEvent};
//! use packet_transport::websocket::{AllowAllOrigins, ServerOptions, WebSocketServer};
//! use packet_transport::Result;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let server = WebSocketServer::bind(
//!         "127.0.0.1:8080",
//!         ServerOptions::new(AllowAllOrigins),
//!         JsonRecordFormat,
//!     )
//!     .await?;
//!
//!     let Some(mut events) = server.take_events() else {
//!         return Ok(());
//!     };
//!
//!     while let Some(ServerEvent::Connection(transport)) = events.recv().await {
//!         let Some(mut packets) = transport.take_events() else {
//!             continue;
//!         };
//!         tokio::spawn(async move {
//!             while let Some(TransportEvent::Packet(record)) = packets.recv().await {
//!                 let _ = transport.send_record(&record);
//!             }
//!         });
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Connection identifiers |
//! | [`protocol`] | Record formats and event types |
//! | [`relay`] | Event forwarding between channels |
//! | [`transport`] | [`Transport`], raw connections, connection factories |
//! | [`websocket`] | WebSocket client factory and server acceptor |

// ============================================================================
// Modules
// ============================================================================

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Record formats and the events transports and servers emit.
pub mod protocol;

/// Event forwarding between channels.
pub mod relay;

/// Transport abstraction layer.
///
/// The uniform connection, the raw connection capability every substrate
/// implements, and the generic connection factory protocol.
pub mod transport;

/// WebSocket substrate.
pub mod websocket;

// ============================================================================
// Re-exports
// ============================================================================

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::ConnectionId;

// Protocol types
pub use protocol::{JsonRecordFormat, RecordFormat, ServerEvent, TransportEvent};

// Transport types
pub use transport::{ConnectionFactory, Frame, SessionClient, Transport, TransportEvents};

// WebSocket types
pub use websocket::{PROTOCOL_NAME, ServerOptions, WebSocketClientConfig, WebSocketServer};
