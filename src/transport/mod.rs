//! Transport abstraction layer.
//!
//! A [`Transport`] turns one raw substrate session into a uniform packet
//! channel. Upper layers see the same `packet` / `error` / `close` events
//! whichever substrate carries the bytes.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   open_raw    ┌────────────────┐    wrap    ┌───────────┐
//! │ ConnectionFactory│──────────────►│ RawConnection  │───────────►│ Transport │
//! └──────────────────┘               │ (ws / memory)  │            │ event loop│
//! ┌──────────────────┐    accept     │                │            │           │
//! │ WebSocketServer  │──────────────►│                │            │           │
//! └──────────────────┘               └────────────────┘            └───────────┘
//!                                                                   │ packet
//!                                                                   │ error
//!                                                                   ▼ close
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | Transport and its event loop |
//! | `factory` | Connection factory protocol and connect entry points |
//! | `memory` | In-process substrate |
//! | `raw` | Raw connection capability traits |

// ============================================================================
// Submodules
// ============================================================================

/// Transport and its event loop.
pub mod connection;

/// Connection factory protocol.
pub mod factory;

/// In-process substrate.
pub mod memory;

/// Raw connection capability.
pub mod raw;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{Frame, Transport, TransportEvents};
pub use factory::{ConnectionFactory, SessionClient, connect, connect_and_introspect};
pub use raw::{RawConnection, RawFrame, RawReceiver, RawSender, RawSignal};
