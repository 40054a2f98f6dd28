//! Packet-level protocol types.
//!
//! This module defines the boundary where frame payloads become application
//! records, and the events every transport emits upward.
//!
//! # Event Contract
//!
//! | Event | Emitted by | Meaning |
//! |-------|------------|---------|
//! | `packet` | Transport | One frame parsed into a record |
//! | `error` | Transport | Parse failure (non-fatal) or raw fault (fatal) |
//! | `close` | Transport | Terminal, emitted exactly once |
//! | `connection` | Server | A policy-approved inbound transport |
//! | `error` | Server | A per-connection handshake fault |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `event` | Transport and server events |
//! | `record` | Record format boundary |

// ============================================================================
// Submodules
// ============================================================================

/// Transport and server event types.
pub mod event;

/// Application record format boundary.
pub mod record;

// ============================================================================
// Re-exports
// ============================================================================

pub use event::{ServerEvent, TransportEvent};
pub use record::{JsonRecordFormat, RecordFormat, TypedJsonFormat};
