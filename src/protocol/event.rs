//! Transport and server event types.
//!
//! [`TransportEvent`] is the entire upward contract of a transport. Every
//! substrate emits exactly these three events with the same meaning.

// ============================================================================
// Imports
// ============================================================================

use crate::error::Error;
use crate::protocol::record::RecordFormat;
use crate::transport::Transport;

// ============================================================================
// TransportEvent
// ============================================================================

/// An event emitted by a [`Transport`].
///
/// Ordering for one transport follows the substrate: packets and parse errors
/// appear in the order frames arrived, and `Close` is always last.
#[derive(Debug)]
pub enum TransportEvent<R> {
    /// One inbound frame parsed into a record.
    Packet(R),

    /// A parse failure (connection stays open) or a raw fault (connection
    /// is torn down and `Close` follows).
    Error(Error),

    /// The transport reached its terminal state.
    Close,
}

impl<R> TransportEvent<R> {
    /// Returns the event name.
    #[inline]
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Packet(_) => "packet",
            Self::Error(_) => "error",
            Self::Close => "close",
        }
    }

    /// Returns `true` for the terminal event.
    #[inline]
    #[must_use]
    pub const fn is_close(&self) -> bool {
        matches!(self, Self::Close)
    }

    /// Returns the record if this is a packet.
    #[inline]
    #[must_use]
    pub fn into_packet(self) -> Option<R> {
        match self {
            Self::Packet(record) => Some(record),
            _ => None,
        }
    }
}

// ============================================================================
// ServerEvent
// ============================================================================

/// An event emitted by a listening server.
#[derive(Debug)]
pub enum ServerEvent<F: RecordFormat> {
    /// A policy-approved inbound connection, already wrapped.
    Connection(Transport<F>),

    /// A handshake fault on one inbound connection.
    ///
    /// Origin rejections are policy outcomes and never appear here.
    Error(Error),
}

impl<F: RecordFormat> ServerEvent<F> {
    /// Returns the event name.
    #[inline]
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Error(_) => "error",
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
