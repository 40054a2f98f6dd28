//! Raw connection capability.
//!
//! A raw connection is one live substrate session before protocol wrapping.
//! Each substrate provides one variant; the [`Transport`](super::Transport)
//! is written against these traits only.

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;

use async_trait::async_trait;

use crate::error::{Error, Result};

// ============================================================================
// RawFrame
// ============================================================================

/// One inbound frame as delivered by the substrate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFrame {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
}

impl RawFrame {
    /// Returns the payload as text.
    ///
    /// Binary payloads are decoded as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
            },
        }
    }
}

// ============================================================================
// RawSignal
// ============================================================================

/// What a raw connection reports to its owner.
#[derive(Debug)]
pub enum RawSignal {
    /// A frame arrived.
    Message(RawFrame),
    /// The session ended (either side closed it).
    Closed,
    /// The session failed. It must not be used afterwards.
    Faulted(Error),
}

// ============================================================================
// Traits
// ============================================================================

/// Outbound half of a raw connection.
#[async_trait]
pub trait RawSender: Send + 'static {
    /// Writes one text frame.
    async fn send_text(&mut self, text: String) -> Result<()>;

    /// Starts a graceful close.
    async fn close(&mut self) -> Result<()>;

    /// Drops the session without a close handshake.
    fn abort(self: Box<Self>);
}

/// Inbound half of a raw connection.
#[async_trait]
pub trait RawReceiver: Send + 'static {
    /// Waits for the next signal.
    ///
    /// Must be cancel-safe: dropping the future loses no frame. After
    /// `Closed` or `Faulted` the receiver keeps returning `Closed`.
    async fn next_signal(&mut self) -> RawSignal;
}

/// A substrate session that can be owned by a transport.
pub trait RawConnection: Send + 'static {
    /// Peer address as reported by the substrate, if it has one.
    fn remote_addr(&self) -> Option<SocketAddr>;

    /// Splits into independently usable halves.
    fn split(self) -> (Box<dyn RawSender>, Box<dyn RawReceiver>);
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn test_text_frame_passthrough() {
        assert_eq!(RawFrame::Text("[1]".into()).into_text(), "[1]");
    }

    #[test]
    fn test_binary_frame_decoded() {
        assert_eq!(RawFrame::Binary(b"{\"a\":1}".to_vec()).into_text(), "{\"a\":1}");
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let text = RawFrame::Binary(vec![b'o', 0xff, b'k']).into_text();
        assert_eq!(text, "o\u{fffd}k");
    }

    proptest! {
        #[test]
        fn prop_valid_utf8_binary_matches_text(s in ".*") {
            prop_assert_eq!(RawFrame::Binary(s.clone().into_bytes()).into_text(), s);
        }

        #[test]
        fn prop_inbound_and_outbound_coercion_agree(
            bytes in proptest::collection::vec(any::<u8>(), 0..256),
        ) {
            let outbound = crate::transport::Frame::from(bytes.as_slice()).into_text();
            prop_assert_eq!(RawFrame::Binary(bytes).into_text(), outbound);
        }
    }
}
