//! In-process substrate.
//!
//! Two raw connections joined by channels. Honours the same contract as the
//! network substrates, so a [`Transport`](super::Transport) cannot tell the
//! difference. Useful for tests and for wiring components inside one process.

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{Error, Result};

use super::raw::{RawConnection, RawFrame, RawReceiver, RawSender, RawSignal};

// ============================================================================
// Types
// ============================================================================

/// What travels between the two ends.
#[derive(Debug)]
enum Wire {
    Frame(RawFrame),
    Close,
}

// ============================================================================
// pair
// ============================================================================

/// Creates two connected raw connections.
///
/// A frame sent on one end arrives on the other. Closing one end makes the
/// other observe `Closed`; dropping one end does the same.
#[must_use]
pub fn pair() -> (MemoryRawConnection, MemoryRawConnection) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();

    (
        MemoryRawConnection {
            tx: a_tx,
            rx: b_rx,
            remote_addr: None,
        },
        MemoryRawConnection {
            tx: b_tx,
            rx: a_rx,
            remote_addr: None,
        },
    )
}

// ============================================================================
// MemoryRawConnection
// ============================================================================

/// One end of an in-process connection.
#[derive(Debug)]
pub struct MemoryRawConnection {
    tx: mpsc::UnboundedSender<Wire>,
    rx: mpsc::UnboundedReceiver<Wire>,
    remote_addr: Option<SocketAddr>,
}

impl MemoryRawConnection {
    /// Sets the address reported as the peer's.
    #[inline]
    #[must_use]
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }
}

impl RawConnection for MemoryRawConnection {
    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    fn split(self) -> (Box<dyn RawSender>, Box<dyn RawReceiver>) {
        (
            Box::new(MemorySender { tx: self.tx }),
            Box::new(MemoryReceiver {
                rx: self.rx,
                done: false,
            }),
        )
    }
}

// ============================================================================
// Halves
// ============================================================================

struct MemorySender {
    tx: mpsc::UnboundedSender<Wire>,
}

#[async_trait]
impl RawSender for MemorySender {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.tx
            .send(Wire::Frame(RawFrame::Text(text)))
            .map_err(|_| Error::connection("in-process peer is gone"))
    }

    async fn close(&mut self) -> Result<()> {
        // Peer already gone means the session is closed anyway.
        let _ = self.tx.send(Wire::Close);
        Ok(())
    }

    fn abort(self: Box<Self>) {}
}

struct MemoryReceiver {
    rx: mpsc::UnboundedReceiver<Wire>,
    done: bool,
}

#[async_trait]
impl RawReceiver for MemoryReceiver {
    async fn next_signal(&mut self) -> RawSignal {
        if self.done {
            return RawSignal::Closed;
        }

        match self.rx.recv().await {
            Some(Wire::Frame(frame)) => RawSignal::Message(frame),
            Some(Wire::Close) | None => {
                self.done = true;
                RawSignal::Closed
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
