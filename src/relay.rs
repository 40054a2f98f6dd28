//! Event relay between channels.
//!
//! Splices events from one source onto another event surface, optionally
//! renaming them on the way. In this crate a "rename" is a mapping from the
//! source event type into the destination event type.

// ============================================================================
// Imports
// ============================================================================

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

// ============================================================================
// Relay
// ============================================================================

/// Forwards every event from `from` to `to`, converting it with `rename`.
///
/// The relay task ends when either side closes.
pub fn forward_event<E, T, M>(
    mut from: mpsc::UnboundedReceiver<E>,
    to: mpsc::UnboundedSender<T>,
    rename: M,
) -> JoinHandle<()>
where
    E: Send + 'static,
    T: Send + 'static,
    M: Fn(E) -> T + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(event) = from.recv().await {
            if to.send(rename(event)).is_err() {
                trace!("Relay destination closed");
                break;
            }
        }
    })
}

// ============================================================================
// Tests
// ============================================================================
