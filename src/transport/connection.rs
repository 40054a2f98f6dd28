//! Transport: the uniform envelope around one raw connection.
//!
//! This is the single point where frame payloads are parsed into records
//! (inbound) and application payloads are written as frames (outbound).
//!
//! # Event Loop
//!
//! Construction spawns a tokio task that owns both raw halves and handles:
//!
//! - Inbound frames, parsed in arrival order into `packet` or `error` events
//! - Outbound frames queued by [`Transport::send`]
//! - Graceful close requested by [`Transport::end`]
//! - Forced closure when the raw connection faults
//!
//! The task emits `close` exactly once, as the last event, and then exits.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::protocol::{JsonRecordFormat, RecordFormat, TransportEvent};

use super::raw::{RawConnection, RawFrame, RawReceiver, RawSender, RawSignal};

// ============================================================================
// Constants
// ============================================================================

/// How long a graceful close waits for the peer before dropping the session.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Types
// ============================================================================

type EventSender<R> = mpsc::UnboundedSender<TransportEvent<R>>;

/// Internal commands for the event loop.
enum TransportCommand {
    /// Write one text frame.
    Send(String),
    /// Close the raw connection gracefully.
    End,
}

/// Why the main loop stopped.
enum Exit {
    /// The raw connection reported `Closed`.
    RemoteClosed,
    /// The raw connection failed, or a write failed.
    Faulted(Error),
    /// `end` was called or every handle was dropped.
    Ending,
}

// ============================================================================
// Frame
// ============================================================================

/// One outbound, already-serialized application frame.
///
/// Byte input is decoded as UTF-8 (invalid sequences replaced) because the
/// substrates only carry text frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame(String);

impl Frame {
    /// Returns the frame text.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the frame and returns its text.
    #[inline]
    #[must_use]
    pub fn into_text(self) -> String {
        self.0
    }
}

impl From<String> for Frame {
    fn from(text: String) -> Self {
        Self(text)
    }
}

impl From<&str> for Frame {
    fn from(text: &str) -> Self {
        Self(text.to_owned())
    }
}

impl From<&String> for Frame {
    fn from(text: &String) -> Self {
        Self(text.clone())
    }
}

impl From<Vec<u8>> for Frame {
    fn from(bytes: Vec<u8>) -> Self {
        Self(RawFrame::Binary(bytes).into_text())
    }
}

impl From<&[u8]> for Frame {
    fn from(bytes: &[u8]) -> Self {
        Self(String::from_utf8_lossy(bytes).into_owned())
    }
}

// ============================================================================
// TransportEvents
// ============================================================================

/// Receiving end of a transport's events.
pub struct TransportEvents<R> {
    rx: mpsc::UnboundedReceiver<TransportEvent<R>>,
}

impl<R> TransportEvents<R> {
    /// Waits for the next event.
    ///
    /// Returns `None` after `Close` has been received.
    pub async fn recv(&mut self) -> Option<TransportEvent<R>> {
        self.rx.recv().await
    }

    /// Returns an already queued event without waiting.
    pub fn try_recv(&mut self) -> Option<TransportEvent<R>> {
        self.rx.try_recv().ok()
    }
}

impl<R> fmt::Debug for TransportEvents<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportEvents").finish_non_exhaustive()
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Uniform connection over one raw connection.
///
/// Cloning yields another handle to the same connection. The raw connection
/// is owned by the internal event loop; nothing else touches it.
///
/// # Thread Safety
///
/// `Transport` is `Send + Sync`. All operations are non-blocking.
pub struct Transport<F: RecordFormat = JsonRecordFormat> {
    /// Log correlation identifier.
    id: ConnectionId,
    /// Peer address captured at construction.
    remote_addr: Option<SocketAddr>,
    /// Record format used by `send_record`.
    format: Arc<F>,
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<TransportCommand>,
    /// Set by `end` and by the event loop on exit. Held while queueing
    /// commands so no frame is queued behind `End`.
    closing: Arc<Mutex<bool>>,
    /// Events, until taken.
    events: Arc<Mutex<Option<TransportEvents<F::Record>>>>,
}

impl<F: RecordFormat> Clone for Transport<F> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            remote_addr: self.remote_addr,
            format: Arc::clone(&self.format),
            command_tx: self.command_tx.clone(),
            closing: Arc::clone(&self.closing),
            events: Arc::clone(&self.events),
        }
    }
}

impl<F: RecordFormat> fmt::Debug for Transport<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<F: RecordFormat> Transport<F> {
    /// Wraps a raw connection.
    ///
    /// Performs no I/O and never fails. Spawns the event loop, so it must be
    /// called from within a tokio runtime.
    pub fn new(raw: impl RawConnection, format: F) -> Self {
        let id = ConnectionId::next();
        let remote_addr = raw.remote_addr();
        let (sender, receiver) = raw.split();

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let format = Arc::new(format);
        let closing = Arc::new(Mutex::new(false));

        tokio::spawn(Self::run_event_loop(
            id,
            sender,
            receiver,
            command_rx,
            Arc::clone(&format),
            event_tx,
            Arc::clone(&closing),
        ));

        debug!(%id, ?remote_addr, "Transport created");

        Self {
            id,
            remote_addr,
            format,
            command_tx,
            closing,
            events: Arc::new(Mutex::new(Some(TransportEvents { rx: event_rx }))),
        }
    }

    /// Returns the connection identifier.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the peer address captured when the transport was created.
    #[inline]
    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Returns `true` once `end` was called or the connection went away.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.closing.lock()
    }

    /// Takes the event receiver.
    ///
    /// Returns `None` if it was already taken through any handle. Events
    /// emitted before this call are queued, not lost.
    pub fn take_events(&self) -> Option<TransportEvents<F::Record>> {
        self.events.lock().take()
    }

    /// Sends one frame.
    ///
    /// One call writes exactly one frame. Write failures are reported later
    /// as an `error` event, not here.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] after `end` or once the
    /// connection has closed.
    pub fn send(&self, data: impl Into<Frame>) -> Result<()> {
        let text = data.into().into_text();
        let closing = self.closing.lock();
        if *closing {
            return Err(Error::ConnectionClosed);
        }

        self.command_tx
            .send(TransportCommand::Send(text))
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Serializes a record with the transport's format and sends it.
    ///
    /// # Errors
    ///
    /// Returns serialization errors, or [`Error::ConnectionClosed`].
    pub fn send_record(&self, record: &F::Record) -> Result<()> {
        let text = self.format.serialize(record)?;
        self.send(text)
    }

    /// Closes the connection.
    ///
    /// Safe to call any number of times; only the first call has an effect.
    pub fn end(&self) {
        self.finish(None);
    }

    /// Sends a final frame, then closes the connection.
    ///
    /// Like [`end`](Self::end), only the first call has an effect; later
    /// calls do not send `data`.
    pub fn end_with(&self, data: impl Into<Frame>) {
        self.finish(Some(data.into()));
    }

    fn finish(&self, data: Option<Frame>) {
        let mut closing = self.closing.lock();
        if *closing {
            trace!(id = %self.id, "Transport already closing");
            return;
        }
        *closing = true;

        if let Some(frame) = data {
            let _ = self
                .command_tx
                .send(TransportCommand::Send(frame.into_text()));
        }

        let _ = self.command_tx.send(TransportCommand::End);
    }
}

// ============================================================================
// Transport - Event Loop
// ============================================================================

impl<F: RecordFormat> Transport<F> {
    async fn run_event_loop(
        id: ConnectionId,
        mut sender: Box<dyn RawSender>,
        mut receiver: Box<dyn RawReceiver>,
        mut command_rx: mpsc::UnboundedReceiver<TransportCommand>,
        format: Arc<F>,
        events: EventSender<F::Record>,
        closing: Arc<Mutex<bool>>,
    ) {
        let exit = loop {
            tokio::select! {
                // Inbound signals from the raw connection
                signal = receiver.next_signal() => {
                    match signal {
                        RawSignal::Message(frame) => {
                            Self::handle_incoming_message(id, frame, &format, &events);
                        }

                        RawSignal::Closed => {
                            debug!(%id, "Raw connection closed");
                            break Exit::RemoteClosed;
                        }

                        RawSignal::Faulted(e) => {
                            break Exit::Faulted(e);
                        }
                    }
                }

                // Commands from transport handles
                command = command_rx.recv() => {
                    match command {
                        Some(TransportCommand::Send(text)) => {
                            if let Err(e) = sender.send_text(text).await {
                                break Exit::Faulted(e);
                            }
                            trace!(%id, "Frame sent");
                        }

                        Some(TransportCommand::End) => {
                            debug!(%id, "End requested");
                            break Exit::Ending;
                        }

                        None => {
                            debug!(%id, "All transport handles dropped");
                            break Exit::Ending;
                        }
                    }
                }
            }
        };

        *closing.lock() = true;

        match exit {
            Exit::RemoteClosed => {
                // Flushes the substrate's reply to the peer's close.
                match timeout(CLOSE_TIMEOUT, sender.close()).await {
                    Ok(Err(e)) => debug!(%id, error = %e, "Close reply failed"),
                    Err(_) => debug!(%id, "Close reply timed out"),
                    Ok(Ok(())) => {}
                }
                sender.abort();
            }

            Exit::Faulted(e) => {
                warn!(%id, error = %e, "Raw connection faulted, dropping it");
                let _ = events.send(TransportEvent::Error(e));
                sender.abort();
            }

            Exit::Ending => {
                if let Err(e) = sender.close().await {
                    debug!(%id, error = %e, "Close handshake could not be started");
                }

                let drain = Self::drain_until_closed(id, receiver.as_mut(), &format, &events);
                if timeout(CLOSE_TIMEOUT, drain).await.is_err() {
                    debug!(%id, "Peer did not finish close handshake in time");
                }
                sender.abort();
            }
        }

        let _ = events.send(TransportEvent::Close);

        debug!(%id, "Event loop terminated");
    }

    /// Delivers frames that still arrive while the close handshake runs.
    async fn drain_until_closed(
        id: ConnectionId,
        receiver: &mut dyn RawReceiver,
        format: &F,
        events: &EventSender<F::Record>,
    ) {
        loop {
            match receiver.next_signal().await {
                RawSignal::Message(frame) => {
                    Self::handle_incoming_message(id, frame, format, events);
                }
                RawSignal::Closed => break,
                RawSignal::Faulted(e) => {
                    debug!(%id, error = %e, "Raw connection faulted while closing");
                    let _ = events.send(TransportEvent::Error(e));
                    break;
                }
            }
        }
    }

    /// Parses one inbound frame and emits `packet` or `error`.
    fn handle_incoming_message(
        id: ConnectionId,
        frame: RawFrame,
        format: &F,
        events: &EventSender<F::Record>,
    ) {
        let text = frame.into_text();

        match format.parse(&text) {
            Ok(record) => {
                trace!(%id, len = text.len(), "Packet received");
                let _ = events.send(TransportEvent::Packet(record));
            }
            Err(e) => {
                debug!(%id, error = %e, "Failed to parse inbound frame");
                let _ = events.send(TransportEvent::Error(e));
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
