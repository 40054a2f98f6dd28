//! Connection factory protocol.
//!
//! Separates "how a raw connection of substrate X is opened" from "how a raw
//! connection becomes a [`Transport`]", so that [`connect`] and
//! [`connect_and_introspect`] work the same for every substrate.
//!
//! # Flow
//!
//! ```text
//! open_raw(config) ──► RawConnection ──► wrap() ──► Transport
//!                                                     │
//!                          SessionClient::handshake ◄─┘
//!                                   │
//!                          SessionClient::introspect (connect_and_introspect)
//! ```

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::Result;
use crate::protocol::RecordFormat;

use super::Transport;
use super::raw::RawConnection;

// ============================================================================
// ConnectionFactory
// ============================================================================

/// Opens raw connections of one substrate and wraps them into transports.
///
/// One factory value is reused for every connection attempt of its kind.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Substrate-specific client configuration.
    type Config: Send + Sync;

    /// Raw connection produced by this substrate.
    type Raw: RawConnection;

    /// Opens one raw connection.
    ///
    /// Resolves exactly once. Dropping the future abandons the attempt.
    ///
    /// # Errors
    ///
    /// Returns a connect error (DNS, TCP, TLS, handshake) for this attempt
    /// only. No retry is made.
    async fn open_raw(&self, config: &Self::Config) -> Result<Self::Raw>;

    /// Wraps a raw connection. Performs no I/O and never fails.
    fn wrap<F: RecordFormat>(&self, raw: Self::Raw, format: F) -> Transport<F> {
        Transport::new(raw, format)
    }
}

// ============================================================================
// SessionClient
// ============================================================================

/// The session layer that takes over a freshly connected transport.
#[async_trait]
pub trait SessionClient<F: RecordFormat>: Send + Sync {
    /// Established session.
    type Session: Send + Sync;

    /// Result of interface introspection.
    type Api: Send;

    /// Runs the application handshake over `transport`.
    async fn handshake(&self, app_name: &str, transport: Transport<F>) -> Result<Self::Session>;

    /// Asks the remote side for the given interfaces.
    async fn introspect(
        &self,
        session: &Self::Session,
        interfaces: &[String],
    ) -> Result<Self::Api>;
}

// ============================================================================
// Entry Points
// ============================================================================

/// Opens a raw connection, wraps it and hands it to the session layer.
///
/// # Errors
///
/// Returns the connect error of this attempt, or the handshake error.
pub async fn connect<Fac, C, F>(
    factory: &Fac,
    app_name: &str,
    client: &C,
    config: &Fac::Config,
    format: F,
) -> Result<C::Session>
where
    Fac: ConnectionFactory,
    C: SessionClient<F>,
    F: RecordFormat,
{
    let raw = factory.open_raw(config).await.inspect_err(|e| {
        warn!(app_name, error = %e, "Connect attempt failed");
    })?;

    let transport = factory.wrap(raw, format);
    debug!(id = %transport.id(), app_name, "Transport connected, starting handshake");

    client.handshake(app_name, transport).await
}

/// Like [`connect`], then introspects `interfaces` on the new session.
///
/// # Errors
///
/// Returns the connect, handshake or introspection error.
pub async fn connect_and_introspect<Fac, C, F>(
    factory: &Fac,
    app_name: &str,
    client: &C,
    interfaces: &[String],
    config: &Fac::Config,
    format: F,
) -> Result<(C::Session, C::Api)>
where
    Fac: ConnectionFactory,
    C: SessionClient<F>,
    F: RecordFormat,
{
    let session = connect(factory, app_name, client, config, format).await?;
    let api = client.introspect(&session, interfaces).await?;
    Ok((session, api))
}

// ============================================================================
// Tests
// ============================================================================
