//! End-to-end tests over a loopback WebSocket.
//!
//! Run with `RUST_LOG=packet_transport=debug cargo test --test websocket`
//! to see the transport logs.

use std::sync::Once;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::time::timeout;
use tracing_subscriber::EnvFilter;

use packet_transport::protocol::{JsonRecordFormat, ServerEvent, TransportEvent};
use packet_transport::transport::{SessionClient, TransportEvents};
use packet_transport::websocket::{
    self, AllowAllOrigins, AllowedOrigins, ServerEvents, ServerOptions, WebSocketClientConfig,
    WebSocketServer,
};
use packet_transport::{Error, RecordFormat, Transport};

// ============================================================================
// Fixtures
// ============================================================================

const WAIT: Duration = Duration::from_secs(3);

static TRACING: Once = Once::new();

fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Session layer that performs no handshake of its own.
struct PassThrough;

struct Session {
    transport: Transport,
    events: TransportEvents<Value>,
}

#[async_trait]
impl SessionClient<JsonRecordFormat> for PassThrough {
    type Session = Session;
    type Api = Vec<String>;

    async fn handshake(
        &self,
        _app_name: &str,
        transport: Transport,
    ) -> packet_transport::Result<Session> {
        let events = transport.take_events().ok_or(Error::ConnectionClosed)?;
        Ok(Session { transport, events })
    }

    async fn introspect(
        &self,
        _session: &Session,
        interfaces: &[String],
    ) -> packet_transport::Result<Vec<String>> {
        Ok(interfaces.to_vec())
    }
}

async fn serve(
    options: ServerOptions,
) -> Result<(WebSocketServer, ServerEvents<JsonRecordFormat>)> {
    let server = WebSocketServer::bind("127.0.0.1:0", options, JsonRecordFormat).await?;
    let events = server.take_events().context("server events already taken")?;
    Ok((server, events))
}

async fn accept(events: &mut ServerEvents<JsonRecordFormat>) -> Result<Transport> {
    match timeout(WAIT, events.recv()).await? {
        Some(ServerEvent::Connection(transport)) => Ok(transport),
        Some(ServerEvent::Error(e)) => bail!("server error: {e}"),
        None => bail!("server stopped"),
    }
}

async fn next_event(events: &mut TransportEvents<Value>) -> Result<TransportEvent<Value>> {
    timeout(WAIT, events.recv())
        .await?
        .context("transport events closed")
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn packet_reaches_server_and_close_follows() -> Result<()> {
    init_tracing();
    let (server, mut server_events) = serve(ServerOptions::new(AllowAllOrigins)).await?;

    let config = WebSocketClientConfig::new(server.ws_url());
    let session = websocket::connect("testApp", &PassThrough, &config, JsonRecordFormat).await?;

    let inbound = accept(&mut server_events).await?;
    let mut inbound_events = inbound.take_events().context("inbound events")?;

    let hello = JsonRecordFormat.serialize(&json!("hello"))?;
    session.transport.send(hello)?;

    match next_event(&mut inbound_events).await? {
        TransportEvent::Packet(record) => assert_eq!(record, json!("hello")),
        other => bail!("expected packet, got {}", other.name()),
    }

    session.transport.end();

    assert!(next_event(&mut inbound_events).await?.is_close());
    assert!(inbound.is_closed());
    Ok(())
}

#[tokio::test]
async fn malformed_frame_does_not_close_connection() -> Result<()> {
    init_tracing();
    let (server, mut server_events) = serve(ServerOptions::new(AllowAllOrigins)).await?;

    let config = WebSocketClientConfig::new(server.ws_url());
    let session = websocket::connect("testApp", &PassThrough, &config, JsonRecordFormat).await?;
    let inbound = accept(&mut server_events).await?;
    let mut inbound_events = inbound.take_events().context("inbound events")?;

    session.transport.send("{broken")?;
    session.transport.send(r#"{"event":[-1,"chat"],"message":["hi"]}"#)?;

    match next_event(&mut inbound_events).await? {
        TransportEvent::Error(e) => assert!(e.is_parse_error()),
        other => bail!("expected error, got {}", other.name()),
    }
    match next_event(&mut inbound_events).await? {
        TransportEvent::Packet(record) => assert_eq!(record["message"], json!(["hi"])),
        other => bail!("expected packet, got {}", other.name()),
    }
    assert!(!inbound.is_closed());

    // Server to client works on the same connection.
    inbound.send_record(&json!({ "callback": [1], "ok": [] }))?;
    let mut client_events = session.events;
    match next_event(&mut client_events).await? {
        TransportEvent::Packet(record) => assert_eq!(record["callback"], json!([1])),
        other => bail!("expected packet, got {}", other.name()),
    }
    Ok(())
}

#[tokio::test]
async fn end_twice_sends_one_final_frame() -> Result<()> {
    init_tracing();
    let (server, mut server_events) = serve(ServerOptions::new(AllowAllOrigins)).await?;

    let config = WebSocketClientConfig::new(server.ws_url());
    let session = websocket::connect("testApp", &PassThrough, &config, JsonRecordFormat).await?;
    let inbound = accept(&mut server_events).await?;
    let mut inbound_events = inbound.take_events().context("inbound events")?;

    session.transport.end_with("[\"bye\"]");
    session.transport.end_with("[\"bye again\"]");
    assert!(matches!(
        session.transport.send("[1]"),
        Err(Error::ConnectionClosed)
    ));

    match next_event(&mut inbound_events).await? {
        TransportEvent::Packet(record) => assert_eq!(record, json!(["bye"])),
        other => bail!("expected packet, got {}", other.name()),
    }
    assert!(next_event(&mut inbound_events).await?.is_close());

    let mut client_events = session.events;
    assert!(next_event(&mut client_events).await?.is_close());
    Ok(())
}

#[tokio::test]
async fn reject_all_policy_never_creates_transport() -> Result<()> {
    init_tracing();
    let (server, mut server_events) = serve(ServerOptions::new(|_: Option<&str>| false)).await?;

    for origin in ["https://a.example", "https://b.example"] {
        let config = WebSocketClientConfig::new(server.ws_url()).with_origin(origin);
        let result = websocket::connect("testApp", &PassThrough, &config, JsonRecordFormat).await;
        assert!(result.is_err());
    }

    assert!(server_events.try_recv().is_none());
    Ok(())
}

#[tokio::test]
async fn allow_list_policy() -> Result<()> {
    init_tracing();
    let policy = AllowedOrigins::new(["https://app.example"]);
    let (server, mut server_events) = serve(ServerOptions::new(policy)).await?;

    let denied = WebSocketClientConfig::new(server.ws_url()).with_origin("https://evil.example");
    assert!(
        websocket::connect("testApp", &PassThrough, &denied, JsonRecordFormat)
            .await
            .is_err()
    );

    let allowed = WebSocketClientConfig::new(server.ws_url()).with_origin("https://app.example");
    let (session, api) = websocket::connect_and_introspect(
        "testApp",
        &PassThrough,
        &["auth".to_string()],
        &allowed,
        JsonRecordFormat,
    )
    .await?;
    assert_eq!(api, vec!["auth"]);

    let inbound = accept(&mut server_events).await?;
    assert!(inbound.remote_addr().is_some());
    session.transport.end();
    Ok(())
}
