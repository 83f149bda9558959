#![allow(dead_code)]

pub mod venue;

use async_trait::async_trait;
use barter_stream::{
    StreamSession,
    config::{ReconnectPolicy, StreamConfig},
    transport::{Transport, WsError, WsMessage, WsSink, WsStream},
};
use futures::{SinkExt, StreamExt, channel::mpsc as duplex};
use serde_json::Value;
use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::sync::mpsc;
use url::Url;
use venue::MockVenue;

const TIMEOUT: Duration = Duration::from_secs(2);

pub fn init_tracing() {
    use std::sync::OnceLock;
    use tracing_subscriber::EnvFilter;

    static INIT: OnceLock<()> = OnceLock::new();
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// In-memory [`Transport`]: every connect hands the server half to the paired [`MockServer`].
#[derive(Debug, Clone)]
pub struct MockTransport {
    accepted: mpsc::UnboundedSender<MockConnection>,
    connects: Arc<AtomicUsize>,
    refuse_first: usize,
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, url: &Url) -> Result<(WsSink, WsStream), WsError> {
        let attempt = self.connects.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.refuse_first {
            return Err(WsError::Io(std::io::Error::from(
                std::io::ErrorKind::ConnectionRefused,
            )));
        }

        let (client_tx, server_rx) = duplex::unbounded();
        let (server_tx, client_rx) = duplex::unbounded();

        self.accepted
            .send(MockConnection {
                url: url.clone(),
                inbound: server_rx,
                outbound: Some(server_tx),
            })
            .map_err(|_| WsError::ConnectionClosed)?;

        let sink = client_tx.sink_map_err(|_| WsError::ConnectionClosed);
        Ok((Box::pin(sink), Box::pin(client_rx)))
    }
}

#[derive(Debug)]
pub struct MockServer {
    accepted: mpsc::UnboundedReceiver<MockConnection>,
    connects: Arc<AtomicUsize>,
}

impl MockServer {
    pub async fn accept(&mut self) -> MockConnection {
        tokio::time::timeout(TIMEOUT, self.accepted.recv())
            .await
            .expect("timed out waiting for connection")
            .expect("transport dropped")
    }

    /// Number of connect attempts, including refused ones.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

pub fn mock_transport(refuse_first: usize) -> (MockTransport, MockServer) {
    let (tx, rx) = mpsc::unbounded_channel();
    let connects = Arc::new(AtomicUsize::new(0));

    let transport = MockTransport {
        accepted: tx,
        connects: Arc::clone(&connects),
        refuse_first,
    };

    (
        transport,
        MockServer {
            accepted: rx,
            connects,
        },
    )
}

/// Server half of one mock connection.
#[derive(Debug)]
pub struct MockConnection {
    pub url: Url,
    inbound: duplex::UnboundedReceiver<WsMessage>,
    outbound: Option<duplex::UnboundedSender<Result<WsMessage, WsError>>>,
}

impl MockConnection {
    pub fn push(&self, value: Value) {
        self.push_frame(WsMessage::text(value.to_string()));
    }

    pub fn push_frame(&self, frame: WsMessage) {
        self.outbound
            .as_ref()
            .expect("connection already dropped")
            .unbounded_send(Ok(frame))
            .expect("client stream dropped");
    }

    /// End the client's inbound stream without a close frame.
    pub fn disconnect(&mut self) {
        self.outbound = None;
    }

    /// Next JSON frame written by the client.
    pub async fn recv(&mut self) -> Value {
        let frame = tokio::time::timeout(TIMEOUT, self.inbound.next())
            .await
            .expect("timed out waiting for client frame")
            .expect("client sink dropped");

        match frame {
            WsMessage::Text(text) => serde_json::from_str(text.as_str()).expect("client sent invalid JSON"),
            other => panic!("unexpected client frame: {other:?}"),
        }
    }

    /// Next client frame if one arrives within `window`.
    pub async fn try_recv(&mut self, window: Duration) -> Option<WsMessage> {
        tokio::time::timeout(window, self.inbound.next())
            .await
            .ok()
            .flatten()
    }
}

pub fn config() -> StreamConfig {
    StreamConfig::default().with_reconnect(
        ReconnectPolicy::default()
            .with_base_delay(Duration::from_millis(5))
            .with_max_attempts(3),
    )
}

pub fn session() -> (StreamSession<MockVenue>, MockServer) {
    session_with(config(), None, 0)
}

pub fn session_with(
    config: StreamConfig,
    fetcher: Option<venue::MockFetcher>,
    refuse_first: usize,
) -> (StreamSession<MockVenue>, MockServer) {
    init_tracing();
    let (transport, server) = mock_transport(refuse_first);

    let builder = StreamSession::builder(MockVenue)
        .transport(transport)
        .config(config);

    let session = match fetcher {
        Some(fetcher) => builder.snapshot_fetcher(fetcher).build(),
        None => builder.build(),
    };

    (session, server)
}

/// Poll `condition` until it holds.
pub async fn eventually<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}
