use crate::{
    client::{Client, ConnectionStatus},
    config::{ReconnectPolicy, StreamConfig},
    error::StreamError,
    streams::timeout::TimeoutStream,
    transport::{Transport, WsMessage, WsSink, WsStream},
};
use futures::{SinkExt, StreamExt};
use std::{sync::Arc, time::Duration};
use tokio::{sync::mpsc, time::Instant};
use tracing::{debug, error, info, warn};

/// Receives every inbound frame of a [`Client`] connection, in arrival order.
pub trait MessageHandler: Send + Sync + 'static {
    fn handle_message(&self, client: &Arc<Client>, frame: WsMessage);

    /// Keep-alive frame written every ping interval.
    fn ping(&self) -> Option<WsMessage> {
        None
    }

    fn on_connected(&self, _client: &Arc<Client>) {}
}

/// Drive a [`Client`] connection until it closes.
///
/// Connects (retrying per [`ReconnectPolicy`]), marks the client `Open`, then multiplexes
/// inbound reads, queued outbound writes, pings, stale request sweeps and close requests on a
/// single task. Any transport error, close frame, read timeout or end of stream terminates the
/// client, rejecting everything still pending.
pub(crate) async fn run(
    client: Arc<Client>,
    mut outbound: mpsc::UnboundedReceiver<WsMessage>,
    transport: Arc<dyn Transport>,
    handler: Arc<dyn MessageHandler>,
    config: StreamConfig,
) {
    let url = client.url().clone();

    let (mut sink, stream) = match connect(&client, transport.as_ref(), &config.reconnect).await {
        Ok(Some(duplex)) => duplex,
        Ok(None) => {
            debug!(%url, "client closed while connecting");
            client.terminate(client.closed_error());
            return;
        }
        Err(error) => {
            error!(%url, %error, "failed to connect");
            client.terminate(error);
            return;
        }
    };

    if !client.open() {
        debug!(%url, "client closed while connecting");
        let _ = sink.close().await;
        client.terminate(client.closed_error());
        return;
    }

    info!(%url, "WebSocket connection open");
    handler.on_connected(&client);

    let mut stream = TimeoutStream::new(stream, config.read_timeout);
    let mut status = client.subscribe_status();
    let mut ping = interval(config.ping_interval);
    let mut sweep = interval(config.sweep_interval);

    let error = loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Close(frame))) => {
                    info!(%url, ?frame, "received WebSocket close frame");
                    break client.closed_error();
                }
                Some(Ok(frame)) => handler.handle_message(&client, frame),
                Some(Err(error)) => {
                    warn!(%url, %error, "WebSocket read failed");
                    break StreamError::from(error);
                }
                None => {
                    info!(%url, "WebSocket stream ended");
                    break client.closed_error();
                }
            },
            Some(message) = outbound.recv() => {
                if let Err(error) = sink.send(message).await {
                    warn!(%url, %error, "WebSocket write failed");
                    break StreamError::from(error);
                }
            }
            changed = status.changed() => {
                if changed.is_err() || client.status() != ConnectionStatus::Open {
                    debug!(%url, "WebSocket close requested");
                    break client.closed_error();
                }
            }
            _ = ping.tick() => {
                if let Some(frame) = handler.ping() {
                    if let Err(error) = sink.send(frame).await {
                        warn!(%url, %error, "WebSocket ping failed");
                        break StreamError::from(error);
                    }
                }
            }
            _ = sweep.tick() => {
                let swept = client.sweep(config.future_ttl);
                if swept > 0 {
                    debug!(%url, swept, "swept stale pending requests");
                }
            }
        }
    };

    client.terminate(error);
    let _ = sink.close().await;
    info!(%url, "WebSocket connection closed");
}

/// Connect with retries, giving up early (`Ok(None)`) once the client leaves `Connecting`.
async fn connect(
    client: &Client,
    transport: &dyn Transport,
    policy: &ReconnectPolicy,
) -> Result<Option<(WsSink, WsStream)>, StreamError> {
    let url = client.url();
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    let mut status = client.subscribe_status();
    let closing = async move {
        let _ = status
            .wait_for(|status| *status != ConnectionStatus::Connecting)
            .await;
    };
    tokio::pin!(closing);

    loop {
        attempt += 1;
        let result = tokio::select! {
            result = transport.connect(url) => result,
            _ = &mut closing => return Ok(None),
        };

        match result {
            Ok(duplex) => return Ok(Some(duplex)),
            Err(error) if attempt >= max_attempts => return Err(StreamError::from(error)),
            Err(error) => {
                let delay = policy.delay(attempt);
                warn!(%url, attempt, ?delay, %error, "failed to connect, retrying");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = &mut closing => return Ok(None),
                }
            }
        }
    }
}

/// Interval whose first tick is one `period` from now.
fn interval(period: Duration) -> tokio::time::Interval {
    let period = period.max(Duration::from_millis(1));
    tokio::time::interval_at(Instant::now() + period, period)
}
