use crate::error::StreamError;
use async_trait::async_trait;
use futures::{Sink, Stream, StreamExt};
use serde::de::DeserializeOwned;
use std::pin::Pin;
use tokio_tungstenite::tungstenite;
use tracing::debug;
use url::Url;

/// Convenient type alias for a tungstenite `WebSocket` message.
pub type WsMessage = tungstenite::Message;

/// Convenient type alias for a tungstenite `WebSocket` error.
pub type WsError = tungstenite::Error;

/// Outbound half of a duplex connection.
pub type WsSink = Pin<Box<dyn Sink<WsMessage, Error = WsError> + Send>>;

/// Inbound half of a duplex connection.
pub type WsStream = Pin<Box<dyn Stream<Item = Result<WsMessage, WsError>> + Send>>;

/// Opens the duplex channel behind a [`Client`](crate::client::Client).
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self, url: &Url) -> Result<(WsSink, WsStream), WsError>;
}

/// Default [`Transport`] connecting over `tokio-tungstenite`.
#[derive(Debug, Copy, Clone, Default)]
pub struct TungsteniteTransport;

#[async_trait]
impl Transport for TungsteniteTransport {
    async fn connect(&self, url: &Url) -> Result<(WsSink, WsStream), WsError> {
        debug!(%url, "attempting to establish WebSocket connection");
        let (websocket, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;
        let (sink, stream) = websocket.split();
        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

/// Deserialise a text or binary frame as JSON.
///
/// Control frames yield `Ok(None)`.
pub fn parse_json<T>(frame: &WsMessage) -> Result<Option<T>, StreamError>
where
    T: DeserializeOwned,
{
    match frame {
        WsMessage::Text(text) => serde_json::from_str(text.as_str())
            .map(Some)
            .map_err(StreamError::from),
        WsMessage::Binary(bytes) => serde_json::from_slice(&bytes[..])
            .map(Some)
            .map_err(StreamError::from),
        _ => Ok(None),
    }
}
