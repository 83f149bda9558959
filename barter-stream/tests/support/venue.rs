use async_trait::async_trait;
use barter_cache::{
    books::{BookDelta, BookSnapshot, Level},
    model::{Balance, Candle, Order, Position, Ticker, Trade},
};
use barter_stream::{
    ProtocolAdapter, SnapshotFetcher, StreamError, Topic,
    dispatch::Dispatch,
    transport::{WsMessage, parse_json},
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Value, json};
use smol_str::SmolStr;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use url::Url;

pub const PUBLIC_URL: &str = "wss://mock.venue/ws/public";
pub const PRIVATE_URL: &str = "wss://mock.venue/ws/private";

/// JSON venue: `{"op": "subscribe", "topic": <message hash>}` requests (batched as
/// `"topics": [..]`), and inbound frames tagged by `channel`.
#[derive(Debug, Copy, Clone, Default)]
pub struct MockVenue;

#[derive(Debug, Deserialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum VenueMessage {
    Trades {
        data: Vec<Trade>,
    },
    Ohlcv {
        symbol: SmolStr,
        timeframe: SmolStr,
        data: Vec<Candle>,
    },
    Snapshot {
        symbol: SmolStr,
        nonce: u64,
        bids: Vec<(Decimal, Decimal)>,
        asks: Vec<(Decimal, Decimal)>,
    },
    Delta {
        symbol: SmolStr,
        first_nonce: u64,
        nonce: u64,
        bids: Vec<(Decimal, Decimal)>,
        asks: Vec<(Decimal, Decimal)>,
    },
    Ticker {
        data: Ticker,
    },
    Orders {
        data: Vec<Order>,
    },
    MyTrades {
        data: Vec<Trade>,
    },
    Positions {
        data: Vec<Position>,
    },
    Balance {
        data: Balance,
    },
    Login {
        success: bool,
        #[serde(default)]
        reason: Option<String>,
    },
    Response {
        id: SmolStr,
        result: Value,
    },
    Error {
        topic: SmolStr,
        message: String,
    },
    Pong,
}

pub fn request(op: &str, topic: &Topic) -> Value {
    json!({ "op": op, "topic": topic.message_hash() })
}

fn levels(levels: Vec<(Decimal, Decimal)>) -> Vec<Level> {
    levels.into_iter().map(Level::from).collect()
}

impl ProtocolAdapter for MockVenue {
    type Message = VenueMessage;

    fn url(&self, topic: &Topic) -> Result<Url, StreamError> {
        let url = if topic.is_private() {
            PRIVATE_URL
        } else {
            PUBLIC_URL
        };
        Ok(Url::parse(url)?)
    }

    fn subscribe_request(&self, topic: &Topic) -> Option<WsMessage> {
        Some(WsMessage::text(request("subscribe", topic).to_string()))
    }

    fn subscribe_request_many(&self, topics: &[Topic]) -> Vec<WsMessage> {
        let topics = topics.iter().map(Topic::message_hash).collect::<Vec<_>>();
        vec![WsMessage::text(
            json!({ "op": "subscribe", "topics": topics }).to_string(),
        )]
    }

    fn unsubscribe_request(&self, topic: &Topic) -> Option<WsMessage> {
        Some(WsMessage::text(request("unsubscribe", topic).to_string()))
    }

    fn authenticate_request(&self) -> Option<WsMessage> {
        Some(WsMessage::text(
            json!({ "op": "login", "key": "test-key" }).to_string(),
        ))
    }

    fn ping(&self) -> Option<WsMessage> {
        Some(WsMessage::text(json!({ "op": "ping" }).to_string()))
    }

    fn classify(&self, frame: &WsMessage) -> Result<Option<Self::Message>, StreamError> {
        parse_json(frame)
    }

    fn handle(&self, dispatch: &Dispatch<'_, Self>, message: Self::Message) {
        match message {
            VenueMessage::Trades { data } => dispatch.append_trades(data),
            VenueMessage::Ohlcv {
                symbol,
                timeframe,
                data,
            } => {
                dispatch.append_candles(&symbol, &timeframe, data);
            }
            VenueMessage::Snapshot {
                symbol,
                nonce,
                bids,
                asks,
            } => {
                let snapshot = BookSnapshot::new(nonce, None, levels(bids), levels(asks));
                let _ = dispatch.reset_order_book(&symbol, snapshot);
            }
            VenueMessage::Delta {
                symbol,
                first_nonce,
                nonce,
                bids,
                asks,
            } => {
                let delta = BookDelta::new(Some(first_nonce), nonce, None, levels(bids), levels(asks));
                let _ = dispatch.handle_book_delta(&symbol, delta);
            }
            VenueMessage::Ticker { data } => dispatch.update_ticker(data),
            VenueMessage::Orders { data } => {
                dispatch.upsert_orders(data);
            }
            VenueMessage::MyTrades { data } => {
                dispatch.append_my_trades(data);
            }
            VenueMessage::Positions { data } => {
                dispatch.upsert_positions(data);
            }
            VenueMessage::Balance { data } => {
                dispatch.update_balance(data);
            }
            VenueMessage::Login { success: true, .. } => {
                dispatch.authenticated();
            }
            VenueMessage::Login {
                success: false,
                reason,
            } => dispatch.fail_authentication(reason.unwrap_or_default()),
            VenueMessage::Response { id, result } => {
                dispatch.respond(&id, result);
            }
            VenueMessage::Error { topic, message } => dispatch
                .client()
                .fail_subscription(StreamError::Exchange(message), &topic),
            VenueMessage::Pong => {}
        }
    }
}

/// [`SnapshotFetcher`] serving snapshots queued by the test, in order.
#[derive(Debug, Clone)]
pub struct MockFetcher {
    snapshots: Arc<Mutex<mpsc::UnboundedReceiver<Result<BookSnapshot, StreamError>>>>,
}

impl MockFetcher {
    pub fn new() -> (Self, mpsc::UnboundedSender<Result<BookSnapshot, StreamError>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                snapshots: Arc::new(Mutex::new(rx)),
            },
            tx,
        )
    }
}

#[async_trait]
impl SnapshotFetcher for MockFetcher {
    async fn fetch_order_book(
        &self,
        symbol: &str,
        _limit: Option<usize>,
    ) -> Result<BookSnapshot, StreamError> {
        self.snapshots
            .lock()
            .await
            .recv()
            .await
            .unwrap_or_else(|| Err(StreamError::BookNotInitialised(SmolStr::new(symbol))))
    }
}
