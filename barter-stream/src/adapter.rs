use crate::{dispatch::Dispatch, error::StreamError, transport::WsMessage};
use smol_str::{SmolStr, format_smolstr};
use std::fmt::{Display, Formatter};
use url::Url;

/// Normalised market data stream a watcher can request.
///
/// A topic's [`message_hash`](Self::message_hash) is the key under which its pending request
/// futures are registered, eg/ `trades:BTC/USDT`, `ohlcv:1m:BTC/USDT`, `orders:ETH/USDT`.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Topic {
    Trades { symbol: SmolStr },
    Ohlcv { symbol: SmolStr, timeframe: SmolStr },
    OrderBook { symbol: SmolStr },
    Ticker { symbol: SmolStr },
    Orders { symbol: Option<SmolStr> },
    MyTrades { symbol: Option<SmolStr> },
    Positions { symbol: Option<SmolStr> },
    Balance,
}

impl Topic {
    pub fn trades(symbol: impl Into<SmolStr>) -> Self {
        Self::Trades {
            symbol: symbol.into(),
        }
    }

    pub fn ohlcv(symbol: impl Into<SmolStr>, timeframe: impl Into<SmolStr>) -> Self {
        Self::Ohlcv {
            symbol: symbol.into(),
            timeframe: timeframe.into(),
        }
    }

    pub fn order_book(symbol: impl Into<SmolStr>) -> Self {
        Self::OrderBook {
            symbol: symbol.into(),
        }
    }

    pub fn ticker(symbol: impl Into<SmolStr>) -> Self {
        Self::Ticker {
            symbol: symbol.into(),
        }
    }

    pub fn orders(symbol: Option<&str>) -> Self {
        Self::Orders {
            symbol: symbol.map(SmolStr::new),
        }
    }

    pub fn my_trades(symbol: Option<&str>) -> Self {
        Self::MyTrades {
            symbol: symbol.map(SmolStr::new),
        }
    }

    pub fn positions(symbol: Option<&str>) -> Self {
        Self::Positions {
            symbol: symbol.map(SmolStr::new),
        }
    }

    pub fn symbol(&self) -> Option<&str> {
        match self {
            Self::Trades { symbol }
            | Self::Ohlcv { symbol, .. }
            | Self::OrderBook { symbol }
            | Self::Ticker { symbol } => Some(symbol),
            Self::Orders { symbol } | Self::MyTrades { symbol } | Self::Positions { symbol } => {
                symbol.as_deref()
            }
            Self::Balance => None,
        }
    }

    /// Determine if the topic is account scoped and requires an authenticated connection.
    pub fn is_private(&self) -> bool {
        matches!(
            self,
            Self::Orders { .. } | Self::MyTrades { .. } | Self::Positions { .. } | Self::Balance
        )
    }

    pub fn message_hash(&self) -> SmolStr {
        format_smolstr!("{self}")
    }
}

impl Display for Topic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trades { symbol } => write!(f, "trades:{symbol}"),
            Self::Ohlcv { symbol, timeframe } => write!(f, "ohlcv:{timeframe}:{symbol}"),
            Self::OrderBook { symbol } => write!(f, "orderbook:{symbol}"),
            Self::Ticker { symbol } => write!(f, "ticker:{symbol}"),
            Self::Orders { symbol: None } => write!(f, "orders"),
            Self::Orders {
                symbol: Some(symbol),
            } => write!(f, "orders:{symbol}"),
            Self::MyTrades { symbol: None } => write!(f, "my_trades"),
            Self::MyTrades {
                symbol: Some(symbol),
            } => write!(f, "my_trades:{symbol}"),
            Self::Positions { symbol: None } => write!(f, "positions"),
            Self::Positions {
                symbol: Some(symbol),
            } => write!(f, "positions:{symbol}"),
            Self::Balance => write!(f, "balance"),
        }
    }
}

/// Venue specific half of a [`StreamSession`](crate::session::StreamSession).
///
/// The session owns connections, request futures, subscriptions and caches. The adapter only
/// knows the venue wire format: which url serves a topic, how to subscribe, and how to turn an
/// inbound frame into calls on a [`Dispatch`].
///
/// Inbound handling is split in two so venue frames are modelled as a tagged union:
/// [`classify`](Self::classify) parses a frame into [`Self::Message`], and
/// [`handle`](Self::handle) routes each variant.
pub trait ProtocolAdapter: Send + Sync + 'static {
    /// Every kind of frame the venue sends.
    type Message: Send;

    /// Url of the connection serving `topic`. Topics sharing a url share a connection.
    fn url(&self, topic: &Topic) -> Result<Url, StreamError>;

    /// Key de-duplicating subscribe requests. Defaults to the topic message hash.
    fn subscription_hash(&self, topic: &Topic) -> SmolStr {
        topic.message_hash()
    }

    /// Frame subscribing to `topic`, `None` if the venue pushes it unprompted.
    fn subscribe_request(&self, topic: &Topic) -> Option<WsMessage>;

    /// Frames subscribing to every topic in `topics`, which share one url.
    ///
    /// Venues accepting several channels in one request override this to batch them. The
    /// default sends one [`subscribe_request`](Self::subscribe_request) per topic.
    fn subscribe_request_many(&self, topics: &[Topic]) -> Vec<WsMessage> {
        topics
            .iter()
            .filter_map(|topic| self.subscribe_request(topic))
            .collect()
    }

    fn unsubscribe_request(&self, _topic: &Topic) -> Option<WsMessage> {
        None
    }

    /// Frame authenticating a connection, `None` if the venue needs no login.
    fn authenticate_request(&self) -> Option<WsMessage> {
        None
    }

    /// Application level keep-alive frame sent every
    /// [`ping_interval`](crate::config::StreamConfig::ping_interval).
    fn ping(&self) -> Option<WsMessage> {
        None
    }

    /// Parse an inbound frame. `Ok(None)` drops the frame silently (eg/ heartbeats).
    fn classify(&self, frame: &WsMessage) -> Result<Option<Self::Message>, StreamError>;

    /// Route a parsed message into the caches and resolve or reject pending requests.
    fn handle(&self, dispatch: &Dispatch<'_, Self>, message: Self::Message);
}
