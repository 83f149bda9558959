use crate::{Identified, Timestamped};
use chrono::{DateTime, Utc};
use derive_more::Display;
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Trade or order side.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    #[serde(alias = "Buy", alias = "BUY", alias = "bid")]
    Buy,
    #[serde(alias = "Sell", alias = "SELL", alias = "ask")]
    Sell,
}

/// Normalised public or private trade.
#[derive(Clone, PartialEq, PartialOrd, Debug, Deserialize, Serialize)]
pub struct Trade {
    pub id: SmolStr,
    pub symbol: SmolStr,
    pub time: DateTime<Utc>,
    pub side: Side,
    pub price: f64,
    pub amount: f64,
    /// Owning order, only present on private trade streams.
    #[serde(default)]
    pub order_id: Option<SmolStr>,
}

impl Timestamped for Trade {
    fn timestamp(&self) -> i64 {
        self.time.timestamp_millis()
    }
}

impl Identified for Trade {
    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn id(&self) -> &str {
        &self.id
    }
}

/// Normalised OHLCV candle. The owning symbol and timeframe are the cache key.
#[derive(Copy, Clone, PartialEq, PartialOrd, Debug, Deserialize, Serialize)]
pub struct Candle {
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Timestamped for Candle {
    fn timestamp(&self) -> i64 {
        self.time.timestamp_millis()
    }
}

/// Lifecycle status of an [`Order`].
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Open,
    #[serde(alias = "closed")]
    Filled,
    #[serde(alias = "canceled")]
    Cancelled,
    Expired,
    Rejected,
}

impl OrderStatus {
    /// Determine if no further updates are expected for the order.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Open)
    }
}

/// Normalised private order update.
#[derive(Clone, PartialEq, PartialOrd, Debug, Deserialize, Serialize)]
pub struct Order {
    pub id: SmolStr,
    pub symbol: SmolStr,
    pub time: DateTime<Utc>,
    pub status: OrderStatus,
    pub side: Side,
    /// Limit price, `None` for market orders.
    #[serde(default)]
    pub price: Option<f64>,
    pub amount: f64,
    #[serde(default)]
    pub filled: f64,
    #[serde(default)]
    pub client_order_id: Option<SmolStr>,
}

impl Order {
    pub fn remaining(&self) -> f64 {
        (self.amount - self.filled).max(0.0)
    }
}

impl Timestamped for Order {
    fn timestamp(&self) -> i64 {
        self.time.timestamp_millis()
    }
}

impl Identified for Order {
    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn id(&self) -> &str {
        &self.id
    }
}

/// Side of a derivatives [`Position`]. One-way mode venues report a single `Net` position.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    #[display("long")]
    Long,
    #[display("short")]
    Short,
    #[serde(alias = "both")]
    #[display("net")]
    Net,
}

impl PositionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "long",
            PositionSide::Short => "short",
            PositionSide::Net => "net",
        }
    }
}

/// Normalised private position update. A venue holds at most one position per
/// (symbol, side), so the side doubles as the record id.
#[derive(Clone, PartialEq, PartialOrd, Debug, Deserialize, Serialize)]
pub struct Position {
    pub symbol: SmolStr,
    pub time: DateTime<Utc>,
    pub side: PositionSide,
    pub contracts: f64,
    #[serde(default)]
    pub entry_price: Option<f64>,
    #[serde(default)]
    pub unrealised_pnl: Option<f64>,
    #[serde(default)]
    pub leverage: Option<f64>,
}

impl Position {
    pub fn is_flat(&self) -> bool {
        self.contracts == 0.0
    }
}

impl Timestamped for Position {
    fn timestamp(&self) -> i64 {
        self.time.timestamp_millis()
    }
}

impl Identified for Position {
    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn id(&self) -> &str {
        self.side.as_str()
    }
}

/// Normalised 24h ticker.
#[derive(Clone, PartialEq, PartialOrd, Debug, Deserialize, Serialize)]
pub struct Ticker {
    pub symbol: SmolStr,
    pub time: DateTime<Utc>,
    pub last: Option<f64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub base_volume: Option<f64>,
}

impl Timestamped for Ticker {
    fn timestamp(&self) -> i64 {
        self.time.timestamp_millis()
    }
}

/// Free / used / total amounts of one asset.
#[derive(Copy, Clone, PartialEq, PartialOrd, Debug, Default, Deserialize, Serialize)]
pub struct AssetBalance {
    pub free: f64,
    pub used: f64,
    pub total: f64,
}

/// Account balance keyed by asset code.
#[derive(Clone, PartialEq, Debug, Default, Deserialize, Serialize)]
pub struct Balance {
    pub time: Option<DateTime<Utc>>,
    pub assets: FnvHashMap<SmolStr, AssetBalance>,
}

impl Balance {
    /// Merge an incremental update: assets present in `update` overwrite stored ones.
    pub fn merge(&mut self, update: Balance) {
        if update.time.is_some() {
            self.time = update.time;
        }
        self.assets.extend(update.assets);
    }

    pub fn get(&self, asset: &str) -> Option<&AssetBalance> {
        self.assets.get(asset)
    }
}
