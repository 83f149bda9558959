use crate::config::CacheLimits;
use barter_cache::{
    BoundedCache, SharedCache, SymbolIdKeyedCache, SymbolSideKeyedCache, TimestampKeyedCache,
    books::OrderBook,
    model::{Balance, Candle, Order, Position, Ticker, Trade},
    shared,
};
use fnv::FnvHashMap;
use parking_lot::RwLock;
use smol_str::SmolStr;
use std::sync::Arc;

pub type TradesHandle = SharedCache<BoundedCache<Trade>>;
pub type CandlesHandle = SharedCache<TimestampKeyedCache<Candle>>;
pub type OrdersHandle = SharedCache<SymbolIdKeyedCache<Order>>;
pub type MyTradesHandle = SharedCache<SymbolIdKeyedCache<Trade>>;
pub type PositionsHandle = SharedCache<SymbolSideKeyedCache<Position>>;
pub type BookHandle = SharedCache<OrderBook>;

/// Registry of every cache a [`StreamSession`](crate::session::StreamSession) maintains.
///
/// Public trades, candles and books are kept per symbol (candles per symbol and timeframe).
/// Orders, private trades and positions live in one account-wide cache each, since the venue
/// streams them account-wide. Handles are created on first use and then stay stable until the
/// topic is unwatched, so a handle returned to a watcher keeps observing later updates.
#[derive(Debug)]
pub struct MarketStore {
    limits: CacheLimits,
    trades: RwLock<FnvHashMap<SmolStr, TradesHandle>>,
    candles: RwLock<FnvHashMap<(SmolStr, SmolStr), CandlesHandle>>,
    books: RwLock<FnvHashMap<SmolStr, BookHandle>>,
    tickers: RwLock<FnvHashMap<SmolStr, Ticker>>,
    orders: OrdersHandle,
    my_trades: MyTradesHandle,
    positions: PositionsHandle,
    balance: RwLock<Balance>,
}

impl MarketStore {
    pub fn new(limits: CacheLimits) -> Self {
        Self {
            limits,
            trades: RwLock::default(),
            candles: RwLock::default(),
            books: RwLock::default(),
            tickers: RwLock::default(),
            orders: shared(SymbolIdKeyedCache::new(limits.orders)),
            my_trades: shared(SymbolIdKeyedCache::new(limits.my_trades)),
            positions: shared(SymbolSideKeyedCache::new(limits.positions)),
            balance: RwLock::default(),
        }
    }

    pub fn limits(&self) -> CacheLimits {
        self.limits
    }

    pub fn trades(&self, symbol: &str) -> Option<TradesHandle> {
        self.trades.read().get(symbol).cloned()
    }

    pub fn candles(&self, symbol: &str, timeframe: &str) -> Option<CandlesHandle> {
        self.candles
            .read()
            .get(&(SmolStr::new(symbol), SmolStr::new(timeframe)))
            .cloned()
    }

    pub fn order_book(&self, symbol: &str) -> Option<BookHandle> {
        self.books.read().get(symbol).cloned()
    }

    pub fn ticker(&self, symbol: &str) -> Option<Ticker> {
        self.tickers.read().get(symbol).cloned()
    }

    pub fn orders(&self) -> OrdersHandle {
        Arc::clone(&self.orders)
    }

    pub fn my_trades(&self) -> MyTradesHandle {
        Arc::clone(&self.my_trades)
    }

    pub fn positions(&self) -> PositionsHandle {
        Arc::clone(&self.positions)
    }

    pub fn balance(&self) -> Balance {
        self.balance.read().clone()
    }

    pub(crate) fn trades_entry(&self, symbol: &str) -> TradesHandle {
        if let Some(handle) = self.trades.read().get(symbol) {
            return Arc::clone(handle);
        }

        let limit = self.limits.trades;
        Arc::clone(
            self.trades
                .write()
                .entry(SmolStr::new(symbol))
                .or_insert_with(|| shared(BoundedCache::new(limit))),
        )
    }

    pub(crate) fn candles_entry(&self, symbol: &str, timeframe: &str) -> CandlesHandle {
        let key = (SmolStr::new(symbol), SmolStr::new(timeframe));
        if let Some(handle) = self.candles.read().get(&key) {
            return Arc::clone(handle);
        }

        let limit = self.limits.ohlcv;
        Arc::clone(
            self.candles
                .write()
                .entry(key)
                .or_insert_with(|| shared(TimestampKeyedCache::new(limit))),
        )
    }

    pub(crate) fn order_book_entry(&self, symbol: &str) -> BookHandle {
        if let Some(handle) = self.books.read().get(symbol) {
            return Arc::clone(handle);
        }

        let CacheLimits {
            book_depth,
            book_buffer,
            ..
        } = self.limits;
        Arc::clone(
            self.books
                .write()
                .entry(SmolStr::new(symbol))
                .or_insert_with(|| shared(OrderBook::new(book_depth).with_buffer_limit(book_buffer))),
        )
    }

    /// Forget the trades for `symbol`. Existing handles stay valid but are no longer updated.
    pub(crate) fn remove_trades(&self, symbol: &str) -> Option<TradesHandle> {
        self.trades.write().remove(symbol)
    }

    pub(crate) fn remove_candles(&self, symbol: &str, timeframe: &str) -> Option<CandlesHandle> {
        self.candles
            .write()
            .remove(&(SmolStr::new(symbol), SmolStr::new(timeframe)))
    }

    pub(crate) fn remove_ticker(&self, symbol: &str) -> Option<Ticker> {
        self.tickers.write().remove(symbol)
    }

    /// Forget the book for `symbol`. Existing handles stay valid but are no longer updated.
    pub(crate) fn remove_order_book(&self, symbol: &str) -> Option<BookHandle> {
        self.books.write().remove(symbol)
    }

    pub(crate) fn set_ticker(&self, ticker: Ticker) {
        self.tickers.write().insert(ticker.symbol.clone(), ticker);
    }

    /// Merge a (possibly partial) balance update and return the merged result.
    pub(crate) fn merge_balance(&self, update: Balance) -> Balance {
        let mut balance = self.balance.write();
        balance.merge(update);
        balance.clone()
    }
}

impl Default for MarketStore {
    fn default() -> Self {
        Self::new(CacheLimits::default())
    }
}
