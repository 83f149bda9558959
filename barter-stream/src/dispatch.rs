use crate::{
    adapter::{ProtocolAdapter, Topic},
    client::Client,
    error::StreamError,
    future::Resolved,
    session::AUTHENTICATED,
    store::{
        BookHandle, CandlesHandle, MarketStore, MyTradesHandle, OrdersHandle, PositionsHandle,
        TradesHandle,
    },
};
use barter_cache::{
    StreamCache,
    books::{BookDelta, BookSnapshot},
    model::{Balance, Candle, Order, Position, Ticker, Trade},
};
use smol_str::SmolStr;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Inbound routing context handed to [`ProtocolAdapter::handle`] for one frame.
///
/// Every helper updates the relevant cache under its write lock, releases it, then resolves
/// the message hashes that observe that cache with the live handle.
pub struct Dispatch<'a, A: ?Sized> {
    adapter: &'a A,
    client: &'a Arc<Client>,
    store: &'a MarketStore,
}

impl<A: ?Sized> std::fmt::Debug for Dispatch<'_, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatch")
            .field("client", &self.client.url())
            .finish_non_exhaustive()
    }
}

impl<'a, A> Dispatch<'a, A>
where
    A: ProtocolAdapter + ?Sized,
{
    pub fn new(adapter: &'a A, client: &'a Arc<Client>, store: &'a MarketStore) -> Self {
        Self {
            adapter,
            client,
            store,
        }
    }

    pub fn client(&self) -> &Arc<Client> {
        self.client
    }

    pub fn store(&self) -> &MarketStore {
        self.store
    }

    pub fn resolve(&self, value: Resolved, message_hash: &str) -> bool {
        self.client.resolve(value, message_hash)
    }

    pub fn reject(&self, error: StreamError, message_hash: Option<&str>) -> usize {
        self.client.reject(error, message_hash)
    }

    /// Reject the request for `topic` and forget its subscription, eg/ on a venue error reply.
    pub fn fail_topic(&self, topic: &Topic, error: StreamError) {
        self.client.reject(error, Some(&topic.message_hash()));
        self.client
            .unsubscribe(&self.adapter.subscription_hash(topic));
    }

    /// Resolve a one-off request (eg/ an RPC style reply keyed by request id).
    pub fn respond(&self, message_hash: &str, value: serde_json::Value) -> bool {
        self.client.resolve(Resolved::Response(value), message_hash)
    }

    /// Append public trades. Frames may carry several symbols, each symbol's watchers are
    /// resolved once.
    pub fn append_trades<I>(&self, trades: I)
    where
        I: IntoIterator<Item = Trade>,
    {
        let mut touched: Vec<(SmolStr, TradesHandle)> = Vec::new();
        for trade in trades {
            let handle = match touched.iter().find(|(symbol, _)| *symbol == trade.symbol) {
                Some((_, handle)) => Arc::clone(handle),
                None => {
                    let handle = self.store.trades_entry(&trade.symbol);
                    touched.push((trade.symbol.clone(), Arc::clone(&handle)));
                    handle
                }
            };
            handle.write().append(trade);
        }

        for (symbol, handle) in touched {
            self.resolve(Resolved::Trades(handle), &Topic::trades(symbol).message_hash());
        }
    }

    pub fn append_candles<I>(&self, symbol: &str, timeframe: &str, candles: I) -> CandlesHandle
    where
        I: IntoIterator<Item = Candle>,
    {
        let handle = self.store.candles_entry(symbol, timeframe);
        {
            let mut cache = handle.write();
            candles.into_iter().for_each(|candle| cache.append(candle));
        }

        self.resolve(
            Resolved::Candles(Arc::clone(&handle)),
            &Topic::ohlcv(symbol, timeframe).message_hash(),
        );
        handle
    }

    /// Upsert order updates, resolving the account wide `orders` hash and every touched
    /// `orders:<symbol>` hash.
    pub fn upsert_orders<I>(&self, orders: I) -> OrdersHandle
    where
        I: IntoIterator<Item = Order>,
    {
        let handle = self.store.orders();
        let symbols = {
            let mut cache = handle.write();
            let mut symbols = Vec::new();
            for order in orders {
                if !symbols.contains(&order.symbol) {
                    symbols.push(order.symbol.clone());
                }
                cache.append(order);
            }
            symbols
        };

        self.resolve_account_wide(&symbols, Topic::orders, || {
            Resolved::Orders(Arc::clone(&handle))
        });
        handle
    }

    /// Upsert private trades, resolving `my_trades` and every touched `my_trades:<symbol>`.
    pub fn append_my_trades<I>(&self, trades: I) -> MyTradesHandle
    where
        I: IntoIterator<Item = Trade>,
    {
        let handle = self.store.my_trades();
        let symbols = {
            let mut cache = handle.write();
            let mut symbols = Vec::new();
            for trade in trades {
                if !symbols.contains(&trade.symbol) {
                    symbols.push(trade.symbol.clone());
                }
                cache.append(trade);
            }
            symbols
        };

        self.resolve_account_wide(&symbols, Topic::my_trades, || {
            Resolved::MyTrades(Arc::clone(&handle))
        });
        handle
    }

    /// Upsert position updates, one live position per (symbol, side).
    pub fn upsert_positions<I>(&self, positions: I) -> PositionsHandle
    where
        I: IntoIterator<Item = Position>,
    {
        let handle = self.store.positions();
        let symbols = {
            let mut cache = handle.write();
            let mut symbols = Vec::new();
            for position in positions {
                if !symbols.contains(&position.symbol) {
                    symbols.push(position.symbol.clone());
                }
                cache.append(position);
            }
            symbols
        };

        self.resolve_account_wide(&symbols, Topic::positions, || {
            Resolved::Positions(Arc::clone(&handle))
        });
        handle
    }

    fn resolve_account_wide<F, V>(&self, symbols: &[SmolStr], topic: F, value: V)
    where
        F: Fn(Option<&str>) -> Topic,
        V: Fn() -> Resolved,
    {
        if symbols.is_empty() {
            return;
        }

        self.resolve(value(), &topic(None).message_hash());
        for symbol in symbols {
            self.resolve(value(), &topic(Some(symbol.as_str())).message_hash());
        }
    }

    pub fn update_ticker(&self, ticker: Ticker) {
        let message_hash = Topic::ticker(ticker.symbol.clone()).message_hash();
        self.store.set_ticker(ticker.clone());
        self.resolve(Resolved::Ticker(ticker), &message_hash);
    }

    /// Merge a balance update and resolve `balance` with the merged result.
    pub fn update_balance(&self, update: Balance) -> Balance {
        let balance = self.store.merge_balance(update);
        self.resolve(
            Resolved::Balance(balance.clone()),
            &Topic::Balance.message_hash(),
        );
        balance
    }

    /// Replace the book for `symbol` with a venue pushed full snapshot.
    ///
    /// Buffered warm-up deltas newer than the snapshot are replayed on top of it.
    pub fn reset_order_book(&self, symbol: &str, snapshot: BookSnapshot) -> Result<(), StreamError> {
        let book = self.store.order_book_entry(symbol);
        let result = book.write().sync(snapshot);

        match result {
            Ok(replayed) => {
                trace!(%symbol, replayed, "OrderBook reset from snapshot");
                self.resolve_book(symbol, book);
                Ok(())
            }
            Err(error) => {
                let error = StreamError::from(error);
                self.resync_book(symbol, &book, error.clone());
                Err(error)
            }
        }
    }

    /// Route an incremental book update.
    ///
    /// While the book is warming up the delta is buffered. Once synchronised it is applied,
    /// and a sequence gap discards the book: the pending watch is rejected and the
    /// subscription forgotten, so the next watch subscribes and snapshots afresh.
    ///
    /// Deltas for symbols nobody watches are ignored.
    pub fn handle_book_delta(&self, symbol: &str, delta: BookDelta) -> Result<(), StreamError> {
        let Some(book) = self.store.order_book(symbol) else {
            trace!(%symbol, "ignoring OrderBook delta for unwatched symbol");
            return Ok(());
        };

        let result = {
            let mut guard = book.write();
            if !guard.is_synced() {
                guard.buffer(delta);
                return Ok(());
            }
            guard.apply(delta)
        };

        match result {
            Ok(()) => {
                self.resolve_book(symbol, book);
                Ok(())
            }
            Err(error) => {
                let error = StreamError::from(error);
                self.resync_book(symbol, &book, error.clone());
                Err(error)
            }
        }
    }

    fn resolve_book(&self, symbol: &str, book: BookHandle) {
        self.resolve(
            Resolved::OrderBook(book),
            &Topic::order_book(symbol).message_hash(),
        );
    }

    fn resync_book(&self, symbol: &str, book: &BookHandle, error: StreamError) {
        warn!(%symbol, %error, "OrderBook out of sequence, discarding for resync");
        book.write().invalidate();
        self.store.remove_order_book(symbol);
        self.fail_topic(&Topic::order_book(symbol), error);
    }

    /// Resolve the connection's reusable authentication request.
    pub fn authenticated(&self) -> bool {
        debug!(url = %self.client.url(), "connection authenticated");
        self.client.resolve(Resolved::Authenticated, AUTHENTICATED)
    }

    /// Reject the authentication request. The next private watch logs in again.
    pub fn fail_authentication(&self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(url = %self.client.url(), %reason, "authentication failed");
        self.client
            .fail_subscription(StreamError::Authentication(reason), AUTHENTICATED);
    }
}
