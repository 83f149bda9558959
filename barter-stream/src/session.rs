use crate::{
    adapter::{ProtocolAdapter, Topic},
    client::Client,
    config::StreamConfig,
    connection::{self, MessageHandler},
    dispatch::Dispatch,
    error::StreamError,
    future::{FuturePolicy, Resolved},
    snapshot::{self, SnapshotFetcher, SnapshotJob},
    store::{
        BookHandle, CandlesHandle, MarketStore, MyTradesHandle, OrdersHandle, PositionsHandle,
        TradesHandle,
    },
    transport::{Transport, TungsteniteTransport, WsMessage},
};
use barter_cache::model::{Balance, Ticker};
use fnv::FnvHashMap;
use parking_lot::Mutex;
use serde_json::Value;
use smol_str::SmolStr;
use std::sync::Arc;
use tracing::{debug, trace, warn};
use url::Url;

/// Message and subscription hash of the reusable per-connection authentication request.
pub const AUTHENTICATED: &str = "authenticated";

/// One request to [`StreamSession::watch`].
#[derive(Debug, Clone)]
pub struct WatchRequest {
    pub url: Url,
    pub message_hash: SmolStr,
    /// Frame sent if this watch creates the subscription (or on every watch if there is no
    /// `subscription_hash`).
    pub payload: Option<WsMessage>,
    pub subscription_hash: Option<SmolStr>,
    pub subscription_state: Option<Value>,
    pub policy: FuturePolicy,
}

impl WatchRequest {
    pub fn new(url: Url, message_hash: impl Into<SmolStr>) -> Self {
        Self {
            url,
            message_hash: message_hash.into(),
            payload: None,
            subscription_hash: None,
            subscription_state: None,
            policy: FuturePolicy::default(),
        }
    }

    pub fn with_payload(mut self, payload: WsMessage) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_subscription(mut self, subscription_hash: impl Into<SmolStr>) -> Self {
        self.subscription_hash = Some(subscription_hash.into());
        self
    }

    pub fn with_subscription_state(mut self, state: Value) -> Self {
        self.subscription_state = Some(state);
        self
    }

    pub fn with_policy(mut self, policy: FuturePolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// Multiplexes watch requests for one venue over a [`Client`] per url.
///
/// Cheap to clone: clones share connections, caches and configuration.
pub struct StreamSession<A> {
    inner: Arc<SessionInner<A>>,
}

struct SessionInner<A> {
    adapter: Arc<A>,
    transport: Arc<dyn Transport>,
    fetcher: Option<Arc<dyn SnapshotFetcher>>,
    store: Arc<MarketStore>,
    config: StreamConfig,
    clients: Mutex<FnvHashMap<Url, Arc<Client>>>,
}

impl<A> Clone for StreamSession<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A> std::fmt::Debug for StreamSession<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("config", &self.inner.config)
            .field("clients", &self.inner.clients.lock().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Builder to configure and construct a [`StreamSession`].
pub struct StreamSessionBuilder<A> {
    adapter: A,
    transport: Option<Arc<dyn Transport>>,
    fetcher: Option<Arc<dyn SnapshotFetcher>>,
    config: StreamConfig,
}

impl<A> std::fmt::Debug for StreamSessionBuilder<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSessionBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<A> StreamSessionBuilder<A>
where
    A: ProtocolAdapter,
{
    pub fn transport<T: Transport>(self, transport: T) -> Self {
        Self {
            transport: Some(Arc::new(transport)),
            ..self
        }
    }

    pub fn snapshot_fetcher<F: SnapshotFetcher>(self, fetcher: F) -> Self {
        Self {
            fetcher: Some(Arc::new(fetcher)),
            ..self
        }
    }

    pub fn config(self, config: StreamConfig) -> Self {
        Self { config, ..self }
    }

    pub fn build(self) -> StreamSession<A> {
        let store = Arc::new(MarketStore::new(self.config.limits));
        StreamSession {
            inner: Arc::new(SessionInner {
                adapter: Arc::new(self.adapter),
                transport: self
                    .transport
                    .unwrap_or_else(|| Arc::new(TungsteniteTransport)),
                fetcher: self.fetcher,
                store,
                config: self.config,
                clients: Mutex::new(FnvHashMap::default()),
            }),
        }
    }
}

impl<A> StreamSession<A>
where
    A: ProtocolAdapter,
{
    /// Construct a [`StreamSession`] with the default transport and configuration.
    pub fn new(adapter: A) -> Self {
        Self::builder(adapter).build()
    }

    pub fn builder(adapter: A) -> StreamSessionBuilder<A> {
        StreamSessionBuilder {
            adapter,
            transport: None,
            fetcher: None,
            config: StreamConfig::default(),
        }
    }

    pub fn adapter(&self) -> &A {
        &self.inner.adapter
    }

    pub fn store(&self) -> &MarketStore {
        &self.inner.store
    }

    pub fn config(&self) -> &StreamConfig {
        &self.inner.config
    }

    /// Live [`Client`] for `url`, spawning a new connection if there is none or the previous
    /// one has closed. A new client never inherits futures or subscriptions.
    pub fn client(&self, url: &Url) -> Arc<Client> {
        let mut clients = self.inner.clients.lock();

        if let Some(client) = clients.get(url).filter(|client| !client.is_closed()) {
            return Arc::clone(client);
        }

        debug!(%url, "creating new client");
        let (client, outbound) = Client::new(url.clone());
        clients.insert(url.clone(), Arc::clone(&client));

        let handler = Arc::new(SessionHandler {
            adapter: Arc::clone(&self.inner.adapter),
            store: Arc::clone(&self.inner.store),
        });
        tokio::spawn(connection::run(
            Arc::clone(&client),
            outbound,
            Arc::clone(&self.inner.transport),
            handler,
            self.inner.config.clone(),
        ));

        client
    }

    /// Register interest in `request.message_hash` and wait for it to resolve.
    ///
    /// The future is registered before anything is sent, so a reply racing the subscribe
    /// request cannot be missed. The payload goes out at most once per active subscription
    /// hash, however many watchers arrive concurrently.
    pub async fn watch(&self, request: WatchRequest) -> Result<Resolved, StreamError> {
        self.watch_with(request, |_| {}).await
    }

    async fn watch_with<F>(&self, request: WatchRequest, on_subscribed: F) -> Result<Resolved, StreamError>
    where
        F: FnOnce(&Arc<Client>),
    {
        let WatchRequest {
            url,
            message_hash,
            payload,
            subscription_hash,
            subscription_state,
            policy,
        } = request;

        let client = self.client(&url);
        let future = client.future(&message_hash, policy)?;
        client.connected().await?;

        let subscribed = match &subscription_hash {
            Some(subscription_hash) => client.subscribe(
                subscription_hash,
                subscription_state.unwrap_or(Value::Bool(true)),
            ),
            None => true,
        };

        if subscribed {
            on_subscribed(&client);
            if let Some(payload) = payload {
                debug!(%url, %message_hash, ?subscription_hash, "sending subscribe request");
                client.send(payload)?;
            }
        } else {
            trace!(%url, %message_hash, "joining existing subscription");
        }

        future.await
    }

    /// Watch several message hashes behind one payload, resolving with whichever hash resolves
    /// first. The payload is sent if any of `subscription_hashes` was not yet active.
    pub async fn watch_multiple(
        &self,
        url: &Url,
        message_hashes: &[&str],
        payload: Option<WsMessage>,
        subscription_hashes: &[&str],
    ) -> Result<(SmolStr, Resolved), StreamError> {
        if message_hashes.is_empty() {
            return Err(StreamError::EmptyWatch);
        }

        let client = self.client(url);
        let futures = message_hashes
            .iter()
            .map(|message_hash| client.future(message_hash, FuturePolicy::Shared))
            .collect::<Result<Vec<_>, _>>()?;
        client.connected().await?;

        let missing = subscription_hashes
            .iter()
            .filter(|subscription_hash| client.subscribe(subscription_hash, Value::Bool(true)))
            .count();

        if missing > 0 || subscription_hashes.is_empty() {
            if let Some(payload) = payload {
                debug!(%url, ?message_hashes, "sending subscribe request");
                client.send(payload)?;
            }
        }

        let (result, index, _pending) = futures::future::select_all(futures).await;
        result.map(|resolved| (SmolStr::new(message_hashes[index]), resolved))
    }

    /// Authenticate the connection serving `url`, once per connection.
    ///
    /// Concurrent and later callers share the same outcome. A failed login is forgotten, so the
    /// next call retries.
    pub async fn authenticate(&self, url: &Url) -> Result<(), StreamError> {
        let Some(payload) = self.inner.adapter.authenticate_request() else {
            return Ok(());
        };

        let request = WatchRequest::new(url.clone(), AUTHENTICATED)
            .with_payload(payload)
            .with_subscription(AUTHENTICATED)
            .with_policy(FuturePolicy::Reusable);

        self.watch(request).await.map(|_| ())
    }

    /// Watch a [`Topic`], authenticating first if it is private.
    pub async fn watch_topic(&self, topic: &Topic) -> Result<Resolved, StreamError> {
        let request = self.topic_request(topic).await?;
        self.watch(request).await
    }

    async fn topic_request(&self, topic: &Topic) -> Result<WatchRequest, StreamError> {
        let adapter = &self.inner.adapter;
        let url = adapter.url(topic)?;

        if topic.is_private() {
            self.authenticate(&url).await?;
        }

        let request = WatchRequest::new(url, topic.message_hash())
            .with_subscription(adapter.subscription_hash(topic))
            .with_policy(FuturePolicy::Shared);

        Ok(match adapter.subscribe_request(topic) {
            Some(payload) => request.with_payload(payload),
            None => request,
        })
    }

    /// Watch several [`Topic`]s served by one url, resolving with whichever resolves first.
    ///
    /// Topics whose subscription this call creates are requested together through
    /// [`ProtocolAdapter::subscribe_request_many`]. Topics already subscribed are joined
    /// without sending anything.
    pub async fn watch_topics(&self, topics: &[Topic]) -> Result<(Topic, Resolved), StreamError> {
        self.watch_topics_with(topics, |_, _| {}).await
    }

    async fn watch_topics_with<F>(
        &self,
        topics: &[Topic],
        on_subscribed: F,
    ) -> Result<(Topic, Resolved), StreamError>
    where
        F: Fn(&Arc<Client>, &Topic),
    {
        let Some(first) = topics.first() else {
            return Err(StreamError::EmptyWatch);
        };

        let adapter = &self.inner.adapter;
        let url = adapter.url(first)?;
        for topic in &topics[1..] {
            if adapter.url(topic)? != url {
                return Err(StreamError::MixedUrls(topic.message_hash()));
            }
        }

        if topics.iter().any(Topic::is_private) {
            self.authenticate(&url).await?;
        }

        let client = self.client(&url);
        let futures = topics
            .iter()
            .map(|topic| client.future(&topic.message_hash(), FuturePolicy::Shared))
            .collect::<Result<Vec<_>, _>>()?;
        client.connected().await?;

        let fresh = topics
            .iter()
            .filter(|topic| client.subscribe(&adapter.subscription_hash(topic), Value::Bool(true)))
            .cloned()
            .collect::<Vec<_>>();

        if !fresh.is_empty() {
            fresh.iter().for_each(|topic| on_subscribed(&client, topic));
            debug!(%url, topics = ?fresh, "sending subscribe request");
            for payload in adapter.subscribe_request_many(&fresh) {
                client.send(payload)?;
            }
        }

        let (result, index, _pending) = futures::future::select_all(futures).await;
        result.map(|resolved| (topics[index].clone(), resolved))
    }

    pub async fn watch_trades(&self, symbol: &str) -> Result<TradesHandle, StreamError> {
        let topic = Topic::trades(symbol);
        match self.watch_topic(&topic).await? {
            Resolved::Trades(trades) => Ok(trades),
            _ => Err(StreamError::UnexpectedValue(topic.message_hash())),
        }
    }

    /// Watch trades of several symbols at once. Resolves with the first symbol to trade.
    pub async fn watch_trades_for_symbols(
        &self,
        symbols: &[&str],
    ) -> Result<(SmolStr, TradesHandle), StreamError> {
        let topics = symbols
            .iter()
            .map(|symbol| Topic::trades(*symbol))
            .collect::<Vec<_>>();

        match self.watch_topics(&topics).await? {
            (Topic::Trades { symbol }, Resolved::Trades(trades)) => Ok((symbol, trades)),
            (topic, _) => Err(StreamError::UnexpectedValue(topic.message_hash())),
        }
    }

    pub async fn watch_ohlcv(&self, symbol: &str, timeframe: &str) -> Result<CandlesHandle, StreamError> {
        let topic = Topic::ohlcv(symbol, timeframe);
        match self.watch_topic(&topic).await? {
            Resolved::Candles(candles) => Ok(candles),
            _ => Err(StreamError::UnexpectedValue(topic.message_hash())),
        }
    }

    pub async fn watch_ticker(&self, symbol: &str) -> Result<Ticker, StreamError> {
        let topic = Topic::ticker(symbol);
        match self.watch_topic(&topic).await? {
            Resolved::Ticker(ticker) => Ok(ticker),
            _ => Err(StreamError::UnexpectedValue(topic.message_hash())),
        }
    }

    pub async fn watch_orders(&self, symbol: Option<&str>) -> Result<OrdersHandle, StreamError> {
        let topic = Topic::orders(symbol);
        match self.watch_topic(&topic).await? {
            Resolved::Orders(orders) => Ok(orders),
            _ => Err(StreamError::UnexpectedValue(topic.message_hash())),
        }
    }

    pub async fn watch_my_trades(&self, symbol: Option<&str>) -> Result<MyTradesHandle, StreamError> {
        let topic = Topic::my_trades(symbol);
        match self.watch_topic(&topic).await? {
            Resolved::MyTrades(trades) => Ok(trades),
            _ => Err(StreamError::UnexpectedValue(topic.message_hash())),
        }
    }

    pub async fn watch_positions(&self, symbol: Option<&str>) -> Result<PositionsHandle, StreamError> {
        let topic = Topic::positions(symbol);
        match self.watch_topic(&topic).await? {
            Resolved::Positions(positions) => Ok(positions),
            _ => Err(StreamError::UnexpectedValue(topic.message_hash())),
        }
    }

    pub async fn watch_balance(&self) -> Result<Balance, StreamError> {
        let topic = Topic::Balance;
        match self.watch_topic(&topic).await? {
            Resolved::Balance(balance) => Ok(balance),
            _ => Err(StreamError::UnexpectedValue(topic.message_hash())),
        }
    }

    /// Watch the OrderBook for `symbol`.
    ///
    /// When the subscription is new the book is reset to its warm-up state before subscribing,
    /// so deltas are buffered. If a [`SnapshotFetcher`] is configured a snapshot task is
    /// spawned, which resolves the watch once the snapshot and buffered deltas are stitched
    /// together. Without a fetcher the adapter is expected to push snapshots through
    /// [`Dispatch::reset_order_book`].
    pub async fn watch_order_book(&self, symbol: &str) -> Result<BookHandle, StreamError> {
        let topic = Topic::order_book(symbol);
        let request = self.topic_request(&topic).await?;
        let on_subscribed = |client: &Arc<Client>| self.warm_up_order_book(client, &topic);

        match self.watch_with(request, on_subscribed).await? {
            Resolved::OrderBook(book) => Ok(book),
            _ => Err(StreamError::UnexpectedValue(topic.message_hash())),
        }
    }

    /// Watch the OrderBooks of several symbols behind one batched subscribe request, each
    /// warming up as in [`Self::watch_order_book`]. Resolves with the first book to sync.
    pub async fn watch_order_book_for_symbols(
        &self,
        symbols: &[&str],
    ) -> Result<(SmolStr, BookHandle), StreamError> {
        let topics = symbols
            .iter()
            .map(|symbol| Topic::order_book(*symbol))
            .collect::<Vec<_>>();

        let outcome = self
            .watch_topics_with(&topics, |client, topic| {
                self.warm_up_order_book(client, topic)
            })
            .await?;

        match outcome {
            (Topic::OrderBook { symbol }, Resolved::OrderBook(book)) => Ok((symbol, book)),
            (topic, _) => Err(StreamError::UnexpectedValue(topic.message_hash())),
        }
    }

    /// Reset the book of a newly subscribed OrderBook topic to its warm-up state, then spawn
    /// the snapshot task if a [`SnapshotFetcher`] is configured.
    fn warm_up_order_book(&self, client: &Arc<Client>, topic: &Topic) {
        let Topic::OrderBook { symbol } = topic else {
            return;
        };

        // Anything left from a previous connection is stale
        self.inner.store.order_book_entry(symbol).write().invalidate();

        let Some(fetcher) = &self.inner.fetcher else {
            return;
        };

        let config = &self.inner.config;
        tokio::spawn(snapshot::load_order_book(
            Arc::clone(client),
            Arc::clone(&self.inner.store),
            Arc::clone(fetcher),
            SnapshotJob {
                symbol: symbol.clone(),
                message_hash: topic.message_hash(),
                subscription_hash: self.inner.adapter.subscription_hash(topic),
                delay: config.snapshot_delay,
                max_retries: config.snapshot_max_retries,
                limit: config.snapshot_limit,
            },
        ));
    }

    /// Stop watching `topic`: forget its subscription (sending the adapter's unsubscribe
    /// request if it was active), reject any pending watch with
    /// [`StreamError::Unsubscribed`] and drop the symbol's cache, so a later watch starts
    /// empty. Account wide caches (orders, private trades, positions, balance) are kept.
    pub fn unwatch(&self, topic: &Topic) -> Result<(), StreamError> {
        let adapter = &self.inner.adapter;
        let url = adapter.url(topic)?;

        let store = &self.inner.store;
        match topic {
            Topic::Trades { symbol } => {
                store.remove_trades(symbol);
            }
            Topic::Ohlcv { symbol, timeframe } => {
                store.remove_candles(symbol, timeframe);
            }
            Topic::OrderBook { symbol } => {
                store.remove_order_book(symbol);
            }
            Topic::Ticker { symbol } => {
                store.remove_ticker(symbol);
            }
            Topic::Orders { .. } | Topic::MyTrades { .. } | Topic::Positions { .. } | Topic::Balance => {}
        }

        let Some(client) = self.inner.clients.lock().get(&url).cloned() else {
            return Ok(());
        };

        let message_hash = topic.message_hash();
        if client
            .unsubscribe(&adapter.subscription_hash(topic))
            .is_some()
        {
            if let Some(payload) = adapter.unsubscribe_request(topic) {
                client.send(payload)?;
            }
        }
        client.reject(
            StreamError::Unsubscribed(message_hash.clone()),
            Some(&message_hash),
        );

        Ok(())
    }

    /// Close every connection and wait for them to shut down.
    pub async fn close(&self) {
        let clients = self
            .inner
            .clients
            .lock()
            .drain()
            .map(|(_, client)| client)
            .collect::<Vec<_>>();

        for client in clients {
            client.close();
            client.closed().await;
        }
    }
}

/// Bridges a connection's inbound frames into the session's [`ProtocolAdapter`].
struct SessionHandler<A> {
    adapter: Arc<A>,
    store: Arc<MarketStore>,
}

impl<A> MessageHandler for SessionHandler<A>
where
    A: ProtocolAdapter,
{
    fn handle_message(&self, client: &Arc<Client>, frame: WsMessage) {
        match self.adapter.classify(&frame) {
            Ok(Some(message)) => {
                let dispatch = Dispatch::new(self.adapter.as_ref(), client, &self.store);
                self.adapter.handle(&dispatch, message);
            }
            Ok(None) => trace!(url = %client.url(), "ignoring frame"),
            Err(error) => warn!(url = %client.url(), %error, "failed to parse frame, dropping"),
        }
    }

    fn ping(&self) -> Option<WsMessage> {
        self.adapter.ping()
    }
}
