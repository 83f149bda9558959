use crate::{
    error::StreamError,
    store::{BookHandle, CandlesHandle, MyTradesHandle, OrdersHandle, PositionsHandle, TradesHandle},
};
use barter_cache::model::{Balance, Ticker};
use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use smol_str::SmolStr;
use std::{fmt, time::Duration};
use tokio::{sync::oneshot, time::Instant};

/// Future returned to every watcher of a message hash. Cloning it joins the same outcome.
pub type WatchFuture = Shared<BoxFuture<'static, Result<Resolved, StreamError>>>;

/// Value a pending request on a message hash is completed with.
///
/// Cache variants hand out the live [`SharedCache`](barter_cache::SharedCache) rather than a
/// copy, so a watcher observes every later mutation without re-awaiting.
#[derive(Debug, Clone)]
pub enum Resolved {
    Trades(TradesHandle),
    Candles(CandlesHandle),
    OrderBook(BookHandle),
    Orders(OrdersHandle),
    MyTrades(MyTradesHandle),
    Positions(PositionsHandle),
    Ticker(Ticker),
    Balance(Balance),
    Authenticated,
    Response(serde_json::Value),
}

/// How [`Client::future`](crate::client::Client::future) treats a message hash that already
/// has a pending request.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum FuturePolicy {
    /// A second request while one is pending fails with
    /// [`StreamError::DuplicateRequest`].
    #[default]
    Exclusive,
    /// A second request joins the pending one.
    Shared,
    /// Once resolved the outcome is kept and handed to every later request until the hash is
    /// rejected. Used for connection authentication.
    Reusable,
}

/// One pending (or, for [`FuturePolicy::Reusable`], settled) request slot.
pub(crate) struct FutureSlot {
    sender: Option<oneshot::Sender<Result<Resolved, StreamError>>>,
    future: WatchFuture,
    policy: FuturePolicy,
    created_at: Instant,
}

impl FutureSlot {
    pub(crate) fn new(message_hash: SmolStr, policy: FuturePolicy) -> Self {
        let (sender, receiver) = oneshot::channel();
        let future = async move {
            receiver
                .await
                .unwrap_or_else(|_| Err(StreamError::Cancelled(message_hash)))
        }
        .boxed()
        .shared();

        Self {
            sender: Some(sender),
            future,
            policy,
            created_at: Instant::now(),
        }
    }

    pub(crate) fn future(&self) -> WatchFuture {
        self.future.clone()
    }

    pub(crate) fn policy(&self) -> FuturePolicy {
        self.policy
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.sender.is_some()
    }

    pub(crate) fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Number of handles held outside this slot.
    pub(crate) fn waiters(&self) -> usize {
        self.future
            .strong_count()
            .map_or(0, |count| count.saturating_sub(1))
    }

    /// Settle the slot. Returns `false` if it was already settled.
    pub(crate) fn complete(&mut self, result: Result<Resolved, StreamError>) -> bool {
        match self.sender.take() {
            Some(sender) => {
                // Receiver lives inside `self.future`, so this cannot fail while the slot exists
                let _ = sender.send(result);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for FutureSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FutureSlot")
            .field("pending", &self.is_pending())
            .field("policy", &self.policy)
            .field("created_at", &self.created_at)
            .finish()
    }
}
