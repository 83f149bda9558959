use crate::{
    client::Client,
    error::StreamError,
    future::Resolved,
    store::MarketStore,
};
use async_trait::async_trait;
use barter_cache::{CacheError, books::BookSnapshot};
use smol_str::SmolStr;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

/// Fetches full OrderBook snapshots out of band (eg/ over REST) for venues whose WebSocket
/// only streams deltas.
#[async_trait]
pub trait SnapshotFetcher: Send + Sync + 'static {
    async fn fetch_order_book(
        &self,
        symbol: &str,
        limit: Option<usize>,
    ) -> Result<BookSnapshot, StreamError>;
}

/// Parameters of one [`load_order_book`] task.
#[derive(Debug, Clone)]
pub(crate) struct SnapshotJob {
    pub symbol: SmolStr,
    pub message_hash: SmolStr,
    pub subscription_hash: SmolStr,
    pub delay: Duration,
    pub max_retries: u32,
    pub limit: Option<usize>,
}

/// Warm up a freshly subscribed OrderBook.
///
/// Waits `delay` so early deltas are buffered, then fetches snapshots until one bridges to the
/// buffered deltas. Snapshots that are behind, or fetches that fail, are retried up to
/// `max_retries` times. Once exhausted, the watch is rejected and the book and subscription
/// discarded, so the next watch starts over.
pub(crate) async fn load_order_book(
    client: Arc<Client>,
    store: Arc<MarketStore>,
    fetcher: Arc<dyn SnapshotFetcher>,
    job: SnapshotJob,
) {
    let SnapshotJob {
        symbol,
        message_hash,
        subscription_hash,
        delay,
        max_retries,
        limit,
    } = job;
    let max_retries = max_retries.max(1);

    for attempt in 1..=max_retries {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if client.is_closed() {
            debug!(%symbol, "connection closed before OrderBook snapshot was applied");
            return;
        }

        let snapshot = match fetcher.fetch_order_book(&symbol, limit).await {
            Ok(snapshot) => snapshot,
            Err(error) => {
                warn!(%symbol, attempt, %error, "failed to fetch OrderBook snapshot");
                continue;
            }
        };

        let Some(book) = store.order_book(&symbol) else {
            debug!(%symbol, "OrderBook discarded before snapshot was applied");
            return;
        };

        let result = book.write().sync(snapshot);
        match result {
            Ok(replayed) => {
                info!(%symbol, attempt, replayed, "OrderBook synchronised from snapshot");
                client.resolve(Resolved::OrderBook(book), &message_hash);
                return;
            }
            Err(error @ CacheError::SnapshotBehind { .. }) => {
                debug!(%symbol, attempt, %error, "OrderBook snapshot behind buffered deltas");
            }
            Err(error) => {
                // Gap inside the buffered deltas, start buffering again from scratch
                warn!(%symbol, attempt, %error, "buffered OrderBook deltas out of sequence");
                book.write().invalidate();
            }
        }
    }

    warn!(%symbol, max_retries, "OrderBook snapshot retries exhausted");
    store.remove_order_book(&symbol);
    client.reject(
        StreamError::SnapshotBehind {
            symbol,
            attempts: max_retries,
        },
        Some(&message_hash),
    );
    client.unsubscribe(&subscription_hash);
}
