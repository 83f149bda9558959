use crate::{
    error::StreamError,
    future::{FuturePolicy, FutureSlot, Resolved, WatchFuture},
    transport::WsMessage,
};
use derive_more::Display;
use fnv::FnvHashMap;
use parking_lot::Mutex;
use serde_json::Value;
use smol_str::SmolStr;
use std::{collections::hash_map::Entry, sync::Arc, time::Duration};
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};
use url::Url;

/// Lifecycle of a [`Client`]. Transitions only move forward:
/// `Connecting -> Open -> Closing -> Closed`, with `Closed` reachable from any state.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Display)]
pub enum ConnectionStatus {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// One duplex connection to a venue url.
///
/// Holds the pending request futures keyed by message hash and the active subscriptions keyed
/// by subscription hash. Both registries die with the connection: once the client is
/// [`Closed`](ConnectionStatus::Closed) every pending future has been rejected and a new
/// `Client` must be created for the url.
#[derive(Debug)]
pub struct Client {
    url: Url,
    status: watch::Sender<ConnectionStatus>,
    futures: Mutex<FnvHashMap<SmolStr, FutureSlot>>,
    subscriptions: Mutex<FnvHashMap<SmolStr, Value>>,
    outbound: mpsc::UnboundedSender<WsMessage>,
}

impl Client {
    /// Construct a `Connecting` [`Client`] and the receiver draining its outbound queue.
    pub(crate) fn new(url: Url) -> (Arc<Self>, mpsc::UnboundedReceiver<WsMessage>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(ConnectionStatus::Connecting);

        let client = Arc::new(Self {
            url,
            status,
            futures: Mutex::new(FnvHashMap::default()),
            subscriptions: Mutex::new(FnvHashMap::default()),
            outbound,
        });

        (client, outbound_rx)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// `true` once the client is `Closing` or `Closed` and can no longer be reused.
    pub fn is_closed(&self) -> bool {
        matches!(
            self.status(),
            ConnectionStatus::Closing | ConnectionStatus::Closed
        )
    }

    /// Move `Connecting -> Open`. Returns `false` if a close was requested meanwhile.
    pub(crate) fn open(&self) -> bool {
        self.status.send_if_modified(|status| match status {
            ConnectionStatus::Connecting => {
                *status = ConnectionStatus::Open;
                true
            }
            _ => false,
        })
    }

    pub(crate) fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    pub(crate) fn closed_error(&self) -> StreamError {
        StreamError::ConnectionClosed(self.url.to_string())
    }

    /// Wait until the client leaves `Connecting`. Fails if it did not become `Open`.
    pub async fn connected(&self) -> Result<(), StreamError> {
        let mut status = self.status.subscribe();
        let current = match status
            .wait_for(|status| *status != ConnectionStatus::Connecting)
            .await
        {
            Ok(status) => *status,
            Err(_) => ConnectionStatus::Closed,
        };

        match current {
            ConnectionStatus::Open => Ok(()),
            _ => Err(self.closed_error()),
        }
    }

    /// Wait until the connection task has fully shut down.
    pub async fn closed(&self) {
        let mut status = self.status.subscribe();
        let _ = status
            .wait_for(|status| *status == ConnectionStatus::Closed)
            .await;
    }

    /// Obtain the future for `message_hash`, creating a pending request if needed.
    ///
    /// See [`FuturePolicy`] for how an already pending hash is treated.
    pub fn future(&self, message_hash: &str, policy: FuturePolicy) -> Result<WatchFuture, StreamError> {
        let mut futures = self.futures.lock();

        // Checked under the futures lock so terminate() cannot interleave
        if self.is_closed() {
            return Err(self.closed_error());
        }

        match futures.get(message_hash) {
            Some(slot) if slot.policy() == FuturePolicy::Reusable => return Ok(slot.future()),
            Some(slot) if slot.is_pending() => {
                return match policy {
                    FuturePolicy::Exclusive => {
                        Err(StreamError::DuplicateRequest(SmolStr::new(message_hash)))
                    }
                    FuturePolicy::Shared | FuturePolicy::Reusable => Ok(slot.future()),
                };
            }
            _ => {}
        }

        let slot = FutureSlot::new(SmolStr::new(message_hash), policy);
        let future = slot.future();
        futures.insert(SmolStr::new(message_hash), slot);
        Ok(future)
    }

    /// Complete the pending request for `message_hash` with `value`.
    ///
    /// Returns `false` (and does nothing) if no request is pending, which is the normal case
    /// for unsolicited pushes nobody is currently awaiting.
    pub fn resolve(&self, value: Resolved, message_hash: &str) -> bool {
        let mut futures = self.futures.lock();

        let reusable = match futures.get(message_hash) {
            Some(slot) => slot.policy() == FuturePolicy::Reusable,
            None => {
                trace!(url = %self.url, %message_hash, "no pending request to resolve");
                return false;
            }
        };

        if reusable {
            futures
                .get_mut(message_hash)
                .is_some_and(|slot| slot.complete(Ok(value)))
        } else {
            futures
                .remove(message_hash)
                .is_some_and(|mut slot| slot.complete(Ok(value)))
        }
    }

    /// Fail pending requests.
    ///
    /// With a `message_hash` only that request is rejected. With `None` every pending request
    /// is rejected and the subscription registry is cleared, so the next watch re-subscribes.
    ///
    /// Returns the number of requests rejected.
    pub fn reject(&self, error: StreamError, message_hash: Option<&str>) -> usize {
        match message_hash {
            Some(message_hash) => {
                let slot = self.futures.lock().remove(message_hash);
                slot.map_or(0, |mut slot| usize::from(slot.complete(Err(error))))
            }
            None => {
                let slots = std::mem::take(&mut *self.futures.lock());
                self.subscriptions.lock().clear();
                reject_all(slots, &error)
            }
        }
    }

    /// Reject `message_hash` and forget the subscription of the same hash, so a later watch
    /// sends the subscribe request again.
    pub fn fail_subscription(&self, error: StreamError, message_hash: &str) {
        self.reject(error, Some(message_hash));
        self.subscriptions.lock().remove(message_hash);
    }

    /// Record `subscription_hash` as active with `state`.
    ///
    /// Returns `true` only for the caller that created the entry, which is then responsible for
    /// sending the subscribe request.
    pub fn subscribe(&self, subscription_hash: &str, state: Value) -> bool {
        if self.is_closed() {
            return false;
        }

        match self.subscriptions.lock().entry(SmolStr::new(subscription_hash)) {
            Entry::Vacant(entry) => {
                entry.insert(state);
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    /// Remove `subscription_hash`, returning its state if it was active.
    pub fn unsubscribe(&self, subscription_hash: &str) -> Option<Value> {
        self.subscriptions.lock().remove(subscription_hash)
    }

    /// State recorded for an active `subscription_hash`.
    pub fn subscription(&self, subscription_hash: &str) -> Option<Value> {
        self.subscriptions.lock().get(subscription_hash).cloned()
    }

    pub fn is_subscribed(&self, subscription_hash: &str) -> bool {
        self.subscriptions.lock().contains_key(subscription_hash)
    }

    pub fn subscription_hashes(&self) -> Vec<SmolStr> {
        self.subscriptions.lock().keys().cloned().collect()
    }

    /// `true` if a request for `message_hash` is awaiting completion.
    pub fn is_pending(&self, message_hash: &str) -> bool {
        self.futures
            .lock()
            .get(message_hash)
            .is_some_and(FutureSlot::is_pending)
    }

    /// Queue a frame for the connection task to write.
    pub fn send(&self, message: WsMessage) -> Result<(), StreamError> {
        self.outbound
            .send(message)
            .map_err(|_| self.closed_error())
    }

    /// Ask the connection task to shut down. Pending requests are rejected once it has.
    pub fn close(&self) {
        self.status.send_if_modified(|status| match status {
            ConnectionStatus::Connecting | ConnectionStatus::Open => {
                *status = ConnectionStatus::Closing;
                true
            }
            ConnectionStatus::Closing | ConnectionStatus::Closed => false,
        });
    }

    /// Move to `Closed`, rejecting every pending request with `error` and clearing every
    /// subscription. Idempotent.
    pub(crate) fn terminate(&self, error: StreamError) {
        let slots = {
            let mut futures = self.futures.lock();
            self.status.send_replace(ConnectionStatus::Closed);
            std::mem::take(&mut *futures)
        };
        self.subscriptions.lock().clear();

        let rejected = reject_all(slots, &error);
        if rejected > 0 {
            debug!(url = %self.url, rejected, %error, "rejected pending requests on close");
        }
    }

    /// Reject pending requests nobody awaits any more, and those older than `ttl`.
    ///
    /// Returns the number of requests rejected.
    pub(crate) fn sweep(&self, ttl: Option<Duration>) -> usize {
        let mut futures = self.futures.lock();

        let stale = futures
            .iter()
            .filter(|(_, slot)| {
                slot.is_pending()
                    && (slot.waiters() == 0 || ttl.is_some_and(|ttl| slot.age() > ttl))
            })
            .map(|(message_hash, _)| message_hash.clone())
            .collect::<Vec<_>>();

        stale
            .into_iter()
            .filter_map(|message_hash| {
                let mut slot = futures.remove(&message_hash)?;
                slot.complete(Err(StreamError::Expired(message_hash)))
                    .then_some(())
            })
            .count()
    }
}

fn reject_all(slots: FnvHashMap<SmolStr, FutureSlot>, error: &StreamError) -> usize {
    slots
        .into_values()
        .filter(|slot| slot.is_pending())
        .map(|mut slot| slot.complete(Err(error.clone())))
        .filter(|rejected| *rejected)
        .count()
}
