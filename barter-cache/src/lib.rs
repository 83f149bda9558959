#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cast_lossless,
    missing_debug_implementations,
    rust_2018_idioms
)]

//! # Barter-Cache
//! Bounded, identity-aware storage for normalised streaming market data.
//!
//! Every cache keeps a fixed capacity and a deterministic eviction policy, so a WebSocket
//! dispatch path can append parsed records without re-implementing capacity management,
//! de-duplication, or update-in-place semantics:
//! - [`BoundedCache`]: plain FIFO, used for public trade streams.
//! - [`TimestampKeyedCache`]: sorted by timestamp, a repeated timestamp replaces the stored
//!   record (eg/ an in-progress candle).
//! - [`SymbolIdKeyedCache`]: at most one live record per (symbol, id), used for orders and
//!   private trades. Its [`SymbolSideKeyedCache`] alias keeps one position per (symbol, side).
//! - [`OrderBook`](books::OrderBook): nonce-tracked L2 book with a warm-up delta buffer.
//!
//! Caches are shared with consumers as a [`SharedCache`], so every holder observes mutations
//! as soon as the writer releases the lock.

use parking_lot::RwLock;
use std::sync::Arc;

/// Nonce-tracked L2 [`OrderBook`](books::OrderBook) and delta replay.
pub mod books;

/// FIFO [`BoundedCache`].
pub mod bounded;

/// All [`Error`](std::error::Error)s generated in `barter-cache`.
pub mod error;

/// Normalised record models stored by the caches.
pub mod model;

/// [`SymbolIdKeyedCache`] with O(1) replace-in-place.
pub mod symbol_id;

/// [`TimestampKeyedCache`] and [`filter_by_since_limit`](timestamp::filter_by_since_limit).
pub mod timestamp;

mod updates;

pub use bounded::BoundedCache;
pub use error::CacheError;
pub use symbol_id::{SymbolIdKeyedCache, SymbolSideKeyedCache};
pub use timestamp::TimestampKeyedCache;

/// Cache handle shared between the single writer (the dispatch path) and any number of readers.
pub type SharedCache<C> = Arc<RwLock<C>>;

/// Wrap a cache into a [`SharedCache`].
pub fn shared<C>(cache: C) -> SharedCache<C> {
    Arc::new(RwLock::new(cache))
}

/// Common contract of every bounded streaming cache.
pub trait StreamCache {
    type Record;

    /// Insert a record according to the cache policy. Never fails, and always leaves the
    /// cache within [`Self::limit`].
    fn append(&mut self, record: Self::Record);

    /// Number of live records.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured capacity, immutable after construction.
    fn limit(&self) -> usize;

    /// Records in ascending insertion / time order.
    fn iter(&self) -> impl DoubleEndedIterator<Item = &Self::Record>;

    /// Cap the amount of history a caller may request from this cache.
    ///
    /// Returns the smaller of `requested` and the configured capacity, or the capacity if
    /// nothing was requested. The key is accepted so venue adapters can pass the symbol
    /// they are serving.
    fn get_limit(&self, _key: Option<&str>, requested: Option<usize>) -> usize {
        match requested {
            Some(requested) => requested.min(self.limit()),
            None => self.limit(),
        }
    }

    /// Number of records appended since the last call for the same key (or for any key if
    /// `None`), bounded by the current length. Resets the counter.
    fn take_new_updates(&mut self, key: Option<&str>) -> usize;
}

/// Record carrying a millisecond UTC timestamp.
pub trait Timestamped {
    fn timestamp(&self) -> i64;
}

/// Record identified by a (symbol, id) pair.
pub trait Identified {
    fn symbol(&self) -> &str;
    fn id(&self) -> &str;
}
