#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cast_lossless,
    missing_debug_implementations,
    rust_2018_idioms
)]

//! # Barter-Stream
//! WebSocket connection and subscription multiplexer for streaming venue market data.
//!
//! A [`StreamSession`] lazily opens one [`Client`](client::Client) per venue url and lets any
//! number of concurrent watchers share it:
//! - Every watch registers a future under a message hash (eg/ `trades:BTC/USDT`) *before*
//!   anything is sent, then awaits it.
//! - Subscribe requests are de-duplicated by subscription hash, so concurrent watchers of the
//!   same stream produce a single outbound request.
//! - Inbound frames are classified by a venue [`ProtocolAdapter`], appended to the shared
//!   caches of the [`MarketStore`](store::MarketStore), and resolve the matching futures with a
//!   live cache handle.
//! - A dropped connection rejects every pending future and forgets every subscription. The
//!   next watch opens a fresh connection and subscribes again.
//!
//! Venues that only stream OrderBook deltas plug in a [`SnapshotFetcher`] to warm books up.
//!
//! ## Example
//! ```rust,ignore
//! let session = StreamSession::builder(VenueAdapter::default())
//!     .config(StreamConfig::default().with_snapshot_max_retries(5))
//!     .build();
//!
//! let trades = session.watch_trades("BTC/USDT").await?;
//! for trade in trades.read().iter() {
//!     info!(?trade);
//! }
//! ```

/// [`ProtocolAdapter`] venue contract and the [`Topic`](adapter::Topic)s it serves.
pub mod adapter;

/// Per-url [`Client`](client::Client) holding pending futures and active subscriptions.
pub mod client;

/// [`StreamConfig`](config::StreamConfig) and connect retry policy.
pub mod config;

/// Connection task driving a [`Client`](client::Client).
pub mod connection;

/// Inbound routing helpers handed to [`ProtocolAdapter::handle`].
pub mod dispatch;

/// All [`Error`](std::error::Error)s generated in `barter-stream`.
pub mod error;

/// Message hash futures and the values they resolve with.
pub mod future;

/// OrderBook snapshot fetching and warm-up.
pub mod snapshot;

/// [`StreamSession`] and [`WatchRequest`](session::WatchRequest).
pub mod session;

/// Registry of the shared caches updated by inbound frames.
pub mod store;

/// Stream utilities.
pub mod streams;

/// Duplex [`Transport`](transport::Transport) abstraction over tokio-tungstenite.
pub mod transport;

pub use adapter::{ProtocolAdapter, Topic};
pub use error::StreamError;
pub use future::{FuturePolicy, Resolved};
pub use session::{StreamSession, WatchRequest};
pub use snapshot::SnapshotFetcher;
