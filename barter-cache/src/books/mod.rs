use crate::error::CacheError;
use chrono::{DateTime, Utc};
use derive_more::{Constructor, Display};
use itertools::Either;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tracing::debug;

/// Default number of warm-up deltas an unsynchronised [`OrderBook`] holds.
pub const DEFAULT_BUFFER_LIMIT: usize = 1000;

/// Normalised OrderBook price level.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Deserialize, Serialize, Constructor,
)]
pub struct Level {
    pub price: Decimal,
    pub amount: Decimal,
}

impl From<(Decimal, Decimal)> for Level {
    fn from((price, amount): (Decimal, Decimal)) -> Self {
        Self { price, amount }
    }
}

/// Full OrderBook state at `nonce`, eg/ fetched out-of-band from a REST endpoint.
#[derive(Clone, Eq, PartialEq, Debug, Default, Deserialize, Serialize, Constructor)]
pub struct BookSnapshot {
    pub nonce: u64,
    pub time: Option<DateTime<Utc>>,
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
}

/// Incremental OrderBook update. A level with a zero amount removes the price.
#[derive(Clone, Eq, PartialEq, Debug, Default, Deserialize, Serialize, Constructor)]
pub struct BookDelta {
    /// First update id contained in this delta, when the venue provides one. Used to detect
    /// gaps between consecutive deltas.
    pub first_nonce: Option<u64>,
    /// Last update id contained in this delta.
    pub nonce: u64,
    pub time: Option<DateTime<Utc>>,
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
}

/// Side of an [`OrderBook`].
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, Deserialize, Serialize)]
pub enum BookSide {
    #[display("bids")]
    Bids,
    #[display("asks")]
    Asks,
}

/// One side of an [`OrderBook`]: price to amount, iterated best price first.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct OrderBookSide {
    side: BookSide,
    levels: BTreeMap<Decimal, Decimal>,
}

impl OrderBookSide {
    pub fn new(side: BookSide) -> Self {
        Self {
            side,
            levels: BTreeMap::new(),
        }
    }

    pub fn side(&self) -> BookSide {
        self.side
    }

    /// Insert or replace a level, removing it if the amount is zero.
    pub fn upsert(&mut self, level: Level) {
        if level.amount.is_zero() {
            self.levels.remove(&level.price);
        } else {
            self.levels.insert(level.price, level.amount);
        }
    }

    /// Replace every level.
    pub fn replace<I>(&mut self, levels: I)
    where
        I: IntoIterator<Item = Level>,
    {
        self.levels.clear();
        levels.into_iter().for_each(|level| self.upsert(level));
    }

    pub fn get(&self, price: &Decimal) -> Option<Decimal> {
        self.levels.get(price).copied()
    }

    pub fn best(&self) -> Option<Level> {
        self.levels().next()
    }

    /// Levels ordered best price first: descending for bids, ascending for asks.
    pub fn levels(&self) -> impl Iterator<Item = Level> + '_ {
        let levels = self
            .levels
            .iter()
            .map(|(price, amount)| Level::new(*price, *amount));

        match self.side {
            BookSide::Bids => Either::Left(levels.rev()),
            BookSide::Asks => Either::Right(levels),
        }
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    fn clear(&mut self) {
        self.levels.clear();
    }
}

/// Nonce-tracked L2 OrderBook.
///
/// The book starts unsynchronised (`nonce() == None`). While a venue delta stream warms up,
/// deltas are [`buffer`](Self::buffer)ed, then [`sync`](Self::sync) applies a snapshot and
/// replays the buffered deltas that are newer than it. Once synchronised, deltas are
/// [`apply`](Self::apply)ed directly with gap detection.
///
/// The warm-up buffer holds at most `buffer_limit` deltas, dropping the oldest first. A
/// snapshot that cannot bridge to the oldest kept delta then fails to sync rather than
/// skipping the dropped ones.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct OrderBook {
    depth: usize,
    nonce: Option<u64>,
    time: Option<DateTime<Utc>>,
    bids: OrderBookSide,
    asks: OrderBookSide,
    buffer: VecDeque<BookDelta>,
    buffer_limit: usize,
}

impl OrderBook {
    /// Construct a new unsynchronised [`Self`], exposing at most `depth` levels per side.
    pub fn new(depth: usize) -> Self {
        Self {
            depth: depth.max(1),
            nonce: None,
            time: None,
            bids: OrderBookSide::new(BookSide::Bids),
            asks: OrderBookSide::new(BookSide::Asks),
            buffer: VecDeque::new(),
            buffer_limit: DEFAULT_BUFFER_LIMIT,
        }
    }

    /// Cap the warm-up buffer at `limit` deltas (minimum 1).
    pub fn with_buffer_limit(self, limit: usize) -> Self {
        Self {
            buffer_limit: limit.max(1),
            ..self
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn nonce(&self) -> Option<u64> {
        self.nonce
    }

    pub fn time(&self) -> Option<DateTime<Utc>> {
        self.time
    }

    pub fn is_synced(&self) -> bool {
        self.nonce.is_some()
    }

    pub fn bids(&self) -> &OrderBookSide {
        &self.bids
    }

    pub fn asks(&self) -> &OrderBookSide {
        &self.asks
    }

    /// Deltas received while unsynchronised, oldest first.
    pub fn buffered(&self) -> &VecDeque<BookDelta> {
        &self.buffer
    }

    /// Mid price between the best bid and best ask.
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.bids.best(), self.asks.best()) {
            (Some(bid), Some(ask)) => Some((bid.price + ask.price) / Decimal::TWO),
            _ => None,
        }
    }

    /// Replace the book contents with a snapshot. Does not touch the delta buffer.
    pub fn reset(&mut self, snapshot: BookSnapshot) {
        self.nonce = Some(snapshot.nonce);
        self.time = snapshot.time;
        self.bids.replace(snapshot.bids);
        self.asks.replace(snapshot.asks);
    }

    /// Drop all state and return to the unsynchronised warm-up phase.
    pub fn invalidate(&mut self) {
        self.nonce = None;
        self.time = None;
        self.bids.clear();
        self.asks.clear();
        self.buffer.clear();
    }

    /// Queue a delta received before the book is synchronised.
    pub fn buffer(&mut self, delta: BookDelta) {
        if self.buffer.len() == self.buffer_limit {
            if let Some(dropped) = self.buffer.pop_front() {
                debug!(nonce = dropped.nonce, "OrderBook buffer full, dropping oldest delta");
            }
        }
        self.buffer.push_back(delta);
    }

    /// Apply a delta to a synchronised book.
    ///
    /// Deltas at or behind the current nonce are already contained in the book and are
    /// ignored. A delta whose `first_nonce` skips past `nonce + 1` is a gap and fails with
    /// [`CacheError::InvalidSequence`], leaving the book untouched.
    pub fn apply(&mut self, delta: BookDelta) -> Result<(), CacheError> {
        if let Some(nonce) = self.nonce {
            if delta.nonce <= nonce {
                debug!(nonce, delta_nonce = delta.nonce, "ignoring stale OrderBook delta");
                return Ok(());
            }
            if let Some(first_nonce) = delta.first_nonce {
                if first_nonce > nonce.saturating_add(1) {
                    return Err(CacheError::InvalidSequence {
                        prev_nonce: nonce,
                        first_nonce,
                    });
                }
            }
        }

        delta.bids.into_iter().for_each(|level| self.bids.upsert(level));
        delta.asks.into_iter().for_each(|level| self.asks.upsert(level));
        self.nonce = Some(delta.nonce);
        if delta.time.is_some() {
            self.time = delta.time;
        }

        Ok(())
    }

    /// Synchronise the book from a snapshot and replay buffered deltas on top of it.
    ///
    /// Buffered deltas at or behind the snapshot nonce are discarded. If the first newer delta
    /// starts after `snapshot.nonce + 1` the snapshot is too old to bridge to the buffered
    /// stream: [`CacheError::SnapshotBehind`] is returned and the buffer is kept so the caller
    /// can retry with a fresh snapshot.
    ///
    /// Returns the number of deltas replayed.
    pub fn sync(&mut self, snapshot: BookSnapshot) -> Result<usize, CacheError> {
        let start = self
            .buffer
            .iter()
            .position(|delta| delta.nonce > snapshot.nonce)
            .unwrap_or(self.buffer.len());

        if let Some(first_nonce) = self.buffer.get(start).and_then(|delta| delta.first_nonce) {
            if first_nonce > snapshot.nonce.saturating_add(1) {
                return Err(CacheError::SnapshotBehind {
                    snapshot_nonce: snapshot.nonce,
                    first_nonce,
                });
            }
        }

        let deltas = std::mem::take(&mut self.buffer);
        self.reset(snapshot);

        let mut replayed = 0;
        for delta in deltas.into_iter().skip(start) {
            self.apply(delta)?;
            replayed += 1;
        }

        Ok(replayed)
    }

    /// Owned copy of the top `limit` levels per side (capped to the book depth).
    pub fn snapshot(&self, limit: Option<usize>) -> BookSnapshot {
        let limit = limit.map_or(self.depth, |limit| limit.min(self.depth));
        BookSnapshot {
            nonce: self.nonce.unwrap_or_default(),
            time: self.time,
            bids: self.bids.levels().take(limit).collect(),
            asks: self.asks.levels().take(limit).collect(),
        }
    }
}
