use crate::{
    Identified, StreamCache,
    model::{Position, PositionSide},
    updates::UpdateCounter,
};
use fnv::FnvHashMap;
use smol_str::SmolStr;
use std::collections::VecDeque;

/// Bounded cache holding at most one live record per (symbol, id) pair.
///
/// An index of `symbol -> id -> sequence` gives O(1) lookup. A repeated key overwrites the
/// stored record at its original position, a new key is appended, and once the capacity is
/// exceeded the oldest distinct entry is evicted along with its index entry.
///
/// Sequences are absolute (`offset` + position), so evicting from the front never requires the
/// index to be rewritten.
#[derive(Debug, Clone)]
pub struct SymbolIdKeyedCache<T> {
    limit: usize,
    records: VecDeque<T>,
    index: FnvHashMap<SmolStr, FnvHashMap<SmolStr, u64>>,
    offset: u64,
    updates: UpdateCounter,
}

impl<T> SymbolIdKeyedCache<T>
where
    T: Identified,
{
    /// Construct a new [`Self`] with the provided capacity (minimum 1).
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            limit,
            records: VecDeque::with_capacity(limit),
            index: FnvHashMap::default(),
            offset: 0,
            updates: UpdateCounter::default(),
        }
    }

    pub fn get(&self, symbol: &str, id: &str) -> Option<&T> {
        self.position(symbol, id)
            .and_then(|position| self.records.get(position))
    }

    pub fn contains(&self, symbol: &str, id: &str) -> bool {
        self.position(symbol, id).is_some()
    }

    /// Records of one symbol, in ascending insertion order.
    pub fn by_symbol<'a>(&'a self, symbol: &'a str) -> impl Iterator<Item = &'a T> + 'a {
        self.records
            .iter()
            .filter(move |record| record.symbol() == symbol)
    }

    /// Distinct symbols currently held.
    pub fn symbols(&self) -> impl Iterator<Item = &SmolStr> {
        self.index.keys()
    }

    fn position(&self, symbol: &str, id: &str) -> Option<usize> {
        let sequence = self.index.get(symbol)?.get(id)?;
        usize::try_from(sequence - self.offset).ok()
    }

    fn evict_oldest(&mut self) {
        let Some(evicted) = self.records.pop_front() else {
            return;
        };
        self.offset += 1;

        let symbol_emptied = match self.index.get_mut(evicted.symbol()) {
            Some(ids) => {
                ids.remove(evicted.id());
                ids.is_empty()
            }
            None => false,
        };
        if symbol_emptied {
            self.index.remove(evicted.symbol());
        }
    }
}

/// Bounded cache holding at most one live record per (symbol, side), eg/ derivatives
/// positions. A [`Position`] reports its side as its id, so the (symbol, id) policy applies
/// unchanged: a new update for a side replaces the previous one in place.
pub type SymbolSideKeyedCache<T> = SymbolIdKeyedCache<T>;

impl SymbolSideKeyedCache<Position> {
    pub fn get_side(&self, symbol: &str, side: PositionSide) -> Option<&Position> {
        self.get(symbol, side.as_str())
    }
}

impl<T> StreamCache for SymbolIdKeyedCache<T>
where
    T: Identified,
{
    type Record = T;

    fn append(&mut self, record: Self::Record) {
        if let Some(position) = self.position(record.symbol(), record.id()) {
            self.updates.record(Some(record.symbol()));
            self.records[position] = record;
            return;
        }

        if self.records.len() == self.limit {
            self.evict_oldest();
        }

        let symbol = SmolStr::new(record.symbol());
        let id = SmolStr::new(record.id());
        let sequence = self.offset + self.records.len() as u64;

        self.updates.record(Some(&symbol));
        self.records.push_back(record);
        self.index.entry(symbol).or_default().insert(id, sequence);
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn limit(&self) -> usize {
        self.limit
    }

    fn iter(&self) -> impl DoubleEndedIterator<Item = &Self::Record> {
        self.records.iter()
    }

    fn take_new_updates(&mut self, key: Option<&str>) -> usize {
        let updates = self.updates.take(key);
        match key {
            Some(symbol) => updates.min(self.index.get(symbol).map_or(0, |ids| ids.len())),
            None => updates.min(self.records.len()),
        }
    }
}
