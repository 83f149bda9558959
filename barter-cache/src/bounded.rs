use crate::{StreamCache, updates::UpdateCounter};
use std::collections::VecDeque;

/// FIFO cache holding the `limit` most recently appended records.
///
/// Used for streams where only recency matters and records have no natural update key,
/// eg/ public trades.
#[derive(Debug, Clone)]
pub struct BoundedCache<T> {
    limit: usize,
    records: VecDeque<T>,
    updates: UpdateCounter,
}

impl<T> BoundedCache<T> {
    /// Construct a new [`Self`] with the provided capacity (minimum 1).
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            limit,
            records: VecDeque::with_capacity(limit),
            updates: UpdateCounter::default(),
        }
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.records.get(index)
    }

    pub fn last(&self) -> Option<&T> {
        self.records.back()
    }

    /// Up to `n` most recent records, in ascending order.
    pub fn tail(&self, n: usize) -> impl Iterator<Item = &T> {
        self.records.iter().skip(self.records.len().saturating_sub(n))
    }
}

impl<T> StreamCache for BoundedCache<T> {
    type Record = T;

    fn append(&mut self, record: Self::Record) {
        if self.records.len() == self.limit {
            self.records.pop_front();
        }
        self.records.push_back(record);
        self.updates.record(None);
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
        self.updates.take(key).min(self.records.len())
    }
}
