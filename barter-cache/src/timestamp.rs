use crate::{StreamCache, Timestamped, updates::UpdateCounter};
use std::collections::VecDeque;

/// Bounded cache kept in ascending timestamp order, with upsert-by-timestamp semantics.
///
/// A record whose timestamp is already stored replaces the stored record in place (eg/ an
/// in-progress candle being corrected), a newer timestamp is appended, and the oldest record
/// is evicted once the capacity is exceeded.
#[derive(Debug, Clone)]
pub struct TimestampKeyedCache<T> {
    limit: usize,
    records: VecDeque<T>,
    updates: UpdateCounter,
}

impl<T> TimestampKeyedCache<T>
where
    T: Timestamped,
{
    /// Construct a new [`Self`] with the provided capacity (minimum 1).
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            limit,
            records: VecDeque::with_capacity(limit),
            updates: UpdateCounter::default(),
        }
    }

    pub fn last(&self) -> Option<&T> {
        self.records.back()
    }

    pub fn get(&self, timestamp: i64) -> Option<&T> {
        self.records
            .binary_search_by_key(&timestamp, Timestamped::timestamp)
            .ok()
            .and_then(|index| self.records.get(index))
    }
}

impl<T> StreamCache for TimestampKeyedCache<T>
where
    T: Timestamped,
{
    type Record = T;

    fn append(&mut self, record: Self::Record) {
        let timestamp = record.timestamp();

        // Common cases first: a correction of the latest bucket, or a new latest bucket
        match self.records.back().map(Timestamped::timestamp) {
            Some(last) if last == timestamp => {
                if let Some(last) = self.records.back_mut() {
                    *last = record;
                }
            }
            Some(last) if last < timestamp => self.records.push_back(record),
            None => self.records.push_back(record),
            Some(_) => match self
                .records
                .binary_search_by_key(&timestamp, Timestamped::timestamp)
            {
                Ok(index) => self.records[index] = record,
                Err(index) => self.records.insert(index, record),
            },
        }

        if self.records.len() > self.limit {
            self.records.pop_front();
        }
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

/// Select records at or after `since`, capped to `limit`.
///
/// With a `since` bound the earliest matching records are kept, otherwise the most recent
/// `limit` records are returned.
pub fn filter_by_since_limit<'a, T, I>(records: I, since: Option<i64>, limit: Option<usize>) -> Vec<T>
where
    T: Timestamped + Clone + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut filtered = records
        .into_iter()
        .filter(|record| since.is_none_or(|since| record.timestamp() >= since))
        .cloned()
        .collect::<Vec<_>>();

    if let Some(limit) = limit {
        if since.is_some() {
            filtered.truncate(limit);
        } else {
            let skip = filtered.len().saturating_sub(limit);
            filtered.drain(..skip);
        }
    }

    filtered
}
