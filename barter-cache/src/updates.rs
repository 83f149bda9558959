use fnv::FnvHashMap;
use smol_str::SmolStr;

/// Counts records appended since a consumer last asked, in total and per key.
#[derive(Debug, Clone, Default)]
pub(crate) struct UpdateCounter {
    total: usize,
    by_key: FnvHashMap<SmolStr, usize>,
}

impl UpdateCounter {
    pub(crate) fn record(&mut self, key: Option<&str>) {
        self.total += 1;
        if let Some(key) = key {
            *self.by_key.entry(SmolStr::new(key)).or_default() += 1;
        }
    }

    pub(crate) fn take(&mut self, key: Option<&str>) -> usize {
        match key {
            Some(key) => {
                let count = self.by_key.remove(key).unwrap_or_default();
                self.total = self.total.saturating_sub(count);
                count
            }
            None => {
                self.by_key.clear();
                std::mem::take(&mut self.total)
            }
        }
    }
}
