//! Last-bar cache: app-owned, bounded by recency.

use super::Bar;
use indexmap::IndexMap;

/// Default number of (asset, resolution) entries kept.
pub const DEFAULT_LAST_BAR_CAPACITY: usize = 512;

/// Most recent bar per cache key, least-recently-used evicted first.
///
/// Insertion order of the map is the recency order: front is oldest.
/// Touching an entry moves it to the back, which is linear in the number of
/// entries; eviction pops the front.
#[derive(Debug, Clone)]
pub struct LastBarCache {
    entries: IndexMap<String, Bar>,
    capacity: usize,
}

impl Default for LastBarCache {
    fn default() -> Self {
        Self::new(DEFAULT_LAST_BAR_CAPACITY)
    }
}

impl LastBarCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: IndexMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Look up and mark as recently used.
    pub fn get(&mut self, key: &str) -> Option<Bar> {
        let index = self.entries.get_index_of(key)?;
        self.touch(index);
        self.entries.last().map(|(_, bar)| *bar)
    }

    /// Look up without touching recency.
    pub fn peek(&self, key: &str) -> Option<&Bar> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, bar: Bar) {
        let (index, _) = self.entries.insert_full(key.into(), bar);
        self.touch(index);
        while self.entries.len() > self.capacity {
            if let Some((evicted, _)) = self.entries.shift_remove_index(0) {
                tracing::debug!(key = %evicted, "last-bar cache evicted entry");
            }
        }
    }

    /// Store `bar` unless the cached bar is strictly newer. Returns whether it was stored.
    pub fn update_if_newer(&mut self, key: &str, bar: Bar) -> bool {
        if let Some(cached) = self.entries.get(key) {
            if bar.time_secs() < cached.time_secs() {
                return false;
            }
        }
        self.insert(key, bar);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn touch(&mut self, index: usize) {
        let last = self.entries.len() - 1;
        if index != last {
            self.entries.move_index(index, last);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(time: i64, close: f64) -> Bar {
        Bar {
            time,
            open: close,
            high: close,
            low: close,
            close,
            volume: 0.0,
        }
    }

    #[test]
    fn test_update_if_newer_keeps_latest() {
        let mut cache = LastBarCache::new(4);
        assert!(cache.update_if_newer("a-1m", bar(200, 2.0)));
        assert!(!cache.update_if_newer("a-1m", bar(100, 1.0)));
        assert_eq!(cache.peek("a-1m").unwrap().close, 2.0);
        // Same bucket re-delivered overwrites.
        assert!(cache.update_if_newer("a-1m", bar(200, 2.5)));
        assert_eq!(cache.peek("a-1m").unwrap().close, 2.5);
    }

    #[test]
    fn test_update_compares_across_units() {
        let mut cache = LastBarCache::new(4);
        cache.insert("a-1m", bar(1_700_000_060, 1.0));
        // Milliseconds, but a minute older.
        assert!(!cache.update_if_newer("a-1m", bar(1_700_000_000_000, 9.0)));
        assert!(cache.update_if_newer("a-1m", bar(1_700_000_120_000, 3.0)));
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let mut cache = LastBarCache::new(2);
        cache.insert("a", bar(1, 1.0));
        cache.insert("b", bar(1, 1.0));
        // Touch "a" so "b" becomes the oldest.
        assert!(cache.get("a").is_some());
        cache.insert("c", bar(1, 1.0));
        assert_eq!(cache.len(), 2);
        assert!(cache.peek("a").is_some());
        assert!(cache.peek("b").is_none());
        assert!(cache.peek("c").is_some());
    }

    #[test]
    fn test_reinsert_refreshes_recency() {
        let mut cache = LastBarCache::new(3);
        cache.insert("a", bar(1, 1.0));
        cache.insert("b", bar(1, 1.0));
        cache.insert("c", bar(1, 1.0));
        cache.insert("a", bar(2, 2.0));
        assert!(cache.get("missing").is_none());
        cache.insert("d", bar(1, 1.0));

        assert!(cache.peek("b").is_none());
        assert_eq!(cache.get("a").unwrap().close, 2.0);
        assert!(cache.peek("c").is_some());
        assert!(cache.peek("d").is_some());
    }

    #[test]
    fn test_zero_capacity_still_holds_one() {
        let mut cache = LastBarCache::new(0);
        cache.insert("a", bar(1, 1.0));
        cache.insert("b", bar(1, 1.0));
        assert_eq!(cache.capacity(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.peek("b").is_some());
    }
}
