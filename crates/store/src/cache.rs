//! Bounded in-memory caches.
//!
//! Two flavors back the archive store: a size-and-age bounded map for the
//! primary entry collection, and a size-only LRU for the per-block shortcut.
//! Both are plain maps with explicit eviction so callers can run cleanup on
//! whatever falls out.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

struct Slot<V> {
    value: V,
    inserted: Instant,
    last_used: Instant,
}

/// A capacity- and age-bounded map.
///
/// Entries expire `max_age` after insertion regardless of use; capacity
/// overflow evicts the least-recently-used entry. Eviction is explicit:
/// `insert` and `sweep` return what was removed.
pub struct ExpiringLru<K, V> {
    entries: HashMap<K, Slot<V>>,
    capacity: usize,
    max_age: Duration,
}

impl<K: Eq + Hash + Clone, V: Clone> ExpiringLru<K, V> {
    /// Create a map bounded by `capacity` entries and `max_age` per entry.
    pub fn new(capacity: usize, max_age: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
            max_age,
        }
    }

    /// Insert a value, returning everything evicted to make room.
    pub fn insert(&mut self, key: K, value: V) -> Vec<(K, V)> {
        let mut evicted = self.sweep();

        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            if let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(k, _)| k.clone())
            {
                if let Some(slot) = self.entries.remove(&oldest) {
                    evicted.push((oldest, slot.value));
                }
            }
        }

        let now = Instant::now();
        self.entries.insert(
            key,
            Slot {
                value,
                inserted: now,
                last_used: now,
            },
        );
        evicted
    }

    /// Look up a live entry, refreshing its recency.
    pub fn get(&mut self, key: &K) -> Option<V> {
        let max_age = self.max_age;
        let slot = self.entries.get_mut(key)?;
        if slot.inserted.elapsed() >= max_age {
            return None;
        }
        slot.last_used = Instant::now();
        Some(slot.value.clone())
    }

    /// Whether a live entry exists (does not refresh recency).
    pub fn contains(&self, key: &K) -> bool {
        self.entries
            .get(key)
            .map(|slot| slot.inserted.elapsed() < self.max_age)
            .unwrap_or(false)
    }

    /// Remove and return all expired entries.
    pub fn sweep(&mut self) -> Vec<(K, V)> {
        let max_age = self.max_age;
        let expired: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, slot)| slot.inserted.elapsed() >= max_age)
            .map(|(k, _)| k.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|k| self.entries.remove(&k).map(|slot| (k, slot.value)))
            .collect()
    }

    /// Live values, most recently used first.
    pub fn values(&self) -> Vec<V> {
        let mut live: Vec<(&Slot<V>, Instant)> = self
            .entries
            .values()
            .filter(|slot| slot.inserted.elapsed() < self.max_age)
            .map(|slot| (slot, slot.last_used))
            .collect();
        live.sort_by(|a, b| b.1.cmp(&a.1));
        live.into_iter().map(|(slot, _)| slot.value.clone()).collect()
    }

    /// Number of entries, including any not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A capacity-bounded LRU map with no age limit.
pub struct LruMap<K, V> {
    entries: HashMap<K, (V, Instant)>,
    capacity: usize,
}

impl<K: Eq + Hash + Clone, V: Clone> LruMap<K, V> {
    /// Create a map holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
        }
    }

    /// Look up an entry, refreshing its recency.
    pub fn get(&mut self, key: &K) -> Option<V> {
        let (value, used) = self.entries.get_mut(key)?;
        *used = Instant::now();
        Some(value.clone())
    }

    /// Insert an entry, evicting the least recently used on overflow.
    pub fn insert(&mut self, key: K, value: V) {
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            if let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, (_, used))| *used)
                .map(|(k, _)| k.clone())
            {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(key, (value, Instant::now()));
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut cache = ExpiringLru::new(4, Duration::from_secs(60));
        assert!(cache.insert("a", 1).is_empty());
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"b"), None);
    }

    #[test]
    fn test_capacity_evicts_lru() {
        let mut cache = ExpiringLru::new(2, Duration::from_secs(60));
        cache.insert("a", 1);
        cache.insert("b", 2);
        // Touch "a" so "b" becomes the eviction candidate.
        cache.get(&"a");

        let evicted = cache.insert("c", 3);
        assert_eq!(evicted, vec![("b", 2)]);
        assert!(cache.contains(&"a"));
        assert!(cache.contains(&"c"));
        assert!(!cache.contains(&"b"));
    }

    #[test]
    fn test_age_expires_entries() {
        let mut cache = ExpiringLru::new(4, Duration::from_millis(10));
        cache.insert("a", 1);
        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(cache.get(&"a"), None);
        let swept = cache.sweep();
        assert_eq!(swept, vec![("a", 1)]);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_values_most_recent_first() {
        let mut cache = ExpiringLru::new(4, Duration::from_secs(60));
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.get(&"a");

        assert_eq!(cache.values(), vec![1, 2]);
    }

    #[test]
    fn test_reinsert_same_key_keeps_len() {
        let mut cache = ExpiringLru::new(2, Duration::from_secs(60));
        cache.insert("a", 1);
        cache.insert("a", 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"a"), Some(2));
    }

    #[test]
    fn test_lru_map_bounds_size() {
        let mut cache = LruMap::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.get(&"a");
        cache.insert("c", 3);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"c"), Some(3));
    }
}
