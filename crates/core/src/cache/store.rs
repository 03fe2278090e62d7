//! Bounded in-memory entry table with LRU, memory, and TTL eviction.
//!
//! The store is the only component holding mutable cache state. The table,
//! the LRU order, and memory accounting share one lock, held only for the
//! duration of a single operation. Expiry is checked lazily on access.
//!
//! Bounds are enforced after insertion: while the entry count exceeds
//! `max_entries` or the estimated bytes exceed `max_memory_bytes`, the least
//! recently used entry is evicted. A single value whose estimated size alone
//! exceeds `max_memory_bytes` is still inserted, and is then evicted itself
//! once everything older is gone, so such a `set` leaves the store empty.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;

use super::metrics::{CacheCounters, MetricsRecorder};
use crate::config::CacheConfig;
use crate::content::ContentKind;

/// Fixed bookkeeping overhead added to every entry by the default estimator.
pub const ENTRY_OVERHEAD_BYTES: u64 = 64;

/// Estimates the bytes an entry occupies, from its key and value.
pub type SizeEstimator = Arc<dyn Fn(&str, &[u8]) -> u64 + Send + Sync>;

/// Serialized-length estimate: key bytes + value bytes + fixed overhead.
pub fn default_size_estimator() -> SizeEstimator {
    Arc::new(|key, value| key.len() as u64 + value.len() as u64 + ENTRY_OVERHEAD_BYTES)
}

/// A cached value with its lifetime and accounted size.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: Bytes,
    pub created_at: Instant,
    pub expires_at: Instant,
    pub approx_size_bytes: u64,
}

impl CacheEntry {
    fn new(key: String, value: Bytes, ttl: Duration, approx_size_bytes: u64) -> Self {
        let created_at = Instant::now();
        let expires_at = created_at.checked_add(ttl).unwrap_or(created_at + Duration::from_secs(u64::from(u32::MAX)));
        Self { key, value, created_at, expires_at, approx_size_bytes }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

struct StoreState {
    entries: LruCache<String, CacheEntry>,
    total_bytes: u64,
}

/// Bounded key to entry table.
pub struct Store {
    max_entries: usize,
    max_memory_bytes: u64,
    default_ttl: Duration,
    estimator: SizeEstimator,
    state: Mutex<StoreState>,
    metrics: Arc<MetricsRecorder>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("max_entries", &self.max_entries)
            .field("max_memory_bytes", &self.max_memory_bytes)
            .field("default_ttl", &self.default_ttl)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Create a store that reports into `metrics`.
    pub fn new(config: &CacheConfig, metrics: Arc<MetricsRecorder>) -> Self {
        Self::with_estimator(config, metrics, default_size_estimator())
    }

    /// Create a store with a custom size estimator.
    pub fn with_estimator(config: &CacheConfig, metrics: Arc<MetricsRecorder>, estimator: SizeEstimator) -> Self {
        Self {
            max_entries: config.max_entries.max(1),
            max_memory_bytes: config.max_memory_bytes,
            default_ttl: config.default_ttl(),
            estimator,
            state: Mutex::new(StoreState { entries: LruCache::unbounded(), total_bytes: 0 }),
            metrics,
        }
    }

    pub fn metrics(&self) -> &Arc<MetricsRecorder> {
        &self.metrics
    }

    /// Insert or overwrite `key`, making it most recently used.
    ///
    /// Uses the configured default TTL when `ttl` is None. Never fails;
    /// capacity pressure is resolved by evicting least recently used entries.
    pub fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let size = (self.estimator)(key, &value);
        let entry = CacheEntry::new(key.to_string(), value, ttl, size);

        let mut state = self.state.lock();
        if let Some(previous) = state.entries.put(key.to_string(), entry) {
            state.total_bytes = state.total_bytes.saturating_sub(previous.approx_size_bytes);
        }
        state.total_bytes += size;
        self.metrics.record_set();

        if size > self.max_memory_bytes {
            tracing::warn!(
                key,
                size,
                max_memory_bytes = self.max_memory_bytes,
                "entry exceeds the memory bound on its own and will be evicted"
            );
        }

        while state.entries.len() > self.max_entries || state.total_bytes > self.max_memory_bytes {
            let Some((evicted_key, evicted)) = state.entries.pop_lru() else {
                break;
            };
            state.total_bytes = state.total_bytes.saturating_sub(evicted.approx_size_bytes);
            self.metrics.record_eviction();
            tracing::debug!(key = %evicted_key, size = evicted.approx_size_bytes, "evicted least recently used entry");
        }

        self.metrics.update_stats(state.entries.len(), state.total_bytes);
    }

    /// Look up `key`, touching it on a hit.
    ///
    /// Expired entries are removed and reported as a miss, not an eviction.
    pub fn get(&self, key: &str) -> Option<Bytes> {
        let started = Instant::now();
        let mut state = self.state.lock();

        match state.entries.peek(key).map(|entry| entry.is_expired(Instant::now())) {
            None => {
                drop(state);
                self.metrics.record_miss(Some(elapsed_ms(started)));
                None
            }
            Some(true) => {
                if let Some(entry) = state.entries.pop(key) {
                    state.total_bytes = state.total_bytes.saturating_sub(entry.approx_size_bytes);
                }
                self.metrics.update_stats(state.entries.len(), state.total_bytes);
                drop(state);
                tracing::debug!(key, "expired entry removed on access");
                self.metrics.record_miss(Some(elapsed_ms(started)));
                None
            }
            Some(false) => {
                let value = state.entries.get(key).map(|entry| entry.value.clone());
                drop(state);
                self.metrics.record_hit(Some(elapsed_ms(started)));
                value
            }
        }
    }

    /// Remove `key`. Returns whether an entry was removed.
    pub fn delete(&self, key: &str) -> bool {
        let mut state = self.state.lock();
        let Some(entry) = state.entries.pop(key) else {
            return false;
        };
        state.total_bytes = state.total_bytes.saturating_sub(entry.approx_size_bytes);
        self.metrics.record_delete();
        self.metrics.update_stats(state.entries.len(), state.total_bytes);
        true
    }

    /// Drop every entry. Cumulative counters are left untouched.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.total_bytes = 0;
        self.metrics.update_stats(0, 0);
    }

    /// Current cumulative counters and live size.
    pub fn metrics_snapshot(&self) -> CacheCounters {
        self.metrics.counters()
    }

    /// Re-publish the live size and memory usage to the recorder.
    pub fn publish_stats(&self) {
        let state = self.state.lock();
        self.metrics.update_stats(state.entries.len(), state.total_bytes);
    }

    /// Whether `key` is present, expired or not. Does not touch LRU order.
    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().entries.contains(key)
    }

    /// Whether `key` is present and unexpired. Does not touch LRU order or metrics.
    pub fn is_fresh(&self, key: &str) -> bool {
        let now = Instant::now();
        self.state
            .lock()
            .entries
            .peek(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Delete every expired entry.
    ///
    /// Reclaims memory only; counts neither misses nor evictions. Returns the
    /// number of entries removed.
    pub fn purge_expired(&self) -> u64 {
        let now = Instant::now();
        self.remove_matching(|entry| entry.is_expired(now))
    }

    /// Delete entries whose key carries the given content kind tag.
    ///
    /// Returns the number of entries removed.
    pub fn purge_by_kind(&self, kind: ContentKind) -> u64 {
        let prefix = format!("{}:", kind.tag());
        let removed = self.remove_matching(|entry| entry.key.starts_with(&prefix));
        for _ in 0..removed {
            self.metrics.record_delete();
        }
        removed
    }

    /// Evict least recently used entries until at most `max_entries` remain.
    ///
    /// Returns the number of entries evicted.
    pub fn purge_lru(&self, max_entries: usize) -> u64 {
        let mut state = self.state.lock();
        let mut evicted = 0u64;
        while state.entries.len() > max_entries {
            let Some((_, entry)) = state.entries.pop_lru() else {
                break;
            };
            state.total_bytes = state.total_bytes.saturating_sub(entry.approx_size_bytes);
            self.metrics.record_eviction();
            evicted += 1;
        }
        self.metrics.update_stats(state.entries.len(), state.total_bytes);
        evicted
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Estimated bytes held.
    pub fn memory_usage(&self) -> u64 {
        self.state.lock().total_bytes
    }

    /// Live keys, most recently used first.
    pub fn keys(&self) -> Vec<String> {
        self.state.lock().entries.iter().map(|(key, _)| key.clone()).collect()
    }

    fn remove_matching(&self, predicate: impl Fn(&CacheEntry) -> bool) -> u64 {
        let mut state = self.state.lock();
        let doomed: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| predicate(entry))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &doomed {
            if let Some(entry) = state.entries.pop(key) {
                state.total_bytes = state.total_bytes.saturating_sub(entry.approx_size_bytes);
            }
        }
        self.metrics.update_stats(state.entries.len(), state.total_bytes);
        doomed.len() as u64
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(max_entries: usize, max_memory_bytes: u64) -> Store {
        let config = CacheConfig { max_entries, max_memory_bytes, ..Default::default() };
        Store::new(&config, Arc::new(MetricsRecorder::from_config(&config)))
    }

    fn value(n: u32) -> Bytes {
        Bytes::from(n.to_string())
    }

    #[test]
    fn test_set_and_get() {
        let store = store_with(10, 1_000_000);
        store.set("k", value(1), None);
        assert_eq!(store.get("k"), Some(value(1)));
        let counters = store.metrics_snapshot();
        assert_eq!(counters.hits, 1);
        assert_eq!(counters.sets, 1);
        assert_eq!(counters.size, 1);
    }

    #[test]
    fn test_get_missing_counts_miss() {
        let store = store_with(10, 1_000_000);
        assert!(store.get("nope").is_none());
        assert_eq!(store.metrics_snapshot().misses, 1);
    }

    #[test]
    fn test_lru_evicts_oldest_first() {
        let store = store_with(100, u64::MAX);
        for i in 0..100 {
            store.set(&format!("k{i}"), value(i), None);
        }
        store.set("k100", value(100), None);

        assert_eq!(store.len(), 100);
        assert!(store.get("k0").is_none());
        assert_eq!(store.get("k100"), Some(value(100)));
        assert_eq!(store.get("k1"), Some(value(1)));
        assert_eq!(store.metrics_snapshot().evictions, 1);
    }

    #[test]
    fn test_get_refreshes_recency() {
        let store = store_with(2, u64::MAX);
        store.set("a", value(1), None);
        store.set("b", value(2), None);
        assert_eq!(store.get("a"), Some(value(1)));
        store.set("c", value(3), None);

        assert!(store.get("b").is_none());
        assert_eq!(store.get("a"), Some(value(1)));
        assert_eq!(store.get("c"), Some(value(3)));
    }

    #[test]
    fn test_overwrite_is_idempotent() {
        let store = store_with(10, 1_000_000);
        store.set("k", value(1), None);
        let bytes_after_first = store.memory_usage();
        store.set("k", value(2), None);

        assert_eq!(store.get("k"), Some(value(2)));
        assert_eq!(store.len(), 1);
        assert_eq!(store.memory_usage(), bytes_after_first);
    }

    #[test]
    fn test_overwrite_moves_to_most_recent() {
        let store = store_with(2, u64::MAX);
        store.set("a", value(1), None);
        store.set("b", value(2), None);
        store.set("a", value(10), None);
        store.set("c", value(3), None);
        assert!(!store.contains("b"));
        assert!(store.contains("a"));
    }

    #[test]
    fn test_ttl_expiry_is_a_miss_not_an_eviction() {
        let store = store_with(10, 1_000_000);
        store.set("k", value(1), Some(Duration::from_millis(100)));
        assert_eq!(store.get("k"), Some(value(1)));

        std::thread::sleep(Duration::from_millis(150));

        assert!(store.get("k").is_none());
        let counters = store.metrics_snapshot();
        assert_eq!(counters.evictions, 0);
        assert_eq!(counters.misses, 1);
        assert_eq!(counters.size, 0);
        assert_eq!(store.memory_usage(), 0);
    }

    #[test]
    fn test_memory_bound_evicts() {
        let estimator: SizeEstimator = Arc::new(|_, value| value.len() as u64);
        let config = CacheConfig { max_entries: 100, max_memory_bytes: 25, ..Default::default() };
        let store = Store::with_estimator(&config, Arc::new(MetricsRecorder::from_config(&config)), estimator);

        store.set("a", Bytes::from(vec![0u8; 10]), None);
        store.set("b", Bytes::from(vec![0u8; 10]), None);
        store.set("c", Bytes::from(vec![0u8; 10]), None);

        assert_eq!(store.memory_usage(), 20);
        assert!(!store.contains("a"));
        assert!(store.contains("b") && store.contains("c"));
        assert_eq!(store.metrics_snapshot().evictions, 1);
    }

    #[test]
    fn test_oversize_entry_evicts_everything_including_itself() {
        let estimator: SizeEstimator = Arc::new(|_, value| value.len() as u64);
        let config = CacheConfig { max_entries: 100, max_memory_bytes: 25, ..Default::default() };
        let store = Store::with_estimator(&config, Arc::new(MetricsRecorder::from_config(&config)), estimator);

        store.set("small", Bytes::from(vec![0u8; 5]), None);
        store.set("huge", Bytes::from(vec![0u8; 100]), None);

        assert!(store.is_empty());
        assert_eq!(store.memory_usage(), 0);
        assert_eq!(store.metrics_snapshot().evictions, 2);
    }

    #[test]
    fn test_delete() {
        let store = store_with(10, 1_000_000);
        store.set("k", value(1), None);
        assert!(store.delete("k"));
        assert!(!store.delete("k"));
        assert_eq!(store.metrics_snapshot().deletes, 1);
        assert_eq!(store.memory_usage(), 0);
        assert!(store.get("k").is_none());
    }

    #[test]
    fn test_clear_keeps_counters() {
        let store = store_with(10, 1_000_000);
        store.set("a", value(1), None);
        store.get("a");
        store.get("missing");
        store.clear();

        assert!(store.is_empty());
        assert_eq!(store.memory_usage(), 0);
        let counters = store.metrics_snapshot();
        assert_eq!(counters.hits, 1);
        assert_eq!(counters.misses, 1);
        assert_eq!(counters.size, 0);
    }

    #[test]
    fn test_is_fresh_does_not_touch() {
        let store = store_with(2, u64::MAX);
        store.set("a", value(1), None);
        store.set("b", value(2), None);
        assert!(store.is_fresh("a"));
        store.set("c", value(3), None);
        assert!(!store.contains("a"), "is_fresh must not refresh recency");
        assert_eq!(store.metrics_snapshot().hits, 0);
    }

    #[test]
    fn test_purge_expired() {
        let store = store_with(10, 1_000_000);
        store.set("short", value(1), Some(Duration::from_millis(20)));
        store.set("long", value(2), Some(Duration::from_secs(3600)));
        std::thread::sleep(Duration::from_millis(50));

        assert!(store.contains("short"));
        assert!(!store.is_fresh("short"));
        assert_eq!(store.purge_expired(), 1);
        assert!(!store.contains("short"));
        assert!(store.contains("long"));

        let counters = store.metrics_snapshot();
        assert_eq!(counters.evictions, 0);
        assert_eq!(counters.misses, 0);
    }

    #[test]
    fn test_purge_by_kind() {
        let store = store_with(10, 1_000_000);
        store.set("txt:aaaa", value(1), None);
        store.set("mm:bbbb:img:cccc", value(2), None);
        store.set("txt:dddd", value(3), None);

        assert_eq!(store.purge_by_kind(ContentKind::Text), 2);
        assert_eq!(store.keys(), vec!["mm:bbbb:img:cccc".to_string()]);
        assert_eq!(store.metrics_snapshot().deletes, 2);
    }

    #[test]
    fn test_publish_stats_after_metrics_reset() {
        let store = store_with(10, 1_000_000);
        store.set("txt:a", value(1), None);
        store.set("txt:b", value(2), None);
        store.metrics().clear_metrics();
        assert_eq!(store.metrics_snapshot().size, 0);

        store.publish_stats();
        let counters = store.metrics_snapshot();
        assert_eq!(counters.size, 2);
        assert_eq!(counters.memory_usage_bytes, store.memory_usage());
        assert_eq!(counters.sets, 0);
    }

    #[test]
    fn test_purge_lru() {
        let store = store_with(10, 1_000_000);
        for i in 0..5 {
            store.set(&format!("k{i}"), value(i), None);
        }
        assert_eq!(store.purge_lru(2), 3);
        assert_eq!(store.keys(), vec!["k4".to_string(), "k3".to_string()]);
        assert_eq!(store.metrics_snapshot().evictions, 3);
    }

    #[test]
    fn test_lru_order_has_each_key_once() {
        let store = store_with(10, 1_000_000);
        for key in ["a", "b", "a", "c", "b", "a"] {
            store.set(key, value(0), None);
        }
        assert_eq!(store.keys(), vec!["a".to_string(), "b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_concurrent_access_stays_bounded() {
        let store = Arc::new(store_with(50, u64::MAX));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        let key = format!("t{t}-{i}");
                        store.set(&key, value(i), None);
                        store.get(&key);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.len(), 50);
        let counters = store.metrics_snapshot();
        assert_eq!(counters.sets, 1600);
        assert_eq!(counters.evictions, 1550);
        assert_eq!(counters.size, 50);
    }
}
