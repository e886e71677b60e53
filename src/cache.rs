//! Order book cache with TTL expiry and LRU eviction
//!
//! Entries are kept in an `IndexMap` whose order is recency: index 0 is the
//! least recently used entry, the tail is the most recent. A read that hits
//! moves the entry to the tail, so the map is access-ordered.

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::book::BookSnapshot;

/// Cache sizing and expiry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Seconds an entry stays fresh
    pub ttl_secs: f64,
    /// Maximum number of entries before LRU eviction
    pub max_size: usize,
    /// Background sweep interval in seconds (0 disables the sweeper)
    pub cleanup_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 5.0,
            max_size: 100,
            cleanup_interval_secs: 30,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs_f64(self.ttl_secs.max(0.0))
    }

    /// Sweep interval, `None` when the sweeper is disabled
    pub fn cleanup_interval(&self) -> Option<Duration> {
        (self.cleanup_interval_secs > 0).then(|| Duration::from_secs(self.cleanup_interval_secs))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub source_name: String,
    pub symbol: String,
}

impl CacheKey {
    pub fn new(source_name: &str, symbol: &str) -> Self {
        Self {
            source_name: source_name.to_string(),
            symbol: symbol.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub snapshot: Arc<BookSnapshot>,
    pub inserted_at: Instant,
    pub hit_count: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.inserted_at) > ttl
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    hits: u64,
    misses: u64,
    evictions: u64,
}

#[derive(Debug)]
struct CacheInner {
    entries: IndexMap<CacheKey, CacheEntry>,
    counters: Counters,
}

/// Serializable cache statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
    pub size: usize,
    pub max_size: usize,
    pub ttl_secs: f64,
    pub oldest_entry_age_ms: Option<u64>,
}

/// Shared order book cache keyed by (source, symbol)
#[derive(Debug)]
pub struct OrderBookCache {
    ttl: Duration,
    max_size: usize,
    inner: Mutex<CacheInner>,
}

impl Default for OrderBookCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

impl OrderBookCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            ttl: config.ttl(),
            max_size: config.max_size.max(1),
            inner: Mutex::new(CacheInner {
                entries: IndexMap::new(),
                counters: Counters::default(),
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh snapshot for `(source_name, symbol)`, if any.
    ///
    /// An expired entry is removed and reported as a miss.
    pub fn get(&self, source_name: &str, symbol: &str) -> Option<Arc<BookSnapshot>> {
        let key = CacheKey::new(source_name, symbol);
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let Some(index) = inner.entries.get_index_of(&key) else {
            inner.counters.misses += 1;
            tracing::debug!(source = %source_name, symbol = %symbol, "Cache miss");
            return None;
        };

        if inner.entries[index].is_expired(now, self.ttl) {
            inner.entries.shift_remove_index(index);
            inner.counters.misses += 1;
            tracing::debug!(source = %source_name, symbol = %symbol, "Cache entry expired");
            return None;
        }

        let last = inner.entries.len() - 1;
        inner.entries.move_index(index, last);
        inner.counters.hits += 1;
        let entry = &mut inner.entries[last];
        entry.hit_count += 1;
        tracing::debug!(
            source = %source_name,
            symbol = %symbol,
            hit_count = entry.hit_count,
            "Cache hit"
        );
        Some(Arc::clone(&entry.snapshot))
    }

    /// Store a snapshot, evicting the least recently used entry when full.
    ///
    /// Overwriting an existing key keeps its hit count and marks it most recent.
    pub fn set(&self, source_name: &str, symbol: &str, snapshot: Arc<BookSnapshot>) {
        let key = CacheKey::new(source_name, symbol);
        let now = Instant::now();
        let mut inner = self.inner.lock();

        if let Some(index) = inner.entries.get_index_of(&key) {
            let last = inner.entries.len() - 1;
            inner.entries.move_index(index, last);
            let entry = &mut inner.entries[last];
            entry.snapshot = snapshot;
            entry.inserted_at = now;
            return;
        }

        if inner.entries.len() >= self.max_size {
            if let Some((evicted, _)) = inner.entries.shift_remove_index(0) {
                inner.counters.evictions += 1;
                tracing::debug!(
                    source = %evicted.source_name,
                    symbol = %evicted.symbol,
                    "Cache evicted least recently used entry"
                );
            }
        }

        inner.entries.insert(
            key,
            CacheEntry {
                snapshot,
                inserted_at: now,
                hit_count: 0,
            },
        );
    }

    /// Drop one key, every key of a source, every key of a symbol, or everything.
    ///
    /// Returns the number of entries removed.
    pub fn invalidate(&self, source_name: Option<&str>, symbol: Option<&str>) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|key, _| {
            let source_match = source_name.map_or(true, |s| key.source_name == s);
            let symbol_match = symbol.map_or(true, |s| key.symbol == s);
            !(source_match && symbol_match)
        });
        let removed = before - inner.entries.len();
        if removed > 0 {
            tracing::debug!(
                source = ?source_name,
                symbol = ?symbol,
                removed,
                "Cache invalidated"
            );
        }
        removed
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let ttl = self.ttl;
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| !entry.is_expired(now, ttl));
        before - inner.entries.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let inner = self.inner.lock();
        let Counters {
            hits,
            misses,
            evictions,
        } = inner.counters;
        let lookups = hits + misses;

        CacheStats {
            hits,
            misses,
            evictions,
            hit_rate: if lookups > 0 {
                hits as f64 / lookups as f64
            } else {
                0.0
            },
            size: inner.entries.len(),
            max_size: self.max_size,
            ttl_secs: self.ttl.as_secs_f64(),
            oldest_entry_age_ms: inner
                .entries
                .values()
                .map(|e| now.saturating_duration_since(e.inserted_at))
                .max()
                .map(|age| age.as_millis() as u64),
        }
    }

    pub fn reset_stats(&self) {
        self.inner.lock().counters = Counters::default();
    }

    /// Sweep expired entries every `interval` on a background task.
    ///
    /// The task holds only a weak reference and exits once the cache is dropped.
    pub fn spawn_cleanup(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    tracing::debug!("Order book cache dropped, stopping cleanup task");
                    break;
                };
                let removed = cache.cleanup_expired();
                if removed > 0 {
                    tracing::debug!(removed, remaining = cache.len(), "🧹 Cache cleanup");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::{compute_book_metrics, PriceLevel};

    fn snapshot(source: &str, mid: f64) -> Arc<BookSnapshot> {
        Arc::new(
            compute_book_metrics(
                source,
                "BTC",
                vec![PriceLevel::new(mid - 0.5, 1.0)],
                vec![PriceLevel::new(mid + 0.5, 1.0)],
            )
            .unwrap(),
        )
    }

    fn cache(max_size: usize) -> OrderBookCache {
        OrderBookCache::new(&CacheConfig {
            ttl_secs: 5.0,
            max_size,
            cleanup_interval_secs: 0,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_after_set_then_expire() {
        let cache = cache(10);
        cache.set("Binance", "BTC", snapshot("Binance", 100.0));
        assert_eq!(cache.get("Binance", "BTC").unwrap().mid_price, 100.0);

        tokio::time::advance(Duration::from_millis(5_001)).await;
        assert!(cache.get("Binance", "BTC").is_none());
        assert!(cache.is_empty());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_lru_evicts_oldest_insert() {
        let cache = cache(2);
        cache.set("A", "BTC", snapshot("A", 1.0));
        cache.set("B", "BTC", snapshot("B", 2.0));
        cache.set("C", "BTC", snapshot("C", 3.0));

        assert!(cache.get("A", "BTC").is_none());
        assert!(cache.get("B", "BTC").is_some());
        assert!(cache.get("C", "BTC").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_lru_read_protects_entry() {
        let cache = cache(2);
        cache.set("A", "BTC", snapshot("A", 1.0));
        cache.set("B", "BTC", snapshot("B", 2.0));
        assert!(cache.get("A", "BTC").is_some());
        cache.set("C", "BTC", snapshot("C", 3.0));

        assert!(cache.get("B", "BTC").is_none());
        assert!(cache.get("A", "BTC").is_some());
        assert!(cache.get("C", "BTC").is_some());
    }

    #[test]
    fn test_overwrite_keeps_hit_count() {
        let cache = cache(2);
        cache.set("A", "BTC", snapshot("A", 1.0));
        cache.get("A", "BTC");
        cache.get("A", "BTC");
        cache.set("A", "BTC", snapshot("A", 9.0));

        let inner = cache.inner.lock();
        let entry = inner.entries.get(&CacheKey::new("A", "BTC")).unwrap();
        assert_eq!(entry.hit_count, 2);
        assert_eq!(entry.snapshot.mid_price, 9.0);
    }

    #[test]
    fn test_invalidate_scopes() {
        let cache = cache(10);
        cache.set("Binance", "BTC", snapshot("Binance", 1.0));
        cache.set("Binance", "ETH", snapshot("Binance", 1.0));
        cache.set("OKX", "BTC", snapshot("OKX", 1.0));
        cache.set("OKX", "SOL", snapshot("OKX", 1.0));

        assert_eq!(cache.invalidate(Some("OKX"), Some("SOL")), 1);
        assert_eq!(cache.invalidate(Some("Binance"), None), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.invalidate(None, None), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_expired_sweeps_only_stale() {
        let cache = cache(10);
        cache.set("A", "BTC", snapshot("A", 1.0));
        tokio::time::advance(Duration::from_secs(3)).await;
        cache.set("B", "BTC", snapshot("B", 1.0));
        tokio::time::advance(Duration::from_secs(3)).await;

        assert_eq!(cache.cleanup_expired(), 1);
        assert!(cache.get("B", "BTC").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_cleanup_runs() {
        let cache = Arc::new(cache(10));
        cache.set("A", "BTC", snapshot("A", 1.0));
        let handle = cache.spawn_cleanup(Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(cache.is_empty());

        drop(cache);
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(handle.is_finished());
    }
}
