//! Short-lived read-through caches for role and permission lookups.
//!
//! Caches are injected into the resolver as `Arc<dyn TimedCache<V>>` so a
//! process builds them once and tests can swap in their own. Writes are
//! last-write-wins; there is no cross-entry consistency.
//!
//! - **[`LocalTimedCache`]**: per-instance DashMap with a TTL per entry
//! - **[`NoOpCache`]**: disables caching, every read misses

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

/// Default entry lifetime for resolver caches.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// A string-keyed cache whose entries expire after a fixed TTL.
#[async_trait]
pub trait TimedCache<V>: Send + Sync
where
    V: Clone + Send + Sync + 'static,
{
    /// Returns the cached value, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Option<V>;

    /// Caches a value with the implementation's TTL.
    async fn insert(&self, key: String, value: V);

    /// Removes one entry.
    async fn invalidate(&self, key: &str);

    /// Removes every entry.
    async fn clear(&self);

    /// Snapshot of hit/miss counters.
    fn stats(&self) -> CacheStats;

    /// Drops expired entries. Returns how many were removed.
    ///
    /// Backends with native expiry keep the default no-op.
    fn cleanup_expired(&self) -> usize {
        0
    }
}

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Number of entries currently in the cache.
    pub size: usize,
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries dropped because their TTL elapsed.
    pub evictions: u64,
}

impl CacheStats {
    /// Hit rate as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

struct CachedValue<V> {
    value: V,
    expires_at: Instant,
}

/// In-memory [`TimedCache`] on `DashMap`.
pub struct LocalTimedCache<V> {
    entries: DashMap<String, CachedValue<V>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<V> LocalTimedCache<V> {
    /// Creates a cache whose entries live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Creates a cache with [`DEFAULT_CACHE_TTL`].
    pub fn default_ttl() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }

    /// Entry lifetime.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;

        self.entries.retain(|_, entry| {
            if entry.expires_at <= now {
                removed += 1;
                false
            } else {
                true
            }
        });

        if removed > 0 {
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }
}

#[async_trait]
impl<V> TimedCache<V> for LocalTimedCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Option<V> {
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > Instant::now() {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            drop(entry);
            self.entries.remove(key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    async fn insert(&self, key: String, value: V) {
        let Some(expires_at) = Instant::now().checked_add(self.ttl) else {
            return;
        };
        self.entries.insert(key, CachedValue { value, expires_at });
    }

    async fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    async fn clear(&self) {
        self.entries.clear();
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    fn cleanup_expired(&self) -> usize {
        self.sweep()
    }
}

/// A cache that never holds anything.
pub struct NoOpCache;

#[async_trait]
impl<V> TimedCache<V> for NoOpCache
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, _key: &str) -> Option<V> {
        None
    }

    async fn insert(&self, _key: String, _value: V) {}

    async fn invalidate(&self, _key: &str) {}

    async fn clear(&self) {}

    fn stats(&self) -> CacheStats {
        CacheStats::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_and_get() {
        let cache: LocalTimedCache<Vec<String>> = LocalTimedCache::new(Duration::from_secs(60));
        cache.insert("u1".into(), vec!["admin".into()]).await;

        assert_eq!(cache.get("u1").await, Some(vec!["admin".to_string()]));
        assert_eq!(cache.get("u2").await, None);

        let stats = cache.stats();
        assert_eq!(stats.size, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 50.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_expired_entry_misses() {
        let cache: LocalTimedCache<u32> = LocalTimedCache::new(Duration::from_millis(20));
        cache.insert("k".into(), 7).await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(cache.get("k").await, None);
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.stats().size, 0);
    }

    #[tokio::test]
    async fn test_invalidate_and_clear() {
        let cache: LocalTimedCache<u32> = LocalTimedCache::default_ttl();
        assert_eq!(cache.ttl(), DEFAULT_CACHE_TTL);

        cache.insert("a".into(), 1).await;
        cache.insert("b".into(), 2).await;
        cache.invalidate("a").await;
        assert_eq!(cache.get("a").await, None);
        assert_eq!(cache.get("b").await, Some(2));

        cache.clear().await;
        assert_eq!(cache.stats().size, 0);
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let cache: LocalTimedCache<u32> = LocalTimedCache::new(Duration::from_millis(10));
        cache.insert("a".into(), 1).await;
        cache.insert("b".into(), 2).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(cache.cleanup_expired(), 2);
        assert_eq!(cache.stats().evictions, 2);
    }

    #[tokio::test]
    async fn test_noop_cache() {
        let cache = NoOpCache;
        TimedCache::<u32>::insert(&cache, "a".into(), 1).await;
        assert_eq!(TimedCache::<u32>::get(&cache, "a").await, None);
    }
}
