//! In-memory LRU cache for hot fresh tiles.
//!
//! Sub-millisecond L1 in front of the Redis soft cache. Entries carry a
//! short hard TTL and the cache is bypassed entirely on `cache=false`
//! requests, so soft-invalidation bookkeeping stays with the soft cache.

use bytes::Bytes;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::info;

/// Memory-bounded LRU tile cache.
pub struct MemoryTileCache {
    cache: Arc<RwLock<LruCache<String, CachedTile>>>,
    max_bytes: u64,
    ttl: Duration,
    stats: Arc<MemoryTileCacheStats>,
}

struct CachedTile {
    data: Bytes,
    inserted_at: Instant,
}

/// Atomic counters exposed through the metrics endpoint.
#[derive(Default)]
pub struct MemoryTileCacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
    pub size_bytes: AtomicU64,
    pub entry_count: AtomicU64,
}

impl MemoryTileCacheStats {
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            (hits as f64 / total as f64) * 100.0
        }
    }
}

impl MemoryTileCache {
    /// Create a cache bounded by `max_size_mb` with a hard per-entry TTL.
    pub fn new(max_size_mb: usize, ttl_secs: u64) -> Self {
        // Entry-count limit stays out of the way; eviction is memory-based.
        const LRU_CAPACITY: usize = 1_000_000;
        let capacity = NonZeroUsize::new(LRU_CAPACITY).expect("Capacity must be > 0");

        Self {
            cache: Arc::new(RwLock::new(LruCache::new(capacity))),
            max_bytes: (max_size_mb as u64) * 1024 * 1024,
            ttl: Duration::from_secs(ttl_secs),
            stats: Arc::new(MemoryTileCacheStats::default()),
        }
    }

    /// Get a tile; expired entries count as misses and are dropped lazily.
    pub async fn get(&self, key: &str) -> Option<Bytes> {
        let mut cache = self.cache.write().await;

        let fresh = cache
            .get(key)
            .map(|tile| (tile.inserted_at.elapsed() <= self.ttl).then(|| tile.data.clone()));

        match fresh {
            Some(Some(data)) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(data)
            }
            Some(None) => {
                if let Some(expired) = cache.pop(key) {
                    self.stats
                        .size_bytes
                        .fetch_sub(expired.data.len() as u64, Ordering::Relaxed);
                    self.stats.entry_count.fetch_sub(1, Ordering::Relaxed);
                }
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a tile, evicting LRU entries when over the memory limit.
    pub async fn set(&self, key: &str, data: Bytes) {
        let tile_size = data.len() as u64;
        let mut cache = self.cache.write().await;

        if self.stats.size_bytes.load(Ordering::Relaxed) + tile_size > self.max_bytes {
            self.evict_locked(&mut cache);
        }

        if let Some(existing) = cache.peek(key) {
            self.stats
                .size_bytes
                .fetch_sub(existing.data.len() as u64, Ordering::Relaxed);
        } else {
            self.stats.entry_count.fetch_add(1, Ordering::Relaxed);
        }

        cache.put(key.to_string(), CachedTile { data, inserted_at: Instant::now() });
        self.stats.size_bytes.fetch_add(tile_size, Ordering::Relaxed);
    }

    /// Free ~5% of capacity in LRU order.
    fn evict_locked(&self, cache: &mut LruCache<String, CachedTile>) {
        let target = self.max_bytes / 20;
        let mut freed = 0u64;
        let mut evicted = 0u64;

        while freed < target {
            match cache.pop_lru() {
                Some((_, tile)) => {
                    freed += tile.data.len() as u64;
                    evicted += 1;
                }
                None => break,
            }
        }

        self.stats.size_bytes.fetch_sub(freed, Ordering::Relaxed);
        self.stats.entry_count.fetch_sub(evicted, Ordering::Relaxed);
        self.stats.evictions.fetch_add(evicted, Ordering::Relaxed);

        info!(evicted, freed_bytes = freed, "L1 tile cache eviction");
    }

    /// Drop everything (layer republish, operator invalidation).
    pub async fn clear(&self) {
        let mut cache = self.cache.write().await;
        cache.clear();
        self.stats.size_bytes.store(0, Ordering::Relaxed);
        self.stats.entry_count.store(0, Ordering::Relaxed);
    }

    pub fn stats(&self) -> &MemoryTileCacheStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_set_and_stats() {
        let cache = MemoryTileCache::new(16, 60);

        assert!(cache.get("1/0/0.pbf").await.is_none());

        cache.set("1/0/0.pbf", Bytes::from_static(b"tile")).await;
        assert_eq!(cache.get("1/0/0.pbf").await, Some(Bytes::from_static(b"tile")));

        assert_eq!(cache.stats().hits.load(Ordering::Relaxed), 1);
        assert_eq!(cache.stats().misses.load(Ordering::Relaxed), 1);
        assert_eq!(cache.stats().entry_count.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_ttl_expiry_is_a_miss() {
        let cache = MemoryTileCache::new(16, 0);

        cache.set("k", Bytes::from_static(b"v")).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(cache.get("k").await.is_none());
        assert_eq!(cache.stats().entry_count.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_memory_bounded_eviction() {
        let cache = MemoryTileCache::new(1, 60);
        let tile = Bytes::from(vec![0u8; 100 * 1024]);

        for i in 0..15 {
            cache.set(&format!("tile{}", i), tile.clone()).await;
        }

        assert!(cache.stats().evictions.load(Ordering::Relaxed) > 0);
        assert!(cache.stats().size_bytes.load(Ordering::Relaxed) <= 1024 * 1024);
    }

    #[tokio::test]
    async fn test_replace_keeps_size_consistent() {
        let cache = MemoryTileCache::new(16, 60);

        cache.set("k", Bytes::from_static(b"12345")).await;
        cache.set("k", Bytes::from_static(b"123456789")).await;

        assert_eq!(cache.stats().entry_count.load(Ordering::Relaxed), 1);
        assert_eq!(cache.stats().size_bytes.load(Ordering::Relaxed), 9);
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = MemoryTileCache::new(16, 60);
        cache.set("a", Bytes::from_static(b"x")).await;
        cache.set("b", Bytes::from_static(b"y")).await;

        cache.clear().await;
        assert!(cache.get("a").await.is_none());
        assert_eq!(cache.stats().size_bytes.load(Ordering::Relaxed), 0);
    }
}
