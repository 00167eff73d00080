//! Result Cache
//!
//! Bounded cache of fully-built search responses keyed by the canonical
//! query serialization. Entries expire after the configured TTL; capacity
//! overflow evicts the least-recently-used entry. Any successful write to
//! the index invalidates the whole cache.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::config::PerformanceConfig;
use crate::model::{SearchQuery, SearchResults};

/// Cache observability counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetrics {
    pub hit_rate: f64,
    pub total_hits: u64,
    pub total_misses: u64,
    pub cache_size: usize,
    /// Rough content-byte estimate of cached responses
    pub memory_bytes: u64,
}

struct CachedResponse {
    results: SearchResults,
    inserted_at: Instant,
    approx_bytes: u64,
}

struct CacheInner {
    lru: LruCache<String, CachedResponse>,
    bytes: u64,
}

/// TTL + LRU cache of search responses
pub struct ResultCache {
    inner: Mutex<CacheInner>,
    ttl: Duration,
    enabled: bool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResultCache {
    pub fn new(config: &PerformanceConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_cache_size.max(1))
            .unwrap_or_else(|| NonZeroUsize::new(1).expect("1 is non-zero"));
        Self {
            inner: Mutex::new(CacheInner {
                lru: LruCache::new(capacity),
                bytes: 0,
            }),
            ttl: Duration::from_millis(config.cache_ttl_ms),
            enabled: config.cache_enabled,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Canonical cache key over query text, filters, pagination, boosts and
    /// presentation flags (struct field order is stable)
    pub fn key(query: &SearchQuery) -> String {
        serde_json::to_string(query).unwrap_or_else(|_| query.query.clone())
    }

    /// Fetch a non-expired response; counts a hit or miss
    pub fn get(&self, key: &str) -> Option<SearchResults> {
        if !self.enabled {
            return None;
        }
        let mut inner = self.inner.lock().ok()?;

        // Peek first; mutating the map inside the peek borrow is not possible
        let fresh: Option<SearchResults> = match inner.lru.get(key) {
            Some(cached) if cached.inserted_at.elapsed() < self.ttl => {
                Some(cached.results.clone())
            }
            _ => None,
        };
        if let Some(results) = fresh {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(results);
        }

        // Expired entries are dropped eagerly
        if let Some(old) = inner.lru.pop(key) {
            inner.bytes = inner.bytes.saturating_sub(old.approx_bytes);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn put(&self, key: String, results: &SearchResults) {
        if !self.enabled {
            return;
        }
        let approx: u64 = key.len() as u64
            + results
                .results
                .iter()
                .map(|r| (r.entry.title.len() + r.entry.content.len()) as u64)
                .sum::<u64>();
        if let Ok(mut inner) = self.inner.lock() {
            if let Some((_, evicted)) = inner.lru.push(
                key,
                CachedResponse {
                    results: results.clone(),
                    inserted_at: Instant::now(),
                    approx_bytes: approx,
                },
            ) {
                inner.bytes = inner.bytes.saturating_sub(evicted.approx_bytes);
            }
            inner.bytes += approx;
        }
    }

    /// Total invalidation; no stale hit may outlive a write commit
    pub fn invalidate_all(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.lru.clear();
            inner.bytes = 0;
        }
    }

    pub fn metrics(&self) -> CacheMetrics {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let (size, bytes) = self
            .inner
            .lock()
            .map(|c| (c.lru.len(), c.bytes))
            .unwrap_or((0, 0));
        CacheMetrics {
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            total_hits: hits,
            total_misses: misses,
            cache_size: size,
            memory_bytes: bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache_with(ttl_ms: u64, capacity: usize) -> ResultCache {
        ResultCache::new(&PerformanceConfig {
            cache_ttl_ms: ttl_ms,
            max_cache_size: capacity,
            ..Default::default()
        })
    }

    #[test]
    fn test_hit_after_put() {
        let cache = cache_with(60_000, 10);
        let results = SearchResults {
            total_matches: 1,
            ..Default::default()
        };
        cache.put("k".into(), &results);
        let hit = cache.get("k").unwrap();
        assert_eq!(hit.total_matches, 1);
        assert_eq!(cache.metrics().total_hits, 1);
    }

    #[test]
    fn test_expiry() {
        let cache = cache_with(0, 10);
        cache.put("k".into(), &SearchResults::default());
        assert!(cache.get("k").is_none());
        assert_eq!(cache.metrics().total_misses, 1);
        // The expired entry was dropped eagerly
        assert_eq!(cache.metrics().cache_size, 0);
    }

    #[test]
    fn test_capacity_eviction() {
        let cache = cache_with(60_000, 2);
        cache.put("a".into(), &SearchResults::default());
        cache.put("b".into(), &SearchResults::default());
        cache.put("c".into(), &SearchResults::default());
        assert_eq!(cache.metrics().cache_size, 2);
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn test_invalidate_all() {
        let cache = cache_with(60_000, 10);
        cache.put("a".into(), &SearchResults::default());
        cache.invalidate_all();
        assert!(cache.get("a").is_none());
        assert_eq!(cache.metrics().cache_size, 0);
        assert_eq!(cache.metrics().memory_bytes, 0);
    }

    #[test]
    fn test_key_distinguishes_pagination() {
        let a = SearchQuery::simple("text");
        let mut b = SearchQuery::simple("text");
        b.offset = 10;
        assert_ne!(ResultCache::key(&a), ResultCache::key(&b));
    }

    #[test]
    fn test_disabled_cache_never_hits() {
        let cache = ResultCache::new(&PerformanceConfig {
            cache_enabled: false,
            ..Default::default()
        });
        cache.put("k".into(), &SearchResults::default());
        assert!(cache.get("k").is_none());
    }
}
