//! Bounded LRU + TTL cache for fetched resource content
//!
//! Owned by the resource provider. Entries are keyed by resource URI and
//! expire `ttl` after their last access; a hit refreshes both the timestamp
//! and the LRU position, so the LRU tail is always the entry with the oldest
//! timestamp. Eviction ties (equal timestamps) resolve by the LRU list's
//! insertion order.

use crate::config::CacheConfig;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// A cached resource plus its bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub uri: String,
    pub content: Vec<u8>,
    /// Last-access time; refreshed on every hit.
    pub timestamp: Instant,
    pub size_bytes: usize,
}

/// Cache occupancy snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
}

/// Internally synchronized resource cache.
///
/// Callers never lock anything themselves; two concurrent misses on the same
/// URI may both populate and the second write simply wins.
pub struct ResourceCache {
    inner: Mutex<LruCache<String, CacheEntry>>,
    ttl: Duration,
    max_size_per_resource: usize,
    capacity: usize,
}

impl ResourceCache {
    pub fn new(config: &CacheConfig) -> Self {
        let capacity = config.max_size.max(1);
        Self {
            inner: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).expect("capacity is at least 1"),
            )),
            ttl: Duration::from_secs(config.ttl_seconds),
            max_size_per_resource: config.max_size_per_resource,
            capacity,
        }
    }

    /// Look up a resource; a hit refreshes the entry's timestamp.
    ///
    /// An entry older than the TTL is dropped and reported as a miss.
    pub fn get(&self, uri: &str) -> Option<CacheEntry> {
        let mut cache = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let expired = match cache.get_mut(uri) {
            Some(entry) => {
                if entry.timestamp.elapsed() < self.ttl {
                    entry.timestamp = Instant::now();
                    return Some(entry.clone());
                }
                true
            }
            None => false,
        };
        if expired {
            debug!("cache entry for {} expired", uri);
            cache.pop(uri);
        }
        None
    }

    /// Insert a resource, evicting the oldest entry at capacity.
    ///
    /// Oversized resources are skipped silently (logged, not an error).
    pub fn put(&self, uri: &str, content: Vec<u8>) {
        let size_bytes = content.len();
        if size_bytes > self.max_size_per_resource {
            debug!(
                "not caching {} ({} bytes exceeds per-resource limit {})",
                uri, size_bytes, self.max_size_per_resource
            );
            return;
        }
        let mut cache = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if cache.len() >= self.capacity && !cache.contains(uri) {
            if let Some((evicted, _)) = cache.pop_lru() {
                debug!("evicting {} to make room for {}", evicted, uri);
            }
        }
        cache.put(
            uri.to_string(),
            CacheEntry {
                uri: uri.to_string(),
                content,
                timestamp: Instant::now(),
                size_bytes,
            },
        );
    }

    /// Drop the single entry with the oldest timestamp, if any.
    pub fn evict_oldest(&self) -> Option<String> {
        let mut cache = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        cache.pop_lru().map(|(uri, _)| uri)
    }

    /// Remove a specific entry (used when a resource is reported updated).
    pub fn invalidate(&self, uri: &str) -> bool {
        let mut cache = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        cache.pop(uri).is_some()
    }

    pub fn stats(&self) -> CacheStats {
        let cache = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        CacheStats {
            size: cache.len(),
            capacity: self.capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache_with(max_size: usize, ttl_seconds: u64) -> ResourceCache {
        ResourceCache::new(&CacheConfig {
            max_size,
            ttl_seconds,
            max_size_per_resource: 1024,
        })
    }

    #[test]
    fn test_put_then_get_hits() {
        let cache = cache_with(4, 300);
        cache.put("resource://file/a", b"hello".to_vec());
        let entry = cache.get("resource://file/a").unwrap();
        assert_eq!(entry.content, b"hello");
        assert_eq!(entry.size_bytes, 5);
    }

    #[test]
    fn test_double_insert_is_one_entry() {
        let cache = cache_with(4, 300);
        cache.put("resource://file/a", b"v1".to_vec());
        cache.put("resource://file/a", b"v2".to_vec());
        assert_eq!(cache.stats().size, 1);
        // last write wins
        assert_eq!(cache.get("resource://file/a").unwrap().content, b"v2");
    }

    #[test]
    fn test_capacity_bound_evicts_oldest_first() {
        let cache = cache_with(2, 300);
        cache.put("a", b"1".to_vec());
        cache.put("b", b"2".to_vec());
        cache.put("c", b"3".to_vec());
        assert_eq!(cache.stats().size, 2);
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn test_hit_refreshes_lru_position() {
        let cache = cache_with(2, 300);
        cache.put("a", b"1".to_vec());
        cache.put("b", b"2".to_vec());
        // touch a so b becomes the oldest
        assert!(cache.get("a").is_some());
        cache.put("c", b"3".to_vec());
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
    }

    #[test]
    fn test_ttl_expiry_is_a_miss() {
        let cache = cache_with(4, 0);
        cache.put("a", b"1".to_vec());
        // ttl of zero expires immediately
        assert!(cache.get("a").is_none());
        assert_eq!(cache.stats().size, 0);
    }

    #[test]
    fn test_oversized_resource_is_not_cached() {
        let cache = cache_with(4, 300);
        cache.put("big", vec![0u8; 2048]);
        assert!(cache.get("big").is_none());
        assert_eq!(cache.stats().size, 0);
    }

    #[test]
    fn test_evict_oldest_and_invalidate() {
        let cache = cache_with(4, 300);
        cache.put("a", b"1".to_vec());
        cache.put("b", b"2".to_vec());
        assert_eq!(cache.evict_oldest().as_deref(), Some("a"));
        assert!(cache.invalidate("b"));
        assert!(!cache.invalidate("b"));
        assert_eq!(cache.stats().size, 0);
    }
}
