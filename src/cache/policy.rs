use crate::cache::entry::CacheEntry;
use crate::cache::metrics::CacheMetrics;
use lru::LruCache;
use parking_lot::RwLock;
use std::sync::atomic::Ordering;
use std::time::Instant;

/// Removes expired entries from the store. Returns number removed.
pub fn purge_expired<V>(store: &RwLock<LruCache<String, CacheEntry<V>>>, metrics: &CacheMetrics) -> usize {
    let now = Instant::now();
    let mut cache = store.write();
    let expired_keys: Vec<String> =
        cache.iter().filter(|(_, entry)| entry.is_expired_at(now)).map(|(k, _)| k.clone()).collect();

    let count = expired_keys.len();
    for key in expired_keys {
        cache.pop(&key);
    }
    drop(cache);
    if count > 0 {
        metrics.expirations.fetch_add(count as u64, Ordering::Relaxed);
        log::debug!("cache sweep removed {count} expired entries");
    }
    count
}

/// Removes every entry whose key satisfies `pred`. Returns number removed.
pub fn purge_matching<V, F>(store: &RwLock<LruCache<String, CacheEntry<V>>>, pred: F) -> usize
where
    F: Fn(&str) -> bool,
{
    let mut cache = store.write();
    let keys: Vec<String> = cache.iter().filter(|(k, _)| pred(k.as_str())).map(|(k, _)| k.clone()).collect();
    for key in &keys {
        cache.pop(key);
    }
    keys.len()
}
