use crate::cache::config::CacheConfig;
use crate::cache::entry::{CacheEntry, EntryInfo};
use crate::cache::metrics::{CacheMetrics, CacheStats};
use crate::cache::policy::{purge_expired, purge_matching};
use lru::LruCache;
use parking_lot::RwLock;
use std::num::NonZeroUsize;
use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// A thread-safe, bounded cache with per-entry TTL and LRU eviction.
///
/// Expired entries are dropped lazily when read and by a background sweep
/// thread that lives as long as the last clone of the cache.
pub struct Cache<V> {
    shared: Arc<Shared<V>>,
}

impl<V> Clone for Cache<V> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

struct Shared<V> {
    store: RwLock<LruCache<String, CacheEntry<V>>>,
    default_ttl: Duration,
    metrics: CacheMetrics,
    // Dropping the sender stops the sweep thread.
    _sweep_stop: Option<mpsc::Sender<()>>,
}

impl<V> Cache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates a cache holding at most `max_size` entries and starts the sweep thread.
    pub fn new(max_size: usize, default_ttl: Duration) -> Self {
        Self::with_sweep_interval(max_size, default_ttl, DEFAULT_SWEEP_INTERVAL)
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::with_sweep_interval(config.max_size, config.default_ttl, config.sweep_interval)
    }

    pub fn with_sweep_interval(max_size: usize, default_ttl: Duration, interval: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_size).unwrap_or(NonZeroUsize::MIN);
        let (tx, rx) = mpsc::channel::<()>();
        let shared = Arc::new(Shared {
            store: RwLock::new(LruCache::new(capacity)),
            default_ttl,
            metrics: CacheMetrics::default(),
            _sweep_stop: Some(tx),
        });
        spawn_sweeper(Arc::downgrade(&shared), rx, interval.max(Duration::from_millis(1)));
        Self { shared }
    }

    /// Returns the value under `key` if present and not expired.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let metrics = &self.shared.metrics;
        let mut store = self.shared.store.write();
        let expired = match store.get_mut(key) {
            Some(entry) if !entry.is_expired_at(now) => {
                entry.touch(now);
                metrics.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            // Lazy eviction on access
            store.pop(key);
            metrics.expirations.fetch_add(1, Ordering::Relaxed);
        }
        metrics.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_with_ttl(key, value, self.shared.default_ttl);
    }

    /// Inserts or overwrites `key`. Inserting a new key into a full cache
    /// first evicts the least recently accessed entry.
    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let entry = CacheEntry::new(value, ttl, Instant::now());
        let mut store = self.shared.store.write();
        let replacing = store.contains(&key);
        if let Some((evicted, _)) = store.push(key, entry) {
            if !replacing {
                self.shared.metrics.evictions.fetch_add(1, Ordering::Relaxed);
                log::debug!("cache evicted least recently used key {evicted}");
            }
        }
    }

    /// Removes `key`. Returns whether an entry was present.
    pub fn delete(&self, key: &str) -> bool {
        self.shared.store.write().pop(key).is_some()
    }

    /// Removes every key starting with `prefix`. Returns number removed.
    pub fn delete_prefix(&self, prefix: &str) -> usize {
        purge_matching(&self.shared.store, |k| k.starts_with(prefix))
    }

    /// Removes every key containing `fragment`. Returns number removed.
    pub fn delete_containing(&self, fragment: &str) -> usize {
        purge_matching(&self.shared.store, |k| k.contains(fragment))
    }

    /// Drops all entries. Statistics are kept.
    pub fn clear(&self) {
        self.shared.store.write().clear();
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn size(&self) -> usize {
        self.shared.store.read().len()
    }

    pub fn capacity(&self) -> usize {
        self.shared.store.read().cap().get()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.shared.metrics.snapshot()
    }

    /// Looks at a live entry without touching recency or statistics.
    pub fn peek(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        self.shared
            .store
            .read()
            .peek(key)
            .filter(|entry| !entry.is_expired_at(now))
            .map(|entry| entry.value.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.shared.store.read().peek(key).is_some_and(|entry| !entry.is_expired_at(now))
    }

    /// Access bookkeeping for `key`, expired or not.
    pub fn inspect(&self, key: &str) -> Option<EntryInfo> {
        self.shared.store.read().peek(key).map(CacheEntry::info)
    }

    /// Force a TTL sweep now. Returns number removed.
    pub fn purge_expired_now(&self) -> usize {
        purge_expired(&self.shared.store, &self.shared.metrics)
    }
}

fn spawn_sweeper<V>(shared: Weak<Shared<V>>, stop: mpsc::Receiver<()>, interval: Duration)
where
    V: Send + Sync + 'static,
{
    let spawned = std::thread::Builder::new().name("docgate-cache-sweep".into()).spawn(move || {
        loop {
            match stop.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
            let Some(shared) = shared.upgrade() else { break };
            purge_expired(&shared.store, &shared.metrics);
        }
    });
    if let Err(e) = spawned {
        log::warn!("cache sweep thread not started, expired entries are only dropped on read: {e}");
    }
}
