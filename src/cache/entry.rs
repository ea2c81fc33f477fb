use std::time::{Duration, Instant};

/// A cached value with its expiry and access bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub expires_at: Instant,
    pub last_accessed_at: Instant,
    pub hit_count: u64,
}

impl<V> CacheEntry<V> {
    #[must_use]
    pub fn new(value: V, ttl: Duration, now: Instant) -> Self {
        // A TTL too large to represent never expires in practice.
        let expires_at = now.checked_add(ttl).unwrap_or_else(|| now + Duration::from_secs(u32::MAX.into()));
        Self { value, expires_at, last_accessed_at: now, hit_count: 0 }
    }

    #[inline]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_accessed_at = now;
        self.hit_count += 1;
    }

    pub fn info(&self) -> EntryInfo {
        EntryInfo {
            expires_at: self.expires_at,
            last_accessed_at: self.last_accessed_at,
            hit_count: self.hit_count,
        }
    }
}

/// Metadata of a cache entry, without its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryInfo {
    pub expires_at: Instant,
    pub last_accessed_at: Instant,
    pub hit_count: u64,
}
