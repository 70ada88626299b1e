//! Generic key-value cache with per-entry TTL.
//!
//! [`TtlCache`] maps a derived string key to `{value, stored_at, ttl}`.
//! An entry is valid while `now - stored_at < ttl`; stale entries read as
//! absent and are dropped on the miss that observes them. There is no
//! size bound, the key space is bounded by distinct queries in practice.
//!
//! Storage is a moka cache with a per-entry [`Expiry`], so memory held by
//! stale entries is reclaimed in the background. Validity itself is
//! decided against [`tokio::time::Instant`], which follows a paused test
//! clock.

use std::time::Duration;

use moka::Expiry;
use moka::ops::compute::Op;
use moka::sync::Cache;
use tokio::time::Instant;

/// A cached value together with the time it was stored and its TTL.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub stored_at: Instant,
    pub ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            stored_at: Instant::now(),
            ttl,
        }
    }

    /// Whether the entry is still within its TTL window.
    pub fn is_valid(&self) -> bool {
        self.stored_at.elapsed() < self.ttl
    }

    /// Time elapsed since the entry was stored.
    pub fn age(&self) -> Duration {
        self.stored_at.elapsed()
    }
}

/// Expiry policy: each entry lives exactly as long as its own TTL, and a
/// rewrite restarts the window.
struct EntryTtl;

impl<V> Expiry<String, CacheEntry<V>> for EntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry<V>,
        _created_at: std::time::Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry<V>,
        _updated_at: std::time::Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Thread-safe TTL cache keyed on strings.
///
/// ```rust
/// # use keepsake::cache::TtlCache;
/// # use std::time::Duration;
/// let cache = TtlCache::new();
/// cache.set("students:1", 42, Duration::from_secs(60));
/// assert_eq!(cache.get("students:1"), Some(42));
///
/// cache.invalidate(Some("students"));
/// assert_eq!(cache.get("students:1"), None);
/// ```
pub struct TtlCache<V> {
    entries: Cache<String, CacheEntry<V>>,
}

impl<V> TtlCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create an empty, unbounded cache.
    pub fn new() -> Self {
        let entries = Cache::builder().expire_after(EntryTtl).build();
        Self { entries }
    }

    /// Look up a value.
    ///
    /// Returns `None` when the key is absent or its TTL has elapsed. A
    /// stale entry is removed as a side effect.
    pub fn get(&self, key: &str) -> Option<V> {
        let entry = self.entries.get(key)?;
        if entry.is_valid() {
            Some(entry.value)
        } else {
            self.remove_if_stale(key);
            None
        }
    }

    /// Drop `key` only while the stored entry is still stale; a value
    /// written concurrently since the stale read survives.
    fn remove_if_stale(&self, key: &str) {
        self.entries
            .entry_by_ref(key)
            .and_compute_with(|current| match current {
                Some(current) if !current.value().is_valid() => Op::Remove,
                _ => Op::Nop,
            });
    }

    /// Look up the full entry, including its age and TTL.
    pub fn get_entry(&self, key: &str) -> Option<CacheEntry<V>> {
        self.entries.get(key).filter(CacheEntry::is_valid)
    }

    /// Store a value, overwriting any previous entry and resetting its age.
    pub fn set(&self, key: &str, value: V, ttl: Duration) {
        self.entries
            .insert(key.to_string(), CacheEntry::new(value, ttl));
    }

    /// Remove exactly one key.
    pub fn remove(&self, key: &str) {
        self.entries.invalidate(key);
    }

    /// Invalidate entries by pattern.
    ///
    /// With `None`, everything is removed. With `Some(pattern)`, every key
    /// that *contains* `pattern` is removed (substring match, not prefix),
    /// so passing a collection name drops every query against it.
    ///
    /// Returns the number of keys removed.
    pub fn invalidate(&self, pattern: Option<&str>) -> usize {
        let doomed: Vec<_> = self
            .entries
            .iter()
            .filter(|(key, _)| pattern.is_none_or(|p| key.contains(p)))
            .map(|(key, _)| key)
            .collect();
        for key in &doomed {
            self.entries.invalidate(key.as_str());
        }
        doomed.len()
    }

    /// Number of entries that are currently valid.
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.is_valid())
            .count()
    }

    /// Whether no valid entries remain.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V> Default for TtlCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
