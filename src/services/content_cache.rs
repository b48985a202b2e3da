//! Generated-content cache.
//!
//! Learning content is shared between children who scan the same object and
//! fall in the same age bucket. Entries expire after a fixed TTL and are
//! removed lazily by the lookup that finds them expired. A hit promotes the
//! entry, so capacity eviction drops the least recently used key.

use crate::models::{AgeBucket, Spirit};
use chrono::{DateTime, TimeDelta, Utc};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};
use std::time::Duration;
use tracing::instrument;

/// Default entry lifetime.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Default maximum number of entries.
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// Cache key: canonical object type plus age bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Canonical object type.
    pub object_type: String,
    /// Age bucket.
    pub bucket: AgeBucket,
}

impl CacheKey {
    /// Builds the key for an object type and child age.
    #[must_use]
    pub fn new(object_type: impl Into<String>, child_age: u32) -> Self {
        Self {
            object_type: object_type.into(),
            bucket: AgeBucket::from_age(child_age),
        }
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}|{}", self.object_type, self.bucket)
    }
}

/// Cached learning bundle with its spirit.
///
/// Immutable once stored; regeneration replaces the whole entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Canonical object type.
    pub object_type: String,
    /// Spirit created for this object and bucket.
    pub spirit: Spirit,
    /// Fact.
    pub fact: String,
    /// Quiz question.
    pub quiz_question: String,
    /// Quiz answer as generated.
    pub quiz_answer: String,
    /// Spirit dialogue lines.
    pub dialogues: Vec<String>,
    /// Entry is a hit while `now <= expire_at`.
    pub expire_at: DateTime<Utc>,
}

/// TTL cache over a bounded LRU map.
pub struct ContentCache {
    entries: RwLock<LruCache<CacheKey, Arc<CacheEntry>>>,
    ttl: Duration,
}

impl ContentCache {
    /// Creates a cache; a zero capacity is raised to one.
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Returns the configured TTL.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Expiry for an entry stored at `now`.
    #[must_use]
    pub fn expiry_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let ttl = TimeDelta::from_std(self.ttl).unwrap_or(TimeDelta::MAX);
        now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Looks up a live entry.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        self.get_at(key, Utc::now())
    }

    fn read(&self) -> RwLockReadGuard<'_, LruCache<CacheKey, Arc<CacheEntry>>> {
        self.entries.read().unwrap_or_else(|poisoned| {
            tracing::warn!("Content cache lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, LruCache<CacheKey, Arc<CacheEntry>>> {
        self.entries.write().unwrap_or_else(|poisoned| {
            tracing::warn!("Content cache lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Marks a key most recently used.
    ///
    /// Skipped while the lock is held elsewhere.
    fn promote(&self, key: &CacheKey) {
        match self.entries.try_write() {
            Ok(mut entries) => {
                entries.promote(key);
            },
            Err(TryLockError::Poisoned(poisoned)) => {
                poisoned.into_inner().promote(key);
            },
            Err(TryLockError::WouldBlock) => {},
        }
    }

    /// Looks up a live entry as of `now`.
    ///
    /// A hit is promoted to most recently used; an expired entry is removed.
    #[instrument(skip(self), fields(key = %key))]
    pub fn get_at(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<Arc<CacheEntry>> {
        let found = self.read().peek(key).cloned();

        match found {
            Some(entry) if now <= entry.expire_at => {
                self.promote(key);
                tracing::debug!("Content cache hit");
                metrics::counter!("cityling_content_cache_lookups_total", "result" => "hit")
                    .increment(1);
                Some(entry)
            },
            Some(_) => {
                {
                    let mut entries = self.write();
                    // Another writer may have replaced it since the read.
                    if entries.peek(key).is_some_and(|e| now > e.expire_at) {
                        entries.pop(key);
                    }
                }
                tracing::debug!("Content cache entry expired");
                metrics::counter!("cityling_content_cache_lookups_total", "result" => "expired")
                    .increment(1);
                None
            },
            None => {
                tracing::debug!("Content cache miss");
                metrics::counter!("cityling_content_cache_lookups_total", "result" => "miss")
                    .increment(1);
                None
            },
        }
    }

    /// Stores or replaces an entry.
    pub fn put(&self, key: CacheKey, entry: CacheEntry) -> Arc<CacheEntry> {
        let entry = Arc::new(entry);
        let mut entries = self.write();
        entries.put(key, Arc::clone(&entry));
        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!("cityling_content_cache_size").set(entries.len() as f64);
        entry
    }

    /// Number of stored entries, including expired ones not yet evicted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns true when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ContentCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(object_type: &str, expire_at: DateTime<Utc>) -> CacheEntry {
        CacheEntry {
            object_type: object_type.to_string(),
            spirit: Spirit {
                id: "sp".to_string(),
                name: "木木".to_string(),
                object_type: object_type.to_string(),
                personality: "活泼好奇".to_string(),
                intro: String::new(),
                created_at: Utc::now(),
            },
            fact: "fact".to_string(),
            quiz_question: "q".to_string(),
            quiz_answer: "a".to_string(),
            dialogues: Vec::new(),
            expire_at,
        }
    }

    #[test]
    fn test_key_buckets_ages() {
        assert_eq!(CacheKey::new("tree", 5), CacheKey::new("tree", 3));
        assert_ne!(CacheKey::new("tree", 6), CacheKey::new("tree", 7));
        assert_eq!(CacheKey::new("tree", 12).to_string(), "tree|3");
    }

    #[test]
    fn test_ttl_boundary_inclusive() {
        let cache = ContentCache::default();
        let stored_at = Utc::now();
        let expire_at = cache.expiry_from(stored_at);
        let key = CacheKey::new("mailbox", 8);
        cache.put(key.clone(), entry("mailbox", expire_at));

        assert!(cache.get_at(&key, expire_at).is_some());
        assert!(
            cache
                .get_at(&key, expire_at + TimeDelta::milliseconds(1))
                .is_none()
        );
        assert!(cache.is_empty());
        assert!(cache.get_at(&key, stored_at).is_none());
    }

    #[test]
    fn test_put_replaces_entry() {
        let cache = ContentCache::default();
        let key = CacheKey::new("tree", 9);
        let later = Utc::now() + TimeDelta::minutes(5);
        cache.put(key.clone(), entry("tree", later));
        let mut replacement = entry("tree", later);
        replacement.fact = "new fact".to_string();
        cache.put(key.clone(), replacement);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key).map(|e| e.fact.clone()).as_deref(), Some("new fact"));
    }

    #[test]
    fn test_capacity_evicts_oldest_insert_without_reads() {
        let cache = ContentCache::new(1, DEFAULT_CACHE_TTL);
        let later = Utc::now() + TimeDelta::minutes(5);
        cache.put(CacheKey::new("tree", 5), entry("tree", later));
        cache.put(CacheKey::new("mailbox", 5), entry("mailbox", later));
        assert!(cache.get(&CacheKey::new("tree", 5)).is_none());
        assert!(cache.get(&CacheKey::new("mailbox", 5)).is_some());
    }

    #[test]
    fn test_hit_promotes_entry_before_eviction() {
        let cache = ContentCache::new(2, DEFAULT_CACHE_TTL);
        let later = Utc::now() + TimeDelta::minutes(5);
        let tree = CacheKey::new("tree", 5);
        let mailbox = CacheKey::new("mailbox", 5);
        let manhole = CacheKey::new("manhole", 5);

        cache.put(tree.clone(), entry("tree", later));
        cache.put(mailbox.clone(), entry("mailbox", later));
        assert!(cache.get(&tree).is_some());
        cache.put(manhole.clone(), entry("manhole", later));

        assert!(cache.get(&mailbox).is_none());
        assert!(cache.get(&tree).is_some());
        assert!(cache.get(&manhole).is_some());
    }

    #[test]
    fn test_poisoned_lock_still_serves() {
        let cache = Arc::new(ContentCache::default());
        let key = CacheKey::new("tree", 5);
        cache.put(key.clone(), entry("tree", Utc::now() + TimeDelta::minutes(5)));

        let poisoner = Arc::clone(&cache);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.entries.write().unwrap();
            std::panic::resume_unwind(Box::new("poison the lock"));
        })
        .join();
        assert!(cache.entries.is_poisoned());

        assert!(cache.get(&key).is_some());
        let other = CacheKey::new("mailbox", 5);
        cache.put(other.clone(), entry("mailbox", Utc::now() + TimeDelta::minutes(5)));
        assert!(cache.get(&other).is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_zero_capacity_is_raised() {
        let cache = ContentCache::new(0, DEFAULT_CACHE_TTL);
        cache.put(
            CacheKey::new("tree", 5),
            entry("tree", Utc::now() + TimeDelta::minutes(1)),
        );
        assert_eq!(cache.len(), 1);
    }
}
