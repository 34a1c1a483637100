//! In-process verification cache backed by moka.
//!
//! Entries carry their own deadline and are re-checked against the caller's
//! clock on every read.

use std::time::{Duration, Instant};

use moka::Expiry;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;

use crate::services::cache::client::{CacheKey, VerificationCache, VerificationResult};

#[derive(Debug, Clone)]
struct Entry {
    result: VerificationResult,
    // Absolute deadline (unix seconds); checked on every read.
    deadline: i64,
    ttl: Duration,
}

struct EntryExpiry;

impl Expiry<CacheKey, Entry> for EntryExpiry {
    fn expire_after_create(&self, _key: &CacheKey, value: &Entry, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &CacheKey,
        value: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process verification cache (moka, LRU eviction, per-entry expiry).
///
/// - Capacity bounds memory under token flooding; least recently used entries go first.
/// - Entries live for `min(requested ttl, max_age)`.
/// - moka expires lazily, so `get` re-checks the stored deadline against the caller's clock.
#[derive(Clone)]
pub struct MemoryVerificationCache {
    inner: Cache<CacheKey, Entry>,
    max_age: Duration,
}

impl std::fmt::Debug for MemoryVerificationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryVerificationCache")
            .field("entries", &self.inner.entry_count())
            .field("max_age", &self.max_age)
            .finish()
    }
}

impl MemoryVerificationCache {
    pub fn new(capacity: u64, max_age: Duration) -> Self {
        let inner = Cache::builder()
            .name("token-verification")
            .max_capacity(capacity)
            .eviction_policy(EvictionPolicy::lru())
            .expire_after(EntryExpiry)
            .build();
        Self { inner, max_age }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Flush pending maintenance (evictions, expirations). Mostly useful in tests.
    pub fn run_pending_tasks(&self) {
        self.inner.run_pending_tasks();
    }
}

impl VerificationCache for MemoryVerificationCache {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn get(&self, key: &CacheKey, now: i64) -> Option<VerificationResult> {
        let entry = self.inner.get(key)?;
        if now >= entry.deadline {
            self.inner.invalidate(key);
            return None;
        }
        Some(entry.result)
    }

    fn put(&self, key: CacheKey, result: VerificationResult, now: i64, ttl: Duration) {
        let ttl = ttl.min(self.max_age);
        if ttl.is_zero() {
            return;
        }
        let deadline = now.saturating_add(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX));
        self.inner.insert(
            key,
            Entry {
                result,
                deadline,
                ttl,
            },
        );
    }

    fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }

    fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }
}
