//! Verification cache interface used by the gateway filter.
use std::fmt;
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::services::auth::identity::Identity;
use crate::services::auth::signature::VerifyError;

/// SHA-256 of the raw compact token.
///
/// Derived from the exact token bytes, so two different token strings never share an entry.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(raw_token: &str) -> Self {
        Self(Sha256::digest(raw_token.as_bytes()).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // A short prefix is enough for log correlation.
        write!(f, "Fingerprint(")?;
        for b in &self.0[..6] {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "..)")
    }
}

/// Cache key: token fingerprint plus the key-set generation the outcome was computed under.
///
/// After a rotation, lookups use the new generation and miss every older entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub fingerprint: Fingerprint,
    pub generation: u64,
}

impl CacheKey {
    pub fn new(fingerprint: Fingerprint, generation: u64) -> Self {
        Self {
            fingerprint,
            generation,
        }
    }
}

/// Outcome of verifying one token. Never mutated once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationResult {
    Valid { identity: Identity, expires_at: i64 },
    Invalid(VerifyError),
}

/// A bounded cache of verification outcomes.
///
/// The cache is an optimisation only: the filter must reach the same decision
/// whether an entry is present or not. Implementations must be safe to share
/// across all in-flight requests.
pub trait VerificationCache: Send + Sync {
    // Returns the cache backend name (for logging).
    fn backend_name(&self) -> &'static str;

    // Lookup at time `now`; an entry whose deadline has passed is a miss.
    fn get(&self, key: &CacheKey, now: i64) -> Option<VerificationResult>;

    // Store `result` until `now + ttl` at the latest. A zero ttl stores nothing.
    fn put(&self, key: CacheKey, result: VerificationResult, now: i64, ttl: Duration);

    fn invalidate_all(&self);

    fn entry_count(&self) -> u64;
}

/// Cache that never stores anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopVerificationCache;

impl VerificationCache for NoopVerificationCache {
    fn backend_name(&self) -> &'static str {
        "disabled"
    }

    fn get(&self, _key: &CacheKey, _now: i64) -> Option<VerificationResult> {
        None
    }

    fn put(&self, _key: CacheKey, _result: VerificationResult, _now: i64, _ttl: Duration) {}

    fn invalidate_all(&self) {}

    fn entry_count(&self) -> u64 {
        0
    }
}
