//! Per-request token check: parse → cache → verify → validate → decide.
//!
//! Flow per request:
//! `Extracting → {ParseFailed | Parsed}`,
//! `Parsed → CacheCheck → {CacheHit | CacheMiss}`,
//! `CacheMiss → Verifying → {VerifyFailed | VerifyOk}`,
//! `VerifyOk → ValidatingClaims → {ClaimsFailed | Allowed}`.
//!
//! Every failure ends in `Decision::Rejected`; nothing here panics or
//! propagates an error to the request worker.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::services::auth::claims::{self, ClaimsError};
use crate::services::auth::identity::Identity;
use crate::services::auth::keys::{KeyError, KeyStore, RotationOutcome, VerificationKey};
use crate::services::auth::policy::Policy;
use crate::services::auth::signature::{self, VerifyError};
use crate::services::auth::token::{ParseError, TokenParser};
use crate::services::cache::{CacheKey, VerificationCache, VerificationResult};

/// Externally visible reason codes. Closed set; internal detail stays in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasonCode {
    MissingToken,
    MalformedToken,
    InvalidSignature,
    Expired,
    NotYetValid,
    IssuerMismatch,
    AudienceMismatch,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingToken => "missing_token",
            Self::MalformedToken => "malformed_token",
            Self::InvalidSignature => "invalid_signature",
            Self::Expired => "expired",
            Self::NotYetValid => "not_yet_valid",
            Self::IssuerMismatch => "issuer_mismatch",
            Self::AudienceMismatch => "audience_mismatch",
        }
    }

    /// Authenticated, but the claims violate policy (403 rather than 401).
    pub fn is_policy_violation(&self) -> bool {
        matches!(self, Self::IssuerMismatch | Self::AudienceMismatch)
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a request was rejected (internal detail).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Verify(#[from] VerifyError),
    #[error(transparent)]
    Claims(#[from] ClaimsError),
}

impl Rejection {
    pub fn code(&self) -> ReasonCode {
        match self {
            Self::Parse(ParseError::MissingHeader) => ReasonCode::MissingToken,
            Self::Parse(_) => ReasonCode::MalformedToken,
            Self::Verify(_) => ReasonCode::InvalidSignature,
            Self::Claims(ClaimsError::Expired) => ReasonCode::Expired,
            Self::Claims(ClaimsError::NotYetValid) => ReasonCode::NotYetValid,
            Self::Claims(ClaimsError::IssuerMismatch) => ReasonCode::IssuerMismatch,
            Self::Claims(ClaimsError::AudienceMismatch) => ReasonCode::AudienceMismatch,
            Self::Claims(ClaimsError::MissingRequiredClaim(_)) => ReasonCode::MalformedToken,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allowed(Identity),
    Rejected(Rejection),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed(_))
    }
}

/// The gateway token-check filter.
///
/// Built once at startup; shared by every request. Policy is immutable, keys
/// are swapped atomically on rotation, and the cache synchronises internally.
pub struct GatewayFilter {
    parser: TokenParser,
    policy: Arc<Policy>,
    keys: KeyStore,
    cache: Arc<dyn VerificationCache>,
    max_cache_age: Duration,
}

impl fmt::Debug for GatewayFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Do not print key material
        f.debug_struct("GatewayFilter")
            .field("policy", &self.policy)
            .field("keys", &self.keys)
            .field("cache", &self.cache.backend_name())
            .field("max_cache_age", &self.max_cache_age)
            .finish()
    }
}

impl GatewayFilter {
    pub fn new(
        policy: Policy,
        keys: KeyStore,
        cache: Arc<dyn VerificationCache>,
        max_cache_age: Duration,
    ) -> Self {
        Self {
            parser: TokenParser::new(policy.max_segment_len),
            policy: Arc::new(policy),
            keys,
            cache,
            max_cache_age,
        }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn keys(&self) -> &KeyStore {
        &self.keys
    }

    pub fn cache(&self) -> &dyn VerificationCache {
        self.cache.as_ref()
    }

    /// Decide on one request given its `Authorization` header value.
    pub fn check(&self, authorization: Option<&str>, now: i64) -> Decision {
        match self.evaluate(authorization, now) {
            Ok(identity) => {
                debug!(kid = %identity.key_id, "allowed");
                Decision::Allowed(identity)
            }
            Err(rejection) => {
                warn!(
                    reason = %rejection,
                    code = rejection.code().as_str(),
                    "token rejected"
                );
                Decision::Rejected(rejection)
            }
        }
    }

    fn evaluate(&self, authorization: Option<&str>, now: i64) -> Result<Identity, Rejection> {
        let token = self.parser.parse(authorization)?;
        debug!(alg = ?token.header().alg, kid = ?token.header().kid, "parsed");

        let keys = self.keys.load();
        let cache_key = CacheKey::new(token.fingerprint(), keys.generation());

        if let Some(cached) = self.cache.get(&cache_key, now) {
            debug!(fingerprint = ?cache_key.fingerprint, "cache hit");
            return match cached {
                VerificationResult::Valid { identity, .. } => Ok(identity),
                VerificationResult::Invalid(err) => Err(err.into()),
            };
        }
        debug!(fingerprint = ?cache_key.fingerprint, "cache miss");

        let key_id = match signature::verify(&token, &keys, &self.policy, now) {
            Ok(kid) => kid,
            Err(err) => {
                if err.is_cacheable() {
                    self.cache.put(
                        cache_key,
                        VerificationResult::Invalid(err),
                        now,
                        self.max_cache_age,
                    );
                }
                return Err(err.into());
            }
        };
        debug!(kid = %key_id, "signature verified");

        let expires_at = claims::validate(token.claims(), &self.policy, now)?;
        let identity = Identity::from_claims(token.claims(), key_id, expires_at);

        // Never cache past the token's own expiry, nor past the end of the
        // verifying key's grace period.
        let valid_until = keys
            .find(&identity.key_id)
            .and_then(|key| key.retire_at())
            .map_or(expires_at, |retire_at| retire_at.min(expires_at));
        let remaining = u64::try_from(valid_until.saturating_sub(now)).unwrap_or(0);
        self.cache.put(
            cache_key,
            VerificationResult::Valid {
                identity: identity.clone(),
                expires_at,
            },
            now,
            Duration::from_secs(remaining).min(self.max_cache_age),
        );

        Ok(identity)
    }

    /// Replace the key set (single writer). Outcomes cached under the previous
    /// generation become unreachable and are dropped.
    pub fn rotate_keys(
        &self,
        incoming: Vec<VerificationKey>,
        grace_seconds: u64,
        now: i64,
    ) -> Result<RotationOutcome, KeyError> {
        let outcome = self.keys.rotate(incoming, grace_seconds, now)?;
        if matches!(outcome, RotationOutcome::Rotated { .. }) {
            self.cache.invalidate_all();
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::auth::keys::KeySet;
    use crate::services::cache::{MemoryVerificationCache, NoopVerificationCache};
    use base64::Engine as _;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use hmac::{Hmac, Mac};
    use jsonwebtoken::Algorithm;
    use serde_json::{Value, json};
    use sha2::Sha256;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";
    const NOW: i64 = 1_700_000_000;

    fn sign(header: Value, claims: Value) -> String {
        let input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header.to_string()),
            URL_SAFE_NO_PAD.encode(claims.to_string())
        );
        let mut mac = Hmac::<Sha256>::new_from_slice(SECRET).expect("hmac");
        mac.update(input.as_bytes());
        format!("Bearer {}.{}", input, URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
    }

    fn bearer(claims: Value) -> String {
        sign(json!({"alg": "HS256", "kid": "k1"}), claims)
    }

    fn filter_with(cache: Arc<dyn VerificationCache>) -> GatewayFilter {
        let policy = Policy::new([Algorithm::HS256])
            .with_issuer("gw")
            .with_audience("svc1")
            .with_clock_skew(0);
        let keys = KeyStore::new(
            KeySet::new(vec![VerificationKey::hmac("k1", SECRET).expect("key")]).expect("set"),
        );
        GatewayFilter::new(policy, keys, cache, Duration::from_secs(300))
    }

    fn cached_filter() -> (GatewayFilter, Arc<MemoryVerificationCache>) {
        let cache = Arc::new(MemoryVerificationCache::new(1_000, Duration::from_secs(300)));
        (filter_with(cache.clone()), cache)
    }

    fn rejected_code(decision: Decision) -> ReasonCode {
        match decision {
            Decision::Rejected(r) => r.code(),
            Decision::Allowed(i) => panic!("unexpectedly allowed: {:?}", i),
        }
    }

    #[test]
    fn allowed_token_yields_identity() {
        let (filter, _) = cached_filter();
        let token = bearer(json!({"iss": "gw", "aud": "svc1", "exp": NOW + 60, "sub": "alice"}));
        match filter.check(Some(&token), NOW) {
            Decision::Allowed(identity) => {
                assert_eq!(identity.subject.as_deref(), Some("alice"));
                assert_eq!(identity.key_id, "k1");
                assert_eq!(identity.expires_at, NOW + 60);
            }
            other => panic!("expected allowed, got {:?}", other),
        }
    }

    #[test]
    fn reason_codes_for_each_failure() {
        let filter = filter_with(Arc::new(NoopVerificationCache));
        assert_eq!(rejected_code(filter.check(None, NOW)), ReasonCode::MissingToken);
        assert_eq!(
            rejected_code(filter.check(Some("Bearer a.b"), NOW)),
            ReasonCode::MalformedToken
        );
        assert_eq!(
            rejected_code(filter.check(
                Some(&bearer(json!({"iss": "gw", "aud": "svc1", "exp": NOW - 10}))),
                NOW
            )),
            ReasonCode::Expired
        );
        assert_eq!(
            rejected_code(filter.check(
                Some(&bearer(json!({"iss": "gw", "aud": "svc1", "exp": NOW + 60, "nbf": NOW + 30}))),
                NOW
            )),
            ReasonCode::NotYetValid
        );
        assert_eq!(
            rejected_code(filter.check(
                Some(&bearer(json!({"iss": "other", "aud": "svc1", "exp": NOW + 60}))),
                NOW
            )),
            ReasonCode::IssuerMismatch
        );
        assert_eq!(
            rejected_code(filter.check(
                Some(&bearer(json!({"iss": "gw", "aud": "other", "exp": NOW + 60}))),
                NOW
            )),
            ReasonCode::AudienceMismatch
        );
        assert_eq!(
            rejected_code(filter.check(Some(&bearer(json!({"iss": "gw", "aud": "svc1"}))), NOW)),
            ReasonCode::MalformedToken
        );
    }

    #[test]
    fn alg_none_is_invalid_signature_even_with_bad_claims() {
        let filter = filter_with(Arc::new(NoopVerificationCache));
        let token = format!(
            "Bearer {}.{}.",
            URL_SAFE_NO_PAD.encode(json!({"alg": "none"}).to_string()),
            URL_SAFE_NO_PAD.encode(json!({"exp": NOW - 1000, "aud": "nope"}).to_string())
        );
        assert_eq!(
            filter.check(Some(&token), NOW),
            Decision::Rejected(Rejection::Verify(VerifyError::UnsupportedAlgorithm))
        );
    }

    #[test]
    fn cold_and_warm_cache_agree() {
        let (filter, cache) = cached_filter();
        let uncached = filter_with(Arc::new(NoopVerificationCache));

        let tokens = [
            bearer(json!({"iss": "gw", "aud": "svc1", "exp": NOW + 60, "sub": "a"})),
            bearer(json!({"iss": "gw", "aud": "svc1", "exp": NOW - 60})),
            bearer(json!({"iss": "gw", "aud": "other", "exp": NOW + 60})),
            sign(json!({"alg": "HS256", "kid": "nope"}), json!({"exp": NOW + 60})),
            format!("{}x", bearer(json!({"iss": "gw", "aud": "svc1", "exp": NOW + 60}))),
        ];

        for token in &tokens {
            let cold = filter.check(Some(token), NOW);
            let warm = filter.check(Some(token), NOW);
            assert_eq!(cold, warm, "{token}");
            assert_eq!(cold, uncached.check(Some(token), NOW), "{token}");
        }
        cache.run_pending_tasks();
        assert!(cache.entry_count() > 0);
    }

    #[test]
    fn cached_valid_entry_is_not_served_after_expiry() {
        let (filter, _) = cached_filter();
        let token = bearer(json!({"iss": "gw", "aud": "svc1", "exp": NOW + 5}));

        assert!(filter.check(Some(&token), NOW).is_allowed());
        assert!(filter.check(Some(&token), NOW + 4).is_allowed());
        assert_eq!(rejected_code(filter.check(Some(&token), NOW + 6)), ReasonCode::Expired);
    }

    #[test]
    fn rotation_invalidates_cached_outcomes() {
        let (filter, _) = cached_filter();
        let token = bearer(json!({"iss": "gw", "aud": "svc1", "exp": NOW + 60}));
        assert!(filter.check(Some(&token), NOW).is_allowed());

        // Replace k1 with a different secret under the same kid: no grace for k1.
        let outcome = filter
            .rotate_keys(
                vec![VerificationKey::hmac("k1", b"rotated-secret-rotated-secret-32").expect("key")],
                600,
                NOW,
            )
            .expect("rotate");
        assert!(matches!(outcome, RotationOutcome::Rotated { generation: 1, .. }));
        assert_eq!(
            rejected_code(filter.check(Some(&token), NOW)),
            ReasonCode::InvalidSignature
        );
    }

    #[test]
    fn cached_outcome_ends_with_the_verifying_keys_grace_period() {
        let (cached, cache) = cached_filter();
        let uncached = filter_with(Arc::new(NoopVerificationCache));
        let rotated = || vec![VerificationKey::hmac("k2", [9u8; 32]).expect("key")];
        for filter in [&cached, &uncached] {
            filter.rotate_keys(rotated(), 60, NOW).expect("rotate");
        }

        let token = bearer(json!({"iss": "gw", "aud": "svc1", "exp": NOW + 1_000}));

        // Inside grace: k1 still verifies and the outcome is cached.
        assert!(cached.check(Some(&token), NOW + 50).is_allowed());
        cache.run_pending_tasks();
        assert!(cache.entry_count() > 0);

        // After grace the warm cache must agree with the uncached pipeline.
        let warm = cached.check(Some(&token), NOW + 100);
        let cold = uncached.check(Some(&token), NOW + 100);
        assert_eq!(warm, cold);
        assert_eq!(
            warm,
            Decision::Rejected(Rejection::Verify(VerifyError::NoMatchingKey))
        );
    }

    #[test]
    fn concurrent_checks_share_the_filter() {
        let (filter, _) = cached_filter();
        let filter = Arc::new(filter);
        let token = bearer(json!({"iss": "gw", "aud": "svc1", "exp": NOW + 60, "sub": "c"}));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let filter = filter.clone();
                let token = token.clone();
                std::thread::spawn(move || {
                    (0..50)
                        .map(|_| filter.check(Some(&token), NOW))
                        .all(|d| d.is_allowed())
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.join().expect("thread"));
        }
    }
}
