//! Authentication policy shared (read-only) by every in-flight request.

use std::collections::HashSet;
use std::str::FromStr;

use jsonwebtoken::Algorithm;
use thiserror::Error;

use crate::services::auth::keys::KeyFamily;

pub const DEFAULT_CLOCK_SKEW_SECONDS: u64 = 60;
pub const DEFAULT_MAX_SEGMENT_LEN: usize = 8 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("no signature algorithm is allowed")]
    NoAlgorithms,
    #[error("unknown signature algorithm: {0}")]
    UnknownAlgorithm(String),
    #[error("signature algorithm {0:?} is not supported by the gateway")]
    UnsupportedAlgorithm(Algorithm),
    #[error("max segment length must be greater than zero")]
    ZeroSegmentLength,
}

/// What a token must satisfy to be let through.
///
/// - `required_issuer` / `required_audience`: checked only when set.
/// - `clock_skew_seconds`: leniency applied to both `exp` and `nbf`.
/// - `allowed_algorithms`: anything else is rejected before key lookup.
/// - `max_segment_len`: parser bound, enforced before any decoding.
#[derive(Debug, Clone)]
pub struct Policy {
    pub required_issuer: Option<String>,
    pub required_audience: Option<String>,
    pub clock_skew_seconds: u64,
    pub allowed_algorithms: HashSet<Algorithm>,
    pub max_segment_len: usize,
}

impl Policy {
    pub fn new(allowed_algorithms: impl IntoIterator<Item = Algorithm>) -> Self {
        Self {
            required_issuer: None,
            required_audience: None,
            clock_skew_seconds: DEFAULT_CLOCK_SKEW_SECONDS,
            allowed_algorithms: allowed_algorithms.into_iter().collect(),
            max_segment_len: DEFAULT_MAX_SEGMENT_LEN,
        }
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.required_issuer = Some(issuer.into());
        self
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.required_audience = Some(audience.into());
        self
    }

    pub fn with_clock_skew(mut self, seconds: u64) -> Self {
        self.clock_skew_seconds = seconds;
        self
    }

    pub fn with_max_segment_len(mut self, len: usize) -> Self {
        self.max_segment_len = len;
        self
    }

    pub fn allows(&self, algorithm: Algorithm) -> bool {
        self.allowed_algorithms.contains(&algorithm)
    }

    /// Clock skew as a signed offset for timestamp arithmetic.
    pub fn clock_skew(&self) -> i64 {
        i64::try_from(self.clock_skew_seconds).unwrap_or(i64::MAX)
    }

    /// Startup check: every allowed algorithm must be one the verifier implements.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.allowed_algorithms.is_empty() {
            return Err(PolicyError::NoAlgorithms);
        }
        if let Some(alg) = self
            .allowed_algorithms
            .iter()
            .find(|alg| KeyFamily::for_algorithm(**alg).is_none())
        {
            return Err(PolicyError::UnsupportedAlgorithm(*alg));
        }
        if self.max_segment_len == 0 {
            return Err(PolicyError::ZeroSegmentLength);
        }
        Ok(())
    }
}

/// Parse a comma-separated algorithm list such as `"HS256, EdDSA"`.
pub fn parse_algorithms(list: &str) -> Result<HashSet<Algorithm>, PolicyError> {
    let mut out = HashSet::new();
    for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let alg = Algorithm::from_str(name)
            .map_err(|_| PolicyError::UnknownAlgorithm(name.to_string()))?;
        out.insert(alg);
    }
    if out.is_empty() {
        return Err(PolicyError::NoAlgorithms);
    }
    Ok(out)
}
