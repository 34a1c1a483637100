//! Registered-claim checks (`exp`, `nbf`, `iss`, `aud`) against the policy.

use serde_json::Value;
use thiserror::Error;

use crate::services::auth::policy::Policy;
use crate::services::auth::token::Claims;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ClaimsError {
    #[error("token expired")]
    Expired,
    #[error("token not yet valid")]
    NotYetValid,
    #[error("issuer mismatch")]
    IssuerMismatch,
    #[error("audience mismatch")]
    AudienceMismatch,
    #[error("missing or invalid '{0}' claim")]
    MissingRequiredClaim(&'static str),
}

/// Validate `claims` at time `now` (unix seconds).
///
/// Checks run in a fixed order and stop at the first failure:
/// expiry, not-before, issuer, audience. Returns the token's expiry.
pub fn validate(claims: &Claims, policy: &Policy, now: i64) -> Result<i64, ClaimsError> {
    let skew = policy.clock_skew();

    let exp = claims
        .get("exp")
        .and_then(numeric_date)
        .ok_or(ClaimsError::MissingRequiredClaim("exp"))?;
    if now > exp.saturating_add(skew) {
        return Err(ClaimsError::Expired);
    }

    if let Some(nbf) = claims.get("nbf") {
        let nbf = numeric_date(nbf).ok_or(ClaimsError::MissingRequiredClaim("nbf"))?;
        if now < nbf.saturating_sub(skew) {
            return Err(ClaimsError::NotYetValid);
        }
    }

    if let Some(required) = policy.required_issuer.as_deref() {
        if claims.get("iss").and_then(Value::as_str) != Some(required) {
            return Err(ClaimsError::IssuerMismatch);
        }
    }

    if let Some(required) = policy.required_audience.as_deref() {
        if !audience_contains(claims.get("aud"), required) {
            return Err(ClaimsError::AudienceMismatch);
        }
    }

    Ok(exp)
}

/// RFC 7519 NumericDate: integer or fractional seconds.
pub(crate) fn numeric_date(value: &Value) -> Option<i64> {
    if let Some(n) = value.as_i64() {
        return Some(n);
    }
    if value.as_u64().is_some() {
        return Some(i64::MAX);
    }
    value
        .as_f64()
        .filter(|f| f.is_finite())
        .map(|f| f.floor() as i64)
}

fn audience_contains(aud: Option<&Value>, required: &str) -> bool {
    match aud {
        Some(Value::String(s)) => s == required,
        Some(Value::Array(values)) => values.iter().any(|v| v.as_str() == Some(required)),
        _ => false,
    }
}
