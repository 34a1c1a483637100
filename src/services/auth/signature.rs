//! Signature verification over the exact signing input.
//!
//! The declared algorithm is checked against the policy before any key is
//! looked at, so `none` and cross-family confusion never reach key material.

use std::str::FromStr;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ed25519_dalek::Signature;
use hmac::{Hmac, Mac};
use jsonwebtoken::Algorithm;
use sha2::{Sha256, Sha384, Sha512};
use thiserror::Error;

use crate::services::auth::keys::{KeyFamily, KeyMaterial, KeySet};
use crate::services::auth::policy::Policy;
use crate::services::auth::token::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("signature algorithm not allowed")]
    UnsupportedAlgorithm,
    #[error("no key matches the token")]
    NoMatchingKey,
    #[error("signature mismatch")]
    SignatureMismatch,
}

impl VerifyError {
    /// Outcomes that depend only on the token bytes and the key set.
    pub fn is_cacheable(&self) -> bool {
        matches!(self, Self::NoMatchingKey | Self::SignatureMismatch)
    }
}

/// Verify `token` against `keys`; returns the id of the key that matched.
///
/// `now` only decides whether rotated-out keys are still inside their grace period.
pub fn verify(token: &Token, keys: &KeySet, policy: &Policy, now: i64) -> Result<String, VerifyError> {
    let alg = declared_algorithm(token, policy)?;

    let mut candidates = keys
        .candidates(token.header().kid.as_deref(), alg, now)
        .peekable();
    if candidates.peek().is_none() {
        return Err(VerifyError::NoMatchingKey);
    }

    let signature = URL_SAFE_NO_PAD
        .decode(token.signature_segment())
        .map_err(|_| VerifyError::SignatureMismatch)?;
    let message = token.signing_input();

    candidates
        .find(|key| signature_matches(key.material(), alg, message, &signature))
        .map(|key| key.kid().to_owned())
        .ok_or(VerifyError::SignatureMismatch)
}

fn declared_algorithm(token: &Token, policy: &Policy) -> Result<Algorithm, VerifyError> {
    token
        .header()
        .alg
        .as_deref()
        .and_then(|name| Algorithm::from_str(name).ok())
        .filter(|alg| policy.allows(*alg) && KeyFamily::for_algorithm(*alg).is_some())
        .ok_or(VerifyError::UnsupportedAlgorithm)
}

fn signature_matches(material: &KeyMaterial, alg: Algorithm, message: &[u8], signature: &[u8]) -> bool {
    match (material, alg) {
        (KeyMaterial::Hmac(secret), Algorithm::HS256) => {
            mac_matches(Hmac::<Sha256>::new_from_slice(secret), message, signature)
        }
        (KeyMaterial::Hmac(secret), Algorithm::HS384) => {
            mac_matches(Hmac::<Sha384>::new_from_slice(secret), message, signature)
        }
        (KeyMaterial::Hmac(secret), Algorithm::HS512) => {
            mac_matches(Hmac::<Sha512>::new_from_slice(secret), message, signature)
        }
        (KeyMaterial::Ed25519(key), Algorithm::EdDSA) => Signature::from_slice(signature)
            .is_ok_and(|sig| key.verify_strict(message, &sig).is_ok()),
        _ => false,
    }
}

// `verify_slice` compares in constant time.
fn mac_matches<M: Mac>(
    mac: Result<M, hmac::digest::InvalidLength>,
    message: &[u8],
    signature: &[u8],
) -> bool {
    let Ok(mut mac) = mac else {
        return false;
    };
    mac.update(message);
    mac.verify_slice(signature).is_ok()
}
