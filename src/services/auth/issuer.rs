//! Token minting for tests and the `token-gen` tool.

use std::time::Duration;

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::Serialize;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

use crate::services::auth::keys::{KeyFamily, MIN_HMAC_SECRET_LEN};

#[derive(Debug, Error)]
pub enum IssueError {
    #[error("algorithm {0:?} cannot be used for signing here")]
    UnsupportedAlgorithm(Algorithm),
    #[error("signing secret must be at least {min} bytes")]
    WeakSecret { min: usize },
    #[error("invalid signing key: {0}")]
    InvalidKey(String),
    #[error("failed to sign token: {0}")]
    Signing(String),
}

/// Registered claims written by `TokenIssuer::issue`.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedClaims {
    pub sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    pub jti: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Token minting for local development and tests.
///
/// The gateway never signs anything on the request path; this exists so that
/// operators (and the `token-gen` CLI) can produce tokens the filter accepts.
#[derive(Clone)]
pub struct TokenIssuer {
    algorithm: Algorithm,
    kid: String,
    encoding_key: EncodingKey,
}

impl TokenIssuer {
    /// HS256/HS384/HS512 with a shared secret.
    pub fn hmac(algorithm: Algorithm, secret: &[u8], kid: impl Into<String>) -> Result<Self, IssueError> {
        if KeyFamily::for_algorithm(algorithm) != Some(KeyFamily::Hmac) {
            return Err(IssueError::UnsupportedAlgorithm(algorithm));
        }
        if secret.len() < MIN_HMAC_SECRET_LEN {
            return Err(IssueError::WeakSecret {
                min: MIN_HMAC_SECRET_LEN,
            });
        }
        Ok(Self {
            algorithm,
            kid: kid.into(),
            encoding_key: EncodingKey::from_secret(secret),
        })
    }

    /// EdDSA; `private_key_pem` must be an Ed25519 private key in PKCS#8 PEM format.
    pub fn ed25519_pem(private_key_pem: &str, kid: impl Into<String>) -> Result<Self, IssueError> {
        let encoding_key = EncodingKey::from_ed_pem(private_key_pem.as_bytes())
            .map_err(|e| IssueError::InvalidKey(e.to_string()))?;
        Ok(Self {
            algorithm: Algorithm::EdDSA,
            kid: kid.into(),
            encoding_key,
        })
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<String, IssueError> {
        let mut header = Header::new(self.algorithm);
        header.typ = Some("JWT".to_string());
        header.kid = Some(self.kid.clone());
        jsonwebtoken::encode(&header, claims, &self.encoding_key).map_err(|e| {
            error!(error = %e, "failed to sign JWT");
            IssueError::Signing(e.to_string())
        })
    }

    pub fn issue(
        &self,
        subject: &str,
        issuer: Option<&str>,
        audience: Option<&str>,
        ttl: Duration,
        now: i64,
    ) -> Result<String, IssueError> {
        let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let claims = IssuedClaims {
            sub: subject.to_string(),
            iss: issuer.map(str::to_string),
            aud: audience.map(str::to_string),
            iat: now,
            nbf: now,
            exp: now.saturating_add(ttl),
            jti: Uuid::new_v4().to_string(),
            scope: None,
        };
        self.sign(&claims)
    }
}
