//! Key sources and the background refresh task.
//!
//! Key material is loaded outside the request path: once at startup (failure
//! is fatal) and then periodically by `spawn_key_refresh` (failure keeps the
//! last good key set).

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::Algorithm;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::services::auth::filter::GatewayFilter;
use crate::services::auth::keys::{KeyError, RotationOutcome, VerificationKey};

/// Something that can produce the current list of verification keys.
#[async_trait]
pub trait KeyProvider: Send + Sync {
    // Short name for logs.
    fn source_name(&self) -> &'static str;

    async fn load(&self) -> Result<Vec<VerificationKey>, KeyError>;
}

/// Fixed keys (e.g. from environment variables).
#[derive(Debug, Clone)]
pub struct StaticKeyProvider {
    keys: Vec<VerificationKey>,
}

impl StaticKeyProvider {
    pub fn new(keys: Vec<VerificationKey>) -> Self {
        Self { keys }
    }
}

#[async_trait]
impl KeyProvider for StaticKeyProvider {
    fn source_name(&self) -> &'static str {
        "static"
    }

    async fn load(&self) -> Result<Vec<VerificationKey>, KeyError> {
        Ok(self.keys.clone())
    }
}

/// JWK set stored on disk, re-read on every `load`.
#[derive(Debug, Clone)]
pub struct JwksFileProvider {
    path: PathBuf,
}

impl JwksFileProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl KeyProvider for JwksFileProvider {
    fn source_name(&self) -> &'static str {
        "jwks-file"
    }

    async fn load(&self) -> Result<Vec<VerificationKey>, KeyError> {
        let json = tokio::fs::read_to_string(&self.path).await?;
        parse_jwk_set(&json)
    }
}

/// Concatenation of several providers, in order. Any failure fails the whole load.
pub struct ChainedKeyProvider {
    providers: Vec<Arc<dyn KeyProvider>>,
}

impl ChainedKeyProvider {
    pub fn new(providers: Vec<Arc<dyn KeyProvider>>) -> Self {
        Self { providers }
    }
}

#[async_trait]
impl KeyProvider for ChainedKeyProvider {
    fn source_name(&self) -> &'static str {
        "chained"
    }

    async fn load(&self) -> Result<Vec<VerificationKey>, KeyError> {
        let mut keys = Vec::new();
        for provider in &self.providers {
            keys.extend(provider.load().await?);
        }
        Ok(keys)
    }
}

#[derive(Debug, Deserialize)]
struct JwkSet {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kty: String,
    #[serde(default)]
    kid: Option<String>,
    #[serde(default)]
    alg: Option<String>,
    #[serde(default, rename = "use")]
    use_field: Option<String>,
    // oct
    #[serde(default)]
    k: Option<String>,
    // OKP
    #[serde(default)]
    crv: Option<String>,
    #[serde(default)]
    x: Option<String>,
}

/// Parse a JWK set (`{"keys": [...]}`) into verification keys.
///
/// Supported: `kty=oct` (HMAC secret in `k`) and `kty=OKP, crv=Ed25519` (public key in `x`).
/// Other key types and `use` values other than `sig` are skipped with a warning.
pub fn parse_jwk_set(json: &str) -> Result<Vec<VerificationKey>, KeyError> {
    let set: JwkSet =
        serde_json::from_str(json).map_err(|e| KeyError::InvalidJwkSet(e.to_string()))?;

    let mut keys = Vec::with_capacity(set.keys.len());
    for jwk in set.keys {
        if let Some(key) = jwk_to_key(jwk)? {
            keys.push(key);
        }
    }

    if keys.is_empty() {
        return Err(KeyError::EmptyKeySet);
    }
    Ok(keys)
}

fn jwk_to_key(jwk: Jwk) -> Result<Option<VerificationKey>, KeyError> {
    let kid = jwk
        .kid
        .filter(|kid| !kid.trim().is_empty())
        .ok_or_else(|| KeyError::InvalidJwkSet("every key needs a 'kid'".to_string()))?;

    if jwk.use_field.as_deref().is_some_and(|u| u != "sig") {
        warn!(kid = %kid, "skipping jwk not meant for signatures");
        return Ok(None);
    }

    let decode = |field: Option<String>, name: &str| {
        let value = field.ok_or_else(|| KeyError::InvalidKeyMaterial {
            kid: kid.clone(),
            reason: format!("missing '{}'", name),
        })?;
        URL_SAFE_NO_PAD
            .decode(value.trim_end_matches('='))
            .map_err(|e| KeyError::InvalidKeyMaterial {
                kid: kid.clone(),
                reason: format!("'{}' is not base64url: {}", name, e),
            })
    };

    let key = match jwk.kty.as_str() {
        "oct" => VerificationKey::hmac(kid.clone(), decode(jwk.k, "k")?)?,
        "OKP" if jwk.crv.as_deref() == Some("Ed25519") => {
            VerificationKey::ed25519(kid.clone(), &decode(jwk.x, "x")?)?
        }
        other => {
            warn!(kid = %kid, kty = other, crv = ?jwk.crv, "skipping unsupported jwk");
            return Ok(None);
        }
    };

    match jwk.alg {
        Some(alg) => {
            let parsed = Algorithm::from_str(&alg).map_err(|_| KeyError::AlgorithmMismatch {
                kid: kid.clone(),
                alg: alg.clone(),
            })?;
            key.with_algorithm(parsed).map(Some)
        }
        None => Ok(Some(key)),
    }
}

/// Periodically reload keys from `provider` and rotate them into `filter`.
///
/// Errors are logged and the current key set stays in place.
pub fn spawn_key_refresh(
    filter: Arc<GatewayFilter>,
    provider: Arc<dyn KeyProvider>,
    every: Duration,
    grace: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; startup already loaded the keys.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            refresh_once(&filter, provider.as_ref(), grace).await;
        }
    })
}

pub async fn refresh_once(filter: &GatewayFilter, provider: &dyn KeyProvider, grace: Duration) {
    let keys = match provider.load().await {
        Ok(keys) => keys,
        Err(err) => {
            warn!(source = provider.source_name(), error = %err, "key refresh failed; keeping current keys");
            return;
        }
    };

    let now = chrono::Utc::now().timestamp();
    match filter.rotate_keys(keys, grace.as_secs(), now) {
        Ok(RotationOutcome::Rotated {
            generation,
            retiring,
        }) => {
            info!(
                source = provider.source_name(),
                generation, retiring, "verification keys rotated"
            );
        }
        Ok(RotationOutcome::Unchanged { .. }) => {}
        Err(err) => {
            warn!(source = provider.source_name(), error = %err, "rejected refreshed key set; keeping current keys");
        }
    }
}
