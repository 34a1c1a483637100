/// Factory: build the `GatewayFilter` (and its key source) from application `Config`.
use std::sync::Arc;

use tracing::info;

use crate::config::{Config, ConfigError};
use crate::services::auth::filter::GatewayFilter;
use crate::services::auth::keys::{KeySet, KeyStore, VerificationKey};
use crate::services::auth::policy::Policy;
use crate::services::auth::provider::{
    ChainedKeyProvider, JwksFileProvider, KeyProvider, StaticKeyProvider,
};
use crate::services::cache::{MemoryVerificationCache, NoopVerificationCache, VerificationCache};

pub struct Gateway {
    pub filter: Arc<GatewayFilter>,
    pub key_provider: Arc<dyn KeyProvider>,
    /// True when keys come from a source that can change (JWK-set file).
    pub refreshable: bool,
}

pub fn build_policy(config: &Config) -> Result<Policy, ConfigError> {
    let mut policy = Policy::new(config.allowed_algorithms.iter().copied())
        .with_clock_skew(config.clock_skew_seconds)
        .with_max_segment_len(config.max_segment_len);
    if let Some(issuer) = &config.required_issuer {
        policy = policy.with_issuer(issuer.clone());
    }
    if let Some(audience) = &config.required_audience {
        policy = policy.with_audience(audience.clone());
    }
    policy.validate()?;
    Ok(policy)
}

pub fn build_key_provider(config: &Config) -> Result<(Arc<dyn KeyProvider>, bool), ConfigError> {
    let mut static_keys = Vec::new();
    if let Some(secret) = &config.hmac_secret {
        static_keys.push(VerificationKey::hmac(config.hmac_kid.clone(), secret.as_bytes())?);
    }
    if let Some(pem) = &config.ed25519_public_key_pem {
        static_keys.push(VerificationKey::ed25519_from_pem(config.ed25519_kid.clone(), pem)?);
    }

    let mut providers: Vec<Arc<dyn KeyProvider>> = Vec::new();
    if !static_keys.is_empty() {
        providers.push(Arc::new(StaticKeyProvider::new(static_keys)));
    }
    let refreshable = config.jwks_path.is_some();
    if let Some(path) = &config.jwks_path {
        providers.push(Arc::new(JwksFileProvider::new(path.clone())));
    }

    match providers.len() {
        0 => Err(ConfigError::Missing(
            "GATEWAY_HMAC_SECRET, GATEWAY_ED25519_PUBLIC_KEY_PEM or GATEWAY_JWKS_PATH",
        )),
        1 => Ok((providers.remove(0), refreshable)),
        _ => Ok((Arc::new(ChainedKeyProvider::new(providers)), refreshable)),
    }
}

pub fn build_cache(config: &Config) -> Arc<dyn VerificationCache> {
    if config.cache_capacity == 0 || config.cache_max_age.is_zero() {
        Arc::new(NoopVerificationCache)
    } else {
        Arc::new(MemoryVerificationCache::new(
            config.cache_capacity,
            config.cache_max_age,
        ))
    }
}

/// Load the initial keys and assemble the filter. Any failure here is fatal.
pub async fn build_gateway(config: &Config) -> Result<Gateway, ConfigError> {
    let policy = build_policy(config)?;
    let (key_provider, refreshable) = build_key_provider(config)?;

    let keys = key_provider.load().await?;
    let key_set = KeySet::new(keys)?;
    let cache = build_cache(config);

    info!(
        source = key_provider.source_name(),
        keys = key_set.len(),
        cache = cache.backend_name(),
        algorithms = ?policy.allowed_algorithms,
        "gateway filter ready"
    );

    let filter = GatewayFilter::new(policy, KeyStore::new(key_set), cache, config.cache_max_age);

    Ok(Gateway {
        filter: Arc::new(filter),
        key_provider,
        refreshable,
    })
}
