//! Key rotation through a JWK-set file.
//!
//! Tokens signed with a key that disappears from the file keep verifying for
//! the grace period; a broken file never replaces a good key set.
mod common;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use common::*;
use jsonwebtoken::Algorithm;
use serde_json::json;
use token_check_gateway::services::auth::filter::{Decision, ReasonCode};
use token_check_gateway::services::auth::keys::{KeySet, KeyStore};
use token_check_gateway::services::auth::provider::{JwksFileProvider, KeyProvider, refresh_once};
use token_check_gateway::services::auth::{GatewayFilter, TokenIssuer};
use token_check_gateway::services::cache::{
    MemoryVerificationCache, NoopVerificationCache, VerificationCache,
};
use uuid::Uuid;

const OLD_SECRET: &[u8] = b"old-rotation-secret-0123456789abcdef";
const NEW_SECRET: &[u8] = b"new-rotation-secret-0123456789abcdef";

struct TempJwks(PathBuf);

impl TempJwks {
    fn new() -> Self {
        Self(std::env::temp_dir().join(format!("jwks-{}.json", Uuid::new_v4())))
    }

    fn write_oct(&self, keys: &[(&str, &[u8])]) {
        let keys: Vec<_> = keys
            .iter()
            .map(|(kid, secret)| json!({"kty": "oct", "kid": kid, "k": URL_SAFE_NO_PAD.encode(secret)}))
            .collect();
        std::fs::write(&self.0, json!({ "keys": keys }).to_string()).expect("write jwks");
    }
}

impl Drop for TempJwks {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

fn token(secret: &[u8], kid: &str) -> String {
    TokenIssuer::hmac(Algorithm::HS256, secret, kid)
        .expect("issuer")
        .sign(&claims(now()))
        .expect("token")
}

async fn filter_from(provider: &JwksFileProvider) -> (Arc<GatewayFilter>, Arc<MemoryVerificationCache>) {
    let keys = KeySet::new(provider.load().await.expect("keys")).expect("set");
    let cache = Arc::new(MemoryVerificationCache::new(100, Duration::from_secs(300)));
    let filter = GatewayFilter::new(
        policy(),
        KeyStore::new(keys),
        cache.clone(),
        Duration::from_secs(300),
    );
    (Arc::new(filter), cache)
}

async fn uncached_filter_from(provider: &JwksFileProvider) -> GatewayFilter {
    let keys = KeySet::new(provider.load().await.expect("keys")).expect("set");
    GatewayFilter::new(
        policy(),
        KeyStore::new(keys),
        Arc::new(NoopVerificationCache),
        Duration::from_secs(300),
    )
}

fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

#[tokio::test]
async fn retired_key_verifies_during_grace_only() {
    let file = TempJwks::new();
    file.write_oct(&[("old", OLD_SECRET)]);
    let provider = JwksFileProvider::new(file.0.clone());
    let (filter, cache) = filter_from(&provider).await;

    let old_token = token(OLD_SECRET, "old");
    assert!(filter.check(Some(&bearer(&old_token)), now()).is_allowed());
    cache.run_pending_tasks();
    assert!(cache.entry_count() > 0);

    // Rotate: "old" vanishes from the file, "new" appears.
    file.write_oct(&[("new", NEW_SECRET)]);
    refresh_once(&filter, &provider, Duration::from_secs(3_600)).await;

    let keys = filter.keys().load();
    assert_eq!(keys.generation(), 1);
    assert_eq!(keys.len(), 2);
    cache.run_pending_tasks();
    assert_eq!(cache.entry_count(), 0);

    // Both keys verify while "old" is in its grace period.
    assert!(filter.check(Some(&bearer(&old_token)), now()).is_allowed());
    let new_token = token(NEW_SECRET, "new");
    assert!(filter.check(Some(&bearer(&new_token)), now()).is_allowed());

    // After the grace period the retired key is gone.
    let later = now() + 3_601;
    let mut late_claims = claims(later);
    late_claims["iat"] = json!(later);
    let late_old = TokenIssuer::hmac(Algorithm::HS256, OLD_SECRET, "old")
        .expect("issuer")
        .sign(&late_claims)
        .expect("token");
    match filter.check(Some(&bearer(&late_old)), later) {
        Decision::Rejected(rejection) => assert_eq!(rejection.code(), ReasonCode::InvalidSignature),
        Decision::Allowed(_) => panic!("retired key must not verify after its grace period"),
    }
}

#[tokio::test]
async fn warm_cache_stops_serving_a_retired_key_after_grace() {
    let file = TempJwks::new();
    file.write_oct(&[("old", OLD_SECRET)]);
    let provider = JwksFileProvider::new(file.0.clone());
    let (cached, cache) = filter_from(&provider).await;
    let uncached = uncached_filter_from(&provider).await;

    file.write_oct(&[("new", NEW_SECRET)]);
    let grace = Duration::from_secs(60);
    refresh_once(&cached, &provider, grace).await;
    refresh_once(&uncached, &provider, grace).await;

    // Verified (and cached) while "old" is still inside its grace period.
    let old_token = bearer(&token(OLD_SECRET, "old"));
    assert!(cached.check(Some(&old_token), now()).is_allowed());
    cache.run_pending_tasks();
    assert!(cache.entry_count() > 0);

    // Same token once the grace period is over: warm and cold must agree.
    let later = now() + 120;
    let warm = cached.check(Some(&old_token), later);
    let cold = uncached.check(Some(&old_token), later);
    assert_eq!(warm, cold);
    match warm {
        Decision::Rejected(rejection) => assert_eq!(rejection.code(), ReasonCode::InvalidSignature),
        Decision::Allowed(_) => panic!("cached outcome outlived the key's grace period"),
    }
}

#[tokio::test]
async fn unchanged_file_keeps_generation() {
    let file = TempJwks::new();
    file.write_oct(&[("k1", OLD_SECRET)]);
    let provider = JwksFileProvider::new(file.0.clone());
    let (filter, _cache) = filter_from(&provider).await;

    refresh_once(&filter, &provider, Duration::from_secs(60)).await;
    assert_eq!(filter.keys().load().generation(), 0);
}

#[tokio::test]
async fn broken_file_keeps_last_good_keys() {
    let file = TempJwks::new();
    file.write_oct(&[("k1", OLD_SECRET)]);
    let provider = JwksFileProvider::new(file.0.clone());
    let (filter, _cache) = filter_from(&provider).await;

    std::fs::write(&file.0, "{ not json").expect("write");
    refresh_once(&filter, &provider, Duration::from_secs(60)).await;

    let keys = filter.keys().load();
    assert_eq!(keys.generation(), 0);
    assert!(filter.check(Some(&bearer(&token(OLD_SECRET, "k1"))), now()).is_allowed());
}
