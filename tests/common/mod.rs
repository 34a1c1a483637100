#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderName, Request, header};
use axum::response::Response;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ed25519_dalek::{Signer, SigningKey};
use jsonwebtoken::Algorithm;
use serde_json::{Value, json};
use token_check_gateway::app::build_router;
use token_check_gateway::middleware::auth::access::AccessSettings;
use token_check_gateway::middleware::http::HttpSettings;
use token_check_gateway::services::auth::{
    GatewayFilter, KeySet, KeyStore, Policy, TokenIssuer, VerificationKey,
};
use token_check_gateway::services::cache::MemoryVerificationCache;
use token_check_gateway::state::AppState;
use tower::ServiceExt;

pub const SECRET: &[u8] = b"integration-test-secret-0123456789";
pub const HMAC_KID: &str = "hs-1";
pub const ED25519_KID: &str = "ed-1";
pub const ISSUER: &str = "https://issuer.example";
pub const AUDIENCE: &str = "gateway-api";
pub const SUBJECT_HEADER: &str = "x-auth-subject";

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub fn ed25519_signing_key() -> SigningKey {
    SigningKey::from_bytes(&[7u8; 32])
}

pub fn policy() -> Policy {
    Policy::new([Algorithm::HS256, Algorithm::EdDSA])
        .with_issuer(ISSUER)
        .with_audience(AUDIENCE)
}

pub fn gateway_filter() -> Arc<GatewayFilter> {
    let keys = KeySet::new(vec![
        VerificationKey::hmac(HMAC_KID, SECRET).expect("hmac key"),
        VerificationKey::from_verifying_key(ED25519_KID, ed25519_signing_key().verifying_key()),
    ])
    .expect("key set");
    let max_age = Duration::from_secs(300);
    Arc::new(GatewayFilter::new(
        policy(),
        KeyStore::new(keys),
        Arc::new(MemoryVerificationCache::new(1_000, max_age)),
        max_age,
    ))
}

pub fn router(filter: Arc<GatewayFilter>) -> Router {
    let access = AccessSettings::new(
        vec!["/health".to_string()],
        Some(HeaderName::from_static(SUBJECT_HEADER)),
    );
    build_router(AppState::new(filter, access), HttpSettings::default())
}

pub fn claims(now: i64) -> Value {
    json!({
        "sub": "user-42",
        "iss": ISSUER,
        "aud": AUDIENCE,
        "iat": now,
        "exp": now + 300,
        "jti": "jti-1",
        "scope": "read write",
    })
}

pub fn hmac_token(claims: &Value) -> String {
    TokenIssuer::hmac(Algorithm::HS256, SECRET, HMAC_KID)
        .expect("issuer")
        .sign(claims)
        .expect("token")
}

pub fn ed25519_token(claims: &Value) -> String {
    let header = json!({"alg": "EdDSA", "typ": "JWT", "kid": ED25519_KID});
    let input = format!("{}.{}", encode_json(&header), encode_json(claims));
    let signature = ed25519_signing_key().sign(input.as_bytes());
    format!("{}.{}", input, URL_SAFE_NO_PAD.encode(signature.to_bytes()))
}

pub fn unsigned_token(claims: &Value) -> String {
    let header = json!({"alg": "none", "typ": "JWT"});
    format!("{}.{}.", encode_json(&header), encode_json(claims))
}

fn encode_json(value: &Value) -> String {
    URL_SAFE_NO_PAD.encode(value.to_string())
}

pub async fn get(app: &Router, uri: &str, token: Option<&str>) -> Response {
    let mut builder = Request::builder().uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let req = builder.body(Body::empty()).expect("request");
    app.clone().oneshot(req).await.expect("response")
}

pub async fn read_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}
