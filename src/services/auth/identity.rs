//! Caller identity attached to allowed requests.

use serde::Serialize;
use serde_json::Value;

use crate::services::auth::token::Claims;

/// Authenticated caller attached to a request that passed the gateway filter.
///
/// - `key_id` is the key that verified the signature (useful when correlating rotations).
/// - `scopes` come from `scope` (space separated) or `scp` (array).
/// - `roles` come from a `roles` array when present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub subject: Option<String>,
    pub issuer: Option<String>,
    pub audiences: Vec<String>,
    pub scopes: Vec<String>,
    pub roles: Vec<String>,
    pub jti: Option<String>,
    pub key_id: String,
    pub expires_at: i64,
}

impl Identity {
    pub fn from_claims(claims: &Claims, key_id: String, expires_at: i64) -> Self {
        let string = |name: &str| claims.get(name).and_then(Value::as_str).map(str::to_owned);

        let audiences = match claims.get("aud") {
            Some(Value::String(s)) => vec![s.clone()],
            Some(Value::Array(values)) => strings(values),
            _ => Vec::new(),
        };

        let scopes = match (claims.get("scope"), claims.get("scp")) {
            (Some(Value::String(s)), _) => s.split_whitespace().map(str::to_owned).collect(),
            (_, Some(Value::Array(values))) => strings(values),
            _ => Vec::new(),
        };

        let roles = match claims.get("roles") {
            Some(Value::Array(values)) => strings(values),
            _ => Vec::new(),
        };

        Self {
            subject: string("sub"),
            issuer: string("iss"),
            audiences,
            scopes,
            roles,
            jti: string("jti"),
            key_id,
            expires_at,
        }
    }
}

fn strings(values: &[Value]) -> Vec<String> {
    values
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_owned)
        .collect()
}
