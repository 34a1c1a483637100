//! Process configuration, read once at startup from the environment (and `.env`).
//!
//! Anything missing or malformed fails startup; nothing here is re-read later.
use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use jsonwebtoken::Algorithm;

use crate::services::auth::keys::KeyError;
use crate::services::auth::policy::{
    DEFAULT_CLOCK_SKEW_SECONDS, DEFAULT_MAX_SEGMENT_LEN, PolicyError, parse_algorithms,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

impl AppEnv {
    pub fn from_env() -> Self {
        Self::parse(std::env::var("APP_ENV").ok().as_deref())
    }

    fn parse(value: Option<&str>) -> Self {
        match value.unwrap_or("development").to_ascii_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            _ => Self::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid(&'static str),
    Policy(PolicyError),
    KeyMaterial(KeyError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "missing configuration: {}", key),
            ConfigError::Invalid(key) => write!(f, "invalid configuration: {}", key),
            ConfigError::Policy(err) => write!(f, "invalid auth policy: {}", err),
            ConfigError::KeyMaterial(err) => write!(f, "invalid key material: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<PolicyError> for ConfigError {
    fn from(e: PolicyError) -> Self {
        ConfigError::Policy(e)
    }
}

impl From<KeyError> for ConfigError {
    fn from(e: KeyError) -> Self {
        ConfigError::KeyMaterial(e)
    }
}

pub struct Config {
    pub addr: SocketAddr,
    pub app_env: AppEnv,

    pub required_issuer: Option<String>,
    pub required_audience: Option<String>,
    pub clock_skew_seconds: u64,
    pub allowed_algorithms: HashSet<Algorithm>,
    pub max_segment_len: usize,

    pub hmac_secret: Option<String>,
    pub hmac_kid: String,
    pub ed25519_public_key_pem: Option<String>,
    pub ed25519_kid: String,
    pub jwks_path: Option<PathBuf>,
    pub key_refresh_interval: Duration,
    pub key_grace: Duration,

    pub cache_capacity: u64,
    pub cache_max_age: Duration,

    pub public_paths: Vec<String>,
    pub subject_header: Option<String>,

    pub http_request_timeout: Duration,
    pub http_body_limit_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment in production, a map in tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let port: u16 = parse_or(&var, "PORT", 3000)?;
        let addr: SocketAddr = SocketAddr::from_str(&format!("0.0.0.0:{}", port))
            .map_err(|_| ConfigError::Invalid("PORT"))?;

        let app_env = AppEnv::parse(var("APP_ENV").as_deref());

        let allowed_algorithms =
            parse_algorithms(&var("GATEWAY_ALLOWED_ALGORITHMS").unwrap_or_else(|| "HS256".into()))?;

        let max_segment_len = parse_or(&var, "GATEWAY_MAX_SEGMENT_BYTES", DEFAULT_MAX_SEGMENT_LEN)?;
        if max_segment_len == 0 {
            return Err(ConfigError::Invalid("GATEWAY_MAX_SEGMENT_BYTES"));
        }

        // PEM values often arrive with escaped newlines from .env files
        let hmac_secret = var("GATEWAY_HMAC_SECRET");
        let ed25519_public_key_pem =
            var("GATEWAY_ED25519_PUBLIC_KEY_PEM").map(|pem| pem.replace("\\n", "\n"));
        let jwks_path = var("GATEWAY_JWKS_PATH").map(PathBuf::from);

        if hmac_secret.is_none() && ed25519_public_key_pem.is_none() && jwks_path.is_none() {
            return Err(ConfigError::Missing(
                "GATEWAY_HMAC_SECRET, GATEWAY_ED25519_PUBLIC_KEY_PEM or GATEWAY_JWKS_PATH",
            ));
        }

        let key_refresh_seconds: u64 = parse_or(&var, "GATEWAY_KEY_REFRESH_SECONDS", 300)?;
        if key_refresh_seconds == 0 {
            return Err(ConfigError::Invalid("GATEWAY_KEY_REFRESH_SECONDS"));
        }

        let request_timeout_seconds: u64 = parse_or(&var, "HTTP_REQUEST_TIMEOUT_SECONDS", 30)?;
        if request_timeout_seconds == 0 {
            return Err(ConfigError::Invalid("HTTP_REQUEST_TIMEOUT_SECONDS"));
        }

        let public_paths = var("GATEWAY_PUBLIC_PATHS")
            .unwrap_or_else(|| "/health".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();
        if public_paths.iter().any(|p| !p.starts_with('/')) {
            return Err(ConfigError::Invalid("GATEWAY_PUBLIC_PATHS"));
        }

        Ok(Self {
            addr,
            app_env,
            required_issuer: var("GATEWAY_REQUIRED_ISSUER"),
            required_audience: var("GATEWAY_REQUIRED_AUDIENCE"),
            clock_skew_seconds: parse_or(&var, "GATEWAY_CLOCK_SKEW_SECONDS", DEFAULT_CLOCK_SKEW_SECONDS)?,
            allowed_algorithms,
            max_segment_len,
            hmac_secret,
            hmac_kid: var("GATEWAY_HMAC_KID").unwrap_or_else(|| "default".to_string()),
            ed25519_public_key_pem,
            ed25519_kid: var("GATEWAY_ED25519_KID").unwrap_or_else(|| "default".to_string()),
            jwks_path,
            key_refresh_interval: Duration::from_secs(key_refresh_seconds),
            key_grace: Duration::from_secs(parse_or(&var, "GATEWAY_KEY_GRACE_SECONDS", 3600)?),
            cache_capacity: parse_or(&var, "GATEWAY_CACHE_CAPACITY", 10_000)?,
            cache_max_age: Duration::from_secs(parse_or(&var, "GATEWAY_CACHE_MAX_AGE_SECONDS", 300)?),
            public_paths,
            subject_header: var("GATEWAY_SUBJECT_HEADER").map(|h| h.to_ascii_lowercase()),
            http_request_timeout: Duration::from_secs(request_timeout_seconds),
            http_body_limit_bytes: parse_or(&var, "HTTP_BODY_LIMIT_BYTES", 1024 * 1024)?,
        })
    }
}

fn parse_or<T, F>(var: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw.parse::<T>().map_err(|_| ConfigError::Invalid(key)),
        None => Ok(default),
    }
}
