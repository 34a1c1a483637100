//! Bearer token check in front of every non-public route.
//!
//! On success the verified `Identity` goes into request extensions (and,
//! optionally, the subject into a forwarding header). On failure the request
//! never reaches a handler.

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Request, header},
    middleware::{self, Next},
    response::Response,
};

use crate::config::{Config, ConfigError};
use crate::error::AppError;
use crate::services::auth::filter::{Decision, Rejection};
use crate::services::auth::token::ParseError;
use crate::state::AppState;

/// Which paths skip the check, and where to forward the subject.
#[derive(Debug, Clone, Default)]
pub struct AccessSettings {
    public_paths: Vec<String>,
    subject_header: Option<HeaderName>,
}

impl AccessSettings {
    pub fn new(public_paths: Vec<String>, subject_header: Option<HeaderName>) -> Self {
        Self {
            public_paths,
            subject_header,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let subject_header = config
            .subject_header
            .as_deref()
            .map(HeaderName::try_from)
            .transpose()
            .map_err(|_| ConfigError::Invalid("GATEWAY_SUBJECT_HEADER"))?;
        Ok(Self::new(config.public_paths.clone(), subject_header))
    }

    pub fn subject_header(&self) -> Option<&HeaderName> {
        self.subject_header.as_ref()
    }

    /// Prefix match on a path-segment boundary: `/health` covers `/health/live`, not `/healthz`.
    pub fn is_public(&self, path: &str) -> bool {
        self.public_paths.iter().any(|prefix| {
            path.strip_prefix(prefix.as_str()).is_some_and(|rest| {
                rest.is_empty() || rest.starts_with('/') || prefix.ends_with('/')
            })
        })
    }
}

pub fn apply(router: Router<AppState>, state: AppState) -> Router<AppState> {
    // axum 0.8 `from_fn` cannot take a State extractor; pass it with `from_fn_with_state`.
    router.layer(middleware::from_fn_with_state(state, access_middleware))
}

async fn access_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    // Never let a client forge the forwarded subject.
    if let Some(name) = state.access.subject_header() {
        req.headers_mut().remove(name);
    }

    if state.access.is_public(req.uri().path()) {
        return Ok(next.run(req).await);
    }

    let authorization = match authorization_value(req.headers()) {
        Ok(value) => value,
        Err(rejection) => {
            tracing::warn!(reason = %rejection, "unusable authorization header");
            return Err(rejection.into());
        }
    };

    let now = chrono::Utc::now().timestamp();
    let identity = match state.gateway.check(authorization, now) {
        Decision::Allowed(identity) => identity,
        Decision::Rejected(rejection) => return Err(rejection.into()),
    };

    if let (Some(name), Some(subject)) = (state.access.subject_header(), identity.subject.as_deref())
    {
        match HeaderValue::from_str(subject) {
            Ok(value) => {
                req.headers_mut().insert(name.clone(), value);
            }
            Err(_) => tracing::warn!("subject is not a valid header value; not forwarded"),
        }
    }

    // middleware -> extractor
    req.extensions_mut().insert(identity);

    Ok(next.run(req).await)
}

/// The single `Authorization` value, if any. Repeated or non-UTF-8 headers are malformed.
fn authorization_value(headers: &HeaderMap) -> Result<Option<&str>, Rejection> {
    let mut values = headers.get_all(header::AUTHORIZATION).iter();
    let Some(first) = values.next() else {
        return Ok(None);
    };
    if values.next().is_some() {
        return Err(ParseError::MalformedStructure.into());
    }
    first
        .to_str()
        .map(Some)
        .map_err(|_| ParseError::InvalidEncoding.into())
}
