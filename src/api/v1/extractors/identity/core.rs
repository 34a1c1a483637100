use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::AppError;
use crate::services::auth::Identity;
use crate::services::auth::filter::ReasonCode;

/// Fails with 401 `missing_token` when no identity is present, i.e. the
/// route is not behind the access middleware (or is configured as public).
pub struct IdentityExtractor(pub Identity);

impl<S> FromRequestParts<S> for IdentityExtractor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .cloned()
            .map(IdentityExtractor)
            .ok_or(AppError::Unauthorized(ReasonCode::MissingToken))
    }
}
