use axum::Json;

use crate::api::v1::extractors::IdentityExtractor;
use crate::services::auth::Identity;

/// GET /api/v1/whoami: echo the verified identity back to the caller.
pub async fn whoami(IdentityExtractor(identity): IdentityExtractor) -> Json<Identity> {
    Json(identity)
}
