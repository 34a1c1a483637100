//! Shared request context. Cheap to clone; everything inside is behind `Arc`.
use std::sync::Arc;

use crate::middleware::auth::access::AccessSettings;
use crate::services::auth::GatewayFilter;

#[derive(Clone, Debug)]
pub struct AppState {
    pub gateway: Arc<GatewayFilter>,
    pub access: Arc<AccessSettings>,
}

impl AppState {
    pub fn new(gateway: Arc<GatewayFilter>, access: AccessSettings) -> Self {
        Self {
            gateway,
            access: Arc::new(access),
        }
    }
}
