use axum::{Router, routing::get};

use crate::api::v1::handlers::whoami::whoami;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/whoami", get(whoami))
}
