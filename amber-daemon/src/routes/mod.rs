pub mod v1;

use std::sync::Arc;

use amber_core::Daemon;
use axum::Router;

/// Create the main API router with all versions
pub fn create_api_router() -> Router<Arc<Daemon>> {
    Router::new().nest("/v1", v1::create_v1_router())
}
