use std::sync::Arc;

use amber_core::Daemon;
use axum::{
    routing::{get, post, put},
    Router,
};

use crate::handlers;

/// Create all v1 API routes
pub fn create_v1_router() -> Router<Arc<Daemon>> {
    Router::new()
        .route(
            "/sources",
            get(handlers::list_sources).post(handlers::add_source),
        )
        .route("/sources/{id}", axum::routing::delete(handlers::remove_source))
        .route("/sources/{id}/enabled", put(handlers::set_src_enabled))
        .route("/packages/get_update", post(handlers::get_update))
        .route("/blobs/{hash}", post(handlers::get_blob))
        .route(
            "/system/check_update",
            post(handlers::check_for_system_update),
        )
}
