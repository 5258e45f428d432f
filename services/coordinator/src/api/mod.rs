//! HTTP API handlers and routing.
//!
//! Read-only views for dashboards: node listings, per-node stats and
//! placement previews.

mod auth;
pub mod error;
mod health;
mod v1;

use axum::{middleware, Router};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Create the main API router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let v1 = v1::routes().route_layer(middleware::from_fn_with_state(
        state.clone(),
        auth::require_token,
    ));

    Router::new()
        // Health endpoints (no auth required)
        .merge(health::routes())
        .nest("/v1", v1)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
