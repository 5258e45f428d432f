//! API v1 routes.

mod nodes;
mod placement;

use axum::Router;

use crate::state::AppState;

/// Create API v1 routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/nodes", nodes::routes())
        .nest("/placement", placement::routes())
}
