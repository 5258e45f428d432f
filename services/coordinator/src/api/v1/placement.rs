//! Placement preview.
//!
//! Mirrors what a provisioning caller does: try the requested location
//! first and fall back to the whole fleet.

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::model::NodeRecord;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/", get(preview))
}

#[derive(Debug, Deserialize)]
pub struct PlacementQuery {
    pub location: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PlacementResponse {
    pub node: NodeRecord,
    /// The requested location had no active node.
    pub fallback: bool,
}

async fn preview(
    State(state): State<AppState>,
    Query(query): Query<PlacementQuery>,
) -> Result<Json<PlacementResponse>, ApiError> {
    let placement = state.placement();

    if let Some(location) = query.location.as_deref().filter(|l| !l.trim().is_empty()) {
        if let Some(node) = placement.best_node_in_location(location).await? {
            return Ok(Json(PlacementResponse {
                node,
                fallback: false,
            }));
        }
        return match placement.best_node().await? {
            Some(node) => Ok(Json(PlacementResponse {
                node,
                fallback: true,
            })),
            None => Err(no_nodes()),
        };
    }

    match placement.best_node().await? {
        Some(node) => Ok(Json(PlacementResponse {
            node,
            fallback: false,
        })),
        None => Err(no_nodes()),
    }
}

fn no_nodes() -> ApiError {
    ApiError::not_found("no_placement", "no active node is below the overload threshold")
}
