//! Node dashboard endpoints.

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use vpnfleet_id::NodeId;

use crate::api::error::ApiError;
use crate::model::NodeRecord;
use crate::registry::NodeStats;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_nodes))
        .route("/{node_id}", get(get_node))
        .route("/{node_id}/stats", get(node_stats))
}

#[derive(Debug, Serialize)]
pub struct ListNodesResponse {
    pub items: Vec<NodeRecord>,
}

async fn list_nodes(State(state): State<AppState>) -> Result<Json<ListNodesResponse>, ApiError> {
    let items = state.registry().list_all().await?;
    Ok(Json(ListNodesResponse { items }))
}

async fn get_node(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> Result<Json<NodeRecord>, ApiError> {
    let node_id = parse_node_id(&node_id)?;
    Ok(Json(state.registry().require(node_id).await?))
}

async fn node_stats(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> Result<Json<NodeStats>, ApiError> {
    let node_id = parse_node_id(&node_id)?;
    let stale_after = state.config().snapshot().monitor.stale_after();
    Ok(Json(state.registry().stats(node_id, stale_after).await?))
}

fn parse_node_id(raw: &str) -> Result<NodeId, ApiError> {
    raw.parse()
        .map_err(|e| ApiError::bad_request("invalid_node_id", format!("invalid node id: {e}")))
}
