//! Unauthenticated liveness and readiness routes.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;

use crate::db::StoreResult;
use crate::model::NodeStatus;
use crate::state::AppState;

#[derive(Debug, Serialize)]
struct Alive {
    ok: bool,
    version: &'static str,
}

#[derive(Debug, Serialize)]
struct Readiness {
    ready: bool,
    stores: Vec<StoreCheck>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fleet: Option<FleetSummary>,
}

#[derive(Debug, Serialize)]
struct StoreCheck {
    store: &'static str,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl StoreCheck {
    fn new(store: &'static str, result: StoreResult<()>) -> Self {
        Self {
            store,
            ok: result.is_ok(),
            error: result.err().map(|e| e.to_string()),
        }
    }
}

/// Node counts as last recorded by the monitor. Informational only.
#[derive(Debug, Serialize)]
struct FleetSummary {
    nodes: usize,
    online: usize,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
}

async fn healthz() -> Json<Alive> {
    Json(Alive {
        ok: true,
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// 503 unless both stores answer. An empty or offline fleet is still ready.
async fn readyz(State(state): State<AppState>) -> (StatusCode, Json<Readiness>) {
    let coordinator = state.coordinator();
    let stores = coordinator.stores();
    let checks = vec![
        StoreCheck::new("nodes", stores.nodes.ping().await),
        StoreCheck::new("accounts", stores.accounts.ping().await),
    ];
    let ready = checks.iter().all(|c| c.ok);

    let fleet = match coordinator.registry().list_all().await {
        Ok(nodes) => Some(FleetSummary {
            nodes: nodes.len(),
            online: nodes.iter().filter(|n| n.status == NodeStatus::Online).count(),
        }),
        Err(_) => None,
    };

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(Readiness {
            ready,
            stores: checks,
            fleet,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::StoreError;

    #[tokio::test]
    async fn test_healthz_is_static() {
        let Json(alive) = healthz().await;
        assert!(alive.ok);
        assert!(!alive.version.is_empty());
    }

    #[test]
    fn test_store_check_carries_error() {
        let check = StoreCheck::new("nodes", Err(StoreError::Query(sqlx::Error::PoolTimedOut)));
        assert!(!check.ok);
        assert!(check.error.unwrap().starts_with("query failed"));

        let check = StoreCheck::new("accounts", Ok(()));
        assert!(check.ok);
        assert!(check.error.is_none());
    }
}
