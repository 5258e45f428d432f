//! The panel contract consumed by the coordinator.

use async_trait::async_trait;

use crate::error::PanelResult;
use crate::types::{
    ClientKey, ClientSpec, ClientTraffic, HealthReport, PanelEndpoint, PanelSession,
    RemoteClient, ServerStats,
};

/// Operations the coordinator performs against a node's panel.
///
/// Implementations must not retry internally; the caller owns deadlines and
/// retry policy.
#[async_trait]
pub trait PanelApi: Send + Sync {
    /// Log in and return a session for subsequent calls.
    async fn authenticate(&self, endpoint: &PanelEndpoint) -> PanelResult<PanelSession>;

    /// Cheap liveness check. Any HTTP answer counts as reachable.
    async fn health_probe(&self, endpoint: &PanelEndpoint) -> PanelResult<HealthReport>;

    /// Aggregate host statistics.
    async fn fetch_stats(&self, session: &PanelSession) -> PanelResult<ServerStats>;

    async fn add_client(
        &self,
        session: &PanelSession,
        inbound_id: i64,
        client: &ClientSpec,
    ) -> PanelResult<()>;

    async fn update_client(
        &self,
        session: &PanelSession,
        inbound_id: i64,
        client: &ClientSpec,
    ) -> PanelResult<()>;

    async fn delete_client(
        &self,
        session: &PanelSession,
        inbound_id: i64,
        client: &ClientKey,
    ) -> PanelResult<()>;

    async fn client_traffic(
        &self,
        session: &PanelSession,
        inbound_id: i64,
        email: &str,
    ) -> PanelResult<ClientTraffic>;

    async fn reset_client_traffic(
        &self,
        session: &PanelSession,
        inbound_id: i64,
        email: &str,
    ) -> PanelResult<()>;

    /// Every client configured under the inbound, with its counters.
    async fn list_clients(
        &self,
        session: &PanelSession,
        inbound_id: i64,
    ) -> PanelResult<Vec<RemoteClient>>;
}
