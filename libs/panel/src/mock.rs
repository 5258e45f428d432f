//! In-process panel fake.
//!
//! Nodes are keyed by base URL. Unknown URLs behave like hosts that refuse
//! connections. Every call is recorded so tests can assert on ordering.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::api::PanelApi;
use crate::error::{PanelError, PanelResult};
use crate::types::{
    ClientKey, ClientSpec, ClientTraffic, HealthReport, PanelEndpoint, PanelSession,
    RemoteClient, ServerStats,
};

/// Panel operations, for fault injection and call accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PanelOp {
    Authenticate,
    HealthProbe,
    FetchStats,
    AddClient,
    UpdateClient,
    DeleteClient,
    ClientTraffic,
    ResetTraffic,
    ListClients,
}

#[derive(Debug, Clone)]
struct MockClient {
    spec: ClientSpec,
    traffic: ClientTraffic,
}

#[derive(Debug)]
struct MockNode {
    reachable: bool,
    maintenance: bool,
    accept_login: bool,
    stats: ServerStats,
    failing: HashSet<PanelOp>,
    delays: HashMap<PanelOp, Duration>,
    inbounds: BTreeMap<i64, Vec<MockClient>>,
}

impl Default for MockNode {
    fn default() -> Self {
        Self {
            reachable: true,
            maintenance: false,
            accept_login: true,
            stats: ServerStats::default(),
            failing: HashSet::new(),
            delays: HashMap::new(),
            inbounds: BTreeMap::new(),
        }
    }
}

/// Fake panel fleet for tests and local development.
#[derive(Debug, Default)]
pub struct MockPanel {
    nodes: Mutex<HashMap<String, MockNode>>,
    calls: Mutex<Vec<(String, PanelOp)>>,
}

impl MockPanel {
    /// Create an empty fleet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a healthy node answering at `base_url`.
    pub fn add_node(&self, base_url: &str) {
        self.lock_nodes()
            .insert(base_url.to_string(), MockNode::default());
    }

    pub fn set_reachable(&self, base_url: &str, reachable: bool) {
        self.with_node(base_url, |node| node.reachable = reachable);
    }

    pub fn set_maintenance(&self, base_url: &str, maintenance: bool) {
        self.with_node(base_url, |node| node.maintenance = maintenance);
    }

    pub fn set_accept_login(&self, base_url: &str, accept: bool) {
        self.with_node(base_url, |node| node.accept_login = accept);
    }

    pub fn set_stats(&self, base_url: &str, stats: ServerStats) {
        self.with_node(base_url, |node| node.stats = stats);
    }

    /// Make `op` fail with [`PanelError::Rejected`] until cleared.
    pub fn fail(&self, base_url: &str, op: PanelOp) {
        self.with_node(base_url, |node| {
            node.failing.insert(op);
        });
    }

    pub fn clear_failure(&self, base_url: &str, op: PanelOp) {
        self.with_node(base_url, |node| {
            node.failing.remove(&op);
        });
    }

    /// Delay every `op` call by `delay` before answering.
    pub fn set_delay(&self, base_url: &str, op: PanelOp, delay: Duration) {
        self.with_node(base_url, |node| {
            node.delays.insert(op, delay);
        });
    }

    /// Clients currently configured under an inbound.
    pub fn clients(&self, base_url: &str, inbound_id: i64) -> Vec<ClientSpec> {
        self.lock_nodes()
            .get(base_url)
            .and_then(|node| node.inbounds.get(&inbound_id))
            .map(|clients| clients.iter().map(|c| c.spec.clone()).collect())
            .unwrap_or_default()
    }

    pub fn has_client(&self, base_url: &str, inbound_id: i64, email: &str) -> bool {
        self.clients(base_url, inbound_id)
            .iter()
            .any(|c| c.email == email)
    }

    /// Seed a client directly, bypassing fault injection.
    pub fn insert_client(&self, base_url: &str, inbound_id: i64, spec: ClientSpec) {
        self.with_node(base_url, |node| {
            node.inbounds.entry(inbound_id).or_default().push(MockClient {
                spec,
                traffic: ClientTraffic::default(),
            });
        });
    }

    pub fn set_traffic(&self, base_url: &str, inbound_id: i64, email: &str, traffic: ClientTraffic) {
        self.with_node(base_url, |node| {
            if let Some(client) = node
                .inbounds
                .get_mut(&inbound_id)
                .and_then(|clients| clients.iter_mut().find(|c| c.spec.email == email))
            {
                client.traffic = traffic;
            }
        });
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<(String, PanelOp)> {
        self.lock_calls().clone()
    }

    /// Number of `op` calls made against `base_url`.
    pub fn count(&self, base_url: &str, op: PanelOp) -> usize {
        self.lock_calls()
            .iter()
            .filter(|(url, o)| url == base_url && *o == op)
            .count()
    }

    fn lock_nodes(&self) -> MutexGuard<'_, HashMap<String, MockNode>> {
        self.nodes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_calls(&self) -> MutexGuard<'_, Vec<(String, PanelOp)>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_node(&self, base_url: &str, f: impl FnOnce(&mut MockNode)) {
        if let Some(node) = self.lock_nodes().get_mut(base_url) {
            f(node);
        }
    }

    /// Record the call, apply delay and fault injection, then run `f`.
    async fn enter<T>(
        &self,
        base_url: &str,
        op: PanelOp,
        f: impl FnOnce(&mut MockNode) -> PanelResult<T>,
    ) -> PanelResult<T> {
        self.lock_calls().push((base_url.to_string(), op));

        let delay = self
            .lock_nodes()
            .get(base_url)
            .and_then(|node| node.delays.get(&op).copied());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut nodes = self.lock_nodes();
        let Some(node) = nodes.get_mut(base_url) else {
            return Err(PanelError::Unreachable(format!("connection refused: {base_url}")));
        };
        if !node.reachable {
            return Err(PanelError::Unreachable(format!("connection timed out: {base_url}")));
        }
        if node.failing.contains(&op) {
            debug!(base_url, ?op, "[MOCK] Injected panel failure");
            return Err(PanelError::Rejected {
                message: format!("injected {op:?} failure"),
            });
        }
        f(node)
    }

    async fn enter_authed<T>(
        &self,
        session: &PanelSession,
        op: PanelOp,
        f: impl FnOnce(&mut MockNode) -> PanelResult<T>,
    ) -> PanelResult<T> {
        self.enter(&session.base_url, op, |node| {
            if !node.accept_login {
                return Err(PanelError::AuthRejected);
            }
            f(node)
        })
        .await
    }
}

#[async_trait]
impl PanelApi for MockPanel {
    async fn authenticate(&self, endpoint: &PanelEndpoint) -> PanelResult<PanelSession> {
        self.enter(&endpoint.base_url, PanelOp::Authenticate, |node| {
            if !node.accept_login {
                return Err(PanelError::AuthRejected);
            }
            Ok(PanelSession {
                base_url: endpoint.base_url.clone(),
                cookie: "session=mock".to_string(),
            })
        })
        .await
    }

    async fn health_probe(&self, endpoint: &PanelEndpoint) -> PanelResult<HealthReport> {
        self.enter(&endpoint.base_url, PanelOp::HealthProbe, |node| {
            Ok(HealthReport {
                maintenance: node.maintenance,
            })
        })
        .await
    }

    async fn fetch_stats(&self, session: &PanelSession) -> PanelResult<ServerStats> {
        self.enter_authed(session, PanelOp::FetchStats, |node| Ok(node.stats.clone()))
            .await
    }

    async fn add_client(
        &self,
        session: &PanelSession,
        inbound_id: i64,
        client: &ClientSpec,
    ) -> PanelResult<()> {
        self.enter_authed(session, PanelOp::AddClient, |node| {
            let clients = node.inbounds.entry(inbound_id).or_default();
            if clients.iter().any(|c| c.spec.email == client.email) {
                return Err(PanelError::Rejected {
                    message: format!("duplicate email: {}", client.email),
                });
            }
            clients.push(MockClient {
                spec: client.clone(),
                traffic: ClientTraffic::default(),
            });
            Ok(())
        })
        .await
    }

    async fn update_client(
        &self,
        session: &PanelSession,
        inbound_id: i64,
        client: &ClientSpec,
    ) -> PanelResult<()> {
        self.enter_authed(session, PanelOp::UpdateClient, |node| {
            let existing = node
                .inbounds
                .get_mut(&inbound_id)
                .and_then(|clients| clients.iter_mut().find(|c| c.spec.uuid == client.uuid))
                .ok_or_else(|| PanelError::Rejected {
                    message: format!("client {} not found", client.uuid),
                })?;
            existing.spec = client.clone();
            Ok(())
        })
        .await
    }

    async fn delete_client(
        &self,
        session: &PanelSession,
        inbound_id: i64,
        client: &ClientKey,
    ) -> PanelResult<()> {
        self.enter_authed(session, PanelOp::DeleteClient, |node| {
            let clients = node.inbounds.entry(inbound_id).or_default();
            let before = clients.len();
            clients.retain(|c| c.spec.uuid != client.uuid);
            if clients.len() == before {
                return Err(PanelError::Rejected {
                    message: format!("client {} not found", client.uuid),
                });
            }
            Ok(())
        })
        .await
    }

    async fn client_traffic(
        &self,
        session: &PanelSession,
        inbound_id: i64,
        email: &str,
    ) -> PanelResult<ClientTraffic> {
        self.enter_authed(session, PanelOp::ClientTraffic, |node| {
            node.inbounds
                .get(&inbound_id)
                .and_then(|clients| clients.iter().find(|c| c.spec.email == email))
                .map(|c| c.traffic)
                .ok_or_else(|| PanelError::Rejected {
                    message: format!("client {email} not found"),
                })
        })
        .await
    }

    async fn reset_client_traffic(
        &self,
        session: &PanelSession,
        inbound_id: i64,
        email: &str,
    ) -> PanelResult<()> {
        self.enter_authed(session, PanelOp::ResetTraffic, |node| {
            let client = node
                .inbounds
                .get_mut(&inbound_id)
                .and_then(|clients| clients.iter_mut().find(|c| c.spec.email == email))
                .ok_or_else(|| PanelError::Rejected {
                    message: format!("client {email} not found"),
                })?;
            client.traffic = ClientTraffic::default();
            Ok(())
        })
        .await
    }

    async fn list_clients(
        &self,
        session: &PanelSession,
        inbound_id: i64,
    ) -> PanelResult<Vec<RemoteClient>> {
        self.enter_authed(session, PanelOp::ListClients, |node| {
            Ok(node
                .inbounds
                .get(&inbound_id)
                .map(|clients| {
                    clients
                        .iter()
                        .map(|c| RemoteClient {
                            uuid: Some(c.spec.uuid),
                            email: c.spec.email.clone(),
                            enabled: c.spec.enabled,
                            traffic: c.traffic,
                        })
                        .collect()
                })
                .unwrap_or_default())
        })
        .await
    }
}
