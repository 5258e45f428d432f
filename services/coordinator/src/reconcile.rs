//! Divergence detection between local accounts and remote panel clients.
//!
//! Local state and remote state drift apart when a provisioning call fails
//! halfway or when someone edits a panel by hand. The reconciler compares
//! the two for one node at a time and records what it finds:
//! - active accounts with no remote client are flagged `error`, or
//!   recreated when repair is enabled
//! - remote clients with no local account are reported and left alone
//! - remote traffic counters are folded into `traffic_used`
//!
//! Each account is re-read under its lock before it is touched. Accounts
//! written after the remote listing was taken are left for the next pass.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};
use vpnfleet_id::{AccountId, NodeId};
use vpnfleet_panel::{PanelApi, PanelError, PanelResult, RemoteClient};

use crate::config::ConfigHandle;
use crate::db::{AccountRepository, StoreError};
use crate::locks::AccountLocks;
use crate::model::{AccountRecord, AccountStatus, NodeRecord, NodeStatus};
use crate::registry::{NodeRegistry, RegistryError};
use crate::worker::{run_periodic, PeriodicJob};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("node {0} not found")]
    UnknownNode(NodeId),

    #[error("node {0} has no inbound configured")]
    NodeNotProvisioned(NodeId),

    #[error("listing clients on node {node_id} failed: {source}")]
    Remote {
        node_id: NodeId,
        #[source]
        source: PanelError,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What one reconciliation pass found on a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DivergenceReport {
    pub node_id: Option<NodeId>,
    /// Active accounts without a remote client, flagged `error`.
    pub missing_remote: Vec<AccountId>,
    /// Active accounts whose missing remote client was recreated.
    pub repaired: Vec<AccountId>,
    /// Emails of remote clients with no local account on this node.
    pub orphaned_remote: Vec<String>,
    /// Accounts whose `traffic_used` increased.
    pub traffic_refreshed: usize,
}

impl DivergenceReport {
    pub fn is_clean(&self) -> bool {
        self.missing_remote.is_empty() && self.repaired.is_empty() && self.orphaned_remote.is_empty()
    }
}

pub struct Reconciler {
    registry: Arc<NodeRegistry>,
    accounts: Arc<dyn AccountRepository>,
    panel: Arc<dyn PanelApi>,
    locks: Arc<AccountLocks>,
    config: ConfigHandle,
}

impl Reconciler {
    /// `locks` must be shared with the provisioner.
    pub fn new(
        registry: Arc<NodeRegistry>,
        accounts: Arc<dyn AccountRepository>,
        panel: Arc<dyn PanelApi>,
        locks: Arc<AccountLocks>,
        config: ConfigHandle,
    ) -> Self {
        Self {
            registry,
            accounts,
            panel,
            locks,
            config,
        }
    }

    /// Compare a node's active accounts with its remote clients.
    #[instrument(skip(self))]
    pub async fn reconcile_node(&self, node_id: NodeId) -> Result<DivergenceReport, ReconcileError> {
        let config = self.config.snapshot();
        let repair = config.reconcile.repair;
        let deadline = config.monitor.remote_timeout();

        let node = self
            .registry
            .get(node_id)
            .await?
            .ok_or(ReconcileError::UnknownNode(node_id))?;
        let inbound_id = node
            .inbound_id
            .ok_or(ReconcileError::NodeNotProvisioned(node_id))?;

        let listed_at = Utc::now();
        let remote = self
            .list_remote(&node, inbound_id, deadline)
            .await
            .map_err(|source| ReconcileError::Remote { node_id, source })?;
        let mut remote_by_email: HashMap<&str, &RemoteClient> =
            remote.iter().map(|c| (c.email.as_str(), c)).collect();

        let local = self.accounts.list_by_node(node_id).await?;
        let mut report = DivergenceReport {
            node_id: Some(node_id),
            ..Default::default()
        };

        for listed in local {
            let counterpart = remote_by_email.remove(listed.email.as_str());
            if listed.status != AccountStatus::Active {
                continue;
            }

            let _guard = self.locks.lock(listed.id).await;
            let Some(mut account) = self.accounts.get(listed.id).await? else {
                continue;
            };
            if account.node_id != node_id
                || account.status != AccountStatus::Active
                || account.updated_at >= listed_at
            {
                debug!(account_id = %account.id, status = %account.status, "Account changed since listing");
                continue;
            }

            match counterpart {
                Some(client) => {
                    let total = client.traffic.total();
                    if total > account.traffic_used {
                        account.traffic_used = total;
                        account.updated_at = Utc::now();
                        self.accounts.update(&account).await?;
                        report.traffic_refreshed += 1;
                    }
                }
                None if repair => match self.recreate(&node, inbound_id, &account, deadline).await {
                    Ok(()) => {
                        info!(account_id = %account.id, "Recreated missing remote client");
                        report.repaired.push(account.id);
                    }
                    Err(e) => {
                        warn!(account_id = %account.id, error = %e, "Failed to recreate remote client");
                        self.flag(&mut account).await?;
                        report.missing_remote.push(account.id);
                    }
                },
                None => {
                    warn!(account_id = %account.id, email = %account.email, "Active account has no remote client");
                    self.flag(&mut account).await?;
                    report.missing_remote.push(account.id);
                }
            }
        }

        // Whatever is left has no local account on this node.
        report.orphaned_remote = remote
            .iter()
            .filter(|c| remote_by_email.contains_key(c.email.as_str()))
            .map(|c| c.email.clone())
            .collect();
        for email in &report.orphaned_remote {
            warn!(email = %email, "Remote client has no local account");
        }

        if !report.missing_remote.is_empty() || !report.repaired.is_empty() {
            if let Err(e) = self.registry.recompute_load(node_id).await {
                warn!(error = %e, "Failed to recompute node load");
            }
        }

        Ok(report)
    }

    /// Reconcile every active ONLINE node. Per-node failures are logged.
    #[instrument(skip(self))]
    pub async fn reconcile_all(&self) -> Vec<DivergenceReport> {
        let nodes = match self.registry.list_active().await {
            Ok(nodes) => nodes,
            Err(e) => {
                error!(error = %e, "Failed to list nodes for reconciliation");
                return Vec::new();
            }
        };

        let mut reports = Vec::new();
        for node in nodes
            .iter()
            .filter(|n| n.status == NodeStatus::Online && n.inbound_id.is_some())
        {
            match self.reconcile_node(node.id).await {
                Ok(report) => reports.push(report),
                Err(e) => error!(node_id = %node.id, error = %e, "Reconciliation failed"),
            }
        }

        let divergent = reports.iter().filter(|r| !r.is_clean()).count();
        info!(nodes = reports.len(), divergent, "Reconciliation pass complete");
        reports
    }

    async fn list_remote(
        &self,
        node: &NodeRecord,
        inbound_id: i64,
        deadline: Duration,
    ) -> PanelResult<Vec<RemoteClient>> {
        let endpoint = node.endpoint();
        let call = async {
            let session = self.panel.authenticate(&endpoint).await?;
            self.panel.list_clients(&session, inbound_id).await
        };
        tokio::time::timeout(deadline, call)
            .await
            .unwrap_or_else(|_| Err(PanelError::Unreachable("list clients deadline exceeded".to_string())))
    }

    async fn recreate(
        &self,
        node: &NodeRecord,
        inbound_id: i64,
        account: &AccountRecord,
        deadline: Duration,
    ) -> PanelResult<()> {
        let endpoint = node.endpoint();
        let spec = account.client_spec();
        let call = async {
            let session = self.panel.authenticate(&endpoint).await?;
            self.panel.add_client(&session, inbound_id, &spec).await
        };
        tokio::time::timeout(deadline, call)
            .await
            .unwrap_or_else(|_| Err(PanelError::Unreachable("add client deadline exceeded".to_string())))
    }

    async fn flag(&self, account: &mut AccountRecord) -> Result<(), StoreError> {
        account.status = AccountStatus::Error;
        account.updated_at = Utc::now();
        self.accounts.update(account).await?;
        Ok(())
    }
}

/// Runs [`Reconciler::reconcile_all`] on the reconcile interval.
pub struct ReconcileWorker {
    reconciler: Arc<Reconciler>,
    config: ConfigHandle,
}

impl ReconcileWorker {
    pub fn new(reconciler: Arc<Reconciler>, config: ConfigHandle) -> Self {
        Self { reconciler, config }
    }

    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        run_periodic(self, shutdown).await;
    }
}

#[async_trait]
impl PeriodicJob for ReconcileWorker {
    fn name(&self) -> &'static str {
        "reconcile"
    }

    fn interval(&self) -> Duration {
        self.config.snapshot().reconcile.interval()
    }

    async fn run_cycle(&self) {
        if !self.config.snapshot().reconcile.enabled {
            return;
        }
        self.reconciler.reconcile_all().await;
    }
}
