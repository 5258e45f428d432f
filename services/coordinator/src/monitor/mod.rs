//! Fleet monitoring.
//!
//! Two independent loops keep node records current:
//! - the health probe marks nodes ONLINE, MAINTENANCE or OFFLINE from a
//!   cheap unauthenticated request
//! - the stats sync logs in, pulls host statistics and marks nodes ONLINE
//!   or ERROR
//!
//! A failure on one node never stops the cycle for the others.

mod workers;

pub use workers::{HealthProbeWorker, StatsSyncWorker};

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};
use vpnfleet_panel::{PanelApi, PanelError, PanelResult, ServerStats};

use crate::config::ConfigHandle;
use crate::model::{NodeRecord, NodeStatus};
use crate::registry::NodeRegistry;

/// Outcome counts of one monitor cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub visited: usize,
    pub online: usize,
    pub maintenance: usize,
    pub offline: usize,
    pub errored: usize,
    /// Nodes whose new status could not be stored.
    pub write_failures: usize,
}

impl CycleReport {
    fn record(&mut self, status: NodeStatus) {
        self.visited += 1;
        match status {
            NodeStatus::Online => self.online += 1,
            NodeStatus::Maintenance => self.maintenance += 1,
            NodeStatus::Offline => self.offline += 1,
            NodeStatus::Error => self.errored += 1,
        }
    }
}

pub struct FleetMonitor {
    registry: Arc<NodeRegistry>,
    panel: Arc<dyn PanelApi>,
    config: ConfigHandle,
}

impl FleetMonitor {
    pub fn new(registry: Arc<NodeRegistry>, panel: Arc<dyn PanelApi>, config: ConfigHandle) -> Self {
        Self {
            registry,
            panel,
            config,
        }
    }

    /// Probe every active node and record its reachability.
    ///
    /// Inactive or stale nodes left ONLINE are demoted to OFFLINE.
    #[instrument(skip(self))]
    pub async fn probe_cycle(&self) -> CycleReport {
        let config = self.config.snapshot();
        let probe_timeout = config.monitor.probe_timeout();
        let stale_after = config.monitor.stale_after();
        let mut report = CycleReport::default();

        let nodes = match self.registry.list_all().await {
            Ok(nodes) => nodes,
            Err(e) => {
                error!(error = %e, "Failed to list nodes for health probe");
                return report;
            }
        };

        for node in nodes {
            if !node.is_active {
                if node.status == NodeStatus::Online {
                    self.demote_if_online(&node, "inactive", stale_after, &mut report)
                        .await;
                }
                continue;
            }

            let status = self.probe_node(&node, probe_timeout).await;
            let stored = self
                .registry
                .modify(node.id, |n| {
                    n.status = status;
                    if status == NodeStatus::Online {
                        n.last_sync_at = Some(Utc::now());
                    }
                })
                .await;

            match stored {
                Ok(Some(_)) => report.record(status),
                Ok(None) => debug!(node_id = %node.id, "Node removed during probe"),
                Err(e) => {
                    report.write_failures += 1;
                    error!(node_id = %node.id, error = %e, "Failed to store probe outcome");
                }
            }
        }

        let demoted = self.demote_stale().await;
        report.visited += demoted;
        report.offline += demoted;

        info!(
            visited = report.visited,
            online = report.online,
            maintenance = report.maintenance,
            offline = report.offline,
            "Health probe cycle complete"
        );
        report
    }

    async fn probe_node(&self, node: &NodeRecord, probe_timeout: Duration) -> NodeStatus {
        let endpoint = node.endpoint();
        match tokio::time::timeout(probe_timeout, self.panel.health_probe(&endpoint)).await {
            Ok(Ok(health)) if health.maintenance => NodeStatus::Maintenance,
            Ok(Ok(_)) => NodeStatus::Online,
            Ok(Err(e)) => {
                warn!(node_id = %node.id, kind = e.kind(), error = %e, "Health probe failed");
                NodeStatus::Offline
            }
            Err(_) => {
                warn!(
                    node_id = %node.id,
                    timeout_ms = probe_timeout.as_millis() as u64,
                    "Health probe timed out"
                );
                NodeStatus::Offline
            }
        }
    }

    /// Demote a node that is ONLINE without a current reason to be.
    async fn demote_if_online(
        &self,
        node: &NodeRecord,
        reason: &'static str,
        stale_after: Duration,
        report: &mut CycleReport,
    ) {
        let now = Utc::now();
        let stored = self
            .registry
            .modify(node.id, |n| {
                let stale = n.is_stale(now, stale_after);
                if n.status == NodeStatus::Online && (!n.is_active || stale) {
                    n.status = NodeStatus::Offline;
                }
            })
            .await;

        match stored {
            Ok(Some(n)) if n.status == NodeStatus::Offline => {
                info!(node_id = %node.id, reason, "Demoted node to offline");
                report.record(NodeStatus::Offline);
            }
            Ok(_) => {}
            Err(e) => {
                report.write_failures += 1;
                error!(node_id = %node.id, error = %e, "Failed to demote node");
            }
        }
    }

    /// Pull statistics from every active node.
    #[instrument(skip(self))]
    pub async fn sync_cycle(&self) -> CycleReport {
        let config = self.config.snapshot();
        let remote_timeout = config.monitor.remote_timeout();
        let mut report = CycleReport::default();

        let nodes = match self.registry.list_active().await {
            Ok(nodes) => nodes,
            Err(e) => {
                error!(error = %e, "Failed to list nodes for stats sync");
                return report;
            }
        };

        for node in nodes {
            let outcome = self.fetch_node_stats(&node, remote_timeout).await;
            let status = match &outcome {
                Ok(_) => NodeStatus::Online,
                Err(e) => {
                    warn!(node_id = %node.id, kind = e.kind(), error = %e, "Stats sync failed");
                    NodeStatus::Error
                }
            };

            let stored = self
                .registry
                .modify(node.id, |n| match outcome {
                    Ok(stats) => {
                        n.metrics = stats.into();
                        n.status = NodeStatus::Online;
                        n.last_sync_at = Some(Utc::now());
                    }
                    Err(_) => n.status = NodeStatus::Error,
                })
                .await;

            match stored {
                Ok(Some(_)) => report.record(status),
                Ok(None) => debug!(node_id = %node.id, "Node removed during stats sync"),
                Err(e) => {
                    report.write_failures += 1;
                    error!(node_id = %node.id, error = %e, "Failed to store stats");
                }
            }
        }

        info!(
            visited = report.visited,
            online = report.online,
            errored = report.errored,
            "Stats sync cycle complete"
        );
        report
    }

    async fn fetch_node_stats(
        &self,
        node: &NodeRecord,
        remote_timeout: Duration,
    ) -> PanelResult<ServerStats> {
        let endpoint = node.endpoint();
        let call = async {
            let session = self.panel.authenticate(&endpoint).await?;
            self.panel.fetch_stats(&session).await
        };
        tokio::time::timeout(remote_timeout, call)
            .await
            .unwrap_or_else(|_| Err(PanelError::Unreachable("stats sync deadline exceeded".to_string())))
    }

    /// Demote ONLINE nodes whose last contact is older than the staleness
    /// window. Runs at the end of each probe cycle.
    pub async fn demote_stale(&self) -> usize {
        let stale_after = self.config.snapshot().monitor.stale_after();
        let now = Utc::now();
        let nodes = match self.registry.list_all().await {
            Ok(nodes) => nodes,
            Err(e) => {
                error!(error = %e, "Failed to list nodes for staleness check");
                return 0;
            }
        };

        let mut report = CycleReport::default();
        for node in nodes
            .iter()
            .filter(|n| n.status == NodeStatus::Online && n.is_stale(now, stale_after))
        {
            self.demote_if_online(node, "stale", stale_after, &mut report)
                .await;
        }
        report.offline
    }
}
