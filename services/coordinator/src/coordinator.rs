//! Component wiring.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use vpnfleet_panel::PanelApi;

use crate::config::ConfigHandle;
use crate::db::Stores;
use crate::locks::AccountLocks;
use crate::monitor::{FleetMonitor, HealthProbeWorker, StatsSyncWorker};
use crate::placement::PlacementSelector;
use crate::plans::{ConfiguredPlans, PlanCatalog};
use crate::provisioner::AccountProvisioner;
use crate::reconcile::{ReconcileWorker, Reconciler};
use crate::registry::{NewNode, NodeRegistry, RegistryResult};
use crate::sweeper::ExpirySweeper;

/// Every coordinator component, built over one set of stores and one panel
/// client.
#[derive(Clone)]
pub struct Coordinator {
    config: ConfigHandle,
    stores: Stores,
    registry: Arc<NodeRegistry>,
    monitor: Arc<FleetMonitor>,
    placement: PlacementSelector,
    provisioner: Arc<AccountProvisioner>,
    reconciler: Arc<Reconciler>,
}

impl Coordinator {
    /// Build with the plans declared in the configuration.
    pub fn new(config: ConfigHandle, stores: Stores, panel: Arc<dyn PanelApi>) -> Self {
        let plans = Arc::new(ConfiguredPlans::new(config.clone()));
        Self::with_plans(config, stores, panel, plans)
    }

    pub fn with_plans(
        config: ConfigHandle,
        stores: Stores,
        panel: Arc<dyn PanelApi>,
        plans: Arc<dyn PlanCatalog>,
    ) -> Self {
        let registry = Arc::new(NodeRegistry::new(&stores));
        let monitor = Arc::new(FleetMonitor::new(
            registry.clone(),
            panel.clone(),
            config.clone(),
        ));
        let placement = PlacementSelector::new(registry.clone(), config.clone());
        let account_locks = Arc::new(AccountLocks::new());
        let provisioner = Arc::new(AccountProvisioner::new(
            registry.clone(),
            stores.accounts.clone(),
            panel.clone(),
            plans,
            account_locks.clone(),
            config.clone(),
        ));
        let reconciler = Arc::new(Reconciler::new(
            registry.clone(),
            stores.accounts.clone(),
            panel,
            account_locks,
            config.clone(),
        ));

        Self {
            config,
            stores,
            registry,
            monitor,
            placement,
            provisioner,
            reconciler,
        }
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn monitor(&self) -> &Arc<FleetMonitor> {
        &self.monitor
    }

    pub fn placement(&self) -> &PlacementSelector {
        &self.placement
    }

    pub fn provisioner(&self) -> &Arc<AccountProvisioner> {
        &self.provisioner
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// Register the given nodes, skipping names that already exist.
    ///
    /// Returns how many nodes were created.
    pub async fn seed_nodes(&self, nodes: &[NewNode]) -> RegistryResult<usize> {
        let mut created = 0;
        for node in nodes {
            if self.registry.find_by_name(node.name.trim()).await?.is_some() {
                continue;
            }
            match self.registry.create(node.clone()).await {
                Ok(_) => created += 1,
                Err(e) => warn!(name = %node.name, error = %e, "Skipping invalid seed node"),
            }
        }
        if created > 0 {
            info!(created, "Seeded nodes from configuration");
        }
        Ok(created)
    }

    /// Spawn the background workers. Each stops when `shutdown` turns true.
    pub fn spawn_workers(&self, shutdown: &watch::Receiver<bool>) -> Vec<(&'static str, JoinHandle<()>)> {
        let probe = HealthProbeWorker::new(self.monitor.clone(), self.config.clone());
        let sync = StatsSyncWorker::new(self.monitor.clone(), self.config.clone());
        let sweeper = ExpirySweeper::new(self.provisioner.clone(), self.config.clone());
        let reconcile = ReconcileWorker::new(self.reconciler.clone(), self.config.clone());

        let rx = shutdown.clone();
        let probe = tokio::spawn(async move { probe.run(rx).await });
        let rx = shutdown.clone();
        let sync = tokio::spawn(async move { sync.run(rx).await });
        let rx = shutdown.clone();
        let sweeper = tokio::spawn(async move { sweeper.run(rx).await });
        let rx = shutdown.clone();
        let reconcile = tokio::spawn(async move { reconcile.run(rx).await });

        vec![
            ("health_probe", probe),
            ("stats_sync", sync),
            ("expiry_sweep", sweeper),
            ("reconcile", reconcile),
        ]
    }
}
