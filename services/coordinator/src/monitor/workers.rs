//! Background loops driving the monitor.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use super::FleetMonitor;
use crate::config::ConfigHandle;
use crate::worker::{run_periodic, PeriodicJob};

/// Runs [`FleetMonitor::probe_cycle`] every health interval.
pub struct HealthProbeWorker {
    monitor: Arc<FleetMonitor>,
    config: ConfigHandle,
}

impl HealthProbeWorker {
    pub fn new(monitor: Arc<FleetMonitor>, config: ConfigHandle) -> Self {
        Self { monitor, config }
    }

    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        run_periodic(self, shutdown).await;
    }
}

#[async_trait]
impl PeriodicJob for HealthProbeWorker {
    fn name(&self) -> &'static str {
        "health_probe"
    }

    fn interval(&self) -> Duration {
        self.config.snapshot().monitor.health_interval()
    }

    async fn run_cycle(&self) {
        self.monitor.probe_cycle().await;
    }
}

/// Runs [`FleetMonitor::sync_cycle`] every sync interval.
pub struct StatsSyncWorker {
    monitor: Arc<FleetMonitor>,
    config: ConfigHandle,
}

impl StatsSyncWorker {
    pub fn new(monitor: Arc<FleetMonitor>, config: ConfigHandle) -> Self {
        Self { monitor, config }
    }

    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        run_periodic(self, shutdown).await;
    }
}

#[async_trait]
impl PeriodicJob for StatsSyncWorker {
    fn name(&self) -> &'static str {
        "stats_sync"
    }

    fn interval(&self) -> Duration {
        self.config.snapshot().monitor.sync_interval()
    }

    async fn run_cycle(&self) {
        self.monitor.sync_cycle().await;
    }
}
