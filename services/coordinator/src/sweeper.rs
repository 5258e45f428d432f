//! Periodic expiry of lapsed accounts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use tracing::error;

use crate::config::ConfigHandle;
use crate::provisioner::AccountProvisioner;
use crate::worker::{run_periodic, PeriodicJob};

/// Runs [`AccountProvisioner::check_expired_accounts`] on the sweep interval.
pub struct ExpirySweeper {
    provisioner: Arc<AccountProvisioner>,
    config: ConfigHandle,
}

impl ExpirySweeper {
    pub fn new(provisioner: Arc<AccountProvisioner>, config: ConfigHandle) -> Self {
        Self {
            provisioner,
            config,
        }
    }

    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        run_periodic(self, shutdown).await;
    }
}

#[async_trait]
impl PeriodicJob for ExpirySweeper {
    fn name(&self) -> &'static str {
        "expiry_sweep"
    }

    fn interval(&self) -> Duration {
        self.config.snapshot().accounts.expiry_sweep_interval()
    }

    async fn run_cycle(&self) {
        if let Err(e) = self.provisioner.check_expired_accounts(Utc::now()).await {
            error!(error = %e, "Expiry sweep failed");
        }
    }
}
