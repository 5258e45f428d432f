//! Tariff plans.
//!
//! The sales catalogue is owned elsewhere; the coordinator only needs a
//! plan's quota and duration when it provisions an account.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use vpnfleet_id::PlanId;

use crate::config::ConfigHandle;

/// A tariff plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    pub name: String,
    /// Quota in bytes; 0 means unlimited.
    #[serde(default)]
    pub traffic_limit_bytes: u64,
    pub duration_days: u32,
}

/// Read-only lookup of plans by id.
#[async_trait]
pub trait PlanCatalog: Send + Sync {
    async fn plan(&self, id: PlanId) -> Option<Plan>;
}

/// Plans declared in the coordinator configuration.
///
/// Reads the current snapshot on every lookup, so reloaded plans apply to
/// the next provisioning call.
#[derive(Clone)]
pub struct ConfiguredPlans {
    config: ConfigHandle,
}

impl ConfiguredPlans {
    pub fn new(config: ConfigHandle) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PlanCatalog for ConfiguredPlans {
    async fn plan(&self, id: PlanId) -> Option<Plan> {
        self.config
            .snapshot()
            .plans
            .iter()
            .find(|p| p.id == id)
            .cloned()
    }
}
