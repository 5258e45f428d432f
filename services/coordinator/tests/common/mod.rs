//! Shared fixtures for coordinator integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use vpnfleet_coordinator::config::{ConfigHandle, CoordinatorConfig};
use vpnfleet_coordinator::db::Stores;
use vpnfleet_coordinator::model::NodeRecord;
use vpnfleet_coordinator::plans::Plan;
use vpnfleet_coordinator::registry::NewNode;
use vpnfleet_coordinator::Coordinator;
use vpnfleet_id::PlanId;
use vpnfleet_panel::MockPanel;

pub const INBOUND: i64 = 1;
pub const MONTH: PlanId = PlanId::new(1);

pub struct Harness {
    pub coordinator: Coordinator,
    pub panel: Arc<MockPanel>,
    pub config: ConfigHandle,
    pub stores: Stores,
}

/// Defaults with short deadlines and one 30-day plan.
pub fn config() -> CoordinatorConfig {
    let mut config = CoordinatorConfig::default();
    config.monitor.probe_timeout_ms = 50;
    config.monitor.remote_timeout_secs = 1;
    config.plans.push(Plan {
        id: MONTH,
        name: "Month".to_string(),
        traffic_limit_bytes: 100 << 30,
        duration_days: 30,
    });
    config
}

pub fn harness() -> Harness {
    harness_with(config())
}

pub fn harness_with(config: CoordinatorConfig) -> Harness {
    let config = ConfigHandle::new(config);
    let stores = Stores::in_memory();
    let panel = Arc::new(MockPanel::new());
    let coordinator = Coordinator::new(config.clone(), stores.clone(), panel.clone());
    Harness {
        coordinator,
        panel,
        config,
        stores,
    }
}

pub fn panel_url(name: &str) -> String {
    format!("http://{name}.fleet.test:2053")
}

pub fn new_node(name: &str, location: &str, capacity: u32) -> NewNode {
    NewNode {
        name: name.to_string(),
        location: location.to_string(),
        country: String::new(),
        host: format!("{name}.fleet.test"),
        port: 443,
        panel_url: panel_url(name),
        username: "admin".to_string(),
        password: "admin".to_string(),
        protocol: "vless".to_string(),
        inbound_id: Some(INBOUND),
        capacity,
        is_active: true,
    }
}

impl Harness {
    /// Register a node that the fake panel knows about.
    pub async fn add_node(&self, name: &str, location: &str, capacity: u32) -> NodeRecord {
        self.panel.add_node(&panel_url(name));
        self.coordinator
            .registry()
            .create(new_node(name, location, capacity))
            .await
            .unwrap()
    }

    pub async fn node(&self, node: &NodeRecord) -> NodeRecord {
        self.coordinator.registry().require(node.id).await.unwrap()
    }
}
