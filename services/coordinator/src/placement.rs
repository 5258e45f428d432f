//! Node placement for new accounts.
//!
//! Selection is a pure function of a node snapshot. A node is a candidate
//! when its administrative flag is set; the monitor's status is not
//! consulted. Among candidates below the overload threshold the lowest load
//! wins, with the node id as tie breaker.
//!
//! The two selectors differ when every candidate is overloaded:
//! [`best_node`] refuses and returns `None`, while [`best_node_in_location`]
//! still returns the least-loaded node in that location.

use std::sync::Arc;

use crate::config::ConfigHandle;
use crate::model::NodeRecord;
use crate::registry::{NodeRegistry, RegistryResult};

/// Active accounts as a percentage of capacity, rounded and capped at 100.
///
/// A node without capacity counts as fully loaded.
pub fn compute_load(active: u32, capacity: u32) -> u8 {
    if capacity == 0 {
        return 100;
    }
    let percent = (u64::from(active) * 100 + u64::from(capacity) / 2) / u64::from(capacity);
    u8::try_from(percent.min(100)).unwrap_or(100)
}

/// Pick the least-loaded active node below `threshold`.
pub fn best_node(nodes: &[NodeRecord], threshold: u8) -> Option<&NodeRecord> {
    pick(nodes.iter().filter(|n| n.is_active), threshold, false)
}

/// Pick the best node among those in `location`.
///
/// Location labels compare case-insensitively after trimming. Falls back to
/// the least-loaded node when all are overloaded, and returns `None` only
/// when the location has no active node.
pub fn best_node_in_location<'a>(
    nodes: &'a [NodeRecord],
    location: &str,
    threshold: u8,
) -> Option<&'a NodeRecord> {
    let wanted = location.trim();
    pick(
        nodes
            .iter()
            .filter(|n| n.is_active && n.location.trim().eq_ignore_ascii_case(wanted)),
        threshold,
        true,
    )
}

fn pick<'a>(
    candidates: impl Iterator<Item = &'a NodeRecord>,
    threshold: u8,
    saturated_fallback: bool,
) -> Option<&'a NodeRecord> {
    let mut best_under: Option<&NodeRecord> = None;
    let mut best_any: Option<&NodeRecord> = None;

    for node in candidates {
        if node.load_percent < threshold && less_loaded(node, best_under) {
            best_under = Some(node);
        }
        if less_loaded(node, best_any) {
            best_any = Some(node);
        }
    }

    if saturated_fallback {
        best_under.or(best_any)
    } else {
        best_under
    }
}

fn less_loaded(node: &NodeRecord, current: Option<&NodeRecord>) -> bool {
    current.is_none_or(|c| (node.load_percent, node.id) < (c.load_percent, c.id))
}

/// Placement over the live registry, using the configured threshold.
#[derive(Clone)]
pub struct PlacementSelector {
    registry: Arc<NodeRegistry>,
    config: ConfigHandle,
}

impl PlacementSelector {
    pub fn new(registry: Arc<NodeRegistry>, config: ConfigHandle) -> Self {
        Self { registry, config }
    }

    pub async fn best_node(&self) -> RegistryResult<Option<NodeRecord>> {
        let threshold = self.config.snapshot().placement.overload_threshold;
        let nodes = self.registry.list_all().await?;
        Ok(best_node(&nodes, threshold).cloned())
    }

    pub async fn best_node_in_location(&self, location: &str) -> RegistryResult<Option<NodeRecord>> {
        let threshold = self.config.snapshot().placement.overload_threshold;
        let nodes = self.registry.list_all().await?;
        Ok(best_node_in_location(&nodes, location, threshold).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NodeMetrics, NodeStatus};
    use chrono::Utc;
    use rstest::rstest;
    use vpnfleet_id::NodeId;

    fn node(location: &str, load: u8, is_active: bool) -> NodeRecord {
        let now = Utc::now();
        NodeRecord {
            id: NodeId::new(),
            name: format!("{location}-{load}"),
            location: location.to_string(),
            country: String::new(),
            host: "10.0.0.1".to_string(),
            port: 443,
            panel_url: "http://10.0.0.1:2053".to_string(),
            username: "admin".to_string(),
            password: "admin".to_string(),
            protocol: "vless".to_string(),
            inbound_id: Some(1),
            capacity: 100,
            load_percent: load,
            status: NodeStatus::Offline,
            metrics: NodeMetrics::default(),
            last_sync_at: None,
            is_active,
            created_at: now,
            updated_at: now,
        }
    }

    #[rstest]
    #[case(0, 10, 0)]
    #[case(5, 10, 50)]
    #[case(1, 3, 33)]
    #[case(2, 3, 67)]
    #[case(10, 10, 100)]
    #[case(15, 10, 100)]
    #[case(3, 0, 100)]
    fn test_compute_load(#[case] active: u32, #[case] capacity: u32, #[case] expected: u8) {
        assert_eq!(compute_load(active, capacity), expected);
    }

    #[test]
    fn test_prefers_least_loaded_below_threshold() {
        let nodes = vec![node("A", 50, true), node("A", 30, true), node("A", 95, true)];
        assert_eq!(best_node(&nodes, 90).unwrap().load_percent, 30);
    }

    #[test]
    fn test_saturated_fleet_refuses() {
        let nodes = vec![node("A", 97, true), node("A", 92, true)];
        assert!(best_node(&nodes, 90).is_none());
    }

    #[test]
    fn test_saturated_location_falls_back() {
        let nodes = vec![node("A", 97, true), node("A", 92, true), node("B", 10, true)];
        assert_eq!(best_node_in_location(&nodes, "A", 90).unwrap().load_percent, 92);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let nodes = vec![node("A", 90, true), node("A", 89, true)];
        assert_eq!(best_node(&nodes, 90).unwrap().load_percent, 89);
        assert!(best_node(&nodes[..1], 90).is_none());
    }

    #[test]
    fn test_inactive_nodes_never_picked() {
        let nodes = vec![node("A", 0, false), node("A", 80, true)];
        assert_eq!(best_node(&nodes, 90).unwrap().load_percent, 80);

        let nodes = vec![node("A", 0, false)];
        assert!(best_node(&nodes, 90).is_none());
        assert!(best_node(&[], 90).is_none());
    }

    #[test]
    fn test_status_is_not_consulted() {
        let mut offline = node("A", 10, true);
        offline.status = NodeStatus::Error;
        let nodes = vec![offline, node("A", 20, true)];
        assert_eq!(best_node(&nodes, 90).unwrap().load_percent, 10);
    }

    #[test]
    fn test_ties_break_on_id() {
        let a = node("A", 40, true);
        let b = node("A", 40, true);
        let expected = a.id.min(b.id);
        let nodes = vec![a, b];
        assert_eq!(best_node(&nodes, 90).unwrap().id, expected);
    }

    #[test]
    fn test_location_filter() {
        let nodes = vec![
            node("Frankfurt", 10, true),
            node("Amsterdam", 60, true),
            node("amsterdam ", 40, true),
            node("Amsterdam", 0, false),
        ];

        let picked = best_node_in_location(&nodes, "AMSTERDAM", 90).unwrap();
        assert_eq!(picked.load_percent, 40);
        assert!(best_node_in_location(&nodes, "Paris", 90).is_none());
    }
}
