//! Placement over loads produced by real provisioning.

mod common;

use common::{harness, Harness, MONTH};
use vpnfleet_coordinator::model::NodeRecord;
use vpnfleet_id::UserId;

async fn fill(h: &Harness, node: &NodeRecord, accounts: u64) {
    for user in 0..accounts {
        h.coordinator
            .provisioner()
            .create(UserId::new(user as i64 + 1), node.id, MONTH)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_prefers_node_under_threshold() {
    let h = harness();
    let busy = h.add_node("fra-1", "Frankfurt", 10).await;
    let quiet = h.add_node("fra-2", "Frankfurt", 10).await;
    fill(&h, &busy, 9).await;
    fill(&h, &quiet, 2).await;

    assert_eq!(h.node(&busy).await.load_percent, 90);
    assert_eq!(h.node(&quiet).await.load_percent, 20);

    let chosen = h.coordinator.placement().best_node().await.unwrap().unwrap();
    assert_eq!(chosen.id, quiet.id);
}

#[tokio::test]
async fn test_overloaded_fleet_refuses_but_location_falls_back() {
    let h = harness();
    let full = h.add_node("fra-1", "Frankfurt", 2).await;
    let fuller = h.add_node("fra-2", "Frankfurt", 1).await;
    fill(&h, &full, 2).await;
    fill(&h, &fuller, 2).await;

    // Capacity does not block provisioning; load is capped at 100.
    assert_eq!(h.node(&full).await.load_percent, 100);
    assert_eq!(h.node(&fuller).await.load_percent, 100);

    let placement = h.coordinator.placement();
    assert!(placement.best_node().await.unwrap().is_none());

    let chosen = placement
        .best_node_in_location("Frankfurt")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(chosen.id, std::cmp::min(full.id, fuller.id));
}

#[tokio::test]
async fn test_location_filter() {
    let h = harness();
    let fra = h.add_node("fra-1", "Frankfurt", 10).await;
    let ams = h.add_node("ams-1", "Amsterdam", 10).await;
    fill(&h, &fra, 5).await;

    let placement = h.coordinator.placement();
    let chosen = placement
        .best_node_in_location("frankfurt")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(chosen.id, fra.id);
    assert!(placement
        .best_node_in_location("Tokyo")
        .await
        .unwrap()
        .is_none());

    let anywhere = placement.best_node().await.unwrap().unwrap();
    assert_eq!(anywhere.id, ams.id);
}

#[tokio::test]
async fn test_zero_capacity_node_is_never_chosen() {
    let h = harness();
    let drained = h.add_node("fra-1", "Frankfurt", 0).await;
    assert_eq!(h.node(&drained).await.load_percent, 100);

    let placement = h.coordinator.placement();
    assert!(placement.best_node().await.unwrap().is_none());

    let open = h.add_node("fra-2", "Frankfurt", 10).await;
    fill(&h, &open, 7).await;
    let chosen = placement.best_node().await.unwrap().unwrap();
    assert_eq!(chosen.id, open.id);
}

#[tokio::test]
async fn test_inactive_nodes_are_never_chosen() {
    let h = harness();
    let node = h.add_node("fra-1", "Frankfurt", 10).await;
    h.coordinator
        .registry()
        .modify(node.id, |n| n.is_active = false)
        .await
        .unwrap();

    assert!(h.coordinator.placement().best_node().await.unwrap().is_none());
}
