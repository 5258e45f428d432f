//! Account lifecycle against the fake panel.

mod common;

use chrono::{Duration, Utc};
use common::{harness, panel_url, INBOUND, MONTH};
use vpnfleet_coordinator::db::{AccountRepository, Repository};
use vpnfleet_coordinator::model::AccountStatus;
use vpnfleet_coordinator::provisioner::{CreateAccount, ProvisionError};
use vpnfleet_id::{AccountId, PlanId, UserId};
use vpnfleet_panel::{ClientTraffic, PanelOp};

const USER: UserId = UserId::new(1001);

async fn status(h: &common::Harness, id: AccountId) -> AccountStatus {
    h.stores.accounts.get(id).await.unwrap().unwrap().status
}

#[tokio::test]
async fn test_create_provisions_remote_client() {
    let h = harness();
    let node = h.add_node("fra-1", "Frankfurt", 10).await;
    let provisioner = h.coordinator.provisioner();

    let account = provisioner.create(USER, node.id, MONTH).await.unwrap();

    assert_eq!(account.status, AccountStatus::Active);
    assert_eq!(account.node_id, node.id);
    assert_eq!(account.traffic_limit, 100 << 30);
    let days = (account.expires_at - account.starts_at).num_days();
    assert_eq!(days, 30);

    let clients = h.panel.clients(&panel_url("fra-1"), INBOUND);
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0].uuid, account.uuid);
    assert_eq!(clients[0].email, account.email);
    assert!(clients[0].enabled);

    let stored = h.stores.accounts.get(account.id).await.unwrap().unwrap();
    assert_eq!(stored.status, AccountStatus::Active);
    assert_eq!(h.node(&node).await.load_percent, 10);
}

#[tokio::test]
async fn test_create_with_overrides() {
    let h = harness();
    let node = h.add_node("fra-1", "Frankfurt", 10).await;

    let mut request = CreateAccount::new(USER, node.id, MONTH);
    request.traffic_limit_bytes = Some(0);
    request.duration_days = Some(7);
    let account = h
        .coordinator
        .provisioner()
        .create_with(request)
        .await
        .unwrap();

    assert_eq!(account.traffic_limit, 0);
    assert_eq!((account.expires_at - account.starts_at).num_days(), 7);
}

#[tokio::test]
async fn test_create_remote_failure_flags_error() {
    let h = harness();
    let node = h.add_node("fra-1", "Frankfurt", 10).await;
    h.panel.fail(&panel_url("fra-1"), PanelOp::AddClient);

    let err = h
        .coordinator
        .provisioner()
        .create(USER, node.id, MONTH)
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::Remote { op: "add_client", .. }));
    let accounts = h.stores.accounts.list_by_node(node.id).await.unwrap();
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].status, AccountStatus::Error);
    assert_eq!(h.node(&node).await.load_percent, 0);
}

#[tokio::test]
async fn test_create_unreachable_panel_never_active() {
    let h = harness();
    let node = h.add_node("fra-1", "Frankfurt", 10).await;
    h.panel.set_reachable(&panel_url("fra-1"), false);

    let err = h
        .coordinator
        .provisioner()
        .create(USER, node.id, MONTH)
        .await
        .unwrap_err();

    assert!(err.is_remote());
    let accounts = h.stores.accounts.list().await.unwrap();
    assert!(accounts.iter().all(|a| a.status == AccountStatus::Error));
}

#[tokio::test]
async fn test_remote_deadline_reported_in_millis() {
    let h = harness();
    let node = h.add_node("fra-1", "Frankfurt", 10).await;
    h.panel.set_delay(
        &panel_url("fra-1"),
        PanelOp::AddClient,
        std::time::Duration::from_millis(1_200),
    );

    let err = h
        .coordinator
        .provisioner()
        .create(USER, node.id, MONTH)
        .await
        .unwrap_err();

    match err {
        ProvisionError::Remote { source, .. } => {
            assert!(source.is_unreachable());
            assert_eq!(source.to_string(), "panel unreachable: no answer within 1000ms");
        }
        other => panic!("expected a remote error, got {other}"),
    }
}

#[tokio::test]
async fn test_create_rejects_unknown_inputs() {
    let h = harness();
    let node = h.add_node("fra-1", "Frankfurt", 10).await;
    let provisioner = h.coordinator.provisioner();

    let err = provisioner
        .create(USER, node.id, PlanId::new(99))
        .await
        .unwrap_err();
    assert!(matches!(err, ProvisionError::UnknownPlan(_)));

    let err = provisioner
        .create(USER, vpnfleet_id::NodeId::new(), MONTH)
        .await
        .unwrap_err();
    assert!(matches!(err, ProvisionError::UnknownNode(_)));

    let mut bare = common::new_node("ams-1", "Amsterdam", 10);
    bare.inbound_id = None;
    let bare = h.coordinator.registry().create(bare).await.unwrap();
    let err = provisioner.create(USER, bare.id, MONTH).await.unwrap_err();
    assert!(matches!(err, ProvisionError::NodeNotProvisioned(_)));

    assert!(h.stores.accounts.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_renew_extends_from_current_expiry() {
    let h = harness();
    let node = h.add_node("fra-1", "Frankfurt", 10).await;
    let provisioner = h.coordinator.provisioner();
    let account = provisioner.create(USER, node.id, MONTH).await.unwrap();

    let renewed = provisioner.renew(account.id, 10).await.unwrap();

    assert_eq!(renewed.expires_at, account.expires_at + Duration::days(10));
    let remote = &h.panel.clients(&panel_url("fra-1"), INBOUND)[0];
    assert_eq!(remote.expiry_epoch_millis, renewed.expires_at.timestamp_millis());
}

#[tokio::test]
async fn test_renew_expired_restarts_from_now() {
    let h = harness();
    let node = h.add_node("fra-1", "Frankfurt", 10).await;
    let provisioner = h.coordinator.provisioner();
    let mut account = provisioner.create(USER, node.id, MONTH).await.unwrap();

    account.expires_at = Utc::now() - Duration::days(3);
    account.status = AccountStatus::Expired;
    h.stores.accounts.update(&account).await.unwrap();

    let before = Utc::now();
    let renewed = provisioner.renew(account.id, 30).await.unwrap();

    assert_eq!(renewed.status, AccountStatus::Active);
    assert!(renewed.expires_at >= before + Duration::days(30));
    assert!(renewed.expires_at <= Utc::now() + Duration::days(30));
}

#[tokio::test]
async fn test_renew_remote_failure_keeps_local_change() {
    let h = harness();
    let node = h.add_node("fra-1", "Frankfurt", 10).await;
    let provisioner = h.coordinator.provisioner();
    let account = provisioner.create(USER, node.id, MONTH).await.unwrap();
    h.panel.fail(&panel_url("fra-1"), PanelOp::UpdateClient);

    let err = provisioner.renew(account.id, 5).await.unwrap_err();

    assert!(matches!(err, ProvisionError::Remote { op: "update_client", .. }));
    let stored = h.stores.accounts.get(account.id).await.unwrap().unwrap();
    assert_eq!(stored.expires_at, account.expires_at + Duration::days(5));
}

#[tokio::test]
async fn test_delete_removes_remote_then_local() {
    let h = harness();
    let node = h.add_node("fra-1", "Frankfurt", 10).await;
    let provisioner = h.coordinator.provisioner();
    let account = provisioner.create(USER, node.id, MONTH).await.unwrap();

    provisioner.delete(account.id).await.unwrap();

    assert!(h.stores.accounts.get(account.id).await.unwrap().is_none());
    assert!(!h.panel.has_client(&panel_url("fra-1"), INBOUND, &account.email));
    assert_eq!(h.node(&node).await.load_percent, 0);
}

#[tokio::test]
async fn test_delete_remote_failure_keeps_local_row() {
    let h = harness();
    let node = h.add_node("fra-1", "Frankfurt", 10).await;
    let provisioner = h.coordinator.provisioner();
    let account = provisioner.create(USER, node.id, MONTH).await.unwrap();
    h.panel.fail(&panel_url("fra-1"), PanelOp::DeleteClient);

    let err = provisioner.delete(account.id).await.unwrap_err();

    assert!(err.is_remote());
    let stored = h.stores.accounts.get(account.id).await.unwrap().unwrap();
    assert_eq!(stored, account);
    assert_eq!(h.node(&node).await.load_percent, 10);
}

#[tokio::test]
async fn test_forget_skips_panel() {
    let h = harness();
    let node = h.add_node("fra-1", "Frankfurt", 10).await;
    h.panel.fail(&panel_url("fra-1"), PanelOp::AddClient);
    let provisioner = h.coordinator.provisioner();
    provisioner.create(USER, node.id, MONTH).await.unwrap_err();
    let stuck = h.stores.accounts.list().await.unwrap().remove(0);

    provisioner.forget(stuck.id).await.unwrap();

    assert!(h.stores.accounts.get(stuck.id).await.unwrap().is_none());
    assert_eq!(h.panel.count(&panel_url("fra-1"), PanelOp::DeleteClient), 0);
    h.coordinator.registry().delete(node.id).await.unwrap();
}

#[tokio::test]
async fn test_relocate_moves_credential() {
    let h = harness();
    let from = h.add_node("fra-1", "Frankfurt", 10).await;
    let to = h.add_node("ams-1", "Amsterdam", 10).await;
    let provisioner = h.coordinator.provisioner();
    let account = provisioner.create(USER, from.id, MONTH).await.unwrap();

    let moved = provisioner.relocate(account.id, to.id).await.unwrap();

    assert_eq!(moved.node_id, to.id);
    assert_eq!(moved.uuid, account.uuid);
    assert!(!h.panel.has_client(&panel_url("fra-1"), INBOUND, &account.email));
    assert!(h.panel.has_client(&panel_url("ams-1"), INBOUND, &account.email));
    assert_eq!(h.node(&from).await.load_percent, 0);
    assert_eq!(h.node(&to).await.load_percent, 10);
}

#[tokio::test]
async fn test_relocate_to_same_node_is_noop() {
    let h = harness();
    let node = h.add_node("fra-1", "Frankfurt", 10).await;
    let provisioner = h.coordinator.provisioner();
    let account = provisioner.create(USER, node.id, MONTH).await.unwrap();

    let same = provisioner.relocate(account.id, node.id).await.unwrap();

    assert_eq!(same, account);
    assert_eq!(h.panel.count(&panel_url("fra-1"), PanelOp::DeleteClient), 0);
}

#[tokio::test]
async fn test_relocate_old_delete_failure_changes_nothing() {
    let h = harness();
    let from = h.add_node("fra-1", "Frankfurt", 10).await;
    let to = h.add_node("ams-1", "Amsterdam", 10).await;
    let provisioner = h.coordinator.provisioner();
    let account = provisioner.create(USER, from.id, MONTH).await.unwrap();
    h.panel.fail(&panel_url("fra-1"), PanelOp::DeleteClient);

    provisioner.relocate(account.id, to.id).await.unwrap_err();

    let stored = h.stores.accounts.get(account.id).await.unwrap().unwrap();
    assert_eq!(stored.node_id, from.id);
    assert_eq!(stored.status, AccountStatus::Active);
    assert_eq!(h.panel.count(&panel_url("ams-1"), PanelOp::AddClient), 0);
}

/// Old-node delete succeeds, new-node create fails: the record points back
/// at the old node and is flagged, although neither node has the client.
#[tokio::test]
async fn test_relocate_new_create_failure_reverts_node() {
    let h = harness();
    let from = h.add_node("fra-1", "Frankfurt", 10).await;
    let to = h.add_node("ams-1", "Amsterdam", 10).await;
    let provisioner = h.coordinator.provisioner();
    let account = provisioner.create(USER, from.id, MONTH).await.unwrap();
    h.panel.fail(&panel_url("ams-1"), PanelOp::AddClient);

    let err = provisioner.relocate(account.id, to.id).await.unwrap_err();

    assert!(matches!(err, ProvisionError::Remote { op: "add_client", node_id, .. } if node_id == to.id));
    let stored = h.stores.accounts.get(account.id).await.unwrap().unwrap();
    assert_eq!(stored.node_id, from.id);
    assert_eq!(stored.status, AccountStatus::Error);
    assert!(!h.panel.has_client(&panel_url("fra-1"), INBOUND, &account.email));
    assert!(!h.panel.has_client(&panel_url("ams-1"), INBOUND, &account.email));
    assert_eq!(h.node(&from).await.load_percent, 0);
}

#[tokio::test]
async fn test_suspend_and_activate_toggle_remote_client() {
    let h = harness();
    let node = h.add_node("fra-1", "Frankfurt", 10).await;
    let provisioner = h.coordinator.provisioner();
    let account = provisioner.create(USER, node.id, MONTH).await.unwrap();

    let suspended = provisioner.suspend(account.id).await.unwrap();
    assert_eq!(suspended.status, AccountStatus::Suspended);
    assert!(!h.panel.clients(&panel_url("fra-1"), INBOUND)[0].enabled);
    assert_eq!(h.node(&node).await.load_percent, 0);

    let active = provisioner.activate(account.id).await.unwrap();
    assert_eq!(active.status, AccountStatus::Active);
    assert!(h.panel.clients(&panel_url("fra-1"), INBOUND)[0].enabled);
    assert_eq!(h.node(&node).await.load_percent, 10);
}

#[tokio::test]
async fn test_traffic_refresh_and_reset() {
    let h = harness();
    let node = h.add_node("fra-1", "Frankfurt", 10).await;
    let provisioner = h.coordinator.provisioner();
    let account = provisioner.create(USER, node.id, MONTH).await.unwrap();
    let url = panel_url("fra-1");

    h.panel
        .set_traffic(&url, INBOUND, &account.email, ClientTraffic { up: 300, down: 700 });
    let refreshed = provisioner.refresh_traffic(account.id).await.unwrap();
    assert_eq!(refreshed.traffic_used, 1_000);

    // Counters that go backwards do not lower the local value.
    h.panel
        .set_traffic(&url, INBOUND, &account.email, ClientTraffic { up: 1, down: 1 });
    let refreshed = provisioner.refresh_traffic(account.id).await.unwrap();
    assert_eq!(refreshed.traffic_used, 1_000);

    let reset = provisioner.reset_traffic(account.id).await.unwrap();
    assert_eq!(reset.traffic_used, 0);
    assert_eq!(h.panel.count(&url, PanelOp::ResetTraffic), 1);
}

#[tokio::test]
async fn test_suspend_during_traffic_refresh_is_kept() {
    let h = harness();
    let node = h.add_node("fra-1", "Frankfurt", 10).await;
    let provisioner = h.coordinator.provisioner();
    let account = provisioner.create(USER, node.id, MONTH).await.unwrap();
    let url = panel_url("fra-1");
    h.panel
        .set_traffic(&url, INBOUND, &account.email, ClientTraffic { up: 4, down: 6 });
    h.panel
        .set_delay(&url, PanelOp::ClientTraffic, std::time::Duration::from_millis(200));

    let refresh = {
        let provisioner = provisioner.clone();
        let id = account.id;
        tokio::spawn(async move { provisioner.refresh_traffic(id).await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let suspended = provisioner.suspend(account.id).await.unwrap();
    refresh.await.unwrap().unwrap();

    assert_eq!(suspended.traffic_used, 10);
    let stored = h.stores.accounts.get(account.id).await.unwrap().unwrap();
    assert_eq!(stored.status, AccountStatus::Suspended);
    assert_eq!(stored.traffic_used, 10);
    assert!(!h.panel.clients(&url, INBOUND)[0].enabled);
    assert_eq!(h.node(&node).await.load_percent, 0);
}

#[tokio::test]
async fn test_check_expired_accounts() {
    let h = harness();
    let node = h.add_node("fra-1", "Frankfurt", 10).await;
    let provisioner = h.coordinator.provisioner();
    let lapsed = provisioner.create(USER, node.id, MONTH).await.unwrap();
    let current = provisioner.create(USER, node.id, MONTH).await.unwrap();
    assert_eq!(h.node(&node).await.load_percent, 20);

    let mut record = h.stores.accounts.get(lapsed.id).await.unwrap().unwrap();
    record.expires_at = Utc::now() - Duration::minutes(1);
    h.stores.accounts.update(&record).await.unwrap();

    let flipped = provisioner.check_expired_accounts(Utc::now()).await.unwrap();

    assert_eq!(flipped, vec![lapsed.id]);
    assert_eq!(status(&h, lapsed.id).await, AccountStatus::Expired);
    assert_eq!(status(&h, current.id).await, AccountStatus::Active);
    assert_eq!(h.node(&node).await.load_percent, 10);
    assert_eq!(h.panel.count(&panel_url("fra-1"), PanelOp::UpdateClient), 0);

    assert!(provisioner
        .check_expired_accounts(Utc::now())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_node_with_accounts_cannot_be_deleted() {
    let h = harness();
    let node = h.add_node("fra-1", "Frankfurt", 10).await;
    let account = h
        .coordinator
        .provisioner()
        .create(USER, node.id, MONTH)
        .await
        .unwrap();

    let err = h.coordinator.registry().delete(node.id).await.unwrap_err();
    assert!(err.to_string().contains("1 account"));

    h.coordinator.provisioner().delete(account.id).await.unwrap();
    h.coordinator.registry().delete(node.id).await.unwrap();
}
