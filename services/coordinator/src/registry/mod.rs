//! Node registry.
//!
//! The registry is the only writer of [`NodeRecord`]s. Admin edits, monitor
//! outcomes and load recomputation all go through it, and every
//! read-modify-write runs under the node's [`NodeLocks`] entry with the
//! record re-read inside the lock.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use vpnfleet_id::NodeId;

use crate::db::{AccountRepository, Repository, StoreError, Stores};
use crate::locks::NodeLocks;
use crate::model::{NodeMetrics, NodeRecord, NodeStatus};
use crate::placement::compute_load;

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid node: {0}")]
    Invalid(String),

    #[error("node {0} not found")]
    NotFound(NodeId),

    /// Accounts still reference the node.
    #[error("node {node_id} still hosts {accounts} account(s)")]
    InUse { node_id: NodeId, accounts: usize },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Input for registering a node.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewNode {
    pub name: String,
    pub location: String,
    #[serde(default)]
    pub country: String,
    pub host: String,
    pub port: u16,
    pub panel_url: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default)]
    pub inbound_id: Option<i64>,
    pub capacity: u32,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_protocol() -> String {
    "vless".to_string()
}

fn default_active() -> bool {
    true
}

/// Dashboard view of a single node.
#[derive(Debug, Clone, Serialize)]
pub struct NodeStats {
    pub node_id: NodeId,
    pub name: String,
    pub location: String,
    pub status: NodeStatus,
    pub is_active: bool,
    pub capacity: u32,
    pub load_percent: u8,
    pub active_accounts: u32,
    pub total_accounts: usize,
    pub metrics: NodeMetrics,
    pub last_sync_at: Option<DateTime<Utc>>,
    /// No successful contact within the staleness window.
    pub stale: bool,
}

pub struct NodeRegistry {
    nodes: Arc<dyn Repository<NodeRecord>>,
    accounts: Arc<dyn AccountRepository>,
    locks: NodeLocks,
}

impl NodeRegistry {
    pub fn new(stores: &Stores) -> Self {
        Self {
            nodes: stores.nodes.clone(),
            accounts: stores.accounts.clone(),
            locks: NodeLocks::new(),
        }
    }

    /// Register a node. It starts OFFLINE until probed, with no accounts.
    ///
    /// A zero capacity is allowed and reads as fully loaded.
    pub async fn create(&self, new: NewNode) -> RegistryResult<NodeRecord> {
        validate_connection(&new.name, &new.location, &new.host, new.port, &new.panel_url)?;

        let now = Utc::now();
        let node = NodeRecord {
            id: NodeId::new(),
            name: new.name.trim().to_string(),
            location: new.location.trim().to_string(),
            country: new.country,
            host: new.host.trim().to_string(),
            port: new.port,
            panel_url: new.panel_url.trim().to_string(),
            username: new.username,
            password: new.password,
            protocol: new.protocol,
            inbound_id: new.inbound_id,
            capacity: new.capacity,
            load_percent: compute_load(0, new.capacity),
            status: NodeStatus::Offline,
            metrics: NodeMetrics::default(),
            last_sync_at: None,
            is_active: new.is_active,
            created_at: now,
            updated_at: now,
        };
        self.nodes.insert(&node).await?;

        info!(node_id = %node.id, name = %node.name, location = %node.location, "Node registered");
        Ok(node)
    }

    pub async fn get(&self, id: NodeId) -> RegistryResult<Option<NodeRecord>> {
        Ok(self.nodes.get(id).await?)
    }

    /// Like [`NodeRegistry::get`], but absence is an error.
    pub async fn require(&self, id: NodeId) -> RegistryResult<NodeRecord> {
        self.get(id).await?.ok_or(RegistryError::NotFound(id))
    }

    /// Every node in registration order.
    pub async fn list_all(&self) -> RegistryResult<Vec<NodeRecord>> {
        Ok(self.nodes.list().await?)
    }

    /// Nodes with the administrative enable flag set.
    pub async fn list_active(&self) -> RegistryResult<Vec<NodeRecord>> {
        let mut nodes = self.list_all().await?;
        nodes.retain(|n| n.is_active);
        Ok(nodes)
    }

    pub async fn find_by_name(&self, name: &str) -> RegistryResult<Option<NodeRecord>> {
        Ok(self.list_all().await?.into_iter().find(|n| n.name == name))
    }

    /// Persist an edited record. Returns false when the node no longer exists.
    ///
    /// Load is rederived so a capacity edit takes effect immediately.
    pub async fn update(&self, node: &NodeRecord) -> RegistryResult<bool> {
        validate_connection(&node.name, &node.location, &node.host, node.port, &node.panel_url)?;

        let _guard = self.locks.lock(node.id).await;
        let active = self.accounts.count_active_on_node(node.id).await?;
        let mut node = node.clone();
        node.load_percent = compute_load(active, node.capacity);
        node.updated_at = Utc::now();
        Ok(self.nodes.update(&node).await?)
    }

    /// Apply `f` to the freshly read record under the node lock and persist it.
    ///
    /// Returns the stored record, or `None` if the node is gone.
    pub async fn modify<F>(&self, id: NodeId, f: F) -> RegistryResult<Option<NodeRecord>>
    where
        F: FnOnce(&mut NodeRecord) + Send,
    {
        let _guard = self.locks.lock(id).await;
        let Some(mut node) = self.nodes.get(id).await? else {
            return Ok(None);
        };
        f(&mut node);
        node.updated_at = Utc::now();
        if !self.nodes.update(&node).await? {
            return Ok(None);
        }
        Ok(Some(node))
    }

    /// Remove a node. Fails while any account still references it.
    pub async fn delete(&self, id: NodeId) -> RegistryResult<()> {
        let guard = self.locks.lock(id).await;

        let accounts = self.accounts.list_by_node(id).await?.len();
        if accounts > 0 {
            return Err(RegistryError::InUse {
                node_id: id,
                accounts,
            });
        }

        match self.nodes.delete(id).await {
            Ok(true) => {}
            Ok(false) => return Err(RegistryError::NotFound(id)),
            Err(StoreError::Referenced { .. }) => {
                // An account landed between the check and the delete.
                let accounts = self.accounts.list_by_node(id).await?.len();
                return Err(RegistryError::InUse {
                    node_id: id,
                    accounts,
                });
            }
            Err(e) => return Err(e.into()),
        }

        drop(guard);
        self.locks.forget(id);
        info!(node_id = %id, "Node deleted");
        Ok(())
    }

    /// Recompute and persist the node's load from its active accounts.
    pub async fn recompute_load(&self, id: NodeId) -> RegistryResult<Option<u8>> {
        let _guard = self.locks.lock(id).await;
        let Some(mut node) = self.nodes.get(id).await? else {
            return Ok(None);
        };

        let active = self.accounts.count_active_on_node(id).await?;
        let load = compute_load(active, node.capacity);
        if load != node.load_percent {
            debug!(node_id = %id, active, capacity = node.capacity, load, "Node load changed");
            node.load_percent = load;
            node.updated_at = Utc::now();
            self.nodes.update(&node).await?;
        }
        Ok(Some(load))
    }

    /// Read-only dashboard view. `stale_after` is the staleness window.
    pub async fn stats(&self, id: NodeId, stale_after: Duration) -> RegistryResult<NodeStats> {
        let node = self.require(id).await?;
        let accounts = self.accounts.list_by_node(id).await?;
        let active_accounts = accounts
            .iter()
            .filter(|a| a.status == crate::model::AccountStatus::Active)
            .count();

        Ok(NodeStats {
            node_id: node.id,
            stale: node.is_stale(Utc::now(), stale_after),
            name: node.name,
            location: node.location,
            status: node.status,
            is_active: node.is_active,
            capacity: node.capacity,
            load_percent: node.load_percent,
            active_accounts: u32::try_from(active_accounts).unwrap_or(u32::MAX),
            total_accounts: accounts.len(),
            metrics: node.metrics,
            last_sync_at: node.last_sync_at,
        })
    }

}

fn validate_connection(
    name: &str,
    location: &str,
    host: &str,
    port: u16,
    panel_url: &str,
) -> RegistryResult<()> {
    for (field, value) in [("name", name), ("location", location), ("host", host)] {
        if value.trim().is_empty() {
            return Err(RegistryError::Invalid(format!("{field} must not be empty")));
        }
    }
    if port == 0 {
        return Err(RegistryError::Invalid("port must be within 1..=65535".to_string()));
    }

    let url = panel_url.trim();
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| RegistryError::Invalid(format!("panel url must be http(s): {url}")))?;
    if rest.split('/').next().is_none_or(str::is_empty) {
        return Err(RegistryError::Invalid(format!("panel url has no host: {url}")));
    }
    Ok(())
}
