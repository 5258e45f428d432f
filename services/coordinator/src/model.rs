//! Records owned by the coordinator: gateway nodes and the accounts on them.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use vpnfleet_id::{AccountId, NodeId, PlanId, UserId};
use vpnfleet_panel::{ClientKey, ClientSpec, PanelEndpoint, ServerStats};

// =============================================================================
// Node
// =============================================================================

/// Lifecycle status of a node as last observed by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    Offline,
    Online,
    Maintenance,
    Error,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Online => "online",
            Self::Maintenance => "maintenance",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "offline" => Ok(Self::Offline),
            "online" => Ok(Self::Online),
            "maintenance" => Ok(Self::Maintenance),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown node status '{other}'")),
        }
    }
}

/// Latest statistics snapshot reported by a node's panel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub traffic_up: u64,
    pub traffic_down: u64,
    pub cpu_percent: f64,
    pub mem_used: u64,
    pub mem_total: u64,
    pub disk_used: u64,
    pub disk_total: u64,
    pub uptime_secs: u64,
}

impl From<ServerStats> for NodeMetrics {
    fn from(stats: ServerStats) -> Self {
        Self {
            traffic_up: stats.traffic_up,
            traffic_down: stats.traffic_down,
            cpu_percent: stats.cpu_percent,
            mem_used: stats.mem_used,
            mem_total: stats.mem_total,
            disk_used: stats.disk_used,
            disk_total: stats.disk_total,
            uptime_secs: stats.uptime_secs,
        }
    }
}

/// A registered gateway node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub name: String,
    /// Region label used for placement, e.g. "Frankfurt".
    pub location: String,
    pub country: String,
    pub host: String,
    pub port: u16,
    pub panel_url: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    /// Proxy protocol served by the node's inbound, e.g. "vless".
    pub protocol: String,
    /// Panel inbound that client credentials are attached to.
    pub inbound_id: Option<i64>,
    /// Maximum number of active accounts.
    pub capacity: u32,
    /// Active accounts as a percentage of capacity.
    pub load_percent: u8,
    pub status: NodeStatus,
    pub metrics: NodeMetrics,
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Administrative enable flag. Inactive nodes are never picked.
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NodeRecord {
    pub fn endpoint(&self) -> PanelEndpoint {
        PanelEndpoint::new(&self.panel_url, &self.username, &self.password)
    }

    /// True when no successful contact has been recorded within `max_age`.
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        match self.last_sync_at {
            Some(at) => now.signed_duration_since(at) > max_age,
            None => true,
        }
    }
}

// =============================================================================
// Account
// =============================================================================

/// Lifecycle status of a provisioned account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    /// Stored locally, remote credential not yet confirmed.
    #[default]
    Pending,
    Active,
    Expired,
    Suspended,
    /// Local and remote state are known to disagree.
    Error,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Suspended => "suspended",
            Self::Error => "error",
        }
    }

    /// Whether the remote credential should accept connections.
    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Pending | Self::Active)
    }
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "expired" => Ok(Self::Expired),
            "suspended" => Ok(Self::Suspended),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown account status '{other}'")),
        }
    }
}

/// A client credential the coordinator provisioned on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountRecord {
    pub id: AccountId,
    pub user_id: UserId,
    pub node_id: NodeId,
    pub plan_id: PlanId,
    /// Credential UUID presented by the VPN client.
    pub uuid: Uuid,
    /// Unique label the panel indexes clients by.
    pub email: String,
    pub traffic_used: u64,
    /// Quota in bytes; 0 means unlimited.
    pub traffic_limit: u64,
    pub starts_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AccountRecord {
    /// Derive the remote credential label for an account.
    pub fn derive_email(user_id: UserId, account_id: AccountId) -> String {
        format!("u{}-{}", user_id, account_id.short())
    }

    pub fn client_key(&self) -> ClientKey {
        ClientKey {
            uuid: self.uuid,
            email: self.email.clone(),
        }
    }

    /// Remote client definition mirroring this record.
    pub fn client_spec(&self) -> ClientSpec {
        ClientSpec {
            uuid: self.uuid,
            email: self.email.clone(),
            traffic_limit_bytes: self.traffic_limit,
            expiry_epoch_millis: self.expires_at.timestamp_millis(),
            enabled: self.status.is_enabled(),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
