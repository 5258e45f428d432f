//! Request and response types for the panel API.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a panel lives and how to log in to it.
#[derive(Clone)]
pub struct PanelEndpoint {
    /// Base URL of the panel, without trailing slash.
    pub base_url: String,
    pub username: String,
    pub password: String,
}

impl PanelEndpoint {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for PanelEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PanelEndpoint")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// An authenticated panel session.
#[derive(Debug, Clone)]
pub struct PanelSession {
    pub base_url: String,
    /// `Cookie` header value returned by the login call.
    pub cookie: String,
}

/// Outcome of a liveness probe that reached the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HealthReport {
    pub maintenance: bool,
}

/// Host statistics reported by a panel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerStats {
    pub traffic_up: u64,
    pub traffic_down: u64,
    pub cpu_percent: f64,
    pub mem_used: u64,
    pub mem_total: u64,
    pub disk_used: u64,
    pub disk_total: u64,
    pub uptime_secs: u64,
}

/// Identity of a client under an inbound.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey {
    pub uuid: Uuid,
    pub email: String,
}

/// Full client definition pushed on add and update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSpec {
    pub uuid: Uuid,
    pub email: String,
    /// Traffic quota in bytes; 0 means unlimited.
    pub traffic_limit_bytes: u64,
    /// Expiry as Unix epoch milliseconds; 0 means never.
    pub expiry_epoch_millis: i64,
    pub enabled: bool,
}

impl ClientSpec {
    pub fn key(&self) -> ClientKey {
        ClientKey {
            uuid: self.uuid,
            email: self.email.clone(),
        }
    }
}

/// Per-client traffic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientTraffic {
    pub up: u64,
    pub down: u64,
}

impl ClientTraffic {
    pub fn total(&self) -> u64 {
        self.up.saturating_add(self.down)
    }
}

/// A client as listed by the panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteClient {
    pub uuid: Option<Uuid>,
    pub email: String,
    pub enabled: bool,
    pub traffic: ClientTraffic,
}

// =============================================================================
// Wire Types
// =============================================================================

/// Response envelope used by every panel endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    pub success: bool,
    #[serde(default)]
    pub msg: String,
    pub obj: Option<T>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UsedTotal {
    #[serde(default)]
    pub current: u64,
    #[serde(default)]
    pub total: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct NetTraffic {
    #[serde(default)]
    pub sent: u64,
    #[serde(default)]
    pub recv: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StatusObj {
    #[serde(default)]
    pub cpu: f64,
    pub mem: UsedTotal,
    pub disk: UsedTotal,
    #[serde(default)]
    pub uptime: u64,
    pub net_traffic: NetTraffic,
}

impl From<StatusObj> for ServerStats {
    fn from(obj: StatusObj) -> Self {
        Self {
            traffic_up: obj.net_traffic.sent,
            traffic_down: obj.net_traffic.recv,
            cpu_percent: obj.cpu,
            mem_used: obj.mem.current,
            mem_total: obj.mem.total,
            disk_used: obj.disk.current,
            disk_total: obj.disk.total,
            uptime_secs: obj.uptime,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct HealthObj {
    #[serde(default)]
    pub maintenance: bool,
}

/// Client entry inside an inbound's `settings` JSON string.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireClient {
    #[serde(default)]
    pub id: Option<String>,
    pub email: String,
    #[serde(default = "default_enable")]
    pub enable: bool,
    #[serde(rename = "totalGB", default)]
    pub total_bytes: u64,
    #[serde(default)]
    pub expiry_time: i64,
    #[serde(default)]
    pub limit_ip: u32,
    #[serde(default)]
    pub flow: String,
}

fn default_enable() -> bool {
    true
}

impl From<&ClientSpec> for WireClient {
    fn from(spec: &ClientSpec) -> Self {
        Self {
            id: Some(spec.uuid.to_string()),
            email: spec.email.clone(),
            enable: spec.enabled,
            total_bytes: spec.traffic_limit_bytes,
            expiry_time: spec.expiry_epoch_millis,
            limit_ip: 0,
            flow: String::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct WireSettings {
    pub clients: Vec<WireClient>,
}

/// Body of addClient / updateClient.
#[derive(Debug, Serialize)]
pub(crate) struct ClientRequest {
    pub id: i64,
    /// JSON-encoded [`WireSettings`]; the panel expects a string here.
    pub settings: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TrafficObj {
    #[serde(default)]
    pub up: u64,
    #[serde(default)]
    pub down: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ClientStatObj {
    pub email: String,
    #[serde(default)]
    pub up: u64,
    #[serde(default)]
    pub down: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InboundObj {
    pub settings: String,
    #[serde(default)]
    pub client_stats: Option<Vec<ClientStatObj>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_obj_maps_to_server_stats() {
        let json = r#"{
            "cpu": 12.5,
            "mem": {"current": 100, "total": 400},
            "disk": {"current": 10, "total": 90},
            "uptime": 3600,
            "netTraffic": {"sent": 7, "recv": 9}
        }"#;
        let obj: StatusObj = serde_json::from_str(json).unwrap();
        let stats = ServerStats::from(obj);
        assert_eq!(stats.traffic_up, 7);
        assert_eq!(stats.traffic_down, 9);
        assert_eq!(stats.mem_total, 400);
        assert_eq!(stats.uptime_secs, 3600);
    }

    #[test]
    fn test_wire_client_uses_panel_field_names() {
        let spec = ClientSpec {
            uuid: Uuid::nil(),
            email: "u1-abc".to_string(),
            traffic_limit_bytes: 1024,
            expiry_epoch_millis: 1_700_000_000_000,
            enabled: true,
        };
        let json = serde_json::to_value(WireClient::from(&spec)).unwrap();
        assert_eq!(json["totalGB"], 1024);
        assert_eq!(json["expiryTime"], 1_700_000_000_000_i64);
        assert_eq!(json["enable"], true);
        assert_eq!(json["id"], Uuid::nil().to_string());
    }

    #[test]
    fn test_endpoint_debug_redacts_password() {
        let endpoint = PanelEndpoint::new("http://panel:2053/", "admin", "hunter2");
        assert_eq!(endpoint.base_url, "http://panel:2053");
        let debug = format!("{endpoint:?}");
        assert!(!debug.contains("hunter2"));
    }
}
