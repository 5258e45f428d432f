//! Coordinator configuration.
//!
//! Values come from an optional TOML file named by `FLEET_CONFIG`, then
//! `FLEET_*` environment variables override individual fields. The loaded
//! configuration is published through a [`ConfigHandle`] so long-running
//! workers pick up reloads at their next cycle.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::db::DbConfig;
use crate::plans::Plan;
use crate::registry::NewNode;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    /// Use the in-process fake panel instead of real HTTP calls.
    pub dev_mode: bool,
    /// Bearer token required on `/v1` routes when set.
    pub api_token: Option<String>,
    /// Postgres settings. Without them the coordinator keeps state in memory.
    pub database: Option<DbConfig>,
    pub monitor: MonitorConfig,
    pub placement: PlacementConfig,
    pub accounts: AccountsConfig,
    pub reconcile: ReconcileConfig,
    pub plans: Vec<Plan>,
    /// Nodes registered at startup unless a node with the same name exists.
    pub nodes: Vec<NewNode>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            log_level: "info".to_string(),
            dev_mode: false,
            api_token: None,
            database: None,
            monitor: MonitorConfig::default(),
            placement: PlacementConfig::default(),
            accounts: AccountsConfig::default(),
            reconcile: ReconcileConfig::default(),
            plans: Vec::new(),
            nodes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub health_interval_secs: u64,
    pub probe_timeout_ms: u64,
    pub sync_interval_secs: u64,
    /// Deadline for authenticated panel calls, including login.
    pub remote_timeout_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            health_interval_secs: 60,
            probe_timeout_ms: 2_000,
            sync_interval_secs: 300,
            remote_timeout_secs: 10,
        }
    }
}

impl MonitorConfig {
    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }

    /// Age after which an ONLINE node without fresh contact is demoted.
    pub fn stale_after(&self) -> Duration {
        self.sync_interval() * 2
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    /// Load percentage at or above which a node is considered overloaded.
    pub overload_threshold: u8,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            overload_threshold: 90,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AccountsConfig {
    pub expiry_sweep_interval_secs: u64,
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            expiry_sweep_interval_secs: 60,
        }
    }
}

impl AccountsConfig {
    pub fn expiry_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.expiry_sweep_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Recreate missing remote clients instead of flagging the account.
    pub repair: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 900,
            repair: false,
        }
    }
}

impl ReconcileConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl CoordinatorConfig {
    /// Load from `FLEET_CONFIG` (if set) and the process environment.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("FLEET_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables only.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Override fields from `FLEET_*` variables resolved through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("FLEET_LISTEN_ADDR") {
            self.listen_addr = v.parse().context("FLEET_LISTEN_ADDR")?;
        }
        if let Some(v) = lookup("FLEET_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = lookup("FLEET_DEV") {
            self.dev_mode = parse_flag(&v);
        }
        if let Some(v) = lookup("FLEET_API_TOKEN") {
            self.api_token = (!v.is_empty()).then_some(v);
        }
        if let Some(url) = lookup("FLEET_DATABASE_URL") {
            self.database.get_or_insert_with(DbConfig::default).url = url;
        }
        if let Some(db) = self.database.as_mut() {
            parse_into(&lookup, "FLEET_DB_MAX_CONNECTIONS", &mut db.max_connections)?;
            parse_into(&lookup, "FLEET_DB_MIN_CONNECTIONS", &mut db.min_connections)?;
        }

        let monitor = &mut self.monitor;
        parse_into(&lookup, "FLEET_HEALTH_INTERVAL_SECS", &mut monitor.health_interval_secs)?;
        parse_into(&lookup, "FLEET_PROBE_TIMEOUT_MS", &mut monitor.probe_timeout_ms)?;
        parse_into(&lookup, "FLEET_SYNC_INTERVAL_SECS", &mut monitor.sync_interval_secs)?;
        parse_into(&lookup, "FLEET_REMOTE_TIMEOUT_SECS", &mut monitor.remote_timeout_secs)?;
        parse_into(
            &lookup,
            "FLEET_OVERLOAD_THRESHOLD",
            &mut self.placement.overload_threshold,
        )?;
        parse_into(
            &lookup,
            "FLEET_EXPIRY_SWEEP_INTERVAL_SECS",
            &mut self.accounts.expiry_sweep_interval_secs,
        )?;
        if let Some(v) = lookup("FLEET_RECONCILE_ENABLED") {
            self.reconcile.enabled = parse_flag(&v);
        }
        parse_into(
            &lookup,
            "FLEET_RECONCILE_INTERVAL_SECS",
            &mut self.reconcile.interval_secs,
        )?;
        if let Some(v) = lookup("FLEET_RECONCILE_REPAIR") {
            self.reconcile.repair = parse_flag(&v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let threshold = self.placement.overload_threshold;
        if threshold == 0 || threshold > 100 {
            bail!("overload threshold must be within 1..=100, got {threshold}");
        }
        for (name, value) in [
            ("health interval", self.monitor.health_interval_secs),
            ("probe timeout", self.monitor.probe_timeout_ms),
            ("sync interval", self.monitor.sync_interval_secs),
            ("remote timeout", self.monitor.remote_timeout_secs),
            ("expiry sweep interval", self.accounts.expiry_sweep_interval_secs),
            ("reconcile interval", self.reconcile.interval_secs),
        ] {
            if value == 0 {
                bail!("{name} must be greater than zero");
            }
        }
        if self.monitor.probe_timeout() >= self.monitor.health_interval() {
            bail!("probe timeout must be shorter than the health interval");
        }

        let mut seen = HashSet::new();
        for plan in &self.plans {
            if !seen.insert(plan.id) {
                bail!("duplicate plan id {}", plan.id);
            }
            if plan.duration_days == 0 {
                bail!("plan {} has a zero duration", plan.id);
            }
        }
        Ok(())
    }
}

fn parse_into<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) -> Result<()>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(v) = lookup(key) {
        *slot = v.trim().parse().with_context(|| format!("invalid {key}: {v}"))?;
    }
    Ok(())
}

fn parse_flag(v: &str) -> bool {
    v == "1" || v.eq_ignore_ascii_case("true")
}

/// Shared, reloadable configuration.
#[derive(Clone)]
pub struct ConfigHandle {
    tx: Arc<watch::Sender<Arc<CoordinatorConfig>>>,
}

impl ConfigHandle {
    pub fn new(config: CoordinatorConfig) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(config));
        Self { tx: Arc::new(tx) }
    }

    /// The current configuration.
    pub fn snapshot(&self) -> Arc<CoordinatorConfig> {
        self.tx.borrow().clone()
    }

    /// Publish a new configuration.
    pub fn replace(&self, config: CoordinatorConfig) {
        self.tx.send_replace(Arc::new(config));
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<CoordinatorConfig>> {
        self.tx.subscribe()
    }

    /// Re-read the configuration sources and publish the result.
    ///
    /// The listen address and database settings are bound at startup; changes
    /// to them are logged and otherwise ignored until restart.
    pub fn reload(&self) -> Result<()> {
        let mut next = CoordinatorConfig::load()?;
        let current = self.snapshot();

        if next.listen_addr != current.listen_addr || next.database != current.database {
            warn!("listen address and database changes require a restart; keeping current values");
            next.listen_addr = current.listen_addr;
            next.database = current.database.clone();
        }

        info!(
            health_interval_secs = next.monitor.health_interval_secs,
            sync_interval_secs = next.monitor.sync_interval_secs,
            overload_threshold = next.placement.overload_threshold,
            plans = next.plans.len(),
            "Configuration reloaded"
        );
        self.replace(next);
        Ok(())
    }
}

impl std::fmt::Debug for ConfigHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigHandle").finish_non_exhaustive()
    }
}
