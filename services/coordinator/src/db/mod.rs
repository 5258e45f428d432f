//! Storage layer for the coordinator.
//!
//! Nodes and accounts are persisted through the [`Repository`] contract.
//! Two backends implement it:
//! - [`PgRepository`]: Postgres via SQLx, with runtime-loaded migrations
//! - [`MemoryRepository`]: process-local, for tests and database-less runs

mod error;
mod memory;
mod postgres;
mod repository;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryRepository;
pub use postgres::{PgRecord, PgRepository};
pub use repository::{AccountRepository, Record, Repository};

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use crate::model::{AccountRecord, NodeRecord};

/// Database configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// Database connection URL.
    pub url: String,

    /// Maximum number of connections in the pool.
    pub max_connections: u32,

    /// Minimum number of idle connections.
    pub min_connections: u32,

    /// Connection acquire timeout in seconds.
    pub acquire_timeout_secs: u64,

    /// Idle connection timeout in seconds.
    pub idle_timeout_secs: u64,

    /// Maximum lifetime of a connection in seconds.
    pub max_lifetime_secs: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/vpnfleet".to_string(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout_secs: 5,
            idle_timeout_secs: 600,
            max_lifetime_secs: 1800,
        }
    }
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    pub async fn connect(config: &DbConfig) -> StoreResult<Self> {
        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Connecting to database"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .max_lifetime(Some(Duration::from_secs(config.max_lifetime_secs)))
            .connect(&config.url)
            .await
            .map_err(StoreError::Connect)?;

        info!("Database connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        info!("Running database migrations");

        let candidates = vec![
            std::path::PathBuf::from("./migrations"),
            std::path::PathBuf::from("services/coordinator/migrations"),
            std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations"),
        ];
        let mut last_error: Option<sqlx::migrate::MigrateError> = None;

        for dir in &candidates {
            match sqlx::migrate::Migrator::new(dir.clone()).await {
                Ok(migrator) => {
                    info!(migrations_dir = %dir.display(), "Loaded migrations");
                    migrator
                        .run(&self.pool)
                        .await
                        .map_err(StoreError::Migration)?;
                    info!("Database migrations complete");
                    return Ok(());
                }
                Err(e) => {
                    last_error = Some(e);
                }
            }
        }

        let tried = candidates
            .iter()
            .map(|dir| dir.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");

        Err(StoreError::MigrationDirNotFound {
            tried,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string()),
        })
    }
}

/// The repositories the coordinator works against.
#[derive(Clone)]
pub struct Stores {
    pub nodes: Arc<dyn Repository<NodeRecord>>,
    pub accounts: Arc<dyn AccountRepository>,
}

impl Stores {
    /// Fresh, empty in-memory stores.
    pub fn in_memory() -> Self {
        Self {
            nodes: Arc::new(MemoryRepository::<NodeRecord>::new()),
            accounts: Arc::new(MemoryRepository::<AccountRecord>::new()),
        }
    }

    /// Stores backed by the given database.
    pub fn postgres(db: &Database) -> Self {
        Self {
            nodes: Arc::new(PgRepository::<NodeRecord>::new(db.pool().clone())),
            accounts: Arc::new(PgRepository::<AccountRecord>::new(db.pool().clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_config_defaults() {
        let config = DbConfig::default();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 1);
    }

    #[tokio::test]
    async fn test_in_memory_stores_start_empty() {
        let stores = Stores::in_memory();
        assert!(stores.nodes.list().await.unwrap().is_empty());
        assert!(stores.accounts.list().await.unwrap().is_empty());
        stores.nodes.ping().await.unwrap();
    }
}
