//! Storage error types.

use thiserror::Error;

/// Result type for repository operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Storage operation errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to connect to the database.
    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    /// Failed to execute a query.
    #[error("query failed: {0}")]
    Query(#[source] sqlx::Error),

    /// Failed to run migrations.
    #[error("migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),

    /// Migration directory not found in the current environment.
    #[error("migration directory not found; tried {tried}. Last error: {last_error}. Run from repo root or services/coordinator.")]
    MigrationDirNotFound { tried: String, last_error: String },

    /// A record with the same key or unique field already exists.
    #[error("{kind} {id} conflicts with an existing record")]
    Conflict { kind: &'static str, id: String },

    /// The write would leave a dangling reference.
    #[error("{kind} {id} is still referenced")]
    Referenced { kind: &'static str, id: String },
}

impl StoreError {
    /// Classify a failed write against `kind`/`id`.
    pub(crate) fn from_write(err: sqlx::Error, kind: &'static str, id: String) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => Self::Conflict { kind, id },
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                Self::Referenced { kind, id }
            }
            _ => Self::Query(err),
        }
    }
}
