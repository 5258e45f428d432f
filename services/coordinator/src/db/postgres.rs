//! Postgres-backed repositories.

use std::marker::PhantomData;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::query_builder::Separated;
use sqlx::{Decode, Encode, FromRow, Postgres, QueryBuilder, Row, Type};
use uuid::Uuid;
use vpnfleet_id::NodeId;

use super::error::{StoreError, StoreResult};
use super::repository::{AccountRepository, Record, Repository};
use crate::model::{AccountRecord, AccountStatus, NodeMetrics, NodeRecord, NodeStatus};

/// Table mapping for a [`Record`].
pub trait PgRecord: Record + for<'r> FromRow<'r, PgRow> + Unpin {
    const TABLE: &'static str;

    /// Non-key columns, in the order [`PgRecord::bind_columns`] binds them.
    const COLUMNS: &'static [&'static str];

    /// Columns that define insertion order for `list`.
    const ORDER_BY: &'static str;

    fn bind_columns(&self, b: &mut Separated<'_, '_, Postgres, &'static str>);
}

/// Generic repository over a single table keyed by `id`.
pub struct PgRepository<R> {
    pool: PgPool,
    _record: PhantomData<fn() -> R>,
}

impl<R> Clone for PgRepository<R> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            _record: PhantomData,
        }
    }
}

impl<R: PgRecord> PgRepository<R> {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            _record: PhantomData,
        }
    }

    fn select_sql(filter: &str) -> String {
        format!(
            "SELECT id, {} FROM {} {}",
            R::COLUMNS.join(", "),
            R::TABLE,
            filter
        )
    }
}

#[async_trait]
impl<R> Repository<R> for PgRepository<R>
where
    R: PgRecord,
    R::Id: for<'q> Encode<'q, Postgres> + Type<Postgres>,
{
    async fn insert(&self, record: &R) -> StoreResult<()> {
        let mut builder = QueryBuilder::new(format!(
            "INSERT INTO {} (id, {}) ",
            R::TABLE,
            R::COLUMNS.join(", ")
        ));
        builder.push_values(std::iter::once(record), |mut b, r| {
            b.push_bind(r.id());
            r.bind_columns(&mut b);
        });

        builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::from_write(e, R::KIND, record.id().to_string()))?;
        Ok(())
    }

    async fn get(&self, id: R::Id) -> StoreResult<Option<R>> {
        let sql = Self::select_sql("WHERE id = $1");
        sqlx::query_as::<_, R>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::Query)
    }

    async fn list(&self) -> StoreResult<Vec<R>> {
        let sql = Self::select_sql(&format!("ORDER BY {}", R::ORDER_BY));
        sqlx::query_as::<_, R>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::Query)
    }

    async fn update(&self, record: &R) -> StoreResult<bool> {
        let mut builder = QueryBuilder::new(format!(
            "UPDATE {} SET ({}) = ROW(",
            R::TABLE,
            R::COLUMNS.join(", ")
        ));
        let mut values = builder.separated(", ");
        record.bind_columns(&mut values);
        values.push_unseparated(") WHERE id = ");
        values.push_bind_unseparated(record.id());

        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::from_write(e, R::KIND, record.id().to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: R::Id) -> StoreResult<bool> {
        let sql = format!("DELETE FROM {} WHERE id = $1", R::TABLE);
        let result = sqlx::query(&sql)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::from_write(e, R::KIND, id.to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(StoreError::Query)?;
        Ok(())
    }
}

#[async_trait]
impl AccountRepository for PgRepository<AccountRecord> {
    async fn list_by_node(&self, node_id: NodeId) -> StoreResult<Vec<AccountRecord>> {
        let sql = Self::select_sql("WHERE node_id = $1 ORDER BY created_at, id");
        sqlx::query_as::<_, AccountRecord>(&sql)
            .bind(node_id)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::Query)
    }

    async fn count_active_on_node(&self, node_id: NodeId) -> StoreResult<u32> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM accounts WHERE node_id = $1 AND status = $2")
                .bind(node_id)
                .bind(AccountStatus::Active.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(StoreError::Query)?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn list_active_expired_at(&self, at: DateTime<Utc>) -> StoreResult<Vec<AccountRecord>> {
        let sql = Self::select_sql("WHERE status = $1 AND expires_at <= $2 ORDER BY expires_at");
        sqlx::query_as::<_, AccountRecord>(&sql)
            .bind(AccountStatus::Active.as_str())
            .bind(at)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::Query)
    }
}

// =============================================================================
// Row Mapping
// =============================================================================

fn decode_error(column: &str, source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: source.into(),
    }
}

/// Read a signed column into a narrower or unsigned Rust type.
fn narrow<T, U>(row: &PgRow, column: &str) -> Result<U, sqlx::Error>
where
    T: for<'r> Decode<'r, Postgres> + Type<Postgres>,
    U: TryFrom<T>,
    <U as TryFrom<T>>::Error: std::error::Error + Send + Sync + 'static,
{
    let raw: T = row.try_get(column)?;
    U::try_from(raw).map_err(|e| decode_error(column, e))
}

fn parsed<T>(row: &PgRow, column: &str) -> Result<T, sqlx::Error>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(|e: String| decode_error(column, e))
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

impl<'r> FromRow<'r, PgRow> for NodeRecord {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            location: row.try_get("location")?,
            country: row.try_get("country")?,
            host: row.try_get("host")?,
            port: narrow::<i32, u16>(row, "port")?,
            panel_url: row.try_get("panel_url")?,
            username: row.try_get("username")?,
            password: row.try_get("password")?,
            protocol: row.try_get("protocol")?,
            inbound_id: row.try_get("inbound_id")?,
            capacity: narrow::<i32, u32>(row, "capacity")?,
            load_percent: narrow::<i32, u8>(row, "load_percent")?,
            status: parsed::<NodeStatus>(row, "status")?,
            metrics: NodeMetrics {
                traffic_up: narrow::<i64, u64>(row, "traffic_up")?,
                traffic_down: narrow::<i64, u64>(row, "traffic_down")?,
                cpu_percent: row.try_get("cpu_percent")?,
                mem_used: narrow::<i64, u64>(row, "mem_used")?,
                mem_total: narrow::<i64, u64>(row, "mem_total")?,
                disk_used: narrow::<i64, u64>(row, "disk_used")?,
                disk_total: narrow::<i64, u64>(row, "disk_total")?,
                uptime_secs: narrow::<i64, u64>(row, "uptime_secs")?,
            },
            last_sync_at: row.try_get("last_sync_at")?,
            is_active: row.try_get("is_active")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl PgRecord for NodeRecord {
    const TABLE: &'static str = "nodes";
    const COLUMNS: &'static [&'static str] = &[
        "name",
        "location",
        "country",
        "host",
        "port",
        "panel_url",
        "username",
        "password",
        "protocol",
        "inbound_id",
        "capacity",
        "load_percent",
        "status",
        "traffic_up",
        "traffic_down",
        "cpu_percent",
        "mem_used",
        "mem_total",
        "disk_used",
        "disk_total",
        "uptime_secs",
        "last_sync_at",
        "is_active",
        "created_at",
        "updated_at",
    ];
    const ORDER_BY: &'static str = "created_at, id";

    fn bind_columns(&self, b: &mut Separated<'_, '_, Postgres, &'static str>) {
        let m = &self.metrics;
        b.push_bind(self.name.clone())
            .push_bind(self.location.clone())
            .push_bind(self.country.clone())
            .push_bind(self.host.clone())
            .push_bind(i32::from(self.port))
            .push_bind(self.panel_url.clone())
            .push_bind(self.username.clone())
            .push_bind(self.password.clone())
            .push_bind(self.protocol.clone())
            .push_bind(self.inbound_id)
            .push_bind(to_i32(self.capacity))
            .push_bind(i32::from(self.load_percent))
            .push_bind(self.status.as_str())
            .push_bind(to_i64(m.traffic_up))
            .push_bind(to_i64(m.traffic_down))
            .push_bind(m.cpu_percent)
            .push_bind(to_i64(m.mem_used))
            .push_bind(to_i64(m.mem_total))
            .push_bind(to_i64(m.disk_used))
            .push_bind(to_i64(m.disk_total))
            .push_bind(to_i64(m.uptime_secs))
            .push_bind(self.last_sync_at)
            .push_bind(self.is_active)
            .push_bind(self.created_at)
            .push_bind(self.updated_at);
    }
}

impl<'r> FromRow<'r, PgRow> for AccountRecord {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let uuid: String = row.try_get("uuid")?;
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            node_id: row.try_get("node_id")?,
            plan_id: row.try_get("plan_id")?,
            uuid: Uuid::parse_str(&uuid).map_err(|e| decode_error("uuid", e))?,
            email: row.try_get("email")?,
            traffic_used: narrow::<i64, u64>(row, "traffic_used")?,
            traffic_limit: narrow::<i64, u64>(row, "traffic_limit")?,
            starts_at: row.try_get("starts_at")?,
            expires_at: row.try_get("expires_at")?,
            status: parsed::<AccountStatus>(row, "status")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl PgRecord for AccountRecord {
    const TABLE: &'static str = "accounts";
    const COLUMNS: &'static [&'static str] = &[
        "user_id",
        "node_id",
        "plan_id",
        "uuid",
        "email",
        "traffic_used",
        "traffic_limit",
        "starts_at",
        "expires_at",
        "status",
        "created_at",
        "updated_at",
    ];
    const ORDER_BY: &'static str = "created_at, id";

    fn bind_columns(&self, b: &mut Separated<'_, '_, Postgres, &'static str>) {
        b.push_bind(self.user_id)
            .push_bind(self.node_id)
            .push_bind(self.plan_id)
            .push_bind(self.uuid.to_string())
            .push_bind(self.email.clone())
            .push_bind(to_i64(self.traffic_used))
            .push_bind(to_i64(self.traffic_limit))
            .push_bind(self.starts_at)
            .push_bind(self.expires_at)
            .push_bind(self.status.as_str())
            .push_bind(self.created_at)
            .push_bind(self.updated_at);
    }
}
