//! Storage contract shared by the Postgres and in-memory backends.

use std::fmt::{Debug, Display};
use std::hash::Hash;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use vpnfleet_id::{AccountId, NodeId};

use super::error::StoreResult;
use crate::model::{AccountRecord, AccountStatus, NodeRecord};

/// A keyed record that can be persisted by a [`Repository`].
pub trait Record: Clone + Send + Sync + 'static {
    type Id: Copy + Ord + Hash + Display + Debug + Send + Sync + 'static;

    /// Human-readable record kind for errors and logs.
    const KIND: &'static str;

    fn id(&self) -> Self::Id;
}

impl Record for NodeRecord {
    type Id = NodeId;
    const KIND: &'static str = "node";

    fn id(&self) -> NodeId {
        self.id
    }
}

impl Record for AccountRecord {
    type Id = AccountId;
    const KIND: &'static str = "account";

    fn id(&self) -> AccountId {
        self.id
    }
}

/// Keyed CRUD over one record type.
///
/// `list` returns records in insertion order. `update` and `delete` report
/// whether a record with that key existed.
#[async_trait]
pub trait Repository<R: Record>: Send + Sync {
    async fn insert(&self, record: &R) -> StoreResult<()>;

    async fn get(&self, id: R::Id) -> StoreResult<Option<R>>;

    async fn list(&self) -> StoreResult<Vec<R>>;

    async fn update(&self, record: &R) -> StoreResult<bool>;

    async fn delete(&self, id: R::Id) -> StoreResult<bool>;

    /// Check that the backend is reachable.
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Account queries beyond plain CRUD.
///
/// The provided implementations filter [`Repository::list`]; backends with
/// an index override them.
#[async_trait]
pub trait AccountRepository: Repository<AccountRecord> {
    async fn list_by_node(&self, node_id: NodeId) -> StoreResult<Vec<AccountRecord>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|a| a.node_id == node_id)
            .collect())
    }

    /// Number of accounts on `node_id` that count towards its load.
    async fn count_active_on_node(&self, node_id: NodeId) -> StoreResult<u32> {
        let count = self
            .list_by_node(node_id)
            .await?
            .iter()
            .filter(|a| a.status == AccountStatus::Active)
            .count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    /// Active accounts whose expiry is at or before `at`.
    async fn list_active_expired_at(&self, at: DateTime<Utc>) -> StoreResult<Vec<AccountRecord>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|a| a.status == AccountStatus::Active && a.is_expired_at(at))
            .collect())
    }
}
