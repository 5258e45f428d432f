//! In-memory repository for tests and database-less deployments.

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::error::{StoreError, StoreResult};
use super::repository::{AccountRepository, Record, Repository};
use crate::model::AccountRecord;

/// Repository backed by a vector guarded by an async lock.
///
/// Records keep insertion order. Lookups are linear, which is fine for the
/// fleet sizes this backend is meant for.
#[derive(Debug)]
pub struct MemoryRepository<R> {
    records: RwLock<Vec<R>>,
}

impl<R> Default for MemoryRepository<R> {
    fn default() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
        }
    }
}

impl<R: Record> MemoryRepository<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl<R: Record> Repository<R> for MemoryRepository<R> {
    async fn insert(&self, record: &R) -> StoreResult<()> {
        let mut records = self.records.write().await;
        if records.iter().any(|r| r.id() == record.id()) {
            return Err(StoreError::Conflict {
                kind: R::KIND,
                id: record.id().to_string(),
            });
        }
        records.push(record.clone());
        Ok(())
    }

    async fn get(&self, id: R::Id) -> StoreResult<Option<R>> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .find(|r| r.id() == id)
            .cloned())
    }

    async fn list(&self) -> StoreResult<Vec<R>> {
        Ok(self.records.read().await.clone())
    }

    async fn update(&self, record: &R) -> StoreResult<bool> {
        let mut records = self.records.write().await;
        match records.iter_mut().find(|r| r.id() == record.id()) {
            Some(slot) => {
                *slot = record.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: R::Id) -> StoreResult<bool> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| r.id() != id);
        Ok(records.len() != before)
    }
}

#[async_trait]
impl AccountRepository for MemoryRepository<AccountRecord> {}
