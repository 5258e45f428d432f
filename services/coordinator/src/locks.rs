//! Keyed write serialization for node and account records.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use vpnfleet_id::{AccountId, NodeId};

/// One async mutex per key, created on first use.
///
/// A read-modify-write holds the record's lock from the read to the write,
/// so concurrent writers of the same record apply in turn and none writes
/// back a copy taken before another's change.
#[derive(Debug)]
pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

/// Held by the registry around node writes.
pub type NodeLocks = KeyedLocks<NodeId>;

/// Held by the provisioner, reconciler and sweeper around account writes.
///
/// Taken before any node lock, never after.
pub type AccountLocks = KeyedLocks<AccountId>;

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Copy> KeyedLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: K) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(key).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Drop the entry of a deleted record.
    pub fn forget(&self, key: K) {
        self.locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&key);
    }
}
