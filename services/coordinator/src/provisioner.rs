//! Account provisioning.
//!
//! Every operation mutates the local account record and the remote panel
//! client. The ordering rules are:
//! - create stores the record as `pending` first, then adds the remote
//!   client, then flips the record to `active` (or `error` on failure)
//! - delete and relocate remove the remote client first and touch local
//!   state only once that succeeded
//! - renew, suspend, activate and reset update local state first and
//!   report a remote failure without rolling back
//!
//! Every operation on an existing account holds that account's lock from
//! the first read to the last write, remote calls included. The expiry
//! sweep re-reads each due account under the same lock.
//!
//! Remote calls are bounded by the configured remote timeout and are never
//! retried here.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;
use vpnfleet_id::{AccountId, NodeId, PlanId, UserId};
use vpnfleet_panel::{PanelApi, PanelError, PanelResult, PanelSession};

use crate::config::ConfigHandle;
use crate::db::{AccountRepository, StoreError};
use crate::locks::AccountLocks;
use crate::model::{AccountRecord, AccountStatus, NodeRecord};
use crate::plans::PlanCatalog;
use crate::registry::{NodeRegistry, RegistryError};

/// Result type for provisioning operations.
pub type ProvisionResult<T> = Result<T, ProvisionError>;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("plan {0} not found")]
    UnknownPlan(PlanId),

    #[error("node {0} not found")]
    UnknownNode(NodeId),

    #[error("account {0} not found")]
    UnknownAccount(AccountId),

    /// The node has no inbound to attach clients to.
    #[error("node {0} has no inbound configured")]
    NodeNotProvisioned(NodeId),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("{op} failed on node {node_id} for account {account_id}: {source}")]
    Remote {
        node_id: NodeId,
        account_id: AccountId,
        op: &'static str,
        #[source]
        source: PanelError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<RegistryError> for ProvisionError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => Self::UnknownNode(id),
            RegistryError::Store(e) => Self::Store(e),
            other => Self::Invalid(other.to_string()),
        }
    }
}

impl ProvisionError {
    /// True when the failure happened on the remote panel.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }
}

/// Parameters for [`AccountProvisioner::create_with`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateAccount {
    pub user_id: UserId,
    pub node_id: NodeId,
    pub plan_id: PlanId,
    /// Overrides the plan quota. 0 means unlimited.
    pub traffic_limit_bytes: Option<u64>,
    /// Overrides the plan duration.
    pub duration_days: Option<u32>,
}

impl CreateAccount {
    pub fn new(user_id: UserId, node_id: NodeId, plan_id: PlanId) -> Self {
        Self {
            user_id,
            node_id,
            plan_id,
            traffic_limit_bytes: None,
            duration_days: None,
        }
    }
}

pub struct AccountProvisioner {
    registry: Arc<NodeRegistry>,
    accounts: Arc<dyn AccountRepository>,
    panel: Arc<dyn PanelApi>,
    plans: Arc<dyn PlanCatalog>,
    locks: Arc<AccountLocks>,
    config: ConfigHandle,
}

impl AccountProvisioner {
    pub fn new(
        registry: Arc<NodeRegistry>,
        accounts: Arc<dyn AccountRepository>,
        panel: Arc<dyn PanelApi>,
        plans: Arc<dyn PlanCatalog>,
        locks: Arc<AccountLocks>,
        config: ConfigHandle,
    ) -> Self {
        Self {
            registry,
            accounts,
            panel,
            plans,
            locks,
            config,
        }
    }

    pub async fn get(&self, id: AccountId) -> ProvisionResult<Option<AccountRecord>> {
        Ok(self.accounts.get(id).await?)
    }

    pub async fn list_by_node(&self, node_id: NodeId) -> ProvisionResult<Vec<AccountRecord>> {
        Ok(self.accounts.list_by_node(node_id).await?)
    }

    /// Provision an account with the plan's quota and duration.
    pub async fn create(
        &self,
        user_id: UserId,
        node_id: NodeId,
        plan_id: PlanId,
    ) -> ProvisionResult<AccountRecord> {
        self.create_with(CreateAccount::new(user_id, node_id, plan_id))
            .await
    }

    #[instrument(
        skip(self, request),
        fields(op = "create", user_id = %request.user_id, node_id = %request.node_id)
    )]
    pub async fn create_with(&self, request: CreateAccount) -> ProvisionResult<AccountRecord> {
        let plan = self
            .plans
            .plan(request.plan_id)
            .await
            .ok_or(ProvisionError::UnknownPlan(request.plan_id))?;
        let node = self.node(request.node_id).await?;
        let inbound_id = inbound(&node)?;

        let duration_days = request.duration_days.unwrap_or(plan.duration_days);
        if duration_days == 0 {
            return Err(ProvisionError::Invalid("duration must be positive".to_string()));
        }

        let now = Utc::now();
        let id = AccountId::new();
        let _guard = self.locks.lock(id).await;
        let mut account = AccountRecord {
            id,
            user_id: request.user_id,
            node_id: node.id,
            plan_id: plan.id,
            uuid: Uuid::new_v4(),
            email: AccountRecord::derive_email(request.user_id, id),
            traffic_used: 0,
            traffic_limit: request
                .traffic_limit_bytes
                .unwrap_or(plan.traffic_limit_bytes),
            starts_at: now,
            expires_at: now + chrono::Duration::days(i64::from(duration_days)),
            status: AccountStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        self.accounts.insert(&account).await?;

        let spec = account.client_spec();
        let added = self
            .remote(&node, |session| async move {
                self.panel.add_client(&session, inbound_id, &spec).await
            })
            .await;

        match added {
            Ok(()) => {
                self.set_status(&mut account, AccountStatus::Active).await?;
                self.refresh_load(node.id).await;
                info!(account_id = %account.id, email = %account.email, "Account provisioned");
                Ok(account)
            }
            Err(source) => {
                if let Err(e) = self.set_status(&mut account, AccountStatus::Error).await {
                    error!(account_id = %account.id, error = %e, "Failed to flag account after remote failure");
                }
                Err(remote_error(&node, account.id, "add_client", source))
            }
        }
    }

    /// Extend validity by `days`. An expired account restarts from now.
    #[instrument(skip(self), fields(op = "renew"))]
    pub async fn renew(&self, account_id: AccountId, days: u32) -> ProvisionResult<AccountRecord> {
        if days == 0 {
            return Err(ProvisionError::Invalid("renewal days must be positive".to_string()));
        }
        let (_guard, mut account) = self.lock_account(account_id).await?;
        let node = self.node(account.node_id).await?;
        let inbound_id = inbound(&node)?;

        let now = Utc::now();
        let base = if account.is_expired_at(now) {
            now
        } else {
            account.expires_at
        };
        account.expires_at = base + chrono::Duration::days(i64::from(days));
        account.status = AccountStatus::Active;
        self.save(&mut account).await?;
        self.refresh_load(node.id).await;

        let spec = account.client_spec();
        self.remote(&node, |session| async move {
            self.panel.update_client(&session, inbound_id, &spec).await
        })
        .await
        .map_err(|e| remote_error(&node, account.id, "update_client", e))?;

        info!(account_id = %account.id, expires_at = %account.expires_at, "Account renewed");
        Ok(account)
    }

    /// Remove the remote client, then the local record.
    #[instrument(skip(self), fields(op = "delete"))]
    pub async fn delete(&self, account_id: AccountId) -> ProvisionResult<()> {
        let (_guard, account) = self.lock_account(account_id).await?;
        let node = self.node(account.node_id).await?;
        let inbound_id = inbound(&node)?;

        let key = account.client_key();
        self.remote(&node, |session| async move {
            self.panel.delete_client(&session, inbound_id, &key).await
        })
        .await
        .map_err(|e| remote_error(&node, account.id, "delete_client", e))?;

        self.accounts.delete(account.id).await?;
        self.locks.forget(account.id);
        self.refresh_load(node.id).await;
        info!(account_id = %account.id, node_id = %node.id, "Account deleted");
        Ok(())
    }

    /// Drop the local record without touching the panel.
    ///
    /// For records whose remote client is known not to exist.
    #[instrument(skip(self), fields(op = "forget"))]
    pub async fn forget(&self, account_id: AccountId) -> ProvisionResult<()> {
        let (_guard, account) = self.lock_account(account_id).await?;
        self.accounts.delete(account.id).await?;
        self.locks.forget(account.id);
        self.refresh_load(account.node_id).await;
        warn!(
            account_id = %account.id,
            node_id = %account.node_id,
            status = %account.status,
            "Account forgotten without remote cleanup"
        );
        Ok(())
    }

    /// Move an account to another node, keeping its credentials.
    #[instrument(skip(self), fields(op = "relocate"))]
    pub async fn relocate(
        &self,
        account_id: AccountId,
        new_node_id: NodeId,
    ) -> ProvisionResult<AccountRecord> {
        let (_guard, mut account) = self.lock_account(account_id).await?;
        if account.node_id == new_node_id {
            return Ok(account);
        }

        let old_node = self.node(account.node_id).await?;
        let new_node = self.node(new_node_id).await?;
        let old_inbound = inbound(&old_node)?;
        let new_inbound = inbound(&new_node)?;

        let key = account.client_key();
        self.remote(&old_node, |session| async move {
            self.panel.delete_client(&session, old_inbound, &key).await
        })
        .await
        .map_err(|e| remote_error(&old_node, account.id, "delete_client", e))?;

        let spec = account.client_spec();
        let added = self
            .remote(&new_node, |session| async move {
                self.panel.add_client(&session, new_inbound, &spec).await
            })
            .await;

        match added {
            Ok(()) => {
                account.node_id = new_node.id;
                self.save(&mut account).await?;
                self.refresh_load(old_node.id).await;
                self.refresh_load(new_node.id).await;
                info!(
                    account_id = %account.id,
                    from = %old_node.id,
                    to = %new_node.id,
                    "Account relocated"
                );
                Ok(account)
            }
            Err(source) => {
                // The credential now exists on neither node.
                account.status = AccountStatus::Error;
                if let Err(e) = self.save(&mut account).await {
                    error!(account_id = %account.id, error = %e, "Failed to flag account after relocation failure");
                }
                self.refresh_load(old_node.id).await;
                Err(remote_error(&new_node, account.id, "add_client", source))
            }
        }
    }

    /// Zero the traffic counter locally and on the panel.
    #[instrument(skip(self), fields(op = "reset_traffic"))]
    pub async fn reset_traffic(&self, account_id: AccountId) -> ProvisionResult<AccountRecord> {
        let (_guard, mut account) = self.lock_account(account_id).await?;
        let node = self.node(account.node_id).await?;
        let inbound_id = inbound(&node)?;

        account.traffic_used = 0;
        self.save(&mut account).await?;

        let email = account.email.clone();
        self.remote(&node, |session| async move {
            self.panel
                .reset_client_traffic(&session, inbound_id, &email)
                .await
        })
        .await
        .map_err(|e| remote_error(&node, account.id, "reset_client_traffic", e))?;

        Ok(account)
    }

    /// Disable the account. The remote client is kept but disabled.
    #[instrument(skip(self), fields(op = "suspend"))]
    pub async fn suspend(&self, account_id: AccountId) -> ProvisionResult<AccountRecord> {
        self.set_enabled(account_id, AccountStatus::Suspended).await
    }

    /// Re-enable a suspended account.
    #[instrument(skip(self), fields(op = "activate"))]
    pub async fn activate(&self, account_id: AccountId) -> ProvisionResult<AccountRecord> {
        self.set_enabled(account_id, AccountStatus::Active).await
    }

    async fn set_enabled(
        &self,
        account_id: AccountId,
        status: AccountStatus,
    ) -> ProvisionResult<AccountRecord> {
        let (_guard, mut account) = self.lock_account(account_id).await?;
        let node = self.node(account.node_id).await?;
        let inbound_id = inbound(&node)?;

        self.set_status(&mut account, status).await?;
        self.refresh_load(node.id).await;

        let spec = account.client_spec();
        self.remote(&node, |session| async move {
            self.panel.update_client(&session, inbound_id, &spec).await
        })
        .await
        .map_err(|e| remote_error(&node, account.id, "update_client", e))?;

        info!(account_id = %account.id, status = %status, "Account status changed");
        Ok(account)
    }

    /// Pull the panel's counters into `traffic_used`. Never decreases it.
    #[instrument(skip(self), fields(op = "refresh_traffic"))]
    pub async fn refresh_traffic(&self, account_id: AccountId) -> ProvisionResult<AccountRecord> {
        let (_guard, mut account) = self.lock_account(account_id).await?;
        let node = self.node(account.node_id).await?;
        let inbound_id = inbound(&node)?;

        let email = account.email.clone();
        let traffic = self
            .remote(&node, |session| async move {
                self.panel.client_traffic(&session, inbound_id, &email).await
            })
            .await
            .map_err(|e| remote_error(&node, account.id, "client_traffic", e))?;

        let total = traffic.total();
        if total > account.traffic_used {
            account.traffic_used = total;
            self.save(&mut account).await?;
        }
        Ok(account)
    }

    /// Flip active accounts whose expiry is at or before `now` to expired.
    ///
    /// Local only: the panel enforces expiry itself. Returns the flipped ids.
    #[instrument(skip(self))]
    pub async fn check_expired_accounts(&self, now: DateTime<Utc>) -> ProvisionResult<Vec<AccountId>> {
        let due = self.accounts.list_active_expired_at(now).await?;
        let mut flipped = Vec::with_capacity(due.len());
        let mut touched = BTreeSet::new();

        for listed in due {
            match self.expire_one(listed.id, now).await {
                Ok(Some(node_id)) => {
                    flipped.push(listed.id);
                    touched.insert(node_id);
                }
                Ok(None) => {
                    debug!(account_id = %listed.id, "Account renewed or changed before expiry");
                }
                Err(e) => {
                    error!(account_id = %listed.id, error = %e, "Failed to expire account");
                }
            }
        }

        for node_id in touched {
            self.refresh_load(node_id).await;
        }
        if !flipped.is_empty() {
            info!(expired = flipped.len(), "Expired accounts");
        }
        Ok(flipped)
    }

    /// Flip one account if it is still active and lapsed. Returns its node.
    async fn expire_one(&self, id: AccountId, now: DateTime<Utc>) -> ProvisionResult<Option<NodeId>> {
        let _guard = self.locks.lock(id).await;
        let Some(mut account) = self.accounts.get(id).await? else {
            return Ok(None);
        };
        if account.status != AccountStatus::Active || !account.is_expired_at(now) {
            return Ok(None);
        }
        self.set_status(&mut account, AccountStatus::Expired).await?;
        Ok(Some(account.node_id))
    }

    /// Take the account's lock and read the record under it.
    async fn lock_account(
        &self,
        id: AccountId,
    ) -> ProvisionResult<(OwnedMutexGuard<()>, AccountRecord)> {
        let guard = self.locks.lock(id).await;
        let account = self
            .accounts
            .get(id)
            .await?
            .ok_or(ProvisionError::UnknownAccount(id))?;
        Ok((guard, account))
    }

    async fn node(&self, id: NodeId) -> ProvisionResult<NodeRecord> {
        self.registry
            .get(id)
            .await?
            .ok_or(ProvisionError::UnknownNode(id))
    }

    async fn save(&self, account: &mut AccountRecord) -> ProvisionResult<()> {
        account.updated_at = Utc::now();
        if !self.accounts.update(account).await? {
            return Err(ProvisionError::UnknownAccount(account.id));
        }
        Ok(())
    }

    async fn set_status(
        &self,
        account: &mut AccountRecord,
        status: AccountStatus,
    ) -> ProvisionResult<()> {
        account.status = status;
        self.save(account).await
    }

    /// Recompute a node's load. Failures are logged; the account operation
    /// that triggered it has already been committed.
    async fn refresh_load(&self, node_id: NodeId) {
        if let Err(e) = self.registry.recompute_load(node_id).await {
            warn!(node_id = %node_id, error = %e, "Failed to recompute node load");
        }
    }

    /// Log in to the node's panel and run `call` within the remote timeout.
    async fn remote<T, F, Fut>(&self, node: &NodeRecord, call: F) -> PanelResult<T>
    where
        F: FnOnce(PanelSession) -> Fut,
        Fut: Future<Output = PanelResult<T>>,
    {
        let deadline = self.remote_timeout();
        let endpoint = node.endpoint();
        let exchange = async {
            let session = self.panel.authenticate(&endpoint).await?;
            call(session).await
        };
        tokio::time::timeout(deadline, exchange)
            .await
            .unwrap_or_else(|_| {
                Err(PanelError::Unreachable(format!(
                    "no answer within {}ms",
                    deadline.as_millis()
                )))
            })
    }

    fn remote_timeout(&self) -> Duration {
        self.config.snapshot().monitor.remote_timeout()
    }
}

fn inbound(node: &NodeRecord) -> ProvisionResult<i64> {
    node.inbound_id
        .ok_or(ProvisionError::NodeNotProvisioned(node.id))
}

fn remote_error(
    node: &NodeRecord,
    account_id: AccountId,
    op: &'static str,
    source: PanelError,
) -> ProvisionError {
    error!(
        node_id = %node.id,
        account_id = %account_id,
        op,
        kind = source.kind(),
        error = %source,
        "Panel call failed"
    );
    ProvisionError::Remote {
        node_id: node.id,
        account_id,
        op,
        source,
    }
}
