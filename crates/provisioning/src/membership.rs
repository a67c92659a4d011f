//! Membership Store: which principal belongs to which provisioned group.
//!
//! Every operation except [`MembershipStore::upsert_group`] runs inside a
//! caller-owned [`GroupTransaction`], so a reconciliation's membership writes
//! and grant writes commit or roll back together.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::instrument;

use forgeops_auth::RoleCatalog;
use forgeops_core::{TenantId, UserId};

use crate::collaborators::{CollaboratorError, UserDirectory};
use crate::model::ProvisioningGroup;
use crate::store::{GroupTransaction, ProvisioningStore, StoreError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MembershipError {
    /// Unknown principal. Callers skip it and carry on with the batch.
    #[error("principal {0} does not resolve to a known user")]
    PrincipalNotFound(UserId),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Directory(#[from] CollaboratorError),
}

impl MembershipError {
    pub fn is_skippable(&self) -> bool {
        matches!(self, MembershipError::PrincipalNotFound(_))
    }
}

/// Outcome of [`MembershipStore::replace_members`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipDelta {
    pub added: Vec<UserId>,
    pub removed: Vec<UserId>,
    /// Requested principals that do not resolve to a user.
    pub skipped: Vec<UserId>,
}

impl MembershipDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[derive(Clone)]
pub struct MembershipStore {
    store: Arc<dyn ProvisioningStore>,
    users: Arc<dyn UserDirectory>,
}

impl MembershipStore {
    pub fn new(store: Arc<dyn ProvisioningStore>, users: Arc<dyn UserDirectory>) -> Self {
        Self { store, users }
    }

    /// Lock the tenant's group named `display_name`, creating it if absent.
    ///
    /// An existing group is returned unchanged. A new group gets its mapped
    /// role resolved from `catalog` now. The flag is `true` for new groups;
    /// nothing is persisted until the transaction commits.
    #[instrument(skip(self, catalog, now), fields(tenant_id = %tenant_id))]
    pub async fn upsert_group(
        &self,
        tenant_id: TenantId,
        display_name: &str,
        external_id: Option<String>,
        catalog: &RoleCatalog,
        now: DateTime<Utc>,
    ) -> Result<(Box<dyn GroupTransaction>, bool), MembershipError> {
        let mapped_role_id = catalog.resolve(display_name).map(|role| role.role_id);
        let candidate = ProvisioningGroup::new(tenant_id, display_name, external_id, mapped_role_id, now);
        Ok(self.store.begin_upsert_group(candidate).await?)
    }

    /// Add a principal. `Ok(false)` if it already was a member.
    pub async fn add_member(
        &self,
        tx: &mut dyn GroupTransaction,
        principal_id: UserId,
    ) -> Result<bool, MembershipError> {
        let tenant_id = tx.group().tenant_id;
        if self.users.find_user(tenant_id, principal_id).await?.is_none() {
            return Err(MembershipError::PrincipalNotFound(principal_id));
        }
        Ok(tx.insert_member(principal_id).await?)
    }

    /// Remove a principal. `Ok(false)` if it was not a member.
    pub async fn remove_member(
        &self,
        tx: &mut dyn GroupTransaction,
        principal_id: UserId,
    ) -> Result<bool, MembershipError> {
        Ok(tx.delete_member(principal_id).await?)
    }

    /// Converge the member set to `principal_ids`: adds first, then removes.
    ///
    /// Unknown principals are skipped and reported in the delta.
    pub async fn replace_members(
        &self,
        tx: &mut dyn GroupTransaction,
        principal_ids: &[UserId],
    ) -> Result<MembershipDelta, MembershipError> {
        let current = tx.member_ids().await?;
        let desired: BTreeSet<UserId> = principal_ids.iter().copied().collect();
        let mut delta = MembershipDelta::default();

        for principal_id in desired.difference(&current) {
            match self.add_member(tx, *principal_id).await {
                Ok(true) => delta.added.push(*principal_id),
                Ok(false) => {}
                Err(e) if e.is_skippable() => {
                    tracing::warn!(principal_id = %principal_id, group_id = %tx.group().id, "skipping unknown principal");
                    delta.skipped.push(*principal_id);
                }
                Err(e) => return Err(e),
            }
        }

        for principal_id in current.difference(&desired) {
            if self.remove_member(tx, *principal_id).await? {
                delta.removed.push(*principal_id);
            }
        }

        Ok(delta)
    }

    /// Remove every membership row of the group and return the former members.
    pub async fn delete_group(&self, tx: &mut dyn GroupTransaction) -> Result<Vec<UserId>, MembershipError> {
        let members = tx.member_ids().await?;
        for principal_id in &members {
            tx.delete_member(*principal_id).await?;
        }
        Ok(members.into_iter().collect())
    }
}
