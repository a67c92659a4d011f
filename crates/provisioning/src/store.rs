//! Transactional store abstraction for provisioning state.
//!
//! Reads go through [`ProvisioningStore`] directly. Writes to a group's
//! memberships and sync grants only happen inside a [`GroupTransaction`],
//! which holds an exclusive lock on the group until it is committed or
//! dropped. Dropping a transaction without committing discards its writes.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use forgeops_auth::RoleGrant;
use forgeops_core::{DirectoryRecordId, GroupId, RoleId, TenantId, UserId};

use crate::model::{DirectoryRecord, ProvisioningGroup, SelectorConfig};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait ProvisioningStore: Send + Sync {
    async fn find_group(&self, tenant_id: TenantId, group_id: GroupId) -> StoreResult<Option<ProvisioningGroup>>;

    /// Case-insensitive lookup by display name.
    async fn find_group_by_name(
        &self,
        tenant_id: TenantId,
        display_name: &str,
    ) -> StoreResult<Option<ProvisioningGroup>>;

    /// All groups of a tenant, ordered by display name then id.
    async fn list_groups(&self, tenant_id: TenantId) -> StoreResult<Vec<ProvisioningGroup>>;

    async fn members(&self, tenant_id: TenantId, group_id: GroupId) -> StoreResult<Vec<UserId>>;

    /// Every grant a principal holds, manual and synced.
    async fn grants_for(&self, tenant_id: TenantId, principal_id: UserId) -> StoreResult<Vec<RoleGrant>>;

    /// Record an administrator-assigned grant. Idempotent.
    async fn insert_manual_grant(
        &self,
        tenant_id: TenantId,
        principal_id: UserId,
        role_id: RoleId,
        granted_at: DateTime<Utc>,
    ) -> StoreResult<RoleGrant>;

    /// Lock an existing group for writing. `NotFound` if it does not exist.
    async fn begin_group(&self, tenant_id: TenantId, group_id: GroupId) -> StoreResult<Box<dyn GroupTransaction>>;

    /// Lock the group named like `candidate`, staging `candidate` as a new
    /// group if none exists yet.
    ///
    /// The flag is `true` when the group is new. Concurrent calls for the same
    /// name serialize, so at most one of them creates.
    async fn begin_upsert_group(
        &self,
        candidate: ProvisioningGroup,
    ) -> StoreResult<(Box<dyn GroupTransaction>, bool)>;

    async fn selector_config(&self, tenant_id: TenantId) -> StoreResult<Option<SelectorConfig>>;

    async fn put_selector_config(&self, config: SelectorConfig) -> StoreResult<()>;

    async fn directory_records(&self, tenant_id: TenantId) -> StoreResult<Vec<DirectoryRecord>>;

    /// Lock the tenant's directory records for writing.
    async fn begin_directory(&self, tenant_id: TenantId) -> StoreResult<Box<dyn DirectoryTransaction>>;
}

#[async_trait]
impl<S> ProvisioningStore for Arc<S>
where
    S: ProvisioningStore + ?Sized,
{
    async fn find_group(&self, tenant_id: TenantId, group_id: GroupId) -> StoreResult<Option<ProvisioningGroup>> {
        (**self).find_group(tenant_id, group_id).await
    }

    async fn find_group_by_name(
        &self,
        tenant_id: TenantId,
        display_name: &str,
    ) -> StoreResult<Option<ProvisioningGroup>> {
        (**self).find_group_by_name(tenant_id, display_name).await
    }

    async fn list_groups(&self, tenant_id: TenantId) -> StoreResult<Vec<ProvisioningGroup>> {
        (**self).list_groups(tenant_id).await
    }

    async fn members(&self, tenant_id: TenantId, group_id: GroupId) -> StoreResult<Vec<UserId>> {
        (**self).members(tenant_id, group_id).await
    }

    async fn grants_for(&self, tenant_id: TenantId, principal_id: UserId) -> StoreResult<Vec<RoleGrant>> {
        (**self).grants_for(tenant_id, principal_id).await
    }

    async fn insert_manual_grant(
        &self,
        tenant_id: TenantId,
        principal_id: UserId,
        role_id: RoleId,
        granted_at: DateTime<Utc>,
    ) -> StoreResult<RoleGrant> {
        (**self)
            .insert_manual_grant(tenant_id, principal_id, role_id, granted_at)
            .await
    }

    async fn begin_group(&self, tenant_id: TenantId, group_id: GroupId) -> StoreResult<Box<dyn GroupTransaction>> {
        (**self).begin_group(tenant_id, group_id).await
    }

    async fn begin_upsert_group(
        &self,
        candidate: ProvisioningGroup,
    ) -> StoreResult<(Box<dyn GroupTransaction>, bool)> {
        (**self).begin_upsert_group(candidate).await
    }

    async fn selector_config(&self, tenant_id: TenantId) -> StoreResult<Option<SelectorConfig>> {
        (**self).selector_config(tenant_id).await
    }

    async fn put_selector_config(&self, config: SelectorConfig) -> StoreResult<()> {
        (**self).put_selector_config(config).await
    }

    async fn directory_records(&self, tenant_id: TenantId) -> StoreResult<Vec<DirectoryRecord>> {
        (**self).directory_records(tenant_id).await
    }

    async fn begin_directory(&self, tenant_id: TenantId) -> StoreResult<Box<dyn DirectoryTransaction>> {
        (**self).begin_directory(tenant_id).await
    }
}

/// Exclusive unit of work over one group.
///
/// Grant writes are scoped to `sync` grants whose origin is this group;
/// manual grants and grants from other groups are unreachable from here.
#[async_trait]
pub trait GroupTransaction: Send {
    /// Group state as staged in this transaction.
    fn group(&self) -> &ProvisioningGroup;

    async fn member_ids(&mut self) -> StoreResult<BTreeSet<UserId>>;

    /// `false` if the principal already was a member.
    async fn insert_member(&mut self, principal_id: UserId) -> StoreResult<bool>;

    /// `false` if the principal was not a member.
    async fn delete_member(&mut self, principal_id: UserId) -> StoreResult<bool>;

    /// Grant `role_id` to the principal with this group as origin.
    /// `false` if that exact grant already existed.
    async fn insert_sync_grant(
        &mut self,
        principal_id: UserId,
        role_id: RoleId,
        granted_at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Delete the principal's sync grants originating from this group and
    /// return the revoked role ids.
    async fn delete_sync_grants(&mut self, principal_id: UserId) -> StoreResult<Vec<RoleId>>;

    /// Stage new attributes for the group row. Id and tenant are immutable.
    async fn save_group(&mut self, group: ProvisioningGroup) -> StoreResult<()>;

    /// Delete the group row together with any remaining memberships and sync
    /// grants originating from it.
    async fn delete_group(&mut self) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}

/// Exclusive unit of work over one tenant's directory records.
#[async_trait]
pub trait DirectoryTransaction: Send {
    async fn records(&mut self) -> StoreResult<Vec<DirectoryRecord>>;

    async fn upsert_record(&mut self, record: DirectoryRecord) -> StoreResult<()>;

    /// Delete a sync-created record. Manual records are never deleted;
    /// returns `false` for them and for unknown ids.
    async fn delete_synced_record(&mut self, record_id: DirectoryRecordId) -> StoreResult<bool>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}
