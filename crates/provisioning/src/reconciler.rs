//! Reconciler: converges a group's stored membership and sync grants to an
//! inbound change description.
//!
//! A change moves `Received -> Verified -> Applying -> Committed | Rejected`.
//! Verification yields a [`VerifiedTenant`], which every mutating entry point
//! requires. Applying runs inside one [`GroupTransaction`] per change (per
//! operation for partial updates), so a store fault rolls back that unit and
//! nothing else. Audit events are recorded only after their unit commits.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::instrument;

use forgeops_auth::{extract_bearer, RoleCatalog, TokenError, TokenVerifier, VerifiedTenant};
use forgeops_core::{GroupId, RoleId, TenantId, UserId};
use forgeops_events::{AuditEvent, AuditSink};

use crate::collaborators::{CollaboratorError, RoleCatalogProvider, UserDirectory};
use crate::membership::{MembershipError, MembershipStore};
use crate::model::ProvisioningGroup;
use crate::store::{GroupTransaction, ProvisioningStore, StoreError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("unauthorized: {0}")]
    Unauthorized(TokenError),

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("store fault: {0}")]
    Store(String),
}

impl From<StoreError> for ReconcileError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => ReconcileError::NotFound(what),
            other => ReconcileError::Store(other.to_string()),
        }
    }
}

impl From<MembershipError> for ReconcileError {
    fn from(e: MembershipError) -> Self {
        match e {
            MembershipError::PrincipalNotFound(id) => ReconcileError::Validation(format!("unknown principal {id}")),
            MembershipError::Store(e) => e.into(),
            MembershipError::Directory(e) => e.into(),
        }
    }
}

impl From<CollaboratorError> for ReconcileError {
    fn from(e: CollaboratorError) -> Self {
        ReconcileError::Store(e.to_string())
    }
}

impl From<TokenError> for ReconcileError {
    fn from(e: TokenError) -> Self {
        if e.is_unauthorized() {
            ReconcileError::Unauthorized(e)
        } else {
            ReconcileError::Store(e.to_string())
        }
    }
}

/// Full group state as carried by create and replace requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRepresentation {
    pub display_name: String,
    pub external_id: Option<String>,
    pub members: Vec<UserId>,
}

/// One element of a partial update, applied in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOperation {
    AddMembers(Vec<UserId>),
    RemoveMembers(Vec<UserId>),
    RemoveAllMembers,
    ReplaceMembers(Vec<UserId>),
    Rename(String),
    SetExternalId(Option<String>),
}

impl PatchOperation {
    pub fn name(&self) -> &'static str {
        match self {
            PatchOperation::AddMembers(_) => "add_members",
            PatchOperation::RemoveMembers(_) => "remove_members",
            PatchOperation::RemoveAllMembers => "remove_all_members",
            PatchOperation::ReplaceMembers(_) => "replace_members",
            PatchOperation::Rename(_) => "rename",
            PatchOperation::SetExternalId(_) => "set_external_id",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeDescription {
    Create(GroupRepresentation),
    Replace {
        group_id: GroupId,
        group: GroupRepresentation,
    },
    PartialUpdate {
        group_id: GroupId,
        operations: Vec<PatchOperation>,
    },
    Delete {
        group_id: GroupId,
    },
}

impl ChangeDescription {
    pub fn kind(&self) -> &'static str {
        match self {
            ChangeDescription::Create(_) => "create",
            ChangeDescription::Replace { .. } => "replace",
            ChangeDescription::PartialUpdate { .. } => "partial_update",
            ChangeDescription::Delete { .. } => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: UserId,
    pub display: Option<String>,
}

/// Group state as committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSnapshot {
    pub group: ProvisioningGroup,
    pub members: Vec<Member>,
}

/// Result of a committed change description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committed {
    /// Post-state; `None` after a delete.
    pub group: Option<GroupSnapshot>,
    /// `true` only when a create made a new group.
    pub created: bool,
    /// Principals skipped because they do not resolve to a user.
    pub skipped: Vec<UserId>,
}

#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn ProvisioningStore>,
    users: Arc<dyn UserDirectory>,
    membership: MembershipStore,
    catalogs: Arc<dyn RoleCatalogProvider>,
    verifier: TokenVerifier,
    audit: Arc<dyn AuditSink>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn ProvisioningStore>,
        users: Arc<dyn UserDirectory>,
        catalogs: Arc<dyn RoleCatalogProvider>,
        verifier: TokenVerifier,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let membership = MembershipStore::new(store.clone(), users.clone());
        Self {
            store,
            users,
            membership,
            catalogs,
            verifier,
            audit,
        }
    }

    /// `Received -> Verified`: check the `Authorization` header value.
    pub async fn verify(
        &self,
        tenant_id: TenantId,
        authorization: Option<&str>,
    ) -> Result<VerifiedTenant, ReconcileError> {
        let verified = match extract_bearer(authorization) {
            Ok(token) => self.verifier.verify(tenant_id, token, Utc::now()).await,
            Err(e) => Err(e),
        };
        verified.map_err(|e| {
            tracing::warn!(tenant_id = %tenant_id, reason = %e, "provisioning request rejected");
            e.into()
        })
    }

    /// `Verified -> Applying -> Committed | Rejected`.
    #[instrument(skip(self, tenant, change), fields(tenant_id = %tenant.tenant_id(), op = change.kind()))]
    pub async fn apply(&self, tenant: &VerifiedTenant, change: ChangeDescription) -> Result<Committed, ReconcileError> {
        let tenant_id = tenant.tenant_id();
        let result = match change {
            ChangeDescription::Create(group) => self.create(tenant_id, group).await,
            ChangeDescription::Replace { group_id, group } => self.replace(tenant_id, group_id, group).await,
            ChangeDescription::PartialUpdate { group_id, operations } => {
                self.partial_update(tenant_id, group_id, operations).await
            }
            ChangeDescription::Delete { group_id } => self.delete(tenant_id, group_id).await,
        };

        match &result {
            Ok(committed) => tracing::info!(
                created = committed.created,
                skipped = committed.skipped.len(),
                "change committed"
            ),
            Err(e) => tracing::warn!(error = %e, "change rejected"),
        }
        result
    }

    /// Committed state of one group.
    pub async fn group(&self, tenant: &VerifiedTenant, group_id: GroupId) -> Result<GroupSnapshot, ReconcileError> {
        let group = self
            .store
            .find_group(tenant.tenant_id(), group_id)
            .await?
            .ok_or_else(|| ReconcileError::NotFound(format!("group {group_id}")))?;
        self.snapshot_of(group).await
    }

    /// Groups of the tenant, optionally restricted to one display name
    /// (case-insensitive equality).
    pub async fn list(
        &self,
        tenant: &VerifiedTenant,
        display_name: Option<&str>,
    ) -> Result<Vec<ProvisioningGroup>, ReconcileError> {
        let groups = self.store.list_groups(tenant.tenant_id()).await?;
        Ok(match display_name {
            Some(name) => groups.into_iter().filter(|g| g.has_name(name)).collect(),
            None => groups,
        })
    }

    pub async fn snapshot_of(&self, group: ProvisioningGroup) -> Result<GroupSnapshot, ReconcileError> {
        let ids = self.store.members(group.tenant_id, group.id).await?;
        let mut members = Vec::with_capacity(ids.len());
        for id in ids {
            // Display names are decoration; a directory hiccup must not fail the read.
            let display = match self.users.find_user(group.tenant_id, id).await {
                Ok(user) => user.map(|u| u.display_name),
                Err(e) => {
                    tracing::debug!(principal_id = %id, error = %e, "member display lookup failed");
                    None
                }
            };
            members.push(Member { id, display });
        }
        Ok(GroupSnapshot { group, members })
    }

    async fn create(&self, tenant_id: TenantId, rep: GroupRepresentation) -> Result<Committed, ReconcileError> {
        validate(&rep)?;
        let catalog = self.catalogs.role_catalog(tenant_id).await?;
        let now = Utc::now();

        let (mut tx, created) = self
            .membership
            .upsert_group(tenant_id, rep.display_name.trim(), rep.external_id, &catalog, now)
            .await?;

        if !created {
            let existing = tx.group().clone();
            drop(tx);
            tracing::info!(group_id = %existing.id, "group already exists; returning it unchanged");
            return Ok(Committed {
                group: Some(self.snapshot_of(existing).await?),
                created: false,
                skipped: Vec::new(),
            });
        }

        let group = tx.group().clone();
        let mut events = vec![AuditEvent::GroupCreated {
            tenant_id,
            group_id: group.id,
            display_name: group.display_name.clone(),
            occurred_at: now,
        }];

        let delta = self.membership.replace_members(tx.as_mut(), &rep.members).await?;
        for principal_id in &delta.added {
            events.push(member_added(&group, *principal_id, now));
            grant(tx.as_mut(), *principal_id, group.mapped_role_id, now, &mut events).await?;
        }

        let snapshot = self.commit(tx, now, events).await?;
        Ok(Committed {
            group: Some(snapshot),
            created: true,
            skipped: delta.skipped,
        })
    }

    async fn replace(
        &self,
        tenant_id: TenantId,
        group_id: GroupId,
        rep: GroupRepresentation,
    ) -> Result<Committed, ReconcileError> {
        validate(&rep)?;
        let catalog = self.catalogs.role_catalog(tenant_id).await?;
        let now = Utc::now();
        let mut events = Vec::new();

        let mut tx = self.store.begin_group(tenant_id, group_id).await?;
        retarget(tx.as_mut(), rep.display_name.trim(), &catalog, now, &mut events).await?;

        let mut group = tx.group().clone();
        group.external_id = rep.external_id;
        tx.save_group(group.clone()).await?;

        let delta = self.membership.replace_members(tx.as_mut(), &rep.members).await?;
        for principal_id in &delta.added {
            events.push(member_added(&group, *principal_id, now));
            grant(tx.as_mut(), *principal_id, group.mapped_role_id, now, &mut events).await?;
        }
        for principal_id in &delta.removed {
            events.push(member_removed(&group, *principal_id, now));
            revoke(tx.as_mut(), *principal_id, now, &mut events).await?;
        }

        let snapshot = self.commit(tx, now, events).await?;
        Ok(Committed {
            group: Some(snapshot),
            created: false,
            skipped: delta.skipped,
        })
    }

    async fn partial_update(
        &self,
        tenant_id: TenantId,
        group_id: GroupId,
        operations: Vec<PatchOperation>,
    ) -> Result<Committed, ReconcileError> {
        if self.store.find_group(tenant_id, group_id).await?.is_none() {
            return Err(ReconcileError::NotFound(format!("group {group_id}")));
        }
        let catalog = self.catalogs.role_catalog(tenant_id).await?;
        let mut skipped = Vec::new();

        for (index, operation) in operations.into_iter().enumerate() {
            let op = operation.name();
            let now = Utc::now();
            let mut tx = self.store.begin_group(tenant_id, group_id).await?;
            let mut events = Vec::new();

            let applied = self
                .apply_operation(tx.as_mut(), operation, &catalog, now, &mut events, &mut skipped)
                .await;
            if let Err(e) = applied {
                tracing::warn!(index, op, error = %e, "patch operation failed; earlier operations stay committed");
                return Err(e);
            }
            self.commit(tx, now, events).await?;
        }

        let group = self
            .store
            .find_group(tenant_id, group_id)
            .await?
            .ok_or_else(|| ReconcileError::NotFound(format!("group {group_id}")))?;
        Ok(Committed {
            group: Some(self.snapshot_of(group).await?),
            created: false,
            skipped,
        })
    }

    async fn apply_operation(
        &self,
        tx: &mut dyn GroupTransaction,
        operation: PatchOperation,
        catalog: &RoleCatalog,
        now: DateTime<Utc>,
        events: &mut Vec<AuditEvent>,
        skipped: &mut Vec<UserId>,
    ) -> Result<(), ReconcileError> {
        let group = tx.group().clone();
        match operation {
            PatchOperation::AddMembers(principals) => {
                for principal_id in principals {
                    match self.membership.add_member(tx, principal_id).await {
                        Ok(true) => {
                            events.push(member_added(&group, principal_id, now));
                            grant(tx, principal_id, group.mapped_role_id, now, events).await?;
                        }
                        Ok(false) => {}
                        Err(e) if e.is_skippable() => {
                            tracing::warn!(principal_id = %principal_id, group_id = %group.id, "skipping add of unknown principal");
                            skipped.push(principal_id);
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            }
            PatchOperation::RemoveMembers(principals) => {
                for principal_id in principals {
                    if self.membership.remove_member(tx, principal_id).await? {
                        events.push(member_removed(&group, principal_id, now));
                        revoke(tx, principal_id, now, events).await?;
                    }
                }
            }
            PatchOperation::RemoveAllMembers => {
                for principal_id in self.membership.delete_group(tx).await? {
                    events.push(member_removed(&group, principal_id, now));
                    revoke(tx, principal_id, now, events).await?;
                }
            }
            PatchOperation::ReplaceMembers(principals) => {
                let delta = self.membership.replace_members(tx, &principals).await?;
                for principal_id in delta.added {
                    events.push(member_added(&group, principal_id, now));
                    grant(tx, principal_id, group.mapped_role_id, now, events).await?;
                }
                for principal_id in delta.removed {
                    events.push(member_removed(&group, principal_id, now));
                    revoke(tx, principal_id, now, events).await?;
                }
                skipped.extend(delta.skipped);
            }
            PatchOperation::Rename(display_name) => {
                let display_name = display_name.trim();
                if display_name.is_empty() {
                    tracing::warn!(group_id = %group.id, "skipping rename to an empty display name");
                } else {
                    retarget(tx, display_name, catalog, now, events).await?;
                }
            }
            PatchOperation::SetExternalId(external_id) => {
                let mut group = group;
                group.external_id = external_id;
                tx.save_group(group).await?;
            }
        }
        Ok(())
    }

    async fn delete(&self, tenant_id: TenantId, group_id: GroupId) -> Result<Committed, ReconcileError> {
        let now = Utc::now();
        let mut tx = self.store.begin_group(tenant_id, group_id).await?;
        let group = tx.group().clone();
        let mut events = Vec::new();

        for principal_id in self.membership.delete_group(tx.as_mut()).await? {
            events.push(member_removed(&group, principal_id, now));
            revoke(tx.as_mut(), principal_id, now, &mut events).await?;
        }
        tx.delete_group().await?;
        tx.commit().await?;

        events.push(AuditEvent::GroupDeleted {
            tenant_id,
            group_id,
            occurred_at: now,
        });
        self.record(events);

        Ok(Committed {
            group: None,
            created: false,
            skipped: Vec::new(),
        })
    }

    /// Stamp member count and sync time, commit, then publish the audit trail.
    async fn commit(
        &self,
        mut tx: Box<dyn GroupTransaction>,
        now: DateTime<Utc>,
        events: Vec<AuditEvent>,
    ) -> Result<GroupSnapshot, ReconcileError> {
        let members = tx.member_ids().await?;
        let mut group = tx.group().clone();
        group.touch(members.len(), now);
        tx.save_group(group.clone()).await?;
        tx.commit().await?;
        self.record(events);
        self.snapshot_of(group).await
    }

    fn record(&self, events: Vec<AuditEvent>) {
        for event in events {
            self.audit.record(event);
        }
    }
}

fn validate(rep: &GroupRepresentation) -> Result<(), ReconcileError> {
    if rep.display_name.trim().is_empty() {
        return Err(ReconcileError::Validation("displayName is required".to_string()));
    }
    Ok(())
}

/// Apply a (possibly new) display name and re-resolve the mapped role.
///
/// When the role changes, every current member's grant from this group moves
/// to the new role.
async fn retarget(
    tx: &mut dyn GroupTransaction,
    display_name: &str,
    catalog: &RoleCatalog,
    now: DateTime<Utc>,
    events: &mut Vec<AuditEvent>,
) -> Result<(), ReconcileError> {
    let mut group = tx.group().clone();
    let previous_role = group.mapped_role_id;
    let role = catalog.resolve(display_name).map(|r| r.role_id);

    if group.display_name != display_name {
        events.push(AuditEvent::GroupRenamed {
            tenant_id: group.tenant_id,
            group_id: group.id,
            from: group.display_name.clone(),
            to: display_name.to_string(),
            occurred_at: now,
        });
        group.display_name = display_name.to_string();
    }
    group.mapped_role_id = role;
    tx.save_group(group).await?;

    if previous_role != role {
        for principal_id in tx.member_ids().await? {
            revoke(tx, principal_id, now, events).await?;
            grant(tx, principal_id, role, now, events).await?;
        }
    }
    Ok(())
}

async fn grant(
    tx: &mut dyn GroupTransaction,
    principal_id: UserId,
    role_id: Option<RoleId>,
    now: DateTime<Utc>,
    events: &mut Vec<AuditEvent>,
) -> Result<(), ReconcileError> {
    let Some(role_id) = role_id else {
        return Ok(());
    };
    if tx.insert_sync_grant(principal_id, role_id, now).await? {
        events.push(AuditEvent::RoleGranted {
            tenant_id: tx.group().tenant_id,
            principal_id,
            role_id,
            origin_group: tx.group().id,
            occurred_at: now,
        });
    }
    Ok(())
}

/// Revoke the principal's grants originating from this group only.
async fn revoke(
    tx: &mut dyn GroupTransaction,
    principal_id: UserId,
    now: DateTime<Utc>,
    events: &mut Vec<AuditEvent>,
) -> Result<(), ReconcileError> {
    for role_id in tx.delete_sync_grants(principal_id).await? {
        events.push(AuditEvent::RoleRevoked {
            tenant_id: tx.group().tenant_id,
            principal_id,
            role_id,
            origin_group: tx.group().id,
            occurred_at: now,
        });
    }
    Ok(())
}

fn member_added(group: &ProvisioningGroup, principal_id: UserId, now: DateTime<Utc>) -> AuditEvent {
    AuditEvent::MemberAdded {
        tenant_id: group.tenant_id,
        group_id: group.id,
        principal_id,
        occurred_at: now,
    }
}

fn member_removed(group: &ProvisioningGroup, principal_id: UserId, now: DateTime<Utc>) -> AuditEvent {
    AuditEvent::MemberRemoved {
        tenant_id: group.tenant_id,
        group_id: group.id,
        principal_id,
        occurred_at: now,
    }
}
