//! Role grants and their provenance.
//!
//! A grant is keyed by `(principal, role, source)` where a `sync` source also
//! carries the group it originated from. The same principal may therefore hold
//! the same role several times: once by hand and once per implying group.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use forgeops_core::{GroupId, RoleId, TenantId, UserId};

/// Where a grant came from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum GrantSource {
    /// Assigned by an administrator. Never created, changed or removed by
    /// provisioning.
    Manual,
    /// Granted by provisioning because the principal belongs to `origin_group`.
    Sync { origin_group: GroupId },
}

impl GrantSource {
    pub fn is_manual(&self) -> bool {
        matches!(self, GrantSource::Manual)
    }

    /// Group the grant originated from, if sync-sourced.
    pub fn origin_group(&self) -> Option<GroupId> {
        match self {
            GrantSource::Manual => None,
            GrantSource::Sync { origin_group } => Some(*origin_group),
        }
    }
}

/// "Principal P holds role R", with provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleGrant {
    pub tenant_id: TenantId,
    pub principal_id: UserId,
    pub role_id: RoleId,
    #[serde(flatten)]
    pub source: GrantSource,
    pub granted_at: DateTime<Utc>,
}

impl RoleGrant {
    pub fn manual(tenant_id: TenantId, principal_id: UserId, role_id: RoleId, granted_at: DateTime<Utc>) -> Self {
        Self {
            tenant_id,
            principal_id,
            role_id,
            source: GrantSource::Manual,
            granted_at,
        }
    }

    pub fn synced(
        tenant_id: TenantId,
        principal_id: UserId,
        role_id: RoleId,
        origin_group: GroupId,
        granted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            tenant_id,
            principal_id,
            role_id,
            source: GrantSource::Sync { origin_group },
            granted_at,
        }
    }

    /// Identity of the grant row (timestamps excluded).
    pub fn key(&self) -> (TenantId, UserId, RoleId, GrantSource) {
        (self.tenant_id, self.principal_id, self.role_id, self.source)
    }

    /// True if provisioning may revoke this grant while processing `group`.
    pub fn revocable_by(&self, group: GroupId) -> bool {
        self.source.origin_group() == Some(group)
    }
}
