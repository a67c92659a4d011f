//! Ports to systems provisioning consumes but does not own, with in-memory
//! implementations for tests/dev.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use thiserror::Error;

use forgeops_auth::RoleCatalog;
use forgeops_core::{TenantId, UserId};

use crate::model::DirectoryGroup;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("{service} unavailable: {message}")]
    Unavailable { service: &'static str, message: String },
}

impl CollaboratorError {
    pub fn unavailable(service: &'static str, message: impl Into<String>) -> Self {
        Self::Unavailable {
            service,
            message: message.into(),
        }
    }
}

/// Known user, as far as provisioning needs to know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryUser {
    pub id: UserId,
    pub display_name: String,
}

/// Resolves principal ids to users of the tenant.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(
        &self,
        tenant_id: TenantId,
        principal_id: UserId,
    ) -> Result<Option<DirectoryUser>, CollaboratorError>;
}

/// Enumerates upstream groups with their members (pattern-driven sync).
#[async_trait]
pub trait ExternalDirectory: Send + Sync {
    async fn list_groups(&self, tenant_id: TenantId) -> Result<Vec<DirectoryGroup>, CollaboratorError>;
}

/// Supplies a tenant's ordered role catalog.
#[async_trait]
pub trait RoleCatalogProvider: Send + Sync {
    async fn role_catalog(&self, tenant_id: TenantId) -> Result<RoleCatalog, CollaboratorError>;
}

#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<(TenantId, UserId), DirectoryUser>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, tenant_id: TenantId, display_name: impl Into<String>) -> UserId {
        let id = UserId::new();
        if let Ok(mut users) = self.users.write() {
            users.insert(
                (tenant_id, id),
                DirectoryUser {
                    id,
                    display_name: display_name.into(),
                },
            );
        }
        id
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_user(
        &self,
        tenant_id: TenantId,
        principal_id: UserId,
    ) -> Result<Option<DirectoryUser>, CollaboratorError> {
        let users = self
            .users
            .read()
            .map_err(|_| CollaboratorError::unavailable("user directory", "lock poisoned"))?;
        Ok(users.get(&(tenant_id, principal_id)).cloned())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryExternalDirectory {
    groups: RwLock<HashMap<TenantId, Vec<DirectoryGroup>>>,
}

impl InMemoryExternalDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the listing returned for a tenant.
    pub fn set_groups(&self, tenant_id: TenantId, groups: Vec<DirectoryGroup>) {
        if let Ok(mut map) = self.groups.write() {
            map.insert(tenant_id, groups);
        }
    }
}

#[async_trait]
impl ExternalDirectory for InMemoryExternalDirectory {
    async fn list_groups(&self, tenant_id: TenantId) -> Result<Vec<DirectoryGroup>, CollaboratorError> {
        let map = self
            .groups
            .read()
            .map_err(|_| CollaboratorError::unavailable("external directory", "lock poisoned"))?;
        Ok(map.get(&tenant_id).cloned().unwrap_or_default())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryRoleCatalogs {
    catalogs: RwLock<HashMap<TenantId, RoleCatalog>>,
}

impl InMemoryRoleCatalogs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, tenant_id: TenantId, catalog: RoleCatalog) {
        if let Ok(mut map) = self.catalogs.write() {
            map.insert(tenant_id, catalog);
        }
    }
}

#[async_trait]
impl RoleCatalogProvider for InMemoryRoleCatalogs {
    async fn role_catalog(&self, tenant_id: TenantId) -> Result<RoleCatalog, CollaboratorError> {
        let map = self
            .catalogs
            .read()
            .map_err(|_| CollaboratorError::unavailable("role catalog", "lock poisoned"))?;
        Ok(map.get(&tenant_id).cloned().unwrap_or_default())
    }
}
