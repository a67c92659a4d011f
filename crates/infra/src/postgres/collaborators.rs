//! Postgres read adapters for the systems provisioning consumes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use forgeops_auth::{EncryptedSecret, RoleCatalog, RoleDescriptor, RoleSelector, SecretSource, TokenError};
use forgeops_core::{RoleId, TenantId, UserId};
use forgeops_provisioning::{
    CollaboratorError, DirectoryGroup, DirectoryPerson, DirectoryUser, ExternalDirectory, RoleCatalogProvider,
    StoreError, UserDirectory,
};

use super::map_sqlx_error;

fn unavailable(service: &'static str, err: impl std::fmt::Display) -> CollaboratorError {
    CollaboratorError::unavailable(service, err.to_string())
}

/// Active users of the tenant, from the `users` table.
#[derive(Debug, Clone)]
pub struct PostgresUserDirectory {
    pool: PgPool,
}

impl PostgresUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PostgresUserDirectory {
    async fn find_user(
        &self,
        tenant_id: TenantId,
        principal_id: UserId,
    ) -> Result<Option<DirectoryUser>, CollaboratorError> {
        let row = sqlx::query("SELECT display_name FROM users WHERE tenant_id = $1 AND user_id = $2 AND active")
            .bind(tenant_id.as_uuid())
            .bind(principal_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| unavailable("user directory", e))?;

        row.map(|row| {
            row.try_get::<String, _>("display_name")
                .map(|display_name| DirectoryUser {
                    id: principal_id,
                    display_name,
                })
                .map_err(|e| unavailable("user directory", e))
        })
        .transpose()
    }
}

/// Upstream group listing mirrored into `upstream_directory_groups`.
#[derive(Debug, Clone)]
pub struct PostgresExternalDirectory {
    pool: PgPool,
}

impl PostgresExternalDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Replace the mirrored listing for a tenant.
    #[instrument(skip(self, groups), fields(tenant_id = %tenant_id, groups = groups.len()), err)]
    pub async fn replace_groups(&self, tenant_id: TenantId, groups: &[DirectoryGroup]) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query("DELETE FROM upstream_directory_groups WHERE tenant_id = $1")
            .bind(tenant_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("replace_groups", e))?;

        for group in groups {
            let members = serde_json::to_value(&group.members)
                .map_err(|e| StoreError::Backend(format!("failed to encode members: {e}")))?;
            sqlx::query(
                r#"
                INSERT INTO upstream_directory_groups (tenant_id, external_id, display_name, members)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(tenant_id.as_uuid())
            .bind(&group.external_id)
            .bind(&group.display_name)
            .bind(members)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("replace_groups", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }
}

#[async_trait]
impl ExternalDirectory for PostgresExternalDirectory {
    async fn list_groups(&self, tenant_id: TenantId) -> Result<Vec<DirectoryGroup>, CollaboratorError> {
        let rows = sqlx::query(
            r#"
            SELECT external_id, display_name, members
            FROM upstream_directory_groups
            WHERE tenant_id = $1
            ORDER BY display_name, external_id
            "#,
        )
        .bind(tenant_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| unavailable("external directory", e))?;

        rows.iter()
            .map(|row| {
                let members: serde_json::Value =
                    row.try_get("members").map_err(|e| unavailable("external directory", e))?;
                Ok(DirectoryGroup {
                    external_id: row.try_get("external_id").map_err(|e| unavailable("external directory", e))?,
                    display_name: row
                        .try_get("display_name")
                        .map_err(|e| unavailable("external directory", e))?,
                    members: serde_json::from_value::<Vec<DirectoryPerson>>(members)
                        .map_err(|e| unavailable("external directory", e))?,
                })
            })
            .collect()
    }
}

/// Ordered role catalog from `role_catalog_entries`.
#[derive(Debug, Clone)]
pub struct PostgresRoleCatalogs {
    pool: PgPool,
}

impl PostgresRoleCatalogs {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RoleCatalogProvider for PostgresRoleCatalogs {
    async fn role_catalog(&self, tenant_id: TenantId) -> Result<RoleCatalog, CollaboratorError> {
        let rows = sqlx::query(
            r#"
            SELECT role_id, name, selector
            FROM role_catalog_entries
            WHERE tenant_id = $1
            ORDER BY position
            "#,
        )
        .bind(tenant_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| unavailable("role catalog", e))?;

        let mut catalog = RoleCatalog::empty();
        for row in &rows {
            let role_id: Uuid = row.try_get("role_id").map_err(|e| unavailable("role catalog", e))?;
            let name: String = row.try_get("name").map_err(|e| unavailable("role catalog", e))?;
            let selector: serde_json::Value = row.try_get("selector").map_err(|e| unavailable("role catalog", e))?;
            let selector = serde_json::from_value::<RoleSelector>(selector)
                .map_err(|e| unavailable("role catalog", e))?;
            catalog.push(RoleDescriptor::new(RoleId::from_uuid(role_id), name, selector));
        }
        Ok(catalog)
    }
}

/// Encrypted provisioning secrets from `provisioning_secrets`.
#[derive(Debug, Clone)]
pub struct PostgresSecretSource {
    pool: PgPool,
}

impl PostgresSecretSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Install or rotate a tenant's secret.
    #[instrument(skip(self, secret), fields(tenant_id = %tenant_id), err)]
    pub async fn put_secret(&self, tenant_id: TenantId, secret: &EncryptedSecret) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO provisioning_secrets (tenant_id, ciphertext, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (tenant_id) DO UPDATE SET
                ciphertext = EXCLUDED.ciphertext,
                expires_at = EXCLUDED.expires_at,
                created_at = NOW()
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(&secret.ciphertext)
        .bind(secret.expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("put_secret", e))?;
        Ok(())
    }
}

#[async_trait]
impl SecretSource for PostgresSecretSource {
    async fn provisioning_secret(&self, tenant_id: TenantId) -> Result<Option<EncryptedSecret>, TokenError> {
        let row = sqlx::query("SELECT ciphertext, expires_at FROM provisioning_secrets WHERE tenant_id = $1")
            .bind(tenant_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| TokenError::Source(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let ciphertext: String = row.try_get("ciphertext").map_err(|e| TokenError::Source(e.to_string()))?;
        let expires_at: Option<DateTime<Utc>> =
            row.try_get("expires_at").map_err(|e| TokenError::Source(e.to_string()))?;
        Ok(Some(EncryptedSecret { ciphertext, expires_at }))
    }
}
