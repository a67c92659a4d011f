//! Postgres-backed provisioning store.
//!
//! ## Locking
//!
//! - `begin_group` opens a transaction and takes `SELECT ... FOR UPDATE` on the
//!   group row; concurrent reconciliations of the same group queue behind it.
//! - `begin_upsert_group` first takes a transaction-scoped advisory lock on
//!   `(tenant, lower(display_name))`, so two creates of the same name cannot
//!   both insert.
//! - `begin_directory` takes a transaction-scoped advisory lock per tenant.
//!
//! Dropping a transaction without committing rolls it back.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use forgeops_auth::{GrantSource, RoleGrant};
use forgeops_core::{DirectoryRecordId, GroupId, RoleId, TenantId, UserId};
use forgeops_provisioning::{
    DirectoryRecord, DirectoryTransaction, FieldMapping, GroupTransaction, ProvisioningGroup, ProvisioningStore,
    RecordOrigin, SelectorConfig, StoreError, StoreResult,
};

use super::{decode_error, map_sqlx_error};

#[derive(Debug, Clone)]
pub struct PostgresProvisioningStore {
    pool: PgPool,
}

impl PostgresProvisioningStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn begin(&self) -> StoreResult<Transaction<'static, Postgres>> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }
}

async fn advisory_lock(tx: &mut Transaction<'static, Postgres>, key: &str) -> StoreResult<()> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(key)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("advisory_lock", e))?;
    Ok(())
}

fn group_from_row(row: &PgRow) -> StoreResult<ProvisioningGroup> {
    let read = |e: sqlx::Error| decode_error("provisioning group", e);
    let member_count: i32 = row.try_get("member_count").map_err(read)?;
    Ok(ProvisioningGroup {
        id: GroupId::from_uuid(row.try_get("group_id").map_err(read)?),
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id").map_err(read)?),
        display_name: row.try_get("display_name").map_err(read)?,
        external_id: row.try_get("external_id").map_err(read)?,
        mapped_role_id: row
            .try_get::<Option<Uuid>, _>("mapped_role_id")
            .map_err(read)?
            .map(RoleId::from_uuid),
        member_count: u32::try_from(member_count).unwrap_or(0),
        last_synced_at: row.try_get("last_synced_at").map_err(read)?,
        created_at: row.try_get("created_at").map_err(read)?,
        updated_at: row.try_get("updated_at").map_err(read)?,
    })
}

fn grant_from_row(row: &PgRow) -> StoreResult<RoleGrant> {
    let read = |e: sqlx::Error| decode_error("role grant", e);
    let source: String = row.try_get("source").map_err(read)?;
    let origin: Option<Uuid> = row.try_get("origin_group_id").map_err(read)?;
    let source = match (source.as_str(), origin) {
        ("manual", None) => GrantSource::Manual,
        ("sync", Some(group)) => GrantSource::Sync {
            origin_group: GroupId::from_uuid(group),
        },
        (other, _) => return Err(decode_error("role grant", format!("inconsistent source '{other}'"))),
    };
    Ok(RoleGrant {
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id").map_err(read)?),
        principal_id: UserId::from_uuid(row.try_get("principal_id").map_err(read)?),
        role_id: RoleId::from_uuid(row.try_get("role_id").map_err(read)?),
        source,
        granted_at: row.try_get("granted_at").map_err(read)?,
    })
}

fn record_from_row(row: &PgRow) -> StoreResult<DirectoryRecord> {
    let read = |e: sqlx::Error| decode_error("directory record", e);
    let origin: String = row.try_get("origin").map_err(read)?;
    let attributes: serde_json::Value = row.try_get("attributes").map_err(read)?;
    Ok(DirectoryRecord {
        id: DirectoryRecordId::from_uuid(row.try_get("record_id").map_err(read)?),
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id").map_err(read)?),
        external_id: row.try_get("external_id").map_err(read)?,
        display_name: row.try_get("display_name").map_err(read)?,
        email: row.try_get("email").map_err(read)?,
        attributes: serde_json::from_value::<BTreeMap<String, String>>(attributes)
            .map_err(|e| decode_error("directory record attributes", e))?,
        status: row.try_get("status").map_err(read)?,
        origin: RecordOrigin::parse(&origin)
            .ok_or_else(|| decode_error("directory record", format!("unknown origin '{origin}'")))?,
        stale: row.try_get("stale").map_err(read)?,
        source_group: row.try_get("source_group").map_err(read)?,
        last_synced_at: row.try_get("last_synced_at").map_err(read)?,
        created_at: row.try_get("created_at").map_err(read)?,
        updated_at: row.try_get("updated_at").map_err(read)?,
    })
}

#[async_trait]
impl ProvisioningStore for PostgresProvisioningStore {
    #[instrument(skip(self), fields(tenant_id = %tenant_id, group_id = %group_id), err)]
    async fn find_group(&self, tenant_id: TenantId, group_id: GroupId) -> StoreResult<Option<ProvisioningGroup>> {
        let row = sqlx::query(
            r#"
            SELECT tenant_id, group_id, display_name, external_id, mapped_role_id,
                   member_count, last_synced_at, created_at, updated_at
            FROM provisioning_groups
            WHERE tenant_id = $1 AND group_id = $2
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(group_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_group", e))?;

        row.as_ref().map(group_from_row).transpose()
    }

    async fn find_group_by_name(
        &self,
        tenant_id: TenantId,
        display_name: &str,
    ) -> StoreResult<Option<ProvisioningGroup>> {
        let row = sqlx::query(
            r#"
            SELECT tenant_id, group_id, display_name, external_id, mapped_role_id,
                   member_count, last_synced_at, created_at, updated_at
            FROM provisioning_groups
            WHERE tenant_id = $1 AND lower(display_name) = lower($2)
            ORDER BY created_at, group_id
            LIMIT 1
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(display_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_group_by_name", e))?;

        row.as_ref().map(group_from_row).transpose()
    }

    async fn list_groups(&self, tenant_id: TenantId) -> StoreResult<Vec<ProvisioningGroup>> {
        let rows = sqlx::query(
            r#"
            SELECT tenant_id, group_id, display_name, external_id, mapped_role_id,
                   member_count, last_synced_at, created_at, updated_at
            FROM provisioning_groups
            WHERE tenant_id = $1
            ORDER BY lower(display_name), group_id
            "#,
        )
        .bind(tenant_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_groups", e))?;

        rows.iter().map(group_from_row).collect()
    }

    async fn members(&self, tenant_id: TenantId, group_id: GroupId) -> StoreResult<Vec<UserId>> {
        let rows = sqlx::query(
            r#"
            SELECT principal_id FROM provisioning_memberships
            WHERE tenant_id = $1 AND group_id = $2
            ORDER BY principal_id
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(group_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("members", e))?;

        rows.iter()
            .map(|row| {
                row.try_get::<Uuid, _>("principal_id")
                    .map(UserId::from_uuid)
                    .map_err(|e| decode_error("membership", e))
            })
            .collect()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, principal_id = %principal_id), err)]
    async fn grants_for(&self, tenant_id: TenantId, principal_id: UserId) -> StoreResult<Vec<RoleGrant>> {
        let rows = sqlx::query(
            r#"
            SELECT tenant_id, principal_id, role_id, source, origin_group_id, granted_at
            FROM role_grants
            WHERE tenant_id = $1 AND principal_id = $2
            ORDER BY granted_at, role_id
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(principal_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("grants_for", e))?;

        rows.iter().map(grant_from_row).collect()
    }

    async fn insert_manual_grant(
        &self,
        tenant_id: TenantId,
        principal_id: UserId,
        role_id: RoleId,
        granted_at: DateTime<Utc>,
    ) -> StoreResult<RoleGrant> {
        sqlx::query(
            r#"
            INSERT INTO role_grants (tenant_id, principal_id, role_id, source, origin_group_id, granted_at)
            VALUES ($1, $2, $3, 'manual', NULL, $4)
            ON CONFLICT (tenant_id, principal_id, role_id) WHERE source = 'manual' DO NOTHING
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(principal_id.as_uuid())
        .bind(role_id.as_uuid())
        .bind(granted_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_manual_grant", e))?;

        let row = sqlx::query(
            r#"
            SELECT tenant_id, principal_id, role_id, source, origin_group_id, granted_at
            FROM role_grants
            WHERE tenant_id = $1 AND principal_id = $2 AND role_id = $3 AND source = 'manual'
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(principal_id.as_uuid())
        .bind(role_id.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_manual_grant", e))?;

        grant_from_row(&row)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, group_id = %group_id), err)]
    async fn begin_group(&self, tenant_id: TenantId, group_id: GroupId) -> StoreResult<Box<dyn GroupTransaction>> {
        let mut tx = self.begin().await?;
        let row = sqlx::query(
            r#"
            SELECT tenant_id, group_id, display_name, external_id, mapped_role_id,
                   member_count, last_synced_at, created_at, updated_at
            FROM provisioning_groups
            WHERE tenant_id = $1 AND group_id = $2
            FOR UPDATE
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(group_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("lock_group", e))?
        .ok_or_else(|| StoreError::NotFound(format!("group {group_id}")))?;

        let group = group_from_row(&row)?;
        Ok(Box::new(PgGroupTransaction { tx, group }))
    }

    #[instrument(skip(self, candidate), fields(tenant_id = %candidate.tenant_id, display_name = %candidate.display_name), err)]
    async fn begin_upsert_group(
        &self,
        candidate: ProvisioningGroup,
    ) -> StoreResult<(Box<dyn GroupTransaction>, bool)> {
        let mut tx = self.begin().await?;
        let key = format!("group:{}:{}", candidate.tenant_id, candidate.display_name.to_lowercase());
        advisory_lock(&mut tx, &key).await?;

        let existing = sqlx::query(
            r#"
            SELECT tenant_id, group_id, display_name, external_id, mapped_role_id,
                   member_count, last_synced_at, created_at, updated_at
            FROM provisioning_groups
            WHERE tenant_id = $1 AND lower(display_name) = lower($2)
            ORDER BY created_at, group_id
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(candidate.tenant_id.as_uuid())
        .bind(&candidate.display_name)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("find_group_for_upsert", e))?;

        if let Some(row) = existing {
            let group = group_from_row(&row)?;
            return Ok((Box::new(PgGroupTransaction { tx, group }), false));
        }

        sqlx::query(
            r#"
            INSERT INTO provisioning_groups (
                tenant_id, group_id, display_name, external_id, mapped_role_id,
                member_count, last_synced_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(candidate.tenant_id.as_uuid())
        .bind(candidate.id.as_uuid())
        .bind(&candidate.display_name)
        .bind(&candidate.external_id)
        .bind(candidate.mapped_role_id.map(Uuid::from))
        .bind(i32::try_from(candidate.member_count).unwrap_or(i32::MAX))
        .bind(candidate.last_synced_at)
        .bind(candidate.created_at)
        .bind(candidate.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_group", e))?;

        Ok((Box::new(PgGroupTransaction { tx, group: candidate }), true))
    }

    async fn selector_config(&self, tenant_id: TenantId) -> StoreResult<Option<SelectorConfig>> {
        let row = sqlx::query(
            r#"
            SELECT selector, auto_delete, default_status, field_mapping
            FROM directory_selectors
            WHERE tenant_id = $1
            "#,
        )
        .bind(tenant_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("selector_config", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let read = |e: sqlx::Error| decode_error("selector config", e);
        let mapping: serde_json::Value = row.try_get("field_mapping").map_err(read)?;
        Ok(Some(SelectorConfig {
            tenant_id,
            selector: row.try_get("selector").map_err(read)?,
            auto_delete: row.try_get("auto_delete").map_err(read)?,
            default_status: row.try_get("default_status").map_err(read)?,
            field_mapping: serde_json::from_value::<FieldMapping>(mapping)
                .map_err(|e| decode_error("field mapping", e))?,
        }))
    }

    #[instrument(skip(self, config), fields(tenant_id = %config.tenant_id, selector = %config.selector), err)]
    async fn put_selector_config(&self, config: SelectorConfig) -> StoreResult<()> {
        let mapping = serde_json::to_value(&config.field_mapping)
            .map_err(|e| StoreError::Backend(format!("failed to encode field mapping: {e}")))?;
        sqlx::query(
            r#"
            INSERT INTO directory_selectors (tenant_id, selector, auto_delete, default_status, field_mapping)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (tenant_id) DO UPDATE SET
                selector = EXCLUDED.selector,
                auto_delete = EXCLUDED.auto_delete,
                default_status = EXCLUDED.default_status,
                field_mapping = EXCLUDED.field_mapping
            "#,
        )
        .bind(config.tenant_id.as_uuid())
        .bind(&config.selector)
        .bind(config.auto_delete)
        .bind(&config.default_status)
        .bind(mapping)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("put_selector_config", e))?;
        Ok(())
    }

    async fn directory_records(&self, tenant_id: TenantId) -> StoreResult<Vec<DirectoryRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT tenant_id, record_id, external_id, display_name, email, attributes, status,
                   origin, stale, source_group, last_synced_at, created_at, updated_at
            FROM directory_records
            WHERE tenant_id = $1
            ORDER BY external_id
            "#,
        )
        .bind(tenant_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("directory_records", e))?;

        rows.iter().map(record_from_row).collect()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn begin_directory(&self, tenant_id: TenantId) -> StoreResult<Box<dyn DirectoryTransaction>> {
        let mut tx = self.begin().await?;
        advisory_lock(&mut tx, &format!("directory:{tenant_id}")).await?;
        Ok(Box::new(PgDirectoryTransaction { tx, tenant_id }))
    }
}

struct PgGroupTransaction {
    tx: Transaction<'static, Postgres>,
    group: ProvisioningGroup,
}

impl PgGroupTransaction {
    fn keys(&self) -> (Uuid, Uuid) {
        (*self.group.tenant_id.as_uuid(), *self.group.id.as_uuid())
    }
}

#[async_trait]
impl GroupTransaction for PgGroupTransaction {
    fn group(&self) -> &ProvisioningGroup {
        &self.group
    }

    async fn member_ids(&mut self) -> StoreResult<BTreeSet<UserId>> {
        let (tenant, group) = self.keys();
        let rows = sqlx::query("SELECT principal_id FROM provisioning_memberships WHERE tenant_id = $1 AND group_id = $2")
            .bind(tenant)
            .bind(group)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("member_ids", e))?;

        rows.iter()
            .map(|row| {
                row.try_get::<Uuid, _>("principal_id")
                    .map(UserId::from_uuid)
                    .map_err(|e| decode_error("membership", e))
            })
            .collect()
    }

    async fn insert_member(&mut self, principal_id: UserId) -> StoreResult<bool> {
        let (tenant, group) = self.keys();
        let result = sqlx::query(
            r#"
            INSERT INTO provisioning_memberships (tenant_id, group_id, principal_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (tenant_id, group_id, principal_id) DO NOTHING
            "#,
        )
        .bind(tenant)
        .bind(group)
        .bind(principal_id.as_uuid())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_member", e))?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_member(&mut self, principal_id: UserId) -> StoreResult<bool> {
        let (tenant, group) = self.keys();
        let result = sqlx::query(
            "DELETE FROM provisioning_memberships WHERE tenant_id = $1 AND group_id = $2 AND principal_id = $3",
        )
        .bind(tenant)
        .bind(group)
        .bind(principal_id.as_uuid())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("delete_member", e))?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_sync_grant(
        &mut self,
        principal_id: UserId,
        role_id: RoleId,
        granted_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let (tenant, group) = self.keys();
        let result = sqlx::query(
            r#"
            INSERT INTO role_grants (tenant_id, principal_id, role_id, source, origin_group_id, granted_at)
            VALUES ($1, $2, $3, 'sync', $4, $5)
            ON CONFLICT (tenant_id, principal_id, role_id, origin_group_id) WHERE source = 'sync' DO NOTHING
            "#,
        )
        .bind(tenant)
        .bind(principal_id.as_uuid())
        .bind(role_id.as_uuid())
        .bind(group)
        .bind(granted_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_sync_grant", e))?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_sync_grants(&mut self, principal_id: UserId) -> StoreResult<Vec<RoleId>> {
        let (tenant, group) = self.keys();
        let rows = sqlx::query(
            r#"
            DELETE FROM role_grants
            WHERE tenant_id = $1 AND principal_id = $2 AND source = 'sync' AND origin_group_id = $3
            RETURNING role_id
            "#,
        )
        .bind(tenant)
        .bind(principal_id.as_uuid())
        .bind(group)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("delete_sync_grants", e))?;

        rows.iter()
            .map(|row| {
                row.try_get::<Uuid, _>("role_id")
                    .map(RoleId::from_uuid)
                    .map_err(|e| decode_error("role grant", e))
            })
            .collect()
    }

    async fn save_group(&mut self, group: ProvisioningGroup) -> StoreResult<()> {
        if group.id != self.group.id || group.tenant_id != self.group.tenant_id {
            return Err(StoreError::Conflict("group identity is immutable".to_string()));
        }
        sqlx::query(
            r#"
            UPDATE provisioning_groups SET
                display_name = $3,
                external_id = $4,
                mapped_role_id = $5,
                member_count = $6,
                last_synced_at = $7,
                updated_at = $8
            WHERE tenant_id = $1 AND group_id = $2
            "#,
        )
        .bind(group.tenant_id.as_uuid())
        .bind(group.id.as_uuid())
        .bind(&group.display_name)
        .bind(&group.external_id)
        .bind(group.mapped_role_id.map(Uuid::from))
        .bind(i32::try_from(group.member_count).unwrap_or(i32::MAX))
        .bind(group.last_synced_at)
        .bind(group.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("save_group", e))?;

        self.group = group;
        Ok(())
    }

    async fn delete_group(&mut self) -> StoreResult<()> {
        let (tenant, group) = self.keys();
        // Memberships and sync grants also cascade; delete them explicitly so
        // the statement order matches the in-memory store.
        for statement in [
            "DELETE FROM role_grants WHERE tenant_id = $1 AND source = 'sync' AND origin_group_id = $2",
            "DELETE FROM provisioning_memberships WHERE tenant_id = $1 AND group_id = $2",
            "DELETE FROM provisioning_groups WHERE tenant_id = $1 AND group_id = $2",
        ] {
            sqlx::query(statement)
                .bind(tenant)
                .bind(group)
                .execute(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx_error("delete_group", e))?;
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }
}

struct PgDirectoryTransaction {
    tx: Transaction<'static, Postgres>,
    tenant_id: TenantId,
}

#[async_trait]
impl DirectoryTransaction for PgDirectoryTransaction {
    async fn records(&mut self) -> StoreResult<Vec<DirectoryRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT tenant_id, record_id, external_id, display_name, email, attributes, status,
                   origin, stale, source_group, last_synced_at, created_at, updated_at
            FROM directory_records
            WHERE tenant_id = $1
            FOR UPDATE
            "#,
        )
        .bind(self.tenant_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("directory_records", e))?;

        rows.iter().map(record_from_row).collect()
    }

    async fn upsert_record(&mut self, record: DirectoryRecord) -> StoreResult<()> {
        if record.tenant_id != self.tenant_id {
            return Err(StoreError::Conflict("record belongs to another tenant".to_string()));
        }
        let attributes = serde_json::to_value(&record.attributes)
            .map_err(|e| StoreError::Backend(format!("failed to encode attributes: {e}")))?;
        sqlx::query(
            r#"
            INSERT INTO directory_records (
                tenant_id, record_id, external_id, display_name, email, attributes, status,
                origin, stale, source_group, last_synced_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (tenant_id, record_id) DO UPDATE SET
                external_id = EXCLUDED.external_id,
                display_name = EXCLUDED.display_name,
                email = EXCLUDED.email,
                attributes = EXCLUDED.attributes,
                status = EXCLUDED.status,
                stale = EXCLUDED.stale,
                source_group = EXCLUDED.source_group,
                last_synced_at = EXCLUDED.last_synced_at,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(record.tenant_id.as_uuid())
        .bind(record.id.as_uuid())
        .bind(&record.external_id)
        .bind(&record.display_name)
        .bind(&record.email)
        .bind(attributes)
        .bind(&record.status)
        .bind(record.origin.as_str())
        .bind(record.stale)
        .bind(&record.source_group)
        .bind(record.last_synced_at)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("upsert_record", e))?;
        Ok(())
    }

    async fn delete_synced_record(&mut self, record_id: DirectoryRecordId) -> StoreResult<bool> {
        let result = sqlx::query(
            "DELETE FROM directory_records WHERE tenant_id = $1 AND record_id = $2 AND origin = 'sync'",
        )
        .bind(self.tenant_id.as_uuid())
        .bind(record_id.as_uuid())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("delete_synced_record", e))?;
        Ok(result.rows_affected() == 1)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }
}
