//! Pattern-driven directory sync.
//!
//! Lists upstream groups (no lock held), keeps those whose display name
//! matches the tenant's selector, and reconciles one directory record per
//! member inside a single directory transaction. Never touches memberships or
//! role grants. Groups it creates get their mapped role resolved like any
//! other group, so later pushed changes grant roles through them.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use forgeops_auth::{Pattern, RoleCatalog};
use forgeops_core::{DirectoryRecordId, TenantId};
use forgeops_events::{AuditEvent, AuditSink};

use crate::collaborators::{ExternalDirectory, RoleCatalogProvider};
use crate::model::{
    DirectoryGroup, DirectoryPerson, DirectoryRecord, ProvisioningGroup, RecordOrigin, SelectorConfig,
};
use crate::store::{DirectoryTransaction, ProvisioningStore, StoreResult};

/// Non-fatal problem with one record or group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncError {
    /// External id of the person or group concerned, if known.
    pub subject: Option<String>,
    pub message: String,
}

impl SyncError {
    fn new(subject: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            subject: subject.map(str::to_string),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub groups_matched: usize,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub flagged_stale: usize,
    /// Upstream persons matching a manually created record.
    pub skipped: usize,
    pub errors: Vec<SyncError>,
}

#[derive(Clone)]
pub struct DirectorySync {
    store: Arc<dyn ProvisioningStore>,
    directory: Arc<dyn ExternalDirectory>,
    catalogs: Arc<dyn RoleCatalogProvider>,
    audit: Arc<dyn AuditSink>,
}

impl DirectorySync {
    pub fn new(
        store: Arc<dyn ProvisioningStore>,
        directory: Arc<dyn ExternalDirectory>,
        catalogs: Arc<dyn RoleCatalogProvider>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            store,
            directory,
            catalogs,
            audit,
        }
    }

    /// Run one sync for the tenant. Problems land in the report; this never
    /// fails as a whole.
    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn run(&self, tenant_id: TenantId) -> SyncReport {
        let mut report = SyncReport::default();
        let now = Utc::now();

        let config = match self.store.selector_config(tenant_id).await {
            Ok(Some(config)) => config,
            Ok(None) => {
                report.errors.push(SyncError::new(None, "no directory selector configured"));
                return self.finish(tenant_id, report, now);
            }
            Err(e) => {
                report.errors.push(SyncError::new(None, format!("loading selector: {e}")));
                return self.finish(tenant_id, report, now);
            }
        };

        let listing = match self.directory.list_groups(tenant_id).await {
            Ok(groups) => groups,
            Err(e) => {
                report.errors.push(SyncError::new(None, format!("listing upstream groups: {e}")));
                return self.finish(tenant_id, report, now);
            }
        };

        let selector = Pattern::compile(&config.selector);
        let matched: Vec<DirectoryGroup> = listing
            .into_iter()
            .filter(|g| selector.is_match(&g.display_name))
            .collect();
        report.groups_matched = matched.len();
        tracing::info!(selector = %config.selector, groups_matched = matched.len(), "directory listing filtered");

        match self.catalogs.role_catalog(tenant_id).await {
            Ok(catalog) => {
                for group in &matched {
                    if let Err(e) = self.refresh_group(tenant_id, group, &catalog, now).await {
                        report
                            .errors
                            .push(SyncError::new(Some(group.external_id.as_str()), format!("refreshing group: {e}")));
                    }
                }
            }
            Err(e) => report
                .errors
                .push(SyncError::new(None, format!("loading role catalog: {e}"))),
        }

        let desired = desired_persons(&matched, &mut report);

        let outcome = match self.store.begin_directory(tenant_id).await {
            Ok(tx) => reconcile_records(tx, tenant_id, &config, &desired, now).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok((counts, deleted)) => {
                report.created = counts.created;
                report.updated = counts.updated;
                report.deleted = counts.deleted;
                report.flagged_stale = counts.flagged_stale;
                report.skipped = counts.skipped;
                report.errors.extend(counts.errors);
                for (record_id, external_id) in deleted {
                    self.audit.record(AuditEvent::DirectoryRecordDeleted {
                        tenant_id,
                        record_id,
                        external_id,
                        occurred_at: now,
                    });
                }
            }
            Err(e) => report
                .errors
                .push(SyncError::new(None, format!("directory transaction failed: {e}"))),
        }

        self.finish(tenant_id, report, now)
    }

    /// Create the provisioning group for a matched upstream group, or stamp
    /// the sync time on the existing one. The external id of an existing
    /// group is left alone and the member count follows membership rows.
    async fn refresh_group(
        &self,
        tenant_id: TenantId,
        group: &DirectoryGroup,
        catalog: &RoleCatalog,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mapped_role_id = catalog.resolve(&group.display_name).map(|role| role.role_id);
        let candidate = ProvisioningGroup::new(
            tenant_id,
            group.display_name.clone(),
            Some(group.external_id.clone()),
            mapped_role_id,
            now,
        );
        let (mut tx, created) = self.store.begin_upsert_group(candidate).await?;
        let members = tx.member_ids().await?;
        let mut stored = tx.group().clone();
        stored.touch(members.len(), now);
        tx.save_group(stored).await?;
        tx.commit().await?;
        tracing::debug!(group = %group.display_name, created, "provisioning group refreshed");
        Ok(())
    }

    fn finish(&self, tenant_id: TenantId, report: SyncReport, now: DateTime<Utc>) -> SyncReport {
        self.audit.record(AuditEvent::DirectorySyncCompleted {
            tenant_id,
            groups_matched: report.groups_matched,
            created: report.created,
            updated: report.updated,
            deleted: report.deleted,
            errors: report.errors.len(),
            occurred_at: now,
        });
        if report.errors.is_empty() {
            tracing::info!(created = report.created, updated = report.updated, deleted = report.deleted, "directory sync finished");
        } else {
            tracing::warn!(errors = report.errors.len(), "directory sync finished with errors");
        }
        report
    }
}

/// One entry per external id across all matched groups; the first group a
/// person appears in is recorded as its source.
fn desired_persons<'a>(
    matched: &'a [DirectoryGroup],
    report: &mut SyncReport,
) -> BTreeMap<&'a str, (&'a DirectoryPerson, &'a str)> {
    let mut desired = BTreeMap::new();
    for group in matched {
        for person in &group.members {
            let external_id = person.external_id.trim();
            if external_id.is_empty() {
                report
                    .errors
                    .push(SyncError::new(Some(group.external_id.as_str()), "member without external id"));
                continue;
            }
            desired
                .entry(external_id)
                .or_insert((person, group.display_name.as_str()));
        }
    }
    desired
}

#[derive(Debug, Default)]
struct RecordCounts {
    created: usize,
    updated: usize,
    deleted: usize,
    flagged_stale: usize,
    skipped: usize,
    errors: Vec<SyncError>,
}

async fn reconcile_records(
    mut tx: Box<dyn DirectoryTransaction>,
    tenant_id: TenantId,
    config: &SelectorConfig,
    desired: &BTreeMap<&str, (&DirectoryPerson, &str)>,
    now: DateTime<Utc>,
) -> StoreResult<(RecordCounts, Vec<(DirectoryRecordId, String)>)> {
    let mut counts = RecordCounts::default();
    let mut deleted = Vec::new();
    let existing: BTreeMap<String, DirectoryRecord> = tx
        .records()
        .await?
        .into_iter()
        .map(|r| (r.external_id.clone(), r))
        .collect();

    for (external_id, (person, source_group)) in desired {
        let fields = match config.field_mapping.apply(person) {
            Ok(fields) => fields,
            Err(message) => {
                counts.errors.push(SyncError::new(Some(*external_id), message));
                continue;
            }
        };

        let record = match existing.get(*external_id) {
            Some(record) if record.origin == RecordOrigin::Manual => {
                counts.skipped += 1;
                continue;
            }
            Some(record) => {
                let mut next = record.clone();
                next.display_name = fields.display_name;
                next.email = fields.email;
                next.attributes = fields.attributes;
                next.source_group = Some(source_group.to_string());
                next.stale = false;

                let changed = next != *record;
                next.last_synced_at = Some(now);
                if !changed {
                    // Persist the sync time only.
                    tx.upsert_record(next).await?;
                    continue;
                }
                next.updated_at = now;
                counts.updated += 1;
                next
            }
            None => {
                counts.created += 1;
                DirectoryRecord {
                    id: DirectoryRecordId::new(),
                    tenant_id,
                    external_id: external_id.to_string(),
                    display_name: fields.display_name,
                    email: fields.email,
                    attributes: fields.attributes,
                    status: config.default_status.clone(),
                    origin: RecordOrigin::Sync,
                    stale: false,
                    source_group: Some(source_group.to_string()),
                    last_synced_at: Some(now),
                    created_at: now,
                    updated_at: now,
                }
            }
        };
        tx.upsert_record(record).await?;
    }

    let present: BTreeSet<&str> = desired.keys().copied().collect();
    for record in existing.values() {
        if !record.is_sync_created() || present.contains(record.external_id.as_str()) {
            continue;
        }
        if config.auto_delete {
            if tx.delete_synced_record(record.id).await? {
                counts.deleted += 1;
                deleted.push((record.id, record.external_id.clone()));
            }
        } else if !record.stale {
            let mut flagged = record.clone();
            flagged.stale = true;
            flagged.updated_at = now;
            tx.upsert_record(flagged).await?;
            counts.flagged_stale += 1;
        }
    }

    tx.commit().await?;
    Ok((counts, deleted))
}

#[cfg(test)]
mod tests {
    use forgeops_events::{Event, InMemoryAuditSink};

    use forgeops_auth::{RoleDescriptor, RoleSelector};
    use forgeops_core::RoleId;

    use super::*;
    use crate::collaborators::{InMemoryExternalDirectory, InMemoryRoleCatalogs};
    use crate::memory::InMemoryProvisioningStore;

    struct Harness {
        tenant: TenantId,
        store: Arc<InMemoryProvisioningStore>,
        upstream: Arc<InMemoryExternalDirectory>,
        catalogs: Arc<InMemoryRoleCatalogs>,
        audit: Arc<InMemoryAuditSink>,
        sync: DirectorySync,
    }

    impl Harness {
        async fn new(config: impl FnOnce(TenantId) -> SelectorConfig) -> Self {
            let tenant = TenantId::new();
            let store = Arc::new(InMemoryProvisioningStore::new());
            let upstream = Arc::new(InMemoryExternalDirectory::new());
            let catalogs = Arc::new(InMemoryRoleCatalogs::new());
            let audit = Arc::new(InMemoryAuditSink::new());
            store.put_selector_config(config(tenant)).await.unwrap();
            let sync = DirectorySync::new(store.clone(), upstream.clone(), catalogs.clone(), audit.clone());
            Self {
                tenant,
                store,
                upstream,
                catalogs,
                audit,
                sync,
            }
        }

        fn upstream(&self, groups: Vec<(&str, Vec<&str>)>) {
            let groups = groups
                .into_iter()
                .map(|(name, members)| DirectoryGroup {
                    external_id: format!("grp-{name}"),
                    display_name: name.to_string(),
                    members: members
                        .into_iter()
                        .map(|id| DirectoryPerson::new(id, format!("Person {id}")))
                        .collect(),
                })
                .collect();
            self.upstream.set_groups(self.tenant, groups);
        }

        async fn records(&self) -> BTreeMap<String, DirectoryRecord> {
            self.store
                .directory_records(self.tenant)
                .await
                .unwrap()
                .into_iter()
                .map(|r| (r.external_id.clone(), r))
                .collect()
        }
    }

    #[tokio::test]
    async fn removed_members_are_flagged_stale_without_auto_delete() {
        let h = Harness::new(|t| SelectorConfig::new(t, "All-Employees")).await;

        h.upstream(vec![("All-Employees", vec!["p1", "p2"]), ("Contractors", vec!["c1"])]);
        let report = h.sync.run(h.tenant).await;
        assert_eq!(report.groups_matched, 1);
        assert_eq!(report.created, 2);
        assert!(report.errors.is_empty());
        assert_eq!(h.records().await.len(), 2);

        h.upstream(vec![("All-Employees", vec!["p2"])]);
        let report = h.sync.run(h.tenant).await;
        assert_eq!(report.deleted, 0);
        assert_eq!(report.flagged_stale, 1);

        let records = h.records().await;
        assert!(records["p1"].stale);
        assert!(!records["p2"].stale);
    }

    #[tokio::test]
    async fn removed_members_are_deleted_with_auto_delete() {
        let h = Harness::new(|t| SelectorConfig::new(t, "All-Employees").with_auto_delete(true)).await;

        h.upstream(vec![("All-Employees", vec!["p1", "p2"])]);
        h.sync.run(h.tenant).await;

        h.upstream(vec![("All-Employees", vec!["p2"])]);
        let report = h.sync.run(h.tenant).await;
        assert_eq!(report.deleted, 1);

        let records = h.records().await;
        assert!(!records.contains_key("p1"));
        assert!(records.contains_key("p2"));
        assert_eq!(h.audit.of_type("directory.record.deleted").len(), 1);
    }

    #[tokio::test]
    async fn reappearing_person_clears_stale_flag_and_updates() {
        let h = Harness::new(|t| SelectorConfig::new(t, "Dept-*-Employees")).await;

        h.upstream(vec![("Dept-HR-Employees", vec!["p1"])]);
        h.sync.run(h.tenant).await;
        h.upstream(vec![]);
        h.sync.run(h.tenant).await;
        assert!(h.records().await["p1"].stale);

        h.upstream(vec![("Dept-IT-Employees", vec!["p1"])]);
        let report = h.sync.run(h.tenant).await;
        assert_eq!(report.updated, 1);
        let records = h.records().await;
        let record = &records["p1"];
        assert!(!record.stale);
        assert_eq!(record.source_group.as_deref(), Some("Dept-IT-Employees"));
    }

    #[tokio::test]
    async fn manual_records_are_never_touched() {
        let h = Harness::new(|t| SelectorConfig::new(t, "*-Staff").with_auto_delete(true)).await;
        let manual = DirectoryRecord::manual(h.tenant, "p1", "Hand Made", "on_leave", Utc::now());
        let mut tx = h.store.begin_directory(h.tenant).await.unwrap();
        tx.upsert_record(manual.clone()).await.unwrap();
        tx.commit().await.unwrap();

        h.upstream(vec![("Ops-Staff", vec!["p1"])]);
        let report = h.sync.run(h.tenant).await;
        assert_eq!(report.skipped, 1);
        assert_eq!(report.created, 0);
        assert_eq!(h.records().await["p1"], manual);

        h.upstream(vec![]);
        let report = h.sync.run(h.tenant).await;
        assert_eq!(report.deleted, 0);
        assert_eq!(h.records().await["p1"], manual);
    }

    #[tokio::test]
    async fn per_record_errors_do_not_abort_the_run() {
        let h = Harness::new(|t| SelectorConfig::new(t, "Employees-*")).await;
        h.upstream(vec![("Employees-UK", vec!["", "p1"]), ("UK-Employees", vec!["p9"])]);

        let report = h.sync.run(h.tenant).await;
        assert_eq!(report.groups_matched, 1);
        assert_eq!(report.created, 1);
        assert_eq!(report.errors.len(), 1);
        assert!(h.records().await.contains_key("p1"));
    }

    #[tokio::test]
    async fn new_records_take_default_status_and_groups_are_refreshed() {
        let h = Harness::new(|t| {
            let mut config = SelectorConfig::new(t, "All-Employees");
            config.default_status = "pending".into();
            config
        })
        .await;
        h.upstream(vec![("all-employees", vec!["p1", "p2", "p2"])]);

        let report = h.sync.run(h.tenant).await;
        assert_eq!(report.created, 2);
        assert!(h.records().await.values().all(|r| r.status == "pending"));

        let group = h
            .store
            .find_group_by_name(h.tenant, "All-Employees")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(group.external_id.as_deref(), Some("grp-all-employees"));
        assert!(group.last_synced_at.is_some());
        assert!(h.store.members(h.tenant, group.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn created_groups_carry_their_resolved_role() {
        let h = Harness::new(|t| SelectorConfig::new(t, "*")).await;
        let admins = RoleId::new();
        h.catalogs.set(
            h.tenant,
            RoleCatalog::new(vec![RoleDescriptor::new(
                admins,
                "Admins",
                RoleSelector::Pattern("*-Admins".into()),
            )]),
        );
        h.upstream(vec![("Org-Admins", vec!["p1", "p2"]), ("Staff", vec!["p3"])]);

        let report = h.sync.run(h.tenant).await;
        assert!(report.errors.is_empty());

        let admins_group = h.store.find_group_by_name(h.tenant, "Org-Admins").await.unwrap().unwrap();
        assert_eq!(admins_group.mapped_role_id, Some(admins));
        assert_eq!(admins_group.member_count, 0);
        let staff = h.store.find_group_by_name(h.tenant, "Staff").await.unwrap().unwrap();
        assert_eq!(staff.mapped_role_id, None);
    }

    #[tokio::test]
    async fn existing_group_keeps_external_id_and_member_count() {
        let h = Harness::new(|t| SelectorConfig::new(t, "All-Employees")).await;
        let mut existing = ProvisioningGroup::new(h.tenant, "All-Employees", Some("scim-ext".into()), None, Utc::now());
        existing.member_count = 7;
        let (tx, _) = h.store.begin_upsert_group(existing).await.unwrap();
        let gid = tx.group().id;
        tx.commit().await.unwrap();

        h.upstream(vec![("All-Employees", vec!["p1", "p2", "p3"])]);
        h.sync.run(h.tenant).await;

        let group = h.store.find_group(h.tenant, gid).await.unwrap().unwrap();
        assert_eq!(group.external_id.as_deref(), Some("scim-ext"));
        // Follows membership rows, of which there are none.
        assert_eq!(group.member_count, 0);
        assert!(group.last_synced_at.is_some());
    }

    #[tokio::test]
    async fn missing_selector_is_reported_not_thrown() {
        let store = Arc::new(InMemoryProvisioningStore::new());
        let audit = Arc::new(InMemoryAuditSink::new());
        let sync = DirectorySync::new(
            store,
            Arc::new(InMemoryExternalDirectory::new()),
            Arc::new(InMemoryRoleCatalogs::new()),
            audit.clone(),
        );

        let report = sync.run(TenantId::new()).await;
        assert_eq!(report.errors.len(), 1);
        assert_eq!(audit.of_type("directory.sync.completed").len(), 1);
    }

    #[tokio::test]
    async fn failed_commit_reports_and_applies_nothing() {
        let h = Harness::new(|t| SelectorConfig::new(t, "All-Employees")).await;
        h.upstream(vec![("All-Employees", vec!["p1"])]);
        h.store.fail_commits(true);

        let report = h.sync.run(h.tenant).await;
        assert_eq!(report.created, 0);
        assert!(!report.errors.is_empty());
        assert!(h.records().await.is_empty());
    }

    #[test]
    fn sync_completed_event_type() {
        let event = AuditEvent::DirectorySyncCompleted {
            tenant_id: TenantId::new(),
            groups_matched: 1,
            created: 1,
            updated: 0,
            deleted: 0,
            errors: 0,
            occurred_at: Utc::now(),
        };
        assert_eq!(event.event_type(), "directory.sync.completed");
    }
}
