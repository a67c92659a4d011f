//! In-memory [`ProvisioningStore`] for tests/dev.
//!
//! Each group and each tenant's directory has a `tokio` mutex standing in for
//! the row lock a relational store would take. Transactions stage their
//! writes and publish them in one step on commit.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use forgeops_auth::RoleGrant;
use forgeops_core::{DirectoryRecordId, GroupId, RoleId, TenantId, UserId};

use crate::model::{DirectoryRecord, ProvisioningGroup, SelectorConfig};
use crate::store::{DirectoryTransaction, GroupTransaction, ProvisioningStore, StoreError, StoreResult};

type GroupKey = (TenantId, GroupId);
type LockMap<K> = Mutex<HashMap<K, Arc<AsyncMutex<()>>>>;

#[derive(Debug, Default)]
struct State {
    groups: HashMap<GroupKey, ProvisioningGroup>,
    members: HashMap<GroupKey, BTreeSet<UserId>>,
    grants: Vec<RoleGrant>,
    selector_configs: HashMap<TenantId, SelectorConfig>,
    records: HashMap<TenantId, BTreeMap<DirectoryRecordId, DirectoryRecord>>,
}

#[derive(Debug, Default)]
pub struct InMemoryProvisioningStore {
    state: Arc<RwLock<State>>,
    group_locks: LockMap<GroupKey>,
    name_locks: LockMap<(TenantId, String)>,
    directory_locks: LockMap<TenantId>,
    fail_commits: Arc<AtomicBool>,
}

impl InMemoryProvisioningStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent commit fail with a backend error (outage drills).
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|_| poisoned())
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|_| poisoned())
    }

    fn group_tx(
        &self,
        guards: Vec<OwnedMutexGuard<()>>,
        group: ProvisioningGroup,
        members: BTreeSet<UserId>,
        grants: Vec<RoleGrant>,
    ) -> Box<dyn GroupTransaction> {
        Box::new(MemoryGroupTransaction {
            state: Arc::clone(&self.state),
            fail_commits: Arc::clone(&self.fail_commits),
            _guards: guards,
            group,
            members,
            grants,
            deleted: false,
        })
    }

    /// Committed state of one group: row, members and its sync grants.
    fn snapshot(&self, key: GroupKey) -> StoreResult<Option<(ProvisioningGroup, BTreeSet<UserId>, Vec<RoleGrant>)>> {
        let state = self.read()?;
        let Some(group) = state.groups.get(&key).cloned() else {
            return Ok(None);
        };
        let members = state.members.get(&key).cloned().unwrap_or_default();
        let grants = state
            .grants
            .iter()
            .filter(|g| g.tenant_id == key.0 && g.revocable_by(key.1))
            .cloned()
            .collect();
        Ok(Some((group, members, grants)))
    }
}

fn poisoned() -> StoreError {
    StoreError::Backend("in-memory state lock poisoned".to_string())
}

/// Per-key lock. Entries nobody holds or waits on (the map owns the only
/// `Arc`) are dropped on the way, so the map tracks live keys only.
fn lock_for<K: Eq + Hash>(locks: &LockMap<K>, key: K) -> StoreResult<Arc<AsyncMutex<()>>> {
    let mut locks = locks.lock().map_err(|_| poisoned())?;
    locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    Ok(Arc::clone(locks.entry(key).or_default()))
}

#[async_trait]
impl ProvisioningStore for InMemoryProvisioningStore {
    async fn find_group(&self, tenant_id: TenantId, group_id: GroupId) -> StoreResult<Option<ProvisioningGroup>> {
        Ok(self.read()?.groups.get(&(tenant_id, group_id)).cloned())
    }

    async fn find_group_by_name(
        &self,
        tenant_id: TenantId,
        display_name: &str,
    ) -> StoreResult<Option<ProvisioningGroup>> {
        let state = self.read()?;
        let mut found: Vec<&ProvisioningGroup> = state
            .groups
            .values()
            .filter(|g| g.tenant_id == tenant_id && g.has_name(display_name))
            .collect();
        // Oldest wins if a rename produced duplicates.
        found.sort_by_key(|g| (g.created_at, g.id));
        Ok(found.first().map(|g| (*g).clone()))
    }

    async fn list_groups(&self, tenant_id: TenantId) -> StoreResult<Vec<ProvisioningGroup>> {
        let state = self.read()?;
        let mut groups: Vec<ProvisioningGroup> = state
            .groups
            .values()
            .filter(|g| g.tenant_id == tenant_id)
            .cloned()
            .collect();
        groups.sort_by(|a, b| {
            a.display_name
                .to_lowercase()
                .cmp(&b.display_name.to_lowercase())
                .then(a.id.cmp(&b.id))
        });
        Ok(groups)
    }

    async fn members(&self, tenant_id: TenantId, group_id: GroupId) -> StoreResult<Vec<UserId>> {
        let state = self.read()?;
        Ok(state
            .members
            .get(&(tenant_id, group_id))
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn grants_for(&self, tenant_id: TenantId, principal_id: UserId) -> StoreResult<Vec<RoleGrant>> {
        let state = self.read()?;
        Ok(state
            .grants
            .iter()
            .filter(|g| g.tenant_id == tenant_id && g.principal_id == principal_id)
            .cloned()
            .collect())
    }

    async fn insert_manual_grant(
        &self,
        tenant_id: TenantId,
        principal_id: UserId,
        role_id: RoleId,
        granted_at: DateTime<Utc>,
    ) -> StoreResult<RoleGrant> {
        let grant = RoleGrant::manual(tenant_id, principal_id, role_id, granted_at);
        let mut state = self.write()?;
        if let Some(existing) = state.grants.iter().find(|g| g.key() == grant.key()) {
            return Ok(existing.clone());
        }
        state.grants.push(grant.clone());
        Ok(grant)
    }

    async fn begin_group(&self, tenant_id: TenantId, group_id: GroupId) -> StoreResult<Box<dyn GroupTransaction>> {
        let key = (tenant_id, group_id);
        let guard = lock_for(&self.group_locks, key)?.lock_owned().await;
        let (group, members, grants) = self
            .snapshot(key)?
            .ok_or_else(|| StoreError::NotFound(format!("group {group_id}")))?;
        Ok(self.group_tx(vec![guard], group, members, grants))
    }

    async fn begin_upsert_group(
        &self,
        candidate: ProvisioningGroup,
    ) -> StoreResult<(Box<dyn GroupTransaction>, bool)> {
        let tenant_id = candidate.tenant_id;
        let name_key = (tenant_id, candidate.display_name.to_lowercase());
        let name_guard = lock_for(&self.name_locks, name_key)?.lock_owned().await;

        if let Some(existing) = self.find_group_by_name(tenant_id, &candidate.display_name).await? {
            let key = (tenant_id, existing.id);
            let guard = lock_for(&self.group_locks, key)?.lock_owned().await;
            if let Some((group, members, grants)) = self.snapshot(key)? {
                return Ok((self.group_tx(vec![name_guard, guard], group, members, grants), false));
            }
        }

        let guard = lock_for(&self.group_locks, (tenant_id, candidate.id))?
            .lock_owned()
            .await;
        let tx = self.group_tx(vec![name_guard, guard], candidate, BTreeSet::new(), Vec::new());
        Ok((tx, true))
    }

    async fn selector_config(&self, tenant_id: TenantId) -> StoreResult<Option<SelectorConfig>> {
        Ok(self.read()?.selector_configs.get(&tenant_id).cloned())
    }

    async fn put_selector_config(&self, config: SelectorConfig) -> StoreResult<()> {
        self.write()?.selector_configs.insert(config.tenant_id, config);
        Ok(())
    }

    async fn directory_records(&self, tenant_id: TenantId) -> StoreResult<Vec<DirectoryRecord>> {
        let state = self.read()?;
        Ok(state
            .records
            .get(&tenant_id)
            .map(|r| r.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn begin_directory(&self, tenant_id: TenantId) -> StoreResult<Box<dyn DirectoryTransaction>> {
        let guard = lock_for(&self.directory_locks, tenant_id)?.lock_owned().await;
        let records = self.read()?.records.get(&tenant_id).cloned().unwrap_or_default();
        Ok(Box::new(MemoryDirectoryTransaction {
            state: Arc::clone(&self.state),
            fail_commits: Arc::clone(&self.fail_commits),
            _guard: guard,
            tenant_id,
            records,
        }))
    }
}

struct MemoryGroupTransaction {
    state: Arc<RwLock<State>>,
    fail_commits: Arc<AtomicBool>,
    _guards: Vec<OwnedMutexGuard<()>>,
    group: ProvisioningGroup,
    members: BTreeSet<UserId>,
    /// This group's sync grants.
    grants: Vec<RoleGrant>,
    deleted: bool,
}

#[async_trait]
impl GroupTransaction for MemoryGroupTransaction {
    fn group(&self) -> &ProvisioningGroup {
        &self.group
    }

    async fn member_ids(&mut self) -> StoreResult<BTreeSet<UserId>> {
        Ok(self.members.clone())
    }

    async fn insert_member(&mut self, principal_id: UserId) -> StoreResult<bool> {
        Ok(self.members.insert(principal_id))
    }

    async fn delete_member(&mut self, principal_id: UserId) -> StoreResult<bool> {
        Ok(self.members.remove(&principal_id))
    }

    async fn insert_sync_grant(
        &mut self,
        principal_id: UserId,
        role_id: RoleId,
        granted_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let exists = self
            .grants
            .iter()
            .any(|g| g.principal_id == principal_id && g.role_id == role_id);
        if exists {
            return Ok(false);
        }
        self.grants.push(RoleGrant::synced(
            self.group.tenant_id,
            principal_id,
            role_id,
            self.group.id,
            granted_at,
        ));
        Ok(true)
    }

    async fn delete_sync_grants(&mut self, principal_id: UserId) -> StoreResult<Vec<RoleId>> {
        let mut revoked = Vec::new();
        self.grants.retain(|g| {
            if g.principal_id == principal_id {
                revoked.push(g.role_id);
                false
            } else {
                true
            }
        });
        Ok(revoked)
    }

    async fn save_group(&mut self, group: ProvisioningGroup) -> StoreResult<()> {
        if group.id != self.group.id || group.tenant_id != self.group.tenant_id {
            return Err(StoreError::Conflict("group identity is immutable".to_string()));
        }
        self.group = group;
        Ok(())
    }

    async fn delete_group(&mut self) -> StoreResult<()> {
        self.members.clear();
        self.grants.clear();
        self.deleted = true;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("commit rejected".to_string()));
        }

        let tx = *self;
        let key = (tx.group.tenant_id, tx.group.id);
        let mut state = tx.state.write().map_err(|_| poisoned())?;

        state.grants.retain(|g| !(g.tenant_id == key.0 && g.revocable_by(key.1)));

        if tx.deleted {
            state.groups.remove(&key);
            state.members.remove(&key);
        } else {
            state.groups.insert(key, tx.group);
            state.members.insert(key, tx.members);
            state.grants.extend(tx.grants);
        }
        Ok(())
    }
}

struct MemoryDirectoryTransaction {
    state: Arc<RwLock<State>>,
    fail_commits: Arc<AtomicBool>,
    _guard: OwnedMutexGuard<()>,
    tenant_id: TenantId,
    records: BTreeMap<DirectoryRecordId, DirectoryRecord>,
}

#[async_trait]
impl DirectoryTransaction for MemoryDirectoryTransaction {
    async fn records(&mut self) -> StoreResult<Vec<DirectoryRecord>> {
        Ok(self.records.values().cloned().collect())
    }

    async fn upsert_record(&mut self, record: DirectoryRecord) -> StoreResult<()> {
        if record.tenant_id != self.tenant_id {
            return Err(StoreError::Conflict("record belongs to another tenant".to_string()));
        }
        self.records.insert(record.id, record);
        Ok(())
    }

    async fn delete_synced_record(&mut self, record_id: DirectoryRecordId) -> StoreResult<bool> {
        match self.records.get(&record_id) {
            Some(record) if record.is_sync_created() => {
                self.records.remove(&record_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("commit rejected".to_string()));
        }
        let tx = *self;
        let mut state = tx.state.write().map_err(|_| poisoned())?;
        state.records.insert(tx.tenant_id, tx.records);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn group(tenant_id: TenantId, name: &str) -> ProvisioningGroup {
        ProvisioningGroup::new(tenant_id, name, None, None, Utc::now())
    }

    #[tokio::test]
    async fn upsert_is_idempotent_by_name() {
        let store = InMemoryProvisioningStore::new();
        let tenant = TenantId::new();

        let (tx, created) = store.begin_upsert_group(group(tenant, "Org-Admins")).await.unwrap();
        let id = tx.group().id;
        assert!(created);
        tx.commit().await.unwrap();

        let (tx, created) = store.begin_upsert_group(group(tenant, "org-admins")).await.unwrap();
        assert!(!created);
        assert_eq!(tx.group().id, id);
        drop(tx);

        assert_eq!(store.list_groups(tenant).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn idle_lock_entries_are_pruned() {
        let store = InMemoryProvisioningStore::new();
        let tenant = TenantId::new();

        for i in 0..50 {
            let (tx, _) = store.begin_upsert_group(group(tenant, &format!("G-{i}"))).await.unwrap();
            let id = tx.group().id;
            tx.commit().await.unwrap();

            let mut tx = store.begin_group(tenant, id).await.unwrap();
            tx.delete_group().await.unwrap();
            tx.commit().await.unwrap();
        }

        assert!(store.list_groups(tenant).await.unwrap().is_empty());
        assert!(store.name_locks.lock().unwrap().len() <= 1);
        assert!(store.group_locks.lock().unwrap().len() <= 1);
    }

    #[tokio::test]
    async fn dropped_transaction_discards_writes() {
        let store = InMemoryProvisioningStore::new();
        let tenant = TenantId::new();
        let (tx, _) = store.begin_upsert_group(group(tenant, "G")).await.unwrap();
        let id = tx.group().id;
        tx.commit().await.unwrap();

        let user = UserId::new();
        let mut tx = store.begin_group(tenant, id).await.unwrap();
        tx.insert_member(user).await.unwrap();
        tx.insert_sync_grant(user, RoleId::new(), Utc::now()).await.unwrap();
        drop(tx);

        assert!(store.members(tenant, id).await.unwrap().is_empty());
        assert!(store.grants_for(tenant, user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn group_transactions_serialize() {
        let store = Arc::new(InMemoryProvisioningStore::new());
        let tenant = TenantId::new();
        let (tx, _) = store.begin_upsert_group(group(tenant, "G")).await.unwrap();
        let id = tx.group().id;
        tx.commit().await.unwrap();

        let first = store.begin_group(tenant, id).await.unwrap();
        let second = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.begin_group(tenant, id).await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!second.is_finished());

        drop(first);
        second.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn commit_leaves_manual_and_foreign_grants_alone() {
        let store = InMemoryProvisioningStore::new();
        let tenant = TenantId::new();
        let user = UserId::new();
        let role = RoleId::new();

        let (tx, _) = store.begin_upsert_group(group(tenant, "A")).await.unwrap();
        let a = tx.group().id;
        tx.commit().await.unwrap();
        let (tx, _) = store.begin_upsert_group(group(tenant, "B")).await.unwrap();
        let b = tx.group().id;
        tx.commit().await.unwrap();

        store.insert_manual_grant(tenant, user, role, Utc::now()).await.unwrap();
        for gid in [a, b] {
            let mut tx = store.begin_group(tenant, gid).await.unwrap();
            tx.insert_member(user).await.unwrap();
            tx.insert_sync_grant(user, role, Utc::now()).await.unwrap();
            tx.commit().await.unwrap();
        }
        assert_eq!(store.grants_for(tenant, user).await.unwrap().len(), 3);

        let mut tx = store.begin_group(tenant, a).await.unwrap();
        tx.delete_group().await.unwrap();
        tx.commit().await.unwrap();

        let remaining = store.grants_for(tenant, user).await.unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().any(|g| g.source.is_manual()));
        assert!(remaining.iter().any(|g| g.source.origin_group() == Some(b)));
        assert!(store.find_group(tenant, a).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn manual_directory_records_cannot_be_deleted() {
        let store = InMemoryProvisioningStore::new();
        let tenant = TenantId::new();
        let record = DirectoryRecord::manual(tenant, "p1", "Pat", "active", Utc::now());
        let id = record.id;

        let mut tx = store.begin_directory(tenant).await.unwrap();
        tx.upsert_record(record).await.unwrap();
        assert!(!tx.delete_synced_record(id).await.unwrap());
        tx.commit().await.unwrap();

        assert_eq!(store.directory_records(tenant).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_commit_publishes_nothing() {
        let store = InMemoryProvisioningStore::new();
        let tenant = TenantId::new();
        store.fail_commits(true);
        let (tx, _) = store.begin_upsert_group(group(tenant, "G")).await.unwrap();
        assert!(matches!(tx.commit().await, Err(StoreError::Backend(_))));
        assert!(store.list_groups(tenant).await.unwrap().is_empty());
    }
}
