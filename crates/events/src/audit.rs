//! Audit trail for provisioning side effects.
//!
//! Recording is fire-and-forget: sinks never fail the operation that emitted
//! the event.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use forgeops_core::{DirectoryRecordId, GroupId, RoleId, TenantId, UserId};

use crate::event::Event;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    GroupCreated {
        tenant_id: TenantId,
        group_id: GroupId,
        display_name: String,
        occurred_at: DateTime<Utc>,
    },
    GroupRenamed {
        tenant_id: TenantId,
        group_id: GroupId,
        from: String,
        to: String,
        occurred_at: DateTime<Utc>,
    },
    GroupDeleted {
        tenant_id: TenantId,
        group_id: GroupId,
        occurred_at: DateTime<Utc>,
    },
    MemberAdded {
        tenant_id: TenantId,
        group_id: GroupId,
        principal_id: UserId,
        occurred_at: DateTime<Utc>,
    },
    MemberRemoved {
        tenant_id: TenantId,
        group_id: GroupId,
        principal_id: UserId,
        occurred_at: DateTime<Utc>,
    },
    RoleGranted {
        tenant_id: TenantId,
        principal_id: UserId,
        role_id: RoleId,
        origin_group: GroupId,
        occurred_at: DateTime<Utc>,
    },
    RoleRevoked {
        tenant_id: TenantId,
        principal_id: UserId,
        role_id: RoleId,
        origin_group: GroupId,
        occurred_at: DateTime<Utc>,
    },
    DirectoryRecordDeleted {
        tenant_id: TenantId,
        record_id: DirectoryRecordId,
        external_id: String,
        occurred_at: DateTime<Utc>,
    },
    DirectorySyncCompleted {
        tenant_id: TenantId,
        groups_matched: usize,
        created: usize,
        updated: usize,
        deleted: usize,
        errors: usize,
        occurred_at: DateTime<Utc>,
    },
}

impl AuditEvent {
    pub fn tenant_id(&self) -> TenantId {
        match self {
            AuditEvent::GroupCreated { tenant_id, .. }
            | AuditEvent::GroupRenamed { tenant_id, .. }
            | AuditEvent::GroupDeleted { tenant_id, .. }
            | AuditEvent::MemberAdded { tenant_id, .. }
            | AuditEvent::MemberRemoved { tenant_id, .. }
            | AuditEvent::RoleGranted { tenant_id, .. }
            | AuditEvent::RoleRevoked { tenant_id, .. }
            | AuditEvent::DirectoryRecordDeleted { tenant_id, .. }
            | AuditEvent::DirectorySyncCompleted { tenant_id, .. } => *tenant_id,
        }
    }
}

impl Event for AuditEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AuditEvent::GroupCreated { .. } => "provisioning.group.created",
            AuditEvent::GroupRenamed { .. } => "provisioning.group.renamed",
            AuditEvent::GroupDeleted { .. } => "provisioning.group.deleted",
            AuditEvent::MemberAdded { .. } => "provisioning.member.added",
            AuditEvent::MemberRemoved { .. } => "provisioning.member.removed",
            AuditEvent::RoleGranted { .. } => "provisioning.role.granted",
            AuditEvent::RoleRevoked { .. } => "provisioning.role.revoked",
            AuditEvent::DirectoryRecordDeleted { .. } => "directory.record.deleted",
            AuditEvent::DirectorySyncCompleted { .. } => "directory.sync.completed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            AuditEvent::GroupCreated { occurred_at, .. }
            | AuditEvent::GroupRenamed { occurred_at, .. }
            | AuditEvent::GroupDeleted { occurred_at, .. }
            | AuditEvent::MemberAdded { occurred_at, .. }
            | AuditEvent::MemberRemoved { occurred_at, .. }
            | AuditEvent::RoleGranted { occurred_at, .. }
            | AuditEvent::RoleRevoked { occurred_at, .. }
            | AuditEvent::DirectoryRecordDeleted { occurred_at, .. }
            | AuditEvent::DirectorySyncCompleted { occurred_at, .. } => *occurred_at,
        }
    }
}

/// Audit-logging sink.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

impl<S> AuditSink for Arc<S>
where
    S: AuditSink + ?Sized,
{
    fn record(&self, event: AuditEvent) {
        (**self).record(event)
    }
}

/// Writes audit events to the structured log under the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        match serde_json::to_string(&event) {
            Ok(payload) => tracing::info!(
                target: "audit",
                event_type = event.event_type(),
                version = event.version(),
                tenant_id = %event.tenant_id(),
                occurred_at = %event.occurred_at(),
                payload = %payload,
                "audit event"
            ),
            Err(e) => tracing::warn!(target: "audit", error = %e, "audit event not serializable"),
        }
    }
}

/// In-memory sink for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Events of one type, in recording order.
    pub fn of_type(&self, event_type: &str) -> Vec<AuditEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.event_type() == event_type)
            .collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
