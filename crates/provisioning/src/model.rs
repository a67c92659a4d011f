//! Persisted provisioning state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use forgeops_core::{DirectoryRecordId, GroupId, RoleId, TenantId};

/// One upstream group as known to a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningGroup {
    pub id: GroupId,
    pub tenant_id: TenantId,
    pub display_name: String,
    /// Opaque identifier assigned by the upstream directory.
    pub external_id: Option<String>,
    pub mapped_role_id: Option<RoleId>,
    pub member_count: u32,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProvisioningGroup {
    pub fn new(
        tenant_id: TenantId,
        display_name: impl Into<String>,
        external_id: Option<String>,
        mapped_role_id: Option<RoleId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: GroupId::new(),
            tenant_id,
            display_name: display_name.into(),
            external_id,
            mapped_role_id,
            member_count: 0,
            last_synced_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Case-insensitive display name comparison used for idempotent create and
    /// `displayName eq` filtering.
    pub fn has_name(&self, display_name: &str) -> bool {
        self.display_name.to_lowercase() == display_name.to_lowercase()
    }

    /// Stamp a completed reconciliation.
    pub fn touch(&mut self, member_count: usize, now: DateTime<Utc>) {
        self.member_count = u32::try_from(member_count).unwrap_or(u32::MAX);
        self.last_synced_at = Some(now);
        self.updated_at = now;
    }
}

/// Who created a directory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOrigin {
    /// Created by an operator; the directory sync never changes it.
    Manual,
    /// Created by the directory sync; eligible for update and auto-deletion.
    Sync,
}

impl RecordOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordOrigin::Manual => "manual",
            RecordOrigin::Sync => "sync",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "manual" => Some(RecordOrigin::Manual),
            "sync" => Some(RecordOrigin::Sync),
            _ => None,
        }
    }
}

/// A synced person/profile (a business record, not an authorization grant).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryRecord {
    pub id: DirectoryRecordId,
    pub tenant_id: TenantId,
    pub external_id: String,
    pub display_name: String,
    pub email: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    pub status: String,
    pub origin: RecordOrigin,
    /// Set when a sync-created record's person left every matched group and
    /// auto-deletion is off.
    pub stale: bool,
    /// Upstream group the record was last seen in.
    pub source_group: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DirectoryRecord {
    pub fn manual(
        tenant_id: TenantId,
        external_id: impl Into<String>,
        display_name: impl Into<String>,
        status: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: DirectoryRecordId::new(),
            tenant_id,
            external_id: external_id.into(),
            display_name: display_name.into(),
            email: None,
            attributes: BTreeMap::new(),
            status: status.into(),
            origin: RecordOrigin::Manual,
            stale: false,
            source_group: None,
            last_synced_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_sync_created(&self) -> bool {
        self.origin == RecordOrigin::Sync
    }
}

/// Tenant configuration for the pattern-driven directory sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorConfig {
    pub tenant_id: TenantId,
    /// Wildcard pattern selecting upstream groups (e.g. `Dept-*-Employees`).
    pub selector: String,
    /// Delete sync-created records whose person left the matched groups.
    /// When off they are kept and flagged stale.
    #[serde(default)]
    pub auto_delete: bool,
    /// Status assigned to newly created records.
    #[serde(default = "default_status")]
    pub default_status: String,
    #[serde(default)]
    pub field_mapping: FieldMapping,
}

fn default_status() -> String {
    "active".to_string()
}

impl SelectorConfig {
    pub fn new(tenant_id: TenantId, selector: impl Into<String>) -> Self {
        Self {
            tenant_id,
            selector: selector.into(),
            auto_delete: false,
            default_status: default_status(),
            field_mapping: FieldMapping::default(),
        }
    }

    pub fn with_auto_delete(mut self, auto_delete: bool) -> Self {
        self.auto_delete = auto_delete;
        self
    }
}

/// Upstream person as returned by the external directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryPerson {
    pub external_id: String,
    pub display_name: String,
    pub email: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl DirectoryPerson {
    pub fn new(external_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            display_name: display_name.into(),
            email: None,
            attributes: BTreeMap::new(),
        }
    }

    /// Look up an upstream attribute by name. `displayName` and `mail`/`email`
    /// address the first-class fields.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        match name {
            "displayName" => Some(self.display_name.as_str()),
            "mail" | "email" => self.email.as_deref(),
            "id" | "externalId" => Some(self.external_id.as_str()),
            other => self.attributes.get(other).map(String::as_str),
        }
    }
}

/// Upstream group with its members, as listed by the external directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryGroup {
    pub external_id: String,
    pub display_name: String,
    #[serde(default)]
    pub members: Vec<DirectoryPerson>,
}

/// Maps upstream attributes onto directory record fields.
///
/// Keys are record fields (`display_name`, `email`, or any custom attribute
/// name), values are upstream attribute names. Unmapped records take the
/// upstream display name and email as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldMapping(pub BTreeMap<String, String>);

/// Field values produced by applying a [`FieldMapping`] to a person.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedFields {
    pub display_name: String,
    pub email: Option<String>,
    pub attributes: BTreeMap<String, String>,
}

impl FieldMapping {
    /// Map `person` into record fields.
    ///
    /// Fails if a mapped upstream attribute is absent or the resulting display
    /// name is blank.
    pub fn apply(&self, person: &DirectoryPerson) -> Result<MappedFields, String> {
        let mut fields = MappedFields {
            display_name: person.display_name.clone(),
            email: person.email.clone(),
            attributes: BTreeMap::new(),
        };

        for (field, source) in &self.0 {
            let value = person
                .attribute(source)
                .ok_or_else(|| format!("upstream attribute '{source}' missing for '{field}'"))?
                .to_string();

            match field.as_str() {
                "display_name" => fields.display_name = value,
                "email" => fields.email = Some(value),
                _ => {
                    fields.attributes.insert(field.clone(), value);
                }
            }
        }

        if fields.display_name.trim().is_empty() {
            return Err("display name is empty".to_string());
        }

        Ok(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_names_compare_case_insensitively() {
        let g = ProvisioningGroup::new(TenantId::new(), "Org-Admins", None, None, Utc::now());
        assert!(g.has_name("org-admins"));
        assert!(!g.has_name("Org-Admin"));
    }

    #[test]
    fn touch_updates_count_and_sync_time() {
        let now = Utc::now();
        let mut g = ProvisioningGroup::new(TenantId::new(), "G", None, None, now);
        g.touch(3, now);
        assert_eq!(g.member_count, 3);
        assert_eq!(g.last_synced_at, Some(now));
    }

    #[test]
    fn field_mapping_defaults_to_person_fields() {
        let mut person = DirectoryPerson::new("p1", "Pat One");
        person.email = Some("pat@example.com".into());
        let fields = FieldMapping::default().apply(&person).unwrap();
        assert_eq!(fields.display_name, "Pat One");
        assert_eq!(fields.email.as_deref(), Some("pat@example.com"));
        assert!(fields.attributes.is_empty());
    }

    #[test]
    fn field_mapping_routes_attributes() {
        let mut person = DirectoryPerson::new("p1", "Pat One");
        person.attributes.insert("department".into(), "HR".into());
        person.attributes.insert("upn".into(), "pat@corp".into());

        let mapping = FieldMapping(BTreeMap::from([
            ("email".to_string(), "upn".to_string()),
            ("dept".to_string(), "department".to_string()),
        ]));
        let fields = mapping.apply(&person).unwrap();
        assert_eq!(fields.email.as_deref(), Some("pat@corp"));
        assert_eq!(fields.attributes.get("dept").map(String::as_str), Some("HR"));
    }

    #[test]
    fn field_mapping_rejects_missing_attribute_and_blank_name() {
        let person = DirectoryPerson::new("p1", "Pat");
        let mapping = FieldMapping(BTreeMap::from([("dept".to_string(), "department".to_string())]));
        assert!(mapping.apply(&person).is_err());

        let blank = DirectoryPerson::new("p2", "  ");
        assert!(FieldMapping::default().apply(&blank).is_err());
    }

    #[test]
    fn selector_config_defaults() {
        let json = serde_json::json!({
            "tenant_id": TenantId::new(),
            "selector": "All-Employees"
        });
        let config: SelectorConfig = serde_json::from_value(json).unwrap();
        assert!(!config.auto_delete);
        assert_eq!(config.default_status, "active");
        assert!(config.field_mapping.0.is_empty());
    }
}
