//! SCIM 2.0 wire representations (RFC 7643/7644) and mapping from the
//! provisioning domain.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use forgeops_core::TenantId;
use forgeops_provisioning::GroupSnapshot;

pub const GROUP_SCHEMA: &str = "urn:ietf:params:scim:schemas:core:2.0:Group";
pub const LIST_RESPONSE_SCHEMA: &str = "urn:ietf:params:scim:api:messages:2.0:ListResponse";
pub const PATCH_OP_SCHEMA: &str = "urn:ietf:params:scim:api:messages:2.0:PatchOp";
pub const ERROR_SCHEMA: &str = "urn:ietf:params:scim:api:messages:2.0:Error";

/// Member reference inside a group. `value` stays a string on the way in so a
/// single malformed id can be skipped instead of failing the whole body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScimMember {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    #[serde(rename = "$ref", default, skip_serializing_if = "Option::is_none")]
    pub ref_uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScimMeta {
    pub resource_type: String,
    pub created: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScimGroup {
    pub schemas: Vec<String>,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub display_name: String,
    pub members: Vec<ScimMember>,
    pub meta: ScimMeta,
}

impl ScimGroup {
    pub fn from_snapshot(snapshot: &GroupSnapshot, base_url: &str) -> Self {
        let group = &snapshot.group;
        let tenant_base = tenant_base(base_url, group.tenant_id);
        Self {
            schemas: vec![GROUP_SCHEMA.to_string()],
            id: group.id.to_string(),
            external_id: group.external_id.clone(),
            display_name: group.display_name.clone(),
            members: snapshot
                .members
                .iter()
                .map(|m| ScimMember {
                    value: m.id.to_string(),
                    display: m.display.clone(),
                    ref_uri: Some(format!("{tenant_base}/Users/{}", m.id)),
                })
                .collect(),
            meta: ScimMeta {
                resource_type: "Group".to_string(),
                created: group.created_at,
                last_modified: group.updated_at,
                location: format!("{tenant_base}/Groups/{}", group.id),
            },
        }
    }
}

pub fn tenant_base(base_url: &str, tenant_id: TenantId) -> String {
    format!("{base_url}/scim/v2/{tenant_id}")
}

/// Body of `POST /Groups` and `PUT /Groups/{id}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupRequest {
    #[serde(default)]
    pub schemas: Vec<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub members: Vec<ScimMember>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOp {
    pub op: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PatchRequest {
    #[serde(default)]
    pub schemas: Vec<String>,
    #[serde(rename = "Operations", default)]
    pub operations: Vec<PatchOp>,
}

impl PatchRequest {
    /// A request naming schemas must name the PatchOp message schema; an
    /// omitted `schemas` array is tolerated.
    pub fn declares_patch_op(&self) -> bool {
        self.schemas.is_empty() || self.schemas.iter().any(|s| s == PATCH_OP_SCHEMA)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse<T> {
    pub schemas: Vec<String>,
    pub total_results: usize,
    pub start_index: usize,
    pub items_per_page: usize,
    #[serde(rename = "Resources")]
    pub resources: Vec<T>,
}

impl<T> ListResponse<T> {
    pub fn new(resources: Vec<T>, total_results: usize, start_index: usize) -> Self {
        Self {
            schemas: vec![LIST_RESPONSE_SCHEMA.to_string()],
            total_results,
            start_index,
            items_per_page: resources.len(),
            resources,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListGroupsQuery {
    pub filter: Option<String>,
    pub start_index: Option<i64>,
    pub count: Option<i64>,
}

/// Operator payload for `PUT .../internal/directory-selector`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectorConfigRequest {
    pub selector: String,
    #[serde(default)]
    pub auto_delete: bool,
    #[serde(default)]
    pub default_status: Option<String>,
    #[serde(default)]
    pub field_mapping: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use forgeops_core::UserId;
    use forgeops_provisioning::{Member, ProvisioningGroup};

    use super::*;

    #[test]
    fn group_serializes_with_scim_attribute_names() {
        let tenant = TenantId::new();
        let group = ProvisioningGroup::new(tenant, "Org-Admins", Some("ext-1".into()), None, Utc::now());
        let member = UserId::new();
        let snapshot = GroupSnapshot {
            group: group.clone(),
            members: vec![Member {
                id: member,
                display: Some("Ada".into()),
            }],
        };

        let json = serde_json::to_value(ScimGroup::from_snapshot(&snapshot, "https://idp.test")).unwrap();
        assert_eq!(json["schemas"][0], GROUP_SCHEMA);
        assert_eq!(json["displayName"], "Org-Admins");
        assert_eq!(json["externalId"], "ext-1");
        assert_eq!(json["members"][0]["value"], member.to_string());
        assert_eq!(json["members"][0]["display"], "Ada");
        assert_eq!(
            json["members"][0]["$ref"],
            format!("https://idp.test/scim/v2/{tenant}/Users/{member}")
        );
        assert_eq!(json["meta"]["resourceType"], "Group");
        assert_eq!(
            json["meta"]["location"],
            format!("https://idp.test/scim/v2/{tenant}/Groups/{}", group.id)
        );
    }

    #[test]
    fn patch_request_reads_capitalised_operations() {
        let body = r#"{
            "schemas": ["urn:ietf:params:scim:api:messages:2.0:PatchOp"],
            "Operations": [{"op": "Add", "path": "members", "value": [{"value": "x"}]}]
        }"#;
        let request: PatchRequest = serde_json::from_str(body).unwrap();
        assert_eq!(request.operations.len(), 1);
        assert_eq!(request.operations[0].op, "Add");
        assert!(request.declares_patch_op());

        let wrong: PatchRequest =
            serde_json::from_str(r#"{"schemas": ["urn:ietf:params:scim:schemas:core:2.0:Group"], "Operations": []}"#).unwrap();
        assert!(!wrong.declares_patch_op());
        assert!(PatchRequest::default().declares_patch_op());
    }

    #[test]
    fn list_response_counts_page_items() {
        let response = ListResponse::new(vec![1, 2], 7, 3);
        let json = serde_json::to_value(response).unwrap();
        assert_eq!(json["totalResults"], 7);
        assert_eq!(json["startIndex"], 3);
        assert_eq!(json["itemsPerPage"], 2);
        assert_eq!(json["Resources"].as_array().unwrap().len(), 2);
    }
}
