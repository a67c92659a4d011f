//! SCIM discovery documents (RFC 7643 §5, §6). Only the Group resource is
//! served.

use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::Response};
use serde_json::json;

use forgeops_auth::VerifiedTenant;

use crate::app::dto::{tenant_base, GROUP_SCHEMA, LIST_RESPONSE_SCHEMA};
use crate::app::routes::scim_response;
use crate::app::scim::MAX_COUNT;
use crate::app::services::AppServices;

pub async fn resource_types(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<VerifiedTenant>,
) -> Response {
    let base = tenant_base(&services.base_url, tenant.tenant_id());
    let resources = vec![json!({
        "schemas": ["urn:ietf:params:scim:schemas:core:2.0:ResourceType"],
        "id": "Group",
        "name": "Group",
        "endpoint": "/Groups",
        "description": "Group",
        "schema": GROUP_SCHEMA,
        "meta": {
            "resourceType": "ResourceType",
            "location": format!("{base}/ResourceTypes/Group"),
        },
    })];

    scim_response(
        StatusCode::OK,
        json!({
            "schemas": [LIST_RESPONSE_SCHEMA],
            "totalResults": resources.len(),
            "startIndex": 1,
            "itemsPerPage": resources.len(),
            "Resources": resources,
        }),
    )
}

pub async fn service_provider_config(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<VerifiedTenant>,
) -> Response {
    let base = tenant_base(&services.base_url, tenant.tenant_id());
    scim_response(
        StatusCode::OK,
        json!({
            "schemas": ["urn:ietf:params:scim:schemas:core:2.0:ServiceProviderConfig"],
            "patch": { "supported": true },
            "bulk": { "supported": false, "maxOperations": 0, "maxPayloadSize": 0 },
            "filter": { "supported": true, "maxResults": MAX_COUNT },
            "changePassword": { "supported": false },
            "sort": { "supported": false },
            "etag": { "supported": false },
            "authenticationSchemes": [{
                "type": "oauthbearertoken",
                "name": "OAuth Bearer Token",
                "description": "Per-tenant provisioning bearer token",
                "specUri": "https://www.rfc-editor.org/info/rfc6750",
                "primary": true,
            }],
            "meta": {
                "resourceType": "ServiceProviderConfig",
                "location": format!("{base}/ServiceProviderConfig"),
            },
        }),
    )
}
