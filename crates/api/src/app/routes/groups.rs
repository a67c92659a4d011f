//! SCIM Group endpoints.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Extension, Path, Query},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use forgeops_auth::VerifiedTenant;
use forgeops_core::GroupId;
use forgeops_provisioning::{ChangeDescription, Committed, GroupRepresentation};

use crate::app::dto::{GroupRequest, ListGroupsQuery, ListResponse, PatchRequest, ScimGroup};
use crate::app::errors::ScimError;
use crate::app::routes::scim_response;
use crate::app::scim;
use crate::app::services::AppServices;

type ScimResult = Result<Response, ScimError>;

pub async fn list_groups(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<VerifiedTenant>,
    query: Result<Query<ListGroupsQuery>, QueryRejection>,
) -> ScimResult {
    let Query(query) = query.map_err(|e| ScimError::invalid_value(e.body_text()))?;

    let display_name = query.filter.as_deref().and_then(scim::display_name_filter);
    if display_name.is_none() {
        if let Some(filter) = query.filter.as_deref() {
            tracing::debug!(filter, "unsupported filter; returning unfiltered list");
        }
    }

    let groups = services.reconciler.list(&tenant, display_name.as_deref()).await?;
    let total = groups.len();
    let (start_index, count) = scim::page_bounds(query.start_index, query.count);

    let mut resources = Vec::new();
    for group in groups.into_iter().skip(start_index - 1).take(count) {
        let snapshot = services.reconciler.snapshot_of(group).await?;
        resources.push(ScimGroup::from_snapshot(&snapshot, &services.base_url));
    }

    Ok(scim_response(StatusCode::OK, ListResponse::new(resources, total, start_index)))
}

pub async fn create_group(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<VerifiedTenant>,
    payload: Result<Json<GroupRequest>, JsonRejection>,
) -> ScimResult {
    let Json(body) = payload.map_err(|e| ScimError::invalid_syntax(e.body_text()))?;

    let committed = services
        .reconciler
        .apply(&tenant, ChangeDescription::Create(representation(body)))
        .await?;
    let status = if committed.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    let group = post_state(&services, committed)?;
    let mut response = scim_response(status, &group);
    if status == StatusCode::CREATED {
        if let Ok(location) = HeaderValue::from_str(&group.meta.location) {
            response.headers_mut().insert(header::LOCATION, location);
        }
    }
    Ok(response)
}

pub async fn get_group(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<VerifiedTenant>,
    Path((_, id)): Path<(String, String)>,
) -> ScimResult {
    let group_id = group_id(&id)?;
    let snapshot = services.reconciler.group(&tenant, group_id).await?;
    Ok(scim_response(
        StatusCode::OK,
        ScimGroup::from_snapshot(&snapshot, &services.base_url),
    ))
}

/// Always 200 with the full post-state, never 204.
pub async fn patch_group(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<VerifiedTenant>,
    Path((_, id)): Path<(String, String)>,
    payload: Result<Json<PatchRequest>, JsonRejection>,
) -> ScimResult {
    let group_id = group_id(&id)?;
    let Json(body) = payload.map_err(|e| ScimError::invalid_syntax(e.body_text()))?;
    if !body.declares_patch_op() {
        return Err(ScimError::invalid_syntax("request is not a PatchOp message"));
    }

    let operations = scim::patch_operations(&body.operations);
    let committed = services
        .reconciler
        .apply(&tenant, ChangeDescription::PartialUpdate { group_id, operations })
        .await?;

    Ok(scim_response(StatusCode::OK, post_state(&services, committed)?))
}

pub async fn replace_group(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<VerifiedTenant>,
    Path((_, id)): Path<(String, String)>,
    payload: Result<Json<GroupRequest>, JsonRejection>,
) -> ScimResult {
    let group_id = group_id(&id)?;
    let Json(body) = payload.map_err(|e| ScimError::invalid_syntax(e.body_text()))?;

    let committed = services
        .reconciler
        .apply(
            &tenant,
            ChangeDescription::Replace {
                group_id,
                group: representation(body),
            },
        )
        .await?;

    Ok(scim_response(StatusCode::OK, post_state(&services, committed)?))
}

pub async fn delete_group(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<VerifiedTenant>,
    Path((_, id)): Path<(String, String)>,
) -> ScimResult {
    let group_id = group_id(&id)?;
    services
        .reconciler
        .apply(&tenant, ChangeDescription::Delete { group_id })
        .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// Ids that do not parse cannot exist in any tenant.
fn group_id(raw: &str) -> Result<GroupId, ScimError> {
    raw.parse()
        .map_err(|_| ScimError::NotFound(format!("group {raw} not found")))
}

/// A missing display name is left empty for the reconciler to reject.
fn representation(body: GroupRequest) -> GroupRepresentation {
    GroupRepresentation {
        display_name: body.display_name.unwrap_or_default(),
        external_id: body.external_id.filter(|e| !e.trim().is_empty()),
        members: scim::member_ids(&body.members),
    }
}

fn post_state(services: &AppServices, committed: Committed) -> Result<ScimGroup, ScimError> {
    committed
        .group
        .map(|snapshot| ScimGroup::from_snapshot(&snapshot, &services.base_url))
        .ok_or_else(|| ScimError::Internal("change committed without a resulting group".to_string()))
}
