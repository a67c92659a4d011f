//! Operator endpoints for the pattern-driven directory sync.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use forgeops_auth::VerifiedTenant;
use forgeops_provisioning::{FieldMapping, SelectorConfig};

use crate::app::dto::SelectorConfigRequest;
use crate::app::errors::ScimError;
use crate::app::services::AppServices;

/// Run one sync now. Per-record problems are in the report, not the status.
pub async fn run_sync(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<VerifiedTenant>,
) -> Response {
    let report = services.directory_sync.run(tenant.tenant_id()).await;
    (StatusCode::OK, Json(report)).into_response()
}

pub async fn put_selector(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<VerifiedTenant>,
    payload: Result<Json<SelectorConfigRequest>, JsonRejection>,
) -> Result<Response, ScimError> {
    let Json(body) = payload.map_err(|e| ScimError::invalid_syntax(e.body_text()))?;
    if body.selector.trim().is_empty() {
        return Err(ScimError::invalid_value("selector is required"));
    }

    let mut config = SelectorConfig::new(tenant.tenant_id(), body.selector.trim())
        .with_auto_delete(body.auto_delete);
    if let Some(status) = body.default_status.filter(|s| !s.trim().is_empty()) {
        config.default_status = status;
    }
    config.field_mapping = FieldMapping(body.field_mapping);

    services.store.put_selector_config(config.clone()).await.map_err(|e| {
        tracing::error!(tenant_id = %tenant.tenant_id(), error = %e, "failed to store directory selector");
        ScimError::Internal("the selector could not be stored".to_string())
    })?;

    tracing::info!(tenant_id = %tenant.tenant_id(), selector = %config.selector, "directory selector updated");
    Ok((StatusCode::OK, Json(config)).into_response())
}
