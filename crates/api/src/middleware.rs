use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};

use forgeops_core::TenantId;

use crate::app::errors::ScimError;
use crate::app::services::AppServices;

/// Verify the bearer token against the tenant named in the path and attach
/// the resulting `VerifiedTenant` to the request. Nothing downstream runs on
/// failure.
pub async fn auth_middleware(
    State(services): State<Arc<AppServices>>,
    Path(params): Path<HashMap<String, String>>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ScimError> {
    let unauthorized = || ScimError::Unauthorized("invalid or missing bearer token".to_string());

    let tenant_id: TenantId = params
        .get("tenant_id")
        .and_then(|raw| raw.parse().ok())
        .ok_or_else(unauthorized)?;

    let header = req
        .headers()
        .get(AUTHORIZATION)
        .map(|value| value.to_str().map_err(|_| unauthorized()))
        .transpose()?;

    let verified = services.reconciler.verify(tenant_id, header).await?;

    req.extensions_mut().insert(verified);
    Ok(next.run(req).await)
}

/// Gate for operator routes: accepts only the process operator credential,
/// never a tenant's provisioning token.
pub async fn operator_middleware(
    State(services): State<Arc<AppServices>>,
    Path(params): Path<HashMap<String, String>>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ScimError> {
    let unauthorized = || ScimError::Unauthorized("invalid or missing operator token".to_string());

    let Some(operator) = services.operator.as_ref() else {
        tracing::warn!("operator route called but no operator token is configured");
        return Err(unauthorized());
    };

    let tenant_id: TenantId = params
        .get("tenant_id")
        .and_then(|raw| raw.parse().ok())
        .ok_or_else(unauthorized)?;

    let header = req
        .headers()
        .get(AUTHORIZATION)
        .map(|value| value.to_str().map_err(|_| unauthorized()))
        .transpose()?;

    let verified = operator.authorize(tenant_id, header).map_err(|e| {
        tracing::warn!(tenant_id = %tenant_id, error = %e, "operator authentication failed");
        unauthorized()
    })?;

    req.extensions_mut().insert(verified);
    Ok(next.run(req).await)
}
