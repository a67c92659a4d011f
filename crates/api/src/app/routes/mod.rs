use axum::{
    routing::{get, post, put},
    Router,
};

pub mod common;
pub mod directory;
pub mod discovery;
pub mod groups;
pub mod system;

pub use common::scim_response;

/// Router for the tenant's SCIM endpoints. Every route carries `:tenant_id`.
pub fn router() -> Router {
    Router::new()
        .route(
            "/scim/v2/:tenant_id/Groups",
            get(groups::list_groups).post(groups::create_group),
        )
        .route(
            "/scim/v2/:tenant_id/Groups/:id",
            get(groups::get_group)
                .patch(groups::patch_group)
                .put(groups::replace_group)
                .delete(groups::delete_group),
        )
        .route("/scim/v2/:tenant_id/ResourceTypes", get(discovery::resource_types))
        .route(
            "/scim/v2/:tenant_id/ServiceProviderConfig",
            get(discovery::service_provider_config),
        )
}

/// Operator routes for the directory sync; gated by the operator credential
/// rather than the tenant's provisioning token.
pub fn operator_router() -> Router {
    Router::new()
        .route(
            "/scim/v2/:tenant_id/internal/directory-sync",
            post(directory::run_sync),
        )
        .route(
            "/scim/v2/:tenant_id/internal/directory-selector",
            put(directory::put_selector),
        )
}
