//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: backend wiring (in-memory or Postgres) into the reconciler and sync
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: SCIM wire representations
//! - `scim.rs`: filter/PATCH translation into reconciler inputs
//! - `errors.rs`: SCIM error bodies

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod scim;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs` and the
/// black-box tests).
pub fn build_app(services: Arc<AppServices>) -> Router {
    // Tenant routes: every request is verified against the tenant in its path.
    let protected = routes::router()
        .route_layer(axum::middleware::from_fn_with_state(
            services.clone(),
            middleware::auth_middleware,
        ))
        .layer(Extension(services.clone()));

    let operator = routes::operator_router()
        .route_layer(axum::middleware::from_fn_with_state(
            services.clone(),
            middleware::operator_middleware,
        ))
        .layer(Extension(services));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
        .merge(operator)
        .layer(ServiceBuilder::new())
}

pub use services::AppServices;
