//! HTTP API: SCIM provisioning surface, bearer-token middleware and wiring.

pub mod app;
pub mod middleware;
