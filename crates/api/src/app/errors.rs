//! SCIM error bodies (RFC 7644 §3.12).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use forgeops_provisioning::ReconcileError;

use crate::app::dto::ERROR_SCHEMA;
use crate::app::routes::scim_response;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScimError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    /// Malformed representation; `scim_type` is the RFC 7644 detail code.
    #[error("{detail}")]
    BadRequest { scim_type: &'static str, detail: String },

    #[error("{0}")]
    Internal(String),
}

impl ScimError {
    pub fn invalid_value(detail: impl Into<String>) -> Self {
        ScimError::BadRequest {
            scim_type: "invalidValue",
            detail: detail.into(),
        }
    }

    pub fn invalid_syntax(detail: impl Into<String>) -> Self {
        ScimError::BadRequest {
            scim_type: "invalidSyntax",
            detail: detail.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ScimError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ScimError::NotFound(_) => StatusCode::NOT_FOUND,
            ScimError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ScimError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ReconcileError> for ScimError {
    fn from(e: ReconcileError) -> Self {
        match e {
            // Do not tell callers which credential check failed.
            ReconcileError::Unauthorized(_) => ScimError::Unauthorized("invalid or missing bearer token".to_string()),
            ReconcileError::NotFound(what) => ScimError::NotFound(format!("{what} not found")),
            ReconcileError::Validation(detail) => ScimError::invalid_value(detail),
            ReconcileError::Store(detail) => {
                tracing::error!(error = %detail, "provisioning store fault");
                ScimError::Internal("the change could not be committed".to_string())
            }
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody<'a> {
    schemas: [&'static str; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    scim_type: Option<&'static str>,
    detail: &'a str,
    status: String,
}

impl IntoResponse for ScimError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let scim_type = match &self {
            ScimError::BadRequest { scim_type, .. } => Some(*scim_type),
            _ => None,
        };
        let detail = self.to_string();
        let mut response = scim_response(
            status,
            ErrorBody {
                schemas: [ERROR_SCHEMA],
                scim_type,
                detail: &detail,
                status: status.as_u16().to_string(),
            },
        );
        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                axum::http::header::WWW_AUTHENTICATE,
                axum::http::HeaderValue::from_static("Bearer"),
            );
        }
        response
    }
}
