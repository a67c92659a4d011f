//! Bearer-token verification against a tenant's encrypted provisioning secret.
//!
//! Storage and cryptography stay outside this crate: a [`SecretSource`] looks
//! up the encrypted secret and a [`SecretDecryptor`] opens it.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use thiserror::Error;

use forgeops_core::TenantId;

/// A tenant's provisioning secret as stored (ciphertext, never plaintext).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedSecret {
    pub ciphertext: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("missing bearer token")]
    Missing,

    #[error("malformed authorization header")]
    Malformed,

    #[error("tenant has no provisioning secret")]
    UnknownTenant,

    #[error("provisioning secret has expired")]
    Expired,

    #[error("bearer token does not match")]
    Mismatch,

    #[error("provisioning secret could not be decrypted: {0}")]
    Decrypt(String),

    /// The secret lookup itself failed (store outage, not a credential problem).
    #[error("secret lookup failed: {0}")]
    Source(String),
}

impl TokenError {
    /// True for credential problems (401), false for infrastructure faults.
    pub fn is_unauthorized(&self) -> bool {
        !matches!(self, TokenError::Source(_))
    }
}

/// Looks up the encrypted provisioning secret configured for a tenant.
#[async_trait]
pub trait SecretSource: Send + Sync {
    async fn provisioning_secret(&self, tenant_id: TenantId) -> Result<Option<EncryptedSecret>, TokenError>;
}

/// Opens an encrypted secret.
pub trait SecretDecryptor: Send + Sync {
    fn decrypt(&self, ciphertext: &str) -> Result<String, TokenError>;
}

/// Proof that a request's bearer credential was verified for `tenant_id`.
///
/// Only [`TokenVerifier::verify`] hands these out for wire traffic; mutating
/// provisioning operations take one instead of a bare `TenantId`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct VerifiedTenant {
    tenant_id: TenantId,
}

impl VerifiedTenant {
    /// For work triggered inside the process (scheduler, operator tooling,
    /// tests) that never carried a bearer token.
    pub fn trusted(tenant_id: TenantId) -> Self {
        Self { tenant_id }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

/// Verifies inbound bearer credentials per tenant.
#[derive(Clone)]
pub struct TokenVerifier {
    source: Arc<dyn SecretSource>,
    decryptor: Arc<dyn SecretDecryptor>,
}

impl TokenVerifier {
    pub fn new(source: Arc<dyn SecretSource>, decryptor: Arc<dyn SecretDecryptor>) -> Self {
        Self { source, decryptor }
    }

    /// Verify `presented` against the tenant's secret at time `now`.
    ///
    /// Comparison is constant-time over the token bytes.
    pub async fn verify(
        &self,
        tenant_id: TenantId,
        presented: &str,
        now: DateTime<Utc>,
    ) -> Result<VerifiedTenant, TokenError> {
        if presented.is_empty() {
            return Err(TokenError::Missing);
        }

        let secret = self
            .source
            .provisioning_secret(tenant_id)
            .await?
            .ok_or(TokenError::UnknownTenant)?;

        if secret.expires_at.is_some_and(|exp| now >= exp) {
            return Err(TokenError::Expired);
        }

        let expected = self.decryptor.decrypt(&secret.ciphertext)?;

        if bool::from(expected.as_bytes().ct_eq(presented.as_bytes())) {
            Ok(VerifiedTenant { tenant_id })
        } else {
            Err(TokenError::Mismatch)
        }
    }
}

/// Process-wide credential for operator endpoints (directory sync runs and
/// selector changes). Tenant provisioning tokens are never accepted in its
/// place.
#[derive(Clone)]
pub struct OperatorCredential {
    token: String,
}

impl OperatorCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }

    /// Check an `Authorization` header value; on success the operator may act
    /// on `tenant_id`.
    pub fn authorize(&self, tenant_id: TenantId, header: Option<&str>) -> Result<VerifiedTenant, TokenError> {
        let presented = extract_bearer(header)?;
        if bool::from(self.token.as_bytes().ct_eq(presented.as_bytes())) {
            Ok(VerifiedTenant { tenant_id })
        } else {
            Err(TokenError::Mismatch)
        }
    }
}

impl std::fmt::Debug for OperatorCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperatorCredential").field("token", &"<redacted>").finish()
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
pub fn extract_bearer(header: Option<&str>) -> Result<&str, TokenError> {
    let header = header.ok_or(TokenError::Missing)?;

    let token = header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .ok_or(TokenError::Malformed)?
        .trim();

    if token.is_empty() {
        return Err(TokenError::Missing);
    }

    Ok(token)
}
