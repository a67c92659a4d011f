//! In-memory provisioning secrets (tests and dev mode).

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use forgeops_auth::{EncryptedSecret, SecretSource, TokenError};
use forgeops_core::TenantId;

#[derive(Debug, Default)]
pub struct InMemorySecretSource {
    secrets: RwLock<HashMap<TenantId, EncryptedSecret>>,
}

impl InMemorySecretSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or rotate a tenant's secret.
    pub fn set(&self, tenant_id: TenantId, secret: EncryptedSecret) {
        if let Ok(mut secrets) = self.secrets.write() {
            secrets.insert(tenant_id, secret);
        }
    }

    pub fn remove(&self, tenant_id: TenantId) {
        if let Ok(mut secrets) = self.secrets.write() {
            secrets.remove(&tenant_id);
        }
    }
}

#[async_trait]
impl SecretSource for InMemorySecretSource {
    async fn provisioning_secret(&self, tenant_id: TenantId) -> Result<Option<EncryptedSecret>, TokenError> {
        let secrets = self
            .secrets
            .read()
            .map_err(|_| TokenError::Source("secret store lock poisoned".to_string()))?;
        Ok(secrets.get(&tenant_id).cloned())
    }
}
