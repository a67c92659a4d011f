//! Service wiring: in-memory (dev/tests) or Postgres-backed.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use forgeops_auth::{EncryptedSecret, OperatorCredential, SecretDecryptor, SecretSource, TokenVerifier};
use forgeops_core::TenantId;
use forgeops_events::AuditSink;
use forgeops_infra::postgres::{
    self, PostgresExternalDirectory, PostgresProvisioningStore, PostgresRoleCatalogs, PostgresSecretSource,
    PostgresUserDirectory,
};
use forgeops_infra::{AesGcmSecretCipher, AppConfig, CryptoError, InMemorySecretSource};
use forgeops_provisioning::{
    DirectorySync, ExternalDirectory, InMemoryExternalDirectory, InMemoryProvisioningStore, InMemoryRoleCatalogs,
    InMemoryUserDirectory, ProvisioningStore, Reconciler, RoleCatalogProvider, UserDirectory,
};

/// Everything the handlers need.
pub struct AppServices {
    pub reconciler: Reconciler,
    pub directory_sync: DirectorySync,
    pub store: Arc<dyn ProvisioningStore>,
    /// Used for `$ref` and `meta.location`; no trailing slash.
    pub base_url: String,
    /// Gate for the `internal/` operator routes; `None` keeps them closed.
    pub operator: Option<OperatorCredential>,
}

/// The ports the services are assembled from.
pub struct Backends {
    pub store: Arc<dyn ProvisioningStore>,
    pub users: Arc<dyn UserDirectory>,
    pub directory: Arc<dyn ExternalDirectory>,
    pub catalogs: Arc<dyn RoleCatalogProvider>,
    pub secrets: Arc<dyn SecretSource>,
    pub decryptor: Arc<dyn SecretDecryptor>,
    pub audit: Arc<dyn AuditSink>,
}

impl AppServices {
    pub fn new(backends: Backends, base_url: impl Into<String>) -> Self {
        let verifier = TokenVerifier::new(backends.secrets, backends.decryptor);
        let reconciler = Reconciler::new(
            backends.store.clone(),
            backends.users,
            backends.catalogs.clone(),
            verifier,
            backends.audit.clone(),
        );
        let directory_sync = DirectorySync::new(
            backends.store.clone(),
            backends.directory,
            backends.catalogs,
            backends.audit,
        );
        Self {
            reconciler,
            directory_sync,
            store: backends.store,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            operator: None,
        }
    }

    pub fn with_operator(mut self, operator: Option<OperatorCredential>) -> Self {
        self.operator = operator;
        self
    }
}

/// In-memory backends with their concrete types exposed so dev mode and
/// tests can seed users, catalogs, upstream groups and tokens.
#[derive(Clone)]
pub struct InMemoryBackends {
    pub store: Arc<InMemoryProvisioningStore>,
    pub users: Arc<InMemoryUserDirectory>,
    pub directory: Arc<InMemoryExternalDirectory>,
    pub catalogs: Arc<InMemoryRoleCatalogs>,
    pub secrets: Arc<InMemorySecretSource>,
    pub cipher: Arc<AesGcmSecretCipher>,
    pub audit: Arc<dyn AuditSink>,
}

impl InMemoryBackends {
    pub fn new(cipher: AesGcmSecretCipher, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            store: Arc::new(InMemoryProvisioningStore::new()),
            users: Arc::new(InMemoryUserDirectory::new()),
            directory: Arc::new(InMemoryExternalDirectory::new()),
            catalogs: Arc::new(InMemoryRoleCatalogs::new()),
            secrets: Arc::new(InMemorySecretSource::new()),
            cipher: Arc::new(cipher),
            audit,
        }
    }

    /// Seal `token` and install it as the tenant's provisioning secret.
    pub fn install_token(
        &self,
        tenant_id: TenantId,
        token: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), CryptoError> {
        let ciphertext = self.cipher.encrypt(token)?;
        self.secrets.set(tenant_id, EncryptedSecret { ciphertext, expires_at });
        Ok(())
    }

    pub fn services(&self, base_url: impl Into<String>) -> AppServices {
        AppServices::new(
            Backends {
                store: self.store.clone(),
                users: self.users.clone(),
                directory: self.directory.clone(),
                catalogs: self.catalogs.clone(),
                secrets: self.secrets.clone(),
                decryptor: self.cipher.clone(),
                audit: self.audit.clone(),
            },
            base_url,
        )
    }
}

/// Connect, apply the schema and install the bootstrap secret if configured.
pub async fn postgres_services(
    config: &AppConfig,
    database_url: &str,
    audit: Arc<dyn AuditSink>,
) -> anyhow::Result<AppServices> {
    let pool = postgres::connect(database_url, config.max_connections).await?;
    postgres::migrate(&pool).await?;

    let secrets = PostgresSecretSource::new(pool.clone());
    if let Some(bootstrap) = &config.bootstrap {
        let ciphertext = config.cipher.encrypt(&bootstrap.token)?;
        secrets
            .put_secret(bootstrap.tenant_id, &EncryptedSecret { ciphertext, expires_at: None })
            .await?;
        tracing::info!(tenant_id = %bootstrap.tenant_id, "bootstrap provisioning secret installed");
    }

    Ok(AppServices::new(
        Backends {
            store: Arc::new(PostgresProvisioningStore::new(pool.clone())),
            users: Arc::new(PostgresUserDirectory::new(pool.clone())),
            directory: Arc::new(PostgresExternalDirectory::new(pool.clone())),
            catalogs: Arc::new(PostgresRoleCatalogs::new(pool)),
            secrets: Arc::new(secrets),
            decryptor: Arc::new(config.cipher.clone()),
            audit,
        },
        config.base_url.clone(),
    )
    .with_operator(config.operator.clone()))
}

/// In-memory services for dev runs, with the bootstrap secret installed.
pub fn in_memory_services(config: &AppConfig, audit: Arc<dyn AuditSink>) -> anyhow::Result<AppServices> {
    let backends = InMemoryBackends::new(config.cipher.clone(), audit);
    if let Some(bootstrap) = &config.bootstrap {
        backends.install_token(bootstrap.tenant_id, &bootstrap.token, None)?;
        tracing::info!(tenant_id = %bootstrap.tenant_id, "bootstrap provisioning secret installed");
    }
    Ok(backends
        .services(config.base_url.clone())
        .with_operator(config.operator.clone()))
}
