//! Process configuration from environment variables.

use std::net::SocketAddr;

use thiserror::Error;

use forgeops_auth::OperatorCredential;
use forgeops_core::TenantId;
use forgeops_observability::LogFormat;

use crate::crypto::{AesGcmSecretCipher, CryptoError};

/// Fixed key for in-memory dev runs only.
const DEV_SECRET_KEY: [u8; 32] = *b"forgeops-dev-key-not-for-prod!!!";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} is invalid: {message}")]
    Invalid { name: &'static str, message: String },

    #[error("{0} is required when DATABASE_URL is set")]
    Missing(&'static str),

    #[error("FORGEOPS_SECRET_KEY is invalid: {0}")]
    SecretKey(#[from] CryptoError),
}

/// A tenant whose bearer secret is installed at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapTenant {
    pub tenant_id: TenantId,
    pub token: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    /// `None` selects the in-memory stores.
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub cipher: AesGcmSecretCipher,
    /// `true` when no key was configured and the dev key is in use.
    pub dev_secret_key: bool,
    pub base_url: String,
    pub log_format: LogFormat,
    pub bootstrap: Option<BootstrapTenant>,
    /// `None` leaves the operator endpoints closed.
    pub operator: Option<OperatorCredential>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind_addr = match var("FORGEOPS_BIND_ADDR") {
            Some(raw) => raw.parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                name: "FORGEOPS_BIND_ADDR",
                message: e.to_string(),
            })?,
            None => SocketAddr::from(([0, 0, 0, 0], 8080)),
        };

        let database_url = var("DATABASE_URL");

        let max_connections = match var("FORGEOPS_DB_MAX_CONNECTIONS") {
            Some(raw) => raw
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| ConfigError::Invalid {
                    name: "FORGEOPS_DB_MAX_CONNECTIONS",
                    message: format!("expected a positive integer, got '{raw}'"),
                })?,
            None => 10,
        };

        let (cipher, dev_secret_key) = match var("FORGEOPS_SECRET_KEY") {
            Some(raw) => (AesGcmSecretCipher::from_base64(&raw)?, false),
            None if database_url.is_some() => return Err(ConfigError::Missing("FORGEOPS_SECRET_KEY")),
            None => (AesGcmSecretCipher::new(DEV_SECRET_KEY), true),
        };

        let base_url = var("FORGEOPS_BASE_URL")
            .unwrap_or_else(|| "http://localhost:8080".to_string())
            .trim_end_matches('/')
            .to_string();

        let log_format = match var("FORGEOPS_LOG_FORMAT") {
            Some(raw) => raw.parse().map_err(|message| ConfigError::Invalid {
                name: "FORGEOPS_LOG_FORMAT",
                message,
            })?,
            None => LogFormat::default(),
        };

        let bootstrap = match (var("FORGEOPS_BOOTSTRAP_TENANT"), var("FORGEOPS_BOOTSTRAP_TOKEN")) {
            (Some(tenant), Some(token)) => Some(BootstrapTenant {
                tenant_id: tenant.parse().map_err(|e: forgeops_core::DomainError| ConfigError::Invalid {
                    name: "FORGEOPS_BOOTSTRAP_TENANT",
                    message: e.to_string(),
                })?,
                token,
            }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Invalid {
                name: "FORGEOPS_BOOTSTRAP_TOKEN",
                message: "must be set together with FORGEOPS_BOOTSTRAP_TENANT".to_string(),
            }),
            (None, Some(_)) => return Err(ConfigError::Invalid {
                name: "FORGEOPS_BOOTSTRAP_TENANT",
                message: "must be set together with FORGEOPS_BOOTSTRAP_TOKEN".to_string(),
            }),
        };

        let operator = var("FORGEOPS_OPERATOR_TOKEN")
            .filter(|token| !token.trim().is_empty())
            .map(OperatorCredential::new);

        Ok(Self {
            bind_addr,
            database_url,
            max_connections,
            cipher,
            dev_secret_key,
            base_url,
            log_format,
            bootstrap,
            operator,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn defaults_select_in_memory_mode_with_dev_key() {
        let config = load(&[]).unwrap();
        assert_eq!(config.bind_addr.to_string(), "0.0.0.0:8080");
        assert!(config.database_url.is_none());
        assert!(config.dev_secret_key);
        assert_eq!(config.base_url, "http://localhost:8080");
        assert_eq!(config.log_format, LogFormat::Json);
        assert!(config.bootstrap.is_none());
        assert!(config.operator.is_none());
    }

    #[test]
    fn postgres_mode_requires_secret_key() {
        let err = load(&[("DATABASE_URL", "postgres://localhost/forgeops")]).unwrap_err();
        assert_eq!(err, ConfigError::Missing("FORGEOPS_SECRET_KEY"));

        let key = BASE64.encode([9u8; 32]);
        let config = load(&[
            ("DATABASE_URL", "postgres://localhost/forgeops"),
            ("FORGEOPS_SECRET_KEY", &key),
        ])
        .unwrap();
        assert!(!config.dev_secret_key);
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert!(matches!(
            load(&[("FORGEOPS_BIND_ADDR", "not-an-addr")]),
            Err(ConfigError::Invalid { name: "FORGEOPS_BIND_ADDR", .. })
        ));
        assert!(matches!(
            load(&[("FORGEOPS_SECRET_KEY", "c2hvcnQ=")]),
            Err(ConfigError::SecretKey(CryptoError::KeyLength(5)))
        ));
        assert!(matches!(
            load(&[("FORGEOPS_LOG_FORMAT", "xml")]),
            Err(ConfigError::Invalid { name: "FORGEOPS_LOG_FORMAT", .. })
        ));
        assert!(matches!(
            load(&[("FORGEOPS_BOOTSTRAP_TENANT", TenantId::new().to_string().as_str())]),
            Err(ConfigError::Invalid { name: "FORGEOPS_BOOTSTRAP_TOKEN", .. })
        ));
    }

    #[test]
    fn bootstrap_tenant_and_base_url_are_read() {
        let tenant = TenantId::new();
        let config = load(&[
            ("FORGEOPS_BOOTSTRAP_TENANT", &tenant.to_string()),
            ("FORGEOPS_BOOTSTRAP_TOKEN", "tok"),
            ("FORGEOPS_BASE_URL", "https://idp.example.com/"),
            ("FORGEOPS_LOG_FORMAT", "pretty"),
        ])
        .unwrap();
        assert_eq!(
            config.bootstrap,
            Some(BootstrapTenant {
                tenant_id: tenant,
                token: "tok".to_string()
            })
        );
        assert_eq!(config.base_url, "https://idp.example.com");
        assert_eq!(config.log_format, LogFormat::Pretty);
    }
    #[test]
    fn operator_token_enables_operator_credential() {
        let tenant = TenantId::new();
        let config = load(&[("FORGEOPS_OPERATOR_TOKEN", "ops-secret")]).unwrap();
        let operator = config.operator.unwrap();
        assert!(operator.authorize(tenant, Some("Bearer ops-secret")).is_ok());
        assert!(!format!("{operator:?}").contains("ops-secret"));

        assert!(load(&[("FORGEOPS_OPERATOR_TOKEN", "  ")]).unwrap().operator.is_none());
    }
}
