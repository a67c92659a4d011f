//! Infrastructure layer: Postgres adapters, secret encryption, configuration.

pub mod config;
pub mod crypto;
pub mod postgres;
pub mod secrets;

pub use config::{AppConfig, BootstrapTenant, ConfigError};
pub use crypto::{AesGcmSecretCipher, CryptoError};
pub use secrets::InMemorySecretSource;
