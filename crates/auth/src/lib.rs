//! `forgeops-auth` — authorization building blocks for identity provisioning.
//!
//! Decoupled from HTTP and storage: pattern matching, role catalogs, role
//! grant provenance and bearer-token verification against tenant secrets.

pub mod grant;
pub mod pattern;
pub mod resolver;
pub mod roles;
pub mod token;

pub use grant::{GrantSource, RoleGrant};
pub use pattern::{matches, Pattern};
pub use resolver::resolve;
pub use roles::{Role, RoleCatalog, RoleDescriptor, RoleSelector};
pub use token::{
    extract_bearer, EncryptedSecret, OperatorCredential, SecretDecryptor, SecretSource, TokenError, TokenVerifier,
    VerifiedTenant,
};
