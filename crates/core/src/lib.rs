//! `forgeops-core` — shared domain building blocks.
//!
//! Pure types only: identifiers and the domain error model. No IO.

pub mod error;
pub mod id;

pub use error::DomainError;
pub use id::{DirectoryRecordId, GroupId, RoleId, TenantId, UserId};
