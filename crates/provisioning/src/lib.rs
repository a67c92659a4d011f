//! `forgeops-provisioning` — identity provisioning and role synchronization.
//!
//! Two independently triggered paths share one wildcard matcher:
//!
//! - the [`Reconciler`] applies externally pushed group changes, keeping
//!   memberships and `sync` role grants converged while never touching grants
//!   an administrator assigned by hand;
//! - [`DirectorySync`] pulls upstream groups selected by a tenant pattern and
//!   maintains directory records for their members.
//!
//! Persistence sits behind [`ProvisioningStore`]; [`memory`] holds the
//! in-memory implementation used by tests and dev mode.

pub mod collaborators;
pub mod directory_sync;
pub mod membership;
pub mod memory;
pub mod model;
pub mod reconciler;
pub mod store;

pub use collaborators::{
    CollaboratorError, DirectoryUser, ExternalDirectory, InMemoryExternalDirectory, InMemoryRoleCatalogs,
    InMemoryUserDirectory, RoleCatalogProvider, UserDirectory,
};
pub use directory_sync::{DirectorySync, SyncError, SyncReport};
pub use membership::{MembershipDelta, MembershipError, MembershipStore};
pub use memory::InMemoryProvisioningStore;
pub use model::{
    DirectoryGroup, DirectoryPerson, DirectoryRecord, FieldMapping, MappedFields, ProvisioningGroup,
    RecordOrigin, SelectorConfig,
};
pub use reconciler::{
    ChangeDescription, Committed, GroupRepresentation, GroupSnapshot, Member, PatchOperation, ReconcileError,
    Reconciler,
};
pub use store::{DirectoryTransaction, GroupTransaction, ProvisioningStore, StoreError, StoreResult};
