//! Group name → role resolution.

use crate::roles::{RoleCatalog, RoleDescriptor};

/// Resolve the single role implied by `group_display_name`.
///
/// Walks the catalog in priority order and returns the first entry whose
/// selector matches. Deterministic for a given catalog snapshot: no
/// specificity scoring, no hashing.
pub fn resolve<'a>(group_display_name: &str, catalog: &'a RoleCatalog) -> Option<&'a RoleDescriptor> {
    let found = catalog
        .entries()
        .iter()
        .find(|entry| entry.matches(group_display_name));

    match found {
        Some(entry) => tracing::debug!(
            group = group_display_name,
            role = %entry.name,
            "group resolved to role"
        ),
        None => tracing::debug!(group = group_display_name, "group maps to no role"),
    }

    found
}
