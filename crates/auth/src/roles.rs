//! Role catalog: the tenant's authorization roles and the group selectors that
//! imply them.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use forgeops_core::RoleId;

use crate::pattern::Pattern;

/// Role name used for display and audit.
///
/// Roles are opaque strings at this layer; the permission read path decides
/// what a role grants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a role recognises the upstream groups that imply it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RoleSelector {
    /// A single wildcard pattern (e.g. `*-Admins`).
    Pattern(String),
    /// An explicit list of expected group names; each entry is evaluated with
    /// the same matcher, so plain names compare case-insensitively.
    GroupNames(Vec<String>),
}

impl RoleSelector {
    /// One compiled pattern per selector entry.
    pub fn compile(&self) -> Vec<Pattern> {
        match self {
            RoleSelector::Pattern(p) => vec![Pattern::compile(p)],
            RoleSelector::GroupNames(names) => names.iter().map(|n| Pattern::compile(n)).collect(),
        }
    }
}

/// One catalog entry. The selector is compiled when the entry is built, so
/// resolution never recompiles patterns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "DescriptorFields", into = "DescriptorFields")]
pub struct RoleDescriptor {
    pub role_id: RoleId,
    pub name: Role,
    selector: RoleSelector,
    matchers: Vec<Pattern>,
}

#[derive(Serialize, Deserialize)]
struct DescriptorFields {
    role_id: RoleId,
    name: Role,
    selector: RoleSelector,
}

impl RoleDescriptor {
    pub fn new(role_id: RoleId, name: impl Into<Cow<'static, str>>, selector: RoleSelector) -> Self {
        Self::from(DescriptorFields {
            role_id,
            name: Role::new(name),
            selector,
        })
    }

    pub fn selector(&self) -> &RoleSelector {
        &self.selector
    }

    pub fn matches(&self, group_display_name: &str) -> bool {
        self.matchers.iter().any(|p| p.is_match(group_display_name))
    }
}

impl From<DescriptorFields> for RoleDescriptor {
    fn from(fields: DescriptorFields) -> Self {
        let matchers = fields.selector.compile();
        Self {
            role_id: fields.role_id,
            name: fields.name,
            selector: fields.selector,
            matchers,
        }
    }
}

impl From<RoleDescriptor> for DescriptorFields {
    fn from(descriptor: RoleDescriptor) -> Self {
        Self {
            role_id: descriptor.role_id,
            name: descriptor.name,
            selector: descriptor.selector,
        }
    }
}

impl PartialEq for RoleDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.role_id == other.role_id && self.name == other.name && self.selector == other.selector
    }
}

impl Eq for RoleDescriptor {}

/// Ordered role catalog.
///
/// Order is the resolution priority: the first entry whose selector matches
/// wins. This is a list on purpose; never back it with a map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleCatalog {
    entries: Vec<RoleDescriptor>,
}

impl RoleCatalog {
    pub fn new(entries: Vec<RoleDescriptor>) -> Self {
        Self { entries }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Append an entry at the lowest priority.
    pub fn push(&mut self, entry: RoleDescriptor) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[RoleDescriptor] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, role_id: RoleId) -> Option<&RoleDescriptor> {
        self.entries.iter().find(|e| e.role_id == role_id)
    }

    /// Resolve the role implied by a group name (see [`crate::resolve`]).
    pub fn resolve(&self, group_display_name: &str) -> Option<&RoleDescriptor> {
        crate::resolver::resolve(group_display_name, self)
    }
}
