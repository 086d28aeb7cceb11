//! Capability model for host-service access.
//!
//! Access is default-deny: a capability is usable only when the manifest
//! declares it and the deployment grants it.

pub mod audit;
pub mod enforcer;

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::manifest::model::PermissionDeclaration;

pub use audit::{AuditLog, AuditSink, SecurityEvent};
pub use enforcer::PermissionEnforcer;

/// A host capability a plugin can ask for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Key-value or relational storage.
    Storage,
    /// Cache handle.
    Cache,
    /// Route registration.
    Routing,
    /// Host configuration reader.
    Configuration,
    /// Filesystem accessor.
    Filesystem,
    /// Network client.
    Network,
    /// Process execution facility.
    ProcessExecution,
    /// Caller-defined capability.
    Custom(String),
}

impl Capability {
    /// The fixed set of standard capabilities.
    pub const STANDARD: [Capability; 7] = [
        Self::Storage,
        Self::Cache,
        Self::Routing,
        Self::Configuration,
        Self::Filesystem,
        Self::Network,
        Self::ProcessExecution,
    ];

    /// Shorthand for a custom capability.
    pub fn custom(name: impl Into<String>) -> Self {
        Self::Custom(name.into())
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storage => f.write_str("storage"),
            Self::Cache => f.write_str("cache"),
            Self::Routing => f.write_str("routing"),
            Self::Configuration => f.write_str("configuration"),
            Self::Filesystem => f.write_str("filesystem"),
            Self::Network => f.write_str("network"),
            Self::ProcessExecution => f.write_str("process_execution"),
            Self::Custom(name) => write!(f, "custom:{name}"),
        }
    }
}

/// Immutable set of capabilities held by one plugin instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet {
    granted: BTreeSet<Capability>,
}

impl PermissionSet {
    /// Empty set: everything denied.
    pub fn none() -> Self {
        Self::default()
    }

    /// Capabilities marked `true` in a declaration.
    pub fn from_declaration(decl: &PermissionDeclaration) -> Self {
        let flags = [
            (decl.storage, Capability::Storage),
            (decl.cache, Capability::Cache),
            (decl.routing, Capability::Routing),
            (decl.configuration, Capability::Configuration),
            (decl.filesystem, Capability::Filesystem),
            (decl.network, Capability::Network),
            (decl.process_execution, Capability::ProcessExecution),
        ];

        let mut granted: BTreeSet<Capability> = flags
            .into_iter()
            .filter_map(|(on, cap)| on.then_some(cap))
            .collect();

        granted.extend(
            decl.custom
                .iter()
                .filter(|(_, on)| **on)
                .map(|(name, _)| Capability::Custom(name.clone())),
        );

        Self { granted }
    }

    /// Capabilities both declared by the manifest and granted by deployment.
    pub fn effective(declared: &PermissionDeclaration, granted: &PermissionDeclaration) -> Self {
        let declared = Self::from_declaration(declared);
        let granted = Self::from_declaration(granted);
        Self {
            granted: declared.granted.intersection(&granted.granted).cloned().collect(),
        }
    }

    /// Whether `capability` is held.
    pub fn contains(&self, capability: &Capability) -> bool {
        self.granted.contains(capability)
    }

    /// Iterates held capabilities in stable order.
    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.granted.iter()
    }

    /// Number of held capabilities.
    pub fn len(&self) -> usize {
        self.granted.len()
    }

    /// Whether nothing is held.
    pub fn is_empty(&self) -> bool {
        self.granted.is_empty()
    }
}

impl FromIterator<Capability> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self {
            granted: iter.into_iter().collect(),
        }
    }
}

/// Pure default-deny access check.
pub fn check_access(granted: &PermissionSet, capability: &Capability) -> bool {
    granted.contains(capability)
}
