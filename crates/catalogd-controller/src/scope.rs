//! Namespace-or-cluster scope of a configuration
//!
//! The scope partitions the addon and chart stores, selects which sibling
//! configurations take part in duplicate detection, and decides where the
//! broker and docs objects live.

use std::fmt;

/// Where a configuration and everything it registers lives
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    /// A single namespace (`AddonsConfiguration`)
    Namespace(String),
    /// The whole cluster (`ClusterAddonsConfiguration`)
    #[default]
    Cluster,
}

impl Scope {
    /// Namespace scope for the given name
    pub fn namespace(ns: impl Into<String>) -> Self {
        Scope::Namespace(ns.into())
    }

    /// The namespace, or None for cluster scope
    pub fn as_namespace(&self) -> Option<&str> {
        match self {
            Scope::Namespace(ns) => Some(ns),
            Scope::Cluster => None,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Namespace(ns) => write!(f, "{ns}"),
            Scope::Cluster => write!(f, "cluster"),
        }
    }
}
