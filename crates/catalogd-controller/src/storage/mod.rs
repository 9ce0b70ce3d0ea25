//! Addon and chart storage
//!
//! Both stores are partitioned by [`Scope`] and keyed by name and version.
//! Upserts replace silently and report whether the key already existed.

mod memory;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::catalog::{AddonPackage, Chart};
use crate::Scope;

pub use memory::{InMemoryAddonStorage, InMemoryChartStorage};

/// Storage failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StorageError {
    #[error("{kind} {name}:{version} not found in {scope}")]
    NotFound {
        kind: &'static str,
        scope: String,
        name: String,
        version: String,
    },

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn not_found(kind: &'static str, scope: &Scope, name: &str, version: &str) -> Self {
        Self::NotFound {
            kind,
            scope: scope.to_string(),
            name: name.to_string(),
            version: version.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Store of resolved addons
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AddonStorage: Send + Sync {
    /// Insert or replace; true when the key already existed
    async fn upsert(&self, scope: &Scope, addon: AddonPackage) -> Result<bool, StorageError>;

    async fn get(
        &self,
        scope: &Scope,
        name: &str,
        version: &str,
    ) -> Result<AddonPackage, StorageError>;

    async fn remove(&self, scope: &Scope, name: &str, version: &str) -> Result<(), StorageError>;

    /// Every addon in the scope, ordered by name then version
    async fn find_all(&self, scope: &Scope) -> Result<Vec<AddonPackage>, StorageError>;
}

/// Store of charts referenced by addon plans
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChartStorage: Send + Sync {
    /// Insert or replace; true when the key already existed
    async fn upsert(&self, scope: &Scope, chart: Chart) -> Result<bool, StorageError>;

    async fn remove(&self, scope: &Scope, name: &str, version: &str) -> Result<(), StorageError>;
}
