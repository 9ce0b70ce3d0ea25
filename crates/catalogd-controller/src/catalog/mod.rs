//! Addon catalog: repository index and addon manifests
//!
//! A repository is an `index.yaml` listing addon entries. Each entry resolves
//! to a complete addon manifest stored next to the index as
//! `<name>-<version>.yaml`. Fetching is behind [`AddonGetter`] so the loader
//! can be driven by fakes in tests.

mod http;
mod validation;

use std::collections::BTreeMap;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use url::Url;

pub use self::http::{HttpAddonGetter, HttpAddonGetterFactory};
pub use self::validation::validate_repository_url;

// =============================================================================
// Errors
// =============================================================================

/// Why an index or addon could not be resolved
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CatalogError {
    /// Transport failure or unreadable document
    #[error("fetching {url}: {message}")]
    Fetching { url: String, message: String },

    /// Document fetched but its content is invalid
    #[error("loading {name}:{version}: {message}")]
    Loading {
        name: String,
        version: String,
        message: String,
    },

    /// Repository URL rejected before any request was made
    #[error("invalid repository URL {url}: {message}")]
    InvalidUrl { url: String, message: String },
}

impl CatalogError {
    pub fn fetching(url: impl Into<String>, message: impl ToString) -> Self {
        Self::Fetching {
            url: url.into(),
            message: message.to_string(),
        }
    }

    pub fn loading(entry: &IndexEntry, message: impl ToString) -> Self {
        Self::Loading {
            name: entry.name.clone(),
            version: entry.version.clone(),
            message: message.to_string(),
        }
    }
}

// =============================================================================
// Index
// =============================================================================

/// One entry of a repository index
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct IndexEntry {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
}

impl IndexEntry {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: String::new(),
        }
    }

    pub fn key(&self) -> String {
        format!("{}:{}", self.name, self.version)
    }

    /// File name of the addon manifest relative to the index
    pub fn manifest_file(&self) -> String {
        format!("{}-{}.yaml", self.name, self.version)
    }
}

/// Repository index document
///
/// Entries are keyed by addon name; a `BTreeMap` keeps iteration order
/// stable so repeated passes visit entries in the same order.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Index {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub entries: BTreeMap<String, Vec<IndexEntry>>,
}

impl Index {
    /// All entries, in name order then declaration order
    pub fn iter_entries(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.values().flatten()
    }
}

// =============================================================================
// Addon payload
// =============================================================================

/// Reference from a plan to the chart that installs it
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ChartRef {
    pub name: String,
    pub version: String,
}

/// Service plan exposed by an addon
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub chart_ref: ChartRef,
}

/// Source of documentation rendered into a docs topic
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct DocsSource {
    #[serde(rename = "type")]
    pub type_: String,
    pub name: String,
    pub mode: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

/// Documentation declared by an addon
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DocsEntry {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub sources: Vec<DocsSource>,
}

/// Resolved addon as persisted in the addon store
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AddonPackage {
    /// Content identifier, unique across every repository
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub plans: Vec<Plan>,
    #[serde(default)]
    pub docs: Vec<DocsEntry>,
    /// Repository the addon was resolved from
    #[serde(default)]
    pub repository_url: String,
}

impl AddonPackage {
    pub fn key(&self) -> String {
        format!("{}:{}", self.name, self.version)
    }
}

/// Chart installed by an addon plan; content is opaque here
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Chart {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub content: String,
}

/// An addon with the charts its plans reference
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompleteAddon {
    pub addon: AddonPackage,
    pub charts: Vec<Chart>,
}

/// Addon manifest document as served by a repository
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AddonManifest {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub plans: Vec<Plan>,
    #[serde(default)]
    pub docs: Vec<DocsEntry>,
    #[serde(default)]
    pub charts: Vec<Chart>,
}

impl AddonManifest {
    /// Check the manifest against the index entry it was resolved from
    pub(crate) fn into_complete(
        self,
        entry: &IndexEntry,
        repository_url: &str,
    ) -> Result<CompleteAddon, CatalogError> {
        if self.id.trim().is_empty() {
            return Err(CatalogError::loading(entry, "manifest has no id"));
        }
        if self.name != entry.name || self.version != entry.version {
            return Err(CatalogError::loading(
                entry,
                format!(
                    "manifest describes {}:{}, index expects {}",
                    self.name,
                    self.version,
                    entry.key()
                ),
            ));
        }
        if self.plans.is_empty() {
            return Err(CatalogError::loading(entry, "addon declares no plans"));
        }
        for plan in &self.plans {
            let known = self
                .charts
                .iter()
                .any(|c| c.name == plan.chart_ref.name && c.version == plan.chart_ref.version);
            if !known {
                return Err(CatalogError::loading(
                    entry,
                    format!(
                        "plan {} references unknown chart {}:{}",
                        plan.name, plan.chart_ref.name, plan.chart_ref.version
                    ),
                ));
            }
        }

        Ok(CompleteAddon {
            addon: AddonPackage {
                id: self.id,
                name: self.name,
                version: self.version,
                description: self.description,
                plans: self.plans,
                docs: self.docs,
                repository_url: repository_url.to_string(),
            },
            charts: self.charts,
        })
    }
}

// =============================================================================
// Traits
// =============================================================================

/// Fetches the index and addons of one repository
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AddonGetter: Send + Sync {
    async fn get_index(&self) -> Result<Index, CatalogError>;

    async fn get_complete_addon(&self, entry: &IndexEntry) -> Result<CompleteAddon, CatalogError>;
}

/// Creates an [`AddonGetter`] per repository URL
#[cfg_attr(test, automock)]
pub trait AddonGetterFactory: Send + Sync {
    fn new_getter(&self, url: &Url) -> Result<Box<dyn AddonGetter>, CatalogError>;
}
