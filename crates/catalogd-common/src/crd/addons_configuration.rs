//! AddonsConfiguration and ClusterAddonsConfiguration CRD types
//!
//! Both kinds share the same spec and status shape; they differ only in
//! scope. The status doubles as the registry of addons a configuration has
//! registered, so sibling configurations read it for duplicate detection.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Maximum length of a status message in bytes
pub const MAX_MESSAGE_LEN: usize = 512;

// =============================================================================
// Spec
// =============================================================================

/// A repository declared on a configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SpecRepository {
    /// URL of the repository index
    pub url: String,
}

impl SpecRepository {
    /// Create a repository entry for the given URL
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

/// Spec fields shared by the namespaced and cluster-scoped kinds
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CommonAddonsConfigurationSpec {
    /// Monotonic counter; bumping it forces a new reconciliation pass
    #[serde(default)]
    pub reprocess_request: i64,

    /// Repositories in declaration order
    #[serde(default)]
    pub repositories: Vec<SpecRepository>,
}

/// Namespaced set of addon repositories
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "addons.catalogd.dev",
    version = "v1alpha1",
    kind = "AddonsConfiguration",
    plural = "addonsconfigurations",
    shortname = "ac",
    namespaced,
    status = "AddonsConfigurationStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AddonsConfigurationSpec {
    /// Repositories and reprocess counter
    #[serde(flatten)]
    pub common: CommonAddonsConfigurationSpec,
}

/// Cluster-wide set of addon repositories
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "addons.catalogd.dev",
    version = "v1alpha1",
    kind = "ClusterAddonsConfiguration",
    plural = "clusteraddonsconfigurations",
    shortname = "cac",
    status = "AddonsConfigurationStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterAddonsConfigurationSpec {
    /// Repositories and reprocess counter
    #[serde(flatten)]
    pub common: CommonAddonsConfigurationSpec,
}

// =============================================================================
// Phases and statuses
// =============================================================================

/// Aggregate phase of a configuration
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum AddonsConfigurationPhase {
    /// Accepted, not yet processed
    #[default]
    Pending,
    /// Processed without identifier conflicts
    Ready,
    /// Processed with at least one conflicting addon
    Failed,
}

impl std::fmt::Display for AddonsConfigurationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Ready => write!(f, "Ready"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Status of a single addon or repository
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum AddonStatus {
    /// Resolved and registered
    #[default]
    Ready,
    /// Could not be resolved or registered
    Failed,
}

impl std::fmt::Display for AddonStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready => write!(f, "Ready"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Why an addon was marked Failed
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum AddonStatusReason {
    /// Same identifier already declared earlier in this configuration
    ConflictInSpecifiedRepositories,
    /// Same name and version already registered by another configuration
    ConflictWithAlreadyRegisteredAddons,
    /// The addon could not be fetched
    FetchingError,
    /// The addon was fetched but its content is invalid
    LoadingError,
    /// Storing the addon failed
    RegisteringError,
}

impl AddonStatusReason {
    /// Whether this reason represents an identifier or name:version conflict
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::ConflictInSpecifiedRepositories | Self::ConflictWithAlreadyRegisteredAddons
        )
    }

    /// Render the human-readable message for this reason
    ///
    /// Conflict reasons take the conflicting location and `name:version`;
    /// the others take the underlying error text.
    pub fn message(&self, args: &[&str]) -> String {
        let arg = |i: usize| args.get(i).copied().unwrap_or("");
        let msg = match self {
            Self::ConflictInSpecifiedRepositories => format!(
                "Specified repositories have addons with the same ID: [url: {}, addons: {}]",
                arg(0),
                arg(1)
            ),
            Self::ConflictWithAlreadyRegisteredAddons => format!(
                "An addon with the same name and version is already registered: [ConfigurationName: {}, url: {}, addons: {}]",
                arg(0),
                arg(1),
                arg(2)
            ),
            Self::FetchingError => format!("Fetching addon failed: {}", arg(0)),
            Self::LoadingError => format!("Loading addon failed: {}", arg(0)),
            Self::RegisteringError => format!("Registering addon failed: {}", arg(0)),
        };
        bounded_message(msg)
    }
}

impl std::fmt::Display for AddonStatusReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConflictInSpecifiedRepositories => write!(f, "ConflictInSpecifiedRepositories"),
            Self::ConflictWithAlreadyRegisteredAddons => {
                write!(f, "ConflictWithAlreadyRegisteredAddons")
            }
            Self::FetchingError => write!(f, "FetchingError"),
            Self::LoadingError => write!(f, "LoadingError"),
            Self::RegisteringError => write!(f, "RegisteringError"),
        }
    }
}

/// Why a repository was marked Failed on its own (not through its addons)
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum RepositoryStatusReason {
    /// The repository index could not be fetched
    FetchingIndexError,
}

impl RepositoryStatusReason {
    /// Render the human-readable message for this reason
    pub fn message(&self, cause: &str) -> String {
        match self {
            Self::FetchingIndexError => {
                bounded_message(format!("Fetching repository index failed: {cause}"))
            }
        }
    }
}

impl std::fmt::Display for RepositoryStatusReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FetchingIndexError => write!(f, "FetchingIndexError"),
        }
    }
}

/// Truncate a message to [`MAX_MESSAGE_LEN`] bytes on a character boundary
pub fn bounded_message(msg: impl Into<String>) -> String {
    let mut msg = msg.into();
    if msg.len() > MAX_MESSAGE_LEN {
        let mut cut = MAX_MESSAGE_LEN;
        while !msg.is_char_boundary(cut) {
            cut -= 1;
        }
        msg.truncate(cut);
    }
    msg
}

// =============================================================================
// Status
// =============================================================================

/// Status snapshot of one addon
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Addon {
    /// Addon name
    pub name: String,
    /// Addon version
    pub version: String,
    /// Ready or Failed
    pub status: AddonStatus,
    /// Set when status is Failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<AddonStatusReason>,
    /// Human-readable detail
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl Addon {
    /// The `name:version` key used for duplicate detection
    pub fn key(&self) -> String {
        format!("{}:{}", self.name, self.version)
    }

    /// Whether this addon is Ready
    pub fn is_ready(&self) -> bool {
        self.status == AddonStatus::Ready
    }
}

/// Status snapshot of one repository
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusRepository {
    /// Repository URL
    pub url: String,
    /// Ready or Failed
    pub status: AddonStatus,
    /// Set when the repository index itself could not be fetched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<RepositoryStatusReason>,
    /// Human-readable detail
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    /// Addons resolved from this repository
    #[serde(default)]
    pub addons: Vec<Addon>,
}

/// Status shared by both configuration kinds
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AddonsConfigurationStatus {
    /// Aggregate phase
    #[serde(default)]
    pub phase: AddonsConfigurationPhase,

    /// Generation this status reflects; 0 means never processed
    #[serde(default)]
    pub observed_generation: i64,

    /// When the configuration was last processed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_processed_time: Option<DateTime<Utc>>,

    /// Per-repository snapshot
    #[serde(default)]
    pub repositories: Vec<StatusRepository>,
}

impl AddonsConfigurationStatus {
    /// Set the phase (builder style)
    pub fn with_phase(mut self, phase: AddonsConfigurationPhase) -> Self {
        self.phase = phase;
        self
    }

    /// Stamp the processing time only (builder style)
    ///
    /// Used for intermediate writes; the generation stays unobserved until
    /// a pass completes.
    pub fn processed(mut self) -> Self {
        self.last_processed_time = Some(Utc::now());
        self
    }

    /// Stamp observed generation and processing time (builder style)
    pub fn observed(mut self, generation: i64) -> Self {
        self.observed_generation = generation;
        self.processed()
    }

    /// Iterate over every Ready addon across all repositories
    pub fn ready_addons(&self) -> impl Iterator<Item = (&StatusRepository, &Addon)> {
        self.repositories
            .iter()
            .flat_map(|repo| repo.addons.iter().map(move |addon| (repo, addon)))
            .filter(|(_, addon)| addon.is_ready())
    }
}
