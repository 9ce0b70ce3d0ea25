use catalogd_common::crd::{Addon, AddonStatus, AddonStatusReason};

use crate::catalog::{CatalogError, CompleteAddon, IndexEntry};

/// One index entry and the outcome of resolving it
///
/// Status only moves from Ready to Failed; nothing in a pass upgrades a
/// failed addon.
#[derive(Clone, Debug)]
pub struct AddonController {
    /// Content identifier; empty until the addon is resolved
    pub id: String,
    /// Repository the entry came from
    pub url: String,
    /// Status snapshot written back to the configuration
    pub addon: Addon,
    /// Resolved payload, owned by this controller
    pub complete: Option<CompleteAddon>,
}

impl AddonController {
    pub fn new(url: impl Into<String>, entry: &IndexEntry) -> Self {
        Self {
            id: String::new(),
            url: url.into(),
            addon: Addon {
                name: entry.name.clone(),
                version: entry.version.clone(),
                status: AddonStatus::Ready,
                reason: None,
                message: String::new(),
            },
            complete: None,
        }
    }

    /// Resolved, so duplicate checks may consider it
    pub fn is_complete(&self) -> bool {
        !self.id.is_empty()
    }

    pub fn is_ready(&self) -> bool {
        self.addon.status == AddonStatus::Ready
    }

    /// Complete and not failed by any check so far
    pub fn is_registrable(&self) -> bool {
        self.is_complete() && self.is_ready()
    }

    pub fn key(&self) -> String {
        self.addon.key()
    }

    pub fn set_complete(&mut self, complete: CompleteAddon) {
        self.id = complete.addon.id.clone();
        self.complete = Some(complete);
    }

    /// Record a fetch or load failure from the catalog
    pub fn catalog_error(&mut self, err: &CatalogError) {
        let reason = match err {
            CatalogError::Loading { .. } => AddonStatusReason::LoadingError,
            CatalogError::Fetching { .. } | CatalogError::InvalidUrl { .. } => {
                AddonStatusReason::FetchingError
            }
        };
        let cause = err.to_string();
        self.set_failed(reason, reason.message(&[cause.as_str()]));
    }

    pub fn registering_error(&mut self, err: &dyn std::fmt::Display) {
        let reason = AddonStatusReason::RegisteringError;
        let cause = err.to_string();
        self.set_failed(reason, reason.message(&[cause.as_str()]));
    }

    /// Same identifier (or `name:version`) already claimed earlier in this pass
    pub fn conflict_in_specified_repositories(&mut self, winner_url: &str, winner_key: &str) {
        let reason = AddonStatusReason::ConflictInSpecifiedRepositories;
        self.set_failed(reason, reason.message(&[winner_url, winner_key]));
    }

    /// Same `name:version` already registered by another configuration
    pub fn conflict_with_already_registered(
        &mut self,
        configuration: &str,
        url: &str,
        key: &str,
    ) {
        let reason = AddonStatusReason::ConflictWithAlreadyRegisteredAddons;
        self.set_failed(reason, reason.message(&[configuration, url, key]));
    }

    fn set_failed(&mut self, reason: AddonStatusReason, message: String) {
        self.addon.status = AddonStatus::Failed;
        self.addon.reason = Some(reason);
        self.addon.message = message;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::AddonPackage;

    fn controller() -> AddonController {
        AddonController::new("https://repo/index.yaml", &IndexEntry::new("redis", "0.0.1"))
    }

    #[test]
    fn new_controller_is_ready_but_incomplete() {
        let c = controller();
        assert!(c.is_ready());
        assert!(!c.is_complete());
        assert!(!c.is_registrable());
        assert_eq!(c.key(), "redis:0.0.1");
    }

    #[test]
    fn set_complete_takes_identifier_from_addon() {
        let mut c = controller();
        c.set_complete(CompleteAddon {
            addon: AddonPackage {
                id: "aaa".to_string(),
                ..Default::default()
            },
            charts: vec![],
        });
        assert_eq!(c.id, "aaa");
        assert!(c.is_registrable());
    }

    #[test]
    fn failures_always_carry_a_reason() {
        let mut c = controller();
        c.catalog_error(&CatalogError::Loading {
            name: "redis".to_string(),
            version: "0.0.1".to_string(),
            message: "bad yaml".to_string(),
        });
        assert_eq!(c.addon.status, AddonStatus::Failed);
        assert_eq!(c.addon.reason, Some(AddonStatusReason::LoadingError));
        assert!(c.addon.message.contains("bad yaml"));

        let mut c = controller();
        c.catalog_error(&CatalogError::fetching("https://repo", "timeout"));
        assert_eq!(c.addon.reason, Some(AddonStatusReason::FetchingError));

        let mut c = controller();
        c.registering_error(&"storage down");
        assert_eq!(c.addon.reason, Some(AddonStatusReason::RegisteringError));
    }
}
