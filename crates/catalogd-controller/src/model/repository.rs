use catalogd_common::crd::{AddonStatus, RepositoryStatusReason, StatusRepository};

use super::AddonController;

/// One declared repository and the addons resolved from it
#[derive(Clone, Debug)]
pub struct RepositoryController {
    pub url: String,
    /// Set when the index itself could not be fetched
    pub reason: Option<RepositoryStatusReason>,
    pub message: String,
    pub addons: Vec<AddonController>,
}

impl RepositoryController {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reason: None,
            message: String::new(),
            addons: Vec::new(),
        }
    }

    pub fn add_addon(&mut self, addon: AddonController) {
        self.addons.push(addon);
    }

    pub fn fetching_index_error(&mut self, err: &dyn std::fmt::Display) {
        let reason = RepositoryStatusReason::FetchingIndexError;
        self.message = reason.message(&err.to_string());
        self.reason = Some(reason);
    }

    pub fn has_failed_addons(&self) -> bool {
        self.addons.iter().any(|a| !a.is_ready())
    }

    /// Failed when its own fetch failed or any addon is not Ready
    pub fn is_failed(&self) -> bool {
        self.reason.is_some() || self.has_failed_addons()
    }

    pub fn status(&self) -> AddonStatus {
        if self.is_failed() {
            AddonStatus::Failed
        } else {
            AddonStatus::Ready
        }
    }

    pub fn snapshot(&self) -> StatusRepository {
        StatusRepository {
            url: self.url.clone(),
            status: self.status(),
            reason: self.reason,
            message: self.message.clone(),
            addons: self.addons.iter().map(|a| a.addon.clone()).collect(),
        }
    }
}
