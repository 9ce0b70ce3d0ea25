//! Builds a [`RepositoryCollection`] from declared repositories
//!
//! Repositories are fetched one after another in declaration order. Every
//! failure is recorded on the repository or addon it belongs to; loading
//! never fails as a whole.

use catalogd_common::crd::SpecRepository;
use tracing::{debug, warn};

use crate::catalog::{validate_repository_url, AddonGetterFactory};
use crate::model::{AddonController, RepositoryCollection, RepositoryController};

/// Resolves repository URLs into addons
pub struct RepositoryLoader<'a> {
    factory: &'a dyn AddonGetterFactory,
    develop_mode: bool,
}

impl<'a> RepositoryLoader<'a> {
    pub fn new(factory: &'a dyn AddonGetterFactory, develop_mode: bool) -> Self {
        Self {
            factory,
            develop_mode,
        }
    }

    /// Fetch every repository and wrap each index entry in an [`AddonController`]
    ///
    /// Invalid URLs are skipped with a warning and do not appear in the
    /// collection at all.
    pub async fn load(&self, repositories: &[SpecRepository]) -> RepositoryCollection {
        let mut collection = RepositoryCollection::new();

        for spec in repositories {
            let url = match validate_repository_url(&spec.url, self.develop_mode) {
                Ok(url) => url,
                Err(e) => {
                    warn!(url = %spec.url, error = %e, "skipping repository with invalid URL");
                    continue;
                }
            };

            let mut repository = RepositoryController::new(&spec.url);

            let getter = match self.factory.new_getter(&url) {
                Ok(getter) => getter,
                Err(e) => {
                    warn!(url = %spec.url, error = %e, "cannot create addon getter");
                    repository.fetching_index_error(&e);
                    collection.add_repository(repository);
                    continue;
                }
            };

            let index = match getter.get_index().await {
                Ok(index) => index,
                Err(e) => {
                    warn!(url = %spec.url, error = %e, "fetching repository index failed");
                    repository.fetching_index_error(&e);
                    collection.add_repository(repository);
                    continue;
                }
            };

            for entry in index.iter_entries() {
                let mut addon = AddonController::new(&spec.url, entry);
                match getter.get_complete_addon(entry).await {
                    Ok(complete) => {
                        debug!(
                            url = %spec.url,
                            addon = %entry.key(),
                            id = %complete.addon.id,
                            "addon resolved"
                        );
                        addon.set_complete(complete);
                    }
                    Err(e) => {
                        warn!(
                            url = %spec.url,
                            addon = %entry.key(),
                            error = %e,
                            "addon could not be resolved"
                        );
                        addon.catalog_error(&e);
                    }
                }
                repository.add_addon(addon);
            }

            collection.add_repository(repository);
        }

        collection
    }
}
