use std::collections::{HashMap, HashSet};

use catalogd_common::crd::{AddonsConfigurationStatus, StatusRepository};

use super::{AddonController, RepositoryController};

/// Every repository declared on one configuration, in declaration order
///
/// Declaration order is the tie-break for duplicates: the first addon seen
/// keeps its Ready status, later ones are failed.
#[derive(Clone, Debug, Default)]
pub struct RepositoryCollection {
    pub repositories: Vec<RepositoryController>,
}

impl RepositoryCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_repository(&mut self, repository: RepositoryController) {
        self.repositories.push(repository);
    }

    fn addons(&self) -> impl Iterator<Item = &AddonController> {
        self.repositories.iter().flat_map(|r| r.addons.iter())
    }

    fn addons_mut(&mut self) -> impl Iterator<Item = &mut AddonController> {
        self.repositories.iter_mut().flat_map(|r| r.addons.iter_mut())
    }

    /// Fail every addon whose identifier or `name:version` was already
    /// claimed by an earlier addon of this collection.
    pub fn revise_bundle_duplication_in_repository(&mut self) {
        // id / name:version -> (winner url, winner name:version)
        let mut by_id: HashMap<String, (String, String)> = HashMap::new();
        let mut by_key: HashMap<String, (String, String)> = HashMap::new();

        for addon in self.addons_mut().filter(|a| a.is_registrable()) {
            let key = addon.key();
            let winner = by_id.get(&addon.id).or_else(|| by_key.get(&key)).cloned();
            match winner {
                Some((url, winner_key)) => {
                    addon.conflict_in_specified_repositories(&url, &winner_key)
                }
                None => {
                    let claim = (addon.url.clone(), key.clone());
                    by_id.insert(addon.id.clone(), claim.clone());
                    by_key.insert(key, claim);
                }
            }
        }
    }

    /// Fail every addon whose `name:version` is Ready in the status of one of
    /// `existing` (other configurations in the same scope).
    ///
    /// When several configurations registered the same key, the first one
    /// listed is cited.
    pub fn revise_bundle_duplication_in_storage<'a, I>(&mut self, existing: I)
    where
        I: IntoIterator<Item = (&'a str, &'a AddonsConfigurationStatus)>,
    {
        // (name, version) -> (configuration, url)
        let mut registered: HashMap<(String, String), (String, String)> = HashMap::new();
        for (configuration, status) in existing {
            for (repo, addon) in status.ready_addons() {
                registered
                    .entry((addon.name.clone(), addon.version.clone()))
                    .or_insert_with(|| (configuration.to_string(), repo.url.clone()));
            }
        }
        if registered.is_empty() {
            return;
        }

        for addon in self.addons_mut().filter(|a| a.is_registrable()) {
            let lookup = (addon.addon.name.clone(), addon.addon.version.clone());
            if let Some((configuration, url)) = registered.get(&lookup) {
                let key = addon.key();
                addon.conflict_with_already_registered(configuration, url, &key);
            }
        }
    }

    /// Complete addons that survived every check
    pub fn ready_addons(&self) -> Vec<&AddonController> {
        self.addons().filter(|a| a.is_registrable()).collect()
    }

    pub fn ready_addons_mut(&mut self) -> Vec<&mut AddonController> {
        self.addons_mut().filter(|a| a.is_registrable()).collect()
    }

    /// Any repository failed, either its fetch or one of its addons
    pub fn is_repositories_failed(&self) -> bool {
        self.repositories.iter().any(RepositoryController::is_failed)
    }

    /// Any addon failed because of a duplicate; this alone drives the phase
    pub fn is_repositories_id_conflict(&self) -> bool {
        self.addons()
            .any(|a| a.addon.reason.is_some_and(|r| r.is_conflict()))
    }

    /// `name:version` of every addon in the collection, whatever its status
    pub fn keys(&self) -> HashSet<String> {
        self.addons().map(AddonController::key).collect()
    }

    pub fn snapshot(&self) -> Vec<StatusRepository> {
        self.repositories
            .iter()
            .map(RepositoryController::snapshot)
            .collect()
    }
}
