//! In-process fakes for collaborator traits
//!
//! Mocks cover single interactions; these fakes keep state so a test can run
//! several reconcile passes against the same world.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use url::Url;

use crate::broker::{BrokerFacade, BrokerSyncer};
use crate::catalog::{
    AddonGetter, AddonGetterFactory, AddonPackage, CatalogError, Chart, ChartRef, CompleteAddon,
    DocsEntry, DocsSource, Index, IndexEntry, Plan,
};
use crate::client::{ConfigurationClient, ConfigurationRecord};
use crate::docs::DocsProvider;
use crate::protection;
use crate::{Error, Scope};

// =============================================================================
// Catalog
// =============================================================================

/// Addon with one plan, its chart and one docs entry
pub(crate) fn complete_addon(url: &str, name: &str, version: &str, id: &str) -> CompleteAddon {
    CompleteAddon {
        addon: AddonPackage {
            id: id.to_string(),
            name: name.to_string(),
            version: version.to_string(),
            description: format!("{name} addon"),
            plans: vec![Plan {
                id: format!("{id}-micro"),
                name: "micro".to_string(),
                description: String::new(),
                chart_ref: ChartRef {
                    name: name.to_string(),
                    version: version.to_string(),
                },
            }],
            docs: vec![DocsEntry {
                display_name: name.to_string(),
                description: String::new(),
                sources: vec![DocsSource {
                    type_: "markdown".to_string(),
                    name: "docs".to_string(),
                    mode: "package".to_string(),
                    url: format!("https://docs.example.com/{name}.tgz"),
                    filter: None,
                }],
            }],
            repository_url: url.to_string(),
        },
        charts: vec![Chart {
            name: name.to_string(),
            version: version.to_string(),
            content: String::new(),
        }],
    }
}

#[derive(Clone, Default)]
struct FakeRepository {
    index_error: bool,
    entries: Vec<(IndexEntry, Result<CompleteAddon, CatalogError>)>,
}

/// Repositories served from memory, keyed by index URL
#[derive(Clone, Default)]
pub(crate) struct FakeCatalog {
    repositories: HashMap<String, FakeRepository>,
}

impl FakeCatalog {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_addon(mut self, url: &str, name: &str, version: &str, id: &str) -> Self {
        self.repositories
            .entry(url.to_string())
            .or_default()
            .entries
            .push((
                IndexEntry::new(name, version),
                Ok(complete_addon(url, name, version, id)),
            ));
        self
    }

    pub(crate) fn with_load_error(mut self, url: &str, name: &str, version: &str) -> Self {
        let entry = IndexEntry::new(name, version);
        let err = CatalogError::loading(&entry, "addon declares no plans");
        self.repositories
            .entry(url.to_string())
            .or_default()
            .entries
            .push((entry, Err(err)));
        self
    }

    pub(crate) fn with_index_error(mut self, url: &str) -> Self {
        self.repositories
            .entry(url.to_string())
            .or_default()
            .index_error = true;
        self
    }
}

struct FakeGetter {
    url: String,
    repository: FakeRepository,
}

#[async_trait]
impl AddonGetter for FakeGetter {
    async fn get_index(&self) -> Result<Index, CatalogError> {
        if self.repository.index_error {
            return Err(CatalogError::fetching(&self.url, "connection refused"));
        }
        let mut entries: BTreeMap<String, Vec<IndexEntry>> = BTreeMap::new();
        for (entry, _) in &self.repository.entries {
            entries
                .entry(entry.name.clone())
                .or_default()
                .push(entry.clone());
        }
        Ok(Index {
            api_version: "v1".to_string(),
            entries,
        })
    }

    async fn get_complete_addon(&self, entry: &IndexEntry) -> Result<CompleteAddon, CatalogError> {
        self.repository
            .entries
            .iter()
            .find(|(e, _)| e == entry)
            .map(|(_, result)| result.clone())
            .unwrap_or_else(|| Err(CatalogError::fetching(&self.url, "404 Not Found")))
    }
}

impl AddonGetterFactory for FakeCatalog {
    fn new_getter(&self, url: &Url) -> Result<Box<dyn AddonGetter>, CatalogError> {
        let repository = self
            .repositories
            .get(url.as_str())
            .cloned()
            .unwrap_or(FakeRepository {
                index_error: true,
                entries: vec![],
            });
        Ok(Box::new(FakeGetter {
            url: url.to_string(),
            repository,
        }))
    }
}

// =============================================================================
// Configurations
// =============================================================================

pub(crate) fn unavailable_error() -> kube::Error {
    kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: "service unavailable".to_string(),
        reason: "ServiceUnavailable".to_string(),
        code: 503,
    })
}

/// Consume one pending injected failure
fn take_failure(pending: &Mutex<u32>) -> bool {
    let mut pending = pending.lock().unwrap();
    if *pending == 0 {
        return false;
    }
    *pending -= 1;
    true
}

pub(crate) fn conflict_error() -> kube::Error {
    kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: "the object has been modified".to_string(),
        reason: "Conflict".to_string(),
        code: 409,
    })
}

/// Configuration objects with resourceVersion checks
///
/// Writes with a stale resourceVersion fail with 409. A deleting object whose
/// last finalizer is removed disappears, like it would from the API server.
#[derive(Default)]
pub(crate) struct FakeConfigurations {
    objects: Mutex<BTreeMap<(Scope, String), ConfigurationRecord>>,
    reprocessed: Mutex<Vec<String>>,
}

impl FakeConfigurations {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Store a new object as the API server would on create
    pub(crate) fn create(&self, name: &str, scope: Scope, urls: &[&str]) -> ConfigurationRecord {
        let mut record = ConfigurationRecord {
            name: name.to_string(),
            scope,
            generation: 1,
            resource_version: Some("1".to_string()),
            ..Default::default()
        };
        record.spec.repositories = urls
            .iter()
            .map(|u| catalogd_common::crd::SpecRepository::new(*u))
            .collect();
        self.put(record.clone());
        record
    }

    pub(crate) fn put(&self, record: ConfigurationRecord) {
        self.objects
            .lock()
            .unwrap()
            .insert((record.scope.clone(), record.name.clone()), record);
    }

    pub(crate) fn get(&self, name: &str, scope: &Scope) -> Option<ConfigurationRecord> {
        self.objects
            .lock()
            .unwrap()
            .get(&(scope.clone(), name.to_string()))
            .cloned()
    }

    /// Replace the repository list, bumping the generation
    pub(crate) fn set_repositories(&self, name: &str, scope: &Scope, urls: &[&str]) {
        self.modify(name, scope, |record| {
            record.spec.repositories = urls
                .iter()
                .map(|u| catalogd_common::crd::SpecRepository::new(*u))
                .collect();
            record.generation += 1;
        });
    }

    /// Mark for deletion as the API server would on delete
    pub(crate) fn mark_deleted(&self, name: &str, scope: &Scope) {
        self.modify(name, scope, |record| record.deleting = true);
    }

    pub(crate) fn reprocessed(&self) -> Vec<String> {
        self.reprocessed.lock().unwrap().clone()
    }

    fn modify(&self, name: &str, scope: &Scope, f: impl FnOnce(&mut ConfigurationRecord)) {
        let mut objects = self.objects.lock().unwrap();
        if let Some(record) = objects.get_mut(&(scope.clone(), name.to_string())) {
            f(record);
            bump(record);
        }
    }

    fn write(
        &self,
        record: &ConfigurationRecord,
        apply: impl FnOnce(&mut ConfigurationRecord),
    ) -> Result<ConfigurationRecord, Error> {
        let mut objects = self.objects.lock().unwrap();
        let key = (record.scope.clone(), record.name.clone());
        let stored = objects.get_mut(&key).ok_or_else(|| {
            Error::Kube(kube::Error::Api(kube::error::ErrorResponse {
                status: "Failure".to_string(),
                message: format!("{} not found", record.name),
                reason: "NotFound".to_string(),
                code: 404,
            }))
        })?;
        if stored.resource_version != record.resource_version {
            return Err(Error::Kube(conflict_error()));
        }
        apply(stored);
        bump(stored);
        let updated = stored.clone();
        if updated.deleting && updated.finalizers.is_empty() {
            objects.remove(&key);
        }
        Ok(updated)
    }
}

fn bump(record: &mut ConfigurationRecord) {
    let next = record
        .resource_version
        .as_deref()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0)
        + 1;
    record.resource_version = Some(next.to_string());
}

#[async_trait]
impl ConfigurationClient for FakeConfigurations {
    async fn list(&self, scope: &Scope) -> Result<Vec<ConfigurationRecord>, Error> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .values()
            .filter(|r| &r.scope == scope)
            .cloned()
            .collect())
    }

    async fn update_status(
        &self,
        record: &ConfigurationRecord,
    ) -> Result<ConfigurationRecord, Error> {
        let status = record.status.clone();
        self.write(record, |stored| stored.status = status)
    }

    async fn add_finalizer(
        &self,
        record: &ConfigurationRecord,
    ) -> Result<ConfigurationRecord, Error> {
        if protection::has_finalizer(&record.finalizers) {
            return Ok(record.clone());
        }
        self.write(record, |stored| {
            protection::add_finalizer(&mut stored.finalizers);
        })
    }

    async fn remove_finalizer(
        &self,
        record: &ConfigurationRecord,
    ) -> Result<ConfigurationRecord, Error> {
        if !protection::has_finalizer(&record.finalizers) {
            return Ok(record.clone());
        }
        self.write(record, |stored| {
            protection::remove_finalizer(&mut stored.finalizers);
        })
    }

    async fn request_reprocess(&self, name: &str, scope: &Scope) -> Result<(), Error> {
        self.modify(name, scope, |record| {
            record.spec.reprocess_request += 1;
            record.generation += 1;
        });
        self.reprocessed.lock().unwrap().push(name.to_string());
        Ok(())
    }
}

// =============================================================================
// Broker and docs
// =============================================================================

/// Broker facade and syncer recording what was asked of them
#[derive(Default)]
pub(crate) struct RecordingBroker {
    brokers: Mutex<HashSet<Scope>>,
    creates: Mutex<Vec<Scope>>,
    syncs: Mutex<Vec<Scope>>,
    failing_creates: Mutex<u32>,
}

impl RecordingBroker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn exists(&self, scope: &Scope) -> bool {
        self.brokers.lock().unwrap().contains(scope)
    }

    pub(crate) fn creates(&self) -> usize {
        self.creates.lock().unwrap().len()
    }

    pub(crate) fn syncs(&self) -> usize {
        self.syncs.lock().unwrap().len()
    }

    /// Fail the next `n` creates with a 503
    pub(crate) fn fail_next_creates(&self, n: u32) {
        *self.failing_creates.lock().unwrap() = n;
    }
}

#[async_trait]
impl BrokerFacade for RecordingBroker {
    async fn exist(&self, scope: &Scope) -> Result<bool, Error> {
        Ok(self.exists(scope))
    }

    async fn create(&self, scope: &Scope) -> Result<(), Error> {
        if take_failure(&self.failing_creates) {
            return Err(Error::Broker {
                scope: scope.to_string(),
                source: unavailable_error(),
            });
        }
        self.creates.lock().unwrap().push(scope.clone());
        self.brokers.lock().unwrap().insert(scope.clone());
        Ok(())
    }

    async fn delete(&self, scope: &Scope) -> Result<(), Error> {
        self.brokers.lock().unwrap().remove(scope);
        Ok(())
    }
}

#[async_trait]
impl BrokerSyncer for RecordingBroker {
    async fn sync(&self, scope: &Scope) -> Result<(), Error> {
        self.syncs.lock().unwrap().push(scope.clone());
        Ok(())
    }
}

/// Docs topics held in memory, keyed by scope and addon id
#[derive(Default)]
pub(crate) struct RecordingDocs {
    topics: Mutex<HashMap<(Scope, String), AddonPackage>>,
    removals: Mutex<Vec<String>>,
    failing_ensures: Mutex<u32>,
    failing_removals: Mutex<u32>,
}

impl RecordingDocs {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn has_topic(&self, scope: &Scope, id: &str) -> bool {
        self.topics
            .lock()
            .unwrap()
            .contains_key(&(scope.clone(), id.to_string()))
    }

    pub(crate) fn removals(&self) -> Vec<String> {
        self.removals.lock().unwrap().clone()
    }

    /// Fail the next `n` topic writes with a 503
    pub(crate) fn fail_next_ensures(&self, n: u32) {
        *self.failing_ensures.lock().unwrap() = n;
    }

    /// Fail the next `n` topic deletions with a 503
    pub(crate) fn fail_next_removals(&self, n: u32) {
        *self.failing_removals.lock().unwrap() = n;
    }
}

fn docs_unavailable(id: &str) -> Error {
    Error::Docs {
        id: id.to_string(),
        source: unavailable_error(),
    }
}

#[async_trait]
impl DocsProvider for RecordingDocs {
    async fn ensure_topic(&self, addon: &AddonPackage, scope: &Scope) -> Result<(), Error> {
        if take_failure(&self.failing_ensures) {
            return Err(docs_unavailable(&addon.id));
        }
        self.topics
            .lock()
            .unwrap()
            .insert((scope.clone(), addon.id.clone()), addon.clone());
        Ok(())
    }

    async fn ensure_topic_removed(&self, id: &str, scope: &Scope) -> Result<(), Error> {
        if take_failure(&self.failing_removals) {
            return Err(docs_unavailable(id));
        }
        self.topics
            .lock()
            .unwrap()
            .remove(&(scope.clone(), id.to_string()));
        self.removals.lock().unwrap().push(id.to_string());
        Ok(())
    }
}
