//! Addons configuration reconciler
//!
//! One algorithm serves both `AddonsConfiguration` and
//! `ClusterAddonsConfiguration`; the kind only decides the [`Scope`] and which
//! [`ConfigurationClient`] lists siblings and persists status.
//!
//! A pass moves a configuration through:
//!
//! ```text
//! observedGeneration == 0          -> Pending + finalizer, then process
//! generation > observedGeneration  -> process against the last status
//! deletionTimestamp set            -> release addons, drop finalizer
//! ```
//!
//! Processing loads every repository, runs both duplicate checks, registers
//! the surviving addons when no conflict was found, removes orphans and
//! ensures the broker for the scope. The status snapshot is written last, so
//! a pass that fails midway is retried in full.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use catalogd_common::crd::{AddonStatus, AddonsConfigurationPhase, AddonsConfigurationStatus};
use catalogd_common::events::{actions, reasons, EventPublisher, KubeEventPublisher};
use catalogd_common::metrics::{record_addons_registered, record_addons_removed, ReconcileTimer};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use crate::broker::{BrokerConfig, BrokerFacade, BrokerSyncer, KubeBrokerFacade, KubeBrokerSyncer};
use crate::catalog::{AddonGetterFactory, AddonPackage, Chart, HttpAddonGetterFactory};
use crate::client::{
    AddonsConfigurationResource, ConfigurationClient, ConfigurationRecord, KubeConfigurationClient,
};
use crate::docs::{single_docs_entry, DocsProvider, KubeDocsProvider};
use crate::loader::RepositoryLoader;
use crate::model::RepositoryCollection;
use crate::protection;
use crate::storage::{
    AddonStorage, ChartStorage, InMemoryAddonStorage, InMemoryChartStorage, StorageError,
};
use crate::{Error, Scope};

/// Requeue delay after a retryable failure
pub const RETRY_DELAY: Duration = Duration::from_secs(15);

/// Default timeout for fetching repository documents
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// Context
// =============================================================================

/// Collaborators of one reconciler
///
/// The addon and chart stores are shared by both kinds; everything else is
/// stateless. Use [`ContextBuilder`] in production code.
pub struct Context {
    /// Configuration objects of the reconciled kind
    pub configurations: Arc<dyn ConfigurationClient>,
    /// Catalog access per repository URL
    pub getters: Arc<dyn AddonGetterFactory>,
    pub addons: Arc<dyn AddonStorage>,
    pub charts: Arc<dyn ChartStorage>,
    pub broker: Arc<dyn BrokerFacade>,
    pub syncer: Arc<dyn BrokerSyncer>,
    pub docs: Arc<dyn DocsProvider>,
    pub events: Arc<dyn EventPublisher>,
    /// Accept plain `http` repository URLs
    pub develop_mode: bool,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }
}

/// Builder for [`Context`]
///
/// Build one context per kind from clones of the same builder so both
/// reconcilers share the addon and chart stores.
#[derive(Clone)]
pub struct ContextBuilder {
    client: Client,
    broker_config: BrokerConfig,
    fetch_timeout: Duration,
    develop_mode: bool,
    addons: Arc<dyn AddonStorage>,
    charts: Arc<dyn ChartStorage>,
    events: Option<Arc<dyn EventPublisher>>,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            broker_config: BrokerConfig::default(),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            develop_mode: false,
            addons: Arc::new(InMemoryAddonStorage::new()),
            charts: Arc::new(InMemoryChartStorage::new()),
            events: None,
        }
    }

    pub fn broker_config(mut self, config: BrokerConfig) -> Self {
        self.broker_config = config;
        self
    }

    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn develop_mode(mut self, enabled: bool) -> Self {
        self.develop_mode = enabled;
        self
    }

    /// Override the event publisher (defaults to Kubernetes Events)
    pub fn event_publisher(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the context reconciling kind `K`
    pub fn build<K: AddonsConfigurationResource>(self) -> Result<Context, Error> {
        let events = self.events.unwrap_or_else(|| {
            Arc::new(KubeEventPublisher::new(
                self.client.clone(),
                catalogd_common::FIELD_MANAGER,
            ))
        });
        Ok(Context {
            configurations: Arc::new(KubeConfigurationClient::<K>::new(self.client.clone())),
            getters: Arc::new(HttpAddonGetterFactory::new(self.fetch_timeout)?),
            addons: self.addons,
            charts: self.charts,
            broker: Arc::new(KubeBrokerFacade::new(
                self.client.clone(),
                self.broker_config.clone(),
            )),
            syncer: Arc::new(KubeBrokerSyncer::new(
                self.client.clone(),
                self.broker_config,
            )),
            docs: Arc::new(KubeDocsProvider::new(self.client)),
            events,
            develop_mode: self.develop_mode,
        })
    }
}

// =============================================================================
// Entry points
// =============================================================================

/// Reconcile a configuration of kind `K`
#[instrument(
    skip(obj, ctx),
    fields(kind = K::KIND_NAME, name = %obj.name_any(), scope = %obj.scope())
)]
pub async fn reconcile<K: AddonsConfigurationResource>(
    obj: Arc<K>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    let timer = ReconcileTimer::start(K::KIND_NAME);
    let record = ConfigurationRecord::from_resource(obj.as_ref());
    match reconcile_record(&record, &ctx).await {
        Ok(action) => {
            timer.success();
            Ok(action)
        }
        Err(e) => {
            timer.error(e.is_retryable());
            Err(e)
        }
    }
}

/// Requeue retryable failures; wait for the next change otherwise
pub fn error_policy<K: AddonsConfigurationResource>(
    obj: Arc<K>,
    error: &Error,
    _ctx: Arc<Context>,
) -> Action {
    if error.is_retryable() {
        warn!(
            kind = K::KIND_NAME,
            name = %obj.name_any(),
            error = %error,
            "reconcile failed, retrying"
        );
        Action::requeue(RETRY_DELAY)
    } else {
        error!(
            kind = K::KIND_NAME,
            name = %obj.name_any(),
            error = %error,
            "reconcile failed permanently, waiting for a change"
        );
        Action::await_change()
    }
}

/// Reconcile a kind-agnostic snapshot of a configuration
pub async fn reconcile_record(
    record: &ConfigurationRecord,
    ctx: &Context,
) -> Result<Action, Error> {
    if record.scope.as_namespace() == Some("") {
        return Err(catalogd_common::Error::validation_for_field(
            &record.name,
            "metadata.namespace",
            "namespaced configuration without a namespace",
        )
        .into());
    }

    if record.deleting {
        if !protection::has_finalizer(&record.finalizers) {
            debug!("deleting without finalizer, nothing to release");
            return Ok(Action::await_change());
        }
        delete_addons_process(record, ctx).await?;
        return Ok(Action::await_change());
    }

    if record.status.observed_generation == 0 {
        info!("processing new configuration");
        let pending = prepare_for_processing(record, ctx).await?;
        let last_status = pending.status.clone();
        add_addons_process(&pending, &last_status, ctx).await?;
    } else if record.generation > record.status.observed_generation {
        info!(
            generation = record.generation,
            observed = record.status.observed_generation,
            "processing changed configuration"
        );
        add_addons_process(record, &record.status, ctx).await?;
    } else {
        debug!("status is current");
    }

    Ok(Action::await_change())
}

// =============================================================================
// Processing
// =============================================================================

/// Mark Pending and protect with the finalizer
///
/// The generation stays unobserved so a pass failing after this write runs
/// again from the start.
async fn prepare_for_processing(
    record: &ConfigurationRecord,
    ctx: &Context,
) -> Result<ConfigurationRecord, Error> {
    let mut pending = record.clone();
    pending.status = AddonsConfigurationStatus::default()
        .with_phase(AddonsConfigurationPhase::Pending)
        .processed();
    let pending = ctx.configurations.update_status(&pending).await?;
    ctx.configurations.add_finalizer(&pending).await
}

/// Process the declared repositories against `last_status`
///
/// Every side effect on storage, docs and the broker happens before the
/// status write that observes the generation. Until that write lands,
/// `last_status` is what a retry diffs against.
async fn add_addons_process(
    record: &ConfigurationRecord,
    last_status: &AddonsConfigurationStatus,
    ctx: &Context,
) -> Result<(), Error> {
    let scope = &record.scope;

    let mut collection = RepositoryLoader::new(ctx.getters.as_ref(), ctx.develop_mode)
        .load(&record.spec.repositories)
        .await;
    collection.revise_bundle_duplication_in_repository();

    let siblings = existing_configurations(record, ctx).await?;
    collection.revise_bundle_duplication_in_storage(
        siblings.iter().map(|s| (s.name.as_str(), &s.status)),
    );

    let phase = if collection.is_repositories_id_conflict() {
        AddonsConfigurationPhase::Failed
    } else {
        AddonsConfigurationPhase::Ready
    };
    info!(phase = %phase, "duplicate checks done");

    let mut sync_broker = false;
    if phase == AddonsConfigurationPhase::Ready {
        sync_broker |= save_addons(&mut collection, scope, ctx).await?;
    }

    let status = AddonsConfigurationStatus {
        phase,
        repositories: collection.snapshot(),
        ..Default::default()
    };

    let mut deleted = Vec::new();
    if phase == AddonsConfigurationPhase::Ready
        && last_status.phase == AddonsConfigurationPhase::Ready
    {
        let (keys, removed) = delete_orphan_addons(&status, last_status, scope, ctx).await?;
        sync_broker |= removed > 0;
        deleted = keys;
    }

    ensure_broker(scope, sync_broker, ctx).await?;

    let mut updated = record.clone();
    updated.status = status.observed(record.generation);
    let updated = ctx.configurations.update_status(&updated).await?;

    // siblings must see the written status, or they conflict with it again
    if !deleted.is_empty() {
        reprocess_conflicting_configurations(&deleted, &siblings, scope, ctx).await;
    }

    if last_status.phase != phase {
        publish_phase(&updated, ctx).await;
    }
    Ok(())
}

/// Register every addon that survived the duplicate checks
///
/// A failed upsert marks only that addon with a registering error. Returns
/// whether the store changed: a new key, or new content under an existing
/// key. Re-registering identical content is not a change.
async fn save_addons(
    collection: &mut RepositoryCollection,
    scope: &Scope,
    ctx: &Context,
) -> Result<bool, Error> {
    let mut changed = false;
    let mut registered = 0;

    for addon in collection.ready_addons_mut() {
        let Some(complete) = addon.complete.clone() else {
            continue;
        };
        let package = complete.addon;
        let key = package.key();

        let previous = match ctx.addons.get(scope, &package.name, &package.version).await {
            Ok(previous) => Some(previous),
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                warn!(addon = %key, error = %e, "cannot read stored addon");
                addon.registering_error(&e);
                continue;
            }
        };
        if let Err(e) = ctx.addons.upsert(scope, package.clone()).await {
            warn!(addon = %key, error = %e, "cannot store addon");
            addon.registering_error(&e);
            continue;
        }
        if let Err(e) = save_charts(&complete.charts, scope, ctx).await {
            warn!(addon = %key, error = %e, "cannot store addon charts");
            addon.registering_error(&e);
            continue;
        }

        if single_docs_entry(&package).is_some() {
            if let Err(e) = ctx.docs.ensure_topic(&package, scope).await {
                restore_addon(&package, previous, scope, ctx).await;
                return Err(e);
            }
        }

        match previous {
            None => {
                info!(addon = %key, id = %package.id, "addon registered");
                changed = true;
            }
            Some(previous) if previous != package => {
                info!(addon = %key, id = %package.id, "addon content changed");
                if previous.id != package.id {
                    ctx.docs.ensure_topic_removed(&previous.id, scope).await?;
                }
                changed = true;
            }
            Some(_) => debug!(addon = %key, "addon unchanged"),
        }
        registered += 1;
    }

    record_addons_registered(registered);
    Ok(changed)
}

/// Put back what the store held before `package` was upserted
///
/// Keeps the change visible to the retry of a pass that failed after the
/// upsert.
async fn restore_addon(
    package: &AddonPackage,
    previous: Option<AddonPackage>,
    scope: &Scope,
    ctx: &Context,
) {
    let restored = match previous {
        Some(previous) => ctx.addons.upsert(scope, previous).await.map(|_| ()),
        None => ctx
            .addons
            .remove(scope, &package.name, &package.version)
            .await,
    };
    if let Err(e) = restored {
        warn!(addon = %package.key(), error = %e, "cannot restore stored addon");
    }
}

async fn save_charts(charts: &[Chart], scope: &Scope, ctx: &Context) -> Result<(), StorageError> {
    for chart in charts {
        if ctx.charts.upsert(scope, chart.clone()).await? {
            debug!(chart = %chart.name, version = %chart.version, "chart replaced in storage");
        }
    }
    Ok(())
}

/// Remove addons that were Ready last pass and are gone from this one
///
/// Returns the keys released and how many packages were actually removed.
async fn delete_orphan_addons(
    current: &AddonsConfigurationStatus,
    last: &AddonsConfigurationStatus,
    scope: &Scope,
    ctx: &Context,
) -> Result<(Vec<String>, u64), Error> {
    let keep: HashSet<String> = current
        .repositories
        .iter()
        .flat_map(|repo| repo.addons.iter().map(|a| a.key()))
        .collect();

    let mut keys = Vec::new();
    let mut removed = 0;
    for (_, addon) in last.ready_addons() {
        let key = addon.key();
        if keep.contains(&key) || keys.contains(&key) {
            continue;
        }
        info!(addon = %key, "removing orphaned addon");
        if remove_addon(&addon.name, &addon.version, scope, ctx).await?.is_some() {
            removed += 1;
        }
        keys.push(key);
    }

    record_addons_removed(removed);
    Ok((keys, removed))
}

/// Remove an addon with its docs topic and charts
///
/// Returns the identifier of the removed addon, or None when it was not in
/// the store.
async fn remove_addon(
    name: &str,
    version: &str,
    scope: &Scope,
    ctx: &Context,
) -> Result<Option<String>, Error> {
    let package = match ctx.addons.get(scope, name, version).await {
        Ok(package) => package,
        Err(e) if e.is_not_found() => {
            debug!(addon = %format!("{name}:{version}"), "addon already absent from storage");
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };

    ctx.docs.ensure_topic_removed(&package.id, scope).await?;

    match ctx.addons.remove(scope, name, version).await {
        Ok(()) => {}
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e.into()),
    }
    for plan in &package.plans {
        match ctx
            .charts
            .remove(scope, &plan.chart_ref.name, &plan.chart_ref.version)
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
    }

    Ok(Some(package.id))
}

/// Create the broker if missing, or ask it to relist when addons changed
async fn ensure_broker(scope: &Scope, sync: bool, ctx: &Context) -> Result<(), Error> {
    if !ctx.broker.exist(scope).await? {
        info!(scope = %scope, "creating broker");
        ctx.broker.create(scope).await?;
    } else if sync {
        sync_broker(scope, ctx).await;
    }
    Ok(())
}

async fn sync_broker(scope: &Scope, ctx: &Context) {
    if let Err(e) = ctx.syncer.sync(scope).await {
        warn!(scope = %scope, error = %e, "broker relist failed");
    }
}

/// Ask failed siblings blocked by a now released key to run again
///
/// Runs after the status write, so a failure is logged rather than retried.
async fn reprocess_conflicting_configurations(
    released: &[String],
    siblings: &[ConfigurationRecord],
    scope: &Scope,
    ctx: &Context,
) {
    for sibling in siblings.iter().filter(|s| !s.is_ready()) {
        let blocked = sibling
            .status
            .repositories
            .iter()
            .filter(|repo| repo.status != AddonStatus::Ready)
            .flat_map(|repo| repo.addons.iter())
            .any(|addon| released.contains(&addon.key()));
        if blocked {
            if let Err(e) = request_reprocess(sibling, scope, ctx).await {
                warn!(sibling = %sibling.name, error = %e, "cannot request reprocess");
            }
        }
    }
}

async fn request_reprocess(
    sibling: &ConfigurationRecord,
    scope: &Scope,
    ctx: &Context,
) -> Result<(), Error> {
    info!(sibling = %sibling.name, "requesting reprocess");
    ctx.configurations
        .request_reprocess(&sibling.name, scope)
        .await?;
    ctx.events
        .publish(
            &sibling.object_ref,
            EventType::Normal,
            reasons::REPROCESS_REQUESTED,
            actions::RECONCILE,
            Some("addons it conflicted with were released".to_string()),
        )
        .await;
    Ok(())
}

/// Every other configuration in the same scope
async fn existing_configurations(
    record: &ConfigurationRecord,
    ctx: &Context,
) -> Result<Vec<ConfigurationRecord>, Error> {
    Ok(ctx
        .configurations
        .list(&record.scope)
        .await?
        .into_iter()
        .filter(|c| c.name != record.name)
        .collect())
}

// =============================================================================
// Deletion
// =============================================================================

async fn delete_addons_process(record: &ConfigurationRecord, ctx: &Context) -> Result<(), Error> {
    let scope = &record.scope;
    info!("releasing addons of deleted configuration");

    let siblings = existing_configurations(record, ctx).await?;
    let mut delete_broker = true;
    for sibling in &siblings {
        if sibling.is_ready() {
            delete_broker = false;
        } else {
            request_reprocess(sibling, scope, ctx).await?;
        }
    }
    if delete_broker {
        info!(scope = %scope, "no ready configuration left, deleting broker");
        ctx.broker.delete(scope).await?;
    }

    let mut removed = 0;
    if record.is_ready() {
        for (_, addon) in record.status.ready_addons() {
            if remove_addon(&addon.name, &addon.version, scope, ctx)
                .await?
                .is_some()
            {
                removed += 1;
            }
        }
    }
    record_addons_removed(removed);

    if removed > 0 {
        if !delete_broker {
            sync_broker(scope, ctx).await;
        }
        ctx.events
            .publish(
                &record.object_ref,
                EventType::Normal,
                reasons::ADDONS_REMOVED,
                actions::DELETE,
                Some(format!("{removed} addon(s) removed from {scope}")),
            )
            .await;
    }

    ctx.configurations.remove_finalizer(record).await?;
    info!("configuration released");
    Ok(())
}

async fn publish_phase(record: &ConfigurationRecord, ctx: &Context) {
    let (type_, reason, note) = match record.status.phase {
        AddonsConfigurationPhase::Ready => (
            EventType::Normal,
            reasons::CONFIGURATION_READY,
            "all repositories processed".to_string(),
        ),
        AddonsConfigurationPhase::Failed => {
            let conflicts = record
                .status
                .repositories
                .iter()
                .flat_map(|repo| repo.addons.iter())
                .filter(|a| a.reason.is_some_and(|r| r.is_conflict()))
                .count();
            (
                EventType::Warning,
                reasons::CONFIGURATION_FAILED,
                format!("{conflicts} conflicting addon(s)"),
            )
        }
        AddonsConfigurationPhase::Pending => return,
    };
    ctx.events
        .publish(&record.object_ref, type_, reason, actions::RECONCILE, Some(note))
        .await;
}
