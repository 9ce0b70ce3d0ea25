//! Access to configuration objects of either kind
//!
//! The reconciler works on [`ConfigurationRecord`], a kind-agnostic view of
//! an `AddonsConfiguration` or `ClusterAddonsConfiguration`. Every write
//! carries the resourceVersion that was read, so a concurrent writer turns
//! the write into a 409 and the reconcile is retried from a fresh read.

use std::fmt::Debug;
use std::marker::PhantomData;

use async_trait::async_trait;
use catalogd_common::crd::{
    AddonsConfiguration, AddonsConfigurationPhase, AddonsConfigurationStatus,
    ClusterAddonsConfiguration, CommonAddonsConfigurationSpec,
};
use catalogd_common::error::is_not_found;
use catalogd_common::FIELD_MANAGER;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::{Client, Resource, ResourceExt};
#[cfg(test)]
use mockall::automock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use crate::protection;
use crate::{Error, Scope};

// =============================================================================
// Kind abstraction
// =============================================================================

/// What the reconciler needs from a configuration kind
pub trait AddonsConfigurationResource:
    Resource<DynamicType = ()>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Kind name used for logs and metrics
    const KIND_NAME: &'static str;

    fn common_spec(&self) -> &CommonAddonsConfigurationSpec;

    fn configuration_status(&self) -> Option<&AddonsConfigurationStatus>;

    fn scope(&self) -> Scope;

    /// Api handle for objects of this kind within `scope`
    fn api(client: Client, scope: &Scope) -> Api<Self>;
}

impl AddonsConfigurationResource for AddonsConfiguration {
    const KIND_NAME: &'static str = "AddonsConfiguration";

    fn common_spec(&self) -> &CommonAddonsConfigurationSpec {
        &self.spec.common
    }

    fn configuration_status(&self) -> Option<&AddonsConfigurationStatus> {
        self.status.as_ref()
    }

    fn scope(&self) -> Scope {
        Scope::Namespace(self.namespace().unwrap_or_default())
    }

    fn api(client: Client, scope: &Scope) -> Api<Self> {
        match scope.as_namespace() {
            Some(ns) => Api::namespaced(client, ns),
            None => Api::all(client),
        }
    }
}

impl AddonsConfigurationResource for ClusterAddonsConfiguration {
    const KIND_NAME: &'static str = "ClusterAddonsConfiguration";

    fn common_spec(&self) -> &CommonAddonsConfigurationSpec {
        &self.spec.common
    }

    fn configuration_status(&self) -> Option<&AddonsConfigurationStatus> {
        self.status.as_ref()
    }

    fn scope(&self) -> Scope {
        Scope::Cluster
    }

    fn api(client: Client, _scope: &Scope) -> Api<Self> {
        Api::all(client)
    }
}

// =============================================================================
// Record
// =============================================================================

/// Kind-agnostic snapshot of a configuration object
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConfigurationRecord {
    pub name: String,
    pub scope: Scope,
    pub generation: i64,
    pub resource_version: Option<String>,
    pub deleting: bool,
    pub finalizers: Vec<String>,
    pub spec: CommonAddonsConfigurationSpec,
    pub status: AddonsConfigurationStatus,
    pub object_ref: ObjectReference,
}

impl ConfigurationRecord {
    pub fn from_resource<K: AddonsConfigurationResource>(obj: &K) -> Self {
        let meta = obj.meta();
        Self {
            name: obj.name_any(),
            scope: obj.scope(),
            generation: meta.generation.unwrap_or_default(),
            resource_version: meta.resource_version.clone(),
            deleting: meta.deletion_timestamp.is_some(),
            finalizers: meta.finalizers.clone().unwrap_or_default(),
            spec: obj.common_spec().clone(),
            status: obj.configuration_status().cloned().unwrap_or_default(),
            object_ref: obj.object_ref(&()),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status.phase == AddonsConfigurationPhase::Ready
    }
}

// =============================================================================
// Client trait
// =============================================================================

/// Reads and writes configuration objects of one kind
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConfigurationClient: Send + Sync {
    /// Every configuration of this kind in `scope`
    async fn list(&self, scope: &Scope) -> Result<Vec<ConfigurationRecord>, Error>;

    /// Persist `record.status`; returns the object as stored
    async fn update_status(
        &self,
        record: &ConfigurationRecord,
    ) -> Result<ConfigurationRecord, Error>;

    /// Add the addons finalizer; no write when already present
    async fn add_finalizer(
        &self,
        record: &ConfigurationRecord,
    ) -> Result<ConfigurationRecord, Error>;

    /// Remove the addons finalizer
    async fn remove_finalizer(
        &self,
        record: &ConfigurationRecord,
    ) -> Result<ConfigurationRecord, Error>;

    /// Increment `spec.reprocessRequest`; a configuration that no longer
    /// exists is ignored
    async fn request_reprocess(&self, name: &str, scope: &Scope) -> Result<(), Error>;
}

/// [`ConfigurationClient`] backed by the Kubernetes API
pub struct KubeConfigurationClient<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeConfigurationClient<K> {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }
}

impl<K: AddonsConfigurationResource> KubeConfigurationClient<K> {
    async fn patch_finalizers(
        &self,
        record: &ConfigurationRecord,
        finalizers: Vec<String>,
    ) -> Result<ConfigurationRecord, Error> {
        let api = K::api(self.client.clone(), &record.scope);
        let patch = json!({
            "metadata": {
                "resourceVersion": record.resource_version,
                "finalizers": finalizers
            }
        });
        let updated = api
            .patch(
                &record.name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(ConfigurationRecord::from_resource(&updated))
    }
}

#[async_trait]
impl<K: AddonsConfigurationResource> ConfigurationClient for KubeConfigurationClient<K> {
    async fn list(&self, scope: &Scope) -> Result<Vec<ConfigurationRecord>, Error> {
        let api = K::api(self.client.clone(), scope);
        let list = api.list(&ListParams::default()).await?;
        Ok(list
            .items
            .iter()
            .map(ConfigurationRecord::from_resource)
            .collect())
    }

    async fn update_status(
        &self,
        record: &ConfigurationRecord,
    ) -> Result<ConfigurationRecord, Error> {
        let api = K::api(self.client.clone(), &record.scope);
        let patch = json!({
            "metadata": { "resourceVersion": record.resource_version },
            "status": record.status
        });
        let updated = api
            .patch_status(
                &record.name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(ConfigurationRecord::from_resource(&updated))
    }

    async fn add_finalizer(
        &self,
        record: &ConfigurationRecord,
    ) -> Result<ConfigurationRecord, Error> {
        let mut finalizers = record.finalizers.clone();
        if !protection::add_finalizer(&mut finalizers) {
            return Ok(record.clone());
        }
        self.patch_finalizers(record, finalizers).await
    }

    async fn remove_finalizer(
        &self,
        record: &ConfigurationRecord,
    ) -> Result<ConfigurationRecord, Error> {
        let mut finalizers = record.finalizers.clone();
        if !protection::remove_finalizer(&mut finalizers) {
            return Ok(record.clone());
        }
        self.patch_finalizers(record, finalizers).await
    }

    async fn request_reprocess(&self, name: &str, scope: &Scope) -> Result<(), Error> {
        let api = K::api(self.client.clone(), scope);
        let current = match api.get(name).await {
            Ok(obj) => obj,
            Err(e) if is_not_found(&e) => {
                debug!(configuration = %name, "configuration gone, skipping reprocess request");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let patch = json!({
            "metadata": { "resourceVersion": current.meta().resource_version },
            "spec": { "reprocessRequest": current.common_spec().reprocess_request + 1 }
        });
        api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}
