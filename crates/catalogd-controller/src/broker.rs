//! Service broker registration
//!
//! Each scope with at least one Ready configuration gets a `ServiceBroker`
//! (namespace) or `ClusterServiceBroker` (cluster) pointing at the broker
//! service. When registered addons change, the broker is asked to relist by
//! bumping `spec.relistRequests`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use catalogd_common::error::{is_conflict, is_not_found};
use catalogd_common::kube_utils::{dynamic_api, HasApiResource};
use catalogd_common::retry::{retry_with_backoff_if, RetryConfig};
use catalogd_common::{DEFAULT_BROKER_NAMESPACE, DEFAULT_BROKER_SERVICE, FIELD_MANAGER};
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams, PostParams};
use kube::discovery::ApiResource;
use kube::Client;
#[cfg(test)]
use mockall::automock;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::{Error, Scope};

/// Label set on broker objects created by catalogd
pub const BROKER_LABEL: &str = "addons.catalogd.dev/broker";

/// Attempts made to bump the relist counter before giving up
pub const SYNC_MAX_ATTEMPTS: u32 = 5;

/// Namespaced service catalog broker
pub struct ServiceBroker;

impl HasApiResource for ServiceBroker {
    const API_VERSION: &'static str = "servicecatalog.k8s.io/v1beta1";
    const KIND: &'static str = "ServiceBroker";
}

/// Cluster-wide service catalog broker
pub struct ClusterServiceBroker;

impl HasApiResource for ClusterServiceBroker {
    const API_VERSION: &'static str = "servicecatalog.k8s.io/v1beta1";
    const KIND: &'static str = "ClusterServiceBroker";
}

fn broker_api_resource(scope: &Scope) -> ApiResource {
    match scope {
        Scope::Namespace(_) => ServiceBroker::api_resource(),
        Scope::Cluster => ClusterServiceBroker::api_resource(),
    }
}

/// Where broker objects point and what they are called
#[derive(Clone, Debug)]
pub struct BrokerConfig {
    /// Name of the broker object in every scope
    pub name: String,
    /// Namespace of the broker service
    pub service_namespace: String,
    /// Name of the broker service
    pub service_name: String,
    pub port: u16,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_BROKER_SERVICE.to_string(),
            service_namespace: DEFAULT_BROKER_NAMESPACE.to_string(),
            service_name: DEFAULT_BROKER_SERVICE.to_string(),
            port: 80,
        }
    }
}

impl BrokerConfig {
    /// Broker endpoint serving the catalog of `scope`
    pub fn url_for(&self, scope: &Scope) -> String {
        let base = format!(
            "http://{}.{}.svc.cluster.local:{}",
            self.service_name, self.service_namespace, self.port
        );
        match scope {
            Scope::Namespace(ns) => format!("{base}/ns/{ns}"),
            Scope::Cluster => format!("{base}/cluster"),
        }
    }

    /// Broker object to create in `scope`
    pub fn broker_object(&self, scope: &Scope) -> DynamicObject {
        let ar = broker_api_resource(scope);
        let mut obj = DynamicObject::new(&self.name, &ar).data(json!({
            "spec": { "url": self.url_for(scope) }
        }));
        if let Some(ns) = scope.as_namespace() {
            obj = obj.within(ns);
        }
        obj.metadata.labels = Some(BTreeMap::from([(
            BROKER_LABEL.to_string(),
            "true".to_string(),
        )]));
        obj
    }
}

// =============================================================================
// Traits
// =============================================================================

/// Creates and removes broker objects
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BrokerFacade: Send + Sync {
    async fn exist(&self, scope: &Scope) -> Result<bool, Error>;

    /// Create the broker; an existing broker is not an error
    async fn create(&self, scope: &Scope) -> Result<(), Error>;

    /// Delete the broker; a missing broker is not an error
    async fn delete(&self, scope: &Scope) -> Result<(), Error>;
}

/// Asks the service catalog to relist a broker
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BrokerSyncer: Send + Sync {
    async fn sync(&self, scope: &Scope) -> Result<(), Error>;
}

fn broker_error(scope: &Scope, source: kube::Error) -> Error {
    Error::Broker {
        scope: scope.to_string(),
        source,
    }
}

// =============================================================================
// Kubernetes implementations
// =============================================================================

/// [`BrokerFacade`] writing service catalog objects
pub struct KubeBrokerFacade {
    client: Client,
    config: BrokerConfig,
}

impl KubeBrokerFacade {
    pub fn new(client: Client, config: BrokerConfig) -> Self {
        Self { client, config }
    }

    fn api(&self, scope: &Scope) -> Api<DynamicObject> {
        dynamic_api(&self.client, &broker_api_resource(scope), scope.as_namespace())
    }
}

#[async_trait]
impl BrokerFacade for KubeBrokerFacade {
    async fn exist(&self, scope: &Scope) -> Result<bool, Error> {
        let found = self
            .api(scope)
            .get_opt(&self.config.name)
            .await
            .map_err(|e| broker_error(scope, e))?;
        Ok(found.is_some())
    }

    async fn create(&self, scope: &Scope) -> Result<(), Error> {
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        match self
            .api(scope)
            .create(&params, &self.config.broker_object(scope))
            .await
        {
            Ok(_) => {
                info!(scope = %scope, broker = %self.config.name, "broker created");
                Ok(())
            }
            Err(e) if is_conflict(&e) => {
                debug!(scope = %scope, "broker already exists");
                Ok(())
            }
            Err(e) => Err(broker_error(scope, e)),
        }
    }

    async fn delete(&self, scope: &Scope) -> Result<(), Error> {
        match self
            .api(scope)
            .delete(&self.config.name, &DeleteParams::default())
            .await
        {
            Ok(_) => {
                info!(scope = %scope, broker = %self.config.name, "broker deleted");
                Ok(())
            }
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(broker_error(scope, e)),
        }
    }
}

/// [`BrokerSyncer`] bumping `spec.relistRequests`
pub struct KubeBrokerSyncer {
    client: Client,
    config: BrokerConfig,
    retry: RetryConfig,
}

impl KubeBrokerSyncer {
    pub fn new(client: Client, config: BrokerConfig) -> Self {
        Self {
            client,
            config,
            retry: RetryConfig::with_max_attempts(SYNC_MAX_ATTEMPTS),
        }
    }
}

/// Current relist counter of a broker object
fn relist_requests(broker: &DynamicObject) -> i64 {
    broker
        .data
        .get("spec")
        .and_then(|spec| spec.get("relistRequests"))
        .and_then(Value::as_i64)
        .unwrap_or(0)
}

#[async_trait]
impl BrokerSyncer for KubeBrokerSyncer {
    async fn sync(&self, scope: &Scope) -> Result<(), Error> {
        let api = dynamic_api(&self.client, &broker_api_resource(scope), scope.as_namespace());
        let name = self.config.name.as_str();

        let synced = retry_with_backoff_if(&self.retry, "sync_broker", is_conflict, || {
            let api = api.clone();
            async move {
                let Some(broker) = api.get_opt(name).await? else {
                    return Ok(false);
                };
                let patch = json!({
                    "metadata": { "resourceVersion": broker.metadata.resource_version },
                    "spec": { "relistRequests": relist_requests(&broker) + 1 }
                });
                api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
                    .await?;
                Ok(true)
            }
        })
        .await
        .map_err(|e| broker_error(scope, e))?;

        if synced {
            info!(scope = %scope, broker = %name, "broker relist requested");
        } else {
            debug!(scope = %scope, "no broker to sync");
        }
        Ok(())
    }
}
