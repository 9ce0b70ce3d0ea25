//! Documentation topics for registered addons
//!
//! An addon declaring exactly one docs entry gets a `DocsTopic` (namespace
//! scope) or `ClusterDocsTopic` (cluster scope) named after its identifier.

use std::collections::BTreeMap;

use async_trait::async_trait;
use catalogd_common::error::{is_conflict, is_not_found};
use catalogd_common::kube_utils::{dynamic_api, HasApiResource};
use catalogd_common::FIELD_MANAGER;
use kube::api::{Api, DeleteParams, DynamicObject, PostParams};
use kube::discovery::ApiResource;
use kube::Client;
#[cfg(test)]
use mockall::automock;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::catalog::{AddonPackage, DocsEntry};
use crate::{Error, Scope};

/// Labels carried by every docs topic created for an addon
pub const DOCS_LABELS: [(&str, &str); 3] = [
    ("cms.kyma-project.io/view-context", "service-catalog"),
    ("cms.kyma-project.io/group-name", "components"),
    ("addons.catalogd.dev/addon-docs", "true"),
];

/// Namespaced docs topic
pub struct DocsTopic;

impl HasApiResource for DocsTopic {
    const API_VERSION: &'static str = "cms.kyma-project.io/v1alpha1";
    const KIND: &'static str = "DocsTopic";
}

/// Cluster-wide docs topic
pub struct ClusterDocsTopic;

impl HasApiResource for ClusterDocsTopic {
    const API_VERSION: &'static str = "cms.kyma-project.io/v1alpha1";
    const KIND: &'static str = "ClusterDocsTopic";
}

fn topic_api_resource(scope: &Scope) -> ApiResource {
    match scope {
        Scope::Namespace(_) => DocsTopic::api_resource(),
        Scope::Cluster => ClusterDocsTopic::api_resource(),
    }
}

/// The docs entry a topic is rendered from, if the addon has exactly one
pub fn single_docs_entry(addon: &AddonPackage) -> Option<&DocsEntry> {
    match addon.docs.as_slice() {
        [entry] => Some(entry),
        _ => None,
    }
}

/// Topic spec rendered from a docs entry
pub fn topic_spec(entry: &DocsEntry) -> Result<Value, Error> {
    let sources = entry
        .sources
        .iter()
        .map(serde_json::to_value)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| catalogd_common::Error::serialization_for_kind("DocsTopic", e.to_string()))?;
    Ok(json!({
        "displayName": entry.display_name,
        "description": entry.description,
        "sources": sources,
    }))
}

/// Topic object named `id` in `scope`
pub fn topic_object(id: &str, spec: Value, scope: &Scope) -> DynamicObject {
    let mut obj = DynamicObject::new(id, &topic_api_resource(scope)).data(json!({ "spec": spec }));
    if let Some(ns) = scope.as_namespace() {
        obj = obj.within(ns);
    }
    obj.metadata.labels = Some(
        DOCS_LABELS
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>(),
    );
    obj
}

/// Creates and removes docs topics
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DocsProvider: Send + Sync {
    /// Create the topic, or replace its spec when it differs
    async fn ensure_topic(&self, addon: &AddonPackage, scope: &Scope) -> Result<(), Error>;

    /// Delete the topic; a missing topic is not an error
    async fn ensure_topic_removed(&self, id: &str, scope: &Scope) -> Result<(), Error>;
}

fn docs_error(id: &str, source: kube::Error) -> Error {
    Error::Docs {
        id: id.to_string(),
        source,
    }
}

/// [`DocsProvider`] writing CMS docs topics
pub struct KubeDocsProvider {
    client: Client,
}

impl KubeDocsProvider {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, scope: &Scope) -> Api<DynamicObject> {
        dynamic_api(&self.client, &topic_api_resource(scope), scope.as_namespace())
    }
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    }
}

#[async_trait]
impl DocsProvider for KubeDocsProvider {
    async fn ensure_topic(&self, addon: &AddonPackage, scope: &Scope) -> Result<(), Error> {
        let Some(entry) = addon.docs.first() else {
            return Ok(());
        };
        let desired = topic_spec(entry)?;
        let api = self.api(scope);
        let id = addon.id.as_str();

        let existing = api.get_opt(id).await.map_err(|e| docs_error(id, e))?;
        match existing {
            None => match api
                .create(&post_params(), &topic_object(id, desired, scope))
                .await
            {
                Ok(_) => {
                    info!(scope = %scope, id, addon = %addon.key(), "docs topic created");
                    Ok(())
                }
                Err(e) if is_conflict(&e) => {
                    debug!(scope = %scope, id, "docs topic created concurrently");
                    Ok(())
                }
                Err(e) => Err(docs_error(id, e)),
            },
            Some(current) if current.data.get("spec") == Some(&desired) => {
                debug!(scope = %scope, id, "docs topic up to date");
                Ok(())
            }
            Some(mut current) => {
                current.data["spec"] = desired;
                api.replace(id, &post_params(), &current)
                    .await
                    .map_err(|e| docs_error(id, e))?;
                info!(scope = %scope, id, addon = %addon.key(), "docs topic updated");
                Ok(())
            }
        }
    }

    async fn ensure_topic_removed(&self, id: &str, scope: &Scope) -> Result<(), Error> {
        match self.api(scope).delete(id, &DeleteParams::default()).await {
            Ok(_) => {
                info!(scope = %scope, id, "docs topic deleted");
                Ok(())
            }
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(docs_error(id, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DocsSource;

    fn entry() -> DocsEntry {
        DocsEntry {
            display_name: "Redis".to_string(),
            description: "Redis docs".to_string(),
            sources: vec![DocsSource {
                type_: "markdown".to_string(),
                name: "docs".to_string(),
                mode: "package".to_string(),
                url: "https://docs.example.com/redis.tgz".to_string(),
                filter: None,
            }],
        }
    }

    #[test]
    fn only_a_single_docs_entry_renders_a_topic() {
        let mut addon = AddonPackage {
            id: "aaa".to_string(),
            ..Default::default()
        };
        assert!(single_docs_entry(&addon).is_none());

        addon.docs.push(entry());
        assert!(single_docs_entry(&addon).is_some());

        addon.docs.push(entry());
        assert!(single_docs_entry(&addon).is_none());
    }

    #[test]
    fn topic_spec_uses_wire_field_names() {
        let spec = topic_spec(&entry()).unwrap();
        assert_eq!(spec["displayName"], "Redis");
        assert_eq!(spec["sources"][0]["type"], "markdown");
        assert!(spec["sources"][0].get("filter").is_none());
    }

    #[test]
    fn topic_object_kind_follows_scope() {
        let spec = topic_spec(&entry()).unwrap();

        let ns = topic_object("aaa", spec.clone(), &Scope::namespace("stage"));
        assert_eq!(ns.types.as_ref().map(|t| t.kind.as_str()), Some("DocsTopic"));
        assert_eq!(ns.metadata.name.as_deref(), Some("aaa"));
        assert_eq!(ns.metadata.namespace.as_deref(), Some("stage"));
        assert_eq!(ns.data["spec"], spec);

        let cluster = topic_object("aaa", spec, &Scope::Cluster);
        assert_eq!(
            cluster.types.as_ref().map(|t| t.kind.as_str()),
            Some("ClusterDocsTopic")
        );
        assert_eq!(cluster.metadata.labels.map(|l| l.len()), Some(3));
    }
}
