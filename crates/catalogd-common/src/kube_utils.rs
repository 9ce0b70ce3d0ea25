//! Shared Kubernetes helpers for third-party resources
//!
//! Broker and docs objects belong to CRDs catalogd does not own, so they are
//! handled as `DynamicObject`s built from a compile-time apiVersion/kind.

use kube::api::{Api, DynamicObject};
use kube::discovery::ApiResource;
use kube::Client;

/// Trait for resources with a statically known API version and kind
///
/// ```ignore
/// struct ServiceBroker;
/// impl HasApiResource for ServiceBroker {
///     const API_VERSION: &'static str = "servicecatalog.k8s.io/v1beta1";
///     const KIND: &'static str = "ServiceBroker";
/// }
///
/// let ar = ServiceBroker::api_resource();
/// ```
pub trait HasApiResource {
    /// Full API version (e.g., "servicecatalog.k8s.io/v1beta1")
    const API_VERSION: &'static str;
    /// Resource kind (e.g., "ServiceBroker")
    const KIND: &'static str;

    /// Build an ApiResource from the type's constants.
    fn api_resource() -> ApiResource {
        build_api_resource(Self::API_VERSION, Self::KIND)
    }
}

/// Build an ApiResource from an apiVersion and kind
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Split an apiVersion into group and version
///
/// `"v1"` (core group) yields an empty group.
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Pluralize a Kubernetes resource kind using the usual English rules
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();
    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

/// Build a dynamic Api, namespaced when `namespace` is given
pub fn dynamic_api(
    client: &Client,
    ar: &ApiResource,
    namespace: Option<&str>,
) -> Api<DynamicObject> {
    match namespace {
        Some(ns) => Api::namespaced_with(client.clone(), ns, ar),
        None => Api::all_with(client.clone(), ar),
    }
}
