//! Common types for catalogd: CRDs, errors, and runtime utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod kube_utils;
pub mod metrics;
pub mod retry;
pub mod telemetry;

pub use error::Error;

/// Field manager used for every write the controllers make
pub const FIELD_MANAGER: &str = "catalogd-controller";

/// Finalizer guarding cleanup of registered addons
pub const ADDONS_FINALIZER: &str = "addons.catalogd.dev/finalizer";

/// Default namespace of the broker service
pub const DEFAULT_BROKER_NAMESPACE: &str = "kyma-system";

/// Default name of the broker service and broker objects
pub const DEFAULT_BROKER_SERVICE: &str = "helm-broker";
