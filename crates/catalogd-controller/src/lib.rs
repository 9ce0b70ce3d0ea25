//! Addons configuration reconciler
//!
//! Resolves the repositories declared on `AddonsConfiguration` and
//! `ClusterAddonsConfiguration` objects into addons, detects conflicts within
//! a configuration and against sibling configurations, registers the
//! surviving addons and drives the broker and docs side effects.
//!
//! - [`model`]: in-memory conflict detection for one reconcile pass
//! - [`loader`]: turns declared repositories into a [`model::RepositoryCollection`]
//! - [`controller`]: the scope-parameterized reconcile loop

pub mod broker;
pub mod catalog;
pub mod client;
pub mod controller;
pub mod docs;
pub mod error;
pub mod loader;
pub mod model;
pub mod protection;
pub mod scope;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;

pub use error::Error;
pub use scope::Scope;
