//! In-memory conflict-detection model for one reconcile pass
//!
//! A [`RepositoryCollection`] is built fresh by the loader, revised by the
//! two duplicate passes and snapshotted onto the configuration status. It is
//! never persisted itself.

mod addon;
mod collection;
mod repository;

pub use addon::AddonController;
pub use collection::RepositoryCollection;
pub use repository::RepositoryController;
