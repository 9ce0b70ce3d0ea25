//! Controller error types

use catalogd_common::error::is_retryable_kube_error;

use crate::catalog::CatalogError;
use crate::storage::StorageError;

/// Errors that abort a reconcile pass and are handed to the error policy
///
/// Per-addon problems (fetch, load, conflict, registering) never show up
/// here; they are recorded on the configuration status instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    #[error("{0}")]
    Common(#[from] catalogd_common::Error),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("broker error [{scope}]: {source}")]
    Broker { scope: String, source: kube::Error },

    #[error("docs topic error [{id}]: {source}")]
    Docs { id: String, source: kube::Error },

    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
}

impl Error {
    /// Whether the error policy should requeue the object
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(e) => is_retryable_kube_error(e),
            Error::Common(e) => e.is_retryable(),
            Error::Storage(StorageError::NotFound { .. }) => false,
            Error::Storage(StorageError::Backend(_)) => true,
            Error::Broker { source, .. } | Error::Docs { source, .. } => {
                is_retryable_kube_error(source)
            }
            Error::Catalog(_) => true,
        }
    }
}
