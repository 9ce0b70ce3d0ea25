//! Error types shared by catalogd crates
//!
//! Errors carry structured context (configuration name, resource kind) so a
//! failed reconcile can be traced from a single log line.

use thiserror::Error;

/// Errors that need a change to the object before retrying makes sense
#[derive(Debug, Error)]
pub enum Error {
    /// Validation error for a configuration
    #[error("validation error for {configuration}: {message}")]
    Validation {
        /// Name of the configuration with the invalid value
        configuration: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "metadata.namespace")
        field: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error for {kind}: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized
        kind: String,
    },
}

impl Error {
    /// Create a validation error with configuration context and field path
    pub fn validation_for_field(
        configuration: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            configuration: configuration.into(),
            message: msg.into(),
            field: field.into(),
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: kind.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Both variants need a spec fix, so neither is.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Validation { .. } => false,
            Error::Serialization { .. } => false,
        }
    }
}

/// Whether a kube-rs error is worth retrying
///
/// Kubernetes 4xx errors are permanent except conflicts (stale
/// resourceVersion) and throttling, which succeed on a fresh read.
pub fn is_retryable_kube_error(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(ae) if ae.code == 409 || ae.code == 429 => true,
        kube::Error::Api(ae) => !(400..500).contains(&ae.code),
        _ => true,
    }
}

/// Whether a kube-rs error is a 404
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// Whether a kube-rs error is a 409 (already exists or stale resourceVersion)
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: format!("status {code}"),
            reason: "Test".to_string(),
            code,
        })
    }

    // ==========================================================================
    // Story Tests: Error Handling in the Reconcile Loop
    // ==========================================================================

    /// Story: a stale resourceVersion is retried, a forbidden write is not
    ///
    /// Status and finalizer writes carry the resourceVersion they read. When
    /// another writer got there first the API answers 409 and the reconcile
    /// must run again against the fresh object.
    #[test]
    fn story_conflicts_are_retried_but_client_errors_are_not() {
        assert!(is_retryable_kube_error(&api_error(409)));
        assert!(is_retryable_kube_error(&api_error(429)));
        assert!(!is_retryable_kube_error(&api_error(403)));
        assert!(is_retryable_kube_error(&api_error(503)));
    }

    /// Story: invalid input needs a human, so it is never retried
    #[test]
    fn story_validation_and_serialization_errors_are_permanent() {
        let err = Error::validation_for_field(
            "my-config",
            "metadata.namespace",
            "namespaced configuration without a namespace",
        );
        assert!(err.to_string().contains("my-config"));
        assert!(!err.is_retryable());

        let err = Error::serialization_for_kind("DocsTopic", "missing field");
        assert!(err.to_string().contains("DocsTopic"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn kube_error_classifiers() {
        assert!(is_not_found(&api_error(404)));
        assert!(!is_not_found(&api_error(409)));
        assert!(is_conflict(&api_error(409)));
        assert!(!is_conflict(&api_error(500)));
    }
}
