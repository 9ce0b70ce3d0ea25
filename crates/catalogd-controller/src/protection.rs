//! Finalizer helpers
//!
//! A configuration carries [`ADDONS_FINALIZER`] from its first reconcile until
//! every addon it registered has been cleaned up.

pub use catalogd_common::ADDONS_FINALIZER;

/// Whether the addons finalizer is present
pub fn has_finalizer(finalizers: &[String]) -> bool {
    finalizers.iter().any(|f| f == ADDONS_FINALIZER)
}

/// Append the finalizer unless present; returns true when it was added
pub fn add_finalizer(finalizers: &mut Vec<String>) -> bool {
    if has_finalizer(finalizers) {
        return false;
    }
    finalizers.push(ADDONS_FINALIZER.to_string());
    true
}

/// Drop every occurrence of the finalizer; returns true when one was removed
pub fn remove_finalizer(finalizers: &mut Vec<String>) -> bool {
    let before = finalizers.len();
    finalizers.retain(|f| f != ADDONS_FINALIZER);
    finalizers.len() != before
}
