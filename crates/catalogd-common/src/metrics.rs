//! OpenTelemetry metrics for the addons reconcilers

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;

static METER: Lazy<Meter> = Lazy::new(|| global::meter("catalogd"));

/// Histogram of reconcile duration
///
/// Labels:
/// - `kind`: AddonsConfiguration, ClusterAddonsConfiguration
/// - `result`: success, error
pub static RECONCILE_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("catalogd_reconcile_duration_seconds")
        .with_description("Duration of addons configuration reconciliation in seconds")
        .with_unit("s")
        .build()
});

/// Counter of reconcile errors
///
/// Labels:
/// - `kind`: AddonsConfiguration, ClusterAddonsConfiguration
/// - `error_type`: transient, permanent
pub static RECONCILE_ERRORS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("catalogd_reconcile_errors_total")
        .with_description("Total number of addons configuration reconciliation errors")
        .with_unit("{errors}")
        .build()
});

/// Counter of addons registered or removed
///
/// Labels:
/// - `operation`: registered, removed
pub static ADDON_OPERATIONS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("catalogd_addon_operations_total")
        .with_description("Addons written to or removed from storage")
        .with_unit("{addons}")
        .build()
});

/// Record a reconciliation with timing
pub struct ReconcileTimer {
    kind: &'static str,
    start: std::time::Instant,
}

impl ReconcileTimer {
    /// Start timing a reconciliation of the given kind
    pub fn start(kind: &'static str) -> Self {
        Self {
            kind,
            start: std::time::Instant::now(),
        }
    }

    /// Record successful completion
    pub fn success(self) {
        RECONCILE_DURATION.record(
            self.start.elapsed().as_secs_f64(),
            &[
                KeyValue::new("kind", self.kind),
                KeyValue::new("result", "success"),
            ],
        );
    }

    /// Record error completion
    pub fn error(self, retryable: bool) {
        RECONCILE_DURATION.record(
            self.start.elapsed().as_secs_f64(),
            &[
                KeyValue::new("kind", self.kind),
                KeyValue::new("result", "error"),
            ],
        );
        let error_type = if retryable { "transient" } else { "permanent" };
        RECONCILE_ERRORS.add(
            1,
            &[
                KeyValue::new("kind", self.kind),
                KeyValue::new("error_type", error_type),
            ],
        );
    }
}

/// Count addons registered in storage
pub fn record_addons_registered(count: u64) {
    if count > 0 {
        ADDON_OPERATIONS.add(count, &[KeyValue::new("operation", "registered")]);
    }
}

/// Count addons removed from storage
pub fn record_addons_removed(count: u64) {
    if count > 0 {
        ADDON_OPERATIONS.add(count, &[KeyValue::new("operation", "removed")]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconcile_timer() {
        let timer = ReconcileTimer::start("AddonsConfiguration");
        assert_eq!(timer.kind, "AddonsConfiguration");
        timer.success();
        ReconcileTimer::start("ClusterAddonsConfiguration").error(true);
    }

    #[test]
    fn test_addon_counters_accept_zero() {
        record_addons_registered(0);
        record_addons_removed(2);
    }
}
