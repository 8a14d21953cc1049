//! OpenTelemetry metrics for the Viewer controller
//!
//! Instruments are created lazily from the global meter, so they are no-ops
//! until `telemetry::init_telemetry` installs an OTLP meter provider.

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;

static METER: Lazy<Meter> = Lazy::new(|| global::meter("viewer-operator"));

/// Histogram of reconcile duration
///
/// Labels:
/// - `result`: skipped, converged, rejected, error
pub static RECONCILE_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("viewer_reconcile_duration_seconds")
        .with_description("Duration of Viewer reconciliation in seconds")
        .with_unit("s")
        .build()
});

/// Counter of reconcile errors
///
/// Labels:
/// - `error_type`: transient, permanent
pub static RECONCILE_ERRORS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("viewer_reconcile_errors_total")
        .with_description("Total number of Viewer reconciliation errors")
        .with_unit("{errors}")
        .build()
});

/// Counter of Viewers deleted by the eviction policy
///
/// Labels:
/// - `viewer_type`: the evicted Viewer's type tag
pub static EVICTIONS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("viewer_evictions_total")
        .with_description("Total number of Viewers evicted to respect the concurrency cap")
        .with_unit("{viewers}")
        .build()
});

/// Counter of derived resources created
///
/// Labels:
/// - `kind`: Deployment, Service
pub static RESOURCES_CREATED: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("viewer_resources_created_total")
        .with_description("Total number of derived resources created")
        .with_unit("{resources}")
        .build()
});

/// Final state of a reconcile cycle, as a metric label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileResult {
    /// Viewer gone or terminating
    Skipped,
    /// Derived resources exist
    Converged,
    /// Terminal failure surfaced to the user
    Rejected,
    /// Transient failure, will requeue
    Error,
}

impl ReconcileResult {
    /// Convert to label value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Converged => "converged",
            Self::Rejected => "rejected",
            Self::Error => "error",
        }
    }
}

/// Times one reconcile cycle
pub struct ReconcileTimer {
    start: std::time::Instant,
}

impl ReconcileTimer {
    /// Start timing a reconciliation
    pub fn start() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }

    /// Record a completed cycle
    pub fn finish(self, result: ReconcileResult) {
        RECONCILE_DURATION.record(
            self.start.elapsed().as_secs_f64(),
            &[KeyValue::new("result", result.as_str())],
        );
    }

    /// Record a failed cycle along with its error class
    pub fn error(self, error_type: &'static str) {
        self.finish(ReconcileResult::Error);
        RECONCILE_ERRORS.add(1, &[KeyValue::new("error_type", error_type)]);
    }
}

/// Record one eviction
pub fn record_eviction(viewer_type: &str) {
    EVICTIONS.add(1, &[KeyValue::new("viewer_type", viewer_type.to_string())]);
}

/// Record one derived resource creation
pub fn record_created(kind: &str) {
    RESOURCES_CREATED.add(1, &[KeyValue::new("kind", kind.to_string())]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_labels() {
        assert_eq!(ReconcileResult::Skipped.as_str(), "skipped");
        assert_eq!(ReconcileResult::Converged.as_str(), "converged");
        assert_eq!(ReconcileResult::Rejected.as_str(), "rejected");
        assert_eq!(ReconcileResult::Error.as_str(), "error");
    }

    #[test]
    fn recording_without_provider_is_a_noop() {
        ReconcileTimer::start().finish(ReconcileResult::Converged);
        ReconcileTimer::start().error("transient");
        record_eviction("flexy-vis");
        record_created("Deployment");
    }
}
