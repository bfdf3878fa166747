//! Metrics registry for the admission agent
//!
//! Instruments are exported through the global meter provider. Without an
//! OTLP endpoint the provider is a no-op and recording costs nothing.

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;

static METER: Lazy<Meter> = Lazy::new(|| global::meter("zarf-agent"));

/// Counter of admission requests handled
///
/// Labels:
/// - `kind`: resource kind (Pod, GitRepository, ...)
/// - `operation`: CREATE, UPDATE, DELETE, CONNECT
/// - `outcome`: patched, skipped, denied, error
pub static ADMISSION_REQUESTS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("zarf_agent_admission_requests_total")
        .with_description("Total number of admission requests handled")
        .with_unit("{requests}")
        .build()
});

/// Histogram of admission handling duration
///
/// Labels:
/// - `kind`: resource kind
pub static ADMISSION_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("zarf_agent_admission_duration_seconds")
        .with_description("Duration of admission request handling in seconds")
        .with_unit("s")
        .build()
});

/// Counter of state loads that went to the backend (cache misses)
///
/// Labels:
/// - `source`: file, secret
/// - `result`: success, error
pub static STATE_LOADS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("zarf_agent_state_loads_total")
        .with_description("Total number of cluster state loads")
        .with_unit("{loads}")
        .build()
});

/// Outcome of a single admission request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdmissionOutcome {
    /// Allowed with at least one patch
    Patched,
    /// Allowed without patches
    Skipped,
    /// Rejected by the agent
    Denied,
    /// The hook failed; the failure policy decides
    Error,
}

impl AdmissionOutcome {
    /// Metric label value
    pub fn as_str(&self) -> &'static str {
        match self {
            AdmissionOutcome::Patched => "patched",
            AdmissionOutcome::Skipped => "skipped",
            AdmissionOutcome::Denied => "denied",
            AdmissionOutcome::Error => "error",
        }
    }
}

/// Record one handled admission request
pub fn record_admission(kind: &str, operation: &str, outcome: AdmissionOutcome, seconds: f64) {
    ADMISSION_REQUESTS.add(
        1,
        &[
            KeyValue::new("kind", kind.to_string()),
            KeyValue::new("operation", operation.to_string()),
            KeyValue::new("outcome", outcome.as_str()),
        ],
    );
    ADMISSION_DURATION.record(seconds, &[KeyValue::new("kind", kind.to_string())]);
}

/// Record one state load against the backend
pub fn record_state_load(source: &'static str, success: bool) {
    STATE_LOADS.add(
        1,
        &[
            KeyValue::new("source", source),
            KeyValue::new("result", if success { "success" } else { "error" }),
        ],
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_labels() {
        assert_eq!(AdmissionOutcome::Patched.as_str(), "patched");
        assert_eq!(AdmissionOutcome::Skipped.as_str(), "skipped");
        assert_eq!(AdmissionOutcome::Denied.as_str(), "denied");
        assert_eq!(AdmissionOutcome::Error.as_str(), "error");
    }

    #[test]
    fn test_recording_without_provider_is_noop() {
        record_admission("Pod", "CREATE", AdmissionOutcome::Patched, 0.01);
        record_state_load("file", true);
    }
}
