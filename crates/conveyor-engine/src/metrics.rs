//! End-of-run metric reporting.

use std::collections::BTreeSet;

use conveyor_types::protocol::StreamDescriptor;

/// Sink for the per-stream quality metrics the engine emits at the end
/// of a run. The engine does not aggregate metrics over time; that is
/// the caller's concern.
pub trait MetricReporter: Send + Sync {
    fn track_schema_validation_errors(&self, stream: &StreamDescriptor, errors: &BTreeSet<String>);
    fn track_unexpected_fields(&self, stream: &StreamDescriptor, fields: &BTreeSet<String>);
    /// Destination state acknowledgments could not be correlated.
    fn track_state_timing_unreliable(&self);
}

/// Reporter that emits metrics through the logging sink.
pub struct LogMetricReporter;

impl MetricReporter for LogMetricReporter {
    fn track_schema_validation_errors(&self, stream: &StreamDescriptor, errors: &BTreeSet<String>) {
        tracing::warn!(
            stream = %stream,
            error_count = errors.len(),
            "Schema validation errors found for stream"
        );
    }

    fn track_unexpected_fields(&self, stream: &StreamDescriptor, fields: &BTreeSet<String>) {
        let joined = fields.iter().cloned().collect::<Vec<_>>().join(", ");
        tracing::warn!(stream = %stream, fields = %joined, "Stream has unexpected fields");
    }

    fn track_state_timing_unreliable(&self) {
        tracing::warn!("Could not reliably determine committed record counts for this run");
    }
}
