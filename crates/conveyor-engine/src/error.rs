//! Replication error model.
//!
//! [`ReplicationError`] carries the classification that maps a loop
//! failure onto a [`FailureReason`] origin. `Replication` wraps opaque
//! engine-side errors the same way the infrastructure side of a typed
//! error split does.

use std::time::Duration;

use conveyor_types::failure::FailureReason;

/// Classified error from one of the replication loops.
#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    /// Source process read or exit failure.
    #[error("{0}")]
    Source(String),
    /// Destination process read, write, or exit failure.
    #[error("{0}")]
    Destination(String),
    /// The source went silent longer than the configured heartbeat.
    #[error("source did not emit a message for longer than {0:?}")]
    HeartbeatTimeout(Duration),
    /// Engine-side error not attributable to either connector.
    #[error(transparent)]
    Replication(#[from] anyhow::Error),
}

impl ReplicationError {
    pub fn source(context: &str, cause: impl std::fmt::Display) -> Self {
        Self::Source(format!("{context}: {cause}"))
    }

    pub fn destination(context: &str, cause: impl std::fmt::Display) -> Self {
        Self::Destination(format!("{context}: {cause}"))
    }

    /// Convert into the failure reason recorded on the attempt.
    pub fn to_failure_reason(&self, job_id: &str, attempt: u32) -> FailureReason {
        match self {
            Self::Source(msg) => FailureReason::source_failure(msg.clone(), job_id, attempt),
            Self::Destination(msg) => {
                FailureReason::destination_failure(msg.clone(), job_id, attempt)
            }
            Self::HeartbeatTimeout(_) => {
                FailureReason::source_heartbeat_failure(self.to_string(), job_id, attempt)
            }
            Self::Replication(err) => {
                FailureReason::replication_failure(format!("{err:#}"), job_id, attempt)
            }
        }
    }
}

/// Error escaping [`crate::worker::ReplicationWorker::run`].
///
/// Recognized failure modes never surface here; they are reported in
/// the `ReplicationOutput`. This wrapper is for unexpected
/// engine-internal faults only.
#[derive(Debug, thiserror::Error)]
#[error("sync failed: {source}")]
pub struct WorkerError {
    #[from]
    source: anyhow::Error,
}
