//! Failure classification for replication attempts.
//!
//! A [`FailureReason`] records where a failure originated, how it is
//! classified for retry decisions, and the messages surfaced to
//! operators. The engine does not retry; the workflow layer reads the
//! `retryable` flag.

use serde::{Deserialize, Serialize};

/// Which collaborator a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureOrigin {
    Source,
    Destination,
    Replication,
    SourceHeartbeat,
}

/// Broad classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    SystemError,
    ConfigError,
    Transient,
    Manual,
}

/// One recorded failure on a replication attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub origin: FailureOrigin,
    pub failure_type: FailureType,
    /// Detailed message for engine logs and debugging.
    pub internal_message: String,
    /// Short message suitable for surfacing to users.
    pub external_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    pub retryable: bool,
    /// Epoch millis at which the failure was recorded.
    pub timestamp: i64,
    pub job_id: String,
    pub attempt: u32,
}

impl FailureReason {
    fn new(
        origin: FailureOrigin,
        failure_type: FailureType,
        external_message: &str,
        internal_message: impl Into<String>,
        job_id: impl Into<String>,
        attempt: u32,
    ) -> Self {
        Self {
            origin,
            failure_type,
            internal_message: internal_message.into(),
            external_message: external_message.to_string(),
            stack_trace: None,
            retryable: true,
            timestamp: chrono::Utc::now().timestamp_millis(),
            job_id: job_id.into(),
            attempt,
        }
    }

    /// Failure attributed to the source connector.
    pub fn source_failure(
        internal_message: impl Into<String>,
        job_id: impl Into<String>,
        attempt: u32,
    ) -> Self {
        Self::new(
            FailureOrigin::Source,
            FailureType::SystemError,
            "Something went wrong within the source connector",
            internal_message,
            job_id,
            attempt,
        )
    }

    /// Failure attributed to the destination connector.
    pub fn destination_failure(
        internal_message: impl Into<String>,
        job_id: impl Into<String>,
        attempt: u32,
    ) -> Self {
        Self::new(
            FailureOrigin::Destination,
            FailureType::SystemError,
            "Something went wrong within the destination connector",
            internal_message,
            job_id,
            attempt,
        )
    }

    /// Failure in the replication engine itself.
    pub fn replication_failure(
        internal_message: impl Into<String>,
        job_id: impl Into<String>,
        attempt: u32,
    ) -> Self {
        Self::new(
            FailureOrigin::Replication,
            FailureType::SystemError,
            "Something went wrong during replication",
            internal_message,
            job_id,
            attempt,
        )
    }

    /// Source went silent longer than the configured heartbeat.
    pub fn source_heartbeat_failure(
        internal_message: impl Into<String>,
        job_id: impl Into<String>,
        attempt: u32,
    ) -> Self {
        Self::new(
            FailureOrigin::SourceHeartbeat,
            FailureType::Transient,
            "The source is unresponsive",
            internal_message,
            job_id,
            attempt,
        )
    }

    #[must_use]
    pub fn with_failure_type(mut self, failure_type: FailureType) -> Self {
        self.failure_type = failure_type;
        self
    }

    #[must_use]
    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = Some(stack_trace.into());
        self
    }

    #[must_use]
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }
}
