//! Terminal artifact of a replication run.

use serde::{Deserialize, Serialize};

use crate::failure::FailureReason;
use crate::protocol::ConfiguredCatalog;
use crate::stats::{StreamSyncStats, SyncStats};
use crate::sync::State;

/// Terminal status of a replication attempt.
///
/// Cancellation takes precedence over failure, failure over completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationStatus {
    Completed,
    Failed,
    Cancelled,
}

/// Summary of one replication attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationAttemptSummary {
    pub status: ReplicationStatus,
    pub records_synced: u64,
    pub bytes_synced: u64,
    pub total_stats: SyncStats,
    pub stream_stats: Vec<StreamSyncStats>,
    /// Epoch millis.
    pub start_time: i64,
    pub end_time: i64,
}

/// Everything the engine hands back to its caller.
///
/// `state` is populated with the destination's last acknowledged state
/// (falling back to the input state) when eager persistence is off, so
/// the workflow layer can persist it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationOutput {
    pub replication_attempt_summary: ReplicationAttemptSummary,
    pub output_catalog: ConfiguredCatalog,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<State>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FailureReason>,
}
