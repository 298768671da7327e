//! Sync statistics: totals and per-stream counters.

use serde::{Deserialize, Serialize};

use crate::protocol::StreamDescriptor;

/// Counters for one run (totals) or one stream.
///
/// `records_committed` is `None` when state timing was unreliable and
/// the committed count could not be determined. Phase timings are set
/// on the totals only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub records_emitted: u64,
    pub bytes_emitted: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub records_committed: Option<u64>,
    pub source_state_messages_emitted: u64,
    pub destination_state_messages_emitted: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_start_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_end_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_read_start_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_read_end_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_write_start_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_write_end_time: Option<i64>,
}

/// Per-stream counters paired with their stream identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSyncStats {
    pub stream: StreamDescriptor,
    pub stats: SyncStats,
}
