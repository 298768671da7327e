//! Sync input: everything the engine needs to run one replication.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::ConfiguredCatalog;

/// An opaque connection-level state blob, as last acknowledged by a
/// destination (or carried over from the previous attempt).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct State(pub Value);

/// Launch configuration for one connector subprocess.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorLaunchConfig {
    /// Stable identifier used when routing `CONNECTOR_CONFIG` updates.
    pub connector_id: String,
    /// Executable to spawn.
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// Connector configuration blob, passed through as-is.
    #[serde(default)]
    pub config: Value,
}

/// Heartbeat watchdog settings for the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Feature gate; off makes the chaperone a pass-through.
    pub enabled: bool,
    /// Maximum source silence before the run is failed.
    pub timeout_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            // Sources can legitimately be quiet for a long time while
            // scanning; the default errs on the side of patience.
            timeout_secs: 3 * 60 * 60,
        }
    }
}

/// Behavior toggles for one sync run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncFlags {
    /// Retain only catalog-listed top-level fields on each record.
    pub field_selection_enabled: bool,
    /// Validate every record instead of capping at 10 error records
    /// per stream.
    pub remove_validation_limit: bool,
    /// Persist destination-acknowledged states during the run instead
    /// of attaching the final state to the output.
    pub commit_state_asap: bool,
    /// Eagerly commit stats alongside states. Only honored when
    /// `commit_state_asap` is also set, to keep stats consistent with
    /// persisted states.
    pub commit_stats_asap: bool,
    pub heartbeat: HeartbeatConfig,
}

impl SyncFlags {
    /// Whether stats should be committed eagerly. Gated on eager state
    /// commits so stats never run ahead of persisted states.
    pub fn should_commit_stats_asap(&self) -> bool {
        self.commit_state_asap && self.commit_stats_asap
    }
}

/// Input for one replication attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncInput {
    /// Opaque job identifier, stamped into logs and failure reasons.
    pub job_id: String,
    pub attempt: u32,
    pub connection_id: String,
    pub source: ConnectorLaunchConfig,
    pub destination: ConnectorLaunchConfig,
    pub catalog: ConfiguredCatalog,
    /// State from the previous attempt, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<State>,
    #[serde(default)]
    pub flags: SyncFlags,
}
