//! Line-delimited JSON messages exchanged with connector processes.
//!
//! Each line on a connector's stdout (or stdin, for a destination) is
//! one [`Message`]: a JSON object with a top-level `type` discriminator
//! and a type-specific payload field. The message schema is an external
//! contract consumed as-is; the engine only assigns meaning to
//! `RECORD`, `STATE`, `TRACE`, and `CONTROL`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::catalog::StreamDescriptor;

/// One protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    Record { record: RecordMessage },
    State { state: StateMessage },
    Control { control: ControlMessage },
    Trace { trace: TraceMessage },
    Log { log: LogMessage },
    Spec { spec: Value },
    Catalog { catalog: Value },
}

impl Message {
    /// Returns the record payload if this is a `RECORD` message.
    pub fn as_record(&self) -> Option<&RecordMessage> {
        match self {
            Self::Record { record } => Some(record),
            _ => None,
        }
    }

    /// Returns the state payload if this is a `STATE` message.
    pub fn as_state(&self) -> Option<&StateMessage> {
        match self {
            Self::State { state } => Some(state),
            _ => None,
        }
    }

    /// True for the message kinds a destination consumes on stdin.
    pub fn is_destination_bound(&self) -> bool {
        matches!(self, Self::Record { .. } | Self::State { .. })
    }
}

/// A single data record emitted by a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMessage {
    /// Stream name the record belongs to.
    pub stream: String,
    /// Stream namespace; absent for sources without namespacing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// The record payload. Expected to be a JSON object; anything else
    /// is tolerated here and reported by the schema validator.
    pub data: Value,
    /// Source-assigned emission timestamp (epoch millis).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emitted_at: Option<i64>,
}

impl RecordMessage {
    /// Descriptor of the stream this record belongs to.
    pub fn descriptor(&self) -> StreamDescriptor {
        StreamDescriptor {
            name: self.stream.clone(),
            namespace: self.namespace.clone(),
        }
    }
}

/// An opaque checkpoint blob, per-stream or global.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMessage {
    /// Stream identity for per-stream state; `None` for global state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<StreamDescriptor>,
    /// The checkpoint blob. Opaque to the engine.
    pub data: Value,
}

/// Control messages. Only `CONNECTOR_CONFIG` is consumed; the engine
/// forwards the updated configuration to the config updater.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    ConnectorConfig { connector_config: ConnectorConfig },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    pub config: Value,
}

/// Trace messages: connector-reported errors and estimates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TraceMessage {
    Error {
        error: TraceError,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        emitted_at: Option<f64>,
    },
    Estimate {
        estimate: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        emitted_at: Option<f64>,
    },
}

/// Error details carried by an error trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    /// `system_error` or `config_error`, per the protocol.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogMessage {
    pub level: String,
    pub message: String,
}
