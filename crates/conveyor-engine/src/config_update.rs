//! Connector configuration updates.
//!
//! Connectors can push a refreshed configuration (rotated tokens and
//! the like) through `CONTROL`/`CONNECTOR_CONFIG` messages. The engine
//! forwards them here; persisting the update is the caller's concern.

use serde_json::Value;

/// Receiver for connector-pushed configuration updates. Errors are
/// logged by the engine and never fail the sync.
pub trait ConnectorConfigUpdater: Send + Sync {
    fn update_source(&self, source_id: &str, config: &Value) -> anyhow::Result<()>;
    fn update_destination(&self, destination_id: &str, config: &Value) -> anyhow::Result<()>;
}

/// Updater that only records the update in the logs.
pub struct LoggingConfigUpdater;

impl ConnectorConfigUpdater for LoggingConfigUpdater {
    fn update_source(&self, source_id: &str, _config: &Value) -> anyhow::Result<()> {
        tracing::info!(source_id, "Received updated configuration from source");
        Ok(())
    }

    fn update_destination(&self, destination_id: &str, _config: &Value) -> anyhow::Result<()> {
        tracing::info!(destination_id, "Received updated configuration from destination");
        Ok(())
    }
}
