//! Configured catalog and stream identity types.
//!
//! A [`ConfiguredCatalog`] is the declared set of streams for one sync
//! run. Each entry carries the stream's record JSON schema, sync modes,
//! and an optional explicit field selection. [`StreamDescriptor`] keys
//! every per-stream map in the tracker and validator.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identity of a logical table: `(name, namespace)`.
///
/// Equality is structural; `namespace` may be absent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl StreamDescriptor {
    pub fn new(name: impl Into<String>, namespace: Option<String>) -> Self {
        Self {
            name: name.into(),
            namespace,
        }
    }
}

impl fmt::Display for StreamDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// How the source reads a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    FullRefresh,
    Incremental,
}

/// How the destination writes a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationSyncMode {
    Append,
    Overwrite,
    AppendDedup,
}

/// One stream entry in the configured catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfiguredStream {
    pub stream: StreamDescriptor,
    /// JSON schema the stream's records are validated against. The
    /// top-level `properties` object defines the expected fields.
    pub json_schema: Value,
    pub sync_mode: SyncMode,
    pub destination_sync_mode: DestinationSyncMode,
    /// Explicit field selection; `None` means all schema fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_fields: Option<Vec<String>>,
}

impl ConfiguredStream {
    /// Top-level property names declared in the stream's schema.
    pub fn schema_field_names(&self) -> Vec<String> {
        self.json_schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| props.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// Ordered collection of configured streams for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfiguredCatalog {
    pub streams: Vec<ConfiguredStream>,
}

impl ConfiguredCatalog {
    /// Look up a stream entry by descriptor.
    pub fn get(&self, descriptor: &StreamDescriptor) -> Option<&ConfiguredStream> {
        self.streams.iter().find(|s| &s.stream == descriptor)
    }

    pub fn contains(&self, descriptor: &StreamDescriptor) -> bool {
        self.get(descriptor).is_some()
    }
}
