//! Wire protocol types for the connector message stream.

pub mod catalog;
pub mod message;

pub use catalog::{
    ConfiguredCatalog, ConfiguredStream, DestinationSyncMode, StreamDescriptor, SyncMode,
};
pub use message::{
    ConnectorConfig, ControlMessage, LogMessage, Message, RecordMessage, StateMessage,
    TraceError, TraceMessage,
};
