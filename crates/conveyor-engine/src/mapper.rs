//! Catalog and message mapping between source read and destination
//! write.
//!
//! Mappers must be stable: the same input always maps to the same
//! output, with no state relevant to correctness. `map_catalog` runs
//! once before the destination starts; `map_message` runs on every
//! message leaving the source, so the two must agree on stream
//! identity rewrites.

use conveyor_types::protocol::{ConfiguredCatalog, Message};

pub trait Mapper: Send + Sync {
    fn map_catalog(&self, catalog: ConfiguredCatalog) -> ConfiguredCatalog;
    fn map_message(&self, message: Message) -> Message;
}

/// Passes everything through unchanged.
pub struct IdentityMapper;

impl Mapper for IdentityMapper {
    fn map_catalog(&self, catalog: ConfiguredCatalog) -> ConfiguredCatalog {
        catalog
    }

    fn map_message(&self, message: Message) -> Message {
        message
    }
}

/// Rewrites stream identity for the destination: an optional
/// namespace override and an optional stream name prefix, applied to
/// catalog entries, records, and per-stream states alike.
pub struct NamespaceMapper {
    namespace: Option<String>,
    stream_prefix: Option<String>,
}

impl NamespaceMapper {
    pub fn new(namespace: Option<String>, stream_prefix: Option<String>) -> Self {
        Self {
            namespace,
            stream_prefix,
        }
    }

    fn map_name(&self, name: &str) -> String {
        match &self.stream_prefix {
            Some(prefix) => format!("{prefix}{name}"),
            None => name.to_string(),
        }
    }

    fn map_namespace(&self, namespace: Option<String>) -> Option<String> {
        self.namespace.clone().or(namespace)
    }
}

impl Mapper for NamespaceMapper {
    fn map_catalog(&self, mut catalog: ConfiguredCatalog) -> ConfiguredCatalog {
        for entry in &mut catalog.streams {
            entry.stream.name = self.map_name(&entry.stream.name);
            entry.stream.namespace = self.map_namespace(entry.stream.namespace.take());
        }
        catalog
    }

    fn map_message(&self, mut message: Message) -> Message {
        match &mut message {
            Message::Record { record } => {
                record.stream = self.map_name(&record.stream);
                record.namespace = self.map_namespace(record.namespace.take());
            }
            Message::State { state } => {
                if let Some(descriptor) = &mut state.stream {
                    descriptor.name = self.map_name(&descriptor.name);
                    descriptor.namespace = self.map_namespace(descriptor.namespace.take());
                }
            }
            _ => {}
        }
        message
    }
}

/// Applies a sequence of mappers in order.
pub struct ChainMapper {
    mappers: Vec<Box<dyn Mapper>>,
}

impl ChainMapper {
    pub fn new(mappers: Vec<Box<dyn Mapper>>) -> Self {
        Self { mappers }
    }
}

impl Mapper for ChainMapper {
    fn map_catalog(&self, catalog: ConfiguredCatalog) -> ConfiguredCatalog {
        self.mappers
            .iter()
            .fold(catalog, |catalog, mapper| mapper.map_catalog(catalog))
    }

    fn map_message(&self, message: Message) -> Message {
        self.mappers
            .iter()
            .fold(message, |message, mapper| mapper.map_message(message))
    }
}
