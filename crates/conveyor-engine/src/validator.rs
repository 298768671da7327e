//! Per-record JSON schema validation.
//!
//! One validator is compiled per catalog stream at engine start. In
//! counted mode a stream stops being validated once ten of its records
//! have carried errors, bounding the cost of a noisy stream; uncounted
//! mode validates everything and deduplicates error messages only.
//! Independently of schema validation, top-level record fields not
//! declared in the catalog are collected per stream as "unexpected
//! fields".

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Mutex;

use anyhow::{Context, Result};

use conveyor_types::protocol::{ConfiguredCatalog, RecordMessage, StreamDescriptor};

use crate::metrics::MetricReporter;

/// In counted mode, stop validating a stream after this many records
/// with errors.
const ERROR_RECORD_CAP: u32 = 10;

struct StreamValidator {
    validator: jsonschema::Validator,
    declared_fields: HashSet<String>,
}

#[derive(Debug, Default, Clone)]
struct StreamErrors {
    messages: BTreeSet<String>,
    error_record_count: u32,
}

pub struct RecordSchemaValidator {
    streams: HashMap<StreamDescriptor, StreamValidator>,
    counted: bool,
    errors: Mutex<HashMap<StreamDescriptor, StreamErrors>>,
    unexpected_fields: Mutex<HashMap<StreamDescriptor, BTreeSet<String>>>,
    unknown_streams: Mutex<HashSet<StreamDescriptor>>,
}

impl RecordSchemaValidator {
    /// Compile one validator per catalog stream.
    pub fn new(catalog: &ConfiguredCatalog, remove_validation_limit: bool) -> Result<Self> {
        let mut streams = HashMap::new();
        for entry in &catalog.streams {
            let validator = jsonschema::validator_for(&entry.json_schema).with_context(|| {
                format!("invalid JSON schema for stream '{}'", entry.stream)
            })?;
            streams.insert(
                entry.stream.clone(),
                StreamValidator {
                    validator,
                    declared_fields: entry.schema_field_names().into_iter().collect(),
                },
            );
        }
        Ok(Self {
            streams,
            counted: !remove_validation_limit,
            errors: Mutex::new(HashMap::new()),
            unexpected_fields: Mutex::new(HashMap::new()),
            unknown_streams: Mutex::new(HashSet::new()),
        })
    }

    /// Validate one record against its stream's schema and collect any
    /// unexpected top-level fields. Never fails the sync.
    pub fn validate(&self, record: &RecordMessage) {
        let descriptor = record.descriptor();
        let Some(stream) = self.streams.get(&descriptor) else {
            // A record for a stream outside the catalog is a protocol
            // violation; report it once per stream.
            if self
                .unknown_streams
                .lock()
                .expect("unknown streams lock poisoned")
                .insert(descriptor.clone())
            {
                tracing::warn!(stream = %descriptor, "Source emitted a record for a stream not in the catalog");
            }
            return;
        };

        if self.counted {
            let errors = self.errors.lock().expect("validation errors lock poisoned");
            let capped = errors
                .get(&descriptor)
                .is_some_and(|e| e.error_record_count >= ERROR_RECORD_CAP);
            if capped {
                return;
            }
        }

        let messages: BTreeSet<String> = stream
            .validator
            .iter_errors(&record.data)
            .map(|e| e.to_string())
            .collect();
        if !messages.is_empty() {
            let mut errors = self.errors.lock().expect("validation errors lock poisoned");
            let entry = errors.entry(descriptor.clone()).or_default();
            entry.messages.extend(messages);
            entry.error_record_count += 1;
        }

        match record.data.as_object() {
            Some(object) => {
                let unexpected: Vec<&String> = object
                    .keys()
                    .filter(|k| !stream.declared_fields.contains(*k))
                    .collect();
                if !unexpected.is_empty() {
                    let mut fields = self
                        .unexpected_fields
                        .lock()
                        .expect("unexpected fields lock poisoned");
                    fields
                        .entry(descriptor)
                        .or_default()
                        .extend(unexpected.into_iter().cloned());
                }
            }
            None => {
                tracing::debug!(stream = %descriptor, "Record data is not an object, skipping field check");
            }
        }
    }

    /// Log and report the accumulated per-stream metrics. Called once
    /// when the source loop finishes.
    pub fn report(&self, metrics: &dyn MetricReporter) {
        if self.counted {
            tracing::info!(
                cap = ERROR_RECORD_CAP,
                "Schema validation was capped per stream at records with errors"
            );
        } else {
            tracing::info!("Schema validation was performed without limit");
        }

        for (stream, errors) in self.errors.lock().expect("validation errors lock poisoned").iter()
        {
            metrics.track_schema_validation_errors(stream, &errors.messages);
        }
        for (stream, fields) in self
            .unexpected_fields
            .lock()
            .expect("unexpected fields lock poisoned")
            .iter()
        {
            if !fields.is_empty() {
                metrics.track_unexpected_fields(stream, fields);
            }
        }
    }

    /// Distinct error messages and error-record count for a stream.
    pub fn error_summary(&self, stream: &StreamDescriptor) -> Option<(BTreeSet<String>, u32)> {
        self.errors
            .lock()
            .expect("validation errors lock poisoned")
            .get(stream)
            .map(|e| (e.messages.clone(), e.error_record_count))
    }

    /// Unexpected top-level field names accumulated for a stream.
    pub fn unexpected_fields(&self, stream: &StreamDescriptor) -> BTreeSet<String> {
        self.unexpected_fields
            .lock()
            .expect("unexpected fields lock poisoned")
            .get(stream)
            .cloned()
            .unwrap_or_default()
    }
}
