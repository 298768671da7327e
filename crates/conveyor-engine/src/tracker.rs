//! Message tracking and sync stats aggregation.
//!
//! The tracker sees every message on both sides of the replication.
//! Source-emitted states are remembered by content hash together with
//! the per-stream record counts accumulated since the previous state;
//! when the destination acknowledges a state, the matching history
//! entries are committed in order. Any acknowledgment that cannot be
//! matched in order clears the "reliable state timing" flag, and
//! committed record counts are reported as unknown for the run.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use conveyor_types::failure::{FailureOrigin, FailureReason, FailureType};
use conveyor_types::protocol::{Message, StateMessage, StreamDescriptor, TraceError, TraceMessage};
use conveyor_types::stats::{StreamSyncStats, SyncStats};

/// Upper bound on retained source states. Overflow permanently clears
/// the reliable-timing flag for the run.
const MAX_STATE_HISTORY: usize = 8192;

/// Which connector a message arrived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectorSide {
    Source,
    Destination,
}

#[derive(Debug, Default, Clone)]
struct StreamCounters {
    records_emitted: u64,
    bytes_emitted: u64,
    records_committed: u64,
    source_states: u64,
    dest_states: u64,
}

/// A source-emitted state awaiting destination acknowledgment.
struct PendingState {
    hash: u64,
    /// Records emitted per stream between the previous state and this one.
    deltas: HashMap<StreamDescriptor, u64>,
}

#[derive(Default)]
struct TrackerInner {
    streams: HashMap<StreamDescriptor, StreamCounters>,
    pending_states: VecDeque<PendingState>,
    records_since_last_state: HashMap<StreamDescriptor, u64>,
    unreliable_state_timing: bool,
    total_records: u64,
    total_bytes: u64,
    total_source_states: u64,
    total_dest_states: u64,
    last_source_state: Option<StateMessage>,
    last_dest_state: Option<StateMessage>,
    error_trace: Option<(ConnectorSide, TraceError)>,
}

/// Aggregates counters from both replication loops. All entry points
/// take `&self`; the two loops run on different tasks.
pub struct MessageTracker {
    inner: Mutex<TrackerInner>,
}

impl MessageTracker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TrackerInner::default()),
        }
    }

    /// Observe a message emitted by the source.
    pub fn accept_from_source(&self, message: &Message) {
        let mut inner = self.lock();
        match message {
            Message::Record { record } => {
                let bytes = estimate_record_bytes(&record.data);
                let counters = inner.streams.entry(record.descriptor()).or_default();
                counters.records_emitted += 1;
                counters.bytes_emitted += bytes;
                inner.total_records += 1;
                inner.total_bytes += bytes;
                *inner
                    .records_since_last_state
                    .entry(record.descriptor())
                    .or_default() += 1;
            }
            Message::State { state } => {
                inner.total_source_states += 1;
                if let Some(descriptor) = &state.stream {
                    inner.streams.entry(descriptor.clone()).or_default().source_states += 1;
                }
                let hash = state_hash(state);
                let deltas = std::mem::take(&mut inner.records_since_last_state);
                if inner.pending_states.len() >= MAX_STATE_HISTORY {
                    tracing::warn!(
                        limit = MAX_STATE_HISTORY,
                        "Source state history overflowed, committed record counts are no longer reliable"
                    );
                    inner.unreliable_state_timing = true;
                    inner.pending_states.pop_front();
                }
                inner.pending_states.push_back(PendingState { hash, deltas });
                inner.last_source_state = Some(state.clone());
            }
            Message::Trace { trace } => {
                if let TraceMessage::Error { error, .. } = trace {
                    inner.error_trace = Some((ConnectorSide::Source, error.clone()));
                }
            }
            _ => {}
        }
    }

    /// Observe a message emitted by the destination.
    pub fn accept_from_destination(&self, message: &Message) {
        let mut inner = self.lock();
        match message {
            Message::State { state } => {
                inner.total_dest_states += 1;
                if let Some(descriptor) = &state.stream {
                    inner.streams.entry(descriptor.clone()).or_default().dest_states += 1;
                }
                let hash = state_hash(state);
                match inner.pending_states.iter().position(|p| p.hash == hash) {
                    Some(index) => {
                        // Acknowledging a later state implies everything
                        // before it was durably written.
                        let committed: Vec<PendingState> =
                            inner.pending_states.drain(..=index).collect();
                        for pending in committed {
                            for (descriptor, delta) in pending.deltas {
                                inner.streams.entry(descriptor).or_default().records_committed +=
                                    delta;
                            }
                        }
                    }
                    None => {
                        tracing::warn!(
                            "Destination acknowledged a state with no matching source state, committed record counts are no longer reliable"
                        );
                        inner.unreliable_state_timing = true;
                    }
                }
                inner.last_dest_state = Some(state.clone());
            }
            Message::Trace { trace } => {
                if let TraceMessage::Error { error, .. } = trace {
                    inner.error_trace = Some((ConnectorSide::Destination, error.clone()));
                }
            }
            _ => {}
        }
    }

    pub fn total_records_emitted(&self) -> u64 {
        self.lock().total_records
    }

    pub fn total_bytes_emitted(&self) -> u64 {
        self.lock().total_bytes
    }

    /// True when destination acknowledgments could not be matched
    /// against source states in emission order.
    pub fn unreliable_state_timing(&self) -> bool {
        self.lock().unreliable_state_timing
    }

    pub fn source_output_state(&self) -> Option<StateMessage> {
        self.lock().last_source_state.clone()
    }

    pub fn destination_output_state(&self) -> Option<StateMessage> {
        self.lock().last_dest_state.clone()
    }

    /// The most recent connector-reported error trace, as a failure
    /// reason attributed to the emitting side.
    pub fn error_trace_failure(&self, job_id: &str, attempt: u32) -> Option<FailureReason> {
        let inner = self.lock();
        let (side, error) = inner.error_trace.as_ref()?;
        let failure_type = match error.failure_type.as_deref() {
            Some("config_error") => FailureType::ConfigError,
            _ => FailureType::SystemError,
        };
        Some(FailureReason {
            origin: match side {
                ConnectorSide::Source => FailureOrigin::Source,
                ConnectorSide::Destination => FailureOrigin::Destination,
            },
            failure_type,
            internal_message: error
                .internal_message
                .clone()
                .unwrap_or_else(|| error.message.clone()),
            external_message: error.message.clone(),
            stack_trace: error.stack_trace.clone(),
            retryable: true,
            timestamp: chrono::Utc::now().timestamp_millis(),
            job_id: job_id.to_string(),
            attempt,
        })
    }

    /// Build the totals and per-stream stats for the output summary.
    ///
    /// Committed counts are reported only when state timing stayed
    /// reliable; a fully completed replication implies every emitted
    /// record was committed.
    pub fn sync_stats(&self, has_replication_completed: bool) -> (SyncStats, Vec<StreamSyncStats>) {
        let inner = self.lock();
        let committed_for = |counters: &StreamCounters| -> Option<u64> {
            if inner.unreliable_state_timing {
                None
            } else if has_replication_completed {
                Some(counters.records_emitted)
            } else {
                Some(counters.records_committed.min(counters.records_emitted))
            }
        };

        let mut stream_stats: Vec<StreamSyncStats> = inner
            .streams
            .iter()
            .map(|(descriptor, counters)| StreamSyncStats {
                stream: descriptor.clone(),
                stats: SyncStats {
                    records_emitted: counters.records_emitted,
                    bytes_emitted: counters.bytes_emitted,
                    records_committed: committed_for(counters),
                    source_state_messages_emitted: counters.source_states,
                    destination_state_messages_emitted: counters.dest_states,
                    ..SyncStats::default()
                },
            })
            .collect();
        stream_stats.sort_by(|a, b| a.stream.to_string().cmp(&b.stream.to_string()));

        let total_committed = if inner.unreliable_state_timing {
            None
        } else {
            Some(
                stream_stats
                    .iter()
                    .map(|s| s.stats.records_committed.unwrap_or(0))
                    .sum(),
            )
        };
        let totals = SyncStats {
            records_emitted: inner.total_records,
            bytes_emitted: inner.total_bytes,
            records_committed: total_committed,
            source_state_messages_emitted: inner.total_source_states,
            destination_state_messages_emitted: inner.total_dest_states,
            ..SyncStats::default()
        };
        (totals, stream_stats)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerInner> {
        self.inner.lock().expect("tracker lock poisoned")
    }
}

impl Default for MessageTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Serialized size of the record payload, matching what is written to
/// the destination.
fn estimate_record_bytes(data: &serde_json::Value) -> u64 {
    serde_json::to_string(data).map_or(0, |s| s.len() as u64)
}

/// Content hash identifying a state across the source and destination
/// sides. The destination echoes states verbatim, so structural
/// hashing of the serialized form matches them up.
fn state_hash(state: &StateMessage) -> u64 {
    let mut hasher = DefaultHasher::new();
    if let Some(descriptor) = &state.stream {
        descriptor.name.hash(&mut hasher);
        descriptor.namespace.hash(&mut hasher);
    }
    state.data.to_string().hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_types::protocol::RecordMessage;
    use serde_json::json;

    fn users() -> StreamDescriptor {
        StreamDescriptor::new("users", None)
    }

    fn record(stream: &str, id: u64) -> Message {
        Message::Record {
            record: RecordMessage {
                stream: stream.into(),
                namespace: None,
                data: json!({"id": id}),
                emitted_at: None,
            },
        }
    }

    fn state(cursor: &str) -> Message {
        Message::State {
            state: StateMessage {
                stream: Some(users()),
                data: json!({"cursor": cursor}),
            },
        }
    }

    #[test]
    fn happy_path_commits_in_order() {
        let tracker = MessageTracker::new();
        for msg in [
            record("users", 1),
            record("users", 2),
            state("s1"),
            record("users", 3),
            state("s2"),
        ] {
            tracker.accept_from_source(&msg);
        }
        tracker.accept_from_destination(&state("s1"));
        tracker.accept_from_destination(&state("s2"));

        assert!(!tracker.unreliable_state_timing());
        let (totals, streams) = tracker.sync_stats(false);
        assert_eq!(totals.records_emitted, 3);
        assert_eq!(totals.records_committed, Some(3));
        assert_eq!(totals.source_state_messages_emitted, 2);
        assert_eq!(totals.destination_state_messages_emitted, 2);
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].stats.records_committed, Some(3));
    }

    #[test]
    fn partial_acknowledgment_commits_prefix() {
        let tracker = MessageTracker::new();
        for msg in [
            record("users", 1),
            state("s1"),
            record("users", 2),
            state("s2"),
            record("users", 3),
        ] {
            tracker.accept_from_source(&msg);
        }
        tracker.accept_from_destination(&state("s1"));

        let (_, streams) = tracker.sync_stats(false);
        assert_eq!(streams[0].stats.records_emitted, 3);
        assert_eq!(streams[0].stats.records_committed, Some(1));
    }

    #[test]
    fn acknowledging_later_state_commits_earlier_ones() {
        let tracker = MessageTracker::new();
        for msg in [
            record("users", 1),
            state("s1"),
            record("users", 2),
            state("s2"),
        ] {
            tracker.accept_from_source(&msg);
        }
        tracker.accept_from_destination(&state("s2"));

        assert!(!tracker.unreliable_state_timing());
        let (_, streams) = tracker.sync_stats(false);
        assert_eq!(streams[0].stats.records_committed, Some(2));
    }

    #[test]
    fn out_of_order_acknowledgment_is_unreliable() {
        let tracker = MessageTracker::new();
        tracker.accept_from_source(&state("a"));
        tracker.accept_from_source(&record("users", 1));
        tracker.accept_from_source(&state("b"));

        tracker.accept_from_destination(&state("b"));
        tracker.accept_from_destination(&state("a"));

        assert!(tracker.unreliable_state_timing());
        let (totals, streams) = tracker.sync_stats(true);
        assert_eq!(totals.records_committed, None);
        assert!(streams.iter().all(|s| s.stats.records_committed.is_none()));
    }

    #[test]
    fn unknown_destination_state_is_unreliable() {
        let tracker = MessageTracker::new();
        tracker.accept_from_source(&record("users", 1));
        tracker.accept_from_destination(&state("never-seen"));
        assert!(tracker.unreliable_state_timing());
    }

    #[test]
    fn completed_run_reports_all_emitted_as_committed() {
        let tracker = MessageTracker::new();
        tracker.accept_from_source(&record("users", 1));
        tracker.accept_from_source(&record("users", 2));
        let (totals, streams) = tracker.sync_stats(true);
        assert_eq!(totals.records_committed, Some(2));
        assert_eq!(streams[0].stats.records_committed, Some(2));
    }

    #[test]
    fn totals_are_sums_of_per_stream_counters() {
        let tracker = MessageTracker::new();
        for msg in [
            record("users", 1),
            record("orders", 1),
            record("orders", 2),
        ] {
            tracker.accept_from_source(&msg);
        }
        let (totals, streams) = tracker.sync_stats(true);
        assert_eq!(
            totals.records_emitted,
            streams.iter().map(|s| s.stats.records_emitted).sum::<u64>()
        );
        assert_eq!(
            totals.bytes_emitted,
            streams.iter().map(|s| s.stats.bytes_emitted).sum::<u64>()
        );
    }

    #[test]
    fn global_states_match_without_stream_identity() {
        let tracker = MessageTracker::new();
        let global = Message::State {
            state: StateMessage {
                stream: None,
                data: json!({"lsn": 42}),
            },
        };
        tracker.accept_from_source(&record("users", 1));
        tracker.accept_from_source(&global);
        tracker.accept_from_destination(&global);
        assert!(!tracker.unreliable_state_timing());
        let (_, streams) = tracker.sync_stats(false);
        assert_eq!(streams[0].stats.records_committed, Some(1));
    }

    #[test]
    fn most_recent_error_trace_wins() {
        let tracker = MessageTracker::new();
        let trace = |msg: &str| Message::Trace {
            trace: TraceMessage::Error {
                error: TraceError {
                    message: msg.into(),
                    internal_message: None,
                    stack_trace: None,
                    failure_type: Some("config_error".into()),
                },
                emitted_at: None,
            },
        };
        tracker.accept_from_source(&trace("first"));
        tracker.accept_from_destination(&trace("second"));

        let failure = tracker.error_trace_failure("9", 1).unwrap();
        assert_eq!(failure.external_message, "second");
        assert_eq!(failure.origin, FailureOrigin::Destination);
        assert_eq!(failure.failure_type, FailureType::ConfigError);
    }

    #[test]
    fn history_overflow_flips_unreliable() {
        let tracker = MessageTracker::new();
        for i in 0..=MAX_STATE_HISTORY {
            tracker.accept_from_source(&state(&i.to_string()));
        }
        assert!(tracker.unreliable_state_timing());
    }
}
