//! Phase timing for a replication attempt.

use std::sync::atomic::{AtomicI64, Ordering};

/// Records when each replication phase started and ended, in epoch
/// millis. Written from the loop tasks, read once during output
/// assembly. A zero value means the phase marker was never reached.
#[derive(Debug, Default)]
pub struct TimeTracker {
    replication_start: AtomicI64,
    replication_end: AtomicI64,
    source_read_start: AtomicI64,
    source_read_end: AtomicI64,
    destination_write_start: AtomicI64,
    destination_write_end: AtomicI64,
}

macro_rules! phase {
    ($track:ident, $get:ident, $field:ident) => {
        pub fn $track(&self) {
            self.$field
                .store(chrono::Utc::now().timestamp_millis(), Ordering::Release);
        }

        pub fn $get(&self) -> Option<i64> {
            match self.$field.load(Ordering::Acquire) {
                0 => None,
                millis => Some(millis),
            }
        }
    };
}

impl TimeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    phase!(track_replication_start, replication_start_time, replication_start);
    phase!(track_replication_end, replication_end_time, replication_end);
    phase!(track_source_read_start, source_read_start_time, source_read_start);
    phase!(track_source_read_end, source_read_end_time, source_read_end);
    phase!(
        track_destination_write_start,
        destination_write_start_time,
        destination_write_start
    );
    phase!(
        track_destination_write_end,
        destination_write_end_time,
        destination_write_end
    );
}
