//! Source liveness watchdog.
//!
//! The source wrapper beats a [`HeartbeatMonitor`] on every message it
//! reads. The [`HeartbeatTimeoutChaperone`] wraps the replication loop
//! and aborts it when the monitor has been silent longer than the
//! configured threshold.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use crate::error::ReplicationError;

/// Shared "last source message at" timestamp.
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    last_beat: Arc<Mutex<Instant>>,
}

impl HeartbeatMonitor {
    pub fn new() -> Self {
        Self {
            last_beat: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Record source activity now.
    pub fn beat(&self) {
        *self.last_beat.lock().expect("heartbeat lock poisoned") = Instant::now();
    }

    pub fn time_since_last_beat(&self) -> Duration {
        self.last_beat
            .lock()
            .expect("heartbeat lock poisoned")
            .elapsed()
    }
}

impl Default for HeartbeatMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Watchdog wrapping the source-to-destination loop.
///
/// When the feature gate is off the chaperone is a pass-through and no
/// watchdog task is polled at all.
pub struct HeartbeatTimeoutChaperone {
    monitor: HeartbeatMonitor,
    timeout: Duration,
    enabled: bool,
}

impl HeartbeatTimeoutChaperone {
    pub fn new(monitor: HeartbeatMonitor, timeout: Duration, enabled: bool) -> Self {
        Self {
            monitor,
            timeout,
            enabled,
        }
    }

    /// Await `task` while concurrently watching the monitor. If the
    /// source stays silent past the threshold, the task is aborted and
    /// the run fails with a heartbeat timeout.
    pub async fn run_with_heartbeat(
        &self,
        mut task: JoinHandle<Result<(), ReplicationError>>,
    ) -> Result<(), ReplicationError> {
        if !self.enabled {
            return flatten(task.await);
        }

        tokio::select! {
            joined = &mut task => flatten(joined),
            () = self.watch() => {
                tracing::error!(timeout_secs = self.timeout.as_secs(), "Source heartbeat expired, aborting replication loop");
                task.abort();
                let _ = task.await;
                Err(ReplicationError::HeartbeatTimeout(self.timeout))
            }
        }
    }

    /// Resolves when the monitor goes stale. Poll cadence scales with
    /// the threshold so multi-hour timeouts don't spin.
    async fn watch(&self) {
        let poll = (self.timeout / 10).clamp(Duration::from_millis(10), Duration::from_secs(60));
        loop {
            tokio::time::sleep(poll).await;
            if self.monitor.time_since_last_beat() > self.timeout {
                return;
            }
        }
    }
}

fn flatten(
    joined: Result<Result<(), ReplicationError>, tokio::task::JoinError>,
) -> Result<(), ReplicationError> {
    match joined {
        Ok(result) => result,
        Err(err) => Err(ReplicationError::Replication(anyhow::anyhow!(
            "replication loop panicked: {err}"
        ))),
    }
}
