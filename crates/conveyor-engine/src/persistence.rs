//! Write-behind persistence for destination-acknowledged states.
//!
//! `persist` is cheap: it coalesces the latest state per stream into a
//! pending buffer. A background flusher drains the buffer to the
//! [`StateStore`] on a fixed cadence; `close` performs a final flush
//! bounded by a timeout, after which remaining writes are considered
//! lost (the workflow can fall back to the input state).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use conveyor_types::protocol::{StateMessage, StreamDescriptor};
use conveyor_types::stats::SyncStats;

/// Durable sink for checkpoints and stats. Implementations must be
/// cheap to clone behind an `Arc` and safe to call from a blocking
/// task.
pub trait StateStore: Send + Sync {
    fn write_state(
        &self,
        connection_id: &str,
        stream: Option<&StreamDescriptor>,
        state: &Value,
    ) -> anyhow::Result<()>;

    fn write_stats(&self, connection_id: &str, stats: &SyncStats) -> anyhow::Result<()>;
}

/// In-memory store for tests and ephemeral runs.
#[derive(Default)]
pub struct InMemoryStateStore {
    states: Mutex<HashMap<String, Value>>,
    stats: Mutex<HashMap<String, SyncStats>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of stored states, keyed `connection_id/stream`.
    pub fn states(&self) -> HashMap<String, Value> {
        self.states.lock().expect("state store lock poisoned").clone()
    }

    pub fn stats(&self) -> HashMap<String, SyncStats> {
        self.stats.lock().expect("state store lock poisoned").clone()
    }
}

fn state_key(connection_id: &str, stream: Option<&StreamDescriptor>) -> String {
    match stream {
        Some(descriptor) => format!("{connection_id}/{descriptor}"),
        None => format!("{connection_id}/_global"),
    }
}

impl StateStore for InMemoryStateStore {
    fn write_state(
        &self,
        connection_id: &str,
        stream: Option<&StreamDescriptor>,
        state: &Value,
    ) -> anyhow::Result<()> {
        self.states
            .lock()
            .expect("state store lock poisoned")
            .insert(state_key(connection_id, stream), state.clone());
        Ok(())
    }

    fn write_stats(&self, connection_id: &str, stats: &SyncStats) -> anyhow::Result<()> {
        self.stats
            .lock()
            .expect("state store lock poisoned")
            .insert(connection_id.to_string(), stats.clone());
        Ok(())
    }
}

/// Store backed by a single JSON file, for standalone CLI runs.
pub struct JsonFileStateStore {
    path: std::path::PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStateStore {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn update(&self, apply: impl FnOnce(&mut serde_json::Map<String, Value>)) -> anyhow::Result<()> {
        let _guard = self.lock.lock().expect("file store lock poisoned");
        let mut document = match std::fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => serde_json::Map::new(),
            Err(err) => return Err(err.into()),
        };
        apply(&mut document);
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_vec_pretty(&Value::Object(document))?)?;
        Ok(())
    }
}

impl StateStore for JsonFileStateStore {
    fn write_state(
        &self,
        connection_id: &str,
        stream: Option<&StreamDescriptor>,
        state: &Value,
    ) -> anyhow::Result<()> {
        let key = state_key(connection_id, stream);
        self.update(|document| {
            document.insert(key, state.clone());
        })
    }

    fn write_stats(&self, connection_id: &str, stats: &SyncStats) -> anyhow::Result<()> {
        let key = format!("{connection_id}/_stats");
        let value = serde_json::to_value(stats)?;
        self.update(|document| {
            document.insert(key, value);
        })
    }
}

#[derive(Debug, Clone)]
pub struct SyncPersistenceConfig {
    pub flush_interval: Duration,
    /// Bound on the final flush performed by `close`.
    pub close_timeout: Duration,
    /// Whether a failed run still flushes pending states on close.
    /// Defaults to true: a source crash should not discard states the
    /// destination already acknowledged.
    pub flush_on_failure: bool,
}

impl Default for SyncPersistenceConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(10),
            close_timeout: Duration::from_secs(30),
            flush_on_failure: true,
        }
    }
}

type StateKey = (String, Option<StreamDescriptor>);

#[derive(Default)]
struct PendingWrites {
    states: HashMap<StateKey, Value>,
    stats: HashMap<String, SyncStats>,
}

impl PendingWrites {
    fn is_empty(&self) -> bool {
        self.states.is_empty() && self.stats.is_empty()
    }

    fn len(&self) -> usize {
        self.states.len() + self.stats.len()
    }
}

/// Checkpoint sink used in eager-state mode.
///
/// Must be constructed inside a tokio runtime; the flusher task is
/// spawned immediately.
pub struct SyncPersistence {
    store: Arc<dyn StateStore>,
    config: SyncPersistenceConfig,
    pending: Arc<Mutex<PendingWrites>>,
    flusher: Mutex<Option<(oneshot::Sender<()>, JoinHandle<()>)>>,
    persist_calls: AtomicU64,
}

impl SyncPersistence {
    pub fn new(store: Arc<dyn StateStore>, config: SyncPersistenceConfig) -> Self {
        let pending = Arc::new(Mutex::new(PendingWrites::default()));
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let flusher = {
            let store = store.clone();
            let pending = pending.clone();
            let interval = config.flush_interval;
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        () = tokio::time::sleep(interval) => {
                            flush(&store, &pending).await;
                        }
                        _ = &mut stop_rx => return,
                    }
                }
            })
        };
        Self {
            store,
            config,
            pending,
            flusher: Mutex::new(Some((stop_tx, flusher))),
            persist_calls: AtomicU64::new(0),
        }
    }

    /// Buffer a destination-acknowledged state. Consecutive states for
    /// the same stream coalesce; only the latest is durable.
    pub fn persist(&self, connection_id: &str, state: &StateMessage) {
        self.persist_calls.fetch_add(1, Ordering::Relaxed);
        self.pending
            .lock()
            .expect("pending writes lock poisoned")
            .states
            .insert(
                (connection_id.to_string(), state.stream.clone()),
                state.data.clone(),
            );
    }

    /// Buffer the latest stats snapshot for eager stats commits.
    pub fn persist_stats(&self, connection_id: &str, stats: SyncStats) {
        self.pending
            .lock()
            .expect("pending writes lock poisoned")
            .stats
            .insert(connection_id.to_string(), stats);
    }

    /// Number of `persist` calls made so far.
    pub fn persist_call_count(&self) -> u64 {
        self.persist_calls.load(Ordering::Relaxed)
    }

    /// Stop the flusher and perform a final bounded flush.
    ///
    /// When `run_failed` is set and `flush_on_failure` is off, pending
    /// writes are dropped instead.
    pub async fn close(&self, run_failed: bool) {
        let taken = self.flusher.lock().expect("flusher lock poisoned").take();
        if let Some((stop_tx, flusher)) = taken {
            let _ = stop_tx.send(());
            let _ = flusher.await;
        }

        if run_failed && !self.config.flush_on_failure {
            let dropped = self.pending.lock().expect("pending writes lock poisoned").len();
            if dropped > 0 {
                tracing::info!(dropped, "Run failed, dropping pending checkpoint writes");
            }
            return;
        }

        let final_flush = flush(&self.store, &self.pending);
        if tokio::time::timeout(self.config.close_timeout, final_flush)
            .await
            .is_err()
        {
            let lost = self.pending.lock().expect("pending writes lock poisoned").len();
            tracing::warn!(lost, "Checkpoint flush timed out on close, pending writes lost");
        }
    }
}

/// Drain the pending buffer into the store. Failed writes are logged
/// and put back unless a newer value has arrived in the meantime.
async fn flush(store: &Arc<dyn StateStore>, pending: &Arc<Mutex<PendingWrites>>) {
    let snapshot = {
        let mut guard = pending.lock().expect("pending writes lock poisoned");
        if guard.is_empty() {
            return;
        }
        std::mem::take(&mut *guard)
    };

    let store_for_write = store.clone();
    let result = tokio::task::spawn_blocking(move || {
        let mut failed = PendingWrites::default();
        for ((connection_id, stream), state) in snapshot.states {
            if let Err(err) = store_for_write.write_state(&connection_id, stream.as_ref(), &state) {
                tracing::warn!(%err, %connection_id, "Failed to persist state checkpoint");
                failed.states.insert((connection_id, stream), state);
            }
        }
        for (connection_id, stats) in snapshot.stats {
            if let Err(err) = store_for_write.write_stats(&connection_id, &stats) {
                tracing::warn!(%err, %connection_id, "Failed to persist stats");
                failed.stats.insert(connection_id, stats);
            }
        }
        failed
    })
    .await;

    match result {
        Ok(failed) if !failed.is_empty() => {
            let mut guard = pending.lock().expect("pending writes lock poisoned");
            for (key, state) in failed.states {
                guard.states.entry(key).or_insert(state);
            }
            for (key, stats) in failed.stats {
                guard.stats.entry(key).or_insert(stats);
            }
        }
        Ok(_) => {}
        Err(err) => tracing::error!(%err, "Checkpoint flush task panicked"),
    }
}
