//! Source connector wrapper.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;

use anyhow::Result;
use tokio::sync::{mpsc, Mutex};

use conveyor_types::protocol::{ConfiguredCatalog, Message};
use conveyor_types::sync::{ConnectorLaunchConfig, State};

use crate::error::ReplicationError;
use crate::heartbeat::HeartbeatMonitor;

use super::{await_exit, spawn_connector, ConnectorRole};

/// Wrapper around a source connector subprocess.
///
/// The heartbeat monitor is fed on every message the source emits, so
/// the chaperone can observe source liveness without touching the
/// process itself.
pub struct SourceConnector {
    launch: ConnectorLaunchConfig,
    monitor: HeartbeatMonitor,
    messages: Mutex<Option<mpsc::Receiver<Result<Message, String>>>>,
    child: Mutex<Option<tokio::process::Child>>,
    finished: AtomicBool,
    exit_code: StdMutex<Option<i32>>,
}

impl SourceConnector {
    pub fn new(launch: ConnectorLaunchConfig) -> Self {
        Self {
            launch,
            monitor: HeartbeatMonitor::new(),
            messages: Mutex::new(None),
            child: Mutex::new(None),
            finished: AtomicBool::new(false),
            exit_code: StdMutex::new(None),
        }
    }

    /// The monitor the chaperone should watch.
    pub fn heartbeat_monitor(&self) -> HeartbeatMonitor {
        self.monitor.clone()
    }

    pub fn connector_id(&self) -> &str {
        &self.launch.connector_id
    }

    /// Launch the subprocess and begin reading its output.
    pub async fn start(
        &self,
        job_root: &Path,
        catalog: &ConfiguredCatalog,
        state: Option<&State>,
    ) -> Result<()> {
        let files = [
            ("config", self.launch.config.clone()),
            ("catalog", serde_json::to_value(catalog)?),
            (
                "state",
                state.map_or(serde_json::Value::Null, |s| s.0.clone()),
            ),
        ];
        let spawned = spawn_connector(
            ConnectorRole::Source,
            &self.launch,
            job_root,
            &files,
            Some(self.monitor.clone()),
        )
        .await?;
        // A source takes no input; the watchdog clock starts at launch.
        self.monitor.beat();
        *self.messages.lock().await = Some(spawned.messages);
        *self.child.lock().await = Some(spawned.child);
        Ok(())
    }

    /// Read the next message. Resolves to `Ok(None)` exactly once the
    /// source has closed its output, at which point the process is
    /// reaped and the exit value becomes available.
    pub async fn attempt_read(&self) -> Result<Option<Message>, ReplicationError> {
        let mut guard = self.messages.lock().await;
        let Some(receiver) = guard.as_mut() else {
            return Ok(None);
        };
        match receiver.recv().await {
            Some(Ok(message)) => Ok(Some(message)),
            Some(Err(err)) => Err(ReplicationError::source(
                "source process read attempt failed",
                err,
            )),
            None => {
                guard.take();
                drop(guard);
                self.reap().await?;
                Ok(None)
            }
        }
    }

    /// Wait for the subprocess to exit, recording its exit code.
    pub async fn close(&self) -> Result<(), ReplicationError> {
        self.messages.lock().await.take();
        self.reap().await
    }

    /// True once the output has drained and the process has exited.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Exit code of the process. Undefined (`None`) until
    /// [`Self::is_finished`] is true, or when killed by a signal.
    pub fn exit_value(&self) -> Option<i32> {
        *self.exit_code.lock().expect("exit code lock poisoned")
    }

    /// Best-effort termination.
    pub async fn cancel(&self) {
        tracing::info!("Cancelling source...");
        if let Some(child) = self.child.lock().await.as_mut() {
            if let Err(err) = child.start_kill() {
                tracing::warn!(%err, "Error cancelling source");
            }
        }
    }

    async fn reap(&self) -> Result<(), ReplicationError> {
        let mut guard = self.child.lock().await;
        if let Some(mut child) = guard.take() {
            let code = await_exit(ConnectorRole::Source, &mut child)
                .await
                .map_err(|e| ReplicationError::source("source didn't exit properly", e))?;
            *self.exit_code.lock().expect("exit code lock poisoned") = code;
            tracing::info!(exit_code = code, "Source process exited");
        }
        self.finished.store(true, Ordering::Release);
        Ok(())
    }
}
