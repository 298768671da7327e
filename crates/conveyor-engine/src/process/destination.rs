//! Destination connector wrapper.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;

use anyhow::Result;
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;
use tokio::sync::{mpsc, Mutex};

use conveyor_types::protocol::{ConfiguredCatalog, Message};
use conveyor_types::sync::ConnectorLaunchConfig;

use crate::error::ReplicationError;

use super::{await_exit, spawn_connector, ConnectorRole};

/// Wrapper around a destination connector subprocess.
///
/// Messages are written to the child's stdin one JSON line at a time;
/// the child's stdout is read back for acknowledged states and control
/// messages. Stdin and stdout are guarded separately so the write loop
/// and the read loop never contend.
pub struct DestinationConnector {
    launch: ConnectorLaunchConfig,
    stdin: Mutex<Option<ChildStdin>>,
    messages: Mutex<Option<mpsc::Receiver<Result<Message, String>>>>,
    child: Mutex<Option<tokio::process::Child>>,
    finished: AtomicBool,
    exit_code: StdMutex<Option<i32>>,
}

impl DestinationConnector {
    pub fn new(launch: ConnectorLaunchConfig) -> Self {
        Self {
            launch,
            stdin: Mutex::new(None),
            messages: Mutex::new(None),
            child: Mutex::new(None),
            finished: AtomicBool::new(false),
            exit_code: StdMutex::new(None),
        }
    }

    pub fn connector_id(&self) -> &str {
        &self.launch.connector_id
    }

    /// Launch the subprocess and begin reading its output. The catalog
    /// handed over here is the mapped catalog.
    pub async fn start(&self, job_root: &Path, catalog: &ConfiguredCatalog) -> Result<()> {
        let files = [
            ("config", self.launch.config.clone()),
            ("catalog", serde_json::to_value(catalog)?),
        ];
        let spawned = spawn_connector(
            ConnectorRole::Destination,
            &self.launch,
            job_root,
            &files,
            None,
        )
        .await?;
        *self.stdin.lock().await = spawned.stdin;
        *self.messages.lock().await = Some(spawned.messages);
        *self.child.lock().await = Some(spawned.child);
        Ok(())
    }

    /// Write one message to the destination's stdin.
    pub async fn accept(&self, message: &Message) -> Result<(), ReplicationError> {
        let mut line = serde_json::to_vec(message).map_err(|e| {
            ReplicationError::destination("failed to serialize message for destination", e)
        })?;
        line.push(b'\n');

        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or_else(|| {
            ReplicationError::Destination("destination stdin is already closed".into())
        })?;
        stdin.write_all(&line).await.map_err(|e| {
            ReplicationError::destination("destination process message delivery failed", e)
        })?;
        Ok(())
    }

    /// Close stdin to signal end of input.
    pub async fn notify_end_of_input(&self) -> Result<(), ReplicationError> {
        if let Some(mut stdin) = self.stdin.lock().await.take() {
            stdin.shutdown().await.map_err(|e| {
                ReplicationError::destination(
                    "destination process end of stream notification failed",
                    e,
                )
            })?;
        }
        Ok(())
    }

    /// Read the next message the destination emitted. Resolves to
    /// `Ok(None)` exactly once the destination has closed its output,
    /// at which point the process is reaped.
    pub async fn attempt_read(&self) -> Result<Option<Message>, ReplicationError> {
        let mut guard = self.messages.lock().await;
        let Some(receiver) = guard.as_mut() else {
            return Ok(None);
        };
        match receiver.recv().await {
            Some(Ok(message)) => Ok(Some(message)),
            Some(Err(err)) => Err(ReplicationError::destination(
                "destination process read attempt failed",
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

    /// Close stdin if still open and wait for the subprocess to exit.
    pub async fn close(&self) -> Result<(), ReplicationError> {
        self.stdin.lock().await.take();
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
        tracing::info!("Cancelling destination...");
        self.stdin.lock().await.take();
        if let Some(child) = self.child.lock().await.as_mut() {
            if let Err(err) = child.start_kill() {
                tracing::warn!(%err, "Error cancelling destination");
            }
        }
    }

    async fn reap(&self) -> Result<(), ReplicationError> {
        let mut guard = self.child.lock().await;
        if let Some(mut child) = guard.take() {
            let code = await_exit(ConnectorRole::Destination, &mut child)
                .await
                .map_err(|e| ReplicationError::destination("destination didn't exit properly", e))?;
            *self.exit_code.lock().expect("exit code lock poisoned") = code;
            tracing::info!(exit_code = code, "Destination process exited");
        }
        self.finished.store(true, Ordering::Release);
        Ok(())
    }
}
