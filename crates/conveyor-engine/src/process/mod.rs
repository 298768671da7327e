//! Connector subprocess wrappers.
//!
//! A connector is a subprocess speaking line-delimited JSON protocol
//! messages on stdout (and, for destinations, stdin). The wrappers own
//! the child process exclusively: a reader task drains stdout into a
//! bounded channel, stderr is routed through the logging sink, and the
//! engine drives everything through [`SourceConnector`] /
//! [`DestinationConnector`].
//!
//! Launch contract: the connector's config, catalog, and (for sources)
//! input state are written as JSON files under the job root, and their
//! paths are exported as `CONNECTOR_CONFIG_PATH`,
//! `CONNECTOR_CATALOG_PATH`, and `CONNECTOR_STATE_PATH`.

mod destination;
mod source;

pub use destination::DestinationConnector;
pub use source::SourceConnector;

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;

use conveyor_types::protocol::Message;
use conveyor_types::sync::ConnectorLaunchConfig;

use crate::heartbeat::HeartbeatMonitor;

/// Messages buffered between the reader task and `attempt_read`.
const MESSAGE_CHANNEL_CAPACITY: usize = 1024;

/// How long `close` waits for a connector to exit before killing it.
const EXIT_GRACE: Duration = Duration::from_secs(10);

/// Which side of the replication a connector implements. Used for log
/// attribution and launch file naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorRole {
    Source,
    Destination,
}

impl ConnectorRole {
    fn as_str(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Destination => "destination",
        }
    }
}

impl std::fmt::Display for ConnectorRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A spawned connector child with its stdout drained into a channel.
pub(crate) struct ConnectorChild {
    pub child: Child,
    pub stdin: Option<ChildStdin>,
    /// `Err` carries a stdout read failure; the channel closes at EOF.
    pub messages: mpsc::Receiver<Result<Message, String>>,
}

/// Spawn a connector subprocess and start draining its output.
///
/// `files` are `(name, contents)` pairs written under `job_root` and
/// exported through the matching `CONNECTOR_*_PATH` env var.
pub(crate) async fn spawn_connector(
    role: ConnectorRole,
    launch: &ConnectorLaunchConfig,
    job_root: &Path,
    files: &[(&str, serde_json::Value)],
    monitor: Option<HeartbeatMonitor>,
) -> Result<ConnectorChild> {
    tokio::fs::create_dir_all(job_root)
        .await
        .with_context(|| format!("failed to create job root {}", job_root.display()))?;

    let mut command = Command::new(&launch.command);
    command
        .args(&launch.args)
        .envs(&launch.env)
        .current_dir(job_root)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    for (name, contents) in files {
        let path = job_root.join(format!("{role}_{name}.json"));
        tokio::fs::write(&path, serde_json::to_vec_pretty(contents)?)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        let var = format!("CONNECTOR_{}_PATH", name.to_uppercase());
        command.env(var, &path);
    }

    let mut child = command
        .spawn()
        .with_context(|| format!("failed to spawn {role} connector '{}'", launch.command))?;

    let stdin = child.stdin.take();
    let stdout = child
        .stdout
        .take()
        .context("connector child has no stdout handle")?;
    let stderr = child
        .stderr
        .take()
        .context("connector child has no stderr handle")?;

    let (tx, rx) = mpsc::channel(MESSAGE_CHANNEL_CAPACITY);
    tokio::spawn(read_messages(role, stdout, tx, monitor));
    tokio::spawn(log_stderr(role, stderr));

    tracing::info!(%role, command = %launch.command, "Connector process started");

    Ok(ConnectorChild {
        child,
        stdin,
        messages: rx,
    })
}

/// Drain connector stdout, parsing each line as a protocol message.
/// Lines that are not valid messages are logged and skipped.
async fn read_messages(
    role: ConnectorRole,
    stdout: tokio::process::ChildStdout,
    tx: mpsc::Sender<Result<Message, String>>,
    monitor: Option<HeartbeatMonitor>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Message>(&line) {
                    Ok(message) => {
                        if let Some(monitor) = &monitor {
                            monitor.beat();
                        }
                        if tx.send(Ok(message)).await.is_err() {
                            // Receiver dropped; the run is tearing down.
                            return;
                        }
                    }
                    Err(err) => {
                        tracing::debug!(%role, %err, %line, "Skipping non-protocol output line");
                    }
                }
            }
            Ok(None) => return,
            Err(err) => {
                let _ = tx.send(Err(err.to_string())).await;
                return;
            }
        }
    }
}

async fn log_stderr(role: ConnectorRole, stderr: tokio::process::ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(%role, "{line}");
    }
}

/// Wait for the child to exit, killing it after [`EXIT_GRACE`].
///
/// Returns the exit code, or `None` when the process was terminated by
/// a signal.
pub(crate) async fn await_exit(role: ConnectorRole, child: &mut Child) -> Result<Option<i32>> {
    let status = match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
        Ok(status) => status.context("failed to wait for connector exit")?,
        Err(_) => {
            tracing::warn!(%role, "Connector did not exit within grace period, killing it");
            child.kill().await.context("failed to kill connector")?;
            child.wait().await.context("failed to reap connector")?
        }
    };
    Ok(status.code())
}
