//! `conveyor run` — execute one replication attempt.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use conveyor_engine::config_update::LoggingConfigUpdater;
use conveyor_engine::mapper::IdentityMapper;
use conveyor_engine::metrics::LogMetricReporter;
use conveyor_engine::persistence::{
    JsonFileStateStore, SyncPersistence, SyncPersistenceConfig,
};
use conveyor_engine::process::{DestinationConnector, SourceConnector};
use conveyor_engine::tracker::MessageTracker;
use conveyor_engine::validator::RecordSchemaValidator;
use conveyor_engine::ReplicationWorker;
use conveyor_types::output::ReplicationStatus;

use crate::config::{parse_run_config, validate_run_config};

pub async fn execute(sync_path: &Path, job_root: Option<PathBuf>) -> Result<()> {
    let config = parse_run_config(sync_path)?;
    validate_run_config(&config)?;
    let input = config.input.clone();

    let job_root = match job_root {
        Some(path) => path,
        None => std::env::temp_dir().join(format!(
            "conveyor-job-{}-{}",
            input.job_id, input.attempt
        )),
    };

    let store = Arc::new(JsonFileStateStore::new(config.state_store_path()));
    let persistence = Arc::new(SyncPersistence::new(
        store,
        SyncPersistenceConfig::default(),
    ));
    let validator = Arc::new(
        RecordSchemaValidator::new(&input.catalog, input.flags.remove_validation_limit)
            .context("invalid stream schema in catalog")?,
    );
    let worker = Arc::new(ReplicationWorker::new(
        input.job_id.clone(),
        input.attempt,
        Arc::new(SourceConnector::new(input.source.clone())),
        Arc::new(DestinationConnector::new(input.destination.clone())),
        Arc::new(IdentityMapper),
        Arc::new(MessageTracker::new()),
        persistence,
        validator,
        Arc::new(LogMetricReporter),
        Arc::new(LoggingConfigUpdater),
    ));

    let cancellation = worker.cancellation_handle();
    let run_worker = worker.clone();
    let run_input = input.clone();
    let run_root = job_root.clone();
    let mut run = tokio::spawn(async move { run_worker.run(&run_input, &run_root).await });

    let output = tokio::select! {
        result = &mut run => result.context("replication task panicked")??,
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
            tracing::warn!("Interrupt received, cancelling sync");
            cancellation.cancel().await;
            run.await.context("replication task panicked")??
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);

    match output.replication_attempt_summary.status {
        ReplicationStatus::Completed => Ok(()),
        ReplicationStatus::Cancelled => bail!("sync was cancelled"),
        ReplicationStatus::Failed => {
            let origins: Vec<String> = output
                .failures
                .iter()
                .map(|f| format!("{:?}", f.origin))
                .collect();
            bail!("sync failed ({})", origins.join(", "))
        }
    }
}
