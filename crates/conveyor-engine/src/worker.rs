//! The replication worker: the data shovel of the platform.
//!
//! Moves records from the source connector to the destination
//! connector across two concurrent loops. Loop A reads the source,
//! filters, validates, maps, counts, and writes to the destination.
//! Loop B reads the destination's output for acknowledged states and
//! control messages. Only destination-acknowledged states are safe to
//! return from a run; when the destination emits none, the input state
//! is passed through.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use conveyor_types::failure::FailureReason;
use conveyor_types::output::{ReplicationAttemptSummary, ReplicationOutput, ReplicationStatus};
use conveyor_types::protocol::{
    ConfiguredCatalog, ControlMessage, Message, StreamDescriptor,
};
use conveyor_types::sync::{State, SyncInput};

use crate::config_update::ConnectorConfigUpdater;
use crate::error::{ReplicationError, WorkerError};
use crate::heartbeat::HeartbeatTimeoutChaperone;
use crate::mapper::Mapper;
use crate::metrics::MetricReporter;
use crate::persistence::SyncPersistence;
use crate::process::{DestinationConnector, SourceConnector};
use crate::timing::TimeTracker;
use crate::tracker::MessageTracker;
use crate::validator::RecordSchemaValidator;

/// Progress log cadence, in records.
const PROGRESS_LOG_EVERY: u64 = 5_000;

/// How long to wait for the surviving loop after its peer failed and
/// the connectors were closed.
const LOOP_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Orchestrates one replication attempt. `run` may be invoked at most
/// once per instance; `cancel` is reachable from any task through
/// [`CancellationHandle`].
pub struct ReplicationWorker {
    job_id: String,
    attempt: u32,
    source: Arc<SourceConnector>,
    destination: Arc<DestinationConnector>,
    mapper: Arc<dyn Mapper>,
    tracker: Arc<MessageTracker>,
    persistence: Arc<SyncPersistence>,
    validator: Arc<RecordSchemaValidator>,
    metrics: Arc<dyn MetricReporter>,
    config_updater: Arc<dyn ConnectorConfigUpdater>,
    cancelled: Arc<AtomicBool>,
    ran: AtomicBool,
}

/// Non-blocking cancellation entry point for a running worker.
#[derive(Clone)]
pub struct CancellationHandle {
    cancelled: Arc<AtomicBool>,
    source: Arc<SourceConnector>,
    destination: Arc<DestinationConnector>,
}

impl CancellationHandle {
    /// Flag the run as cancelled and terminate both connectors,
    /// destination first. Idempotent.
    pub async fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Cancelling replication worker...");
        self.destination.cancel().await;
        self.source.cancel().await;
    }
}

#[derive(Default)]
struct LoopOutcomes {
    replication_failure: Option<FailureReason>,
    destination_failure: Option<FailureReason>,
    has_failed: bool,
}

impl ReplicationWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job_id: impl Into<String>,
        attempt: u32,
        source: Arc<SourceConnector>,
        destination: Arc<DestinationConnector>,
        mapper: Arc<dyn Mapper>,
        tracker: Arc<MessageTracker>,
        persistence: Arc<SyncPersistence>,
        validator: Arc<RecordSchemaValidator>,
        metrics: Arc<dyn MetricReporter>,
        config_updater: Arc<dyn ConnectorConfigUpdater>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            attempt,
            source,
            destination,
            mapper,
            tracker,
            persistence,
            validator,
            metrics,
            config_updater,
            cancelled: Arc::new(AtomicBool::new(false)),
            ran: AtomicBool::new(false),
        }
    }

    pub fn cancellation_handle(&self) -> CancellationHandle {
        CancellationHandle {
            cancelled: self.cancelled.clone(),
            source: self.source.clone(),
            destination: self.destination.clone(),
        }
    }

    /// Run the replication to completion and summarize it.
    ///
    /// Recognized failure modes are reported inside the returned
    /// output; only unexpected engine-internal faults escape as
    /// [`WorkerError`].
    pub async fn run(
        &self,
        input: &SyncInput,
        job_root: &Path,
    ) -> Result<ReplicationOutput, WorkerError> {
        if self.ran.swap(true, Ordering::SeqCst) {
            return Err(anyhow::anyhow!("run may be invoked at most once per worker").into());
        }

        tracing::info!(
            job_id = self.job_id,
            attempt = self.attempt,
            "Starting replication worker"
        );
        tracing::info!(
            "Committing states from {}",
            if input.flags.commit_state_asap {
                "replication"
            } else {
                "the final output"
            }
        );
        if input.flags.should_commit_stats_asap() {
            tracing::info!("Committing stats eagerly alongside states");
        }
        let sync_modes: Vec<String> = input
            .catalog
            .streams
            .iter()
            .map(|s| {
                format!(
                    "{}: {:?} - {:?}",
                    s.stream, s.sync_mode, s.destination_sync_mode
                )
            })
            .collect();
        tracing::info!(modes = %sync_modes.join(", "), "Configured sync modes");
        tracing::debug!(
            field_selection = input.flags.field_selection_enabled,
            "Field selection"
        );

        let destination_catalog = self.mapper.map_catalog(input.catalog.clone());
        let time_tracker = Arc::new(TimeTracker::new());
        time_tracker.track_replication_start();

        let outcomes = self
            .replicate(input, job_root, &destination_catalog, &time_tracker)
            .await;
        time_tracker.track_replication_end();

        self.build_output(input, destination_catalog, outcomes, &time_tracker)
            .map_err(WorkerError::from)
    }

    async fn replicate(
        &self,
        input: &SyncInput,
        job_root: &Path,
        destination_catalog: &ConfiguredCatalog,
        time_tracker: &Arc<TimeTracker>,
    ) -> LoopOutcomes {
        let mut outcomes = LoopOutcomes::default();

        let started: anyhow::Result<()> = async {
            // Destination first so it is ready to accept the first write.
            self.destination.start(job_root, destination_catalog).await?;
            time_tracker.track_source_read_start();
            self.source
                .start(job_root, &input.catalog, input.state.as_ref())
                .await?;
            time_tracker.track_destination_write_start();
            Ok(())
        }
        .await;

        if let Err(err) = started {
            tracing::error!(error = %format!("{err:#}"), "Sync worker failed to start connectors");
            outcomes.has_failed = true;
            outcomes.replication_failure = Some(FailureReason::replication_failure(
                format!("{err:#}"),
                &self.job_id,
                self.attempt,
            ));
            self.close_connectors().await;
            self.persistence.close(true).await;
            return outcomes;
        }

        let selected_fields = if input.flags.field_selection_enabled {
            match selected_fields_by_stream(&input.catalog) {
                Ok(map) => Some(map),
                Err(err) => {
                    tracing::error!(error = %format!("{err:#}"), "Invalid field selection");
                    outcomes.has_failed = true;
                    outcomes.replication_failure = Some(FailureReason::replication_failure(
                        format!("{err:#}"),
                        &self.job_id,
                        self.attempt,
                    ));
                    self.close_connectors().await;
                    self.persistence.close(true).await;
                    return outcomes;
                }
            }
        } else {
            None
        };

        let src_task = tokio::spawn(read_from_src_and_write_to_dst(SourceLoopContext {
            source: self.source.clone(),
            destination: self.destination.clone(),
            mapper: self.mapper.clone(),
            tracker: self.tracker.clone(),
            validator: self.validator.clone(),
            metrics: self.metrics.clone(),
            config_updater: self.config_updater.clone(),
            time_tracker: time_tracker.clone(),
            cancelled: self.cancelled.clone(),
            selected_fields,
        }));
        let mut dst_task = tokio::spawn(read_from_dst(DestinationLoopContext {
            destination: self.destination.clone(),
            tracker: self.tracker.clone(),
            persistence: self.persistence.clone(),
            config_updater: self.config_updater.clone(),
            time_tracker: time_tracker.clone(),
            cancelled: self.cancelled.clone(),
            connection_id: input.connection_id.clone(),
            commit_state_asap: input.flags.commit_state_asap,
            commit_stats_asap: input.flags.should_commit_stats_asap(),
        }));

        let chaperone = HeartbeatTimeoutChaperone::new(
            self.source.heartbeat_monitor(),
            Duration::from_secs(input.flags.heartbeat.timeout_secs),
            input.flags.heartbeat.enabled,
        );
        let src_fut = chaperone.run_with_heartbeat(src_task);
        tokio::pin!(src_fut);

        tracing::info!("Waiting for source and destination loops to complete.");
        let mut src_res: Option<Result<(), ReplicationError>> = None;
        let mut dst_res: Option<Result<(), ReplicationError>> = None;
        tokio::select! {
            res = &mut src_fut => src_res = Some(res),
            res = &mut dst_task => dst_res = Some(join_loop(res)),
        }
        tracing::info!("One of the replication loops completed. Waiting on the other.");

        let first_failed =
            matches!(src_res, Some(Err(_))) || matches!(dst_res, Some(Err(_)));
        if first_failed {
            // Fail fast: closing the subprocesses unblocks the peer loop.
            self.close_connectors().await;
            if src_res.is_none() {
                src_res = Some(
                    match tokio::time::timeout(LOOP_SHUTDOWN_GRACE, &mut src_fut).await {
                        Ok(res) => res,
                        Err(_) => Err(ReplicationError::Replication(anyhow::anyhow!(
                            "source loop did not shut down within the grace period"
                        ))),
                    },
                );
            }
            if dst_res.is_none() {
                dst_res = Some(
                    match tokio::time::timeout(LOOP_SHUTDOWN_GRACE, &mut dst_task).await {
                        Ok(res) => join_loop(res),
                        Err(_) => {
                            dst_task.abort();
                            Err(ReplicationError::Replication(anyhow::anyhow!(
                                "destination loop did not shut down within the grace period"
                            )))
                        }
                    },
                );
            }
        } else {
            if src_res.is_none() {
                src_res = Some(src_fut.await);
            }
            if dst_res.is_none() {
                dst_res = Some(join_loop(dst_task.await));
            }
        }
        tracing::info!("Source and destination loops complete.");

        if let Some(Err(err)) = src_res {
            tracing::error!(error = %err, "Replication loop failed");
            outcomes.has_failed = true;
            outcomes.replication_failure =
                Some(err.to_failure_reason(&self.job_id, self.attempt));
        }
        if let Some(Err(err)) = dst_res {
            tracing::error!(error = %err, "Destination loop failed");
            outcomes.has_failed = true;
            outcomes.destination_failure =
                Some(err.to_failure_reason(&self.job_id, self.attempt));
        }

        // Teardown in reverse construction order. Close errors are
        // logged, never propagated.
        self.close_connectors().await;
        self.persistence.close(outcomes.has_failed).await;
        outcomes
    }

    async fn close_connectors(&self) {
        if let Err(err) = self.source.close().await {
            tracing::warn!(error = %err, "Error closing source");
        }
        if let Err(err) = self.destination.close().await {
            tracing::warn!(error = %err, "Error closing destination");
        }
    }

    fn build_output(
        &self,
        input: &SyncInput,
        destination_catalog: ConfiguredCatalog,
        outcomes: LoopOutcomes,
        time_tracker: &TimeTracker,
    ) -> anyhow::Result<ReplicationOutput> {
        let status = resolve_status(self.cancelled.load(Ordering::SeqCst), outcomes.has_failed);
        let has_completed = status == ReplicationStatus::Completed;

        if self.tracker.unreliable_state_timing() {
            tracing::warn!(
                "Could not reliably determine committed record counts, committed record stats will be set to null"
            );
            self.metrics.track_state_timing_unreliable();
        }

        let (mut total_stats, stream_stats) = self.tracker.sync_stats(has_completed);
        total_stats.replication_start_time = time_tracker.replication_start_time();
        total_stats.replication_end_time = time_tracker.replication_end_time();
        total_stats.source_read_start_time = time_tracker.source_read_start_time();
        total_stats.source_read_end_time = time_tracker.source_read_end_time();
        total_stats.destination_write_start_time = time_tracker.destination_write_start_time();
        total_stats.destination_write_end_time = time_tracker.destination_write_end_time();

        let summary = ReplicationAttemptSummary {
            status,
            records_synced: self.tracker.total_records_emitted(),
            bytes_synced: self.tracker.total_bytes_emitted(),
            total_stats,
            stream_stats,
            start_time: time_tracker.replication_start_time().unwrap_or_default(),
            end_time: chrono::Utc::now().timestamp_millis(),
        };

        let mut failures = Vec::new();
        if let Some(trace_failure) = self
            .tracker
            .error_trace_failure(&self.job_id, self.attempt)
        {
            failures.push(trace_failure);
        }
        failures.extend(outcomes.replication_failure);
        failures.extend(outcomes.destination_failure);

        let mut output = ReplicationOutput {
            replication_attempt_summary: summary,
            output_catalog: destination_catalog,
            state: None,
            failures,
        };

        if !input.flags.commit_state_asap {
            self.prep_state_for_later_saving(input, &mut output)?;
        }

        tracing::info!(
            summary = %serde_json::to_string_pretty(&output.replication_attempt_summary)?,
            "Sync summary"
        );
        tracing::info!(
            failures = %serde_json::to_string_pretty(&output.failures)?,
            "Failures"
        );

        Ok(output)
    }

    /// Attach the state for the caller to persist. State is not saved
    /// here.
    fn prep_state_for_later_saving(
        &self,
        input: &SyncInput,
        output: &mut ReplicationOutput,
    ) -> anyhow::Result<()> {
        if self.tracker.source_output_state().is_some() {
            tracing::info!("Source output at least one state message");
        } else {
            tracing::info!("Source did not output any state messages");
        }

        if let Some(state) = self.tracker.destination_output_state() {
            tracing::info!("State capture: updated state from destination");
            output.state = Some(State(
                serde_json::to_value(&state).context("failed to serialize final state")?,
            ));
        } else if let Some(state) = &input.state {
            tracing::warn!("State capture: no new state, falling back on input state");
            output.state = Some(state.clone());
        } else {
            tracing::warn!("State capture: no state retained.");
        }
        Ok(())
    }
}

fn resolve_status(cancelled: bool, has_failed: bool) -> ReplicationStatus {
    // Cancellation takes precedence over failure.
    if cancelled {
        ReplicationStatus::Cancelled
    } else if has_failed {
        ReplicationStatus::Failed
    } else {
        ReplicationStatus::Completed
    }
}

fn join_loop(
    joined: Result<Result<(), ReplicationError>, tokio::task::JoinError>,
) -> Result<(), ReplicationError> {
    match joined {
        Ok(result) => result,
        Err(err) => Err(ReplicationError::Replication(anyhow::anyhow!(
            "replication loop panicked: {err}"
        ))),
    }
}

struct SourceLoopContext {
    source: Arc<SourceConnector>,
    destination: Arc<DestinationConnector>,
    mapper: Arc<dyn Mapper>,
    tracker: Arc<MessageTracker>,
    validator: Arc<RecordSchemaValidator>,
    metrics: Arc<dyn MetricReporter>,
    config_updater: Arc<dyn ConnectorConfigUpdater>,
    time_tracker: Arc<TimeTracker>,
    cancelled: Arc<AtomicBool>,
    selected_fields: Option<HashMap<StreamDescriptor, HashSet<String>>>,
}

/// Loop A: read the source, filter, validate, map, count, and forward
/// to the destination.
async fn read_from_src_and_write_to_dst(ctx: SourceLoopContext) -> Result<(), ReplicationError> {
    tracing::info!("Replication loop started.");
    let result = source_loop_body(&ctx).await;
    match result {
        // The loop races the teardown of a cancelled run and can hit
        // one final read against a closing stream; those errors are
        // not real failures.
        Err(err) if ctx.cancelled.load(Ordering::SeqCst) => {
            tracing::debug!(error = %err, "Ignoring replication loop error after cancellation");
            Ok(())
        }
        other => other,
    }
}

async fn source_loop_body(ctx: &SourceLoopContext) -> Result<(), ReplicationError> {
    let mut records_read: u64 = 0;
    while !ctx.cancelled.load(Ordering::SeqCst) {
        let Some(message) = ctx.source.attempt_read().await? else {
            tracing::info!("Source has no more messages, closing connection.");
            ctx.source.close().await?;
            break;
        };

        // Validation sees the record as the source emitted it, so
        // unexpected fields are reported even when field selection
        // strips them before delivery.
        if let Some(record) = message.as_record() {
            ctx.validator.validate(record);
        }
        let mut message = message;
        if let Some(selected) = &ctx.selected_fields {
            filter_selected_fields(selected, &mut message)?;
        }
        let message = ctx.mapper.map_message(message);
        ctx.tracker.accept_from_source(&message);

        if let Message::Control { control } = &message {
            let ControlMessage::ConnectorConfig { connector_config } = control;
            if let Err(err) = ctx
                .config_updater
                .update_source(ctx.source.connector_id(), &connector_config.config)
            {
                tracing::error!(error = %err, "Error updating source configuration");
            }
        }

        if message.is_destination_bound() {
            ctx.destination.accept(&message).await?;
        }

        records_read += 1;
        if records_read % PROGRESS_LOG_EVERY == 0 {
            tracing::info!(
                records_read,
                bytes = %display_bytes(ctx.tracker.total_bytes_emitted()),
                "Records read"
            );
        }
    }
    ctx.time_tracker.track_source_read_end();
    tracing::info!(
        total_records = records_read,
        bytes = %display_bytes(ctx.tracker.total_bytes_emitted()),
        "Total records read"
    );

    ctx.validator.report(ctx.metrics.as_ref());

    ctx.destination.notify_end_of_input().await?;

    if !ctx.cancelled.load(Ordering::SeqCst) && ctx.source.exit_value() != Some(0) {
        return Err(ReplicationError::Source(format!(
            "source process exited with non-zero exit code {}",
            display_exit(ctx.source.exit_value())
        )));
    }
    Ok(())
}

struct DestinationLoopContext {
    destination: Arc<DestinationConnector>,
    tracker: Arc<MessageTracker>,
    persistence: Arc<SyncPersistence>,
    config_updater: Arc<dyn ConnectorConfigUpdater>,
    time_tracker: Arc<TimeTracker>,
    cancelled: Arc<AtomicBool>,
    connection_id: String,
    commit_state_asap: bool,
    commit_stats_asap: bool,
}

/// Loop B: read the destination's output, tracking acknowledged states
/// and routing control messages.
async fn read_from_dst(ctx: DestinationLoopContext) -> Result<(), ReplicationError> {
    tracing::info!("Destination output loop started.");
    let result = destination_loop_body(&ctx).await;
    match result {
        Err(err) if ctx.cancelled.load(Ordering::SeqCst) => {
            tracing::debug!(error = %err, "Ignoring destination loop error after cancellation");
            Ok(())
        }
        other => other,
    }
}

async fn destination_loop_body(ctx: &DestinationLoopContext) -> Result<(), ReplicationError> {
    while !ctx.cancelled.load(Ordering::SeqCst) {
        let Some(message) = ctx.destination.attempt_read().await? else {
            break;
        };

        if let Message::State { .. } = &message {
            tracing::debug!("State acknowledged by destination");
        }
        ctx.tracker.accept_from_destination(&message);

        if ctx.commit_state_asap {
            if let Message::State { state } = &message {
                ctx.persistence.persist(&ctx.connection_id, state);
                if ctx.commit_stats_asap {
                    let (totals, _) = ctx.tracker.sync_stats(false);
                    ctx.persistence.persist_stats(&ctx.connection_id, totals);
                }
            }
        }

        if let Message::Control { control } = &message {
            let ControlMessage::ConnectorConfig { connector_config } = control;
            if let Err(err) = ctx
                .config_updater
                .update_destination(ctx.destination.connector_id(), &connector_config.config)
            {
                tracing::error!(error = %err, "Error updating destination configuration");
            }
        }
    }
    ctx.time_tracker.track_destination_write_end();

    if !ctx.cancelled.load(Ordering::SeqCst) && ctx.destination.exit_value() != Some(0) {
        return Err(ReplicationError::Destination(format!(
            "destination process exited with non-zero exit code {}",
            display_exit(ctx.destination.exit_value())
        )));
    }
    Ok(())
}

/// Exit codes are unavailable when a process dies to a signal.
fn display_exit(code: Option<i32>) -> String {
    code.map_or_else(|| "unknown (signal)".to_string(), |c| c.to_string())
}

/// The explicit field list per stream: the configured selection when
/// present, otherwise every schema-declared field.
fn selected_fields_by_stream(
    catalog: &ConfiguredCatalog,
) -> anyhow::Result<HashMap<StreamDescriptor, HashSet<String>>> {
    let mut map = HashMap::new();
    for entry in &catalog.streams {
        let fields: HashSet<String> = match &entry.selected_fields {
            Some(fields) => fields.iter().cloned().collect(),
            None => entry.schema_field_names().into_iter().collect(),
        };
        if fields.is_empty() {
            anyhow::bail!(
                "no selected fields or schema properties for stream '{}'",
                entry.stream
            );
        }
        map.insert(entry.stream.clone(), fields);
    }
    Ok(map)
}

/// Retain only the selected top-level fields on a record's data.
fn filter_selected_fields(
    selected: &HashMap<StreamDescriptor, HashSet<String>>,
    message: &mut Message,
) -> Result<(), ReplicationError> {
    let Message::Record { record } = message else {
        return Ok(());
    };
    let empty = HashSet::new();
    let fields = selected.get(&record.descriptor()).unwrap_or(&empty);
    match record.data.as_object_mut() {
        Some(object) => {
            object.retain(|key, _| fields.contains(key));
            Ok(())
        }
        None => Err(ReplicationError::Replication(anyhow::anyhow!(
            "unexpected non-object data in record for stream '{}'",
            record.stream
        ))),
    }
}

fn display_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_types::protocol::{
        ConfiguredStream, DestinationSyncMode, RecordMessage, SyncMode,
    };
    use serde_json::json;

    #[test]
    fn cancellation_takes_precedence_over_failure() {
        assert_eq!(resolve_status(true, true), ReplicationStatus::Cancelled);
        assert_eq!(resolve_status(true, false), ReplicationStatus::Cancelled);
        assert_eq!(resolve_status(false, true), ReplicationStatus::Failed);
        assert_eq!(resolve_status(false, false), ReplicationStatus::Completed);
    }

    fn catalog(selected: Option<Vec<String>>) -> ConfiguredCatalog {
        ConfiguredCatalog {
            streams: vec![ConfiguredStream {
                stream: StreamDescriptor::new("users", None),
                json_schema: json!({
                    "type": "object",
                    "properties": {"id": {}, "name": {}}
                }),
                sync_mode: SyncMode::FullRefresh,
                destination_sync_mode: DestinationSyncMode::Append,
                selected_fields: selected,
            }],
        }
    }

    #[test]
    fn selected_fields_default_to_schema_properties() {
        let map = selected_fields_by_stream(&catalog(None)).unwrap();
        let fields = &map[&StreamDescriptor::new("users", None)];
        assert!(fields.contains("id") && fields.contains("name"));
    }

    #[test]
    fn explicit_selection_overrides_schema() {
        let map = selected_fields_by_stream(&catalog(Some(vec!["id".into()]))).unwrap();
        let fields = &map[&StreamDescriptor::new("users", None)];
        assert_eq!(fields.len(), 1);
    }

    #[test]
    fn schema_without_properties_is_rejected() {
        let mut catalog = catalog(None);
        catalog.streams[0].json_schema = json!({"type": "object"});
        assert!(selected_fields_by_stream(&catalog).is_err());
    }

    #[test]
    fn filter_retains_only_selected_fields() {
        let selected = selected_fields_by_stream(&catalog(Some(vec!["id".into(), "name".into()])))
            .unwrap();
        let mut message = Message::Record {
            record: RecordMessage {
                stream: "users".into(),
                namespace: None,
                data: json!({"id": 1, "name": "x", "extra": "y"}),
                emitted_at: None,
            },
        };
        filter_selected_fields(&selected, &mut message).unwrap();
        let Message::Record { record } = message else {
            unreachable!();
        };
        assert_eq!(record.data, json!({"id": 1, "name": "x"}));
    }

    #[test]
    fn filter_drops_everything_for_unknown_streams() {
        let selected = selected_fields_by_stream(&catalog(None)).unwrap();
        let mut message = Message::Record {
            record: RecordMessage {
                stream: "ghosts".into(),
                namespace: None,
                data: json!({"id": 1}),
                emitted_at: None,
            },
        };
        filter_selected_fields(&selected, &mut message).unwrap();
        let Message::Record { record } = message else {
            unreachable!();
        };
        assert_eq!(record.data, json!({}));
    }

    #[test]
    fn filter_rejects_non_object_data() {
        let selected = selected_fields_by_stream(&catalog(None)).unwrap();
        let mut message = Message::Record {
            record: RecordMessage {
                stream: "users".into(),
                namespace: None,
                data: json!("scalar"),
                emitted_at: None,
            },
        };
        assert!(filter_selected_fields(&selected, &mut message).is_err());
    }

    #[test]
    fn byte_display_is_human_readable() {
        assert_eq!(display_bytes(512), "512 B");
        assert_eq!(display_bytes(2048), "2.0 KiB");
        assert_eq!(display_bytes(5 * 1024 * 1024), "5.0 MiB");
    }
}
