//! End-to-end replication scenarios driving real connector
//! subprocesses (shell-scripted fakes speaking the line-delimited JSON
//! protocol).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;

use conveyor_engine::config_update::LoggingConfigUpdater;
use conveyor_engine::mapper::IdentityMapper;
use conveyor_engine::metrics::LogMetricReporter;
use conveyor_engine::persistence::{InMemoryStateStore, SyncPersistence, SyncPersistenceConfig};
use conveyor_engine::process::{DestinationConnector, SourceConnector};
use conveyor_engine::tracker::MessageTracker;
use conveyor_engine::validator::RecordSchemaValidator;
use conveyor_engine::ReplicationWorker;
use conveyor_types::failure::FailureOrigin;
use conveyor_types::output::ReplicationStatus;
use conveyor_types::protocol::{
    ConfiguredCatalog, ConfiguredStream, DestinationSyncMode, StreamDescriptor, SyncMode,
};
use conveyor_types::sync::{
    ConnectorLaunchConfig, HeartbeatConfig, State, SyncFlags, SyncInput,
};

fn record_line(id: u64) -> String {
    json!({"type": "RECORD", "record": {"stream": "users", "data": {"id": id, "name": format!("user-{id}")}}})
        .to_string()
}

fn state_line(cursor: &str) -> String {
    json!({"type": "STATE", "state": {"stream": {"name": "users"}, "data": {"cursor": cursor}}})
        .to_string()
}

/// A destination that echoes acknowledged states back on stdout.
const ECHO_STATES_DEST: &str = "grep --line-buffered '\"type\":\"STATE\"'\ntrue\n";

fn users_catalog() -> ConfiguredCatalog {
    ConfiguredCatalog {
        streams: vec![ConfiguredStream {
            stream: StreamDescriptor::new("users", None),
            json_schema: json!({
                "type": "object",
                "properties": {"id": {"type": "integer"}, "name": {"type": "string"}}
            }),
            sync_mode: SyncMode::Incremental,
            destination_sync_mode: DestinationSyncMode::Append,
            selected_fields: None,
        }],
    }
}

struct Harness {
    worker: Arc<ReplicationWorker>,
    source: Arc<SourceConnector>,
    destination: Arc<DestinationConnector>,
    tracker: Arc<MessageTracker>,
    validator: Arc<RecordSchemaValidator>,
    persistence: Arc<SyncPersistence>,
    store: Arc<InMemoryStateStore>,
    job_root: TempDir,
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).expect("write script");
    path
}

fn launch(id: &str, script: &Path, env: BTreeMap<String, String>) -> ConnectorLaunchConfig {
    ConnectorLaunchConfig {
        connector_id: id.into(),
        command: "sh".into(),
        args: vec![script.display().to_string()],
        env,
        config: json!({}),
    }
}

fn build_input(
    job_root: &Path,
    source_script: &str,
    dest_script: &str,
    catalog: ConfiguredCatalog,
    state: Option<State>,
    flags: SyncFlags,
) -> SyncInput {
    build_input_with_env(
        job_root,
        source_script,
        dest_script,
        BTreeMap::new(),
        catalog,
        state,
        flags,
    )
}

#[allow(clippy::too_many_arguments)]
fn build_input_with_env(
    job_root: &Path,
    source_script: &str,
    dest_script: &str,
    dest_env: BTreeMap<String, String>,
    catalog: ConfiguredCatalog,
    state: Option<State>,
    flags: SyncFlags,
) -> SyncInput {
    let source_path = write_script(job_root, "source.sh", source_script);
    let dest_path = write_script(job_root, "dest.sh", dest_script);
    SyncInput {
        job_id: "1".into(),
        attempt: 0,
        connection_id: "conn-1".into(),
        source: launch("source-1", &source_path, BTreeMap::new()),
        destination: launch("dest-1", &dest_path, dest_env),
        catalog,
        state,
        flags,
    }
}

fn build_harness(input: &SyncInput) -> Harness {
    let job_root = TempDir::new().expect("job root");
    let source = Arc::new(SourceConnector::new(input.source.clone()));
    let destination = Arc::new(DestinationConnector::new(input.destination.clone()));
    let tracker = Arc::new(MessageTracker::new());
    let store = Arc::new(InMemoryStateStore::new());
    let persistence = Arc::new(SyncPersistence::new(
        store.clone(),
        SyncPersistenceConfig {
            flush_interval: Duration::from_millis(50),
            ..SyncPersistenceConfig::default()
        },
    ));
    let validator = Arc::new(
        RecordSchemaValidator::new(&input.catalog, input.flags.remove_validation_limit)
            .expect("valid catalog schemas"),
    );
    let worker = Arc::new(ReplicationWorker::new(
        input.job_id.clone(),
        input.attempt,
        source.clone(),
        destination.clone(),
        Arc::new(IdentityMapper),
        tracker.clone(),
        persistence.clone(),
        validator.clone(),
        Arc::new(LogMetricReporter),
        Arc::new(LoggingConfigUpdater),
    ));
    Harness {
        worker,
        source,
        destination,
        tracker,
        validator,
        persistence,
        store,
        job_root,
    }
}

fn lenient_heartbeat() -> SyncFlags {
    SyncFlags {
        heartbeat: HeartbeatConfig {
            enabled: true,
            timeout_secs: 600,
        },
        ..SyncFlags::default()
    }
}

#[tokio::test]
async fn happy_path_single_stream() {
    let dir = TempDir::new().unwrap();
    let source = format!(
        "cat <<'EOF'\n{}\n{}\n{}\n{}\n{}\nEOF\n",
        record_line(1),
        record_line(2),
        state_line("s1"),
        record_line(3),
        state_line("s2"),
    );
    let input = build_input(
        dir.path(),
        &source,
        ECHO_STATES_DEST,
        users_catalog(),
        None,
        lenient_heartbeat(),
    );
    let harness = build_harness(&input);

    let output = harness
        .worker
        .run(&input, harness.job_root.path())
        .await
        .expect("run succeeds");

    let summary = &output.replication_attempt_summary;
    assert_eq!(summary.status, ReplicationStatus::Completed);
    assert_eq!(summary.total_stats.records_emitted, 3);
    assert_eq!(summary.total_stats.records_committed, Some(3));
    assert_eq!(summary.total_stats.source_state_messages_emitted, 2);
    assert_eq!(summary.total_stats.destination_state_messages_emitted, 2);
    assert!(!harness.tracker.unreliable_state_timing());
    assert!(output.failures.is_empty());

    assert_eq!(summary.stream_stats.len(), 1);
    let stream = &summary.stream_stats[0];
    assert_eq!(stream.stream, StreamDescriptor::new("users", None));
    assert_eq!(stream.stats.records_emitted, 3);
    assert_eq!(stream.stats.records_committed, Some(3));

    // Both connectors drained and exited cleanly.
    assert!(harness.source.is_finished());
    assert!(harness.destination.is_finished());
    assert_eq!(harness.source.exit_value(), Some(0));
    assert_eq!(harness.destination.exit_value(), Some(0));

    // The destination's last acknowledged state rides along for the
    // workflow to persist.
    let state = output.state.expect("state attached");
    assert_eq!(state.0["data"]["cursor"], "s2");

    // Eager persistence was off.
    assert_eq!(harness.persistence.persist_call_count(), 0);
    assert!(harness.store.states().is_empty());
}

#[tokio::test]
async fn source_failure_mid_stream() {
    let dir = TempDir::new().unwrap();
    let source = format!(
        "cat <<'EOF'\n{}\n{}\nEOF\nexit 1\n",
        record_line(1),
        record_line(2),
    );
    let input_state = State(json!({"cursor": "start"}));
    let input = build_input(
        dir.path(),
        &source,
        ECHO_STATES_DEST,
        users_catalog(),
        Some(input_state.clone()),
        lenient_heartbeat(),
    );
    let harness = build_harness(&input);

    let output = harness
        .worker
        .run(&input, harness.job_root.path())
        .await
        .expect("run returns an output even on failure");

    assert_eq!(
        output.replication_attempt_summary.status,
        ReplicationStatus::Failed
    );
    assert_eq!(output.failures.len(), 1);
    assert_eq!(output.failures[0].origin, FailureOrigin::Source);
    assert!(output.failures[0]
        .internal_message
        .contains("non-zero exit code"));

    // No destination state; the input state passes through.
    assert_eq!(output.state, Some(input_state));
    assert_eq!(output.replication_attempt_summary.total_stats.records_emitted, 2);
}

#[tokio::test]
async fn heartbeat_timeout_fails_the_run() {
    let dir = TempDir::new().unwrap();
    let source = format!("echo '{}'\nsleep 3\n", record_line(1));
    let flags = SyncFlags {
        heartbeat: HeartbeatConfig {
            enabled: true,
            timeout_secs: 1,
        },
        ..SyncFlags::default()
    };
    let input = build_input(
        dir.path(),
        &source,
        ECHO_STATES_DEST,
        users_catalog(),
        None,
        flags,
    );
    let harness = build_harness(&input);

    let output = harness
        .worker
        .run(&input, harness.job_root.path())
        .await
        .expect("run returns an output");

    assert_eq!(
        output.replication_attempt_summary.status,
        ReplicationStatus::Failed
    );
    assert_eq!(output.failures.len(), 1);
    assert_eq!(output.failures[0].origin, FailureOrigin::SourceHeartbeat);
}

#[tokio::test]
async fn cancellation_during_transfer() {
    let dir = TempDir::new().unwrap();
    let source = format!(
        "while :; do\n  echo '{}'\n  sleep 0.01\ndone\n",
        record_line(1),
    );
    let input = build_input(
        dir.path(),
        &source,
        ECHO_STATES_DEST,
        users_catalog(),
        None,
        lenient_heartbeat(),
    );
    let harness = build_harness(&input);

    let worker = harness.worker.clone();
    let handle = worker.cancellation_handle();
    let job_root = harness.job_root.path().to_path_buf();
    let input_for_run = input.clone();
    let run = tokio::spawn(async move { worker.run(&input_for_run, &job_root).await });

    tokio::time::sleep(Duration::from_millis(300)).await;
    handle.cancel().await;

    let output = run.await.unwrap().expect("run returns an output");
    assert_eq!(
        output.replication_attempt_summary.status,
        ReplicationStatus::Cancelled
    );
    assert!(
        output.failures.is_empty(),
        "cancellation-triggered stream closures must not be attributed as failures: {:?}",
        output.failures
    );
}

#[tokio::test]
async fn out_of_order_destination_states_clear_reliable_timing() {
    let dir = TempDir::new().unwrap();
    let source = format!(
        "cat <<'EOF'\n{}\n{}\n{}\nEOF\n",
        state_line("a"),
        record_line(1),
        state_line("b"),
    );
    // Acknowledge S_B, then S_A.
    let dest = format!(
        "cat >/dev/null\ncat <<'EOF'\n{}\n{}\nEOF\n",
        state_line("b"),
        state_line("a"),
    );
    let input = build_input(
        dir.path(),
        &source,
        &dest,
        users_catalog(),
        None,
        lenient_heartbeat(),
    );
    let harness = build_harness(&input);

    let output = harness
        .worker
        .run(&input, harness.job_root.path())
        .await
        .expect("run succeeds");

    assert_eq!(
        output.replication_attempt_summary.status,
        ReplicationStatus::Completed
    );
    assert!(harness.tracker.unreliable_state_timing());
    assert_eq!(
        output.replication_attempt_summary.total_stats.records_committed,
        None
    );
    for stream in &output.replication_attempt_summary.stream_stats {
        assert_eq!(stream.stats.records_committed, None);
    }
}

#[tokio::test]
async fn field_selection_filters_before_delivery() {
    let dir = TempDir::new().unwrap();
    let record = json!({
        "type": "RECORD",
        "record": {"stream": "users", "data": {"id": 1, "name": "x", "extra": "y"}}
    })
    .to_string();
    let source = format!("cat <<'EOF'\n{}\n{}\nEOF\n", record, state_line("s1"));
    let received = dir.path().join("received.jsonl");
    let dest = "tee \"$RECEIVED\" | grep --line-buffered '\"type\":\"STATE\"'\ntrue\n";
    let mut env = BTreeMap::new();
    env.insert("RECEIVED".to_string(), received.display().to_string());

    let flags = SyncFlags {
        field_selection_enabled: true,
        ..lenient_heartbeat()
    };
    let input = build_input_with_env(
        dir.path(),
        &source,
        dest,
        env,
        users_catalog(),
        None,
        flags,
    );
    let harness = build_harness(&input);

    let output = harness
        .worker
        .run(&input, harness.job_root.path())
        .await
        .expect("run succeeds");
    assert_eq!(
        output.replication_attempt_summary.status,
        ReplicationStatus::Completed
    );

    // The destination saw only the catalog-declared fields.
    let delivered = std::fs::read_to_string(&received).expect("destination received lines");
    let record_line = delivered
        .lines()
        .find(|l| l.contains("\"RECORD\""))
        .expect("a record was delivered");
    let parsed: Value = serde_json::from_str(record_line).unwrap();
    assert_eq!(parsed["record"]["data"], json!({"id": 1, "name": "x"}));

    // The stripped field still shows up in the unexpected-fields metric.
    let unexpected = harness
        .validator
        .unexpected_fields(&StreamDescriptor::new("users", None));
    assert!(unexpected.contains("extra"));
}

#[tokio::test]
async fn eager_state_mode_persists_each_acknowledged_state() {
    let dir = TempDir::new().unwrap();
    let source = format!(
        "cat <<'EOF'\n{}\n{}\n{}\n{}\nEOF\n",
        record_line(1),
        state_line("s1"),
        record_line(2),
        state_line("s2"),
    );
    let flags = SyncFlags {
        commit_state_asap: true,
        commit_stats_asap: true,
        ..lenient_heartbeat()
    };
    let input = build_input(
        dir.path(),
        &source,
        ECHO_STATES_DEST,
        users_catalog(),
        None,
        flags,
    );
    let harness = build_harness(&input);

    let output = harness
        .worker
        .run(&input, harness.job_root.path())
        .await
        .expect("run succeeds");

    assert_eq!(
        output.replication_attempt_summary.status,
        ReplicationStatus::Completed
    );
    // Exactly one persist call per destination-emitted state.
    assert_eq!(harness.persistence.persist_call_count(), 2);
    // Only the latest state per stream is durable.
    let states = harness.store.states();
    assert_eq!(states.len(), 1);
    assert_eq!(states["conn-1/users"]["cursor"], "s2");
    // Eager stats rode along.
    assert_eq!(harness.store.stats()["conn-1"].records_emitted, 2);
    // In eager mode the output does not carry state.
    assert!(output.state.is_none());
}

#[tokio::test]
async fn connector_error_trace_is_reported_first() {
    let dir = TempDir::new().unwrap();
    let trace = json!({
        "type": "TRACE",
        "trace": {"type": "ERROR", "error": {"message": "table vanished", "failure_type": "system_error"}}
    })
    .to_string();
    let source = format!(
        "cat <<'EOF'\n{}\n{}\nEOF\nexit 1\n",
        record_line(1),
        trace,
    );
    let input = build_input(
        dir.path(),
        &source,
        ECHO_STATES_DEST,
        users_catalog(),
        None,
        lenient_heartbeat(),
    );
    let harness = build_harness(&input);

    let output = harness
        .worker
        .run(&input, harness.job_root.path())
        .await
        .expect("run returns an output");

    assert_eq!(
        output.replication_attempt_summary.status,
        ReplicationStatus::Failed
    );
    // Trace-derived failure first, then the loop failure.
    assert_eq!(output.failures.len(), 2);
    assert_eq!(output.failures[0].external_message, "table vanished");
    assert_eq!(output.failures[0].origin, FailureOrigin::Source);
    assert_eq!(output.failures[1].origin, FailureOrigin::Source);
}

#[tokio::test]
async fn invalid_lines_are_skipped_not_fatal() {
    let dir = TempDir::new().unwrap();
    let source = format!(
        "echo 'this is not json'\necho '{{\"type\":\"UNKNOWN_KIND\"}}'\ncat <<'EOF'\n{}\nEOF\n",
        record_line(1),
    );
    let input = build_input(
        dir.path(),
        &source,
        ECHO_STATES_DEST,
        users_catalog(),
        None,
        lenient_heartbeat(),
    );
    let harness = build_harness(&input);

    let output = harness
        .worker
        .run(&input, harness.job_root.path())
        .await
        .expect("run succeeds");
    assert_eq!(
        output.replication_attempt_summary.status,
        ReplicationStatus::Completed
    );
    assert_eq!(output.replication_attempt_summary.total_stats.records_emitted, 1);
}
