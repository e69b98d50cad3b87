// crates/elspeth-store-sqlite/tests/landscape_store.rs
// ============================================================================
// Module: Landscape Store Tests
// Description: Durable recorder, repository strictness, and payload behavior.
// ============================================================================
//! ## Overview
//! Exercises the SQLite Landscape end to end: write invariants, fail-closed
//! enum decoding, schema compatibility checks, purge semantics, and row
//! lineage assembly.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::path::PathBuf;

use elspeth_core::BatchStatus;
use elspeth_core::CallStatus;
use elspeth_core::CallType;
use elspeth_core::Determinism;
use elspeth_core::ExportStatus;
use elspeth_core::NodeType;
use elspeth_core::PayloadStore;
use elspeth_core::PayloadStoreError;
use elspeth_core::Recorder;
use elspeth_core::RecorderError;
use elspeth_core::RoutingMode;
use elspeth_core::RowDataState;
use elspeth_core::RunStatus;
use elspeth_core::Timestamp;
use elspeth_core::contracts::NodeId;
use elspeth_core::contracts::RoutingGroupId;
use elspeth_core::interfaces::BatchStatusUpdate;
use elspeth_core::interfaces::CallDraft;
use elspeth_core::interfaces::CheckpointDraft;
use elspeth_core::interfaces::ExportStatusUpdate;
use elspeth_core::interfaces::NodeRegistration;
use elspeth_core::interfaces::NodeStateCompletion;
use elspeth_core::interfaces::NodeStateOpen;
use elspeth_core::interfaces::RouteDispatch;
use elspeth_core::interfaces::RunStart;
use elspeth_core::interfaces::TokenSpawn;
use elspeth_store_sqlite::LandscapeRepository;
use elspeth_store_sqlite::SqliteLandscape;
use elspeth_store_sqlite::SqliteLandscapeConfig;
use elspeth_store_sqlite::SqliteLandscapeError;
use elspeth_store_sqlite::SqlitePayloadStore;
use serde_json::json;
use tempfile::TempDir;

const NOW: Timestamp = Timestamp::from_unix_millis(1_700_000_000_000);

fn config(dir: &TempDir) -> SqliteLandscapeConfig {
    SqliteLandscapeConfig {
        path: dir.path().join("landscape.db"),
        busy_timeout_ms: 1_000,
        journal_mode: elspeth_store_sqlite::SqliteJournalMode::Wal,
        sync_mode: elspeth_store_sqlite::SqliteSyncMode::Normal,
    }
}

fn begin(store: &SqliteLandscape) -> elspeth_core::RunRecord {
    store
        .begin_run(RunStart {
            settings_json: json!({"pipeline": "test"}),
            config_hash: "cfg-hash".to_string(),
            canonical_version: "jcs-sha256/1".to_string(),
            schema_contract: None,
            started_at: NOW,
        })
        .expect("begin run")
}

fn register_node(store: &SqliteLandscape, run: &elspeth_core::RunRecord, name: &str) -> NodeId {
    let node_id = NodeId::new(format!("transform_{name}_0001"));
    store
        .register_node(NodeRegistration {
            run_id: run.run_id.clone(),
            node_id: node_id.clone(),
            plugin_name: name.to_string(),
            node_type: NodeType::Transform,
            plugin_version: "1.0.0".to_string(),
            determinism: Determinism::Deterministic,
            config_hash: "node-hash".to_string(),
            config_json: json!({}),
            sequence_in_pipeline: Some(0),
            schema_mode: None,
            input_contract: None,
            output_contract: None,
            registered_at: NOW,
        })
        .expect("register node");
    node_id
}

// ============================================================================
// SECTION: Write Invariants
// ============================================================================

#[test]
fn edges_reject_duplicate_labels_per_source_node() {
    let dir = TempDir::new().expect("tempdir");
    let store = SqliteLandscape::open(&config(&dir)).expect("open");
    let run = begin(&store);
    let from = register_node(&store, &run, "gate");
    let to = register_node(&store, &run, "sink");

    store
        .register_edge(&run.run_id, &from, &to, "continue", RoutingMode::Move, NOW)
        .expect("first edge");
    let err = store
        .register_edge(&run.run_id, &from, &to, "continue", RoutingMode::Move, NOW)
        .expect_err("duplicate must fail");
    assert!(matches!(err, RecorderError::Duplicate(_)));
}

#[test]
fn node_states_transition_exactly_once() {
    let dir = TempDir::new().expect("tempdir");
    let store = SqliteLandscape::open(&config(&dir)).expect("open");
    let run = begin(&store);
    let node = register_node(&store, &run, "step");
    let row = store
        .create_row(&run.run_id, &node, 0, "row-hash", None, NOW)
        .expect("row");
    let token = store
        .create_token(TokenSpawn {
            row_id: row.row_id,
            parents: Vec::new(),
            branch_name: None,
            fork_group_id: None,
            join_group_id: None,
            expand_group_id: None,
            step_in_pipeline: Some(0),
            created_at: NOW,
        })
        .expect("token");
    let state = store
        .begin_node_state(NodeStateOpen {
            token_id: token.token_id,
            node_id: node,
            step_index: 0,
            attempt: 1,
            input_hash: "in".to_string(),
            input_data_ref: None,
            context_before: None,
            started_at: NOW,
        })
        .expect("open state");

    store
        .complete_node_state(&state, NodeStateCompletion {
            output_hash: Some("out".to_string()),
            output_data_ref: None,
            context_after: None,
            completed_at: NOW,
            duration_ms: 5,
        })
        .expect("complete");
    let err = store
        .fail_node_state(&state, &json!("late"), NOW, 1)
        .expect_err("no back-transitions");
    assert!(matches!(err, RecorderError::Invalid(_)));
}

#[test]
fn calls_are_indexed_per_state_in_submission_order() {
    let dir = TempDir::new().expect("tempdir");
    let store = SqliteLandscape::open(&config(&dir)).expect("open");
    let run = begin(&store);
    let node = register_node(&store, &run, "caller");
    let row = store
        .create_row(&run.run_id, &node, 0, "row-hash", None, NOW)
        .expect("row");
    let token = store
        .create_token(TokenSpawn {
            row_id: row.row_id,
            parents: Vec::new(),
            branch_name: None,
            fork_group_id: None,
            join_group_id: None,
            expand_group_id: None,
            step_in_pipeline: Some(0),
            created_at: NOW,
        })
        .expect("token");
    let state = store
        .begin_node_state(NodeStateOpen {
            token_id: token.token_id,
            node_id: node,
            step_index: 0,
            attempt: 1,
            input_hash: "in".to_string(),
            input_data_ref: None,
            context_before: None,
            started_at: NOW,
        })
        .expect("open state");

    for index in 0..3_u32 {
        let call = store
            .record_call(
                &state,
                CallDraft {
                    call_type: CallType::Http,
                    status: CallStatus::Ok,
                    request_hash: format!("req-{index}"),
                    request_ref: None,
                    response_hash: None,
                    response_ref: None,
                    error_json: None,
                    latency_ms: Some(12),
                },
                NOW,
            )
            .expect("call");
        assert_eq!(call.call_index, index);
    }
    let repository = LandscapeRepository::new(store);
    let calls = repository.list_calls(&state).expect("calls");
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[0].call_type, CallType::Http);
}

#[test]
fn routing_events_record_atomically_with_shared_group() {
    let dir = TempDir::new().expect("tempdir");
    let store = SqliteLandscape::open(&config(&dir)).expect("open");
    let run = begin(&store);
    let gate = register_node(&store, &run, "gate");
    let left = register_node(&store, &run, "left");
    let right = register_node(&store, &run, "right");
    let edge_left = store
        .register_edge(&run.run_id, &gate, &left, "left", RoutingMode::Copy, NOW)
        .expect("left edge");
    let edge_right = store
        .register_edge(&run.run_id, &gate, &right, "right", RoutingMode::Copy, NOW)
        .expect("right edge");
    let row = store
        .create_row(&run.run_id, &gate, 0, "row-hash", None, NOW)
        .expect("row");
    let token = store
        .create_token(TokenSpawn {
            row_id: row.row_id,
            parents: Vec::new(),
            branch_name: None,
            fork_group_id: None,
            join_group_id: None,
            expand_group_id: None,
            step_in_pipeline: Some(0),
            created_at: NOW,
        })
        .expect("token");
    let state = store
        .begin_node_state(NodeStateOpen {
            token_id: token.token_id,
            node_id: gate,
            step_index: 0,
            attempt: 1,
            input_hash: "in".to_string(),
            input_data_ref: None,
            context_before: None,
            started_at: NOW,
        })
        .expect("open state");

    let group = RoutingGroupId::new("fork-1");
    let events = store
        .record_routing_events(
            &state,
            &group,
            &[
                RouteDispatch {
                    edge_id: edge_left.edge_id,
                    mode: RoutingMode::Copy,
                },
                RouteDispatch {
                    edge_id: edge_right.edge_id,
                    mode: RoutingMode::Copy,
                },
            ],
            None,
            NOW,
        )
        .expect("events");
    assert_eq!(events.len(), 2);

    let repository = LandscapeRepository::new(store);
    let stored = repository.list_routing_events(&state).expect("read events");
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].ordinal, 0);
    assert_eq!(stored[1].ordinal, 1);
    assert_eq!(stored[0].routing_group_id, stored[1].routing_group_id);
}

#[test]
fn batches_walk_their_lifecycle_forward_only() {
    let dir = TempDir::new().expect("tempdir");
    let store = SqliteLandscape::open(&config(&dir)).expect("open");
    let run = begin(&store);
    let node = register_node(&store, &run, "agg");
    let batch = store.create_batch(&run.run_id, &node, 1, NOW).expect("batch");

    store
        .update_batch_status(&batch.batch_id, BatchStatus::Triggered, BatchStatusUpdate {
            trigger_reason: Some("count".to_string()),
            ..BatchStatusUpdate::default()
        })
        .expect("trigger");
    store
        .update_batch_status(
            &batch.batch_id,
            BatchStatus::Executing,
            BatchStatusUpdate::default(),
        )
        .expect("execute");
    store
        .update_batch_status(&batch.batch_id, BatchStatus::Completed, BatchStatusUpdate {
            completed_at: Some(NOW),
            ..BatchStatusUpdate::default()
        })
        .expect("complete");
    let err = store
        .update_batch_status(&batch.batch_id, BatchStatus::Open, BatchStatusUpdate::default())
        .expect_err("no back-transitions");
    assert!(matches!(err, RecorderError::Invalid(_)));
}

#[test]
fn complete_run_is_idempotent_within_one_terminal_status() {
    let dir = TempDir::new().expect("tempdir");
    let store = SqliteLandscape::open(&config(&dir)).expect("open");
    let run = begin(&store);

    store
        .complete_run(&run.run_id, RunStatus::Completed, NOW, Some("exact".to_string()))
        .expect("first completion");
    store
        .complete_run(&run.run_id, RunStatus::Completed, NOW, None)
        .expect("same terminal status is idempotent");
    let err = store
        .complete_run(&run.run_id, RunStatus::Failed, NOW, None)
        .expect_err("different terminal status is a programming error");
    assert!(matches!(err, RecorderError::Invalid(_)));
}

// ============================================================================
// SECTION: Fail-Closed Reads
// ============================================================================

#[test]
fn foreign_enum_strings_crash_the_read_path() {
    let dir = TempDir::new().expect("tempdir");
    let store_config = config(&dir);
    let run_id = {
        let store = SqliteLandscape::open(&store_config).expect("open");
        begin(&store).run_id
    };

    // Corrupt the status column out of band.
    {
        let raw = rusqlite::Connection::open(&store_config.path).expect("raw connection");
        raw.execute(
            "UPDATE runs SET status = 'paused' WHERE run_id = ?1",
            rusqlite::params![run_id.as_str()],
        )
        .expect("corrupt");
    }

    let store = SqliteLandscape::open(&store_config).expect("reopen");
    let repository = LandscapeRepository::new(store);
    let err = repository.get_run(&run_id).expect_err("must fail closed");
    assert!(matches!(err, SqliteLandscapeError::Integrity(_)));
}

#[test]
fn schema_compatibility_lists_every_missing_column() {
    let dir = TempDir::new().expect("tempdir");
    let path: PathBuf = dir.path().join("stale.db");
    {
        // A stale database whose runs table predates several columns.
        let raw = rusqlite::Connection::open(&path).expect("raw connection");
        raw.execute_batch(
            "CREATE TABLE runs (run_id TEXT PRIMARY KEY, started_at INTEGER NOT NULL);
             CREATE TABLE landscape_meta (key TEXT PRIMARY KEY, value INTEGER NOT NULL);
             INSERT INTO landscape_meta (key, value) VALUES ('schema_version', 1);",
        )
        .expect("stale schema");
    }
    let err = SqliteLandscape::open(&SqliteLandscapeConfig {
        path,
        busy_timeout_ms: 1_000,
        journal_mode: elspeth_store_sqlite::SqliteJournalMode::Wal,
        sync_mode: elspeth_store_sqlite::SqliteSyncMode::Normal,
    })
    .expect_err("must fail");
    let SqliteLandscapeError::SchemaCompatibility { missing } = err else {
        panic!("expected SchemaCompatibility");
    };
    assert!(missing.contains(&"runs.status".to_string()));
    assert!(missing.contains(&"runs.config_hash".to_string()));
}

#[test]
fn schema_version_mismatch_is_rejected() {
    let dir = TempDir::new().expect("tempdir");
    let store_config = config(&dir);
    {
        let store = SqliteLandscape::open(&store_config).expect("open");
        drop(store);
    }
    {
        let raw = rusqlite::Connection::open(&store_config.path).expect("raw connection");
        raw.execute("UPDATE landscape_meta SET value = 99 WHERE key = 'schema_version'", [])
            .expect("bump version");
    }
    let err = SqliteLandscape::open(&store_config).expect_err("must fail");
    assert!(matches!(err, SqliteLandscapeError::VersionMismatch(_)));
}

// ============================================================================
// SECTION: Payload Store
// ============================================================================

#[test]
fn payload_store_round_trips_and_is_idempotent() {
    let dir = TempDir::new().expect("tempdir");
    let store = SqlitePayloadStore::open(&dir.path().join("payloads.db")).expect("open");

    let first = store.store(b"hello world").expect("store");
    let second = store.store(b"hello world").expect("store again");
    assert_eq!(first, second);
    assert!(store.exists(&first).expect("exists"));
    assert_eq!(store.retrieve(&first).expect("retrieve"), b"hello world");
}

#[test]
fn purged_payloads_report_purged_not_missing() {
    let dir = TempDir::new().expect("tempdir");
    let store = SqlitePayloadStore::open(&dir.path().join("payloads.db")).expect("open");

    let reference = store.store(b"sensitive").expect("store");
    assert!(store.purge(&reference, NOW).expect("purge"));
    let err = store.retrieve(&reference).expect_err("must be purged");
    assert!(matches!(err, PayloadStoreError::Purged { .. }));
    assert!(!store.exists(&reference).expect("exists"));

    let missing = elspeth_core::contracts::PayloadRef::new("0".repeat(64));
    let err = store.retrieve(&missing).expect_err("must be missing");
    assert!(matches!(err, PayloadStoreError::NotFound { .. }));
}

// ============================================================================
// SECTION: Row Lineage
// ============================================================================

#[test]
fn explain_row_reports_purged_payloads_with_preserved_hash() {
    let dir = TempDir::new().expect("tempdir");
    let store = SqliteLandscape::open(&config(&dir)).expect("open");
    let payloads = SqlitePayloadStore::open(&dir.path().join("payloads.db")).expect("payloads");
    let run = begin(&store);
    let node = register_node(&store, &run, "source");

    let bytes = serde_json::to_vec(&json!({"id": 7})).expect("bytes");
    let reference = payloads.store(&bytes).expect("store payload");
    let row = store
        .create_row(
            &run.run_id,
            &node,
            0,
            reference.as_str(),
            Some(&reference),
            NOW,
        )
        .expect("row");

    let repository = LandscapeRepository::new(store);
    let lineage = repository
        .explain_row(&row.row_id, Some(&payloads))
        .expect("lineage")
        .expect("row exists");
    assert!(lineage.payload_available);
    assert_eq!(lineage.source_data, Some(json!({"id": 7})));

    payloads.purge(&reference, NOW).expect("purge");
    let lineage = repository
        .explain_row(&row.row_id, Some(&payloads))
        .expect("lineage")
        .expect("row exists");
    assert!(!lineage.payload_available);
    assert_eq!(lineage.data_state, RowDataState::Purged);
    assert_eq!(lineage.source_data, None);
    assert_eq!(lineage.row.source_data_hash, reference.as_str());
}

#[test]
fn explain_row_distinguishes_never_stored_and_unconfigured() {
    let dir = TempDir::new().expect("tempdir");
    let store = SqliteLandscape::open(&config(&dir)).expect("open");
    let run = begin(&store);
    let node = register_node(&store, &run, "source");

    let bare = store
        .create_row(&run.run_id, &node, 0, "hash-a", None, NOW)
        .expect("bare row");
    let referenced = store
        .create_row(
            &run.run_id,
            &node,
            1,
            "hash-b",
            Some(&elspeth_core::contracts::PayloadRef::new("hash-b")),
            NOW,
        )
        .expect("referenced row");

    let repository = LandscapeRepository::new(store);
    let lineage = repository.explain_row(&bare.row_id, None).expect("lineage").expect("row");
    assert_eq!(lineage.data_state, RowDataState::NeverStored);
    let lineage =
        repository.explain_row(&referenced.row_id, None).expect("lineage").expect("row");
    assert_eq!(lineage.data_state, RowDataState::StoreNotConfigured);
}

#[test]
fn row_data_result_distinguishes_every_state() {
    let dir = TempDir::new().expect("tempdir");
    let store = SqliteLandscape::open(&config(&dir)).expect("open");
    let payloads = SqlitePayloadStore::open(&dir.path().join("payloads.db")).expect("payloads");
    let run = begin(&store);
    let node = register_node(&store, &run, "source");

    let bytes = serde_json::to_vec(&json!({"id": 9})).expect("bytes");
    let reference = payloads.store(&bytes).expect("store payload");
    let stored_row = store
        .create_row(&run.run_id, &node, 0, reference.as_str(), Some(&reference), NOW)
        .expect("row");
    let bare_row = store
        .create_row(&run.run_id, &node, 1, "bare-hash", None, NOW)
        .expect("bare row");

    let repository = LandscapeRepository::new(store);
    let result = repository.row_data(&stored_row.row_id, Some(&payloads)).expect("data");
    assert_eq!(result.state, RowDataState::Available);
    assert_eq!(result.data.as_deref(), Some(bytes.as_slice()));

    payloads.purge(&reference, NOW).expect("purge");
    let result = repository.row_data(&stored_row.row_id, Some(&payloads)).expect("data");
    assert_eq!(result.state, RowDataState::Purged);
    assert!(result.data.is_none());

    let result = repository.row_data(&bare_row.row_id, Some(&payloads)).expect("data");
    assert_eq!(result.state, RowDataState::NeverStored);

    let result = repository.row_data(&stored_row.row_id, None).expect("data");
    assert_eq!(result.state, RowDataState::StoreNotConfigured);

    let missing = elspeth_core::contracts::RowId::new("row-does-not-exist");
    let result = repository.row_data(&missing, Some(&payloads)).expect("data");
    assert_eq!(result.state, RowDataState::RowNotFound);
}

#[test]
fn export_status_round_trips_through_the_repository() {
    let dir = TempDir::new().expect("tempdir");
    let store = SqliteLandscape::open(&config(&dir)).expect("open");
    let run = begin(&store);

    store
        .set_export_status(&run.run_id, ExportStatus::Completed, ExportStatusUpdate {
            format: Some("jsonl".to_string()),
            sink: Some("compliance".to_string()),
            exported_at: Some(NOW),
            ..ExportStatusUpdate::default()
        })
        .expect("export status");

    let repository = LandscapeRepository::new(store);
    let stored = repository.get_run(&run.run_id).expect("read").expect("present");
    assert_eq!(stored.export_status, Some(ExportStatus::Completed));
    assert_eq!(stored.export_format.as_deref(), Some("jsonl"));
    assert_eq!(stored.export_sink.as_deref(), Some("compliance"));
    assert_eq!(stored.exported_at, Some(NOW));
}

// ============================================================================
// SECTION: Checkpoints
// ============================================================================

#[test]
fn latest_checkpoint_returns_the_highest_sequence() {
    let dir = TempDir::new().expect("tempdir");
    let store = SqliteLandscape::open(&config(&dir)).expect("open");
    let run = begin(&store);
    let node = register_node(&store, &run, "source");
    let row = store
        .create_row(&run.run_id, &node, 0, "hash", None, NOW)
        .expect("row");
    let token = store
        .create_token(TokenSpawn {
            row_id: row.row_id,
            parents: Vec::new(),
            branch_name: None,
            fork_group_id: None,
            join_group_id: None,
            expand_group_id: None,
            step_in_pipeline: Some(0),
            created_at: NOW,
        })
        .expect("token");

    for sequence in 0..3_u64 {
        store
            .save_checkpoint(CheckpointDraft {
                run_id: run.run_id.clone(),
                token_id: token.token_id.clone(),
                node_id: node.clone(),
                sequence_number: sequence,
                aggregation_state_json: Some(json!({"seq": sequence})),
                created_at: NOW,
            })
            .expect("checkpoint");
    }

    let repository = LandscapeRepository::new(store);
    let latest = repository
        .latest_checkpoint(&run.run_id)
        .expect("latest")
        .expect("present");
    assert_eq!(latest.sequence_number, 2);
    assert_eq!(latest.aggregation_state_json, Some(json!({"seq": 2})));
}
