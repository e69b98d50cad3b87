// crates/elspeth-core/tests/aggregation.rs
// ============================================================================
// Module: Aggregation Executor Tests
// Description: Buffering, triggers, flushes, and checkpoint round trips.
// ============================================================================
//! ## Overview
//! Covers count and timeout triggers, passthrough and reduce flushes,
//! self-contained checkpoint round trips, legacy-format rejection, and the
//! serialized size limits.

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

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use common::CollectAggregation;
use common::MemorySink;
use common::ValueSource;
use common::aggregation_spec;
use common::pipeline_spec;
use common::row;
use common::test_services;
use elspeth_core::AggregationOutputMode;
use elspeth_core::BatchStatus;
use elspeth_core::Determinism;
use elspeth_core::ExecutionGraph;
use elspeth_core::IdGenerator;
use elspeth_core::InMemoryRecorder;
use elspeth_core::NodeId;
use elspeth_core::NodeType;
use elspeth_core::Orchestrator;
use elspeth_core::PipelineBindings;
use elspeth_core::PluginContext;
use elspeth_core::Recorder;
use elspeth_core::RowErrorPolicy;
use elspeth_core::RowOutcome;
use elspeth_core::RunOptions;
use elspeth_core::SinkPlugin;
use elspeth_core::StageBinding;
use elspeth_core::StagePlugin;
use elspeth_core::Timestamp;
use elspeth_core::TriggerSpec;
use elspeth_core::TriggerType;
use elspeth_core::interfaces::NodeRegistration;
use elspeth_core::interfaces::RunStart;
use elspeth_core::interfaces::TokenSpawn;
use elspeth_core::runtime::AggregationError;
use elspeth_core::runtime::AggregationExecutor;
use elspeth_core::runtime::TokenInfo;
use serde_json::json;

// ============================================================================
// SECTION: Count Trigger Through the Orchestrator
// ============================================================================

#[test]
fn count_trigger_batches_and_end_of_source_drains_the_tail() {
    let spec = pipeline_spec(
        vec![aggregation_spec(
            "collect",
            TriggerType::Count,
            Some(3),
            AggregationOutputMode::Passthrough,
        )],
        &["archive"],
        "archive",
    );
    let rows: Vec<_> = (1..=7).map(|id| row(&[("id", json!(id))])).collect();
    let source = ValueSource::new(rows);
    let (archive_sink, archive_log) = MemorySink::with_log();
    let mut sinks: BTreeMap<String, Box<dyn SinkPlugin>> = BTreeMap::new();
    sinks.insert("archive".to_string(), Box::new(archive_sink));

    let recorder = Arc::new(InMemoryRecorder::new());
    let ids = Arc::new(IdGenerator::new());
    let graph = ExecutionGraph::from_spec(&spec, &ids).expect("graph");
    let report = Orchestrator::new(
        graph,
        spec.clone(),
        PipelineBindings {
            source: Box::new(source),
            stages: vec![StageBinding {
                plugin: StagePlugin::Aggregation(Box::new(CollectAggregation {
                    mode: AggregationOutputMode::Passthrough,
                })),
                on_error: RowErrorPolicy::Fail,
                retry: None,
                aggregation: spec.row_plugins[0].aggregation.clone(),
            }],
            sinks,
        },
        Arc::clone(&recorder) as Arc<dyn Recorder>,
        None,
        test_services(),
        RunOptions::default(),
        ids,
    )
    .expect("orchestrator")
    .run()
    .expect("run");

    assert_eq!(report.rows, 7);
    assert_eq!(report.outcomes.get(&RowOutcome::Completed), Some(&7));
    assert_eq!(archive_log.lock().expect("archive").len(), 7);

    let batches = recorder.batches();
    assert_eq!(batches.len(), 3);
    assert!(batches.iter().all(|batch| batch.status == BatchStatus::Completed));
    let reasons: Vec<_> =
        batches.iter().filter_map(|batch| batch.trigger_reason.clone()).collect();
    assert_eq!(reasons, vec![
        "count".to_string(),
        "count".to_string(),
        "end_of_source".to_string()
    ]);

    let members = recorder.batch_members();
    let count_for = |batch: &elspeth_core::BatchRecord| {
        members.iter().filter(|member| member.batch_id == batch.batch_id).count()
    };
    assert_eq!(count_for(&batches[0]), 3);
    assert_eq!(count_for(&batches[1]), 3);
    assert_eq!(count_for(&batches[2]), 1);

    // One output token per consumed row in passthrough mode.
    assert_eq!(recorder.batch_outputs().len(), 7);
}

// ============================================================================
// SECTION: Executor Fixtures
// ============================================================================

/// Registers a run, an aggregation node, and `count` rows with tokens.
fn seed_ledger(
    recorder: &InMemoryRecorder,
    count: usize,
) -> (elspeth_core::RunId, NodeId, Vec<TokenInfo>) {
    let now = Timestamp::from_unix_millis(1_700_000_000_000);
    let run = recorder
        .begin_run(RunStart {
            settings_json: json!({}),
            config_hash: "cfg".to_string(),
            canonical_version: "jcs-sha256/1".to_string(),
            schema_contract: None,
            started_at: now,
        })
        .expect("run");
    let node_id = NodeId::new("aggregation_collect_0001");
    recorder
        .register_node(NodeRegistration {
            run_id: run.run_id.clone(),
            node_id: node_id.clone(),
            plugin_name: "collect".to_string(),
            node_type: NodeType::Aggregation,
            plugin_version: "1.0.0".to_string(),
            determinism: Determinism::Deterministic,
            config_hash: "cfg".to_string(),
            config_json: json!({}),
            sequence_in_pipeline: Some(0),
            schema_mode: None,
            input_contract: None,
            output_contract: None,
            registered_at: now,
        })
        .expect("node");

    let mut tokens = Vec::with_capacity(count);
    for index in 0..count {
        let row_record = recorder
            .create_row(
                &run.run_id,
                &node_id,
                index as u64,
                &format!("hash-{index}"),
                None,
                now,
            )
            .expect("row");
        let token = recorder
            .create_token(TokenSpawn {
                row_id: row_record.row_id.clone(),
                parents: Vec::new(),
                branch_name: (index % 2 == 0).then(|| format!("branch-{index}")),
                fork_group_id: None,
                join_group_id: None,
                expand_group_id: None,
                step_in_pipeline: Some(0),
                created_at: now,
            })
            .expect("token");
        tokens.push(TokenInfo {
            token_id: token.token_id,
            row_id: row_record.row_id,
            branch_name: token.branch_name,
            row_data: row(&[("id", json!(index))]),
        });
    }
    (run.run_id, node_id, tokens)
}

fn trigger(trigger_type: TriggerType, threshold: Option<usize>, timeout_ms: Option<u64>) -> TriggerSpec {
    TriggerSpec {
        trigger_type,
        threshold,
        timeout_ms,
    }
}

// ============================================================================
// SECTION: Checkpoint Round Trip
// ============================================================================

#[test]
fn checkpoint_resume_preserves_token_order_and_metadata() {
    let recorder = InMemoryRecorder::new();
    let (run_id, node_id, tokens) = seed_ledger(&recorder, 5);
    let now = Timestamp::from_unix_millis(1_700_000_000_000);
    let ids = Arc::new(IdGenerator::new());

    // First executor buffers three of five rows, then the process dies.
    let mut first = AggregationExecutor::new(Arc::clone(&ids));
    first.register_node(node_id.clone(), trigger(TriggerType::Count, Some(10), None));
    for token in &tokens[..3] {
        let fired = first
            .buffer_row(&node_id, token.clone(), &recorder, &run_id, now)
            .expect("buffer");
        assert!(fired.is_none());
    }
    let checkpoint = first.checkpoint_state().expect("checkpoint");
    assert_eq!(checkpoint.total_rows, 3);
    let serialized = serde_json::to_string(&checkpoint.value).expect("serialize");
    drop(first);

    // A fresh executor restores from the serialized state alone.
    let mut second = AggregationExecutor::new(Arc::clone(&ids));
    second.register_node(node_id.clone(), trigger(TriggerType::Count, Some(10), None));
    let restored: serde_json::Value = serde_json::from_str(&serialized).expect("parse");
    second.restore_from_checkpoint(&restored).expect("restore");
    assert!(second.has_buffered(&node_id));

    for token in &tokens[3..] {
        let fired = second
            .buffer_row(&node_id, token.clone(), &recorder, &run_id, now)
            .expect("buffer");
        assert!(fired.is_none());
    }

    let anchor = second.last_token(&node_id).expect("anchor").clone();
    let state_id = recorder
        .begin_node_state(elspeth_core::interfaces::NodeStateOpen {
            token_id: anchor.token_id,
            node_id: node_id.clone(),
            step_index: 0,
            attempt: 1,
            input_hash: "flush".to_string(),
            input_data_ref: None,
            context_before: None,
            started_at: now,
        })
        .expect("state");
    let services = test_services();
    let mut ctx = PluginContext::new(&run_id, &node_id, &services);
    let mut plugin = CollectAggregation {
        mode: AggregationOutputMode::Passthrough,
    };
    let outcome = second
        .execute_flush(
            &node_id,
            &mut plugin,
            &mut ctx,
            AggregationOutputMode::Passthrough,
            TriggerType::EndOfSource,
            &recorder,
            &run_id,
            &state_id,
            None,
            Some(1),
            now,
        )
        .expect("flush");

    assert_eq!(outcome.consumed.len(), 5);
    for (consumed, original) in outcome.consumed.iter().zip(&tokens) {
        assert_eq!(consumed.token_id, original.token_id);
        assert_eq!(consumed.row_id, original.row_id);
        assert_eq!(consumed.branch_name, original.branch_name);
        assert_eq!(consumed.row_data, original.row_data);
    }
    assert_eq!(outcome.children.len(), 5);
    assert!(!second.has_buffered(&node_id));
}

#[test]
fn restore_rejects_the_legacy_identifier_layout_without_partial_state() {
    let ids = Arc::new(IdGenerator::new());
    let node_id = NodeId::new("aggregation_collect_0001");
    let mut executor = AggregationExecutor::new(ids);
    executor.register_node(node_id.clone(), trigger(TriggerType::Count, Some(10), None));

    let legacy = json!({
        "aggregation_collect_0001": {
            "rows": [{"id": 1}],
            "token_ids": ["token-1"]
        }
    });
    let err = executor.restore_from_checkpoint(&legacy).expect_err("must reject");
    let AggregationError::InvalidCheckpointFormat(message) = err else {
        panic!("expected InvalidCheckpointFormat");
    };
    assert!(message.contains("P1-2026-01-21"));
    assert!(!executor.has_buffered(&node_id), "no partial restoration");
}

#[test]
fn restore_requires_token_id_row_id_and_row_data() {
    let ids = Arc::new(IdGenerator::new());
    let node_id = NodeId::new("aggregation_collect_0001");
    let mut executor = AggregationExecutor::new(ids);
    executor.register_node(node_id.clone(), trigger(TriggerType::Count, Some(10), None));

    let missing_row_id = json!({
        "aggregation_collect_0001": {
            "tokens": [{"token_id": "token-1", "row_data": {"id": 1}}],
            "batch_id": null
        }
    });
    assert!(matches!(
        executor.restore_from_checkpoint(&missing_row_id),
        Err(AggregationError::InvalidCheckpointFormat(_))
    ));

    let branch_optional = json!({
        "aggregation_collect_0001": {
            "tokens": [{"token_id": "token-1", "row_id": "row-1", "row_data": {"id": 1}}],
            "batch_id": null
        }
    });
    executor.restore_from_checkpoint(&branch_optional).expect("branch_name is optional");
    let anchor = executor.last_token(&node_id).expect("token");
    assert_eq!(anchor.branch_name, None);
}

// ============================================================================
// SECTION: Size Limits
// ============================================================================

#[test]
fn oversized_checkpoint_state_fails_with_row_and_node_counts() {
    let recorder = InMemoryRecorder::new();
    let (run_id, node_id, _) = seed_ledger(&recorder, 0);
    let now = Timestamp::from_unix_millis(1_700_000_000_000);
    let ids = Arc::new(IdGenerator::new());
    let mut executor = AggregationExecutor::new(ids);
    executor.register_node(node_id.clone(), trigger(TriggerType::Count, Some(1000), None));

    let big_row = recorder
        .create_row(&run_id, &node_id, 0, "big", None, now)
        .expect("row");
    for _ in 0..11 {
        let token = recorder
            .create_token(TokenSpawn {
                row_id: big_row.row_id.clone(),
                parents: Vec::new(),
                branch_name: None,
                fork_group_id: None,
                join_group_id: None,
                expand_group_id: None,
                step_in_pipeline: Some(0),
                created_at: now,
            })
            .expect("token");
        executor
            .buffer_row(
                &node_id,
                TokenInfo {
                    token_id: token.token_id,
                    row_id: big_row.row_id.clone(),
                    branch_name: None,
                    row_data: row(&[("blob", json!("x".repeat(1024 * 1024)))]),
                },
                &recorder,
                &run_id,
                now,
            )
            .expect("buffer");
    }

    let err = executor.checkpoint_state().expect_err("must exceed the hard limit");
    let AggregationError::CheckpointOverSize {
        total_rows,
        node_count,
        ..
    } = err
    else {
        panic!("expected CheckpointOverSize");
    };
    assert_eq!(total_rows, 11);
    assert_eq!(node_count, 1);
}

#[test]
fn large_checkpoint_state_sets_the_warning_flag() {
    let recorder = InMemoryRecorder::new();
    let (run_id, node_id, _) = seed_ledger(&recorder, 0);
    let now = Timestamp::from_unix_millis(1_700_000_000_000);
    let ids = Arc::new(IdGenerator::new());
    let mut executor = AggregationExecutor::new(ids);
    executor.register_node(node_id.clone(), trigger(TriggerType::Count, Some(1000), None));

    let big_row = recorder
        .create_row(&run_id, &node_id, 0, "big", None, now)
        .expect("row");
    let token = recorder
        .create_token(TokenSpawn {
            row_id: big_row.row_id.clone(),
            parents: Vec::new(),
            branch_name: None,
            fork_group_id: None,
            join_group_id: None,
            expand_group_id: None,
            step_in_pipeline: Some(0),
            created_at: now,
        })
        .expect("token");
    executor
        .buffer_row(
            &node_id,
            TokenInfo {
                token_id: token.token_id,
                row_id: big_row.row_id,
                branch_name: None,
                row_data: row(&[("blob", json!("x".repeat(2 * 1024 * 1024)))]),
            },
            &recorder,
            &run_id,
            now,
        )
        .expect("buffer");

    let state = executor.checkpoint_state().expect("state");
    assert!(state.warn_large);
    assert_eq!(state.node_count, 1);
}

// ============================================================================
// SECTION: Timeout Trigger
// ============================================================================

#[test]
fn timeout_trigger_fires_once_the_batch_ages_past_its_budget() {
    let recorder = InMemoryRecorder::new();
    let (run_id, node_id, tokens) = seed_ledger(&recorder, 2);
    let ids = Arc::new(IdGenerator::new());
    let mut executor = AggregationExecutor::new(ids);
    executor.register_node(node_id.clone(), trigger(TriggerType::Timeout, None, Some(1_000)));

    let opened = Timestamp::from_unix_millis(1_700_000_000_000);
    let fired = executor
        .buffer_row(&node_id, tokens[0].clone(), &recorder, &run_id, opened)
        .expect("buffer");
    assert!(fired.is_none());

    let later = opened.plus_millis(1_500);
    let fired = executor
        .buffer_row(&node_id, tokens[1].clone(), &recorder, &run_id, later)
        .expect("buffer");
    assert_eq!(fired, Some(TriggerType::Timeout));
}

// ============================================================================
// SECTION: Reduce Mode
// ============================================================================

#[test]
fn reduce_flush_produces_one_child_with_all_parents() {
    let recorder = InMemoryRecorder::new();
    let (run_id, node_id, tokens) = seed_ledger(&recorder, 3);
    let now = Timestamp::from_unix_millis(1_700_000_000_000);
    let ids = Arc::new(IdGenerator::new());
    let mut executor = AggregationExecutor::new(Arc::clone(&ids));
    executor.register_node(node_id.clone(), trigger(TriggerType::Count, Some(3), None));

    let mut fired = None;
    for token in &tokens {
        fired = executor
            .buffer_row(&node_id, token.clone(), &recorder, &run_id, now)
            .expect("buffer");
    }
    assert_eq!(fired, Some(TriggerType::Count));

    let anchor = executor.last_token(&node_id).expect("anchor").clone();
    let state_id = recorder
        .begin_node_state(elspeth_core::interfaces::NodeStateOpen {
            token_id: anchor.token_id,
            node_id: node_id.clone(),
            step_index: 0,
            attempt: 1,
            input_hash: "flush".to_string(),
            input_data_ref: None,
            context_before: None,
            started_at: now,
        })
        .expect("state");
    let services = test_services();
    let mut ctx = PluginContext::new(&run_id, &node_id, &services);
    let mut plugin = CollectAggregation {
        mode: AggregationOutputMode::Reduce,
    };
    let outcome = executor
        .execute_flush(
            &node_id,
            &mut plugin,
            &mut ctx,
            AggregationOutputMode::Reduce,
            TriggerType::Count,
            &recorder,
            &run_id,
            &state_id,
            None,
            Some(1),
            now,
        )
        .expect("flush");

    assert_eq!(outcome.children.len(), 1);
    let child = &outcome.children[0];
    assert_eq!(child.row_data.get("count"), Some(&json!(3)));

    let parents = recorder.token_parents();
    let child_parents: Vec<_> = parents
        .iter()
        .filter(|parent| parent.token_id == child.token_id)
        .collect();
    assert_eq!(child_parents.len(), 3);
    let ordinals: Vec<u32> = child_parents.iter().map(|parent| parent.ordinal).collect();
    assert_eq!(ordinals, vec![0, 1, 2]);
}
