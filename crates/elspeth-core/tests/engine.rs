// crates/elspeth-core/tests/engine.rs
// ============================================================================
// Module: Engine Integration Tests
// Description: Orchestrator and processor behavior over the in-memory ledger.
// ============================================================================
//! ## Overview
//! Drives full runs through the orchestrator: gate routing, forks, retries,
//! contract violation policy, and run liveness. Every assertion reads back
//! the in-memory ledger the way a compliance reviewer would.

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

use common::AnnotateTransform;
use common::FanoutGate;
use common::FlakyTransform;
use common::KeywordGate;
use common::MemorySink;
use common::ValueSource;
use common::gate_spec;
use common::pipeline_spec;
use common::row;
use common::test_services;
use common::transform_spec;
use elspeth_core::ExecutionGraph;
use elspeth_core::FieldContract;
use elspeth_core::FieldType;
use elspeth_core::IdGenerator;
use elspeth_core::InMemoryRecorder;
use elspeth_core::NodeStateStatus;
use elspeth_core::Orchestrator;
use elspeth_core::PipelineBindings;
use elspeth_core::PipelineSpec;
use elspeth_core::RetrySettings;
use elspeth_core::RoutingMode;
use elspeth_core::RowErrorPolicy;
use elspeth_core::RowOutcome;
use elspeth_core::RunOptions;
use elspeth_core::RunStatus;
use elspeth_core::SchemaContract;
use elspeth_core::SinkPlugin;
use elspeth_core::StageBinding;
use elspeth_core::StagePlugin;
use elspeth_core::TransformErrorCategory;
use serde_json::json;

/// Builds an orchestrator over the in-memory ledger and runs it.
fn run_pipeline(
    spec: PipelineSpec,
    source: ValueSource,
    stages: Vec<StageBinding>,
    sinks: BTreeMap<String, Box<dyn SinkPlugin>>,
    recorder: &Arc<InMemoryRecorder>,
) -> Result<elspeth_core::RunReport, elspeth_core::EngineError> {
    let ids = Arc::new(IdGenerator::new());
    let graph = ExecutionGraph::from_spec(&spec, &ids).expect("graph");
    let orchestrator = Orchestrator::new(
        graph,
        spec,
        PipelineBindings {
            source: Box::new(source),
            stages,
            sinks,
        },
        Arc::clone(recorder) as Arc<dyn elspeth_core::Recorder>,
        None,
        test_services(),
        RunOptions::default(),
        ids,
    )
    .expect("orchestrator");
    orchestrator.run()
}

fn stage(plugin: StagePlugin) -> StageBinding {
    StageBinding {
        plugin,
        on_error: RowErrorPolicy::Fail,
        retry: None,
        aggregation: None,
    }
}

// ============================================================================
// SECTION: Gate Routing
// ============================================================================

#[test]
fn gate_routes_rows_to_their_sinks_only() {
    let spec = pipeline_spec(
        vec![
            transform_spec("identity"),
            gate_spec("keyword_gate", &[("positive", "praise"), ("negative", "review")]),
        ],
        &["archive", "praise", "review"],
        "archive",
    );
    let source = ValueSource::new(vec![
        row(&[("id", json!(1)), ("text", json!("love"))]),
        row(&[("id", json!(2)), ("text", json!("hate"))]),
    ]);
    let (praise_sink, praise_log) = MemorySink::with_log();
    let (review_sink, review_log) = MemorySink::with_log();
    let (archive_sink, archive_log) = MemorySink::with_log();
    let mut sinks: BTreeMap<String, Box<dyn SinkPlugin>> = BTreeMap::new();
    sinks.insert("praise".to_string(), Box::new(praise_sink));
    sinks.insert("review".to_string(), Box::new(review_sink));
    sinks.insert("archive".to_string(), Box::new(archive_sink));

    let recorder = Arc::new(InMemoryRecorder::new());
    let stages = vec![
        stage(StagePlugin::Transform(Box::new(common::IdentityTransform))),
        stage(StagePlugin::Gate(Box::new(KeywordGate {
            field: "text".to_string(),
            routes: vec![
                ("love".to_string(), "positive".to_string()),
                ("hate".to_string(), "negative".to_string()),
            ],
        }))),
    ];
    let report = run_pipeline(spec, source, stages, sinks, &recorder).expect("run");

    assert_eq!(report.outcomes.get(&RowOutcome::Routed), Some(&2));
    assert_eq!(praise_log.lock().expect("praise").len(), 1);
    assert_eq!(review_log.lock().expect("review").len(), 1);
    assert!(archive_log.lock().expect("archive").is_empty());

    let events = recorder.routing_events();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|event| event.ordinal == 0));
    assert!(events.iter().all(|event| event.mode == RoutingMode::Move));
    assert_ne!(events[0].state_id, events[1].state_id);
    assert!(events.iter().all(|event| event.reason_hash.is_some()));
}

#[test]
fn gate_fork_emits_ordered_copy_events_in_one_group() {
    let spec = pipeline_spec(
        vec![gate_spec("fanout_gate", &[("left", "left_sink"), ("right", "right_sink")])],
        &["archive", "left_sink", "right_sink"],
        "archive",
    );
    let source = ValueSource::new(vec![row(&[("id", json!(1))])]);
    let (left_sink, left_log) = MemorySink::with_log();
    let (right_sink, right_log) = MemorySink::with_log();
    let (archive_sink, _archive_log) = MemorySink::with_log();
    let mut sinks: BTreeMap<String, Box<dyn SinkPlugin>> = BTreeMap::new();
    sinks.insert("left_sink".to_string(), Box::new(left_sink));
    sinks.insert("right_sink".to_string(), Box::new(right_sink));
    sinks.insert("archive".to_string(), Box::new(archive_sink));

    let recorder = Arc::new(InMemoryRecorder::new());
    let stages = vec![stage(StagePlugin::Gate(Box::new(FanoutGate {
        labels: vec!["left".to_string(), "right".to_string()],
    })))];
    let report = run_pipeline(spec, source, stages, sinks, &recorder).expect("run");

    assert_eq!(report.outcomes.get(&RowOutcome::Routed), Some(&1));
    assert_eq!(left_log.lock().expect("left").len(), 1);
    assert_eq!(right_log.lock().expect("right").len(), 1);

    let events = recorder.routing_events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].routing_group_id, events[1].routing_group_id);
    let ordinals: Vec<u32> = events.iter().map(|event| event.ordinal).collect();
    assert_eq!(ordinals, vec![0, 1]);
    assert!(events.iter().all(|event| event.mode == RoutingMode::Copy));

    // Fork children share the group id and carry distinct branch names.
    let children: Vec<_> = recorder
        .tokens()
        .into_iter()
        .filter(|token| token.fork_group_id.is_some())
        .collect();
    assert_eq!(children.len(), 2);
    let branches: Vec<_> =
        children.iter().filter_map(|token| token.branch_name.clone()).collect();
    assert_eq!(branches, vec!["left".to_string(), "right".to_string()]);
}

// ============================================================================
// SECTION: Retries
// ============================================================================

#[test]
fn retryable_failures_record_one_state_per_attempt() {
    let spec = pipeline_spec(vec![transform_spec("flaky")], &["archive"], "archive");
    let source = ValueSource::new(vec![row(&[("id", json!(1))])]);
    let (archive_sink, archive_log) = MemorySink::with_log();
    let mut sinks: BTreeMap<String, Box<dyn SinkPlugin>> = BTreeMap::new();
    sinks.insert("archive".to_string(), Box::new(archive_sink));

    let flaky = FlakyTransform::new(2, TransformErrorCategory::TransientNetwork);
    let invocations = Arc::clone(&flaky.invocations);
    let recorder = Arc::new(InMemoryRecorder::new());
    let stages = vec![StageBinding {
        plugin: StagePlugin::Transform(Box::new(flaky)),
        on_error: RowErrorPolicy::Fail,
        retry: Some(RetrySettings {
            max_attempts: 3,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }),
        aggregation: None,
    }];
    let report = run_pipeline(spec, source, stages, sinks, &recorder).expect("run");

    assert_eq!(report.outcomes.get(&RowOutcome::Completed), Some(&1));
    assert_eq!(*invocations.lock().expect("count"), 3);
    assert_eq!(archive_log.lock().expect("archive").len(), 1);

    let transform_node = recorder
        .nodes()
        .into_iter()
        .find(|node| node.sequence_in_pipeline == Some(0))
        .expect("transform node");
    let transform_states: Vec<_> = recorder
        .node_states()
        .into_iter()
        .filter(|state| state.node_id == transform_node.node_id)
        .collect();
    assert_eq!(transform_states.len(), 3);
    let failed = transform_states
        .iter()
        .filter(|state| state.status == NodeStateStatus::Failed)
        .count();
    assert_eq!(failed, 2);
    let attempts: Vec<u32> = transform_states.iter().map(|state| state.attempt).collect();
    assert_eq!(attempts, vec![1, 2, 3]);
}

#[test]
fn non_retryable_failures_apply_the_row_policy_and_run_continues() {
    let spec = pipeline_spec(vec![transform_spec("flaky")], &["archive"], "archive");
    let source = ValueSource::new(vec![
        row(&[("id", json!(1))]),
        row(&[("id", json!(2))]),
    ]);
    let (archive_sink, archive_log) = MemorySink::with_log();
    let mut sinks: BTreeMap<String, Box<dyn SinkPlugin>> = BTreeMap::new();
    sinks.insert("archive".to_string(), Box::new(archive_sink));

    let recorder = Arc::new(InMemoryRecorder::new());
    let stages = vec![stage(StagePlugin::Transform(Box::new(FlakyTransform::new(
        1,
        TransformErrorCategory::Fatal,
    ))))];
    let report = run_pipeline(spec, source, stages, sinks, &recorder).expect("run");

    assert_eq!(report.outcomes.get(&RowOutcome::Failed), Some(&1));
    assert_eq!(report.outcomes.get(&RowOutcome::Completed), Some(&1));
    assert_eq!(archive_log.lock().expect("archive").len(), 1);
    let run = &recorder.runs()[0];
    assert_eq!(run.status, RunStatus::Completed);
}

// ============================================================================
// SECTION: Contract Violations
// ============================================================================

#[test]
fn fixed_contract_violation_routes_row_to_quarantine_sink() {
    let mut spec = pipeline_spec(
        vec![transform_spec("identity")],
        &["archive", "quarantine"],
        "archive",
    );
    spec.source.on_violation = RowErrorPolicy::Quarantine {
        sink: "quarantine".to_string(),
    };
    let contract = SchemaContract::fixed(vec![
        FieldContract::declared("id", FieldType::Integer, true).expect("id"),
        FieldContract::declared("amount", FieldType::Integer, true).expect("amount"),
    ])
    .expect("contract");
    let source = ValueSource::new(vec![
        row(&[("id", json!(1)), ("amount", json!(10))]),
        row(&[("id", json!(2)), ("amount", json!("nope"))]),
    ])
    .with_contract(contract);

    let (archive_sink, archive_log) = MemorySink::with_log();
    let (quarantine_sink, quarantine_log) = MemorySink::with_log();
    let mut sinks: BTreeMap<String, Box<dyn SinkPlugin>> = BTreeMap::new();
    sinks.insert("archive".to_string(), Box::new(archive_sink));
    sinks.insert("quarantine".to_string(), Box::new(quarantine_sink));

    let recorder = Arc::new(InMemoryRecorder::new());
    let stages = vec![stage(StagePlugin::Transform(Box::new(common::IdentityTransform)))];
    let report = run_pipeline(spec, source, stages, sinks, &recorder).expect("run");

    assert_eq!(report.outcomes.get(&RowOutcome::Completed), Some(&1));
    assert_eq!(report.outcomes.get(&RowOutcome::Quarantined), Some(&1));
    assert_eq!(archive_log.lock().expect("archive").len(), 1);
    assert_eq!(quarantine_log.lock().expect("quarantine").len(), 1);

    let errors = recorder.validation_errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].violation_type.as_deref(), Some("type_mismatch"));
    assert_eq!(errors[0].expected_type.as_deref(), Some("integer"));
    assert_eq!(errors[0].actual_type.as_deref(), Some("string"));
    assert_eq!(errors[0].destination, "quarantine");

    let run = &recorder.runs()[0];
    assert_eq!(run.status, RunStatus::Completed);

    // Downstream transforms inherit the source contract snapshot.
    let transform_node = recorder
        .nodes()
        .into_iter()
        .find(|node| node.sequence_in_pipeline == Some(0))
        .expect("transform node");
    assert!(transform_node.input_contract_json.is_some());
}

// ============================================================================
// SECTION: Run Liveness
// ============================================================================

#[test]
fn runs_terminate_even_when_every_row_fails() {
    let spec = pipeline_spec(vec![transform_spec("flaky")], &["archive"], "archive");
    let source = ValueSource::new(vec![
        row(&[("id", json!(1))]),
        row(&[("id", json!(2))]),
        row(&[("id", json!(3))]),
    ]);
    let (archive_sink, _archive_log) = MemorySink::with_log();
    let mut sinks: BTreeMap<String, Box<dyn SinkPlugin>> = BTreeMap::new();
    sinks.insert("archive".to_string(), Box::new(archive_sink));

    let recorder = Arc::new(InMemoryRecorder::new());
    let stages = vec![stage(StagePlugin::Transform(Box::new(FlakyTransform::new(
        100,
        TransformErrorCategory::Fatal,
    ))))];
    let report = run_pipeline(spec, source, stages, sinks, &recorder).expect("run");

    assert_eq!(report.outcomes.get(&RowOutcome::Failed), Some(&3));
    let run = &recorder.runs()[0];
    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.completed_at.is_some());
}

#[test]
fn abort_policy_fails_the_run_with_terminal_status() {
    let spec = pipeline_spec(vec![transform_spec("flaky")], &["archive"], "archive");
    let source = ValueSource::new(vec![row(&[("id", json!(1))])]);
    let (archive_sink, _archive_log) = MemorySink::with_log();
    let mut sinks: BTreeMap<String, Box<dyn SinkPlugin>> = BTreeMap::new();
    sinks.insert("archive".to_string(), Box::new(archive_sink));

    let recorder = Arc::new(InMemoryRecorder::new());
    let stages = vec![StageBinding {
        plugin: StagePlugin::Transform(Box::new(FlakyTransform::new(
            1,
            TransformErrorCategory::Fatal,
        ))),
        on_error: RowErrorPolicy::Abort,
        retry: None,
        aggregation: None,
    }];
    let result = run_pipeline(spec, source, stages, sinks, &recorder);

    assert!(result.is_err());
    let run = &recorder.runs()[0];
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.completed_at.is_some());
}

// ============================================================================
// SECTION: Expansion
// ============================================================================

#[test]
fn annotating_transform_output_reaches_the_output_sink() {
    let spec = pipeline_spec(vec![transform_spec("annotate")], &["archive"], "archive");
    let source = ValueSource::new(vec![row(&[("id", json!(1))])]);
    let (archive_sink, archive_log) = MemorySink::with_log();
    let mut sinks: BTreeMap<String, Box<dyn SinkPlugin>> = BTreeMap::new();
    sinks.insert("archive".to_string(), Box::new(archive_sink));

    let recorder = Arc::new(InMemoryRecorder::new());
    let stages = vec![stage(StagePlugin::Transform(Box::new(AnnotateTransform {
        field: "Marked By".to_string(),
        value: json!("annotate"),
    })))];
    run_pipeline(spec, source, stages, sinks, &recorder).expect("run");

    let written = archive_log.lock().expect("archive");
    assert_eq!(written.len(), 1);
    // Writes land under the normalized field name.
    assert_eq!(written[0].get("marked_by"), Some(&json!("annotate")));
    assert!(!written[0].contains_key("Marked By"));
}
