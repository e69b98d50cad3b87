// crates/elspeth-plugins/tests/pipeline.rs
// ============================================================================
// Module: Reference Pipeline Tests
// Description: Configured pipelines end to end over the built-in plugins.
// ============================================================================
//! ## Overview
//! Loads TOML settings, lowers them to a specification, binds the built-in
//! plugins through the registry, and runs the orchestrator over the
//! in-memory ledger, asserting on routed sinks and recorded events.

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

use std::sync::Arc;

use elspeth_config::ElspethSettings;
use elspeth_core::ExecutionGraph;
use elspeth_core::IdGenerator;
use elspeth_core::InMemoryRecorder;
use elspeth_core::ManualClock;
use elspeth_core::Orchestrator;
use elspeth_core::Recorder;
use elspeth_core::RowOutcome;
use elspeth_core::RunOptions;
use elspeth_core::RunStatus;
use elspeth_core::RuntimeServices;
use elspeth_plugins::PluginRegistry;
use tempfile::TempDir;

fn services() -> RuntimeServices {
    RuntimeServices::new(Arc::new(ManualClock::starting_at(1_700_000_000_000)))
}

#[test]
fn configured_gate_routes_rows_to_their_sinks_only() {
    let dir = TempDir::new().expect("tempdir");
    let praise = dir.path().join("praise.jsonl");
    let review = dir.path().join("review.jsonl");
    let archive = dir.path().join("archive.jsonl");
    let toml = format!(
        r#"
output_sink = "archive"

[datasource]
plugin = "inline"

[datasource.options]
rows = [
    {{ id = 1, text = "love" }},
    {{ id = 2, text = "hate" }},
]

[[row_plugins]]
plugin = "condition_gate"
type = "gate"

[row_plugins.options]
rules = [
    {{ field = "text", comparison = "contains", value = "love", route = "positive" }},
    {{ field = "text", comparison = "contains", value = "hate", route = "negative" }},
]

[row_plugins.routes]
positive = "praise_sink"
negative = "review_sink"

[sinks.praise_sink]
plugin = "jsonl"

[sinks.praise_sink.options]
path = {praise:?}

[sinks.review_sink]
plugin = "jsonl"

[sinks.review_sink.options]
path = {review:?}

[sinks.archive]
plugin = "jsonl"

[sinks.archive.options]
path = {archive:?}
"#,
        praise = praise,
        review = review,
        archive = archive
    );

    let settings = ElspethSettings::from_toml(&toml).expect("settings");
    let spec = settings.to_pipeline_spec().expect("spec");
    let bindings = PluginRegistry::new().build_bindings(&spec).expect("bindings");
    let ids = Arc::new(IdGenerator::new());
    let graph = ExecutionGraph::from_spec(&spec, &ids).expect("graph");
    let recorder = Arc::new(InMemoryRecorder::new());

    let report = Orchestrator::new(
        graph,
        spec,
        bindings,
        Arc::clone(&recorder) as Arc<dyn Recorder>,
        None,
        services(),
        RunOptions::default(),
        ids,
    )
    .expect("orchestrator")
    .run()
    .expect("run");

    assert_eq!(report.rows, 2);
    assert_eq!(report.outcomes.get(&RowOutcome::Routed), Some(&2));

    let praise_lines = std::fs::read_to_string(&praise).expect("praise");
    let review_lines = std::fs::read_to_string(&review).expect("review");
    assert_eq!(praise_lines.lines().count(), 1);
    assert_eq!(review_lines.lines().count(), 1);
    assert!(praise_lines.contains("love"));
    assert!(review_lines.contains("hate"));
    assert!(!archive.exists(), "default sink stays empty");

    let events = recorder.routing_events();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|event| event.ordinal == 0));
    assert_ne!(events[0].state_id, events[1].state_id);
    assert!(events.iter().all(|event| event.reason_hash.is_some()));

    let run = &recorder.runs()[0];
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.reproducibility_grade.as_deref(), Some("exact"));
}

#[test]
fn rename_template_and_collect_compose_through_the_chain() {
    let dir = TempDir::new().expect("tempdir");
    let archive = dir.path().join("archive.jsonl");
    let toml = format!(
        r#"
output_sink = "archive"

[datasource]
plugin = "inline"

[datasource.options]
rows = [
    {{ "Customer Name" = "ada", id = 1 }},
    {{ "Customer Name" = "grace", id = 2 }},
    {{ "Customer Name" = "edsger", id = 3 }},
]

[[row_plugins]]
plugin = "rename"
type = "transform"

[row_plugins.options.mapping]
"Customer Name" = "customer"

[[row_plugins]]
plugin = "template"
type = "transform"

[row_plugins.options]
target = "summary"
template = "customer {{customer}} (row {{id}})"

[[row_plugins]]
plugin = "collect"
type = "aggregation"

[[aggregations]]
node = "collect"
output_mode = "passthrough"

[aggregations.trigger]
type = "count"
threshold = 2

[sinks.archive]
plugin = "jsonl"

[sinks.archive.options]
path = {archive:?}
"#,
        archive = archive
    );

    let settings = ElspethSettings::from_toml(&toml).expect("settings");
    let spec = settings.to_pipeline_spec().expect("spec");
    let bindings = PluginRegistry::new().build_bindings(&spec).expect("bindings");
    let ids = Arc::new(IdGenerator::new());
    let graph = ExecutionGraph::from_spec(&spec, &ids).expect("graph");
    let recorder = Arc::new(InMemoryRecorder::new());

    let report = Orchestrator::new(
        graph,
        spec,
        bindings,
        Arc::clone(&recorder) as Arc<dyn Recorder>,
        None,
        services(),
        RunOptions::default(),
        ids,
    )
    .expect("orchestrator")
    .run()
    .expect("run");

    assert_eq!(report.rows, 3);
    assert_eq!(report.outcomes.get(&RowOutcome::Completed), Some(&3));

    let lines = std::fs::read_to_string(&archive).expect("archive");
    assert_eq!(lines.lines().count(), 3);
    assert!(lines.contains("customer ada (row 1)"));
    assert!(lines.contains("\"customer\":\"ada\""));
    assert!(!lines.contains("Customer Name"));

    // One count-triggered batch plus the end-of-source tail.
    assert_eq!(recorder.batches().len(), 2);
}
