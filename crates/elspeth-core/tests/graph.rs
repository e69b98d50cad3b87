// crates/elspeth-core/tests/graph.rs
// ============================================================================
// Module: Execution Graph Tests
// Description: Verifies graph construction, validation, and scheduling.
// ============================================================================
//! ## Overview
//! Covers graph construction from specifications, label-space invariants,
//! topological scheduling, and the explicit identifier maps.

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

use std::sync::Arc;

use common::gate_spec;
use common::pipeline_spec;
use common::transform_spec;
use elspeth_core::CONTINUE_LABEL;
use elspeth_core::ExecutionGraph;
use elspeth_core::GraphValidationError;
use elspeth_core::IdGenerator;
use elspeth_core::NodeType;

fn ids() -> Arc<IdGenerator> {
    Arc::new(IdGenerator::new())
}

#[test]
fn linear_chain_builds_continue_edges_to_output_sink() {
    let spec = pipeline_spec(
        vec![transform_spec("identity"), transform_spec("annotate")],
        &["archive"],
        "archive",
    );
    let graph = ExecutionGraph::from_spec(&spec, &ids()).expect("graph");

    // source + 2 transforms + 1 sink
    assert_eq!(graph.get_nodes().len(), 4);
    assert_eq!(graph.get_edges().len(), 3);
    assert!(graph.get_edges().iter().all(|edge| edge.label == CONTINUE_LABEL));
}

#[test]
fn gate_routes_add_labelled_edges_to_sinks() {
    let spec = pipeline_spec(
        vec![gate_spec("keyword_gate", &[("positive", "praise"), ("negative", "review")])],
        &["archive", "praise", "review"],
        "archive",
    );
    let graph = ExecutionGraph::from_spec(&spec, &ids()).expect("graph");

    let gate_id = graph.get_transform_id_map().get(&0).expect("gate id").clone();
    let positive = graph.edge_by_label(&gate_id, "positive").expect("positive edge");
    let negative = graph.edge_by_label(&gate_id, "negative").expect("negative edge");
    let sink_map = graph.get_sink_id_map();
    assert_eq!(&positive.to, sink_map.get("praise").expect("praise sink"));
    assert_eq!(&negative.to, sink_map.get("review").expect("review sink"));
}

#[test]
fn route_targets_must_reference_defined_sinks() {
    let spec = pipeline_spec(
        vec![gate_spec("keyword_gate", &[("positive", "missing_sink")])],
        &["archive"],
        "archive",
    );
    let err = ExecutionGraph::from_spec(&spec, &ids()).expect_err("must fail");
    assert!(matches!(err, GraphValidationError::UnknownRouteTarget { .. }));
}

#[test]
fn unknown_output_sink_is_rejected() {
    let spec = pipeline_spec(vec![], &["archive"], "elsewhere");
    let err = ExecutionGraph::from_spec(&spec, &ids()).expect_err("must fail");
    assert!(matches!(err, GraphValidationError::UnknownOutputSink { .. }));
}

#[test]
fn duplicate_labels_per_source_node_are_rejected() {
    // A route named `continue` collides with the gate's chain edge.
    let spec = pipeline_spec(
        vec![gate_spec("keyword_gate", &[(CONTINUE_LABEL, "archive")])],
        &["archive"],
        "archive",
    );
    let err = ExecutionGraph::from_spec(&spec, &ids()).expect_err("must fail");
    assert!(matches!(err, GraphValidationError::DuplicateLabel { .. }));
}

#[test]
fn routes_on_non_gate_plugins_are_rejected() {
    let mut spec = pipeline_spec(vec![transform_spec("identity")], &["archive"], "archive");
    spec.row_plugins[0]
        .routes
        .insert("oops".to_string(), elspeth_core::RouteTarget::Sink("archive".to_string()));
    let err = ExecutionGraph::from_spec(&spec, &ids()).expect_err("must fail");
    assert!(matches!(err, GraphValidationError::RoutesOnNonGate { .. }));
}

#[test]
fn topological_order_starts_at_source_and_respects_chain() {
    let spec = pipeline_spec(
        vec![transform_spec("first"), transform_spec("second")],
        &["archive"],
        "archive",
    );
    let graph = ExecutionGraph::from_spec(&spec, &ids()).expect("graph");
    let order = graph.topological_order().expect("order");

    assert_eq!(&order[0], graph.get_source());
    let first = graph.get_transform_id_map().get(&0).expect("first").clone();
    let second = graph.get_transform_id_map().get(&1).expect("second").clone();
    fn position(order: &[elspeth_core::NodeId], id: &elspeth_core::NodeId) -> usize {
        order.iter().position(|node| node == id).expect("present")
    }
    assert!(position(&order, &first) < position(&order, &second));
    for sink in graph.get_sinks() {
        assert!(position(&order, &second) < position(&order, &sink));
    }
}

#[test]
fn node_ids_are_opaque_and_info_is_explicit() {
    let spec = pipeline_spec(vec![transform_spec("identity")], &["archive"], "archive");
    let graph = ExecutionGraph::from_spec(&spec, &ids()).expect("graph");

    let source = graph.get_node_info(graph.get_source()).expect("source info");
    assert_eq!(source.node_type, NodeType::Source);
    assert_eq!(source.plugin_name, "value_source");

    let transform_id = graph.get_transform_id_map().get(&0).expect("transform").clone();
    let transform = graph.get_node_info(&transform_id).expect("transform info");
    assert_eq!(transform.node_type, NodeType::Transform);
    assert_eq!(transform.sequence, Some(0));
}

#[test]
fn distinct_builds_generate_distinct_node_ids() {
    let spec = pipeline_spec(vec![transform_spec("identity")], &["archive"], "archive");
    let generator = ids();
    let first = ExecutionGraph::from_spec(&spec, &generator).expect("first");
    let second = ExecutionGraph::from_spec(&spec, &generator).expect("second");
    assert_ne!(first.get_source(), second.get_source());
}
