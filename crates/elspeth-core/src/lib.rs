// crates/elspeth-core/src/lib.rs
// ============================================================================
// Module: Elspeth Core Library
// Description: Public API surface for the Elspeth execution core.
// Purpose: Expose contracts, interfaces, graph, schema, and runtime helpers.
// Dependencies: crate::{contracts, graph, hashing, interfaces, pipeline, runtime, schema}
// ============================================================================

//! ## Overview
//! Elspeth core is a row-at-a-time data-processing engine with a
//! tamper-evident audit trail. A validated acyclic graph streams rows through
//! typed sources, transforms, gates, and aggregations while recording every
//! input, output, routing decision, and external call in a content-addressed
//! ledger suitable for compliance review and deterministic replay. The core
//! is backend-agnostic and integrates through explicit interfaces.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod contracts;
pub mod graph;
pub mod hashing;
pub mod interfaces;
pub mod pipeline;
pub mod runtime;
pub mod schema;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use contracts::*;

pub use graph::CONTINUE_LABEL;
pub use graph::ExecutionGraph;
pub use graph::GraphEdge;
pub use graph::GraphNode;
pub use graph::GraphValidationError;
pub use hashing::CANONICAL_VERSION;
pub use hashing::CanonicalError;
pub use hashing::canonical_json_bytes;
pub use hashing::content_hash;
pub use hashing::hash_bytes;
pub use interfaces::AggregationPlugin;
pub use interfaces::ArtifactDescriptor;
pub use interfaces::CallDraft;
pub use interfaces::Clock;
pub use interfaces::GatePlugin;
pub use interfaces::PayloadStore;
pub use interfaces::PayloadStoreError;
pub use interfaces::PluginContext;
pub use interfaces::PluginError;
pub use interfaces::Recorder;
pub use interfaces::RecorderError;
pub use interfaces::SinkPlugin;
pub use interfaces::SourcePlugin;
pub use interfaces::StagePlugin;
pub use interfaces::TransformPlugin;
pub use pipeline::AggregationOutputMode;
pub use pipeline::AggregationSettings;
pub use pipeline::BatchSettings;
pub use pipeline::PipelineSpec;
pub use pipeline::RetrySettings;
pub use pipeline::RouteTarget;
pub use pipeline::RowErrorPolicy;
pub use pipeline::RowPluginSpec;
pub use pipeline::SinkSpec;
pub use pipeline::SourceSpec;
pub use pipeline::StageKind;
pub use pipeline::TriggerSpec;
pub use runtime::AggregationExecutor;
pub use runtime::BatchWorkerPool;
pub use runtime::Comparison;
pub use runtime::evaluate_comparison;
pub use runtime::EngineError;
pub use runtime::InMemoryPayloadStore;
pub use runtime::InMemoryRecorder;
pub use runtime::ManualClock;
pub use runtime::Orchestrator;
pub use runtime::PipelineBindings;
pub use runtime::RunOptions;
pub use runtime::RunReport;
pub use runtime::RuntimeServices;
pub use runtime::StageBinding;
pub use schema::ContractViolation;
pub use schema::FieldContract;
pub use schema::FieldSource;
pub use schema::FieldType;
pub use schema::PipelineRow;
pub use schema::SchemaContract;
pub use schema::SchemaError;
pub use schema::SchemaMode;
pub use schema::normalize_field_name;
