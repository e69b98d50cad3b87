// crates/elspeth-core/src/pipeline.rs
// ============================================================================
// Module: Elspeth Pipeline Specification
// Description: Validated, backend-agnostic description of one pipeline.
// Purpose: Carry the configured topology from settings into the graph builder.
// Dependencies: crate::contracts, serde, serde_json
// ============================================================================

//! ## Overview
//! A pipeline specification names the source, the ordered row plugins with
//! their kinds and route maps, the sinks, and the default output sink. It is
//! the engine-internal form that configuration lowers into; the execution
//! graph is built from it and validated before any run begins.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::contracts::TriggerType;

// ============================================================================
// SECTION: Stage Kinds
// ============================================================================

/// Declared kind of a row plugin.
///
/// # Invariants
/// - Variants are stable for serialization and dispatch; there is no duck
///   typing anywhere in the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Row transform.
    Transform,
    /// Routing gate.
    Gate,
    /// Buffering aggregation.
    Aggregation,
}

// ============================================================================
// SECTION: Routing Targets
// ============================================================================

/// Target of a gate route label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteTarget {
    /// Continue down the default chain.
    Continue,
    /// Terminate at the named sink.
    Sink(String),
}

// ============================================================================
// SECTION: Error Policy
// ============================================================================

/// Policy applied when a row fails terminally at a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowErrorPolicy {
    /// Record the failure and terminate the row with a failed outcome.
    Fail,
    /// Drop the row without sinking.
    Discard,
    /// Route the row to a quarantine sink.
    Quarantine {
        /// Quarantine sink name.
        sink: String,
    },
    /// Abort the entire run.
    Abort,
}

impl Default for RowErrorPolicy {
    fn default() -> Self {
        Self::Fail
    }
}

// ============================================================================
// SECTION: Aggregation Settings
// ============================================================================

/// Output arity mode for an aggregation flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationOutputMode {
    /// Same arity in and out; one child token per output row.
    Passthrough,
    /// One reduced record; one child token per flush.
    Reduce,
}

/// Trigger configuration for an aggregation node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerSpec {
    /// Trigger type.
    pub trigger_type: TriggerType,
    /// Member count threshold for count triggers.
    pub threshold: Option<usize>,
    /// Wall-time budget in milliseconds for timeout triggers.
    pub timeout_ms: Option<u64>,
}

/// Aggregation binding for a row plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationSettings {
    /// Trigger configuration.
    pub trigger: TriggerSpec,
    /// Output arity mode.
    pub output_mode: AggregationOutputMode,
}

// ============================================================================
// SECTION: Retry and Batch Settings
// ============================================================================

/// Retry policy consumed by the engine for retryable plugin failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Maximum attempts including the first.
    pub max_attempts: u32,
    /// Initial backoff in milliseconds.
    pub initial_backoff_ms: u64,
    /// Backoff cap in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
        }
    }
}

/// Worker-pool configuration for batch-aware transforms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSettings {
    /// Worker pool size.
    pub pool_size: usize,
    /// Backpressure threshold for submitted, unfinished rows.
    pub max_pending: usize,
    /// Per-row timeout in milliseconds.
    pub row_timeout_ms: Option<u64>,
    /// Rate-limit service name acquired before each submission.
    pub service: Option<String>,
}

// ============================================================================
// SECTION: Pipeline Specification
// ============================================================================

/// Source binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Source plugin name.
    pub plugin: String,
    /// Plugin options, interpreted by the plugin.
    pub options: Value,
    /// Policy applied to rows that violate the source contract.
    #[serde(default)]
    pub on_violation: RowErrorPolicy,
}

/// One configured row plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowPluginSpec {
    /// Plugin name.
    pub plugin: String,
    /// Declared kind.
    pub kind: StageKind,
    /// Plugin options, interpreted by the plugin.
    pub options: Value,
    /// Gate route map, label to target.
    #[serde(default)]
    pub routes: BTreeMap<String, RouteTarget>,
    /// Aggregation binding, required when `kind` is aggregation.
    pub aggregation: Option<AggregationSettings>,
    /// Row error policy for this node.
    #[serde(default)]
    pub on_error: RowErrorPolicy,
    /// Retry policy override for this node.
    pub retry: Option<RetrySettings>,
    /// Batch-aware pool settings, when the plugin advertises batch awareness.
    pub batch: Option<BatchSettings>,
}

/// Sink binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkSpec {
    /// Sink plugin name.
    pub plugin: String,
    /// Plugin options, interpreted by the plugin.
    pub options: Value,
}

/// Complete pipeline specification.
///
/// # Invariants
/// - `output_sink` names an entry in `sinks`.
/// - Gate route targets name entries in `sinks`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSpec {
    /// Source binding.
    pub source: SourceSpec,
    /// Ordered row plugins.
    pub row_plugins: Vec<RowPluginSpec>,
    /// Named sinks.
    pub sinks: BTreeMap<String, SinkSpec>,
    /// Default output sink name.
    pub output_sink: String,
}
