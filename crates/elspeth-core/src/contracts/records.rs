// crates/elspeth-core/src/contracts/records.rs
// ============================================================================
// Module: Elspeth Ledger Records
// Description: Strict domain records for every ledger table.
// Purpose: Carry decoded, enum-checked ledger rows across subsystem boundaries.
// Dependencies: crate::contracts::{enums, identifiers, time}, serde, serde_json
// ============================================================================

//! ## Overview
//! Repositories decode raw store rows into these records, enforcing enum
//! integrity on the way. Records are immutable snapshots; mutation happens
//! only through recorder write operations.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::contracts::enums::BatchStatus;
use crate::contracts::enums::CallStatus;
use crate::contracts::enums::CallType;
use crate::contracts::enums::Determinism;
use crate::contracts::enums::ExportStatus;
use crate::contracts::enums::NodeStateStatus;
use crate::contracts::enums::NodeType;
use crate::contracts::enums::RoutingMode;
use crate::contracts::enums::RunStatus;
use crate::contracts::identifiers::ArtifactId;
use crate::contracts::identifiers::BatchId;
use crate::contracts::identifiers::CheckpointId;
use crate::contracts::identifiers::EdgeId;
use crate::contracts::identifiers::NodeId;
use crate::contracts::identifiers::PayloadRef;
use crate::contracts::identifiers::RoutingGroupId;
use crate::contracts::identifiers::RowId;
use crate::contracts::identifiers::RunId;
use crate::contracts::identifiers::StateId;
use crate::contracts::identifiers::TokenId;
use crate::contracts::results::RowDataState;
use crate::contracts::time::Timestamp;

// ============================================================================
// SECTION: Run Record
// ============================================================================

/// One pipeline execution; owns all downstream ledger records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Run identifier.
    pub run_id: RunId,
    /// Run start time.
    pub started_at: Timestamp,
    /// Run completion time, absent while running.
    pub completed_at: Option<Timestamp>,
    /// Content hash of the resolved settings.
    pub config_hash: String,
    /// Resolved settings as canonical JSON.
    pub settings_json: Value,
    /// Canonical codec algorithm version.
    pub canonical_version: String,
    /// Run lifecycle status.
    pub status: RunStatus,
    /// Reproducibility grade derived at completion.
    pub reproducibility_grade: Option<String>,
    /// Source schema snapshot, when declared up front.
    pub source_schema_json: Option<Value>,
    /// Source field resolution map snapshot.
    pub source_field_resolution_json: Option<Value>,
    /// Locked schema contract snapshot.
    pub schema_contract_json: Option<Value>,
    /// Version hash of the locked schema contract.
    pub schema_contract_hash: Option<String>,
    /// Export lifecycle status.
    pub export_status: Option<ExportStatus>,
    /// Export failure detail.
    pub export_error: Option<String>,
    /// Export completion time.
    pub exported_at: Option<Timestamp>,
    /// Export format tag.
    pub export_format: Option<String>,
    /// Export sink name.
    pub export_sink: Option<String>,
}

// ============================================================================
// SECTION: Node and Edge Records
// ============================================================================

/// A plugin instance registered in one run.
///
/// # Invariants
/// - Nodes are created at registration and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Node identifier (unique within the run).
    pub node_id: NodeId,
    /// Owning run identifier.
    pub run_id: RunId,
    /// Plugin name as registered.
    pub plugin_name: String,
    /// Node type.
    pub node_type: NodeType,
    /// Plugin version string.
    pub plugin_version: String,
    /// Determinism class.
    pub determinism: Determinism,
    /// Content hash of the node configuration.
    pub config_hash: String,
    /// Node configuration as canonical JSON.
    pub config_json: Value,
    /// Optional schema hash for the node's declared shape.
    pub schema_hash: Option<String>,
    /// Position in the linear pipeline, absent for sinks.
    pub sequence_in_pipeline: Option<u32>,
    /// Registration time.
    pub registered_at: Timestamp,
    /// Schema mode tag, when the node declares one.
    pub schema_mode: Option<String>,
    /// Declared schema fields snapshot.
    pub schema_fields_json: Option<Value>,
    /// Input contract snapshot.
    pub input_contract_json: Option<Value>,
    /// Output contract snapshot.
    pub output_contract_json: Option<Value>,
}

/// A directed connection between two nodes in a run.
///
/// # Invariants
/// - `label` is unique per `(run_id, from_node_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRecord {
    /// Edge identifier.
    pub edge_id: EdgeId,
    /// Owning run identifier.
    pub run_id: RunId,
    /// Source node identifier.
    pub from_node_id: NodeId,
    /// Target node identifier.
    pub to_node_id: NodeId,
    /// Routing label such as `continue` or a gate route name.
    pub label: String,
    /// Default routing mode for the edge.
    pub default_mode: RoutingMode,
    /// Creation time.
    pub created_at: Timestamp,
}

// ============================================================================
// SECTION: Row and Token Records
// ============================================================================

/// An ingested source record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowRecord {
    /// Row identifier.
    pub row_id: RowId,
    /// Owning run identifier.
    pub run_id: RunId,
    /// Source node that emitted the row.
    pub source_node_id: NodeId,
    /// Zero-based row index in source order.
    pub row_index: u64,
    /// Content hash of the source payload.
    pub source_data_hash: String,
    /// Payload store reference, when a backend is configured.
    pub source_data_ref: Option<PayloadRef>,
    /// Creation time.
    pub created_at: Timestamp,
}

/// One instance of a row flowing a particular path.
///
/// # Invariants
/// - Tokens are immutable after creation; forks create child tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Token identifier.
    pub token_id: TokenId,
    /// Owning row identifier.
    pub row_id: RowId,
    /// Fork group shared by sibling copies.
    pub fork_group_id: Option<RoutingGroupId>,
    /// Join group shared by coalesced parents.
    pub join_group_id: Option<RoutingGroupId>,
    /// Expand group shared by multi-row transform outputs.
    pub expand_group_id: Option<RoutingGroupId>,
    /// Branch name assigned at a fork.
    pub branch_name: Option<String>,
    /// Pipeline step the token entered at.
    pub step_in_pipeline: Option<u32>,
    /// Creation time.
    pub created_at: Timestamp,
}

/// Parent linkage for a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenParentRecord {
    /// Child token identifier.
    pub token_id: TokenId,
    /// Parent token identifier.
    pub parent_token_id: TokenId,
    /// Parent ordinal for deterministic replay.
    pub ordinal: u32,
}

// ============================================================================
// SECTION: Node State Record
// ============================================================================

/// The atomic record of one node invocation on one token attempt.
///
/// # Invariants
/// - `status` transitions exactly once from `Open` to a terminal variant.
/// - `output_hash` is present only for completed states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStateRecord {
    /// State identifier.
    pub state_id: StateId,
    /// Token the invocation processed.
    pub token_id: TokenId,
    /// Node that was invoked.
    pub node_id: NodeId,
    /// Pipeline step index.
    pub step_index: u32,
    /// Attempt number, starting at 1.
    pub attempt: u32,
    /// Invocation status.
    pub status: NodeStateStatus,
    /// Content hash of the input payload.
    pub input_hash: String,
    /// Content hash of the output payload.
    pub output_hash: Option<String>,
    /// Invocation start time.
    pub started_at: Timestamp,
    /// Invocation completion time.
    pub completed_at: Option<Timestamp>,
    /// Invocation duration in milliseconds.
    pub duration_ms: Option<u64>,
    /// Structured failure detail for failed states.
    pub error_json: Option<Value>,
    /// Plugin context snapshot before invocation.
    pub context_before_json: Option<Value>,
    /// Plugin context snapshot after invocation.
    pub context_after_json: Option<Value>,
    /// Payload store reference for the input payload.
    pub input_data_ref: Option<PayloadRef>,
    /// Payload store reference for the output payload.
    pub output_data_ref: Option<PayloadRef>,
}

// ============================================================================
// SECTION: Call and Routing Records
// ============================================================================

/// An external request made inside a node state.
///
/// # Invariants
/// - `(state_id, call_index)` is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    /// Call identifier.
    pub call_id: String,
    /// Owning state identifier.
    pub state_id: StateId,
    /// Zero-based call index within the state.
    pub call_index: u32,
    /// Call type.
    pub call_type: CallType,
    /// Call outcome.
    pub status: CallStatus,
    /// Content hash of the request payload.
    pub request_hash: String,
    /// Payload store reference for the request payload.
    pub request_ref: Option<PayloadRef>,
    /// Content hash of the response payload.
    pub response_hash: Option<String>,
    /// Payload store reference for the response payload.
    pub response_ref: Option<PayloadRef>,
    /// Structured failure detail.
    pub error_json: Option<Value>,
    /// Call latency in milliseconds.
    pub latency_ms: Option<u64>,
    /// Creation time.
    pub created_at: Timestamp,
}

/// A recorded routing decision at a gate.
///
/// # Invariants
/// - Events of one dispatch share `routing_group_id` with ordinals `0..k`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingEventRecord {
    /// Event identifier.
    pub event_id: String,
    /// Owning state identifier.
    pub state_id: StateId,
    /// Edge the token was dispatched over.
    pub edge_id: EdgeId,
    /// Group shared by the events of one dispatch.
    pub routing_group_id: RoutingGroupId,
    /// Ordinal within the dispatch, preserving fork order.
    pub ordinal: u32,
    /// Routing mode for this event.
    pub mode: RoutingMode,
    /// Content hash of the recorded reason.
    pub reason_hash: Option<String>,
    /// Payload store reference for the recorded reason.
    pub reason_ref: Option<PayloadRef>,
    /// Creation time.
    pub created_at: Timestamp,
}

// ============================================================================
// SECTION: Batch Records
// ============================================================================

/// An aggregation batch bounded by a trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRecord {
    /// Batch identifier.
    pub batch_id: BatchId,
    /// Owning run identifier.
    pub run_id: RunId,
    /// Aggregation node that owns the batch.
    pub aggregation_node_id: NodeId,
    /// Attempt number, starting at 1.
    pub attempt: u32,
    /// Batch lifecycle status.
    pub status: BatchStatus,
    /// Node state that executed the flush.
    pub aggregation_state_id: Option<StateId>,
    /// Trigger reason recorded at flush.
    pub trigger_reason: Option<String>,
    /// Creation time.
    pub created_at: Timestamp,
    /// Completion time.
    pub completed_at: Option<Timestamp>,
}

/// A token consumed by a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchMemberRecord {
    /// Owning batch identifier.
    pub batch_id: BatchId,
    /// Consumed token identifier.
    pub token_id: TokenId,
    /// Consumption ordinal.
    pub ordinal: u32,
}

/// An output produced by a batch flush.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutputRecord {
    /// Owning batch identifier.
    pub batch_id: BatchId,
    /// Output kind tag (`token` or `artifact`).
    pub output_type: String,
    /// Identifier of the produced token or artifact.
    pub output_id: String,
}

// ============================================================================
// SECTION: Artifact Record
// ============================================================================

/// Sink output descriptor persisted in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Artifact identifier.
    pub artifact_id: ArtifactId,
    /// Owning run identifier.
    pub run_id: RunId,
    /// Node state that produced the artifact.
    pub produced_by_state_id: StateId,
    /// Sink node that wrote the artifact.
    pub sink_node_id: NodeId,
    /// Artifact type tag.
    pub artifact_type: String,
    /// Location of the artifact.
    pub path_or_uri: String,
    /// Content hash of the artifact bytes.
    pub content_hash: String,
    /// Artifact size in bytes.
    pub size_bytes: u64,
    /// Creation time.
    pub created_at: Timestamp,
}

// ============================================================================
// SECTION: Validation Error Record
// ============================================================================

/// A recorded schema validation failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationErrorRecord {
    /// Error identifier.
    pub error_id: String,
    /// Owning run identifier.
    pub run_id: RunId,
    /// Node the failure occurred at, when known.
    pub node_id: Option<NodeId>,
    /// Content hash of the offending row.
    pub row_hash: String,
    /// Offending row payload, when retained.
    pub row_data_json: Option<Value>,
    /// Failure description.
    pub error: String,
    /// Schema mode in effect.
    pub schema_mode: String,
    /// Destination applied by policy (sink name, `discarded`, or `aborted`).
    pub destination: String,
    /// Violation type tag.
    pub violation_type: Option<String>,
    /// Original field name involved in the violation.
    pub original_field_name: Option<String>,
    /// Normalized field name involved in the violation.
    pub normalized_field_name: Option<String>,
    /// Expected type for type mismatches.
    pub expected_type: Option<String>,
    /// Actual type for type mismatches.
    pub actual_type: Option<String>,
    /// Creation time.
    pub created_at: Timestamp,
}

// ============================================================================
// SECTION: Checkpoint Record
// ============================================================================

/// Crash-recovery snapshot at a row boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Checkpoint identifier.
    pub checkpoint_id: CheckpointId,
    /// Owning run identifier.
    pub run_id: RunId,
    /// Last token processed before the snapshot.
    pub token_id: TokenId,
    /// Node the token last completed.
    pub node_id: NodeId,
    /// Monotonic checkpoint sequence number.
    pub sequence_number: u64,
    /// Creation time.
    pub created_at: Option<Timestamp>,
    /// Serialized aggregation buffer state.
    pub aggregation_state_json: Option<Value>,
}

// ============================================================================
// SECTION: Row Lineage
// ============================================================================

/// Lineage view of one row assembled by the repository layer.
#[derive(Debug, Clone, PartialEq)]
pub struct RowLineage {
    /// The row record.
    pub row: RowRecord,
    /// Availability state of the source payload.
    pub data_state: RowDataState,
    /// True when payload bytes were retrievable.
    pub payload_available: bool,
    /// Decoded source payload, present only when available.
    pub source_data: Option<Value>,
    /// Tokens spawned from the row in creation order.
    pub tokens: Vec<TokenRecord>,
}
