// crates/elspeth-core/src/interfaces/mod.rs
// ============================================================================
// Module: Elspeth Interfaces
// Description: Backend-agnostic interfaces for plugins, recording, and storage.
// Purpose: Define the contract surfaces used by the Elspeth runtime.
// Dependencies: crate::{contracts, runtime, schema}
// ============================================================================

//! ## Overview
//! Interfaces define how the engine integrates with stores and plugins
//! without embedding backend-specific details. Implementations must be
//! deterministic where their determinism class claims so, and must fail
//! closed on missing or invalid data.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Value;
use thiserror::Error;

use crate::contracts::ArtifactRecord;
use crate::contracts::BatchId;
use crate::contracts::BatchRecord;
use crate::contracts::BatchStatus;
use crate::contracts::CallRecord;
use crate::contracts::CallStatus;
use crate::contracts::CallType;
use crate::contracts::CheckpointRecord;
use crate::contracts::Determinism;
use crate::contracts::EdgeId;
use crate::contracts::EdgeRecord;
use crate::contracts::ExportStatus;
use crate::contracts::GateResult;
use crate::contracts::NodeId;
use crate::contracts::NodeRecord;
use crate::contracts::NodeType;
use crate::contracts::PayloadRef;
use crate::contracts::RoutingGroupId;
use crate::contracts::RoutingMode;
use crate::contracts::RoutingReason;
use crate::contracts::RowData;
use crate::contracts::RowId;
use crate::contracts::RowRecord;
use crate::contracts::RunId;
use crate::contracts::RunRecord;
use crate::contracts::RunStatus;
use crate::contracts::StateId;
use crate::contracts::Timestamp;
use crate::contracts::TokenId;
use crate::contracts::TokenRecord;
use crate::contracts::TransformResult;
use crate::runtime::services::RuntimeServices;
use crate::schema::PipelineRow;
use crate::schema::SchemaContract;

// ============================================================================
// SECTION: Clock
// ============================================================================

/// Wall-clock seam; the engine never reads time directly.
pub trait Clock: Send + Sync {
    /// Returns the current timestamp.
    fn now(&self) -> Timestamp;
}

// ============================================================================
// SECTION: Plugin Errors
// ============================================================================

/// Errors raised by plugin implementations.
#[derive(Debug, Error)]
pub enum PluginError {
    /// Plugin reported a failure.
    #[error("plugin error: {0}")]
    Failed(String),
    /// Plugin I/O failure.
    #[error("plugin io error: {0}")]
    Io(String),
}

// ============================================================================
// SECTION: Plugin Context
// ============================================================================

/// Draft of an external call reported by a plugin.
///
/// The processor drains drafts after each invocation and persists them under
/// the invocation's node state.
#[derive(Debug, Clone, PartialEq)]
pub struct CallDraft {
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
}

/// Context handed to every plugin invocation.
///
/// Plugins reach shared services through this carrier; there are no
/// module-level singletons anywhere in the engine.
pub struct PluginContext<'a> {
    /// Owning run identifier.
    run_id: &'a RunId,
    /// Invoked node identifier.
    node_id: &'a NodeId,
    /// Shared runtime services.
    services: &'a RuntimeServices,
    /// External calls reported during the invocation.
    calls: Vec<CallDraft>,
}

impl<'a> PluginContext<'a> {
    /// Creates a context for one invocation.
    #[must_use]
    pub const fn new(
        run_id: &'a RunId,
        node_id: &'a NodeId,
        services: &'a RuntimeServices,
    ) -> Self {
        Self {
            run_id,
            node_id,
            services,
            calls: Vec::new(),
        }
    }

    /// Returns the owning run identifier.
    #[must_use]
    pub const fn run_id(&self) -> &RunId {
        self.run_id
    }

    /// Returns the invoked node identifier.
    #[must_use]
    pub const fn node_id(&self) -> &NodeId {
        self.node_id
    }

    /// Returns the shared runtime services.
    #[must_use]
    pub const fn services(&self) -> &RuntimeServices {
        self.services
    }

    /// Reports an external call made during the invocation.
    pub fn record_call(&mut self, call: CallDraft) {
        self.calls.push(call);
    }

    /// Drains the reported calls in submission order.
    #[must_use]
    pub fn take_calls(&mut self) -> Vec<CallDraft> {
        std::mem::take(&mut self.calls)
    }
}

// ============================================================================
// SECTION: Plugin Contracts
// ============================================================================

/// Sink output descriptor returned by sink writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDescriptor {
    /// Artifact type tag.
    pub artifact_type: String,
    /// Location of the artifact.
    pub path_or_uri: String,
    /// Content hash of the artifact bytes.
    pub content_hash: String,
    /// Artifact size in bytes.
    pub size_bytes: u64,
}

/// Row-emitting source plugin.
pub trait SourcePlugin: Send {
    /// Returns the plugin name.
    fn name(&self) -> &str;

    /// Returns the plugin version string.
    fn plugin_version(&self) -> &str;

    /// Returns the determinism class.
    fn determinism(&self) -> Determinism;

    /// Returns the declared schema contract, if any.
    fn schema_contract(&self) -> Option<SchemaContract> {
        None
    }

    /// Pulls the next row from the lazy, finite sequence.
    ///
    /// Returns `Ok(None)` when the source is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when the source fails; failures propagate.
    fn next_row(&mut self, ctx: &mut PluginContext<'_>) -> Result<Option<RowData>, PluginError>;

    /// Releases source resources.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when cleanup fails.
    fn close(&mut self) -> Result<(), PluginError> {
        Ok(())
    }
}

/// Row transform plugin.
pub trait TransformPlugin: Send {
    /// Returns the plugin name.
    fn name(&self) -> &str;

    /// Returns the plugin version string.
    fn plugin_version(&self) -> &str;

    /// Returns the determinism class.
    fn determinism(&self) -> Determinism;

    /// Returns the declared input contract, if any.
    fn input_schema(&self) -> Option<SchemaContract> {
        None
    }

    /// Returns the declared output contract, if any.
    fn output_schema(&self) -> Option<SchemaContract> {
        None
    }

    /// Returns true when the plugin runs a bounded worker pool internally.
    fn is_batch_aware(&self) -> bool {
        false
    }

    /// Processes one row.
    fn process(&mut self, row: PipelineRow, ctx: &mut PluginContext<'_>) -> TransformResult;

    /// Releases plugin resources.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when cleanup fails.
    fn close(&mut self) -> Result<(), PluginError> {
        Ok(())
    }
}

/// Routing gate plugin.
pub trait GatePlugin: Send {
    /// Returns the plugin name.
    fn name(&self) -> &str;

    /// Returns the plugin version string.
    fn plugin_version(&self) -> &str;

    /// Returns the determinism class.
    fn determinism(&self) -> Determinism;

    /// Evaluates one row into a routing decision.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when evaluation fails.
    fn evaluate(
        &mut self,
        row: PipelineRow,
        ctx: &mut PluginContext<'_>,
    ) -> Result<GateResult, PluginError>;

    /// Releases plugin resources.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when cleanup fails.
    fn close(&mut self) -> Result<(), PluginError> {
        Ok(())
    }
}

/// Buffering aggregation plugin.
pub trait AggregationPlugin: Send {
    /// Returns the plugin name.
    fn name(&self) -> &str;

    /// Returns the plugin version string.
    fn plugin_version(&self) -> &str;

    /// Returns the determinism class.
    fn determinism(&self) -> Determinism;

    /// Processes a flushed batch of rows.
    ///
    /// Passthrough plugins return `SuccessMulti` with the same arity;
    /// reduce plugins return `Success` with one record.
    fn process(&mut self, rows: Vec<PipelineRow>, ctx: &mut PluginContext<'_>) -> TransformResult;

    /// Releases plugin resources.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when cleanup fails.
    fn close(&mut self) -> Result<(), PluginError> {
        Ok(())
    }
}

/// Terminal sink plugin.
pub trait SinkPlugin: Send {
    /// Returns the plugin name.
    fn name(&self) -> &str;

    /// Returns the plugin version string.
    fn plugin_version(&self) -> &str;

    /// Writes rows and returns the artifact descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when the write fails.
    fn write(
        &mut self,
        rows: &[RowData],
        ctx: &mut PluginContext<'_>,
    ) -> Result<ArtifactDescriptor, PluginError>;

    /// Releases sink resources.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when cleanup fails.
    fn close(&mut self) -> Result<(), PluginError> {
        Ok(())
    }
}

/// Registered row-plugin instance dispatched by declared kind.
///
/// The processor's step routing is an exhaustive match over this sum type;
/// an unknown kind cannot be constructed.
pub enum StagePlugin {
    /// Row transform.
    Transform(Box<dyn TransformPlugin>),
    /// Routing gate.
    Gate(Box<dyn GatePlugin>),
    /// Buffering aggregation.
    Aggregation(Box<dyn AggregationPlugin>),
}

impl StagePlugin {
    /// Returns the plugin name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Transform(plugin) => plugin.name(),
            Self::Gate(plugin) => plugin.name(),
            Self::Aggregation(plugin) => plugin.name(),
        }
    }

    /// Returns the plugin version string.
    #[must_use]
    pub fn plugin_version(&self) -> &str {
        match self {
            Self::Transform(plugin) => plugin.plugin_version(),
            Self::Gate(plugin) => plugin.plugin_version(),
            Self::Aggregation(plugin) => plugin.plugin_version(),
        }
    }

    /// Returns the determinism class.
    #[must_use]
    pub fn determinism(&self) -> Determinism {
        match self {
            Self::Transform(plugin) => plugin.determinism(),
            Self::Gate(plugin) => plugin.determinism(),
            Self::Aggregation(plugin) => plugin.determinism(),
        }
    }

    /// Returns the declared input contract, if any.
    #[must_use]
    pub fn input_schema(&self) -> Option<SchemaContract> {
        match self {
            Self::Transform(plugin) => plugin.input_schema(),
            Self::Gate(_) | Self::Aggregation(_) => None,
        }
    }

    /// Returns the declared output contract, if any.
    #[must_use]
    pub fn output_schema(&self) -> Option<SchemaContract> {
        match self {
            Self::Transform(plugin) => plugin.output_schema(),
            Self::Gate(_) | Self::Aggregation(_) => None,
        }
    }

    /// Returns the node type this plugin registers as.
    #[must_use]
    pub const fn node_type(&self) -> NodeType {
        match self {
            Self::Transform(_) => NodeType::Transform,
            Self::Gate(_) => NodeType::Gate,
            Self::Aggregation(_) => NodeType::Aggregation,
        }
    }

    /// Releases plugin resources.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when cleanup fails.
    pub fn close(&mut self) -> Result<(), PluginError> {
        match self {
            Self::Transform(plugin) => plugin.close(),
            Self::Gate(plugin) => plugin.close(),
            Self::Aggregation(plugin) => plugin.close(),
        }
    }
}

// ============================================================================
// SECTION: Payload Store
// ============================================================================

/// Payload store errors.
#[derive(Debug, Error)]
pub enum PayloadStoreError {
    /// Payload existed but retention removed its bytes.
    #[error("payload purged: {reference}")]
    Purged {
        /// Purged payload reference.
        reference: PayloadRef,
    },
    /// No payload exists for the reference.
    #[error("payload not found: {reference}")]
    NotFound {
        /// Missing payload reference.
        reference: PayloadRef,
    },
    /// Backend failure.
    #[error("payload store backend error: {0}")]
    Backend(String),
}

/// Content-addressed blob storage.
///
/// # Invariants
/// - `store` is idempotent: the returned reference equals the content hash
///   of the bytes.
/// - `retrieve` returns exact bytes that hash to the reference, or fails
///   with a distinguishable purged or not-found error.
pub trait PayloadStore: Send + Sync {
    /// Stores bytes, returning their content-hash reference.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadStoreError::Backend`] when the write fails.
    fn store(&self, bytes: &[u8]) -> Result<PayloadRef, PayloadStoreError>;

    /// Retrieves the exact bytes behind a reference.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadStoreError::Purged`] or [`PayloadStoreError::NotFound`]
    /// as appropriate; never partial bytes.
    fn retrieve(&self, reference: &PayloadRef) -> Result<Vec<u8>, PayloadStoreError>;

    /// Returns true when bytes exist for the reference.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadStoreError::Backend`] when the check fails.
    fn exists(&self, reference: &PayloadRef) -> Result<bool, PayloadStoreError>;
}

// ============================================================================
// SECTION: Recorder Drafts
// ============================================================================

/// Parameters for beginning a run.
#[derive(Debug, Clone)]
pub struct RunStart {
    /// Resolved settings as JSON.
    pub settings_json: Value,
    /// Content hash of the resolved settings.
    pub config_hash: String,
    /// Canonical codec version.
    pub canonical_version: String,
    /// Declared schema contract, when locked up front.
    pub schema_contract: Option<SchemaContract>,
    /// Run start time.
    pub started_at: Timestamp,
}

/// Parameters for registering a node.
#[derive(Debug, Clone)]
pub struct NodeRegistration {
    /// Owning run identifier.
    pub run_id: RunId,
    /// Node identifier from the execution graph.
    pub node_id: NodeId,
    /// Plugin name.
    pub plugin_name: String,
    /// Node type.
    pub node_type: NodeType,
    /// Plugin version string.
    pub plugin_version: String,
    /// Determinism class.
    pub determinism: Determinism,
    /// Content hash of the node configuration.
    pub config_hash: String,
    /// Node configuration as JSON.
    pub config_json: Value,
    /// Position in the linear pipeline.
    pub sequence_in_pipeline: Option<u32>,
    /// Schema mode tag, when the node declares one.
    pub schema_mode: Option<String>,
    /// Input contract snapshot.
    pub input_contract: Option<SchemaContract>,
    /// Output contract snapshot.
    pub output_contract: Option<SchemaContract>,
    /// Registration time.
    pub registered_at: Timestamp,
}

/// Parameters for creating a token.
#[derive(Debug, Clone)]
pub struct TokenSpawn {
    /// Owning row identifier.
    pub row_id: RowId,
    /// Parent tokens in ordinal order; empty for source tokens.
    pub parents: Vec<TokenId>,
    /// Branch name assigned at a fork.
    pub branch_name: Option<String>,
    /// Fork group shared by sibling copies.
    pub fork_group_id: Option<RoutingGroupId>,
    /// Join group shared by coalesced parents.
    pub join_group_id: Option<RoutingGroupId>,
    /// Expand group shared by multi-row transform outputs.
    pub expand_group_id: Option<RoutingGroupId>,
    /// Pipeline step the token enters at.
    pub step_in_pipeline: Option<u32>,
    /// Creation time.
    pub created_at: Timestamp,
}

/// Parameters for opening a node state.
#[derive(Debug, Clone)]
pub struct NodeStateOpen {
    /// Token being processed.
    pub token_id: TokenId,
    /// Node being invoked.
    pub node_id: NodeId,
    /// Pipeline step index.
    pub step_index: u32,
    /// Attempt number, starting at 1.
    pub attempt: u32,
    /// Content hash of the input payload.
    pub input_hash: String,
    /// Payload store reference for the input payload.
    pub input_data_ref: Option<PayloadRef>,
    /// Plugin context snapshot before invocation.
    pub context_before: Option<Value>,
    /// Invocation start time.
    pub started_at: Timestamp,
}

/// Parameters for completing a node state.
#[derive(Debug, Clone)]
pub struct NodeStateCompletion {
    /// Content hash of the output payload.
    pub output_hash: Option<String>,
    /// Payload store reference for the output payload.
    pub output_data_ref: Option<PayloadRef>,
    /// Plugin context snapshot after invocation.
    pub context_after: Option<Value>,
    /// Completion time.
    pub completed_at: Timestamp,
    /// Invocation duration in milliseconds.
    pub duration_ms: u64,
}

/// One edge dispatch within a routing decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDispatch {
    /// Edge being traversed.
    pub edge_id: EdgeId,
    /// Routing mode for the traversal.
    pub mode: RoutingMode,
}

/// Parameters for a batch status transition.
#[derive(Debug, Clone, Default)]
pub struct BatchStatusUpdate {
    /// Trigger reason recorded at flush.
    pub trigger_reason: Option<String>,
    /// Node state that executed the flush.
    pub aggregation_state_id: Option<StateId>,
    /// Completion time for terminal transitions.
    pub completed_at: Option<Timestamp>,
}

/// Parameters for persisting a sink artifact.
#[derive(Debug, Clone)]
pub struct ArtifactDraft {
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

/// Parameters for recording a validation failure.
#[derive(Debug, Clone)]
pub struct ValidationErrorDraft {
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
    /// Destination applied by policy.
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

/// Parameters for an export status update.
#[derive(Debug, Clone, Default)]
pub struct ExportStatusUpdate {
    /// Export failure detail.
    pub error: Option<String>,
    /// Export format tag.
    pub format: Option<String>,
    /// Export sink name.
    pub sink: Option<String>,
    /// Export completion time.
    pub exported_at: Option<Timestamp>,
}

/// Parameters for persisting a checkpoint.
#[derive(Debug, Clone)]
pub struct CheckpointDraft {
    /// Owning run identifier.
    pub run_id: RunId,
    /// Last token processed before the snapshot.
    pub token_id: TokenId,
    /// Node the token last completed.
    pub node_id: NodeId,
    /// Monotonic checkpoint sequence number.
    pub sequence_number: u64,
    /// Serialized aggregation buffer state.
    pub aggregation_state_json: Option<Value>,
    /// Creation time.
    pub created_at: Timestamp,
}

// ============================================================================
// SECTION: Recorder
// ============================================================================

/// Recorder errors.
#[derive(Debug, Error)]
pub enum RecorderError {
    /// Underlying store failure.
    #[error("recorder store error: {0}")]
    Store(String),
    /// Write violated a ledger invariant.
    #[error("recorder invalid write: {0}")]
    Invalid(String),
    /// Write duplicated a unique key.
    #[error("recorder duplicate: {0}")]
    Duplicate(String),
    /// Write referenced a record that does not exist.
    #[error("recorder missing reference: {0}")]
    Missing(String),
}

/// Append-only write surface of the audit trail.
///
/// # Invariants
/// - A run must exist before any node, row, or token in that run; nodes are
///   registered before any state referencing them; states are opened before
///   any call or routing event.
/// - `complete_run` is idempotent within the same terminal status.
pub trait Recorder: Send + Sync {
    /// Begins a run.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the write fails.
    fn begin_run(&self, start: RunStart) -> Result<RunRecord, RecorderError>;

    /// Stores the locked schema contract after first-row inference.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the run is unknown or the write fails.
    fn update_run_contract(
        &self,
        run_id: &RunId,
        contract: &SchemaContract,
    ) -> Result<(), RecorderError>;

    /// Registers a node.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the write fails.
    fn register_node(&self, registration: NodeRegistration) -> Result<NodeRecord, RecorderError>;

    /// Registers an edge, rejecting duplicate `(from, label)` pairs.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::Duplicate`] on label collisions.
    fn register_edge(
        &self,
        run_id: &RunId,
        from: &NodeId,
        to: &NodeId,
        label: &str,
        mode: RoutingMode,
        created_at: Timestamp,
    ) -> Result<EdgeRecord, RecorderError>;

    /// Creates a row.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the write fails.
    fn create_row(
        &self,
        run_id: &RunId,
        source_node_id: &NodeId,
        row_index: u64,
        source_data_hash: &str,
        source_data_ref: Option<&PayloadRef>,
        created_at: Timestamp,
    ) -> Result<RowRecord, RecorderError>;

    /// Creates a token with optional parents and group identifiers.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the write fails.
    fn create_token(&self, spawn: TokenSpawn) -> Result<TokenRecord, RecorderError>;

    /// Opens a node state.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the write fails.
    fn begin_node_state(&self, open: NodeStateOpen) -> Result<StateId, RecorderError>;

    /// Completes an open node state.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::Invalid`] when the state is not open.
    fn complete_node_state(
        &self,
        state_id: &StateId,
        completion: NodeStateCompletion,
    ) -> Result<(), RecorderError>;

    /// Fails an open node state with structured error detail.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::Invalid`] when the state is not open.
    fn fail_node_state(
        &self,
        state_id: &StateId,
        error: &Value,
        completed_at: Timestamp,
        duration_ms: u64,
    ) -> Result<(), RecorderError>;

    /// Records an external call under a node state.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the write fails.
    fn record_call(
        &self,
        state_id: &StateId,
        call: CallDraft,
        created_at: Timestamp,
    ) -> Result<CallRecord, RecorderError>;

    /// Atomically records the routing events of one gate dispatch.
    ///
    /// Ordinals follow the slice order, `0..routes.len()`.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the write fails; no partial event set
    /// is persisted.
    fn record_routing_events(
        &self,
        state_id: &StateId,
        routing_group_id: &RoutingGroupId,
        routes: &[RouteDispatch],
        reason: Option<&RoutingReason>,
        created_at: Timestamp,
    ) -> Result<Vec<crate::contracts::RoutingEventRecord>, RecorderError>;

    /// Records a single routing event.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the write fails.
    fn record_routing_event(
        &self,
        state_id: &StateId,
        routing_group_id: &RoutingGroupId,
        route: RouteDispatch,
        reason: Option<&RoutingReason>,
        created_at: Timestamp,
    ) -> Result<crate::contracts::RoutingEventRecord, RecorderError> {
        let mut events =
            self.record_routing_events(state_id, routing_group_id, &[route], reason, created_at)?;
        events
            .pop()
            .ok_or_else(|| RecorderError::Store("routing event write returned nothing".to_string()))
    }

    /// Creates an open batch for an aggregation node.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the write fails.
    fn create_batch(
        &self,
        run_id: &RunId,
        aggregation_node_id: &NodeId,
        attempt: u32,
        created_at: Timestamp,
    ) -> Result<BatchRecord, RecorderError>;

    /// Transitions a batch's status.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::Invalid`] on illegal transitions.
    fn update_batch_status(
        &self,
        batch_id: &BatchId,
        status: BatchStatus,
        update: BatchStatusUpdate,
    ) -> Result<(), RecorderError>;

    /// Appends a member to an open batch.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the write fails.
    fn record_batch_member(
        &self,
        batch_id: &BatchId,
        token_id: &TokenId,
        ordinal: u32,
    ) -> Result<(), RecorderError>;

    /// Records an output produced by a batch flush.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the write fails.
    fn record_batch_output(
        &self,
        batch_id: &BatchId,
        output_type: &str,
        output_id: &str,
    ) -> Result<(), RecorderError>;

    /// Persists a sink artifact descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the write fails.
    fn record_artifact(&self, artifact: ArtifactDraft) -> Result<ArtifactRecord, RecorderError>;

    /// Records a schema validation failure.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the write fails.
    fn record_validation_error(&self, draft: ValidationErrorDraft) -> Result<(), RecorderError>;

    /// Updates the run's export status.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the run is unknown or the write fails.
    fn set_export_status(
        &self,
        run_id: &RunId,
        status: ExportStatus,
        update: ExportStatusUpdate,
    ) -> Result<(), RecorderError>;

    /// Completes a run with a terminal status.
    ///
    /// Idempotent within the same terminal status; re-emitting with a
    /// different status is a programming error surfaced as
    /// [`RecorderError::Invalid`].
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the write fails.
    fn complete_run(
        &self,
        run_id: &RunId,
        status: RunStatus,
        completed_at: Timestamp,
        reproducibility_grade: Option<String>,
    ) -> Result<(), RecorderError>;

    /// Persists a crash-recovery checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the write fails.
    fn save_checkpoint(&self, draft: CheckpointDraft) -> Result<CheckpointRecord, RecorderError>;
}
