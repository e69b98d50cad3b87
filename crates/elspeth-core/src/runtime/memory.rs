// crates/elspeth-core/src/runtime/memory.rs
// ============================================================================
// Module: Elspeth In-Memory Ledger
// Description: In-memory recorder and payload store for tests and examples.
// Purpose: Provide deterministic implementations without external deps.
// Dependencies: crate::{contracts, hashing, interfaces, schema}
// ============================================================================

//! ## Overview
//! This module provides in-memory implementations of [`Recorder`] and
//! [`PayloadStore`] for tests and local demos. They enforce the same write
//! invariants as the durable store: unique edge labels per source node,
//! single node-state transitions, idempotent run completion within one
//! terminal status, and append-only batch membership.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use serde_json::Value;

use crate::contracts::ArtifactId;
use crate::contracts::ArtifactRecord;
use crate::contracts::BatchId;
use crate::contracts::BatchMemberRecord;
use crate::contracts::BatchOutputRecord;
use crate::contracts::BatchRecord;
use crate::contracts::BatchStatus;
use crate::contracts::CallRecord;
use crate::contracts::CheckpointId;
use crate::contracts::CheckpointRecord;
use crate::contracts::EdgeId;
use crate::contracts::EdgeRecord;
use crate::contracts::ExportStatus;
use crate::contracts::NodeId;
use crate::contracts::NodeRecord;
use crate::contracts::NodeStateRecord;
use crate::contracts::NodeStateStatus;
use crate::contracts::PayloadRef;
use crate::contracts::RoutingEventRecord;
use crate::contracts::RoutingGroupId;
use crate::contracts::RoutingMode;
use crate::contracts::RoutingReason;
use crate::contracts::RowId;
use crate::contracts::RowRecord;
use crate::contracts::RunId;
use crate::contracts::RunRecord;
use crate::contracts::RunStatus;
use crate::contracts::StateId;
use crate::contracts::Timestamp;
use crate::contracts::TokenId;
use crate::contracts::TokenParentRecord;
use crate::contracts::TokenRecord;
use crate::contracts::ValidationErrorRecord;
use crate::hashing::content_hash;
use crate::hashing::hash_bytes;
use crate::interfaces::ArtifactDraft;
use crate::interfaces::BatchStatusUpdate;
use crate::interfaces::CallDraft;
use crate::interfaces::CheckpointDraft;
use crate::interfaces::ExportStatusUpdate;
use crate::interfaces::NodeRegistration;
use crate::interfaces::NodeStateCompletion;
use crate::interfaces::NodeStateOpen;
use crate::interfaces::PayloadStore;
use crate::interfaces::PayloadStoreError;
use crate::interfaces::Recorder;
use crate::interfaces::RecorderError;
use crate::interfaces::RouteDispatch;
use crate::interfaces::RunStart;
use crate::interfaces::TokenSpawn;
use crate::interfaces::ValidationErrorDraft;
use crate::schema::SchemaContract;

// ============================================================================
// SECTION: Lock Helper
// ============================================================================

/// Locks a mutex, recovering the inner value on poisoning.
fn lock_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// SECTION: Ledger State
// ============================================================================

/// Append-only in-memory ledger tables.
#[derive(Debug, Default)]
struct Ledger {
    /// Run records.
    runs: Vec<RunRecord>,
    /// Node records.
    nodes: Vec<NodeRecord>,
    /// Edge records.
    edges: Vec<EdgeRecord>,
    /// Row records.
    rows: Vec<RowRecord>,
    /// Token records.
    tokens: Vec<TokenRecord>,
    /// Token parent linkage.
    token_parents: Vec<TokenParentRecord>,
    /// Node state records.
    node_states: Vec<NodeStateRecord>,
    /// Call records.
    calls: Vec<CallRecord>,
    /// Routing event records.
    routing_events: Vec<RoutingEventRecord>,
    /// Batch records.
    batches: Vec<BatchRecord>,
    /// Batch member records.
    batch_members: Vec<BatchMemberRecord>,
    /// Batch output records.
    batch_outputs: Vec<BatchOutputRecord>,
    /// Artifact records.
    artifacts: Vec<ArtifactRecord>,
    /// Validation error records.
    validation_errors: Vec<ValidationErrorRecord>,
    /// Checkpoint records.
    checkpoints: Vec<CheckpointRecord>,
    /// Monotonic identifier counter.
    counter: u64,
}

impl Ledger {
    /// Returns the next identifier with the given prefix.
    fn next_id(&mut self, prefix: &str) -> String {
        self.counter += 1;
        format!("{prefix}-{}", self.counter)
    }
}

// ============================================================================
// SECTION: In-Memory Recorder
// ============================================================================

/// In-memory [`Recorder`] for tests and examples.
#[derive(Debug, Default)]
pub struct InMemoryRecorder {
    /// Guarded ledger tables.
    ledger: Mutex<Ledger>,
}

impl InMemoryRecorder {
    /// Creates an empty in-memory recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the run records.
    #[must_use]
    pub fn runs(&self) -> Vec<RunRecord> {
        lock_recover(&self.ledger).runs.clone()
    }

    /// Returns the node records.
    #[must_use]
    pub fn nodes(&self) -> Vec<NodeRecord> {
        lock_recover(&self.ledger).nodes.clone()
    }

    /// Returns the edge records.
    #[must_use]
    pub fn edges(&self) -> Vec<EdgeRecord> {
        lock_recover(&self.ledger).edges.clone()
    }

    /// Returns the row records.
    #[must_use]
    pub fn rows(&self) -> Vec<RowRecord> {
        lock_recover(&self.ledger).rows.clone()
    }

    /// Returns the token records.
    #[must_use]
    pub fn tokens(&self) -> Vec<TokenRecord> {
        lock_recover(&self.ledger).tokens.clone()
    }

    /// Returns the token parent linkage records.
    #[must_use]
    pub fn token_parents(&self) -> Vec<TokenParentRecord> {
        lock_recover(&self.ledger).token_parents.clone()
    }

    /// Returns the node state records.
    #[must_use]
    pub fn node_states(&self) -> Vec<NodeStateRecord> {
        lock_recover(&self.ledger).node_states.clone()
    }

    /// Returns the call records.
    #[must_use]
    pub fn calls(&self) -> Vec<CallRecord> {
        lock_recover(&self.ledger).calls.clone()
    }

    /// Returns the routing event records.
    #[must_use]
    pub fn routing_events(&self) -> Vec<RoutingEventRecord> {
        lock_recover(&self.ledger).routing_events.clone()
    }

    /// Returns the batch records.
    #[must_use]
    pub fn batches(&self) -> Vec<BatchRecord> {
        lock_recover(&self.ledger).batches.clone()
    }

    /// Returns the batch member records.
    #[must_use]
    pub fn batch_members(&self) -> Vec<BatchMemberRecord> {
        lock_recover(&self.ledger).batch_members.clone()
    }

    /// Returns the batch output records.
    #[must_use]
    pub fn batch_outputs(&self) -> Vec<BatchOutputRecord> {
        lock_recover(&self.ledger).batch_outputs.clone()
    }

    /// Returns the artifact records.
    #[must_use]
    pub fn artifacts(&self) -> Vec<ArtifactRecord> {
        lock_recover(&self.ledger).artifacts.clone()
    }

    /// Returns the validation error records.
    #[must_use]
    pub fn validation_errors(&self) -> Vec<ValidationErrorRecord> {
        lock_recover(&self.ledger).validation_errors.clone()
    }

    /// Returns the checkpoint records.
    #[must_use]
    pub fn checkpoints(&self) -> Vec<CheckpointRecord> {
        lock_recover(&self.ledger).checkpoints.clone()
    }
}

impl Recorder for InMemoryRecorder {
    fn begin_run(&self, start: RunStart) -> Result<RunRecord, RecorderError> {
        let contract_json = match &start.schema_contract {
            Some(contract) => Some(
                contract.to_json().map_err(|err| RecorderError::Invalid(err.to_string()))?,
            ),
            None => None,
        };
        let contract_hash = match &start.schema_contract {
            Some(contract) => Some(
                contract.version_hash().map_err(|err| RecorderError::Invalid(err.to_string()))?,
            ),
            None => None,
        };
        let mut ledger = lock_recover(&self.ledger);
        let run_id = RunId::new(ledger.next_id("run"));
        let record = RunRecord {
            run_id,
            started_at: start.started_at,
            completed_at: None,
            config_hash: start.config_hash,
            settings_json: start.settings_json,
            canonical_version: start.canonical_version,
            status: RunStatus::Running,
            reproducibility_grade: None,
            source_schema_json: contract_json.clone(),
            source_field_resolution_json: None,
            schema_contract_json: contract_json,
            schema_contract_hash: contract_hash,
            export_status: None,
            export_error: None,
            exported_at: None,
            export_format: None,
            export_sink: None,
        };
        ledger.runs.push(record.clone());
        Ok(record)
    }

    fn update_run_contract(
        &self,
        run_id: &RunId,
        contract: &SchemaContract,
    ) -> Result<(), RecorderError> {
        let contract_json =
            contract.to_json().map_err(|err| RecorderError::Invalid(err.to_string()))?;
        let contract_hash =
            contract.version_hash().map_err(|err| RecorderError::Invalid(err.to_string()))?;
        let resolution = serde_json::to_value(contract.field_resolution())
            .map_err(|err| RecorderError::Invalid(err.to_string()))?;
        let mut ledger = lock_recover(&self.ledger);
        let Some(run) = ledger.runs.iter_mut().find(|run| &run.run_id == run_id) else {
            return Err(RecorderError::Missing(format!("run {run_id} is not registered")));
        };
        run.schema_contract_json = Some(contract_json);
        run.schema_contract_hash = Some(contract_hash);
        run.source_field_resolution_json = Some(resolution);
        Ok(())
    }

    fn register_node(&self, registration: NodeRegistration) -> Result<NodeRecord, RecorderError> {
        let input_contract_json = match &registration.input_contract {
            Some(contract) => Some(
                contract.to_json().map_err(|err| RecorderError::Invalid(err.to_string()))?,
            ),
            None => None,
        };
        let output_contract_json = match &registration.output_contract {
            Some(contract) => Some(
                contract.to_json().map_err(|err| RecorderError::Invalid(err.to_string()))?,
            ),
            None => None,
        };
        let mut ledger = lock_recover(&self.ledger);
        if !ledger.runs.iter().any(|run| run.run_id == registration.run_id) {
            return Err(RecorderError::Missing(format!(
                "run {} is not registered",
                registration.run_id
            )));
        }
        if ledger
            .nodes
            .iter()
            .any(|node| node.run_id == registration.run_id && node.node_id == registration.node_id)
        {
            return Err(RecorderError::Duplicate(format!(
                "node {} already registered",
                registration.node_id
            )));
        }
        let record = NodeRecord {
            node_id: registration.node_id,
            run_id: registration.run_id,
            plugin_name: registration.plugin_name,
            node_type: registration.node_type,
            plugin_version: registration.plugin_version,
            determinism: registration.determinism,
            config_hash: registration.config_hash,
            config_json: registration.config_json,
            schema_hash: None,
            sequence_in_pipeline: registration.sequence_in_pipeline,
            registered_at: registration.registered_at,
            schema_mode: registration.schema_mode,
            schema_fields_json: None,
            input_contract_json,
            output_contract_json,
        };
        ledger.nodes.push(record.clone());
        Ok(record)
    }

    fn register_edge(
        &self,
        run_id: &RunId,
        from: &NodeId,
        to: &NodeId,
        label: &str,
        mode: RoutingMode,
        created_at: Timestamp,
    ) -> Result<EdgeRecord, RecorderError> {
        let mut ledger = lock_recover(&self.ledger);
        let duplicate = ledger.edges.iter().any(|edge| {
            &edge.run_id == run_id && &edge.from_node_id == from && edge.label == label
        });
        if duplicate {
            return Err(RecorderError::Duplicate(format!(
                "edge label {label} already exists out of {from}"
            )));
        }
        let edge_id = EdgeId::new(ledger.next_id("edge"));
        let record = EdgeRecord {
            edge_id,
            run_id: run_id.clone(),
            from_node_id: from.clone(),
            to_node_id: to.clone(),
            label: label.to_string(),
            default_mode: mode,
            created_at,
        };
        ledger.edges.push(record.clone());
        Ok(record)
    }

    fn create_row(
        &self,
        run_id: &RunId,
        source_node_id: &NodeId,
        row_index: u64,
        source_data_hash: &str,
        source_data_ref: Option<&PayloadRef>,
        created_at: Timestamp,
    ) -> Result<RowRecord, RecorderError> {
        let mut ledger = lock_recover(&self.ledger);
        if !ledger.runs.iter().any(|run| &run.run_id == run_id) {
            return Err(RecorderError::Missing(format!("run {run_id} is not registered")));
        }
        let row_id = RowId::new(ledger.next_id("row"));
        let record = RowRecord {
            row_id,
            run_id: run_id.clone(),
            source_node_id: source_node_id.clone(),
            row_index,
            source_data_hash: source_data_hash.to_string(),
            source_data_ref: source_data_ref.cloned(),
            created_at,
        };
        ledger.rows.push(record.clone());
        Ok(record)
    }

    fn create_token(&self, spawn: TokenSpawn) -> Result<TokenRecord, RecorderError> {
        let mut ledger = lock_recover(&self.ledger);
        if !ledger.rows.iter().any(|row| row.row_id == spawn.row_id) {
            return Err(RecorderError::Missing(format!("row {} is not registered", spawn.row_id)));
        }
        let token_id = TokenId::new(ledger.next_id("token"));
        for (ordinal, parent) in spawn.parents.iter().enumerate() {
            if !ledger.tokens.iter().any(|token| &token.token_id == parent) {
                return Err(RecorderError::Missing(format!("parent token {parent} is unknown")));
            }
            ledger.token_parents.push(TokenParentRecord {
                token_id: token_id.clone(),
                parent_token_id: parent.clone(),
                ordinal: u32::try_from(ordinal).map_or(u32::MAX, |value| value),
            });
        }
        let record = TokenRecord {
            token_id,
            row_id: spawn.row_id,
            fork_group_id: spawn.fork_group_id,
            join_group_id: spawn.join_group_id,
            expand_group_id: spawn.expand_group_id,
            branch_name: spawn.branch_name,
            step_in_pipeline: spawn.step_in_pipeline,
            created_at: spawn.created_at,
        };
        ledger.tokens.push(record.clone());
        Ok(record)
    }

    fn begin_node_state(&self, open: NodeStateOpen) -> Result<StateId, RecorderError> {
        let mut ledger = lock_recover(&self.ledger);
        if !ledger.tokens.iter().any(|token| token.token_id == open.token_id) {
            return Err(RecorderError::Missing(format!(
                "token {} is not registered",
                open.token_id
            )));
        }
        if !ledger.nodes.iter().any(|node| node.node_id == open.node_id) {
            return Err(RecorderError::Missing(format!(
                "node {} is not registered",
                open.node_id
            )));
        }
        let state_id = StateId::new(ledger.next_id("state"));
        ledger.node_states.push(NodeStateRecord {
            state_id: state_id.clone(),
            token_id: open.token_id,
            node_id: open.node_id,
            step_index: open.step_index,
            attempt: open.attempt,
            status: NodeStateStatus::Open,
            input_hash: open.input_hash,
            output_hash: None,
            started_at: open.started_at,
            completed_at: None,
            duration_ms: None,
            error_json: None,
            context_before_json: open.context_before,
            context_after_json: None,
            input_data_ref: open.input_data_ref,
            output_data_ref: None,
        });
        Ok(state_id)
    }

    fn complete_node_state(
        &self,
        state_id: &StateId,
        completion: NodeStateCompletion,
    ) -> Result<(), RecorderError> {
        let mut ledger = lock_recover(&self.ledger);
        let Some(state) =
            ledger.node_states.iter_mut().find(|state| &state.state_id == state_id)
        else {
            return Err(RecorderError::Missing(format!("state {state_id} is unknown")));
        };
        if state.status != NodeStateStatus::Open {
            return Err(RecorderError::Invalid(format!(
                "state {state_id} already transitioned to {}",
                state.status.as_str()
            )));
        }
        state.status = NodeStateStatus::Completed;
        state.output_hash = completion.output_hash;
        state.output_data_ref = completion.output_data_ref;
        state.context_after_json = completion.context_after;
        state.completed_at = Some(completion.completed_at);
        state.duration_ms = Some(completion.duration_ms);
        Ok(())
    }

    fn fail_node_state(
        &self,
        state_id: &StateId,
        error: &Value,
        completed_at: Timestamp,
        duration_ms: u64,
    ) -> Result<(), RecorderError> {
        let mut ledger = lock_recover(&self.ledger);
        let Some(state) =
            ledger.node_states.iter_mut().find(|state| &state.state_id == state_id)
        else {
            return Err(RecorderError::Missing(format!("state {state_id} is unknown")));
        };
        if state.status != NodeStateStatus::Open {
            return Err(RecorderError::Invalid(format!(
                "state {state_id} already transitioned to {}",
                state.status.as_str()
            )));
        }
        state.status = NodeStateStatus::Failed;
        state.error_json = Some(error.clone());
        state.completed_at = Some(completed_at);
        state.duration_ms = Some(duration_ms);
        Ok(())
    }

    fn record_call(
        &self,
        state_id: &StateId,
        call: CallDraft,
        created_at: Timestamp,
    ) -> Result<CallRecord, RecorderError> {
        let mut ledger = lock_recover(&self.ledger);
        if !ledger.node_states.iter().any(|state| &state.state_id == state_id) {
            return Err(RecorderError::Missing(format!("state {state_id} is unknown")));
        }
        let call_index = u32::try_from(
            ledger.calls.iter().filter(|existing| &existing.state_id == state_id).count(),
        )
        .map_or(u32::MAX, |value| value);
        let call_id = ledger.next_id("call");
        let record = CallRecord {
            call_id,
            state_id: state_id.clone(),
            call_index,
            call_type: call.call_type,
            status: call.status,
            request_hash: call.request_hash,
            request_ref: call.request_ref,
            response_hash: call.response_hash,
            response_ref: call.response_ref,
            error_json: call.error_json,
            latency_ms: call.latency_ms,
            created_at,
        };
        ledger.calls.push(record.clone());
        Ok(record)
    }

    fn record_routing_events(
        &self,
        state_id: &StateId,
        routing_group_id: &RoutingGroupId,
        routes: &[RouteDispatch],
        reason: Option<&RoutingReason>,
        created_at: Timestamp,
    ) -> Result<Vec<RoutingEventRecord>, RecorderError> {
        let reason_hash = match reason {
            Some(reason) => Some(
                content_hash(reason).map_err(|err| RecorderError::Invalid(err.to_string()))?,
            ),
            None => None,
        };
        let mut ledger = lock_recover(&self.ledger);
        if !ledger.node_states.iter().any(|state| &state.state_id == state_id) {
            return Err(RecorderError::Missing(format!("state {state_id} is unknown")));
        }
        for route in routes {
            if !ledger.edges.iter().any(|edge| edge.edge_id == route.edge_id) {
                return Err(RecorderError::Missing(format!(
                    "edge {} is unknown",
                    route.edge_id
                )));
            }
        }
        let mut records = Vec::with_capacity(routes.len());
        for (ordinal, route) in routes.iter().enumerate() {
            let event_id = ledger.next_id("revent");
            records.push(RoutingEventRecord {
                event_id,
                state_id: state_id.clone(),
                edge_id: route.edge_id.clone(),
                routing_group_id: routing_group_id.clone(),
                ordinal: u32::try_from(ordinal).map_or(u32::MAX, |value| value),
                mode: route.mode,
                reason_hash: reason_hash.clone(),
                reason_ref: None,
                created_at,
            });
        }
        ledger.routing_events.extend(records.iter().cloned());
        Ok(records)
    }

    fn create_batch(
        &self,
        run_id: &RunId,
        aggregation_node_id: &NodeId,
        attempt: u32,
        created_at: Timestamp,
    ) -> Result<BatchRecord, RecorderError> {
        let mut ledger = lock_recover(&self.ledger);
        let batch_id = BatchId::new(ledger.next_id("batch"));
        let record = BatchRecord {
            batch_id,
            run_id: run_id.clone(),
            aggregation_node_id: aggregation_node_id.clone(),
            attempt,
            status: BatchStatus::Open,
            aggregation_state_id: None,
            trigger_reason: None,
            created_at,
            completed_at: None,
        };
        ledger.batches.push(record.clone());
        Ok(record)
    }

    fn update_batch_status(
        &self,
        batch_id: &BatchId,
        status: BatchStatus,
        update: BatchStatusUpdate,
    ) -> Result<(), RecorderError> {
        let mut ledger = lock_recover(&self.ledger);
        let Some(batch) = ledger.batches.iter_mut().find(|batch| &batch.batch_id == batch_id)
        else {
            return Err(RecorderError::Missing(format!("batch {batch_id} is unknown")));
        };
        let legal = matches!(
            (batch.status, status),
            (BatchStatus::Open, BatchStatus::Triggered | BatchStatus::Executing)
                | (BatchStatus::Triggered, BatchStatus::Executing)
                | (BatchStatus::Executing, BatchStatus::Completed | BatchStatus::Failed)
        );
        if !legal {
            return Err(RecorderError::Invalid(format!(
                "batch {batch_id} cannot transition {} -> {}",
                batch.status.as_str(),
                status.as_str()
            )));
        }
        batch.status = status;
        if update.trigger_reason.is_some() {
            batch.trigger_reason = update.trigger_reason;
        }
        if update.aggregation_state_id.is_some() {
            batch.aggregation_state_id = update.aggregation_state_id;
        }
        if update.completed_at.is_some() {
            batch.completed_at = update.completed_at;
        }
        Ok(())
    }

    fn record_batch_member(
        &self,
        batch_id: &BatchId,
        token_id: &TokenId,
        ordinal: u32,
    ) -> Result<(), RecorderError> {
        let mut ledger = lock_recover(&self.ledger);
        let Some(batch) = ledger.batches.iter().find(|batch| &batch.batch_id == batch_id) else {
            return Err(RecorderError::Missing(format!("batch {batch_id} is unknown")));
        };
        if batch.status != BatchStatus::Open {
            return Err(RecorderError::Invalid(format!(
                "batch {batch_id} is {} and no longer accepts members",
                batch.status.as_str()
            )));
        }
        ledger.batch_members.push(BatchMemberRecord {
            batch_id: batch_id.clone(),
            token_id: token_id.clone(),
            ordinal,
        });
        Ok(())
    }

    fn record_batch_output(
        &self,
        batch_id: &BatchId,
        output_type: &str,
        output_id: &str,
    ) -> Result<(), RecorderError> {
        let mut ledger = lock_recover(&self.ledger);
        if !ledger.batches.iter().any(|batch| &batch.batch_id == batch_id) {
            return Err(RecorderError::Missing(format!("batch {batch_id} is unknown")));
        }
        ledger.batch_outputs.push(BatchOutputRecord {
            batch_id: batch_id.clone(),
            output_type: output_type.to_string(),
            output_id: output_id.to_string(),
        });
        Ok(())
    }

    fn record_artifact(&self, artifact: ArtifactDraft) -> Result<ArtifactRecord, RecorderError> {
        let mut ledger = lock_recover(&self.ledger);
        let artifact_id = ArtifactId::new(ledger.next_id("artifact"));
        let record = ArtifactRecord {
            artifact_id,
            run_id: artifact.run_id,
            produced_by_state_id: artifact.produced_by_state_id,
            sink_node_id: artifact.sink_node_id,
            artifact_type: artifact.artifact_type,
            path_or_uri: artifact.path_or_uri,
            content_hash: artifact.content_hash,
            size_bytes: artifact.size_bytes,
            created_at: artifact.created_at,
        };
        ledger.artifacts.push(record.clone());
        Ok(record)
    }

    fn record_validation_error(&self, draft: ValidationErrorDraft) -> Result<(), RecorderError> {
        let mut ledger = lock_recover(&self.ledger);
        let error_id = ledger.next_id("verror");
        ledger.validation_errors.push(ValidationErrorRecord {
            error_id,
            run_id: draft.run_id,
            node_id: draft.node_id,
            row_hash: draft.row_hash,
            row_data_json: draft.row_data_json,
            error: draft.error,
            schema_mode: draft.schema_mode,
            destination: draft.destination,
            violation_type: draft.violation_type,
            original_field_name: draft.original_field_name,
            normalized_field_name: draft.normalized_field_name,
            expected_type: draft.expected_type,
            actual_type: draft.actual_type,
            created_at: draft.created_at,
        });
        Ok(())
    }

    fn set_export_status(
        &self,
        run_id: &RunId,
        status: ExportStatus,
        update: ExportStatusUpdate,
    ) -> Result<(), RecorderError> {
        let mut ledger = lock_recover(&self.ledger);
        let Some(run) = ledger.runs.iter_mut().find(|run| &run.run_id == run_id) else {
            return Err(RecorderError::Missing(format!("run {run_id} is not registered")));
        };
        run.export_status = Some(status);
        run.export_error = update.error;
        run.export_format = update.format;
        run.export_sink = update.sink;
        run.exported_at = update.exported_at;
        Ok(())
    }

    fn complete_run(
        &self,
        run_id: &RunId,
        status: RunStatus,
        completed_at: Timestamp,
        reproducibility_grade: Option<String>,
    ) -> Result<(), RecorderError> {
        if !status.is_terminal() {
            return Err(RecorderError::Invalid(format!(
                "complete_run requires a terminal status, got {}",
                status.as_str()
            )));
        }
        let mut ledger = lock_recover(&self.ledger);
        let Some(run) = ledger.runs.iter_mut().find(|run| &run.run_id == run_id) else {
            return Err(RecorderError::Missing(format!("run {run_id} is not registered")));
        };
        if run.status.is_terminal() {
            if run.status == status {
                return Ok(());
            }
            return Err(RecorderError::Invalid(format!(
                "run {run_id} already completed as {}; cannot complete as {}",
                run.status.as_str(),
                status.as_str()
            )));
        }
        run.status = status;
        run.completed_at = Some(completed_at);
        if reproducibility_grade.is_some() {
            run.reproducibility_grade = reproducibility_grade;
        }
        Ok(())
    }

    fn save_checkpoint(&self, draft: CheckpointDraft) -> Result<CheckpointRecord, RecorderError> {
        let mut ledger = lock_recover(&self.ledger);
        let checkpoint_id = CheckpointId::new(ledger.next_id("checkpoint"));
        let record = CheckpointRecord {
            checkpoint_id,
            run_id: draft.run_id,
            token_id: draft.token_id,
            node_id: draft.node_id,
            sequence_number: draft.sequence_number,
            created_at: Some(draft.created_at),
            aggregation_state_json: draft.aggregation_state_json,
        };
        ledger.checkpoints.push(record.clone());
        Ok(record)
    }
}

// ============================================================================
// SECTION: In-Memory Payload Store
// ============================================================================

/// In-memory content-addressed payload store for tests and examples.
///
/// Purge keeps the hash key and drops the bytes, matching the retention
/// behavior of durable backends.
#[derive(Debug, Default)]
pub struct InMemoryPayloadStore {
    /// Blobs keyed by content hash; `None` marks a purged payload.
    blobs: Mutex<BTreeMap<String, Option<Vec<u8>>>>,
}

impl InMemoryPayloadStore {
    /// Creates an empty payload store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Purges a payload's bytes while preserving its hash entry.
    ///
    /// Returns true when the payload existed.
    pub fn purge(&self, reference: &PayloadRef) -> bool {
        let mut blobs = lock_recover(&self.blobs);
        match blobs.get_mut(reference.as_str()) {
            Some(entry) => {
                *entry = None;
                true
            }
            None => false,
        }
    }
}

impl PayloadStore for InMemoryPayloadStore {
    fn store(&self, bytes: &[u8]) -> Result<PayloadRef, PayloadStoreError> {
        let reference = PayloadRef::new(hash_bytes(bytes));
        let mut blobs = lock_recover(&self.blobs);
        blobs.entry(reference.as_str().to_string()).or_insert_with(|| Some(bytes.to_vec()));
        Ok(reference)
    }

    fn retrieve(&self, reference: &PayloadRef) -> Result<Vec<u8>, PayloadStoreError> {
        let blobs = lock_recover(&self.blobs);
        match blobs.get(reference.as_str()) {
            Some(Some(bytes)) => Ok(bytes.clone()),
            Some(None) => Err(PayloadStoreError::Purged {
                reference: reference.clone(),
            }),
            None => Err(PayloadStoreError::NotFound {
                reference: reference.clone(),
            }),
        }
    }

    fn exists(&self, reference: &PayloadRef) -> Result<bool, PayloadStoreError> {
        let blobs = lock_recover(&self.blobs);
        Ok(matches!(blobs.get(reference.as_str()), Some(Some(_))))
    }
}
