// crates/elspeth-core/src/runtime/aggregation.rs
// ============================================================================
// Module: Elspeth Aggregation Executor
// Description: Token buffering, trigger evaluation, and batch flushes.
// Purpose: Drive aggregation plugins with self-contained checkpointable state.
// Dependencies: crate::{contracts, hashing, interfaces, pipeline, schema}
// ============================================================================

//! ## Overview
//! Aggregation nodes buffer tokens until a trigger fires, then hand the batch
//! to the plugin. Buffers keep full token metadata, not just identifiers, so
//! checkpoint state is self-contained: restore rebuilds every token directly
//! with no database query. The legacy identifier-only checkpoint shape is
//! rejected outright.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::contracts::BatchId;
use crate::contracts::BatchStatus;
use crate::contracts::IdGenerator;
use crate::contracts::NodeId;
use crate::contracts::RoutingGroupId;
use crate::contracts::RowData;
use crate::contracts::RowId;
use crate::contracts::RunId;
use crate::contracts::StateId;
use crate::contracts::Timestamp;
use crate::contracts::TokenId;
use crate::contracts::TransformErrorReason;
use crate::contracts::TransformResult;
use crate::contracts::TriggerType;
use crate::hashing::CanonicalError;
use crate::hashing::canonical_json_bytes;
use crate::interfaces::AggregationPlugin;
use crate::interfaces::BatchStatusUpdate;
use crate::interfaces::PluginContext;
use crate::interfaces::Recorder;
use crate::interfaces::RecorderError;
use crate::interfaces::TokenSpawn;
use crate::pipeline::AggregationOutputMode;
use crate::pipeline::TriggerSpec;
use crate::schema::PipelineRow;
use crate::schema::SchemaContract;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Hard ceiling on serialized checkpoint state.
pub const CHECKPOINT_HARD_LIMIT_BYTES: usize = 10 * 1024 * 1024;

/// Soft threshold above which checkpoint state is flagged as large.
pub const CHECKPOINT_WARN_BYTES: usize = 1024 * 1024;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by the aggregation executor.
#[derive(Debug, Error)]
pub enum AggregationError {
    /// Buffer and token metadata diverged; flushing would corrupt lineage.
    #[error(
        "aggregation buffer for {node} is incompletely restored: {rows} rows but {tokens} tokens"
    )]
    IncompleteRestoration {
        /// Aggregation node identifier.
        node: NodeId,
        /// Buffered row count.
        rows: usize,
        /// Buffered token count.
        tokens: usize,
    },
    /// Serialized checkpoint state exceeded the hard ceiling.
    #[error(
        "checkpoint state is {bytes} bytes (limit {limit}): {total_rows} buffered rows across {node_count} nodes"
    )]
    CheckpointOverSize {
        /// Serialized size in bytes.
        bytes: usize,
        /// Hard limit in bytes.
        limit: usize,
        /// Total buffered rows.
        total_rows: usize,
        /// Nodes with non-empty buffers.
        node_count: usize,
    },
    /// Checkpoint state does not match the self-contained format.
    #[error("invalid checkpoint format: {0}")]
    InvalidCheckpointFormat(String),
    /// The node has no registered aggregation state.
    #[error("aggregation node {node} is not registered")]
    UnknownNode {
        /// Unregistered node identifier.
        node: NodeId,
    },
    /// Ledger write failure.
    #[error(transparent)]
    Recorder(#[from] RecorderError),
    /// Canonicalization failure.
    #[error(transparent)]
    Canonical(#[from] CanonicalError),
}

// ============================================================================
// SECTION: Token Info
// ============================================================================

/// Full metadata for one buffered token.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenInfo {
    /// Token identifier.
    pub token_id: TokenId,
    /// Owning row identifier.
    pub row_id: RowId,
    /// Branch name assigned at a fork, if any.
    pub branch_name: Option<String>,
    /// Row payload carried by the token.
    pub row_data: RowData,
}

// ============================================================================
// SECTION: Flush Outcome
// ============================================================================

/// Result of one batch flush.
#[derive(Debug)]
pub struct FlushOutcome {
    /// Plugin result for the batch.
    pub result: TransformResult,
    /// Tokens consumed by the flush, in buffering order.
    pub consumed: Vec<TokenInfo>,
    /// Child tokens produced for downstream processing.
    pub children: Vec<TokenInfo>,
}

// ============================================================================
// SECTION: Checkpoint State
// ============================================================================

/// Serialized aggregation state ready for checkpoint persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointState {
    /// Self-contained state value, keyed by node identifier.
    pub value: Value,
    /// Canonical serialized size in bytes.
    pub serialized_bytes: usize,
    /// True when the state exceeds the large-state threshold.
    pub warn_large: bool,
    /// Total buffered rows across nodes.
    pub total_rows: usize,
    /// Nodes with non-empty buffers.
    pub node_count: usize,
}

// ============================================================================
// SECTION: Per-Node State
// ============================================================================

/// Buffer and trigger state for one aggregation node.
struct NodeBuffer {
    /// Trigger configuration.
    trigger: TriggerSpec,
    /// Buffered row payloads in arrival order.
    rows: Vec<RowData>,
    /// Buffered token metadata in arrival order.
    tokens: Vec<TokenInfo>,
    /// Open batch, when one exists.
    batch_id: Option<BatchId>,
    /// Batch attempt counter.
    attempt: u32,
    /// Time the current batch opened.
    opened_at: Option<Timestamp>,
}

impl NodeBuffer {
    /// Evaluates the trigger against the current buffer.
    fn evaluate_trigger(&self, now: Timestamp) -> Option<TriggerType> {
        match self.trigger.trigger_type {
            TriggerType::Count => {
                let threshold = self.trigger.threshold?;
                (self.rows.len() >= threshold).then_some(TriggerType::Count)
            }
            TriggerType::Timeout => {
                let timeout_ms = self.trigger.timeout_ms?;
                let opened_at = self.opened_at?;
                let deadline = opened_at.plus_millis(i64::try_from(timeout_ms).unwrap_or(i64::MAX));
                (now >= deadline).then_some(TriggerType::Timeout)
            }
            TriggerType::EndOfSource | TriggerType::Custom => None,
        }
    }
}

// ============================================================================
// SECTION: Aggregation Executor
// ============================================================================

/// Buffering executor for every aggregation node in a run.
pub struct AggregationExecutor {
    /// Per-node buffers keyed by node identifier.
    nodes: BTreeMap<NodeId, NodeBuffer>,
    /// Identifier generator for join groups.
    ids: Arc<IdGenerator>,
}

impl AggregationExecutor {
    /// Creates an executor with no registered nodes.
    #[must_use]
    pub fn new(ids: Arc<IdGenerator>) -> Self {
        Self {
            nodes: BTreeMap::new(),
            ids,
        }
    }

    /// Registers an aggregation node with its trigger configuration.
    pub fn register_node(&mut self, node_id: NodeId, trigger: TriggerSpec) {
        self.nodes.insert(node_id, NodeBuffer {
            trigger,
            rows: Vec::new(),
            tokens: Vec::new(),
            batch_id: None,
            attempt: 0,
            opened_at: None,
        });
    }

    /// Returns true when the node has buffered tokens.
    #[must_use]
    pub fn has_buffered(&self, node_id: &NodeId) -> bool {
        self.nodes.get(node_id).is_some_and(|state| !state.tokens.is_empty())
    }

    /// Returns the nodes with non-empty buffers, in identifier order.
    #[must_use]
    pub fn buffered_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|(_, state)| !state.tokens.is_empty())
            .map(|(node_id, _)| node_id.clone())
            .collect()
    }

    /// Returns the most recently buffered token for a node.
    #[must_use]
    pub fn last_token(&self, node_id: &NodeId) -> Option<&TokenInfo> {
        self.nodes.get(node_id).and_then(|state| state.tokens.last())
    }

    /// Returns the buffered row payloads for a node, in arrival order.
    #[must_use]
    pub fn buffered_rows(&self, node_id: &NodeId) -> Vec<RowData> {
        self.nodes.get(node_id).map_or_else(Vec::new, |state| state.rows.clone())
    }

    /// Buffers a token, recording batch membership and evaluating the trigger.
    ///
    /// Returns the trigger type when this row fired the trigger.
    ///
    /// # Errors
    ///
    /// Returns [`AggregationError`] when the node is unknown or a ledger
    /// write fails.
    pub fn buffer_row(
        &mut self,
        node_id: &NodeId,
        token: TokenInfo,
        recorder: &dyn Recorder,
        run_id: &RunId,
        now: Timestamp,
    ) -> Result<Option<TriggerType>, AggregationError> {
        let Some(state) = self.nodes.get_mut(node_id) else {
            return Err(AggregationError::UnknownNode {
                node: node_id.clone(),
            });
        };
        let batch_id = match &state.batch_id {
            Some(batch_id) => batch_id.clone(),
            None => {
                state.attempt += 1;
                let batch = recorder.create_batch(run_id, node_id, state.attempt, now)?;
                state.batch_id = Some(batch.batch_id.clone());
                state.opened_at = Some(now);
                batch.batch_id
            }
        };
        let ordinal = u32::try_from(state.tokens.len()).map_or(u32::MAX, |value| value);
        recorder.record_batch_member(&batch_id, &token.token_id, ordinal)?;
        state.rows.push(token.row_data.clone());
        state.tokens.push(token);

        let fired = state.evaluate_trigger(now);
        if let Some(trigger) = fired {
            recorder.update_batch_status(&batch_id, BatchStatus::Triggered, BatchStatusUpdate {
                trigger_reason: Some(trigger.as_str().to_string()),
                ..BatchStatusUpdate::default()
            })?;
        }
        Ok(fired)
    }

    /// Flushes the node's buffer through the plugin.
    ///
    /// The buffer-token length guard runs first; a mismatch means a broken
    /// restoration and flushing would corrupt lineage.
    ///
    /// # Errors
    ///
    /// Returns [`AggregationError`] on restoration mismatches and ledger
    /// failures. Plugin failures are returned inside the outcome's result,
    /// with the batch marked failed.
    #[allow(
        clippy::too_many_arguments,
        reason = "Flush brackets recorder, plugin, and token lineage in one linear pass."
    )]
    pub fn execute_flush(
        &mut self,
        node_id: &NodeId,
        plugin: &mut dyn AggregationPlugin,
        ctx: &mut PluginContext<'_>,
        output_mode: AggregationOutputMode,
        trigger_type: TriggerType,
        recorder: &dyn Recorder,
        run_id: &RunId,
        state_id: &StateId,
        contract: Option<&SchemaContract>,
        next_step: Option<u32>,
        now: Timestamp,
    ) -> Result<FlushOutcome, AggregationError> {
        let Some(state) = self.nodes.get_mut(node_id) else {
            return Err(AggregationError::UnknownNode {
                node: node_id.clone(),
            });
        };
        if state.rows.len() != state.tokens.len() {
            return Err(AggregationError::IncompleteRestoration {
                node: node_id.clone(),
                rows: state.rows.len(),
                tokens: state.tokens.len(),
            });
        }
        if state.tokens.is_empty() {
            return Ok(FlushOutcome {
                result: TransformResult::success_multi(Vec::new()),
                consumed: Vec::new(),
                children: Vec::new(),
            });
        }

        let consumed: Vec<TokenInfo> = std::mem::take(&mut state.tokens);
        let buffered: Vec<RowData> = std::mem::take(&mut state.rows);
        let batch_id = match state.batch_id.take() {
            Some(batch_id) => batch_id,
            None => {
                // A restored buffer may predate its batch record.
                state.attempt += 1;
                let batch = recorder.create_batch(run_id, node_id, state.attempt, now)?;
                for (ordinal, token) in consumed.iter().enumerate() {
                    recorder.record_batch_member(
                        &batch.batch_id,
                        &token.token_id,
                        u32::try_from(ordinal).map_or(u32::MAX, |value| value),
                    )?;
                }
                batch.batch_id
            }
        };
        state.opened_at = None;

        recorder.update_batch_status(&batch_id, BatchStatus::Executing, BatchStatusUpdate {
            trigger_reason: Some(trigger_type.as_str().to_string()),
            aggregation_state_id: Some(state_id.clone()),
            ..BatchStatusUpdate::default()
        })?;

        let rows: Vec<PipelineRow> = buffered
            .into_iter()
            .map(|data| match contract {
                Some(contract) => PipelineRow::with_contract(data, contract),
                None => PipelineRow::bare(data),
            })
            .collect();
        let result = plugin.process(rows, ctx);

        let outputs = match &result {
            TransformResult::Success { row } => Some(vec![row.clone()]),
            TransformResult::SuccessMulti { rows } => Some(rows.clone()),
            TransformResult::Error { .. } => None,
        };
        let checked = outputs.and_then(|outputs| match output_mode {
            AggregationOutputMode::Passthrough => {
                (outputs.len() == consumed.len()).then_some(outputs)
            }
            AggregationOutputMode::Reduce => (outputs.len() == 1).then_some(outputs),
        });

        let Some(outputs) = checked else {
            recorder.update_batch_status(&batch_id, BatchStatus::Failed, BatchStatusUpdate {
                completed_at: Some(now),
                ..BatchStatusUpdate::default()
            })?;
            let result = match result {
                TransformResult::Error { .. } => result,
                TransformResult::Success { .. } | TransformResult::SuccessMulti { .. } => {
                    TransformResult::error(TransformErrorReason::fatal(format!(
                        "aggregation output arity violates {} mode",
                        match output_mode {
                            AggregationOutputMode::Passthrough => "passthrough",
                            AggregationOutputMode::Reduce => "reduce",
                        }
                    )))
                }
            };
            return Ok(FlushOutcome {
                result,
                consumed,
                children: Vec::new(),
            });
        };

        let mut children = Vec::with_capacity(outputs.len());
        match output_mode {
            AggregationOutputMode::Passthrough => {
                for (index, row) in outputs.iter().enumerate() {
                    let parent = &consumed[index];
                    let token = recorder.create_token(TokenSpawn {
                        row_id: parent.row_id.clone(),
                        parents: vec![parent.token_id.clone()],
                        branch_name: parent.branch_name.clone(),
                        fork_group_id: None,
                        join_group_id: None,
                        expand_group_id: None,
                        step_in_pipeline: next_step,
                        created_at: now,
                    })?;
                    children.push(TokenInfo {
                        token_id: token.token_id,
                        row_id: parent.row_id.clone(),
                        branch_name: parent.branch_name.clone(),
                        row_data: row.clone(),
                    });
                }
            }
            AggregationOutputMode::Reduce => {
                let join_group = RoutingGroupId::new(self.ids.next_id("join"));
                let first = &consumed[0];
                let row = &outputs[0];
                let token = recorder.create_token(TokenSpawn {
                    row_id: first.row_id.clone(),
                    parents: consumed.iter().map(|token| token.token_id.clone()).collect(),
                    branch_name: None,
                    fork_group_id: None,
                    join_group_id: Some(join_group),
                    expand_group_id: None,
                    step_in_pipeline: next_step,
                    created_at: now,
                })?;
                children.push(TokenInfo {
                    token_id: token.token_id,
                    row_id: first.row_id.clone(),
                    branch_name: None,
                    row_data: row.clone(),
                });
            }
        }
        for child in &children {
            recorder.record_batch_output(&batch_id, "token", child.token_id.as_str())?;
        }
        recorder.update_batch_status(&batch_id, BatchStatus::Completed, BatchStatusUpdate {
            completed_at: Some(now),
            ..BatchStatusUpdate::default()
        })?;

        Ok(FlushOutcome {
            result,
            consumed,
            children,
        })
    }

    /// Serializes self-contained checkpoint state for non-empty buffers.
    ///
    /// # Errors
    ///
    /// Returns [`AggregationError::CheckpointOverSize`] above the hard
    /// ceiling and canonicalization errors from serialization.
    pub fn checkpoint_state(&self) -> Result<CheckpointState, AggregationError> {
        let mut nodes = serde_json::Map::new();
        let mut total_rows = 0_usize;
        for (node_id, state) in &self.nodes {
            if state.tokens.is_empty() {
                continue;
            }
            total_rows += state.tokens.len();
            let tokens: Vec<Value> = state
                .tokens
                .iter()
                .map(|token| {
                    let mut entry = serde_json::Map::new();
                    entry.insert("token_id".to_string(), Value::String(token.token_id.to_string()));
                    entry.insert("row_id".to_string(), Value::String(token.row_id.to_string()));
                    if let Some(branch) = &token.branch_name {
                        entry.insert("branch_name".to_string(), Value::String(branch.clone()));
                    }
                    entry.insert("row_data".to_string(), Value::Object(token.row_data.clone()));
                    Value::Object(entry)
                })
                .collect();
            let mut node_entry = serde_json::Map::new();
            node_entry.insert("tokens".to_string(), Value::Array(tokens));
            node_entry.insert(
                "batch_id".to_string(),
                state
                    .batch_id
                    .as_ref()
                    .map_or(Value::Null, |batch| Value::String(batch.to_string())),
            );
            nodes.insert(node_id.to_string(), Value::Object(node_entry));
        }
        let node_count = nodes.len();
        let value = Value::Object(nodes);
        let serialized_bytes = canonical_json_bytes(&value)?.len();
        if serialized_bytes > CHECKPOINT_HARD_LIMIT_BYTES {
            return Err(AggregationError::CheckpointOverSize {
                bytes: serialized_bytes,
                limit: CHECKPOINT_HARD_LIMIT_BYTES,
                total_rows,
                node_count,
            });
        }
        Ok(CheckpointState {
            value,
            serialized_bytes,
            warn_large: serialized_bytes > CHECKPOINT_WARN_BYTES,
            total_rows,
            node_count,
        })
    }

    /// Restores buffers from self-contained checkpoint state.
    ///
    /// Token metadata is reconstructed directly from the state; no database
    /// query is made. The legacy identifier-only shape is rejected and no
    /// partial restoration occurs.
    ///
    /// # Errors
    ///
    /// Returns [`AggregationError::InvalidCheckpointFormat`] for malformed or
    /// legacy state and [`AggregationError::UnknownNode`] for unregistered
    /// nodes.
    pub fn restore_from_checkpoint(&mut self, state: &Value) -> Result<(), AggregationError> {
        let Value::Object(nodes) = state else {
            return Err(AggregationError::InvalidCheckpointFormat(
                "checkpoint state must be an object keyed by node id".to_string(),
            ));
        };
        let mut restored: Vec<(NodeId, Vec<TokenInfo>, Option<BatchId>)> = Vec::new();
        for (node_key, node_value) in nodes {
            let Value::Object(entry) = node_value else {
                return Err(AggregationError::InvalidCheckpointFormat(format!(
                    "node {node_key} entry must be an object"
                )));
            };
            if entry.contains_key("rows") || entry.contains_key("token_ids") {
                return Err(AggregationError::InvalidCheckpointFormat(format!(
                    "node {node_key} uses the identifier-only checkpoint layout retired by \
                     P1-2026-01-21; restart the run from source"
                )));
            }
            let Some(Value::Array(tokens)) = entry.get("tokens") else {
                return Err(AggregationError::InvalidCheckpointFormat(format!(
                    "node {node_key} is missing its tokens array"
                )));
            };
            let mut infos = Vec::with_capacity(tokens.len());
            for token in tokens {
                infos.push(parse_checkpoint_token(node_key, token)?);
            }
            let batch_id = match entry.get("batch_id") {
                None | Some(Value::Null) => None,
                Some(Value::String(batch)) => Some(BatchId::new(batch.clone())),
                Some(_) => {
                    return Err(AggregationError::InvalidCheckpointFormat(format!(
                        "node {node_key} batch_id must be a string or null"
                    )));
                }
            };
            let node_id = NodeId::new(node_key.clone());
            if !self.nodes.contains_key(&node_id) {
                return Err(AggregationError::UnknownNode {
                    node: node_id,
                });
            }
            restored.push((node_id, infos, batch_id));
        }
        for (node_id, infos, batch_id) in restored {
            if let Some(state) = self.nodes.get_mut(&node_id) {
                state.rows = infos.iter().map(|token| token.row_data.clone()).collect();
                state.tokens = infos;
                state.batch_id = batch_id;
                state.opened_at = None;
            }
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Checkpoint Parsing
// ============================================================================

/// Parses one token entry from checkpoint state.
fn parse_checkpoint_token(node_key: &str, value: &Value) -> Result<TokenInfo, AggregationError> {
    let Value::Object(entry) = value else {
        return Err(AggregationError::InvalidCheckpointFormat(format!(
            "node {node_key} token entry must be an object"
        )));
    };
    let Some(Value::String(token_id)) = entry.get("token_id") else {
        return Err(AggregationError::InvalidCheckpointFormat(format!(
            "node {node_key} token entry is missing token_id"
        )));
    };
    let Some(Value::String(row_id)) = entry.get("row_id") else {
        return Err(AggregationError::InvalidCheckpointFormat(format!(
            "node {node_key} token entry is missing row_id"
        )));
    };
    let Some(Value::Object(row_data)) = entry.get("row_data") else {
        return Err(AggregationError::InvalidCheckpointFormat(format!(
            "node {node_key} token entry is missing row_data"
        )));
    };
    let branch_name = match entry.get("branch_name") {
        None | Some(Value::Null) => None,
        Some(Value::String(branch)) => Some(branch.clone()),
        Some(_) => {
            return Err(AggregationError::InvalidCheckpointFormat(format!(
                "node {node_key} branch_name must be a string or null"
            )));
        }
    };
    Ok(TokenInfo {
        token_id: TokenId::new(token_id.clone()),
        row_id: RowId::new(row_id.clone()),
        branch_name,
        row_data: row_data.clone(),
    })
}
