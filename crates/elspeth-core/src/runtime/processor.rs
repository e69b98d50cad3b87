// crates/elspeth-core/src/runtime/processor.rs
// ============================================================================
// Module: Elspeth Processor
// Description: Per-token pipeline walk with routing and error policy.
// Purpose: Dispatch each step by declared kind and bracket it in node states.
// Dependencies: crate::{contracts, graph, hashing, interfaces, pipeline, runtime}
// ============================================================================

//! ## Overview
//! Given a token, the processor walks the configured row plugins in order,
//! dispatching on the declared plugin kind. Every invocation is bracketed by
//! a node state; every routing decision is recorded through a single
//! multi-route call; every terminal failure is resolved by the node's row
//! error policy. Unknown kinds cannot be expressed: dispatch is an
//! exhaustive match over the plugin sum type.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::thread;

use serde_json::Value;
use thiserror::Error;

use crate::contracts::EdgeId;
use crate::contracts::GateResult;
use crate::contracts::IdGenerator;
use crate::contracts::NodeId;
use crate::contracts::RoutingAction;
use crate::contracts::RoutingGroupId;
use crate::contracts::RoutingMode;
use crate::contracts::RowData;
use crate::contracts::RowId;
use crate::contracts::RowOutcome;
use crate::contracts::RunId;
use crate::contracts::StateId;
use crate::contracts::TokenId;
use crate::contracts::TransformErrorReason;
use crate::contracts::TransformResult;
use crate::contracts::TriggerType;
use crate::graph::CONTINUE_LABEL;
use crate::graph::GraphValidationError;
use crate::hashing::CanonicalError;
use crate::hashing::content_hash;
use crate::interfaces::NodeStateCompletion;
use crate::interfaces::NodeStateOpen;
use crate::interfaces::ArtifactDraft;
use crate::interfaces::PayloadStoreError;
use crate::interfaces::PluginContext;
use crate::interfaces::Recorder;
use crate::interfaces::RecorderError;
use crate::interfaces::RouteDispatch;
use crate::interfaces::SinkPlugin;
use crate::interfaces::StagePlugin;
use crate::interfaces::TokenSpawn;
use crate::pipeline::AggregationOutputMode;
use crate::pipeline::AggregationSettings;
use crate::pipeline::RouteTarget;
use crate::pipeline::RowErrorPolicy;
use crate::pipeline::StageKind;
use crate::runtime::aggregation::AggregationError;
use crate::runtime::aggregation::AggregationExecutor;
use crate::runtime::aggregation::TokenInfo;
use crate::runtime::retry::RetryPolicy;
use crate::runtime::services::RuntimeServices;
use crate::schema::PipelineRow;
use crate::schema::SchemaContract;
use crate::schema::SchemaError;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Engine-level errors that abort a run.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Ledger write failure.
    #[error(transparent)]
    Recorder(#[from] RecorderError),
    /// Canonicalization failure.
    #[error(transparent)]
    Canonical(#[from] CanonicalError),
    /// Graph invariant failure.
    #[error(transparent)]
    Graph(#[from] GraphValidationError),
    /// Aggregation executor failure.
    #[error(transparent)]
    Aggregation(#[from] AggregationError),
    /// Schema contract failure.
    #[error(transparent)]
    Schema(#[from] SchemaError),
    /// Payload store failure.
    #[error(transparent)]
    Payload(#[from] PayloadStoreError),
    /// Adjacent node contracts are incompatible.
    #[error("contract between {from_node} and {to_node} is incompatible: {problems:?}")]
    ContractIncompatible {
        /// Upstream node identifier.
        from_node: NodeId,
        /// Downstream node identifier.
        to_node: NodeId,
        /// Field-level incompatibilities.
        problems: Vec<String>,
    },
    /// A gate routed over a label with no matching edge.
    #[error("node {node} has no edge labelled {label:?}")]
    UnknownRoute {
        /// Gate node identifier.
        node: NodeId,
        /// Missing label.
        label: String,
    },
    /// A policy or specification referenced an unknown sink.
    #[error("sink {name:?} is not defined")]
    UnknownSink {
        /// Missing sink name.
        name: String,
    },
    /// A sink write failed.
    #[error("sink {sink:?} write failed: {message}")]
    SinkWrite {
        /// Sink name.
        sink: String,
        /// Failure detail.
        message: String,
    },
    /// The source plugin failed.
    #[error("source failed: {0}")]
    SourceFailed(String),
    /// A registered plugin did not match its declared kind.
    #[error("node {node} dispatched against the wrong plugin kind")]
    StageKindMismatch {
        /// Offending node identifier.
        node: NodeId,
    },
    /// A row-level failure escalated to run abort by policy.
    #[error("row {row_id} aborted the run: {message}")]
    RowAborted {
        /// Aborting row identifier.
        row_id: RowId,
        /// Failure detail.
        message: String,
    },
}

// ============================================================================
// SECTION: Bindings
// ============================================================================

/// A registered row plugin with its node identity and policies.
pub struct BoundStage {
    /// Node identifier assigned at registration.
    pub node_id: NodeId,
    /// Plugin instance dispatched by declared kind.
    pub plugin: StagePlugin,
    /// Row error policy for this node.
    pub on_error: RowErrorPolicy,
    /// Retry policy for this node.
    pub retry: RetryPolicy,
    /// Aggregation binding, present for aggregation stages.
    pub aggregation: Option<AggregationSettings>,
}

/// A registered sink with its node identity.
pub struct BoundSink {
    /// Node identifier assigned at registration.
    pub node_id: NodeId,
    /// Sink plugin instance.
    pub plugin: Box<dyn SinkPlugin>,
}

/// A token positioned at a pipeline step.
#[derive(Debug, Clone)]
pub struct TokenCursor {
    /// Token identifier.
    pub token_id: TokenId,
    /// Owning row identifier.
    pub row_id: RowId,
    /// Branch name assigned at a fork, if any.
    pub branch_name: Option<String>,
    /// Next step to execute.
    pub step: u32,
    /// Row payload carried by the token.
    pub data: RowData,
}

/// Outcome of one transform invocation after retries.
enum TransformStepResult {
    /// Advance the cursor with a new payload.
    Advance(RowData),
    /// Replace the cursor with expanded child tokens.
    Expand(Vec<TokenCursor>),
    /// Terminal failure after policy-free retries.
    Failed(TransformErrorReason),
}

// ============================================================================
// SECTION: Processor
// ============================================================================

/// Per-token pipeline walker.
pub struct Processor<'a> {
    /// Owning run identifier.
    pub run_id: &'a RunId,
    /// Registered row plugins in chain order.
    pub stages: &'a mut [BoundStage],
    /// Registered sinks by name.
    pub sinks: &'a mut BTreeMap<String, BoundSink>,
    /// Default output sink name.
    pub output_sink: &'a str,
    /// `(from node, label)` to edge identifier map.
    pub edge_map: &'a BTreeMap<(NodeId, String), EdgeId>,
    /// `(gate node, label)` to route target map.
    pub route_targets: &'a BTreeMap<(NodeId, String), RouteTarget>,
    /// Ledger recorder.
    pub recorder: &'a dyn Recorder,
    /// Shared runtime services.
    pub services: &'a RuntimeServices,
    /// Aggregation executor.
    pub aggregations: &'a mut AggregationExecutor,
    /// Identifier generator for routing groups.
    pub ids: &'a IdGenerator,
    /// Locked run contract for dual-name row access.
    pub contract: Option<&'a SchemaContract>,
}

impl Processor<'_> {
    /// Walks a token through the remaining pipeline steps.
    ///
    /// Returns the `(row, outcome)` pairs resolved by this walk. Buffered
    /// aggregation tokens resolve later and contribute nothing yet.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] on ledger failures or when a row policy
    /// escalates to abort.
    pub fn process_token(
        &mut self,
        cursor: TokenCursor,
    ) -> Result<Vec<(RowId, RowOutcome)>, EngineError> {
        let mut cursor = cursor;
        loop {
            let step_index = usize::try_from(cursor.step).map_or(usize::MAX, |value| value);
            if step_index >= self.stages.len() {
                self.deliver_to_sink_name(
                    &self.output_sink.to_string(),
                    &cursor.token_id,
                    cursor.step,
                    &cursor.data,
                )?;
                return Ok(vec![(cursor.row_id, RowOutcome::Completed)]);
            }
            let kind = match &self.stages[step_index].plugin {
                StagePlugin::Transform(_) => StageKind::Transform,
                StagePlugin::Gate(_) => StageKind::Gate,
                StagePlugin::Aggregation(_) => StageKind::Aggregation,
            };
            match kind {
                StageKind::Transform => {
                    match self.run_transform_step(step_index, &cursor)? {
                        TransformStepResult::Advance(row) => {
                            cursor.data = row;
                            cursor.step += 1;
                        }
                        TransformStepResult::Expand(children) => {
                            let mut events = Vec::new();
                            for child in children {
                                events.extend(self.process_token(child)?);
                            }
                            return Ok(events);
                        }
                        TransformStepResult::Failed(reason) => {
                            let policy = self.stages[step_index].on_error.clone();
                            return self.resolve_row_failure(&policy, &cursor, &reason.message);
                        }
                    }
                }
                StageKind::Gate => {
                    let (state_id, gate_result) = self.run_gate_step(step_index, &cursor)?;
                    match gate_result {
                        Ok(result) => {
                            match self.resolve_routing(step_index, &state_id, &cursor, result)? {
                                RoutingResolution::Advance(row) => {
                                    cursor.data = row;
                                    cursor.step += 1;
                                }
                                RoutingResolution::Terminal(events) => return Ok(events),
                            }
                        }
                        Err(reason) => {
                            let policy = self.stages[step_index].on_error.clone();
                            return self.resolve_row_failure(&policy, &cursor, &reason);
                        }
                    }
                }
                StageKind::Aggregation => {
                    return self.run_aggregation_step(step_index, &cursor);
                }
            }
        }
    }

    /// Flushes every non-empty aggregation buffer at end of source.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] on ledger failures or policy abort.
    pub fn flush_end_of_source(&mut self) -> Result<Vec<(RowId, RowOutcome)>, EngineError> {
        let mut events = Vec::new();
        for (step_index, node_id) in self.aggregation_steps() {
            if self.aggregations.has_buffered(&node_id) {
                events.extend(self.flush_aggregation(step_index, TriggerType::EndOfSource)?);
            }
        }
        Ok(events)
    }

    /// Returns the aggregation stages in chain order.
    fn aggregation_steps(&self) -> Vec<(usize, NodeId)> {
        self.stages
            .iter()
            .enumerate()
            .filter(|(_, stage)| matches!(stage.plugin, StagePlugin::Aggregation(_)))
            .map(|(index, stage)| (index, stage.node_id.clone()))
            .collect()
    }

    /// Wraps a payload with the run contract's name resolution.
    fn pipeline_row(&self, data: RowData) -> PipelineRow {
        match self.contract {
            Some(contract) => PipelineRow::with_contract(data, contract),
            None => PipelineRow::bare(data),
        }
    }

    // ------------------------------------------------------------------
    // Transform steps
    // ------------------------------------------------------------------

    /// Runs one transform step, consuming retryable failures internally.
    fn run_transform_step(
        &mut self,
        step_index: usize,
        cursor: &TokenCursor,
    ) -> Result<TransformStepResult, EngineError> {
        let node_id = self.stages[step_index].node_id.clone();
        let retry = self.stages[step_index].retry;
        let mut attempt: u32 = 1;
        loop {
            let started = self.services.now();
            let input_hash = content_hash(&cursor.data)?;
            let state_id = self.recorder.begin_node_state(NodeStateOpen {
                token_id: cursor.token_id.clone(),
                node_id: node_id.clone(),
                step_index: cursor.step,
                attempt,
                input_hash,
                input_data_ref: None,
                context_before: None,
                started_at: started,
            })?;
            let row = self.pipeline_row(cursor.data.clone());
            let mut ctx = PluginContext::new(self.run_id, &node_id, self.services);
            let result = {
                let StagePlugin::Transform(plugin) = &mut self.stages[step_index].plugin else {
                    return Err(EngineError::StageKindMismatch {
                        node: node_id.clone(),
                    });
                };
                plugin.process(row, &mut ctx)
            };
            let now = self.services.now();
            for call in ctx.take_calls() {
                self.recorder.record_call(&state_id, call, now)?;
            }
            let duration_ms = now.saturating_millis_since(started);
            match result {
                TransformResult::Success { row } => {
                    let output_hash = content_hash(&row)?;
                    self.recorder.complete_node_state(&state_id, NodeStateCompletion {
                        output_hash: Some(output_hash),
                        output_data_ref: None,
                        context_after: None,
                        completed_at: now,
                        duration_ms,
                    })?;
                    return Ok(TransformStepResult::Advance(row));
                }
                TransformResult::SuccessMulti { rows } => {
                    let output_hash = content_hash(&rows)?;
                    self.recorder.complete_node_state(&state_id, NodeStateCompletion {
                        output_hash: Some(output_hash),
                        output_data_ref: None,
                        context_after: None,
                        completed_at: now,
                        duration_ms,
                    })?;
                    let expand_group = RoutingGroupId::new(self.ids.next_id("expand"));
                    let mut children = Vec::with_capacity(rows.len());
                    for row in rows {
                        let token = self.recorder.create_token(TokenSpawn {
                            row_id: cursor.row_id.clone(),
                            parents: vec![cursor.token_id.clone()],
                            branch_name: cursor.branch_name.clone(),
                            fork_group_id: None,
                            join_group_id: None,
                            expand_group_id: Some(expand_group.clone()),
                            step_in_pipeline: Some(cursor.step + 1),
                            created_at: now,
                        })?;
                        children.push(TokenCursor {
                            token_id: token.token_id,
                            row_id: cursor.row_id.clone(),
                            branch_name: cursor.branch_name.clone(),
                            step: cursor.step + 1,
                            data: row,
                        });
                    }
                    return Ok(TransformStepResult::Expand(children));
                }
                TransformResult::Error { reason } => {
                    let error_json = reason_json(&reason)?;
                    self.recorder.fail_node_state(&state_id, &error_json, now, duration_ms)?;
                    if retry.should_retry(&reason, attempt) {
                        thread::sleep(retry.backoff_after(&reason, attempt));
                        attempt += 1;
                        continue;
                    }
                    return Ok(TransformStepResult::Failed(reason));
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Gate steps
    // ------------------------------------------------------------------

    /// Runs one gate evaluation inside a node state bracket.
    ///
    /// Returns the state identifier and either the gate result or the
    /// failure message for policy resolution.
    fn run_gate_step(
        &mut self,
        step_index: usize,
        cursor: &TokenCursor,
    ) -> Result<(StateId, Result<GateResult, String>), EngineError> {
        let node_id = self.stages[step_index].node_id.clone();
        let started = self.services.now();
        let input_hash = content_hash(&cursor.data)?;
        let state_id = self.recorder.begin_node_state(NodeStateOpen {
            token_id: cursor.token_id.clone(),
            node_id: node_id.clone(),
            step_index: cursor.step,
            attempt: 1,
            input_hash,
            input_data_ref: None,
            context_before: None,
            started_at: started,
        })?;
        let row = self.pipeline_row(cursor.data.clone());
        let mut ctx = PluginContext::new(self.run_id, &node_id, self.services);
        let evaluation = {
            let StagePlugin::Gate(plugin) = &mut self.stages[step_index].plugin else {
                return Err(EngineError::StageKindMismatch {
                    node: node_id.clone(),
                });
            };
            plugin.evaluate(row, &mut ctx)
        };
        let now = self.services.now();
        for call in ctx.take_calls() {
            self.recorder.record_call(&state_id, call, now)?;
        }
        let duration_ms = now.saturating_millis_since(started);
        match evaluation {
            Ok(result) => {
                let output_hash = content_hash(&result.row)?;
                self.recorder.complete_node_state(&state_id, NodeStateCompletion {
                    output_hash: Some(output_hash),
                    output_data_ref: None,
                    context_after: None,
                    completed_at: now,
                    duration_ms,
                })?;
                Ok((state_id, Ok(result)))
            }
            Err(err) => {
                let message = err.to_string();
                let error_json = Value::String(message.clone());
                self.recorder.fail_node_state(&state_id, &error_json, now, duration_ms)?;
                Ok((state_id, Err(message)))
            }
        }
    }

    /// Resolves a gate decision into routing events and token movement.
    fn resolve_routing(
        &mut self,
        step_index: usize,
        state_id: &StateId,
        cursor: &TokenCursor,
        result: GateResult,
    ) -> Result<RoutingResolution, EngineError> {
        let node_id = self.stages[step_index].node_id.clone();
        let GateResult {
            row,
            action,
            reason,
        } = result;
        match action {
            RoutingAction::Continue => Ok(RoutingResolution::Advance(row)),
            RoutingAction::Route { label } => {
                let target = self.route_target(&node_id, &label)?;
                let group = RoutingGroupId::new(self.ids.next_id("route"));
                let now = self.services.now();
                match target {
                    RouteTarget::Continue => {
                        let edge_id = self.edge_id(&node_id, CONTINUE_LABEL)?;
                        self.recorder.record_routing_events(
                            state_id,
                            &group,
                            &[RouteDispatch {
                                edge_id,
                                mode: RoutingMode::Move,
                            }],
                            reason.as_ref(),
                            now,
                        )?;
                        Ok(RoutingResolution::Advance(row))
                    }
                    RouteTarget::Sink(sink_name) => {
                        let edge_id = self.edge_id(&node_id, &label)?;
                        self.recorder.record_routing_events(
                            state_id,
                            &group,
                            &[RouteDispatch {
                                edge_id,
                                mode: RoutingMode::Move,
                            }],
                            reason.as_ref(),
                            now,
                        )?;
                        self.deliver_to_sink_name(&sink_name, &cursor.token_id, cursor.step, &row)?;
                        Ok(RoutingResolution::Terminal(vec![(
                            cursor.row_id.clone(),
                            RowOutcome::Routed,
                        )]))
                    }
                }
            }
            RoutingAction::Fork { labels } => {
                let group = RoutingGroupId::new(self.ids.next_id("fork"));
                let now = self.services.now();
                let mut dispatches = Vec::with_capacity(labels.len());
                let mut targets = Vec::with_capacity(labels.len());
                for label in &labels {
                    let target = self.route_target(&node_id, label)?;
                    let edge_label = match &target {
                        RouteTarget::Continue => CONTINUE_LABEL,
                        RouteTarget::Sink(_) => label.as_str(),
                    };
                    dispatches.push(RouteDispatch {
                        edge_id: self.edge_id(&node_id, edge_label)?,
                        mode: RoutingMode::Copy,
                    });
                    targets.push(target);
                }
                self.recorder.record_routing_events(
                    state_id,
                    &group,
                    &dispatches,
                    reason.as_ref(),
                    now,
                )?;
                for (label, target) in labels.iter().zip(targets) {
                    let token = self.recorder.create_token(TokenSpawn {
                        row_id: cursor.row_id.clone(),
                        parents: vec![cursor.token_id.clone()],
                        branch_name: Some(label.clone()),
                        fork_group_id: Some(group.clone()),
                        join_group_id: None,
                        expand_group_id: None,
                        step_in_pipeline: Some(cursor.step + 1),
                        created_at: now,
                    })?;
                    match target {
                        RouteTarget::Sink(sink_name) => {
                            self.deliver_to_sink_name(
                                &sink_name,
                                &token.token_id,
                                cursor.step,
                                &row,
                            )?;
                        }
                        RouteTarget::Continue => {
                            let child = TokenCursor {
                                token_id: token.token_id,
                                row_id: cursor.row_id.clone(),
                                branch_name: Some(label.clone()),
                                step: cursor.step + 1,
                                data: row.clone(),
                            };
                            // Copies continuing down the chain are walked to
                            // their own terminals; the row still counts once.
                            let _ = self.process_token(child)?;
                        }
                    }
                }
                Ok(RoutingResolution::Terminal(vec![(
                    cursor.row_id.clone(),
                    RowOutcome::Routed,
                )]))
            }
        }
    }

    // ------------------------------------------------------------------
    // Aggregation steps
    // ------------------------------------------------------------------

    /// Buffers a token at an aggregation node and flushes when triggered.
    fn run_aggregation_step(
        &mut self,
        step_index: usize,
        cursor: &TokenCursor,
    ) -> Result<Vec<(RowId, RowOutcome)>, EngineError> {
        let node_id = self.stages[step_index].node_id.clone();
        let started = self.services.now();
        let input_hash = content_hash(&cursor.data)?;
        let state_id = self.recorder.begin_node_state(NodeStateOpen {
            token_id: cursor.token_id.clone(),
            node_id: node_id.clone(),
            step_index: cursor.step,
            attempt: 1,
            input_hash,
            input_data_ref: None,
            context_before: None,
            started_at: started,
        })?;
        let fired = self.aggregations.buffer_row(
            &node_id,
            TokenInfo {
                token_id: cursor.token_id.clone(),
                row_id: cursor.row_id.clone(),
                branch_name: cursor.branch_name.clone(),
                row_data: cursor.data.clone(),
            },
            self.recorder,
            self.run_id,
            started,
        )?;
        let now = self.services.now();
        self.recorder.complete_node_state(&state_id, NodeStateCompletion {
            output_hash: None,
            output_data_ref: None,
            context_after: None,
            completed_at: now,
            duration_ms: now.saturating_millis_since(started),
        })?;
        match fired {
            None => Ok(Vec::new()),
            Some(trigger) => self.flush_aggregation(step_index, trigger),
        }
    }

    /// Flushes one aggregation node and walks the produced children.
    fn flush_aggregation(
        &mut self,
        step_index: usize,
        trigger: TriggerType,
    ) -> Result<Vec<(RowId, RowOutcome)>, EngineError> {
        let node_id = self.stages[step_index].node_id.clone();
        let Some(settings) = self.stages[step_index].aggregation.clone() else {
            return Err(EngineError::StageKindMismatch {
                node: node_id,
            });
        };
        let Some(anchor) = self.aggregations.last_token(&node_id).cloned() else {
            return Ok(Vec::new());
        };
        let step = u32::try_from(step_index).map_or(u32::MAX, |value| value);
        let next_step = step + 1;

        let started = self.services.now();
        let input_hash = content_hash(&self.aggregations.buffered_rows(&node_id))?;
        let state_id = self.recorder.begin_node_state(NodeStateOpen {
            token_id: anchor.token_id.clone(),
            node_id: node_id.clone(),
            step_index: step,
            attempt: 1,
            input_hash,
            input_data_ref: None,
            context_before: None,
            started_at: started,
        })?;
        let mut ctx = PluginContext::new(self.run_id, &node_id, self.services);
        let flush = {
            let StagePlugin::Aggregation(plugin) = &mut self.stages[step_index].plugin else {
                return Err(EngineError::StageKindMismatch {
                    node: node_id.clone(),
                });
            };
            self.aggregations.execute_flush(
                &node_id,
                plugin.as_mut(),
                &mut ctx,
                settings.output_mode,
                trigger,
                self.recorder,
                self.run_id,
                &state_id,
                self.contract,
                Some(next_step),
                started,
            )?
        };
        let now = self.services.now();
        for call in ctx.take_calls() {
            self.recorder.record_call(&state_id, call, now)?;
        }
        let duration_ms = now.saturating_millis_since(started);

        match &flush.result {
            TransformResult::Success { .. } | TransformResult::SuccessMulti { .. } => {
                let output_rows: Vec<RowData> =
                    flush.children.iter().map(|child| child.row_data.clone()).collect();
                let output_hash = content_hash(&output_rows)?;
                self.recorder.complete_node_state(&state_id, NodeStateCompletion {
                    output_hash: Some(output_hash),
                    output_data_ref: None,
                    context_after: None,
                    completed_at: now,
                    duration_ms,
                })?;
                let mut events = Vec::new();
                for child in &flush.children {
                    events.extend(self.process_token(TokenCursor {
                        token_id: child.token_id.clone(),
                        row_id: child.row_id.clone(),
                        branch_name: child.branch_name.clone(),
                        step: next_step,
                        data: child.row_data.clone(),
                    })?);
                }
                if matches!(settings.output_mode, AggregationOutputMode::Reduce) {
                    let outcome = events
                        .first()
                        .map_or(RowOutcome::Completed, |(_, outcome)| *outcome);
                    let mut seen = Vec::new();
                    let mut attributed = Vec::new();
                    for token in &flush.consumed {
                        if !seen.contains(&token.row_id) {
                            seen.push(token.row_id.clone());
                            attributed.push((token.row_id.clone(), outcome));
                        }
                    }
                    return Ok(attributed);
                }
                Ok(events)
            }
            TransformResult::Error { reason } => {
                let error_json = reason_json(reason)?;
                self.recorder.fail_node_state(&state_id, &error_json, now, duration_ms)?;
                let policy = self.stages[step_index].on_error.clone();
                let message = reason.message.clone();
                let mut events = Vec::new();
                for token in &flush.consumed {
                    let cursor = TokenCursor {
                        token_id: token.token_id.clone(),
                        row_id: token.row_id.clone(),
                        branch_name: token.branch_name.clone(),
                        step,
                        data: token.row_data.clone(),
                    };
                    events.extend(self.resolve_row_failure(&policy, &cursor, &message)?);
                }
                Ok(events)
            }
        }
    }

    // ------------------------------------------------------------------
    // Policy and sinks
    // ------------------------------------------------------------------

    /// Applies a row error policy to a terminally failed token.
    fn resolve_row_failure(
        &mut self,
        policy: &RowErrorPolicy,
        cursor: &TokenCursor,
        message: &str,
    ) -> Result<Vec<(RowId, RowOutcome)>, EngineError> {
        match policy {
            RowErrorPolicy::Fail => Ok(vec![(cursor.row_id.clone(), RowOutcome::Failed)]),
            RowErrorPolicy::Discard => Ok(vec![(cursor.row_id.clone(), RowOutcome::Discarded)]),
            RowErrorPolicy::Quarantine { sink } => {
                let sink = sink.clone();
                self.deliver_to_sink_name(&sink, &cursor.token_id, cursor.step, &cursor.data)?;
                Ok(vec![(cursor.row_id.clone(), RowOutcome::Quarantined)])
            }
            RowErrorPolicy::Abort => Err(EngineError::RowAborted {
                row_id: cursor.row_id.clone(),
                message: message.to_string(),
            }),
        }
    }

    /// Writes a row to a named sink inside a node state bracket.
    pub fn deliver_to_sink_name(
        &mut self,
        name: &str,
        token_id: &TokenId,
        step: u32,
        data: &RowData,
    ) -> Result<(), EngineError> {
        let Some(node_id) = self.sinks.get(name).map(|sink| sink.node_id.clone()) else {
            return Err(EngineError::UnknownSink {
                name: name.to_string(),
            });
        };
        let started = self.services.now();
        let input_hash = content_hash(data)?;
        let state_id = self.recorder.begin_node_state(NodeStateOpen {
            token_id: token_id.clone(),
            node_id: node_id.clone(),
            step_index: step,
            attempt: 1,
            input_hash,
            input_data_ref: None,
            context_before: None,
            started_at: started,
        })?;
        let mut ctx = PluginContext::new(self.run_id, &node_id, self.services);
        let written = {
            let Some(sink) = self.sinks.get_mut(name) else {
                return Err(EngineError::UnknownSink {
                    name: name.to_string(),
                });
            };
            sink.plugin.write(std::slice::from_ref(data), &mut ctx)
        };
        let now = self.services.now();
        for call in ctx.take_calls() {
            self.recorder.record_call(&state_id, call, now)?;
        }
        let duration_ms = now.saturating_millis_since(started);
        match written {
            Ok(descriptor) => {
                self.recorder.record_artifact(ArtifactDraft {
                    run_id: self.run_id.clone(),
                    produced_by_state_id: state_id.clone(),
                    sink_node_id: node_id,
                    artifact_type: descriptor.artifact_type,
                    path_or_uri: descriptor.path_or_uri,
                    content_hash: descriptor.content_hash.clone(),
                    size_bytes: descriptor.size_bytes,
                    created_at: now,
                })?;
                self.recorder.complete_node_state(&state_id, NodeStateCompletion {
                    output_hash: Some(descriptor.content_hash),
                    output_data_ref: None,
                    context_after: None,
                    completed_at: now,
                    duration_ms,
                })?;
                Ok(())
            }
            Err(err) => {
                let message = err.to_string();
                self.recorder.fail_node_state(
                    &state_id,
                    &Value::String(message.clone()),
                    now,
                    duration_ms,
                )?;
                Err(EngineError::SinkWrite {
                    sink: name.to_string(),
                    message,
                })
            }
        }
    }

    /// Resolves a gate route label to its configured target.
    fn route_target(&self, node_id: &NodeId, label: &str) -> Result<RouteTarget, EngineError> {
        self.route_targets
            .get(&(node_id.clone(), label.to_string()))
            .cloned()
            .ok_or_else(|| EngineError::UnknownRoute {
                node: node_id.clone(),
                label: label.to_string(),
            })
    }

    /// Resolves an edge identifier by source node and label.
    fn edge_id(&self, node_id: &NodeId, label: &str) -> Result<EdgeId, EngineError> {
        self.edge_map
            .get(&(node_id.clone(), label.to_string()))
            .cloned()
            .ok_or_else(|| EngineError::UnknownRoute {
                node: node_id.clone(),
                label: label.to_string(),
            })
    }
}

/// Routing resolution for one gate decision.
enum RoutingResolution {
    /// Token continues with the (possibly annotated) payload.
    Advance(RowData),
    /// Token terminated; events resolved by the decision.
    Terminal(Vec<(RowId, RowOutcome)>),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Serializes a transform failure reason for ledger storage.
fn reason_json(reason: &TransformErrorReason) -> Result<Value, EngineError> {
    serde_json::to_value(reason)
        .map_err(|err| EngineError::Canonical(CanonicalError::Canonicalization(err.to_string())))
}
