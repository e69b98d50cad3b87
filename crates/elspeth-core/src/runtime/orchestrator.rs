// crates/elspeth-core/src/runtime/orchestrator.rs
// ============================================================================
// Module: Elspeth Orchestrator
// Description: Run lifecycle, node registration, row streaming, and cleanup.
// Purpose: Execute one pipeline run as the single canonical execution path.
// Dependencies: crate::{contracts, graph, hashing, interfaces, pipeline, runtime}
// ============================================================================

//! ## Overview
//! The orchestrator begins the run, registers every node and edge with its
//! contracts, validates adjacent contracts before the source is driven,
//! streams rows through the processor, and completes the run with a terminal
//! status on every exit path. Plugin cleanup runs in a scope guaranteed on
//! all exits; cleanup failures are collected on the report and never mask
//! the primary error.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::contracts::Determinism;
use crate::contracts::EdgeId;
use crate::contracts::IdGenerator;
use crate::contracts::NodeId;
use crate::contracts::NodeType;
use crate::contracts::PayloadRef;
use crate::contracts::RowData;
use crate::contracts::RowId;
use crate::contracts::RowOutcome;
use crate::contracts::RunId;
use crate::contracts::RunStatus;
use crate::contracts::Timestamp;
use crate::contracts::TokenId;
use crate::graph::ExecutionGraph;
use crate::hashing::CANONICAL_VERSION;
use crate::hashing::CanonicalError;
use crate::hashing::canonical_json_bytes;
use crate::hashing::content_hash;
use crate::hashing::hash_bytes;
use crate::interfaces::CheckpointDraft;
use crate::interfaces::NodeRegistration;
use crate::interfaces::ValidationErrorDraft;
use crate::interfaces::PayloadStore;
use crate::interfaces::PluginContext;
use crate::interfaces::Recorder;
use crate::interfaces::RunStart;
use crate::interfaces::SinkPlugin;
use crate::interfaces::SourcePlugin;
use crate::interfaces::StagePlugin;
use crate::interfaces::TokenSpawn;
use crate::pipeline::AggregationSettings;
use crate::pipeline::PipelineSpec;
use crate::pipeline::RetrySettings;
use crate::pipeline::RouteTarget;
use crate::pipeline::RowErrorPolicy;
use crate::pipeline::StageKind;
use crate::runtime::aggregation::AggregationExecutor;
use crate::runtime::processor::BoundSink;
use crate::runtime::processor::BoundStage;
use crate::runtime::processor::EngineError;
use crate::runtime::processor::Processor;
use crate::runtime::processor::TokenCursor;
use crate::runtime::retry::RetryPolicy;
use crate::runtime::services::RuntimeServices;
use crate::schema::ContractViolation;
use crate::schema::SchemaContract;

// ============================================================================
// SECTION: Bindings and Options
// ============================================================================

/// One configured row plugin instance with its policies.
pub struct StageBinding {
    /// Plugin instance dispatched by declared kind.
    pub plugin: StagePlugin,
    /// Row error policy for this node.
    pub on_error: RowErrorPolicy,
    /// Retry policy override for this node.
    pub retry: Option<RetrySettings>,
    /// Aggregation binding, required for aggregation plugins.
    pub aggregation: Option<AggregationSettings>,
}

/// Plugin instances bound to one pipeline specification.
pub struct PipelineBindings {
    /// Source plugin instance.
    pub source: Box<dyn SourcePlugin>,
    /// Row plugin instances in chain order.
    pub stages: Vec<StageBinding>,
    /// Sink plugin instances by sink name.
    pub sinks: BTreeMap<String, Box<dyn SinkPlugin>>,
}

/// Run-level options.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Persist aggregation checkpoints at row boundaries.
    pub checkpoint_enabled: bool,
    /// Default retry policy for stages without an override.
    pub default_retry: RetrySettings,
    /// Retain offending row payloads on validation error records.
    pub keep_violation_row_data: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            checkpoint_enabled: false,
            default_retry: RetrySettings::default(),
            keep_violation_row_data: true,
        }
    }
}

/// Summary of one completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Run identifier.
    pub run_id: RunId,
    /// Rows ingested from the source.
    pub rows: u64,
    /// Terminal outcome counts.
    pub outcomes: BTreeMap<RowOutcome, u64>,
    /// Cleanup failures collected during shutdown.
    pub cleanup_errors: Vec<String>,
}

// ============================================================================
// SECTION: Orchestrator
// ============================================================================

/// Single-run orchestrator.
pub struct Orchestrator {
    /// Validated execution graph.
    graph: ExecutionGraph,
    /// Pipeline specification the graph was built from.
    spec: PipelineSpec,
    /// Plugin instances.
    bindings: PipelineBindings,
    /// Ledger recorder.
    recorder: Arc<dyn Recorder>,
    /// Optional payload store.
    payloads: Option<Arc<dyn PayloadStore>>,
    /// Shared runtime services.
    services: RuntimeServices,
    /// Run options.
    options: RunOptions,
    /// Identifier generator shared with the graph builder.
    ids: Arc<IdGenerator>,
    /// Aggregation checkpoint state to restore before streaming.
    restore_state: Option<Value>,
}

impl Orchestrator {
    /// Creates an orchestrator after checking bindings against the spec.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::StageKindMismatch`] when a binding's kind does
    /// not match its specification entry and [`EngineError::UnknownSink`]
    /// when sink bindings do not cover the specification.
    #[allow(
        clippy::too_many_arguments,
        reason = "Construction names every run collaborator explicitly."
    )]
    pub fn new(
        graph: ExecutionGraph,
        spec: PipelineSpec,
        bindings: PipelineBindings,
        recorder: Arc<dyn Recorder>,
        payloads: Option<Arc<dyn PayloadStore>>,
        services: RuntimeServices,
        options: RunOptions,
        ids: Arc<IdGenerator>,
    ) -> Result<Self, EngineError> {
        if bindings.stages.len() != spec.row_plugins.len() {
            return Err(EngineError::StageKindMismatch {
                node: NodeId::new("row_plugins"),
            });
        }
        for (binding, plugin_spec) in bindings.stages.iter().zip(&spec.row_plugins) {
            let matches = matches!(
                (&binding.plugin, plugin_spec.kind),
                (StagePlugin::Transform(_), StageKind::Transform)
                    | (StagePlugin::Gate(_), StageKind::Gate)
                    | (StagePlugin::Aggregation(_), StageKind::Aggregation)
            );
            if !matches {
                return Err(EngineError::StageKindMismatch {
                    node: NodeId::new(plugin_spec.plugin.clone()),
                });
            }
        }
        for name in spec.sinks.keys() {
            if !bindings.sinks.contains_key(name) {
                return Err(EngineError::UnknownSink {
                    name: name.clone(),
                });
            }
        }
        Ok(Self {
            graph,
            spec,
            bindings,
            recorder,
            payloads,
            services,
            options,
            ids,
            restore_state: None,
        })
    }

    /// Installs aggregation checkpoint state to restore before streaming.
    #[must_use]
    pub fn with_restore_state(mut self, state: Value) -> Self {
        self.restore_state = Some(state);
        self
    }

    /// Executes the run.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] after completing the run as failed and
    /// releasing plugin resources.
    pub fn run(self) -> Result<RunReport, EngineError> {
        let Self {
            graph,
            spec,
            bindings,
            recorder,
            payloads,
            services,
            options,
            ids,
            restore_state,
        } = self;
        let PipelineBindings {
            mut source,
            stages,
            sinks,
        } = bindings;

        let settings_json = serde_json::to_value(&spec).map_err(|err| {
            EngineError::Canonical(CanonicalError::Canonicalization(err.to_string()))
        })?;
        let config_hash = content_hash(&settings_json)?;
        let mut contract = source
            .schema_contract()
            .unwrap_or_else(SchemaContract::observed);
        let declared = contract.is_locked().then(|| contract.clone());

        let started = services.now();
        let run = recorder.begin_run(RunStart {
            settings_json,
            config_hash,
            canonical_version: CANONICAL_VERSION.to_string(),
            schema_contract: declared,
            started_at: started,
        })?;
        let run_id = run.run_id;

        let mut engine = match Self::register(
            &graph,
            &spec,
            &run_id,
            source.as_ref(),
            stages,
            sinks,
            &recorder,
            &services,
            &options,
            &ids,
            &contract,
        ) {
            Ok(engine) => engine,
            Err(err) => {
                let _ = close_source_only(source.as_mut());
                let _ = recorder.complete_run(&run_id, RunStatus::Failed, services.now(), None);
                return Err(err);
            }
        };
        if let Some(state) = restore_state {
            if let Err(err) = engine.aggregations.restore_from_checkpoint(&state) {
                let _ = close_source_only(source.as_mut());
                let _ = engine.close_all();
                let _ = recorder.complete_run(&run_id, RunStatus::Failed, services.now(), None);
                return Err(err.into());
            }
        }

        let grade = engine.reproducibility_grade(source.determinism());
        let drive_result = drive_rows(
            &run_id,
            &spec,
            source.as_mut(),
            &mut engine,
            &recorder,
            payloads.as_deref(),
            &services,
            &options,
            &ids,
            &mut contract,
        );

        let mut cleanup_errors = close_source_only(source.as_mut());
        cleanup_errors.extend(engine.close_all());

        match drive_result {
            Ok((rows, outcomes)) => {
                recorder.complete_run(
                    &run_id,
                    RunStatus::Completed,
                    services.now(),
                    Some(grade),
                )?;
                Ok(RunReport {
                    run_id,
                    rows,
                    outcomes,
                    cleanup_errors,
                })
            }
            Err(err) => {
                let _ = recorder.complete_run(&run_id, RunStatus::Failed, services.now(), None);
                Err(err)
            }
        }
    }

    /// Registers nodes and edges, returning the prepared engine state.
    #[allow(
        clippy::too_many_arguments,
        reason = "Registration threads every run collaborator through one linear pass."
    )]
    fn register(
        graph: &ExecutionGraph,
        spec: &PipelineSpec,
        run_id: &RunId,
        source: &dyn SourcePlugin,
        stages: Vec<StageBinding>,
        sinks: BTreeMap<String, Box<dyn SinkPlugin>>,
        recorder: &Arc<dyn Recorder>,
        services: &RuntimeServices,
        options: &RunOptions,
        ids: &Arc<IdGenerator>,
        contract: &SchemaContract,
    ) -> Result<EngineState, EngineError> {
        let registered_at = services.now();
        let topo = graph.topological_order()?;
        let transform_ids = graph.get_transform_id_map().clone();

        // Contracts carried along the chain: a stage without a declared
        // contract inherits its upstream neighbour's.
        let mut carried: Option<SchemaContract> =
            contract.is_locked().then(|| contract.clone());
        let mut stage_contracts: Vec<(Option<SchemaContract>, Option<SchemaContract>)> =
            Vec::with_capacity(stages.len());
        for binding in &stages {
            let input = binding.plugin.input_schema().or_else(|| carried.clone());
            let output = binding.plugin.output_schema().or_else(|| input.clone());
            if let (Some(prev), Some(declared_input)) =
                (carried.as_ref(), binding.plugin.input_schema().as_ref())
            {
                let problems = prev.incompatibilities_with(declared_input);
                if !problems.is_empty() {
                    let sequence = stage_contracts.len();
                    let seq_u32 = u32::try_from(sequence).map_or(u32::MAX, |value| value);
                    let to_node = transform_ids
                        .get(&seq_u32)
                        .cloned()
                        .unwrap_or_else(|| NodeId::new("unknown"));
                    return Err(EngineError::ContractIncompatible {
                        from_node: graph.get_source().clone(),
                        to_node,
                        problems,
                    });
                }
            }
            carried = output.clone();
            stage_contracts.push((input, output));
        }
        let sink_contract = carried;

        let mut pending_stages: Vec<Option<StageBinding>> =
            stages.into_iter().map(Some).collect();
        let mut prepared_stages: Vec<BoundStage> = Vec::with_capacity(pending_stages.len());
        let mut bound_sinks: BTreeMap<String, BoundSink> = BTreeMap::new();
        let mut sink_plugins = sinks;

        for node_id in &topo {
            let Some(node) = graph.get_node_info(node_id) else {
                continue;
            };
            let node_config_hash = content_hash(&node.options)?;
            let registration = match node.node_type {
                NodeType::Source => NodeRegistration {
                    run_id: run_id.clone(),
                    node_id: node_id.clone(),
                    plugin_name: node.plugin_name.clone(),
                    node_type: NodeType::Source,
                    plugin_version: source.plugin_version().to_string(),
                    determinism: source.determinism(),
                    config_hash: node_config_hash,
                    config_json: node.options.clone(),
                    sequence_in_pipeline: None,
                    schema_mode: Some(contract.mode.as_str().to_string()),
                    input_contract: None,
                    output_contract: contract.is_locked().then(|| contract.clone()),
                    registered_at,
                },
                NodeType::Transform | NodeType::Gate | NodeType::Aggregation => {
                    let Some(sequence) = node.sequence else {
                        continue;
                    };
                    let index = usize::try_from(sequence).map_or(usize::MAX, |value| value);
                    let Some(binding) = pending_stages.get_mut(index).and_then(Option::take)
                    else {
                        continue;
                    };
                    let (input_contract, output_contract) = stage_contracts
                        .get(index)
                        .cloned()
                        .unwrap_or((None, None));
                    let registration = NodeRegistration {
                        run_id: run_id.clone(),
                        node_id: node_id.clone(),
                        plugin_name: node.plugin_name.clone(),
                        node_type: node.node_type,
                        plugin_version: binding.plugin.plugin_version().to_string(),
                        determinism: binding.plugin.determinism(),
                        config_hash: node_config_hash,
                        config_json: node.options.clone(),
                        sequence_in_pipeline: Some(sequence),
                        schema_mode: None,
                        input_contract,
                        output_contract,
                        registered_at,
                    };
                    let retry = binding
                        .retry
                        .map_or_else(
                            || RetryPolicy::from_settings(options.default_retry),
                            RetryPolicy::from_settings,
                        );
                    prepared_stages.push(BoundStage {
                        node_id: node_id.clone(),
                        plugin: binding.plugin,
                        on_error: binding.on_error,
                        retry,
                        aggregation: binding.aggregation,
                    });
                    registration
                }
                NodeType::Sink => {
                    let Some(sink_name) = node.sink_name.clone() else {
                        continue;
                    };
                    let Some(plugin) = sink_plugins.remove(&sink_name) else {
                        return Err(EngineError::UnknownSink {
                            name: sink_name,
                        });
                    };
                    let registration = NodeRegistration {
                        run_id: run_id.clone(),
                        node_id: node_id.clone(),
                        plugin_name: node.plugin_name.clone(),
                        node_type: NodeType::Sink,
                        plugin_version: plugin.plugin_version().to_string(),
                        determinism: Determinism::Deterministic,
                        config_hash: node_config_hash,
                        config_json: node.options.clone(),
                        sequence_in_pipeline: None,
                        schema_mode: None,
                        input_contract: sink_contract.clone(),
                        output_contract: None,
                        registered_at,
                    };
                    bound_sinks.insert(sink_name, BoundSink {
                        node_id: node_id.clone(),
                        plugin,
                    });
                    registration
                }
            };
            recorder.register_node(registration)?;
        }

        let mut edge_map: BTreeMap<(NodeId, String), EdgeId> = BTreeMap::new();
        for edge in graph.get_edges() {
            let record = recorder.register_edge(
                run_id,
                &edge.from,
                &edge.to,
                &edge.label,
                edge.mode,
                registered_at,
            )?;
            edge_map.insert((edge.from.clone(), edge.label.clone()), record.edge_id);
        }

        let mut route_targets: BTreeMap<(NodeId, String), RouteTarget> = BTreeMap::new();
        let mut aggregations = AggregationExecutor::new(Arc::clone(ids));
        for (index, plugin_spec) in spec.row_plugins.iter().enumerate() {
            let seq = u32::try_from(index).map_or(u32::MAX, |value| value);
            let Some(node_id) = transform_ids.get(&seq).cloned() else {
                continue;
            };
            for (label, target) in &plugin_spec.routes {
                route_targets.insert((node_id.clone(), label.clone()), target.clone());
            }
            if let Some(settings) = &plugin_spec.aggregation {
                aggregations.register_node(node_id, settings.trigger.clone());
            }
        }

        Ok(EngineState {
            source_node_id: graph.get_source().clone(),
            stages: prepared_stages,
            sinks: bound_sinks,
            edge_map,
            route_targets,
            aggregations,
        })
    }
}

// ============================================================================
// SECTION: Engine State
// ============================================================================

/// Registered engine state for one run.
struct EngineState {
    /// Source node identifier.
    source_node_id: NodeId,
    /// Bound row stages in chain order.
    stages: Vec<BoundStage>,
    /// Bound sinks by name.
    sinks: BTreeMap<String, BoundSink>,
    /// `(from node, label)` to edge identifier map.
    edge_map: BTreeMap<(NodeId, String), EdgeId>,
    /// `(gate node, label)` to route target map.
    route_targets: BTreeMap<(NodeId, String), RouteTarget>,
    /// Aggregation executor.
    aggregations: AggregationExecutor,
}

impl EngineState {
    /// Derives the run reproducibility grade from node determinism classes.
    fn reproducibility_grade(&self, source: Determinism) -> String {
        let mut classes = vec![source];
        classes.extend(self.stages.iter().map(|stage| stage.plugin.determinism()));
        if classes.iter().any(|class| *class == Determinism::NonDeterministic) {
            "best_effort".to_string()
        } else if classes.iter().any(|class| *class == Determinism::IoRead) {
            "io_dependent".to_string()
        } else {
            "exact".to_string()
        }
    }

    /// Closes every stage and sink, collecting failures.
    fn close_all(&mut self) -> Vec<String> {
        let mut failures = Vec::new();
        for stage in &mut self.stages {
            if let Err(err) = stage.plugin.close() {
                failures.push(format!("stage {}: {err}", stage.node_id));
            }
        }
        for (name, sink) in &mut self.sinks {
            if let Err(err) = sink.plugin.close() {
                failures.push(format!("sink {name}: {err}"));
            }
        }
        failures
    }
}

/// Closes the source plugin, collecting any failure.
fn close_source_only(source: &mut dyn SourcePlugin) -> Vec<String> {
    match source.close() {
        Ok(()) => Vec::new(),
        Err(err) => vec![format!("source: {err}")],
    }
}

// ============================================================================
// SECTION: Row Streaming
// ============================================================================

/// Streams rows from the source through the processor.
#[allow(
    clippy::too_many_arguments,
    reason = "Streaming threads every run collaborator through one linear pass."
)]
fn drive_rows(
    run_id: &RunId,
    spec: &PipelineSpec,
    source: &mut dyn SourcePlugin,
    engine: &mut EngineState,
    recorder: &Arc<dyn Recorder>,
    payloads: Option<&dyn PayloadStore>,
    services: &RuntimeServices,
    options: &RunOptions,
    ids: &Arc<IdGenerator>,
    contract: &mut SchemaContract,
) -> Result<(u64, BTreeMap<RowOutcome, u64>), EngineError> {
    let mut outcomes: BTreeMap<RowOutcome, u64> = BTreeMap::new();
    let mut rows: u64 = 0;
    let source_node_id = engine.source_node_id.clone();

    loop {
        let mut source_ctx = PluginContext::new(run_id, &source_node_id, services);
        let next = source
            .next_row(&mut source_ctx)
            .map_err(|err| EngineError::SourceFailed(err.to_string()))?;
        let Some(row_data) = next else {
            break;
        };
        let row_index = rows;
        rows += 1;
        let now = services.now();

        let bytes = canonical_json_bytes(&row_data)?;
        let row_hash = hash_bytes(&bytes);
        let data_ref: Option<PayloadRef> = match payloads {
            Some(store) => Some(store.store(&bytes)?),
            None => None,
        };
        let row = recorder.create_row(
            run_id,
            &source_node_id,
            row_index,
            &row_hash,
            data_ref.as_ref(),
            now,
        )?;

        if !contract.is_locked() {
            let locked_now = contract.observe_row(&row_data)?;
            if locked_now {
                recorder.update_run_contract(run_id, contract)?;
            }
        }
        let violations = contract.validate_row(&row_data);
        if violations.is_empty() {
            let token = recorder.create_token(TokenSpawn {
                row_id: row.row_id.clone(),
                parents: Vec::new(),
                branch_name: None,
                fork_group_id: None,
                join_group_id: None,
                expand_group_id: None,
                step_in_pipeline: Some(0),
                created_at: now,
            })?;
            let mut processor = engine_processor(run_id, spec, engine, recorder, services, ids, contract);
            let events = processor.process_token(TokenCursor {
                token_id: token.token_id.clone(),
                row_id: row.row_id.clone(),
                branch_name: None,
                step: 0,
                data: row_data,
            })?;
            for (_, outcome) in events {
                *outcomes.entry(outcome).or_insert(0) += 1;
            }
            if options.checkpoint_enabled {
                save_checkpoint(
                    run_id,
                    engine,
                    recorder,
                    services,
                    &token.token_id,
                    row_index,
                )?;
            }
        } else {
            let outcome = handle_violations(
                run_id,
                spec,
                engine,
                recorder,
                services,
                ids,
                options,
                contract,
                &row.row_id,
                &row_hash,
                row_data,
                &violations,
                now,
            )?;
            *outcomes.entry(outcome).or_insert(0) += 1;
        }
    }

    let mut processor = engine_processor(run_id, spec, engine, recorder, services, ids, contract);
    let events = processor.flush_end_of_source()?;
    for (_, outcome) in events {
        *outcomes.entry(outcome).or_insert(0) += 1;
    }

    Ok((rows, outcomes))
}

/// Builds a processor over the engine state.
fn engine_processor<'a>(
    run_id: &'a RunId,
    spec: &'a PipelineSpec,
    engine: &'a mut EngineState,
    recorder: &'a Arc<dyn Recorder>,
    services: &'a RuntimeServices,
    ids: &'a Arc<IdGenerator>,
    contract: &'a SchemaContract,
) -> Processor<'a> {
    Processor {
        run_id,
        stages: &mut engine.stages,
        sinks: &mut engine.sinks,
        output_sink: &spec.output_sink,
        edge_map: &engine.edge_map,
        route_targets: &engine.route_targets,
        recorder: recorder.as_ref(),
        services,
        aggregations: &mut engine.aggregations,
        ids: ids.as_ref(),
        contract: contract.is_locked().then_some(contract),
    }
}

/// Persists an aggregation checkpoint at a row boundary.
fn save_checkpoint(
    run_id: &RunId,
    engine: &mut EngineState,
    recorder: &Arc<dyn Recorder>,
    services: &RuntimeServices,
    token_id: &TokenId,
    sequence_number: u64,
) -> Result<(), EngineError> {
    let state = engine.aggregations.checkpoint_state()?;
    let aggregation_state_json = (state.node_count > 0).then_some(state.value);
    recorder.save_checkpoint(CheckpointDraft {
        run_id: run_id.clone(),
        token_id: token_id.clone(),
        node_id: engine.source_node_id.clone(),
        sequence_number,
        aggregation_state_json,
        created_at: services.now(),
    })?;
    Ok(())
}

/// Records contract violations and applies the source violation policy.
#[allow(
    clippy::too_many_arguments,
    reason = "Violation handling threads every run collaborator through one linear pass."
)]
fn handle_violations(
    run_id: &RunId,
    spec: &PipelineSpec,
    engine: &mut EngineState,
    recorder: &Arc<dyn Recorder>,
    services: &RuntimeServices,
    ids: &Arc<IdGenerator>,
    options: &RunOptions,
    contract: &SchemaContract,
    row_id: &RowId,
    row_hash: &str,
    row_data: RowData,
    violations: &[ContractViolation],
    now: Timestamp,
) -> Result<RowOutcome, EngineError> {
    let policy = spec.source.on_violation.clone();
    let destination = match &policy {
        RowErrorPolicy::Fail => "failed".to_string(),
        RowErrorPolicy::Discard => "discarded".to_string(),
        RowErrorPolicy::Quarantine { sink } => sink.clone(),
        RowErrorPolicy::Abort => "aborted".to_string(),
    };
    let row_data_json = options
        .keep_violation_row_data
        .then(|| Value::Object(row_data.clone()));
    for violation in violations {
        recorder.record_validation_error(ValidationErrorDraft {
            run_id: run_id.clone(),
            node_id: Some(engine.source_node_id.clone()),
            row_hash: row_hash.to_string(),
            row_data_json: row_data_json.clone(),
            error: format!("contract violation on {}", violation.original_field_name()),
            schema_mode: contract.mode.as_str().to_string(),
            destination: destination.clone(),
            violation_type: Some(violation.violation_type().to_string()),
            original_field_name: Some(violation.original_field_name().to_string()),
            normalized_field_name: Some(violation.normalized_field_name().to_string()),
            expected_type: violation.expected_type().map(|ty| ty.as_str().to_string()),
            actual_type: violation.actual_type().map(|ty| ty.as_str().to_string()),
            created_at: now,
        })?;
    }
    match policy {
        RowErrorPolicy::Fail => Ok(RowOutcome::Failed),
        RowErrorPolicy::Discard => Ok(RowOutcome::Discarded),
        RowErrorPolicy::Quarantine { sink } => {
            let token = recorder.create_token(TokenSpawn {
                row_id: row_id.clone(),
                parents: Vec::new(),
                branch_name: None,
                fork_group_id: None,
                join_group_id: None,
                expand_group_id: None,
                step_in_pipeline: Some(0),
                created_at: now,
            })?;
            let mut processor =
                engine_processor(run_id, spec, engine, recorder, services, ids, contract);
            processor.deliver_to_sink_name(&sink, &token.token_id, 0, &row_data)?;
            Ok(RowOutcome::Quarantined)
        }
        RowErrorPolicy::Abort => Err(EngineError::RowAborted {
            row_id: row_id.clone(),
            message: "source contract violation aborted the run".to_string(),
        }),
    }
}
