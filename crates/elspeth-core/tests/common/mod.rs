// crates/elspeth-core/tests/common/mod.rs
// ============================================================================
// Module: Engine Test Fixtures
// Description: Mock plugins and builders shared by core integration tests.
// ============================================================================
//! ## Overview
//! Deterministic source, transform, gate, aggregation, and sink mocks plus
//! specification builders used across the engine test suites.

#![allow(
    dead_code,
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only fixtures; not every suite uses every helper."
)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use elspeth_core::AggregationOutputMode;
use elspeth_core::AggregationPlugin;
use elspeth_core::AggregationSettings;
use elspeth_core::ArtifactDescriptor;
use elspeth_core::Determinism;
use elspeth_core::GatePlugin;
use elspeth_core::GateResult;
use elspeth_core::ManualClock;
use elspeth_core::PipelineRow;
use elspeth_core::PipelineSpec;
use elspeth_core::PluginContext;
use elspeth_core::PluginError;
use elspeth_core::RoutingAction;
use elspeth_core::RoutingReason;
use elspeth_core::RowData;
use elspeth_core::RowErrorPolicy;
use elspeth_core::RowPluginSpec;
use elspeth_core::RuntimeServices;
use elspeth_core::SchemaContract;
use elspeth_core::SinkPlugin;
use elspeth_core::SinkSpec;
use elspeth_core::SourcePlugin;
use elspeth_core::SourceSpec;
use elspeth_core::StageKind;
use elspeth_core::TransformErrorCategory;
use elspeth_core::TransformErrorReason;
use elspeth_core::TransformPlugin;
use elspeth_core::TransformResult;
use elspeth_core::TriggerSpec;
use elspeth_core::TriggerType;
use elspeth_core::hashing;
use serde_json::Value;
use serde_json::json;

/// Builds runtime services over a manual clock starting at a fixed epoch.
pub fn test_services() -> RuntimeServices {
    RuntimeServices::new(Arc::new(ManualClock::starting_at(1_700_000_000_000)))
}

/// Builds a row payload from key/value pairs.
pub fn row(pairs: &[(&str, Value)]) -> RowData {
    let mut data = RowData::new();
    for (key, value) in pairs {
        data.insert((*key).to_string(), value.clone());
    }
    data
}

// ============================================================================
// SECTION: Source
// ============================================================================

/// Source emitting a fixed list of rows, optionally with a declared contract.
pub struct ValueSource {
    rows: Vec<RowData>,
    cursor: usize,
    contract: Option<SchemaContract>,
}

impl ValueSource {
    pub fn new(rows: Vec<RowData>) -> Self {
        Self {
            rows,
            cursor: 0,
            contract: None,
        }
    }

    pub fn with_contract(mut self, contract: SchemaContract) -> Self {
        self.contract = Some(contract);
        self
    }
}

impl SourcePlugin for ValueSource {
    fn name(&self) -> &str {
        "value_source"
    }

    fn plugin_version(&self) -> &str {
        "1.0.0"
    }

    fn determinism(&self) -> Determinism {
        Determinism::Deterministic
    }

    fn schema_contract(&self) -> Option<SchemaContract> {
        self.contract.clone()
    }

    fn next_row(&mut self, _ctx: &mut PluginContext<'_>) -> Result<Option<RowData>, PluginError> {
        let next = self.rows.get(self.cursor).cloned();
        if next.is_some() {
            self.cursor += 1;
        }
        Ok(next)
    }
}

// ============================================================================
// SECTION: Transforms
// ============================================================================

/// Transform returning every row unchanged.
pub struct IdentityTransform;

impl TransformPlugin for IdentityTransform {
    fn name(&self) -> &str {
        "identity"
    }

    fn plugin_version(&self) -> &str {
        "1.0.0"
    }

    fn determinism(&self) -> Determinism {
        Determinism::Deterministic
    }

    fn process(&mut self, row: PipelineRow, _ctx: &mut PluginContext<'_>) -> TransformResult {
        TransformResult::success(row.into_data())
    }
}

/// Transform annotating each row with a constant marker field.
pub struct AnnotateTransform {
    pub field: String,
    pub value: Value,
}

impl TransformPlugin for AnnotateTransform {
    fn name(&self) -> &str {
        "annotate"
    }

    fn plugin_version(&self) -> &str {
        "1.0.0"
    }

    fn determinism(&self) -> Determinism {
        Determinism::Deterministic
    }

    fn process(&mut self, row: PipelineRow, _ctx: &mut PluginContext<'_>) -> TransformResult {
        let mut row = row;
        if row.set(&self.field, self.value.clone()).is_err() {
            return TransformResult::error(TransformErrorReason::fatal("bad field name"));
        }
        TransformResult::success(row.into_data())
    }
}

/// Transform failing a fixed number of times before succeeding.
pub struct FlakyTransform {
    pub failures_remaining: u32,
    pub category: TransformErrorCategory,
    pub invocations: Arc<Mutex<u32>>,
}

impl FlakyTransform {
    pub fn new(failures: u32, category: TransformErrorCategory) -> Self {
        Self {
            failures_remaining: failures,
            category,
            invocations: Arc::new(Mutex::new(0)),
        }
    }
}

impl TransformPlugin for FlakyTransform {
    fn name(&self) -> &str {
        "flaky"
    }

    fn plugin_version(&self) -> &str {
        "1.0.0"
    }

    fn determinism(&self) -> Determinism {
        Determinism::NonDeterministic
    }

    fn process(&mut self, row: PipelineRow, _ctx: &mut PluginContext<'_>) -> TransformResult {
        *self.invocations.lock().expect("invocations lock") += 1;
        if self.failures_remaining > 0 {
            self.failures_remaining -= 1;
            return TransformResult::error(TransformErrorReason::new(
                self.category,
                "induced failure",
            ));
        }
        TransformResult::success(row.into_data())
    }
}

// ============================================================================
// SECTION: Gates
// ============================================================================

/// Gate routing by substring matches on a text field.
pub struct KeywordGate {
    pub field: String,
    pub routes: Vec<(String, String)>,
}

impl GatePlugin for KeywordGate {
    fn name(&self) -> &str {
        "keyword_gate"
    }

    fn plugin_version(&self) -> &str {
        "1.0.0"
    }

    fn determinism(&self) -> Determinism {
        Determinism::Deterministic
    }

    fn evaluate(
        &mut self,
        row: PipelineRow,
        _ctx: &mut PluginContext<'_>,
    ) -> Result<GateResult, PluginError> {
        let text = row.get(&self.field).and_then(Value::as_str).unwrap_or("").to_string();
        for (keyword, label) in &self.routes {
            if text.contains(keyword.as_str()) {
                return Ok(GateResult {
                    row: row.into_data(),
                    action: RoutingAction::Route {
                        label: label.clone(),
                    },
                    reason: Some(RoutingReason::PluginGate {
                        rule: format!("contains {keyword:?}"),
                        matched_value: json!(text),
                        threshold: None,
                        field: Some(self.field.clone()),
                        comparison: Some("contains".to_string()),
                    }),
                });
            }
        }
        Ok(GateResult {
            row: row.into_data(),
            action: RoutingAction::Continue,
            reason: None,
        })
    }
}

/// Gate copying every row to a fixed set of labels.
pub struct FanoutGate {
    pub labels: Vec<String>,
}

impl GatePlugin for FanoutGate {
    fn name(&self) -> &str {
        "fanout_gate"
    }

    fn plugin_version(&self) -> &str {
        "1.0.0"
    }

    fn determinism(&self) -> Determinism {
        Determinism::Deterministic
    }

    fn evaluate(
        &mut self,
        row: PipelineRow,
        _ctx: &mut PluginContext<'_>,
    ) -> Result<GateResult, PluginError> {
        Ok(GateResult {
            row: row.into_data(),
            action: RoutingAction::Fork {
                labels: self.labels.clone(),
            },
            reason: None,
        })
    }
}

// ============================================================================
// SECTION: Aggregations
// ============================================================================

/// Aggregation echoing its batch (passthrough) or merging it (reduce).
pub struct CollectAggregation {
    pub mode: AggregationOutputMode,
}

impl AggregationPlugin for CollectAggregation {
    fn name(&self) -> &str {
        "collect"
    }

    fn plugin_version(&self) -> &str {
        "1.0.0"
    }

    fn determinism(&self) -> Determinism {
        Determinism::Deterministic
    }

    fn process(
        &mut self,
        rows: Vec<PipelineRow>,
        _ctx: &mut PluginContext<'_>,
    ) -> TransformResult {
        match self.mode {
            AggregationOutputMode::Passthrough => TransformResult::success_multi(
                rows.into_iter().map(PipelineRow::into_data).collect(),
            ),
            AggregationOutputMode::Reduce => {
                let mut merged = RowData::new();
                merged.insert("count".to_string(), json!(rows.len()));
                merged.insert(
                    "items".to_string(),
                    Value::Array(rows.into_iter().map(|row| Value::Object(row.into_data())).collect()),
                );
                TransformResult::success(merged)
            }
        }
    }
}

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Shared row store written by [`MemorySink`].
pub type SinkLog = Arc<Mutex<Vec<RowData>>>;

/// Sink collecting rows into a shared vector.
pub struct MemorySink {
    pub log: SinkLog,
}

impl MemorySink {
    pub fn with_log() -> (Self, SinkLog) {
        let log: SinkLog = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                log: Arc::clone(&log),
            },
            log,
        )
    }
}

impl SinkPlugin for MemorySink {
    fn name(&self) -> &str {
        "memory_sink"
    }

    fn plugin_version(&self) -> &str {
        "1.0.0"
    }

    fn write(
        &mut self,
        rows: &[RowData],
        _ctx: &mut PluginContext<'_>,
    ) -> Result<ArtifactDescriptor, PluginError> {
        let mut log = self.log.lock().map_err(|_| PluginError::Io("lock".to_string()))?;
        log.extend(rows.iter().cloned());
        let content_hash = hashing::content_hash(&rows)
            .map_err(|err| PluginError::Failed(err.to_string()))?;
        Ok(ArtifactDescriptor {
            artifact_type: "memory".to_string(),
            path_or_uri: format!("memory://{}", log.len()),
            content_hash,
            size_bytes: rows.len() as u64,
        })
    }
}

// ============================================================================
// SECTION: Specification Builders
// ============================================================================

/// Builds a source specification with empty options.
pub fn source_spec(on_violation: RowErrorPolicy) -> SourceSpec {
    SourceSpec {
        plugin: "value_source".to_string(),
        options: json!({}),
        on_violation,
    }
}

/// Builds a transform plugin specification.
pub fn transform_spec(plugin: &str) -> RowPluginSpec {
    RowPluginSpec {
        plugin: plugin.to_string(),
        kind: StageKind::Transform,
        options: json!({}),
        routes: BTreeMap::new(),
        aggregation: None,
        on_error: RowErrorPolicy::Fail,
        retry: None,
        batch: None,
    }
}

/// Builds a gate plugin specification with sink routes.
pub fn gate_spec(plugin: &str, routes: &[(&str, &str)]) -> RowPluginSpec {
    RowPluginSpec {
        plugin: plugin.to_string(),
        kind: StageKind::Gate,
        options: json!({}),
        routes: routes
            .iter()
            .map(|(label, sink)| {
                ((*label).to_string(), elspeth_core::RouteTarget::Sink((*sink).to_string()))
            })
            .collect(),
        aggregation: None,
        on_error: RowErrorPolicy::Fail,
        retry: None,
        batch: None,
    }
}

/// Builds an aggregation plugin specification.
pub fn aggregation_spec(
    plugin: &str,
    trigger_type: TriggerType,
    threshold: Option<usize>,
    mode: AggregationOutputMode,
) -> RowPluginSpec {
    RowPluginSpec {
        plugin: plugin.to_string(),
        kind: StageKind::Aggregation,
        options: json!({}),
        routes: BTreeMap::new(),
        aggregation: Some(AggregationSettings {
            trigger: TriggerSpec {
                trigger_type,
                threshold,
                timeout_ms: None,
            },
            output_mode: mode,
        }),
        on_error: RowErrorPolicy::Fail,
        retry: None,
        batch: None,
    }
}

/// Builds a pipeline specification over named memory sinks.
pub fn pipeline_spec(
    row_plugins: Vec<RowPluginSpec>,
    sink_names: &[&str],
    output_sink: &str,
) -> PipelineSpec {
    PipelineSpec {
        source: source_spec(RowErrorPolicy::Fail),
        row_plugins,
        sinks: sink_names
            .iter()
            .map(|name| {
                ((*name).to_string(), SinkSpec {
                    plugin: "memory_sink".to_string(),
                    options: json!({}),
                })
            })
            .collect(),
        output_sink: output_sink.to_string(),
    }
}
