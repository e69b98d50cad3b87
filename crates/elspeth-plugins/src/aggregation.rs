// crates/elspeth-plugins/src/aggregation.rs
// ============================================================================
// Module: Elspeth Collect Aggregation
// Description: Reference aggregation for passthrough and reduce flushes.
// Purpose: Exercise the aggregation contract with deterministic batching.
// Dependencies: elspeth-core, serde_json
// ============================================================================

//! ## Overview
//! The collect aggregation echoes its batch in passthrough mode and merges
//! it into one summary record in reduce mode. It carries no state between
//! flushes; all buffering lives in the engine's aggregation executor.

// ============================================================================
// SECTION: Imports
// ============================================================================

use elspeth_core::AggregationOutputMode;
use elspeth_core::AggregationPlugin;
use elspeth_core::Determinism;
use elspeth_core::PipelineRow;
use elspeth_core::PluginContext;
use elspeth_core::RowData;
use elspeth_core::TransformResult;
use serde_json::Value;
use serde_json::json;

// ============================================================================
// SECTION: Aggregation
// ============================================================================

/// Reference aggregation plugin.
pub struct CollectAggregation {
    /// Output arity mode.
    mode: AggregationOutputMode,
}

impl CollectAggregation {
    /// Creates a collect aggregation for the given output mode.
    #[must_use]
    pub const fn new(mode: AggregationOutputMode) -> Self {
        Self {
            mode,
        }
    }
}

impl AggregationPlugin for CollectAggregation {
    fn name(&self) -> &str {
        "collect"
    }

    fn plugin_version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
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
                    Value::Array(
                        rows.into_iter().map(|row| Value::Object(row.into_data())).collect(),
                    ),
                );
                TransformResult::success(merged)
            }
        }
    }
}
