// crates/elspeth-plugins/src/gate.rs
// ============================================================================
// Module: Elspeth Condition Gate
// Description: Configuration-driven routing gate over row fields.
// Purpose: Route rows by ordered comparator rules with recorded reasons.
// Dependencies: elspeth-core, serde, serde_json
// ============================================================================

//! ## Overview
//! The condition gate evaluates ordered comparator rules against row fields.
//! The first matching rule routes the token and records a configuration-gate
//! reason carrying the condition text and its result; no rule matching means
//! the configured default action, which is `continue` unless overridden.

// ============================================================================
// SECTION: Imports
// ============================================================================

use elspeth_core::Comparison;
use elspeth_core::Determinism;
use elspeth_core::GatePlugin;
use elspeth_core::GateResult;
use elspeth_core::PipelineRow;
use elspeth_core::PluginContext;
use elspeth_core::PluginError;
use elspeth_core::RoutingAction;
use elspeth_core::RoutingReason;
use elspeth_core::evaluate_comparison;
use serde::Deserialize;
use serde_json::Value;

// ============================================================================
// SECTION: Options
// ============================================================================

/// One routing rule.
#[derive(Debug, Clone, Deserialize)]
pub struct ConditionRule {
    /// Field to read, by display or normalized name.
    pub field: String,
    /// Comparison operator.
    pub comparison: Comparison,
    /// Expected operand, absent for existence operators.
    pub value: Option<Value>,
    /// Route label to follow when the rule matches.
    pub route: String,
}

/// Condition gate options.
#[derive(Debug, Clone, Deserialize)]
pub struct ConditionGateOptions {
    /// Ordered rules; first match wins.
    pub rules: Vec<ConditionRule>,
    /// Labels forked together when every listed rule matches.
    #[serde(default)]
    pub fork_on_all: Vec<String>,
}

// ============================================================================
// SECTION: Gate
// ============================================================================

/// Configuration-driven routing gate.
pub struct ConditionGate {
    /// Configured options.
    options: ConditionGateOptions,
}

impl ConditionGate {
    /// Builds a condition gate from plugin options.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Failed`] when options are malformed.
    pub fn from_options(options: &Value) -> Result<Self, PluginError> {
        let options: ConditionGateOptions = serde_json::from_value(options.clone())
            .map_err(|err| PluginError::Failed(format!("condition gate options: {err}")))?;
        if options.rules.is_empty() && options.fork_on_all.is_empty() {
            return Err(PluginError::Failed(
                "condition gate requires at least one rule".to_string(),
            ));
        }
        Ok(Self {
            options,
        })
    }

    /// Renders the condition text recorded with routing reasons.
    fn condition_text(rule: &ConditionRule) -> String {
        match &rule.value {
            Some(value) => format!("{} {} {value}", rule.field, rule.comparison.as_str()),
            None => format!("{} {}", rule.field, rule.comparison.as_str()),
        }
    }
}

impl GatePlugin for ConditionGate {
    fn name(&self) -> &str {
        "condition_gate"
    }

    fn plugin_version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn determinism(&self) -> Determinism {
        Determinism::Deterministic
    }

    fn evaluate(
        &mut self,
        row: PipelineRow,
        _ctx: &mut PluginContext<'_>,
    ) -> Result<GateResult, PluginError> {
        if !self.options.fork_on_all.is_empty() {
            let all_match = self.options.rules.iter().all(|rule| {
                evaluate_comparison(rule.comparison, row.get(&rule.field), rule.value.as_ref())
            });
            if all_match {
                let labels = self.options.fork_on_all.clone();
                return Ok(GateResult {
                    row: row.into_data(),
                    action: RoutingAction::Fork {
                        labels,
                    },
                    reason: None,
                });
            }
        }
        for rule in &self.options.rules {
            let matched =
                evaluate_comparison(rule.comparison, row.get(&rule.field), rule.value.as_ref());
            if matched {
                let reason = RoutingReason::ConfigGate {
                    condition: Self::condition_text(rule),
                    result: true,
                };
                return Ok(GateResult {
                    row: row.into_data(),
                    action: RoutingAction::Route {
                        label: rule.route.clone(),
                    },
                    reason: Some(reason),
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

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    reason = "Test-only panic-based assertions are permitted."
)]
mod tests {
    use std::sync::Arc;

    use elspeth_core::GatePlugin;
    use elspeth_core::ManualClock;
    use elspeth_core::PipelineRow;
    use elspeth_core::PluginContext;
    use elspeth_core::RoutingAction;
    use elspeth_core::RoutingReason;
    use elspeth_core::RowData;
    use elspeth_core::RuntimeServices;
    use elspeth_core::contracts::NodeId;
    use elspeth_core::contracts::RunId;
    use serde_json::json;

    use super::ConditionGate;

    fn evaluate(gate: &mut ConditionGate, pairs: &[(&str, serde_json::Value)]) -> RoutingAction {
        let mut data = RowData::new();
        for (key, value) in pairs {
            data.insert((*key).to_string(), value.clone());
        }
        let services = RuntimeServices::new(Arc::new(ManualClock::starting_at(0)));
        let run_id = RunId::new("run-1");
        let node_id = NodeId::new("gate_condition_gate_0001");
        let mut ctx = PluginContext::new(&run_id, &node_id, &services);
        gate.evaluate(PipelineRow::bare(data), &mut ctx).expect("evaluate").action
    }

    #[test]
    fn first_matching_rule_routes_with_config_reason() {
        let mut gate = ConditionGate::from_options(&json!({
            "rules": [
                {"field": "score", "comparison": "greater_than", "value": 90, "route": "flagged"},
                {"field": "score", "comparison": "greater_than", "value": 50, "route": "review"}
            ]
        }))
        .expect("gate");

        let action = evaluate(&mut gate, &[("score", json!(95))]);
        assert_eq!(action, RoutingAction::Route {
            label: "flagged".to_string(),
        });
        let action = evaluate(&mut gate, &[("score", json!(60))]);
        assert_eq!(action, RoutingAction::Route {
            label: "review".to_string(),
        });
        let action = evaluate(&mut gate, &[("score", json!(10))]);
        assert_eq!(action, RoutingAction::Continue);
    }

    #[test]
    fn recorded_reason_carries_condition_text() {
        let mut gate = ConditionGate::from_options(&json!({
            "rules": [
                {"field": "status", "comparison": "equals", "value": "bad", "route": "review"}
            ]
        }))
        .expect("gate");
        let mut data = RowData::new();
        data.insert("status".to_string(), json!("bad"));
        let services = RuntimeServices::new(Arc::new(ManualClock::starting_at(0)));
        let run_id = RunId::new("run-1");
        let node_id = NodeId::new("gate_condition_gate_0001");
        let mut ctx = PluginContext::new(&run_id, &node_id, &services);
        let result = gate.evaluate(PipelineRow::bare(data), &mut ctx).expect("evaluate");
        let Some(RoutingReason::ConfigGate { condition, result: matched }) = result.reason
        else {
            panic!("expected a config gate reason");
        };
        assert!(condition.contains("status equals"));
        assert!(matched);
    }

    #[test]
    fn fork_fires_when_every_rule_matches() {
        let mut gate = ConditionGate::from_options(&json!({
            "rules": [
                {"field": "flag_a", "comparison": "exists", "route": "a"},
                {"field": "flag_b", "comparison": "exists", "route": "b"}
            ],
            "fork_on_all": ["a", "b"]
        }))
        .expect("gate");
        let action = evaluate(&mut gate, &[("flag_a", json!(1)), ("flag_b", json!(1))]);
        assert_eq!(action, RoutingAction::Fork {
            labels: vec!["a".to_string(), "b".to_string()],
        });
        let action = evaluate(&mut gate, &[("flag_a", json!(1))]);
        assert_eq!(action, RoutingAction::Route {
            label: "a".to_string(),
        });
    }
}
