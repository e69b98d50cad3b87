// crates/elspeth-core/src/runtime/comparator.rs
// ============================================================================
// Module: Elspeth Comparator Logic
// Description: Deterministic comparison of row values for config gates.
// Purpose: Convert field values into routing predicates without float drift.
// Dependencies: bigdecimal, serde, serde_json
// ============================================================================

//! ## Overview
//! Configuration-driven gates compare row fields against configured values.
//! Missing or incomparable operands evaluate false to preserve fail-closed
//! routing. Numeric ordering is exact: integers compare as integers and
//! decimals through arbitrary-precision decimal arithmetic, never through
//! binary floats.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::str::FromStr;

use bigdecimal::BigDecimal;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Number;
use serde_json::Value;

// ============================================================================
// SECTION: Comparison Operators
// ============================================================================

/// Comparison operators available to configuration gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    /// Values are equal.
    Equals,
    /// Values are not equal.
    NotEquals,
    /// Left is strictly greater.
    GreaterThan,
    /// Left is greater or equal.
    GreaterThanOrEqual,
    /// Left is strictly less.
    LessThan,
    /// Left is less or equal.
    LessThanOrEqual,
    /// String or array containment.
    Contains,
    /// Membership in a configured set.
    InSet,
    /// Field is present and non-null.
    Exists,
    /// Field is absent or null.
    NotExists,
}

impl Comparison {
    /// Returns the stable configured form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Equals => "equals",
            Self::NotEquals => "not_equals",
            Self::GreaterThan => "greater_than",
            Self::GreaterThanOrEqual => "greater_than_or_equal",
            Self::LessThan => "less_than",
            Self::LessThanOrEqual => "less_than_or_equal",
            Self::Contains => "contains",
            Self::InSet => "in_set",
            Self::Exists => "exists",
            Self::NotExists => "not_exists",
        }
    }
}

// ============================================================================
// SECTION: Comparator Evaluation
// ============================================================================

/// Evaluates a comparison against an optional field value.
///
/// Missing or incomparable operands evaluate false, except for the
/// existence operators which are defined over absence.
#[must_use]
pub fn evaluate_comparison(
    comparison: Comparison,
    value: Option<&Value>,
    expected: Option<&Value>,
) -> bool {
    let present = matches!(value, Some(value) if !value.is_null());
    match comparison {
        Comparison::Exists => present,
        Comparison::NotExists => !present,
        _ => {
            let (Some(value), Some(expected)) = (value, expected) else {
                return false;
            };
            evaluate_value_comparison(comparison, value, expected)
        }
    }
}

/// Evaluates value-to-value comparisons.
fn evaluate_value_comparison(comparison: Comparison, value: &Value, expected: &Value) -> bool {
    match comparison {
        Comparison::Equals => value == expected,
        Comparison::NotEquals => value != expected,
        Comparison::GreaterThan
        | Comparison::GreaterThanOrEqual
        | Comparison::LessThan
        | Comparison::LessThanOrEqual => compare_numbers(comparison, value, expected),
        Comparison::Contains => compare_contains(value, expected),
        Comparison::InSet => compare_in_set(value, expected),
        Comparison::Exists | Comparison::NotExists => false,
    }
}

/// Compares numeric JSON values with exact decimal semantics.
fn compare_numbers(comparison: Comparison, left: &Value, right: &Value) -> bool {
    let (Some(left), Some(right)) = (left.as_number(), right.as_number()) else {
        return false;
    };
    let Some(ordering) = numeric_cmp(left, right) else {
        return false;
    };
    match comparison {
        Comparison::GreaterThan => ordering.is_gt(),
        Comparison::GreaterThanOrEqual => ordering.is_ge(),
        Comparison::LessThan => ordering.is_lt(),
        Comparison::LessThanOrEqual => ordering.is_le(),
        Comparison::Equals
        | Comparison::NotEquals
        | Comparison::Contains
        | Comparison::InSet
        | Comparison::Exists
        | Comparison::NotExists => false,
    }
}

/// Evaluates containment semantics for JSON values.
fn compare_contains(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::String(haystack), Value::String(needle)) => haystack.contains(needle),
        (Value::Array(haystack), Value::Array(needle)) => {
            needle.iter().all(|item| haystack.contains(item))
        }
        (Value::Array(haystack), item) => haystack.contains(item),
        _ => false,
    }
}

/// Evaluates set membership for JSON values.
fn compare_in_set(value: &Value, expected: &Value) -> bool {
    match expected {
        Value::Array(values) => values.contains(value),
        _ => false,
    }
}

/// Compares two JSON numbers exactly.
///
/// Integer pairs compare as integers; any decimal operand promotes both
/// sides to arbitrary-precision decimals parsed from their literal text.
fn numeric_cmp(left: &Number, right: &Number) -> Option<std::cmp::Ordering> {
    if let (Some(left), Some(right)) = (left.as_i64(), right.as_i64()) {
        return Some(left.cmp(&right));
    }
    if let (Some(left), Some(right)) = (left.as_u64(), right.as_u64()) {
        return Some(left.cmp(&right));
    }
    let left = BigDecimal::from_str(&left.to_string()).ok()?;
    let right = BigDecimal::from_str(&right.to_string()).ok()?;
    Some(left.cmp(&right))
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
    use serde_json::json;

    use super::Comparison;
    use super::evaluate_comparison;

    #[test]
    fn integer_ordering_is_exact() {
        assert!(evaluate_comparison(
            Comparison::GreaterThan,
            Some(&json!(10)),
            Some(&json!(9))
        ));
        assert!(!evaluate_comparison(
            Comparison::GreaterThan,
            Some(&json!(9)),
            Some(&json!(9))
        ));
    }

    #[test]
    fn decimal_ordering_avoids_float_drift() {
        assert!(evaluate_comparison(
            Comparison::GreaterThan,
            Some(&json!(0.3)),
            Some(&json!(0.1))
        ));
        assert!(evaluate_comparison(
            Comparison::LessThanOrEqual,
            Some(&json!(0.1)),
            Some(&json!(0.1))
        ));
    }

    #[test]
    fn mixed_integer_and_decimal_compare() {
        assert!(evaluate_comparison(
            Comparison::LessThan,
            Some(&json!(2)),
            Some(&json!(2.5))
        ));
    }

    #[test]
    fn missing_operands_evaluate_false() {
        assert!(!evaluate_comparison(Comparison::Equals, None, Some(&json!(1))));
        assert!(!evaluate_comparison(Comparison::GreaterThan, Some(&json!(1)), None));
    }

    #[test]
    fn existence_operators_are_defined_over_absence() {
        assert!(evaluate_comparison(Comparison::NotExists, None, None));
        assert!(evaluate_comparison(Comparison::NotExists, Some(&json!(null)), None));
        assert!(evaluate_comparison(Comparison::Exists, Some(&json!(0)), None));
    }

    #[test]
    fn containment_covers_strings_arrays_and_scalars() {
        assert!(evaluate_comparison(
            Comparison::Contains,
            Some(&json!("alarming text")),
            Some(&json!("alarm"))
        ));
        assert!(evaluate_comparison(
            Comparison::Contains,
            Some(&json!(["a", "b", "c"])),
            Some(&json!("b"))
        ));
        assert!(!evaluate_comparison(
            Comparison::Contains,
            Some(&json!(7)),
            Some(&json!(7))
        ));
    }

    #[test]
    fn set_membership_requires_an_array() {
        assert!(evaluate_comparison(
            Comparison::InSet,
            Some(&json!("blue")),
            Some(&json!(["red", "blue"]))
        ));
        assert!(!evaluate_comparison(
            Comparison::InSet,
            Some(&json!("blue")),
            Some(&json!("blue"))
        ));
    }
}
