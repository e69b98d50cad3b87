// crates/elspeth-core/tests/schema_contract.rs
// ============================================================================
// Module: Schema Contract Tests
// Description: Verifies field resolution, type locking, and version hashing.
// ============================================================================
//! ## Overview
//! Covers name normalization, the three contract modes, violation reporting,
//! lock idempotence, and version-hash stability across serialization round
//! trips.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use elspeth_core::ContractViolation;
use elspeth_core::FieldContract;
use elspeth_core::FieldSource;
use elspeth_core::FieldType;
use elspeth_core::RowData;
use elspeth_core::SchemaContract;
use elspeth_core::SchemaError;
use elspeth_core::normalize_field_name;
use serde_json::json;

fn row(pairs: &[(&str, serde_json::Value)]) -> RowData {
    let mut data = RowData::new();
    for (key, value) in pairs {
        data.insert((*key).to_string(), value.clone());
    }
    data
}

// ============================================================================
// SECTION: Name Normalization
// ============================================================================

#[test]
fn normalization_lowercases_and_maps_punctuation() {
    assert_eq!(normalize_field_name("Customer Name").expect("name"), "customer_name");
    assert_eq!(normalize_field_name("  Amount (USD)  ").expect("name"), "amount_usd");
    assert_eq!(normalize_field_name("a--b__c").expect("name"), "a_b_c");
}

#[test]
fn normalization_collapses_underscore_runs() {
    assert_eq!(normalize_field_name("a !! b").expect("name"), "a_b");
}

#[test]
fn normalization_rejects_empty_results() {
    let err = normalize_field_name("@#$%").expect_err("must reject");
    assert!(matches!(err, SchemaError::EmptyFieldName { .. }));
}

#[test]
fn normalization_preserves_original_for_display() {
    let field = FieldContract::declared("Customer Name", FieldType::String, true).expect("field");
    assert_eq!(field.original_name, "Customer Name");
    assert_eq!(field.normalized_name, "customer_name");
}

// ============================================================================
// SECTION: Fixed Mode
// ============================================================================

fn fixed_contract() -> SchemaContract {
    SchemaContract::fixed(vec![
        FieldContract::declared("id", FieldType::Integer, true).expect("id"),
        FieldContract::declared("amount", FieldType::Integer, true).expect("amount"),
    ])
    .expect("contract")
}

#[test]
fn fixed_contracts_are_locked_at_construction() {
    assert!(fixed_contract().is_locked());
}

#[test]
fn fixed_mode_reports_missing_required_fields() {
    let contract = fixed_contract();
    let violations = contract.validate_row(&row(&[("id", json!(1))]));
    assert_eq!(violations.len(), 1);
    assert!(matches!(&violations[0], ContractViolation::MissingField { field } if field.normalized_name == "amount"));
}

#[test]
fn fixed_mode_reports_type_mismatches_with_values() {
    let contract = fixed_contract();
    let violations = contract.validate_row(&row(&[("id", json!(1)), ("amount", json!("nope"))]));
    assert_eq!(violations.len(), 1);
    let ContractViolation::TypeMismatch {
        expected,
        actual,
        actual_value,
        ..
    } = &violations[0]
    else {
        panic!("expected a type mismatch");
    };
    assert_eq!(*expected, FieldType::Integer);
    assert_eq!(*actual, FieldType::String);
    assert_eq!(actual_value, &json!("nope"));
}

#[test]
fn fixed_mode_rejects_extra_fields() {
    let contract = fixed_contract();
    let violations =
        contract.validate_row(&row(&[("id", json!(1)), ("amount", json!(2)), ("extra", json!(3))]));
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].violation_type(), "extra_field");
}

// ============================================================================
// SECTION: Observed Mode
// ============================================================================

#[test]
fn observed_mode_locks_on_first_row() {
    let mut contract = SchemaContract::observed();
    assert!(!contract.is_locked());
    let locked = contract
        .observe_row(&row(&[("id", json!(7)), ("name", json!("ada"))]))
        .expect("observe");
    assert!(locked);
    assert!(contract.is_locked());
    assert_eq!(contract.fields.len(), 2);
    assert!(contract.fields.iter().all(|field| field.source == FieldSource::Inferred));
}

#[test]
fn observed_lock_is_idempotent_across_rows() {
    let mut contract = SchemaContract::observed();
    contract.observe_row(&row(&[("id", json!(1))])).expect("first");
    let hash_after_first = contract.version_hash().expect("hash one");

    for index in 2..=10 {
        contract.observe_row(&row(&[("id", json!(index))])).expect("later rows");
        assert_eq!(contract.version_hash().expect("hash"), hash_after_first);
    }
}

#[test]
fn observed_mode_validates_later_rows_against_lock() {
    let mut contract = SchemaContract::observed();
    contract.observe_row(&row(&[("id", json!(1))])).expect("observe");
    let violations = contract.validate_row(&row(&[("id", json!("seven"))]));
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].violation_type(), "type_mismatch");
}

// ============================================================================
// SECTION: Flexible Mode
// ============================================================================

#[test]
fn flexible_mode_enforces_declared_and_infers_extras() {
    let mut contract = SchemaContract::flexible(vec![
        FieldContract::declared("id", FieldType::Integer, true).expect("id"),
    ])
    .expect("contract");
    contract
        .observe_row(&row(&[("id", json!(1)), ("note", json!("hello"))]))
        .expect("observe");
    assert!(contract.is_locked());

    let inferred = contract.resolve("note").expect("note field");
    assert_eq!(inferred.source, FieldSource::Inferred);
    assert_eq!(inferred.field_type, FieldType::String);

    let violations = contract.validate_row(&row(&[("note", json!("x"))]));
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].violation_type(), "missing_field");
}

#[test]
fn flexible_mode_tolerates_post_lock_extras() {
    let mut contract = SchemaContract::flexible(vec![
        FieldContract::declared("id", FieldType::Integer, true).expect("id"),
    ])
    .expect("contract");
    contract.observe_row(&row(&[("id", json!(1))])).expect("observe");
    let violations = contract.validate_row(&row(&[("id", json!(2)), ("later", json!(true))]));
    assert!(violations.is_empty());
}

// ============================================================================
// SECTION: Version Hash
// ============================================================================

#[test]
fn version_hash_is_stable_across_serialization_round_trips() {
    let contract = fixed_contract();
    let original_hash = contract.version_hash().expect("hash");

    let snapshot = contract.to_json().expect("snapshot");
    let restored = SchemaContract::from_json(&snapshot).expect("restore");

    assert_eq!(restored, contract);
    assert_eq!(restored.version_hash().expect("restored hash"), original_hash);
}

#[test]
fn version_hash_distinguishes_field_order() {
    let forward = SchemaContract::fixed(vec![
        FieldContract::declared("a", FieldType::Integer, true).expect("a"),
        FieldContract::declared("b", FieldType::Integer, true).expect("b"),
    ])
    .expect("forward");
    let reversed = SchemaContract::fixed(vec![
        FieldContract::declared("b", FieldType::Integer, true).expect("b"),
        FieldContract::declared("a", FieldType::Integer, true).expect("a"),
    ])
    .expect("reversed");
    assert_ne!(
        forward.version_hash().expect("forward hash"),
        reversed.version_hash().expect("reversed hash")
    );
}

// ============================================================================
// SECTION: Compatibility
// ============================================================================

#[test]
fn integer_output_satisfies_float_requirement() {
    let upstream = SchemaContract::fixed(vec![
        FieldContract::declared("score", FieldType::Integer, true).expect("score"),
    ])
    .expect("upstream");
    let downstream = SchemaContract::fixed(vec![
        FieldContract::declared("score", FieldType::Float, true).expect("score"),
    ])
    .expect("downstream");
    assert!(upstream.incompatibilities_with(&downstream).is_empty());
}

#[test]
fn missing_required_downstream_field_is_reported() {
    let upstream = SchemaContract::fixed(vec![
        FieldContract::declared("id", FieldType::Integer, true).expect("id"),
    ])
    .expect("upstream");
    let downstream = SchemaContract::fixed(vec![
        FieldContract::declared("score", FieldType::Float, true).expect("score"),
    ])
    .expect("downstream");
    let problems = upstream.incompatibilities_with(&downstream);
    assert_eq!(problems.len(), 1);
    assert!(problems[0].contains("score"));
}

#[test]
fn duplicate_normalized_names_are_rejected() {
    let result = SchemaContract::fixed(vec![
        FieldContract::declared("Customer Name", FieldType::String, true).expect("one"),
        FieldContract::declared("customer_name", FieldType::String, true).expect("two"),
    ]);
    assert!(matches!(result, Err(SchemaError::DuplicateField { .. })));
}
