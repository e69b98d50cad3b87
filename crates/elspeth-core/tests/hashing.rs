// crates/elspeth-core/tests/hashing.rs
// ============================================================================
// Module: Canonical Codec Tests
// Description: Verifies canonical JSON hashing behavior.
// ============================================================================
//! ## Overview
//! Ensures canonical hashing is deterministic across key ordering and numeric
//! representation, rejects non-finite floats, and produces known SHA-256
//! values for golden inputs.

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

use elspeth_core::hashing::CanonicalError;
use elspeth_core::hashing::canonical_json_bytes;
use elspeth_core::hashing::canonical_json_bytes_with_limit;
use elspeth_core::hashing::content_hash;
use elspeth_core::hashing::decode_binary;
use elspeth_core::hashing::encode_binary;
use elspeth_core::hashing::hash_bytes;
use proptest::prelude::any;
use proptest::prelude::proptest;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;

#[test]
fn canonical_hash_is_order_independent_for_maps() {
    let mut map_a = Map::new();
    map_a.insert("b".to_string(), json!(2));
    map_a.insert("a".to_string(), json!(1));

    let mut map_b = Map::new();
    map_b.insert("a".to_string(), json!(1));
    map_b.insert("b".to_string(), json!(2));

    let hash_a = content_hash(&Value::Object(map_a)).expect("hash a");
    let hash_b = content_hash(&Value::Object(map_b)).expect("hash b");

    assert_eq!(hash_a, hash_b);
}

#[test]
fn canonical_bytes_have_no_insignificant_whitespace() {
    let bytes = canonical_json_bytes(&json!({"a": 1, "b": [1, 2]})).expect("bytes");
    let text = String::from_utf8(bytes).expect("utf-8");
    assert_eq!(text, r#"{"a":1,"b":[1,2]}"#);
}

#[derive(Serialize)]
struct FloatWrapper {
    value: f64,
}

#[test]
fn canonical_hash_rejects_nan() {
    let value = FloatWrapper {
        value: f64::NAN,
    };
    assert!(content_hash(&value).is_err(), "NaN must not hash");
}

#[test]
fn canonical_hash_rejects_infinity() {
    let value = FloatWrapper {
        value: f64::INFINITY,
    };
    assert!(content_hash(&value).is_err(), "Infinity must not hash");
}

#[test]
fn canonical_hash_rejects_negative_infinity() {
    let value = FloatWrapper {
        value: f64::NEG_INFINITY,
    };
    assert!(content_hash(&value).is_err(), "-Infinity must not hash");
}

#[test]
fn canonical_hash_accepts_finite_extremes() {
    assert!(content_hash(&FloatWrapper { value: f64::MAX }).is_ok());
    assert!(content_hash(&FloatWrapper { value: f64::MIN_POSITIVE }).is_ok());
}

#[test]
fn size_limit_exact_boundary_passes() {
    let value = json!({"d": "x"});
    let bytes = canonical_json_bytes(&value).expect("canonical bytes");
    let result = canonical_json_bytes_with_limit(&value, bytes.len());
    assert!(result.is_ok(), "Exact boundary should succeed");
}

#[test]
fn size_limit_one_byte_under_fails() {
    let value = json!({"d": "x"});
    let bytes = canonical_json_bytes(&value).expect("canonical bytes");
    let result = canonical_json_bytes_with_limit(&value, bytes.len() - 1);
    assert!(
        matches!(result, Err(CanonicalError::SizeLimitExceeded { .. })),
        "One byte under limit should fail"
    );
}

#[test]
fn size_limit_reports_actual_size() {
    let value = json!({"data": "x".repeat(100)});
    let Err(CanonicalError::SizeLimitExceeded { limit, actual }) =
        canonical_json_bytes_with_limit(&value, 10)
    else {
        panic!("Expected SizeLimitExceeded");
    };
    assert_eq!(limit, 10);
    assert!(actual > 10);
}

// ============================================================================
// SECTION: Golden SHA-256 Tests
// ============================================================================

#[test]
fn golden_hash_empty_object() {
    // SHA-256 of "{}"
    let digest = content_hash(&json!({})).expect("hash");
    assert_eq!(digest, "44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a");
}

#[test]
fn golden_hash_empty_array() {
    // SHA-256 of "[]"
    let digest = content_hash(&json!([])).expect("hash");
    assert_eq!(digest, "4f53cda18c2baa0c0354bb5f9a3ecbe5ed12ab4d8e11ba873c2f11161202b945");
}

#[test]
fn golden_hash_integer_one() {
    // SHA-256 of "1"
    let digest = content_hash(&json!(1)).expect("hash");
    assert_eq!(digest, "6b86b273ff34fce19d6b804eff5a3f5747ada4eaa22f1d49c01e52ddb7875b4b");
}

#[test]
fn golden_hash_boolean_true() {
    // SHA-256 of "true"
    let digest = content_hash(&json!(true)).expect("hash");
    assert_eq!(digest, "b5bea41b6c623f7c09f1bf24dcae58ebab3c0cdd90ad966bc43a45b44867e12b");
}

#[test]
fn golden_hash_bytes_direct() {
    // SHA-256 of "test"
    let digest = hash_bytes(b"test");
    assert_eq!(digest, "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08");
}

#[test]
fn golden_hash_empty_bytes() {
    // SHA-256 of empty input
    let digest = hash_bytes(b"");
    assert_eq!(digest, "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855");
}

// ============================================================================
// SECTION: Binary Encoding
// ============================================================================

#[test]
fn binary_round_trip_preserves_bytes() {
    let bytes = [0_u8, 1, 2, 254, 255];
    let encoded = encode_binary(&bytes);
    assert_eq!(decode_binary(&encoded).expect("decode"), bytes);
}

#[test]
fn binary_decode_rejects_garbage() {
    assert!(decode_binary("not base64 at all!!!").is_err());
}

// ============================================================================
// SECTION: Robustness
// ============================================================================

#[test]
fn hash_digest_is_lowercase_hex() {
    let digest = hash_bytes(&[0xAB, 0xCD, 0xEF, 0x12]);
    assert!(!digest.chars().any(char::is_uppercase), "No uppercase chars allowed");
}

#[test]
fn hash_deeply_nested_structure() {
    let mut value = json!({});
    for i in 0..100 {
        value = json!({ format!("level{i}"): value });
    }
    assert!(content_hash(&value).is_ok(), "Deep nesting should hash successfully");
}

proptest! {
    #[test]
    fn hash_is_stable_across_insertion_order(
        keys in proptest::collection::btree_set("[a-z]{1,8}", 1..8),
        values in proptest::collection::vec(any::<i64>(), 8),
    ) {
        let keys: Vec<String> = keys.into_iter().collect();
        let mut forward = Map::new();
        for (key, value) in keys.iter().zip(&values) {
            forward.insert(key.clone(), json!(value));
        }
        let mut reverse = Map::new();
        for (key, value) in keys.iter().zip(&values).rev() {
            reverse.insert(key.clone(), json!(value));
        }
        let hash_a = content_hash(&Value::Object(forward)).expect("hash forward");
        let hash_b = content_hash(&Value::Object(reverse)).expect("hash reverse");
        assert_eq!(hash_a, hash_b);
    }

    #[test]
    fn byte_hash_matches_for_equal_values(value in any::<i64>()) {
        let first = content_hash(&json!(value)).expect("first");
        let second = content_hash(&json!(value)).expect("second");
        assert_eq!(first, second);
    }
}
