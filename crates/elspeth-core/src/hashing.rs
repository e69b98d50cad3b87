// crates/elspeth-core/src/hashing.rs
// ============================================================================
// Module: Elspeth Canonical Codec
// Description: RFC 8785 JSON canonicalization and content hashing.
// Purpose: Provide the single source of truth for every ledger hash.
// Dependencies: base64, serde, serde_jcs, sha2
// ============================================================================

//! ## Overview
//! Every payload hash in the audit trail is computed over canonical JSON:
//! lexicographically sorted keys, no insignificant whitespace, normalized
//! numeric representation. Non-finite floats are rejected rather than
//! silently coerced. Binary payloads are hashed directly over raw bytes and
//! embedded in JSON as base64 when needed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Canonical algorithm version stamped on every run.
///
/// Bumped whenever the canonicalization or digest rules change, so replay
/// tooling can refuse cross-version comparisons.
pub const CANONICAL_VERSION: &str = "jcs-sha256/1";

/// Length of a lowercase hex SHA-256 content hash.
pub const CONTENT_HASH_LEN: usize = 64;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by the canonical codec.
#[derive(Debug, Error)]
pub enum CanonicalError {
    /// Value contained NaN or an infinity.
    #[error("non-canonical float: NaN and infinities cannot be hashed")]
    NonCanonicalFloat,
    /// Value contained a type the codec cannot represent.
    #[error("unsupported type for canonical json: {0}")]
    UnsupportedType(String),
    /// JSON canonicalization failed.
    #[error("failed to canonicalize json: {0}")]
    Canonicalization(String),
    /// Canonical form exceeded the caller's size limit.
    #[error("canonical json exceeds size limit: {actual} bytes (max {limit})")]
    SizeLimitExceeded {
        /// Maximum allowed bytes.
        limit: usize,
        /// Actual canonical size in bytes.
        actual: usize,
    },
}

// ============================================================================
// SECTION: Canonical Bytes
// ============================================================================

/// Returns canonical JSON bytes for a serializable value using RFC 8785.
///
/// # Errors
///
/// Returns [`CanonicalError::NonCanonicalFloat`] for non-finite floats and
/// [`CanonicalError`] variants for other serialization failures.
pub fn canonical_json_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CanonicalError> {
    serde_jcs::to_vec(value).map_err(|err| classify_serializer_error(&err.to_string()))
}

/// Returns canonical JSON bytes, failing when the result exceeds `limit`.
///
/// # Errors
///
/// Returns [`CanonicalError::SizeLimitExceeded`] when the canonical form is
/// larger than `limit`, or any error from [`canonical_json_bytes`].
pub fn canonical_json_bytes_with_limit<T: Serialize + ?Sized>(
    value: &T,
    limit: usize,
) -> Result<Vec<u8>, CanonicalError> {
    let bytes = canonical_json_bytes(value)?;
    if bytes.len() > limit {
        return Err(CanonicalError::SizeLimitExceeded {
            limit,
            actual: bytes.len(),
        });
    }
    Ok(bytes)
}

/// Maps a serializer error message onto the codec error taxonomy.
///
/// The canonical serializer reports non-finite floats and unsupported types
/// only through its message text, so classification is by inspection.
fn classify_serializer_error(message: &str) -> CanonicalError {
    let lowered = message.to_ascii_lowercase();
    if lowered.contains("nan") || lowered.contains("infini") || lowered.contains("finite") {
        return CanonicalError::NonCanonicalFloat;
    }
    if lowered.contains("unsupported") || lowered.contains("key must be") {
        return CanonicalError::UnsupportedType(message.to_string());
    }
    CanonicalError::Canonicalization(message.to_string())
}

// ============================================================================
// SECTION: Content Hashing
// ============================================================================

/// Hashes a serializable value over its canonical JSON form.
///
/// # Errors
///
/// Returns [`CanonicalError`] when canonicalization fails.
pub fn content_hash<T: Serialize + ?Sized>(value: &T) -> Result<String, CanonicalError> {
    let bytes = canonical_json_bytes(value)?;
    Ok(hash_bytes(&bytes))
}

/// Hashes raw bytes with SHA-256, returning lowercase hex.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_encode(&hasher.finalize())
}

// ============================================================================
// SECTION: Binary Encoding
// ============================================================================

/// Encodes binary data for embedding in canonical JSON.
#[must_use]
pub fn encode_binary(bytes: &[u8]) -> String {
    BASE64_STANDARD.encode(bytes)
}

/// Decodes binary data previously encoded with [`encode_binary`].
///
/// # Errors
///
/// Returns [`CanonicalError::Canonicalization`] when the input is not valid
/// base64.
pub fn decode_binary(encoded: &str) -> Result<Vec<u8>, CanonicalError> {
    BASE64_STANDARD
        .decode(encoded)
        .map_err(|err| CanonicalError::Canonicalization(err.to_string()))
}

// ============================================================================
// SECTION: Hex Encoding
// ============================================================================

/// Encodes bytes as a lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::CanonicalError;
    use super::classify_serializer_error;

    #[test]
    fn classifier_maps_nan_messages_to_non_canonical_float() {
        let err = classify_serializer_error("NaN is not a valid JSON value");
        assert!(matches!(err, CanonicalError::NonCanonicalFloat));
    }

    #[test]
    fn classifier_maps_infinity_messages_to_non_canonical_float() {
        let err = classify_serializer_error("Infinity is not a valid JSON value");
        assert!(matches!(err, CanonicalError::NonCanonicalFloat));
    }

    #[test]
    fn classifier_maps_key_errors_to_unsupported_type() {
        let err = classify_serializer_error("key must be a string");
        assert!(matches!(err, CanonicalError::UnsupportedType(_)));
    }

    #[test]
    fn classifier_falls_back_to_canonicalization() {
        let err = classify_serializer_error("recursion limit exceeded");
        assert!(matches!(err, CanonicalError::Canonicalization(_)));
    }
}
