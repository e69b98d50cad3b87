// crates/elspeth-config/src/fingerprint.rs
// ============================================================================
// Module: Credential Fingerprinting
// Description: Keyed credential fingerprints for ledger-safe identification.
// Purpose: Resolve the fingerprint key and compute HMAC-SHA256 fingerprints.
// Dependencies: elspeth-core, hmac, sha2
// ============================================================================

//! ## Overview
//! Credentials never enter the ledger in the clear; plugins record a keyed
//! fingerprint instead. The key resolves from `ELSPETH_FINGERPRINT_KEY`
//! first; when absent, the key-vault coordinates are surfaced for the host
//! to resolve through its own secret client. The engine itself performs no
//! network fetches.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;

use elspeth_core::runtime::FingerprintKey;
use hmac::Hmac;
use hmac::Mac;
use sha2::Sha256;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Environment variable carrying hex-encoded key bytes (precedence 1).
pub const FINGERPRINT_KEY_ENV: &str = "ELSPETH_FINGERPRINT_KEY";
/// Environment variable naming the key-vault URL (fallback).
pub const KEYVAULT_URL_ENV: &str = "ELSPETH_KEYVAULT_URL";
/// Environment variable naming the key-vault secret (fallback).
pub const KEYVAULT_SECRET_NAME_ENV: &str = "ELSPETH_KEYVAULT_SECRET_NAME";
/// Minimum accepted key length in bytes.
const MIN_KEY_BYTES: usize = 16;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Fingerprint key resolution errors.
#[derive(Debug, Error)]
pub enum FingerprintError {
    /// Key material failed to decode or was too short.
    #[error("fingerprint key invalid: {0}")]
    InvalidKey(String),
    /// Key-vault coordinates were incomplete.
    #[error("key-vault configuration incomplete: {0}")]
    IncompleteVault(String),
}

// ============================================================================
// SECTION: Key Resolution
// ============================================================================

/// Resolved key material or the coordinates to fetch it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FingerprintKeySource {
    /// Key bytes resolved directly from the environment.
    Direct(FingerprintKey),
    /// Key lives in a cloud vault; the host's secret client must fetch it.
    KeyVault {
        /// Vault URL.
        url: String,
        /// Secret name within the vault.
        secret_name: String,
    },
}

/// Resolves the fingerprint key source from the environment.
///
/// `ELSPETH_FINGERPRINT_KEY` takes precedence; the key-vault pair is the
/// fallback. Absent both, fingerprinting is disabled.
///
/// # Errors
///
/// Returns [`FingerprintError`] when key material is malformed or vault
/// coordinates are incomplete.
pub fn resolve_key_source() -> Result<Option<FingerprintKeySource>, FingerprintError> {
    if let Ok(encoded) = env::var(FINGERPRINT_KEY_ENV) {
        if !encoded.is_empty() {
            let bytes = decode_hex(&encoded)?;
            if bytes.len() < MIN_KEY_BYTES {
                return Err(FingerprintError::InvalidKey(format!(
                    "key must be at least {MIN_KEY_BYTES} bytes"
                )));
            }
            return Ok(Some(FingerprintKeySource::Direct(FingerprintKey::new(bytes))));
        }
    }
    let url = env::var(KEYVAULT_URL_ENV).ok().filter(|value| !value.is_empty());
    let secret_name =
        env::var(KEYVAULT_SECRET_NAME_ENV).ok().filter(|value| !value.is_empty());
    match (url, secret_name) {
        (Some(url), Some(secret_name)) => Ok(Some(FingerprintKeySource::KeyVault {
            url,
            secret_name,
        })),
        (None, None) => Ok(None),
        (Some(_), None) => Err(FingerprintError::IncompleteVault(format!(
            "{KEYVAULT_SECRET_NAME_ENV} is not set"
        ))),
        (None, Some(_)) => Err(FingerprintError::IncompleteVault(format!(
            "{KEYVAULT_URL_ENV} is not set"
        ))),
    }
}

// ============================================================================
// SECTION: Fingerprinting
// ============================================================================

/// Computes the lowercase hex HMAC-SHA256 fingerprint of a credential.
///
/// # Errors
///
/// Returns [`FingerprintError::InvalidKey`] when the key is rejected by the
/// MAC construction.
pub fn fingerprint_credential(
    key: &FingerprintKey,
    credential: &[u8],
) -> Result<String, FingerprintError> {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key.as_bytes())
        .map_err(|err| FingerprintError::InvalidKey(err.to_string()))?;
    mac.update(credential);
    let digest = mac.finalize().into_bytes();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push(char::from_digit(u32::from(byte >> 4), 16).unwrap_or('0'));
        out.push(char::from_digit(u32::from(byte & 0x0f), 16).unwrap_or('0'));
    }
    Ok(out)
}

/// Decodes a lowercase or uppercase hex string.
fn decode_hex(encoded: &str) -> Result<Vec<u8>, FingerprintError> {
    if encoded.len() % 2 != 0 {
        return Err(FingerprintError::InvalidKey("hex length must be even".to_string()));
    }
    let mut bytes = Vec::with_capacity(encoded.len() / 2);
    let chars: Vec<char> = encoded.chars().collect();
    for pair in chars.chunks(2) {
        let high = pair[0]
            .to_digit(16)
            .ok_or_else(|| FingerprintError::InvalidKey("non-hex character".to_string()))?;
        let low = pair[1]
            .to_digit(16)
            .ok_or_else(|| FingerprintError::InvalidKey("non-hex character".to_string()))?;
        let value = high * 16 + low;
        bytes.push(u8::try_from(value).map_or(0, |byte| byte));
    }
    Ok(bytes)
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
    use elspeth_core::runtime::FingerprintKey;

    use super::decode_hex;
    use super::fingerprint_credential;

    #[test]
    fn fingerprints_are_stable_and_key_dependent() {
        let key_a = FingerprintKey::new(vec![1_u8; 32]);
        let key_b = FingerprintKey::new(vec![2_u8; 32]);
        let first = fingerprint_credential(&key_a, b"api-token").expect("mac");
        let second = fingerprint_credential(&key_a, b"api-token").expect("mac");
        let other = fingerprint_credential(&key_b, b"api-token").expect("mac");
        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn hex_decoding_round_trips() {
        assert_eq!(decode_hex("00ff10").expect("decode"), vec![0x00, 0xff, 0x10]);
        assert!(decode_hex("0").is_err());
        assert!(decode_hex("zz").is_err());
    }
}
