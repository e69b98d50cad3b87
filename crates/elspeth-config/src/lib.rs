// crates/elspeth-config/src/lib.rs
// ============================================================================
// Module: Elspeth Config Library
// Description: Settings model, validation, and pipeline lowering.
// Purpose: Guard the trust boundary between operator input and the engine.
// Dependencies: elspeth-core, elspeth-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is the only operator-controlled input Elspeth executes
//! from, so it is parsed with hard limits and validated fail-closed before
//! the execution graph is built. This crate also resolves the credential
//! fingerprint key from the environment.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;
pub mod fingerprint;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::AggregationBinding;
pub use config::BatchConfig;
pub use config::CheckpointSettings;
pub use config::ConfigError;
pub use config::DatasourceSettings;
pub use config::ElspethSettings;
pub use config::LandscapeSettings;
pub use config::RetryConfig;
pub use config::RowPluginSettings;
pub use config::SinkSettings;
pub use config::TriggerConfig;
pub use fingerprint::FINGERPRINT_KEY_ENV;
pub use fingerprint::FingerprintError;
pub use fingerprint::FingerprintKeySource;
pub use fingerprint::KEYVAULT_SECRET_NAME_ENV;
pub use fingerprint::KEYVAULT_URL_ENV;
pub use fingerprint::fingerprint_credential;
pub use fingerprint::resolve_key_source;
