// crates/elspeth-store-sqlite/src/lib.rs
// ============================================================================
// Module: Elspeth SQLite Landscape Library
// Description: Durable audit ledger backed by SQLite.
// Purpose: Persist runs, nodes, tokens, states, and payloads append-only.
// Dependencies: elspeth-core, rusqlite
// ============================================================================

//! ## Overview
//! The Landscape is the durable form of the Elspeth audit trail: an
//! append-only relational schema with a recorder write surface and strict
//! repositories. Enum columns decode fail-closed: a foreign string crashes
//! the read path rather than degrading to a default. Payloads live in a
//! content-addressed table with purge tombstones that preserve hashes.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod payload;
pub mod repository;
pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use payload::SqlitePayloadStore;
pub use repository::LandscapeRepository;
pub use store::LANDSCAPE_SCHEMA_VERSION;
pub use store::SqliteJournalMode;
pub use store::SqliteLandscape;
pub use store::SqliteLandscapeConfig;
pub use store::SqliteLandscapeError;
pub use store::SqliteSyncMode;
