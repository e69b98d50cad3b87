// crates/elspeth-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Landscape Store
// Description: Durable append-only recorder backed by SQLite WAL.
// Purpose: Persist the audit ledger with deterministic serialization.
// Dependencies: elspeth-core, rusqlite, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! This module implements the durable [`Recorder`] over SQLite. Every table
//! is append-only except for the state transitions the contracts allow:
//! node states close exactly once, batches walk their lifecycle forward,
//! and runs complete idempotently within one terminal status. Database
//! contents are untrusted on read; decoding failures are fatal.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use elspeth_core::ArtifactRecord;
use elspeth_core::BatchRecord;
use elspeth_core::BatchStatus;
use elspeth_core::CallRecord;
use elspeth_core::CheckpointRecord;
use elspeth_core::EdgeRecord;
use elspeth_core::ExportStatus;
use elspeth_core::IdGenerator;
use elspeth_core::NodeRecord;
use elspeth_core::NodeStateStatus;
use elspeth_core::PayloadRef;
use elspeth_core::Recorder;
use elspeth_core::RecorderError;
use elspeth_core::RoutingEventRecord;
use elspeth_core::RoutingGroupId;
use elspeth_core::RoutingMode;
use elspeth_core::RoutingReason;
use elspeth_core::RowRecord;
use elspeth_core::RunRecord;
use elspeth_core::RunStatus;
use elspeth_core::SchemaContract;
use elspeth_core::StateId;
use elspeth_core::Timestamp;
use elspeth_core::TokenRecord;
use elspeth_core::content_hash;
use elspeth_core::contracts::ArtifactId;
use elspeth_core::contracts::BatchId;
use elspeth_core::contracts::CheckpointId;
use elspeth_core::contracts::EdgeId;
use elspeth_core::contracts::NodeId;
use elspeth_core::contracts::RowId;
use elspeth_core::contracts::RunId;
use elspeth_core::contracts::TokenId;
use elspeth_core::interfaces::ArtifactDraft;
use elspeth_core::interfaces::BatchStatusUpdate;
use elspeth_core::interfaces::CallDraft;
use elspeth_core::interfaces::CheckpointDraft;
use elspeth_core::interfaces::ExportStatusUpdate;
use elspeth_core::interfaces::NodeRegistration;
use elspeth_core::interfaces::NodeStateCompletion;
use elspeth_core::interfaces::NodeStateOpen;
use elspeth_core::interfaces::RouteDispatch;
use elspeth_core::interfaces::RunStart;
use elspeth_core::interfaces::TokenSpawn;
use elspeth_core::interfaces::ValidationErrorDraft;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::params;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Landscape schema version.
pub const LANDSCAPE_SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Expected columns per table, used by the compatibility check.
pub(crate) const EXPECTED_COLUMNS: &[(&str, &[&str])] = &[
    (
        "runs",
        &[
            "run_id",
            "started_at",
            "completed_at",
            "config_hash",
            "settings_json",
            "canonical_version",
            "status",
            "reproducibility_grade",
            "source_schema_json",
            "source_field_resolution_json",
            "schema_contract_json",
            "schema_contract_hash",
            "export_status",
            "export_error",
            "exported_at",
            "export_format",
            "export_sink",
        ],
    ),
    (
        "nodes",
        &[
            "node_id",
            "run_id",
            "plugin_name",
            "node_type",
            "plugin_version",
            "determinism",
            "config_hash",
            "config_json",
            "schema_hash",
            "sequence_in_pipeline",
            "registered_at",
            "schema_mode",
            "schema_fields_json",
            "input_contract_json",
            "output_contract_json",
        ],
    ),
    (
        "edges",
        &[
            "edge_id",
            "run_id",
            "from_node_id",
            "to_node_id",
            "label",
            "default_mode",
            "created_at",
        ],
    ),
    (
        "rows",
        &[
            "row_id",
            "run_id",
            "source_node_id",
            "row_index",
            "source_data_hash",
            "source_data_ref",
            "created_at",
        ],
    ),
    (
        "tokens",
        &[
            "token_id",
            "row_id",
            "fork_group_id",
            "join_group_id",
            "expand_group_id",
            "branch_name",
            "step_in_pipeline",
            "created_at",
        ],
    ),
    ("token_parents", &["token_id", "parent_token_id", "ordinal"]),
    (
        "node_states",
        &[
            "state_id",
            "token_id",
            "node_id",
            "step_index",
            "attempt",
            "status",
            "input_hash",
            "output_hash",
            "started_at",
            "completed_at",
            "duration_ms",
            "error_json",
            "context_before_json",
            "context_after_json",
            "input_data_ref",
            "output_data_ref",
        ],
    ),
    (
        "calls",
        &[
            "call_id",
            "state_id",
            "call_index",
            "call_type",
            "status",
            "request_hash",
            "request_ref",
            "response_hash",
            "response_ref",
            "error_json",
            "latency_ms",
            "created_at",
        ],
    ),
    (
        "routing_events",
        &[
            "event_id",
            "state_id",
            "edge_id",
            "routing_group_id",
            "ordinal",
            "mode",
            "reason_hash",
            "reason_ref",
            "created_at",
        ],
    ),
    (
        "batches",
        &[
            "batch_id",
            "run_id",
            "aggregation_node_id",
            "attempt",
            "status",
            "aggregation_state_id",
            "trigger_reason",
            "created_at",
            "completed_at",
        ],
    ),
    ("batch_members", &["batch_id", "token_id", "ordinal"]),
    ("batch_outputs", &["batch_id", "output_type", "output_id"]),
    (
        "artifacts",
        &[
            "artifact_id",
            "run_id",
            "produced_by_state_id",
            "sink_node_id",
            "artifact_type",
            "path_or_uri",
            "content_hash",
            "size_bytes",
            "created_at",
        ],
    ),
    (
        "validation_errors",
        &[
            "error_id",
            "run_id",
            "node_id",
            "row_hash",
            "row_data_json",
            "error",
            "schema_mode",
            "destination",
            "violation_type",
            "original_field_name",
            "normalized_field_name",
            "expected_type",
            "actual_type",
            "created_at",
        ],
    ),
    (
        "checkpoints",
        &[
            "checkpoint_id",
            "run_id",
            "token_id",
            "node_id",
            "sequence_number",
            "created_at",
            "aggregation_state_json",
        ],
    ),
];

// ============================================================================
// SECTION: Config
// ============================================================================

/// SQLite journal mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteJournalMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteJournalMode {
    /// Returns the SQLite pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// SQLite sync mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the SQLite pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the SQLite Landscape.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteLandscapeConfig {
    /// Path to the database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Journal mode.
    #[serde(default)]
    pub journal_mode: SqliteJournalMode,
    /// Sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

/// Returns the default busy timeout for connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// SQLite Landscape errors.
#[derive(Debug, Error)]
pub enum SqliteLandscapeError {
    /// Store I/O error.
    #[error("landscape io error: {0}")]
    Io(String),
    /// SQLite engine error.
    #[error("landscape db error: {0}")]
    Db(String),
    /// Store corruption or integrity failure on read.
    #[error("landscape integrity error: {0}")]
    Integrity(String),
    /// Store schema version mismatch.
    #[error("landscape schema version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid write or illegal transition.
    #[error("landscape invalid data: {0}")]
    Invalid(String),
    /// Write duplicated a unique key.
    #[error("landscape duplicate: {0}")]
    Duplicate(String),
    /// Write referenced a record that does not exist.
    #[error("landscape missing reference: {0}")]
    Missing(String),
    /// The live schema is missing expected columns.
    #[error("landscape schema incompatible; missing columns: {missing:?}")]
    SchemaCompatibility {
        /// Every missing `table.column`.
        missing: Vec<String>,
    },
}

impl From<SqliteLandscapeError> for RecorderError {
    fn from(error: SqliteLandscapeError) -> Self {
        match error {
            SqliteLandscapeError::Io(message)
            | SqliteLandscapeError::Db(message)
            | SqliteLandscapeError::Integrity(message) => Self::Store(message),
            SqliteLandscapeError::VersionMismatch(message)
            | SqliteLandscapeError::Invalid(message) => Self::Invalid(message),
            SqliteLandscapeError::Duplicate(message) => Self::Duplicate(message),
            SqliteLandscapeError::Missing(message) => Self::Missing(message),
            SqliteLandscapeError::SchemaCompatibility { missing } => {
                Self::Invalid(format!("schema incompatible; missing columns: {}", missing.join(", ")))
            }
        }
    }
}

impl From<rusqlite::Error> for SqliteLandscapeError {
    fn from(error: rusqlite::Error) -> Self {
        Self::Db(error.to_string())
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// Durable SQLite-backed Landscape recorder.
#[derive(Clone, Debug)]
pub struct SqliteLandscape {
    /// Shared connection guarded by a mutex.
    pub(crate) connection: Arc<Mutex<Connection>>,
    /// Process-scoped identifier generator.
    ids: Arc<IdGenerator>,
}

/// Locks a mutex, recovering the inner value on poisoning.
pub(crate) fn lock_connection(
    connection: &Mutex<Connection>,
) -> MutexGuard<'_, Connection> {
    connection.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SqliteLandscape {
    /// Opens a Landscape database, initializing the schema when absent.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteLandscapeError`] when the database cannot be opened,
    /// initialized, or carries an incompatible schema version.
    pub fn open(config: &SqliteLandscapeConfig) -> Result<Self, SqliteLandscapeError> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|err| SqliteLandscapeError::Io(err.to_string()))?;
            }
        }
        let connection = Connection::open_with_flags(
            &config.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )?;
        connection.busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))?;
        connection.pragma_update(None, "journal_mode", config.journal_mode.pragma_value())?;
        connection.pragma_update(None, "synchronous", config.sync_mode.pragma_value())?;
        connection.pragma_update(None, "foreign_keys", "on")?;
        initialize_schema(&connection)?;
        let store = Self {
            connection: Arc::new(Mutex::new(connection)),
            ids: Arc::new(IdGenerator::new()),
        };
        store.check_schema_compatibility()?;
        Ok(store)
    }

    /// Verifies that every expected `table.column` exists.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteLandscapeError::SchemaCompatibility`] listing every
    /// missing column. The store never auto-migrates.
    pub fn check_schema_compatibility(&self) -> Result<(), SqliteLandscapeError> {
        let connection = lock_connection(&self.connection);
        let mut missing = Vec::new();
        for (table, columns) in EXPECTED_COLUMNS {
            let mut statement =
                connection.prepare(&format!("PRAGMA table_info({table})"))?;
            let live: Vec<String> = statement
                .query_map([], |row| row.get::<_, String>(1))?
                .collect::<Result<_, _>>()?;
            for column in *columns {
                if !live.iter().any(|name| name == column) {
                    missing.push(format!("{table}.{column}"));
                }
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(SqliteLandscapeError::SchemaCompatibility {
                missing,
            })
        }
    }

    /// Returns the next identifier with the given prefix.
    fn next_id(&self, prefix: &str) -> String {
        self.ids.next_id(prefix)
    }

    /// Serializes a JSON value for a TEXT column.
    fn json_text(value: &Value) -> Result<String, SqliteLandscapeError> {
        serde_json::to_string(value).map_err(|err| SqliteLandscapeError::Invalid(err.to_string()))
    }

    /// Serializes an optional contract for a TEXT column.
    fn contract_text(
        contract: Option<&SchemaContract>,
    ) -> Result<Option<String>, SqliteLandscapeError> {
        match contract {
            Some(contract) => {
                let json = contract
                    .to_json()
                    .map_err(|err| SqliteLandscapeError::Invalid(err.to_string()))?;
                Ok(Some(Self::json_text(&json)?))
            }
            None => Ok(None),
        }
    }
}

/// Creates the Landscape tables and stamps the schema version.
fn initialize_schema(connection: &Connection) -> Result<(), SqliteLandscapeError> {
    connection.execute_batch(
        "CREATE TABLE IF NOT EXISTS landscape_meta (
            key TEXT PRIMARY KEY,
            value INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS runs (
            run_id TEXT PRIMARY KEY,
            started_at INTEGER NOT NULL,
            completed_at INTEGER,
            config_hash TEXT NOT NULL,
            settings_json TEXT NOT NULL,
            canonical_version TEXT NOT NULL,
            status TEXT NOT NULL,
            reproducibility_grade TEXT,
            source_schema_json TEXT,
            source_field_resolution_json TEXT,
            schema_contract_json TEXT,
            schema_contract_hash TEXT,
            export_status TEXT,
            export_error TEXT,
            exported_at INTEGER,
            export_format TEXT,
            export_sink TEXT
        );
        CREATE TABLE IF NOT EXISTS nodes (
            node_id TEXT NOT NULL,
            run_id TEXT NOT NULL REFERENCES runs(run_id),
            plugin_name TEXT NOT NULL,
            node_type TEXT NOT NULL,
            plugin_version TEXT NOT NULL,
            determinism TEXT NOT NULL,
            config_hash TEXT NOT NULL,
            config_json TEXT NOT NULL,
            schema_hash TEXT,
            sequence_in_pipeline INTEGER,
            registered_at INTEGER NOT NULL,
            schema_mode TEXT,
            schema_fields_json TEXT,
            input_contract_json TEXT,
            output_contract_json TEXT,
            PRIMARY KEY (node_id, run_id)
        );
        CREATE TABLE IF NOT EXISTS edges (
            edge_id TEXT PRIMARY KEY,
            run_id TEXT NOT NULL REFERENCES runs(run_id),
            from_node_id TEXT NOT NULL,
            to_node_id TEXT NOT NULL,
            label TEXT NOT NULL,
            default_mode TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE (run_id, from_node_id, label)
        );
        CREATE TABLE IF NOT EXISTS rows (
            row_id TEXT PRIMARY KEY,
            run_id TEXT NOT NULL REFERENCES runs(run_id),
            source_node_id TEXT NOT NULL,
            row_index INTEGER NOT NULL,
            source_data_hash TEXT NOT NULL,
            source_data_ref TEXT,
            created_at INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS tokens (
            token_id TEXT PRIMARY KEY,
            row_id TEXT NOT NULL REFERENCES rows(row_id),
            fork_group_id TEXT,
            join_group_id TEXT,
            expand_group_id TEXT,
            branch_name TEXT,
            step_in_pipeline INTEGER,
            created_at INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS token_parents (
            token_id TEXT NOT NULL REFERENCES tokens(token_id),
            parent_token_id TEXT NOT NULL REFERENCES tokens(token_id),
            ordinal INTEGER NOT NULL,
            PRIMARY KEY (token_id, parent_token_id)
        );
        CREATE TABLE IF NOT EXISTS node_states (
            state_id TEXT PRIMARY KEY,
            token_id TEXT NOT NULL REFERENCES tokens(token_id),
            node_id TEXT NOT NULL,
            step_index INTEGER NOT NULL,
            attempt INTEGER NOT NULL,
            status TEXT NOT NULL,
            input_hash TEXT NOT NULL,
            output_hash TEXT,
            started_at INTEGER NOT NULL,
            completed_at INTEGER,
            duration_ms INTEGER,
            error_json TEXT,
            context_before_json TEXT,
            context_after_json TEXT,
            input_data_ref TEXT,
            output_data_ref TEXT
        );
        CREATE TABLE IF NOT EXISTS calls (
            call_id TEXT PRIMARY KEY,
            state_id TEXT NOT NULL REFERENCES node_states(state_id),
            call_index INTEGER NOT NULL,
            call_type TEXT NOT NULL,
            status TEXT NOT NULL,
            request_hash TEXT NOT NULL,
            request_ref TEXT,
            response_hash TEXT,
            response_ref TEXT,
            error_json TEXT,
            latency_ms INTEGER,
            created_at INTEGER NOT NULL,
            UNIQUE (state_id, call_index)
        );
        CREATE TABLE IF NOT EXISTS routing_events (
            event_id TEXT PRIMARY KEY,
            state_id TEXT NOT NULL REFERENCES node_states(state_id),
            edge_id TEXT NOT NULL REFERENCES edges(edge_id),
            routing_group_id TEXT NOT NULL,
            ordinal INTEGER NOT NULL,
            mode TEXT NOT NULL,
            reason_hash TEXT,
            reason_ref TEXT,
            created_at INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS batches (
            batch_id TEXT PRIMARY KEY,
            run_id TEXT NOT NULL REFERENCES runs(run_id),
            aggregation_node_id TEXT NOT NULL,
            attempt INTEGER NOT NULL,
            status TEXT NOT NULL,
            aggregation_state_id TEXT,
            trigger_reason TEXT,
            created_at INTEGER NOT NULL,
            completed_at INTEGER
        );
        CREATE TABLE IF NOT EXISTS batch_members (
            batch_id TEXT NOT NULL REFERENCES batches(batch_id),
            token_id TEXT NOT NULL REFERENCES tokens(token_id),
            ordinal INTEGER NOT NULL,
            PRIMARY KEY (batch_id, token_id)
        );
        CREATE TABLE IF NOT EXISTS batch_outputs (
            batch_id TEXT NOT NULL REFERENCES batches(batch_id),
            output_type TEXT NOT NULL,
            output_id TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS artifacts (
            artifact_id TEXT PRIMARY KEY,
            run_id TEXT NOT NULL REFERENCES runs(run_id),
            produced_by_state_id TEXT NOT NULL REFERENCES node_states(state_id),
            sink_node_id TEXT NOT NULL,
            artifact_type TEXT NOT NULL,
            path_or_uri TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            size_bytes INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS validation_errors (
            error_id TEXT PRIMARY KEY,
            run_id TEXT NOT NULL REFERENCES runs(run_id),
            node_id TEXT,
            row_hash TEXT NOT NULL,
            row_data_json TEXT,
            error TEXT NOT NULL,
            schema_mode TEXT NOT NULL,
            destination TEXT NOT NULL,
            violation_type TEXT,
            original_field_name TEXT,
            normalized_field_name TEXT,
            expected_type TEXT,
            actual_type TEXT,
            created_at INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS checkpoints (
            checkpoint_id TEXT PRIMARY KEY,
            run_id TEXT NOT NULL REFERENCES runs(run_id),
            token_id TEXT NOT NULL,
            node_id TEXT NOT NULL,
            sequence_number INTEGER NOT NULL,
            created_at INTEGER,
            aggregation_state_json TEXT
        );",
    )?;

    let stored: Option<i64> = connection
        .query_row(
            "SELECT value FROM landscape_meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    match stored {
        None => {
            connection.execute(
                "INSERT INTO landscape_meta (key, value) VALUES ('schema_version', ?1)",
                params![LANDSCAPE_SCHEMA_VERSION],
            )?;
            Ok(())
        }
        Some(version) if version == LANDSCAPE_SCHEMA_VERSION => Ok(()),
        Some(version) => Err(SqliteLandscapeError::VersionMismatch(format!(
            "database is schema version {version}, expected {LANDSCAPE_SCHEMA_VERSION}"
        ))),
    }
}

// ============================================================================
// SECTION: Recorder Implementation
// ============================================================================

impl Recorder for SqliteLandscape {
    fn begin_run(&self, start: RunStart) -> Result<RunRecord, RecorderError> {
        let contract_json = Self::contract_text(start.schema_contract.as_ref())
            .map_err(RecorderError::from)?;
        let contract_hash = match &start.schema_contract {
            Some(contract) => Some(
                contract.version_hash().map_err(|err| RecorderError::Invalid(err.to_string()))?,
            ),
            None => None,
        };
        let settings_text =
            Self::json_text(&start.settings_json).map_err(RecorderError::from)?;
        let run_id = RunId::new(self.next_id("run"));
        let connection = lock_connection(&self.connection);
        connection
            .execute(
                "INSERT INTO runs (run_id, started_at, config_hash, settings_json,
                    canonical_version, status, source_schema_json, schema_contract_json,
                    schema_contract_hash)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    run_id.as_str(),
                    start.started_at.as_unix_millis(),
                    start.config_hash,
                    settings_text,
                    start.canonical_version,
                    RunStatus::Running.as_str(),
                    contract_json,
                    contract_json,
                    contract_hash,
                ],
            )
            .map_err(|err| RecorderError::Store(err.to_string()))?;
        Ok(RunRecord {
            run_id,
            started_at: start.started_at,
            completed_at: None,
            config_hash: start.config_hash,
            settings_json: start.settings_json,
            canonical_version: start.canonical_version,
            status: RunStatus::Running,
            reproducibility_grade: None,
            source_schema_json: None,
            source_field_resolution_json: None,
            schema_contract_json: None,
            schema_contract_hash: contract_hash,
            export_status: None,
            export_error: None,
            exported_at: None,
            export_format: None,
            export_sink: None,
        })
    }

    fn update_run_contract(
        &self,
        run_id: &RunId,
        contract: &SchemaContract,
    ) -> Result<(), RecorderError> {
        let contract_json =
            Self::contract_text(Some(contract)).map_err(RecorderError::from)?;
        let contract_hash = contract
            .version_hash()
            .map_err(|err| RecorderError::Invalid(err.to_string()))?;
        let resolution = serde_json::to_string(&contract.field_resolution())
            .map_err(|err| RecorderError::Invalid(err.to_string()))?;
        let connection = lock_connection(&self.connection);
        let updated = connection
            .execute(
                "UPDATE runs SET schema_contract_json = ?2, schema_contract_hash = ?3,
                    source_field_resolution_json = ?4
                 WHERE run_id = ?1",
                params![run_id.as_str(), contract_json, contract_hash, resolution],
            )
            .map_err(|err| RecorderError::Store(err.to_string()))?;
        if updated == 0 {
            return Err(RecorderError::Missing(format!("run {run_id} is not registered")));
        }
        Ok(())
    }

    fn register_node(&self, registration: NodeRegistration) -> Result<NodeRecord, RecorderError> {
        let config_text =
            Self::json_text(&registration.config_json).map_err(RecorderError::from)?;
        let input_contract =
            Self::contract_text(registration.input_contract.as_ref()).map_err(RecorderError::from)?;
        let output_contract = Self::contract_text(registration.output_contract.as_ref())
            .map_err(RecorderError::from)?;
        let connection = lock_connection(&self.connection);
        connection
            .execute(
                "INSERT INTO nodes (node_id, run_id, plugin_name, node_type, plugin_version,
                    determinism, config_hash, config_json, sequence_in_pipeline, registered_at,
                    schema_mode, input_contract_json, output_contract_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    registration.node_id.as_str(),
                    registration.run_id.as_str(),
                    registration.plugin_name,
                    registration.node_type.as_str(),
                    registration.plugin_version,
                    registration.determinism.as_str(),
                    registration.config_hash,
                    config_text,
                    registration.sequence_in_pipeline,
                    registration.registered_at.as_unix_millis(),
                    registration.schema_mode,
                    input_contract,
                    output_contract,
                ],
            )
            .map_err(|err| match err {
                rusqlite::Error::SqliteFailure(failure, message)
                    if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    RecorderError::Duplicate(message.unwrap_or_else(|| {
                        format!("node {} already registered", registration.node_id)
                    }))
                }
                other => RecorderError::Store(other.to_string()),
            })?;
        Ok(NodeRecord {
            node_id: registration.node_id,
            run_id: registration.run_id,
            plugin_name: registration.plugin_name,
            node_type: registration.node_type,
            plugin_version: registration.plugin_version,
            determinism: registration.determinism,
            config_hash: registration.config_hash,
            config_json: registration.config_json,
            schema_hash: None,
            sequence_in_pipeline: registration.sequence_in_pipeline,
            registered_at: registration.registered_at,
            schema_mode: registration.schema_mode,
            schema_fields_json: None,
            input_contract_json: None,
            output_contract_json: None,
        })
    }

    fn register_edge(
        &self,
        run_id: &RunId,
        from: &NodeId,
        to: &NodeId,
        label: &str,
        mode: RoutingMode,
        created_at: Timestamp,
    ) -> Result<EdgeRecord, RecorderError> {
        let edge_id = EdgeId::new(self.next_id("edge"));
        let connection = lock_connection(&self.connection);
        connection
            .execute(
                "INSERT INTO edges (edge_id, run_id, from_node_id, to_node_id, label,
                    default_mode, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    edge_id.as_str(),
                    run_id.as_str(),
                    from.as_str(),
                    to.as_str(),
                    label,
                    mode.as_str(),
                    created_at.as_unix_millis(),
                ],
            )
            .map_err(|err| match err {
                rusqlite::Error::SqliteFailure(failure, _)
                    if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    RecorderError::Duplicate(format!(
                        "edge label {label} already exists out of {from}"
                    ))
                }
                other => RecorderError::Store(other.to_string()),
            })?;
        Ok(EdgeRecord {
            edge_id,
            run_id: run_id.clone(),
            from_node_id: from.clone(),
            to_node_id: to.clone(),
            label: label.to_string(),
            default_mode: mode,
            created_at,
        })
    }

    fn create_row(
        &self,
        run_id: &RunId,
        source_node_id: &NodeId,
        row_index: u64,
        source_data_hash: &str,
        source_data_ref: Option<&PayloadRef>,
        created_at: Timestamp,
    ) -> Result<RowRecord, RecorderError> {
        let row_id = RowId::new(self.next_id("row"));
        let index = i64::try_from(row_index)
            .map_err(|_| RecorderError::Invalid(format!("row index {row_index} overflows")))?;
        let connection = lock_connection(&self.connection);
        connection
            .execute(
                "INSERT INTO rows (row_id, run_id, source_node_id, row_index,
                    source_data_hash, source_data_ref, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    row_id.as_str(),
                    run_id.as_str(),
                    source_node_id.as_str(),
                    index,
                    source_data_hash,
                    source_data_ref.map(PayloadRef::as_str),
                    created_at.as_unix_millis(),
                ],
            )
            .map_err(|err| RecorderError::Store(err.to_string()))?;
        Ok(RowRecord {
            row_id,
            run_id: run_id.clone(),
            source_node_id: source_node_id.clone(),
            row_index,
            source_data_hash: source_data_hash.to_string(),
            source_data_ref: source_data_ref.cloned(),
            created_at,
        })
    }

    fn create_token(&self, spawn: TokenSpawn) -> Result<TokenRecord, RecorderError> {
        let token_id = TokenId::new(self.next_id("token"));
        let mut connection = lock_connection(&self.connection);
        let tx = connection
            .transaction()
            .map_err(|err| RecorderError::Store(err.to_string()))?;
        tx.execute(
            "INSERT INTO tokens (token_id, row_id, fork_group_id, join_group_id,
                expand_group_id, branch_name, step_in_pipeline, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                token_id.as_str(),
                spawn.row_id.as_str(),
                spawn.fork_group_id.as_ref().map(RoutingGroupId::as_str),
                spawn.join_group_id.as_ref().map(RoutingGroupId::as_str),
                spawn.expand_group_id.as_ref().map(RoutingGroupId::as_str),
                spawn.branch_name,
                spawn.step_in_pipeline,
                spawn.created_at.as_unix_millis(),
            ],
        )
        .map_err(|err| RecorderError::Store(err.to_string()))?;
        for (ordinal, parent) in spawn.parents.iter().enumerate() {
            let ordinal = u32::try_from(ordinal).map_or(u32::MAX, |value| value);
            tx.execute(
                "INSERT INTO token_parents (token_id, parent_token_id, ordinal)
                 VALUES (?1, ?2, ?3)",
                params![token_id.as_str(), parent.as_str(), ordinal],
            )
            .map_err(|err| RecorderError::Store(err.to_string()))?;
        }
        tx.commit().map_err(|err| RecorderError::Store(err.to_string()))?;
        Ok(TokenRecord {
            token_id,
            row_id: spawn.row_id,
            fork_group_id: spawn.fork_group_id,
            join_group_id: spawn.join_group_id,
            expand_group_id: spawn.expand_group_id,
            branch_name: spawn.branch_name,
            step_in_pipeline: spawn.step_in_pipeline,
            created_at: spawn.created_at,
        })
    }

    fn begin_node_state(&self, open: NodeStateOpen) -> Result<StateId, RecorderError> {
        let state_id = StateId::new(self.next_id("state"));
        let context_before = match &open.context_before {
            Some(value) => Some(Self::json_text(value).map_err(RecorderError::from)?),
            None => None,
        };
        let connection = lock_connection(&self.connection);
        connection
            .execute(
                "INSERT INTO node_states (state_id, token_id, node_id, step_index, attempt,
                    status, input_hash, started_at, context_before_json, input_data_ref)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    state_id.as_str(),
                    open.token_id.as_str(),
                    open.node_id.as_str(),
                    open.step_index,
                    open.attempt,
                    NodeStateStatus::Open.as_str(),
                    open.input_hash,
                    open.started_at.as_unix_millis(),
                    context_before,
                    open.input_data_ref.as_ref().map(PayloadRef::as_str),
                ],
            )
            .map_err(|err| RecorderError::Store(err.to_string()))?;
        Ok(state_id)
    }

    fn complete_node_state(
        &self,
        state_id: &StateId,
        completion: NodeStateCompletion,
    ) -> Result<(), RecorderError> {
        let context_after = match &completion.context_after {
            Some(value) => Some(Self::json_text(value).map_err(RecorderError::from)?),
            None => None,
        };
        let duration = i64::try_from(completion.duration_ms).unwrap_or(i64::MAX);
        let connection = lock_connection(&self.connection);
        let updated = connection
            .execute(
                "UPDATE node_states SET status = ?2, output_hash = ?3, output_data_ref = ?4,
                    context_after_json = ?5, completed_at = ?6, duration_ms = ?7
                 WHERE state_id = ?1 AND status = ?8",
                params![
                    state_id.as_str(),
                    NodeStateStatus::Completed.as_str(),
                    completion.output_hash,
                    completion.output_data_ref.as_ref().map(PayloadRef::as_str),
                    context_after,
                    completion.completed_at.as_unix_millis(),
                    duration,
                    NodeStateStatus::Open.as_str(),
                ],
            )
            .map_err(|err| RecorderError::Store(err.to_string()))?;
        if updated == 0 {
            return Err(state_transition_error(&connection, state_id));
        }
        Ok(())
    }

    fn fail_node_state(
        &self,
        state_id: &StateId,
        error: &Value,
        completed_at: Timestamp,
        duration_ms: u64,
    ) -> Result<(), RecorderError> {
        let error_text = Self::json_text(error).map_err(RecorderError::from)?;
        let duration = i64::try_from(duration_ms).unwrap_or(i64::MAX);
        let connection = lock_connection(&self.connection);
        let updated = connection
            .execute(
                "UPDATE node_states SET status = ?2, error_json = ?3, completed_at = ?4,
                    duration_ms = ?5
                 WHERE state_id = ?1 AND status = ?6",
                params![
                    state_id.as_str(),
                    NodeStateStatus::Failed.as_str(),
                    error_text,
                    completed_at.as_unix_millis(),
                    duration,
                    NodeStateStatus::Open.as_str(),
                ],
            )
            .map_err(|err| RecorderError::Store(err.to_string()))?;
        if updated == 0 {
            return Err(state_transition_error(&connection, state_id));
        }
        Ok(())
    }

    fn record_call(
        &self,
        state_id: &StateId,
        call: CallDraft,
        created_at: Timestamp,
    ) -> Result<CallRecord, RecorderError> {
        let error_text = match &call.error_json {
            Some(value) => Some(Self::json_text(value).map_err(RecorderError::from)?),
            None => None,
        };
        let call_id = self.next_id("call");
        let connection = lock_connection(&self.connection);
        let call_index: u32 = connection
            .query_row(
                "SELECT COUNT(*) FROM calls WHERE state_id = ?1",
                params![state_id.as_str()],
                |row| row.get(0),
            )
            .map_err(|err| RecorderError::Store(err.to_string()))?;
        let latency = call.latency_ms.map(|value| i64::try_from(value).unwrap_or(i64::MAX));
        connection
            .execute(
                "INSERT INTO calls (call_id, state_id, call_index, call_type, status,
                    request_hash, request_ref, response_hash, response_ref, error_json,
                    latency_ms, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    call_id,
                    state_id.as_str(),
                    call_index,
                    call.call_type.as_str(),
                    call.status.as_str(),
                    call.request_hash,
                    call.request_ref.as_ref().map(PayloadRef::as_str),
                    call.response_hash,
                    call.response_ref.as_ref().map(PayloadRef::as_str),
                    error_text,
                    latency,
                    created_at.as_unix_millis(),
                ],
            )
            .map_err(|err| RecorderError::Store(err.to_string()))?;
        Ok(CallRecord {
            call_id,
            state_id: state_id.clone(),
            call_index,
            call_type: call.call_type,
            status: call.status,
            request_hash: call.request_hash,
            request_ref: call.request_ref,
            response_hash: call.response_hash,
            response_ref: call.response_ref,
            error_json: call.error_json,
            latency_ms: call.latency_ms,
            created_at,
        })
    }

    fn record_routing_events(
        &self,
        state_id: &StateId,
        routing_group_id: &RoutingGroupId,
        routes: &[RouteDispatch],
        reason: Option<&RoutingReason>,
        created_at: Timestamp,
    ) -> Result<Vec<RoutingEventRecord>, RecorderError> {
        let reason_hash = match reason {
            Some(reason) => Some(
                content_hash(reason).map_err(|err| RecorderError::Invalid(err.to_string()))?,
            ),
            None => None,
        };
        let mut records = Vec::with_capacity(routes.len());
        let mut connection = lock_connection(&self.connection);
        let tx = connection
            .transaction()
            .map_err(|err| RecorderError::Store(err.to_string()))?;
        for (ordinal, route) in routes.iter().enumerate() {
            let ordinal = u32::try_from(ordinal).map_or(u32::MAX, |value| value);
            let event_id = self.ids.next_id("revent");
            tx.execute(
                "INSERT INTO routing_events (event_id, state_id, edge_id, routing_group_id,
                    ordinal, mode, reason_hash, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    event_id,
                    state_id.as_str(),
                    route.edge_id.as_str(),
                    routing_group_id.as_str(),
                    ordinal,
                    route.mode.as_str(),
                    reason_hash,
                    created_at.as_unix_millis(),
                ],
            )
            .map_err(|err| RecorderError::Store(err.to_string()))?;
            records.push(RoutingEventRecord {
                event_id,
                state_id: state_id.clone(),
                edge_id: route.edge_id.clone(),
                routing_group_id: routing_group_id.clone(),
                ordinal,
                mode: route.mode,
                reason_hash: reason_hash.clone(),
                reason_ref: None,
                created_at,
            });
        }
        tx.commit().map_err(|err| RecorderError::Store(err.to_string()))?;
        Ok(records)
    }

    fn create_batch(
        &self,
        run_id: &RunId,
        aggregation_node_id: &NodeId,
        attempt: u32,
        created_at: Timestamp,
    ) -> Result<BatchRecord, RecorderError> {
        let batch_id = BatchId::new(self.next_id("batch"));
        let connection = lock_connection(&self.connection);
        connection
            .execute(
                "INSERT INTO batches (batch_id, run_id, aggregation_node_id, attempt, status,
                    created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    batch_id.as_str(),
                    run_id.as_str(),
                    aggregation_node_id.as_str(),
                    attempt,
                    BatchStatus::Open.as_str(),
                    created_at.as_unix_millis(),
                ],
            )
            .map_err(|err| RecorderError::Store(err.to_string()))?;
        Ok(BatchRecord {
            batch_id,
            run_id: run_id.clone(),
            aggregation_node_id: aggregation_node_id.clone(),
            attempt,
            status: BatchStatus::Open,
            aggregation_state_id: None,
            trigger_reason: None,
            created_at,
            completed_at: None,
        })
    }

    fn update_batch_status(
        &self,
        batch_id: &BatchId,
        status: BatchStatus,
        update: BatchStatusUpdate,
    ) -> Result<(), RecorderError> {
        let connection = lock_connection(&self.connection);
        let stored: Option<String> = connection
            .query_row(
                "SELECT status FROM batches WHERE batch_id = ?1",
                params![batch_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| RecorderError::Store(err.to_string()))?;
        let Some(stored) = stored else {
            return Err(RecorderError::Missing(format!("batch {batch_id} is unknown")));
        };
        let current = BatchStatus::parse(&stored)
            .map_err(|err| RecorderError::Store(err.to_string()))?;
        let legal = matches!(
            (current, status),
            (BatchStatus::Open, BatchStatus::Triggered | BatchStatus::Executing)
                | (BatchStatus::Triggered, BatchStatus::Executing)
                | (BatchStatus::Executing, BatchStatus::Completed | BatchStatus::Failed)
        );
        if !legal {
            return Err(RecorderError::Invalid(format!(
                "batch {batch_id} cannot transition {} -> {}",
                current.as_str(),
                status.as_str()
            )));
        }
        connection
            .execute(
                "UPDATE batches SET status = ?2,
                    trigger_reason = COALESCE(?3, trigger_reason),
                    aggregation_state_id = COALESCE(?4, aggregation_state_id),
                    completed_at = COALESCE(?5, completed_at)
                 WHERE batch_id = ?1",
                params![
                    batch_id.as_str(),
                    status.as_str(),
                    update.trigger_reason,
                    update.aggregation_state_id.as_ref().map(StateId::as_str),
                    update.completed_at.map(Timestamp::as_unix_millis),
                ],
            )
            .map_err(|err| RecorderError::Store(err.to_string()))?;
        Ok(())
    }

    fn record_batch_member(
        &self,
        batch_id: &BatchId,
        token_id: &TokenId,
        ordinal: u32,
    ) -> Result<(), RecorderError> {
        let connection = lock_connection(&self.connection);
        let status: Option<String> = connection
            .query_row(
                "SELECT status FROM batches WHERE batch_id = ?1",
                params![batch_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| RecorderError::Store(err.to_string()))?;
        let Some(status) = status else {
            return Err(RecorderError::Missing(format!("batch {batch_id} is unknown")));
        };
        if status != BatchStatus::Open.as_str() {
            return Err(RecorderError::Invalid(format!(
                "batch {batch_id} is {status} and no longer accepts members"
            )));
        }
        connection
            .execute(
                "INSERT INTO batch_members (batch_id, token_id, ordinal) VALUES (?1, ?2, ?3)",
                params![batch_id.as_str(), token_id.as_str(), ordinal],
            )
            .map_err(|err| RecorderError::Store(err.to_string()))?;
        Ok(())
    }

    fn record_batch_output(
        &self,
        batch_id: &BatchId,
        output_type: &str,
        output_id: &str,
    ) -> Result<(), RecorderError> {
        let connection = lock_connection(&self.connection);
        connection
            .execute(
                "INSERT INTO batch_outputs (batch_id, output_type, output_id)
                 VALUES (?1, ?2, ?3)",
                params![batch_id.as_str(), output_type, output_id],
            )
            .map_err(|err| RecorderError::Store(err.to_string()))?;
        Ok(())
    }

    fn record_artifact(&self, artifact: ArtifactDraft) -> Result<ArtifactRecord, RecorderError> {
        let artifact_id = ArtifactId::new(self.next_id("artifact"));
        let size = i64::try_from(artifact.size_bytes).unwrap_or(i64::MAX);
        let connection = lock_connection(&self.connection);
        connection
            .execute(
                "INSERT INTO artifacts (artifact_id, run_id, produced_by_state_id, sink_node_id,
                    artifact_type, path_or_uri, content_hash, size_bytes, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    artifact_id.as_str(),
                    artifact.run_id.as_str(),
                    artifact.produced_by_state_id.as_str(),
                    artifact.sink_node_id.as_str(),
                    artifact.artifact_type,
                    artifact.path_or_uri,
                    artifact.content_hash,
                    size,
                    artifact.created_at.as_unix_millis(),
                ],
            )
            .map_err(|err| RecorderError::Store(err.to_string()))?;
        Ok(ArtifactRecord {
            artifact_id,
            run_id: artifact.run_id,
            produced_by_state_id: artifact.produced_by_state_id,
            sink_node_id: artifact.sink_node_id,
            artifact_type: artifact.artifact_type,
            path_or_uri: artifact.path_or_uri,
            content_hash: artifact.content_hash,
            size_bytes: artifact.size_bytes,
            created_at: artifact.created_at,
        })
    }

    fn record_validation_error(&self, draft: ValidationErrorDraft) -> Result<(), RecorderError> {
        let row_data = match &draft.row_data_json {
            Some(value) => Some(Self::json_text(value).map_err(RecorderError::from)?),
            None => None,
        };
        let error_id = self.next_id("verror");
        let connection = lock_connection(&self.connection);
        connection
            .execute(
                "INSERT INTO validation_errors (error_id, run_id, node_id, row_hash,
                    row_data_json, error, schema_mode, destination, violation_type,
                    original_field_name, normalized_field_name, expected_type, actual_type,
                    created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    error_id,
                    draft.run_id.as_str(),
                    draft.node_id.as_ref().map(NodeId::as_str),
                    draft.row_hash,
                    row_data,
                    draft.error,
                    draft.schema_mode,
                    draft.destination,
                    draft.violation_type,
                    draft.original_field_name,
                    draft.normalized_field_name,
                    draft.expected_type,
                    draft.actual_type,
                    draft.created_at.as_unix_millis(),
                ],
            )
            .map_err(|err| RecorderError::Store(err.to_string()))?;
        Ok(())
    }

    fn set_export_status(
        &self,
        run_id: &RunId,
        status: ExportStatus,
        update: ExportStatusUpdate,
    ) -> Result<(), RecorderError> {
        let connection = lock_connection(&self.connection);
        let updated = connection
            .execute(
                "UPDATE runs SET export_status = ?2, export_error = ?3, export_format = ?4,
                    export_sink = ?5, exported_at = ?6
                 WHERE run_id = ?1",
                params![
                    run_id.as_str(),
                    status.as_str(),
                    update.error,
                    update.format,
                    update.sink,
                    update.exported_at.map(Timestamp::as_unix_millis),
                ],
            )
            .map_err(|err| RecorderError::Store(err.to_string()))?;
        if updated == 0 {
            return Err(RecorderError::Missing(format!("run {run_id} is not registered")));
        }
        Ok(())
    }

    fn complete_run(
        &self,
        run_id: &RunId,
        status: RunStatus,
        completed_at: Timestamp,
        reproducibility_grade: Option<String>,
    ) -> Result<(), RecorderError> {
        if !status.is_terminal() {
            return Err(RecorderError::Invalid(format!(
                "complete_run requires a terminal status, got {}",
                status.as_str()
            )));
        }
        let connection = lock_connection(&self.connection);
        let stored: Option<String> = connection
            .query_row(
                "SELECT status FROM runs WHERE run_id = ?1",
                params![run_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| RecorderError::Store(err.to_string()))?;
        let Some(stored) = stored else {
            return Err(RecorderError::Missing(format!("run {run_id} is not registered")));
        };
        let current =
            RunStatus::parse(&stored).map_err(|err| RecorderError::Store(err.to_string()))?;
        if current.is_terminal() {
            if current == status {
                return Ok(());
            }
            return Err(RecorderError::Invalid(format!(
                "run {run_id} already completed as {}; cannot complete as {}",
                current.as_str(),
                status.as_str()
            )));
        }
        connection
            .execute(
                "UPDATE runs SET status = ?2, completed_at = ?3,
                    reproducibility_grade = COALESCE(?4, reproducibility_grade)
                 WHERE run_id = ?1",
                params![
                    run_id.as_str(),
                    status.as_str(),
                    completed_at.as_unix_millis(),
                    reproducibility_grade,
                ],
            )
            .map_err(|err| RecorderError::Store(err.to_string()))?;
        Ok(())
    }

    fn save_checkpoint(&self, draft: CheckpointDraft) -> Result<CheckpointRecord, RecorderError> {
        let state_text = match &draft.aggregation_state_json {
            Some(value) => Some(Self::json_text(value).map_err(RecorderError::from)?),
            None => None,
        };
        let checkpoint_id = CheckpointId::new(self.next_id("checkpoint"));
        let sequence = i64::try_from(draft.sequence_number).unwrap_or(i64::MAX);
        let connection = lock_connection(&self.connection);
        connection
            .execute(
                "INSERT INTO checkpoints (checkpoint_id, run_id, token_id, node_id,
                    sequence_number, created_at, aggregation_state_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    checkpoint_id.as_str(),
                    draft.run_id.as_str(),
                    draft.token_id.as_str(),
                    draft.node_id.as_str(),
                    sequence,
                    draft.created_at.as_unix_millis(),
                    state_text,
                ],
            )
            .map_err(|err| RecorderError::Store(err.to_string()))?;
        Ok(CheckpointRecord {
            checkpoint_id,
            run_id: draft.run_id,
            token_id: draft.token_id,
            node_id: draft.node_id,
            sequence_number: draft.sequence_number,
            created_at: Some(draft.created_at),
            aggregation_state_json: draft.aggregation_state_json,
        })
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Distinguishes a missing state from an already-transitioned one.
fn state_transition_error(connection: &Connection, state_id: &StateId) -> RecorderError {
    let stored: Result<Option<String>, _> = connection
        .query_row(
            "SELECT status FROM node_states WHERE state_id = ?1",
            params![state_id.as_str()],
            |row| row.get(0),
        )
        .optional();
    match stored {
        Ok(Some(status)) => RecorderError::Invalid(format!(
            "state {state_id} already transitioned to {status}"
        )),
        Ok(None) => RecorderError::Missing(format!("state {state_id} is unknown")),
        Err(err) => RecorderError::Store(err.to_string()),
    }
}
