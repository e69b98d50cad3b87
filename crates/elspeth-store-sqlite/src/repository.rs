// crates/elspeth-store-sqlite/src/repository.rs
// ============================================================================
// Module: Landscape Repositories
// Description: Strict read surface over the Landscape tables.
// Purpose: Decode ledger rows into contract records, failing on bad data.
// Dependencies: elspeth-core, rusqlite, serde_json
// ============================================================================

//! ## Overview
//! Repositories map raw ledger rows to domain records, enforcing enum
//! integrity on every read: a foreign string in an enum column is a fatal
//! integrity error, never a default. The ledger is Tier-1 data; there is no
//! soft parsing anywhere on this path.

// ============================================================================
// SECTION: Imports
// ============================================================================

use elspeth_core::ArtifactRecord;
use elspeth_core::BatchMemberRecord;
use elspeth_core::BatchRecord;
use elspeth_core::BatchStatus;
use elspeth_core::CallRecord;
use elspeth_core::CallStatus;
use elspeth_core::CallType;
use elspeth_core::CheckpointRecord;
use elspeth_core::Determinism;
use elspeth_core::EdgeRecord;
use elspeth_core::ExportStatus;
use elspeth_core::NodeRecord;
use elspeth_core::NodeStateRecord;
use elspeth_core::NodeStateStatus;
use elspeth_core::NodeType;
use elspeth_core::PayloadStore;
use elspeth_core::PayloadStoreError;
use elspeth_core::RoutingEventRecord;
use elspeth_core::RoutingMode;
use elspeth_core::RowDataResult;
use elspeth_core::RowDataState;
use elspeth_core::RowLineage;
use elspeth_core::RowRecord;
use elspeth_core::RunRecord;
use elspeth_core::RunStatus;
use elspeth_core::Timestamp;
use elspeth_core::TokenRecord;
use elspeth_core::UnknownEnumVariant;
use elspeth_core::contracts::ArtifactId;
use elspeth_core::contracts::BatchId;
use elspeth_core::contracts::CheckpointId;
use elspeth_core::contracts::EdgeId;
use elspeth_core::contracts::NodeId;
use elspeth_core::contracts::PayloadRef;
use elspeth_core::contracts::RoutingGroupId;
use elspeth_core::contracts::RowId;
use elspeth_core::contracts::RunId;
use elspeth_core::contracts::StateId;
use elspeth_core::contracts::TokenId;
use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::params;
use serde_json::Value;

use crate::store::SqliteLandscape;
use crate::store::SqliteLandscapeError;
use crate::store::lock_connection;

// ============================================================================
// SECTION: Decode Helpers
// ============================================================================

/// Lifts an enum decode failure into a fatal integrity error.
fn integrity(err: &UnknownEnumVariant) -> SqliteLandscapeError {
    SqliteLandscapeError::Integrity(err.to_string())
}

/// Parses a JSON TEXT column.
fn json_column(text: Option<String>) -> Result<Option<Value>, SqliteLandscapeError> {
    match text {
        Some(text) => serde_json::from_str(&text)
            .map(Some)
            .map_err(|err| SqliteLandscapeError::Integrity(err.to_string())),
        None => Ok(None),
    }
}

/// Converts a stored millis column into a timestamp.
fn timestamp(millis: i64) -> Timestamp {
    Timestamp::from_unix_millis(millis)
}

/// Converts a stored non-negative integer column.
fn stored_u64(value: i64, column: &str) -> Result<u64, SqliteLandscapeError> {
    u64::try_from(value).map_err(|_| {
        SqliteLandscapeError::Integrity(format!("column {column} holds negative value {value}"))
    })
}

// ============================================================================
// SECTION: Repository
// ============================================================================

/// Strict read surface over one Landscape database.
#[derive(Clone)]
pub struct LandscapeRepository {
    /// Backing store handle.
    store: SqliteLandscape,
}

impl LandscapeRepository {
    /// Wraps a Landscape store.
    #[must_use]
    pub const fn new(store: SqliteLandscape) -> Self {
        Self {
            store,
        }
    }

    /// Loads a run by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteLandscapeError`] on read or decode failures.
    pub fn get_run(&self, run_id: &RunId) -> Result<Option<RunRecord>, SqliteLandscapeError> {
        let connection = lock_connection(&self.store.connection);
        let record = connection
            .query_row(
                "SELECT run_id, started_at, completed_at, config_hash, settings_json,
                    canonical_version, status, reproducibility_grade, source_schema_json,
                    source_field_resolution_json, schema_contract_json, schema_contract_hash,
                    export_status, export_error, exported_at, export_format, export_sink
                 FROM runs WHERE run_id = ?1",
                params![run_id.as_str()],
                decode_run,
            )
            .optional()?;
        record.transpose()
    }

    /// Lists runs in start order.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteLandscapeError`] on read or decode failures.
    pub fn list_runs(&self) -> Result<Vec<RunRecord>, SqliteLandscapeError> {
        let connection = lock_connection(&self.store.connection);
        let mut statement = connection.prepare(
            "SELECT run_id, started_at, completed_at, config_hash, settings_json,
                canonical_version, status, reproducibility_grade, source_schema_json,
                source_field_resolution_json, schema_contract_json, schema_contract_hash,
                export_status, export_error, exported_at, export_format, export_sink
             FROM runs ORDER BY started_at, run_id",
        )?;
        let rows = statement.query_map([], decode_run)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row??);
        }
        Ok(records)
    }

    /// Lists a run's nodes in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteLandscapeError`] on read or decode failures.
    pub fn list_nodes(&self, run_id: &RunId) -> Result<Vec<NodeRecord>, SqliteLandscapeError> {
        let connection = lock_connection(&self.store.connection);
        let mut statement = connection.prepare(
            "SELECT node_id, run_id, plugin_name, node_type, plugin_version, determinism,
                config_hash, config_json, schema_hash, sequence_in_pipeline, registered_at,
                schema_mode, schema_fields_json, input_contract_json, output_contract_json
             FROM nodes WHERE run_id = ?1 ORDER BY rowid",
        )?;
        let rows = statement.query_map(params![run_id.as_str()], decode_node)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row??);
        }
        Ok(records)
    }

    /// Lists a run's edges in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteLandscapeError`] on read or decode failures.
    pub fn list_edges(&self, run_id: &RunId) -> Result<Vec<EdgeRecord>, SqliteLandscapeError> {
        let connection = lock_connection(&self.store.connection);
        let mut statement = connection.prepare(
            "SELECT edge_id, run_id, from_node_id, to_node_id, label, default_mode, created_at
             FROM edges WHERE run_id = ?1 ORDER BY rowid",
        )?;
        let rows = statement.query_map(params![run_id.as_str()], decode_edge)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row??);
        }
        Ok(records)
    }

    /// Lists a run's rows in ingestion order.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteLandscapeError`] on read or decode failures.
    pub fn list_rows(&self, run_id: &RunId) -> Result<Vec<RowRecord>, SqliteLandscapeError> {
        let connection = lock_connection(&self.store.connection);
        let mut statement = connection.prepare(
            "SELECT row_id, run_id, source_node_id, row_index, source_data_hash,
                source_data_ref, created_at
             FROM rows WHERE run_id = ?1 ORDER BY row_index",
        )?;
        let rows = statement.query_map(params![run_id.as_str()], decode_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row??);
        }
        Ok(records)
    }

    /// Lists a row's tokens in creation order.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteLandscapeError`] on read or decode failures.
    pub fn list_tokens(&self, row_id: &RowId) -> Result<Vec<TokenRecord>, SqliteLandscapeError> {
        let connection = lock_connection(&self.store.connection);
        let mut statement = connection.prepare(
            "SELECT token_id, row_id, fork_group_id, join_group_id, expand_group_id,
                branch_name, step_in_pipeline, created_at
             FROM tokens WHERE row_id = ?1 ORDER BY rowid",
        )?;
        let rows = statement.query_map(params![row_id.as_str()], decode_token)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Lists a token's node states in invocation order.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteLandscapeError`] on read or decode failures.
    pub fn list_node_states(
        &self,
        token_id: &TokenId,
    ) -> Result<Vec<NodeStateRecord>, SqliteLandscapeError> {
        let connection = lock_connection(&self.store.connection);
        let mut statement = connection.prepare(
            "SELECT state_id, token_id, node_id, step_index, attempt, status, input_hash,
                output_hash, started_at, completed_at, duration_ms, error_json,
                context_before_json, context_after_json, input_data_ref, output_data_ref
             FROM node_states WHERE token_id = ?1 ORDER BY rowid",
        )?;
        let rows = statement.query_map(params![token_id.as_str()], decode_node_state)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row??);
        }
        Ok(records)
    }

    /// Lists a state's external calls by call index.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteLandscapeError`] on read or decode failures.
    pub fn list_calls(&self, state_id: &StateId) -> Result<Vec<CallRecord>, SqliteLandscapeError> {
        let connection = lock_connection(&self.store.connection);
        let mut statement = connection.prepare(
            "SELECT call_id, state_id, call_index, call_type, status, request_hash,
                request_ref, response_hash, response_ref, error_json, latency_ms, created_at
             FROM calls WHERE state_id = ?1 ORDER BY call_index",
        )?;
        let rows = statement.query_map(params![state_id.as_str()], decode_call)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row??);
        }
        Ok(records)
    }

    /// Lists a state's routing events by ordinal.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteLandscapeError`] on read or decode failures.
    pub fn list_routing_events(
        &self,
        state_id: &StateId,
    ) -> Result<Vec<RoutingEventRecord>, SqliteLandscapeError> {
        let connection = lock_connection(&self.store.connection);
        let mut statement = connection.prepare(
            "SELECT event_id, state_id, edge_id, routing_group_id, ordinal, mode,
                reason_hash, reason_ref, created_at
             FROM routing_events WHERE state_id = ?1 ORDER BY ordinal",
        )?;
        let rows = statement.query_map(params![state_id.as_str()], decode_routing_event)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row??);
        }
        Ok(records)
    }

    /// Lists a run's batches in creation order.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteLandscapeError`] on read or decode failures.
    pub fn list_batches(&self, run_id: &RunId) -> Result<Vec<BatchRecord>, SqliteLandscapeError> {
        let connection = lock_connection(&self.store.connection);
        let mut statement = connection.prepare(
            "SELECT batch_id, run_id, aggregation_node_id, attempt, status,
                aggregation_state_id, trigger_reason, created_at, completed_at
             FROM batches WHERE run_id = ?1 ORDER BY rowid",
        )?;
        let rows = statement.query_map(params![run_id.as_str()], decode_batch)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row??);
        }
        Ok(records)
    }

    /// Lists a batch's members by ordinal.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteLandscapeError`] on read failures.
    pub fn list_batch_members(
        &self,
        batch_id: &BatchId,
    ) -> Result<Vec<BatchMemberRecord>, SqliteLandscapeError> {
        let connection = lock_connection(&self.store.connection);
        let mut statement = connection.prepare(
            "SELECT batch_id, token_id, ordinal FROM batch_members
             WHERE batch_id = ?1 ORDER BY ordinal",
        )?;
        let rows = statement.query_map(params![batch_id.as_str()], |row| {
            Ok(BatchMemberRecord {
                batch_id: BatchId::new(row.get::<_, String>(0)?),
                token_id: TokenId::new(row.get::<_, String>(1)?),
                ordinal: row.get(2)?,
            })
        })?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Lists a run's artifacts in creation order.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteLandscapeError`] on read failures.
    pub fn list_artifacts(
        &self,
        run_id: &RunId,
    ) -> Result<Vec<ArtifactRecord>, SqliteLandscapeError> {
        let connection = lock_connection(&self.store.connection);
        let mut statement = connection.prepare(
            "SELECT artifact_id, run_id, produced_by_state_id, sink_node_id, artifact_type,
                path_or_uri, content_hash, size_bytes, created_at
             FROM artifacts WHERE run_id = ?1 ORDER BY rowid",
        )?;
        let rows = statement.query_map(params![run_id.as_str()], decode_artifact)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row??);
        }
        Ok(records)
    }

    /// Returns the latest checkpoint for a run, if any.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteLandscapeError`] on read or decode failures.
    pub fn latest_checkpoint(
        &self,
        run_id: &RunId,
    ) -> Result<Option<CheckpointRecord>, SqliteLandscapeError> {
        let connection = lock_connection(&self.store.connection);
        let record = connection
            .query_row(
                "SELECT checkpoint_id, run_id, token_id, node_id, sequence_number, created_at,
                    aggregation_state_json
                 FROM checkpoints WHERE run_id = ?1
                 ORDER BY sequence_number DESC LIMIT 1",
                params![run_id.as_str()],
                decode_checkpoint,
            )
            .optional()?;
        record.transpose()
    }

    /// Retrieves a row's source payload as a discriminated result.
    ///
    /// Callers must switch on the returned state; absent bytes alone do not
    /// distinguish purge from never-stored.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteLandscapeError`] on read failures or payload backend
    /// errors.
    pub fn row_data(
        &self,
        row_id: &RowId,
        payloads: Option<&dyn PayloadStore>,
    ) -> Result<RowDataResult, SqliteLandscapeError> {
        let row = {
            let connection = lock_connection(&self.store.connection);
            connection
                .query_row(
                    "SELECT row_id, run_id, source_node_id, row_index, source_data_hash,
                        source_data_ref, created_at
                     FROM rows WHERE row_id = ?1",
                    params![row_id.as_str()],
                    decode_row,
                )
                .optional()?
                .transpose()?
        };
        let Some(row) = row else {
            return Ok(RowDataResult::absent(RowDataState::RowNotFound));
        };
        match (&row.source_data_ref, payloads) {
            (None, _) => Ok(RowDataResult::absent(RowDataState::NeverStored)),
            (Some(_), None) => Ok(RowDataResult::absent(RowDataState::StoreNotConfigured)),
            (Some(reference), Some(store)) => match store.retrieve(reference) {
                Ok(bytes) => Ok(RowDataResult::available(bytes)),
                Err(PayloadStoreError::Purged { .. } | PayloadStoreError::NotFound { .. }) => {
                    Ok(RowDataResult::absent(RowDataState::Purged))
                }
                Err(PayloadStoreError::Backend(message)) => Err(SqliteLandscapeError::Io(message)),
            },
        }
    }

    /// Assembles the lineage view for one row.
    ///
    /// Payload retrieval goes through the store's discriminated result:
    /// purge preserves the hash while the bytes disappear.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteLandscapeError`] on read or decode failures.
    pub fn explain_row(
        &self,
        row_id: &RowId,
        payloads: Option<&dyn PayloadStore>,
    ) -> Result<Option<RowLineage>, SqliteLandscapeError> {
        let row = {
            let connection = lock_connection(&self.store.connection);
            connection
                .query_row(
                    "SELECT row_id, run_id, source_node_id, row_index, source_data_hash,
                        source_data_ref, created_at
                     FROM rows WHERE row_id = ?1",
                    params![row_id.as_str()],
                    decode_row,
                )
                .optional()?
                .transpose()?
        };
        let Some(row) = row else {
            return Ok(None);
        };
        let tokens = self.list_tokens(&row.row_id)?;

        let (data_state, source_data) = match (&row.source_data_ref, payloads) {
            (None, _) => (RowDataState::NeverStored, None),
            (Some(_), None) => (RowDataState::StoreNotConfigured, None),
            (Some(reference), Some(store)) => match store.retrieve(reference) {
                Ok(bytes) => {
                    let value: Value = serde_json::from_slice(&bytes).map_err(|err| {
                        SqliteLandscapeError::Integrity(format!(
                            "payload {reference} is not valid json: {err}"
                        ))
                    })?;
                    (RowDataState::Available, Some(value))
                }
                Err(PayloadStoreError::Purged { .. }) => (RowDataState::Purged, None),
                Err(PayloadStoreError::NotFound { .. }) => (RowDataState::Purged, None),
                Err(PayloadStoreError::Backend(message)) => {
                    return Err(SqliteLandscapeError::Io(message));
                }
            },
        };
        let payload_available = data_state == RowDataState::Available;
        Ok(Some(RowLineage {
            row,
            data_state,
            payload_available,
            source_data,
            tokens,
        }))
    }
}

// ============================================================================
// SECTION: Row Decoders
// ============================================================================

/// Decodes one `runs` row.
fn decode_run(row: &Row<'_>) -> rusqlite::Result<Result<RunRecord, SqliteLandscapeError>> {
    let status: String = row.get(6)?;
    let export_status: Option<String> = row.get(12)?;
    Ok(build_run(row, &status, export_status.as_deref()))
}

/// Builds a run record, enforcing enum integrity.
fn build_run(
    row: &Row<'_>,
    status: &str,
    export_status: Option<&str>,
) -> Result<RunRecord, SqliteLandscapeError> {
    let status = RunStatus::parse(status).map_err(|err| integrity(&err))?;
    let export_status = export_status
        .map(ExportStatus::parse)
        .transpose()
        .map_err(|err| integrity(&err))?;
    let read = |index: usize| -> Result<Option<String>, SqliteLandscapeError> {
        row.get(index).map_err(|err| SqliteLandscapeError::Db(err.to_string()))
    };
    let settings_text: String =
        row.get(4).map_err(|err| SqliteLandscapeError::Db(err.to_string()))?;
    let settings_json: Value = serde_json::from_str(&settings_text)
        .map_err(|err| SqliteLandscapeError::Integrity(err.to_string()))?;
    Ok(RunRecord {
        run_id: RunId::new(
            row.get::<_, String>(0).map_err(|err| SqliteLandscapeError::Db(err.to_string()))?,
        ),
        started_at: timestamp(
            row.get(1).map_err(|err| SqliteLandscapeError::Db(err.to_string()))?,
        ),
        completed_at: row
            .get::<_, Option<i64>>(2)
            .map_err(|err| SqliteLandscapeError::Db(err.to_string()))?
            .map(timestamp),
        config_hash: row.get(3).map_err(|err| SqliteLandscapeError::Db(err.to_string()))?,
        settings_json,
        canonical_version: row
            .get(5)
            .map_err(|err| SqliteLandscapeError::Db(err.to_string()))?,
        status,
        reproducibility_grade: read(7)?,
        source_schema_json: json_column(read(8)?)?,
        source_field_resolution_json: json_column(read(9)?)?,
        schema_contract_json: json_column(read(10)?)?,
        schema_contract_hash: read(11)?,
        export_status,
        export_error: read(13)?,
        exported_at: row
            .get::<_, Option<i64>>(14)
            .map_err(|err| SqliteLandscapeError::Db(err.to_string()))?
            .map(timestamp),
        export_format: read(15)?,
        export_sink: read(16)?,
    })
}

/// Decodes one `nodes` row.
fn decode_node(row: &Row<'_>) -> rusqlite::Result<Result<NodeRecord, SqliteLandscapeError>> {
    let node_type: String = row.get(3)?;
    let determinism: String = row.get(5)?;
    let config_text: String = row.get(7)?;
    let schema_fields: Option<String> = row.get(12)?;
    let input_contract: Option<String> = row.get(13)?;
    let output_contract: Option<String> = row.get(14)?;
    let record = (|| {
        let node_type = NodeType::parse(&node_type).map_err(|err| integrity(&err))?;
        let determinism = Determinism::parse(&determinism).map_err(|err| integrity(&err))?;
        let config_json: Value = serde_json::from_str(&config_text)
            .map_err(|err| SqliteLandscapeError::Integrity(err.to_string()))?;
        Ok(NodeRecord {
            node_id: NodeId::new(
                row.get::<_, String>(0)
                    .map_err(|err| SqliteLandscapeError::Db(err.to_string()))?,
            ),
            run_id: RunId::new(
                row.get::<_, String>(1)
                    .map_err(|err| SqliteLandscapeError::Db(err.to_string()))?,
            ),
            plugin_name: row.get(2).map_err(|err| SqliteLandscapeError::Db(err.to_string()))?,
            node_type,
            plugin_version: row
                .get(4)
                .map_err(|err| SqliteLandscapeError::Db(err.to_string()))?,
            determinism,
            config_hash: row.get(6).map_err(|err| SqliteLandscapeError::Db(err.to_string()))?,
            config_json,
            schema_hash: row.get(8).map_err(|err| SqliteLandscapeError::Db(err.to_string()))?,
            sequence_in_pipeline: row
                .get(9)
                .map_err(|err| SqliteLandscapeError::Db(err.to_string()))?,
            registered_at: timestamp(
                row.get(10).map_err(|err| SqliteLandscapeError::Db(err.to_string()))?,
            ),
            schema_mode: row.get(11).map_err(|err| SqliteLandscapeError::Db(err.to_string()))?,
            schema_fields_json: json_column(schema_fields)?,
            input_contract_json: json_column(input_contract)?,
            output_contract_json: json_column(output_contract)?,
        })
    })();
    Ok(record)
}

/// Decodes one `edges` row.
fn decode_edge(row: &Row<'_>) -> rusqlite::Result<Result<EdgeRecord, SqliteLandscapeError>> {
    let mode: String = row.get(5)?;
    let edge_id: String = row.get(0)?;
    let run_id: String = row.get(1)?;
    let from: String = row.get(2)?;
    let to: String = row.get(3)?;
    let label: String = row.get(4)?;
    let created_at: i64 = row.get(6)?;
    let record = RoutingMode::parse(&mode).map_err(|err| integrity(&err)).map(|mode| EdgeRecord {
        edge_id: EdgeId::new(edge_id),
        run_id: RunId::new(run_id),
        from_node_id: NodeId::new(from),
        to_node_id: NodeId::new(to),
        label,
        default_mode: mode,
        created_at: timestamp(created_at),
    });
    Ok(record)
}

/// Decodes one `rows` row.
fn decode_row(row: &Row<'_>) -> rusqlite::Result<Result<RowRecord, SqliteLandscapeError>> {
    let row_id: String = row.get(0)?;
    let run_id: String = row.get(1)?;
    let source_node: String = row.get(2)?;
    let row_index: i64 = row.get(3)?;
    let hash: String = row.get(4)?;
    let reference: Option<String> = row.get(5)?;
    let created_at: i64 = row.get(6)?;
    let record = stored_u64(row_index, "rows.row_index").map(|row_index| RowRecord {
        row_id: RowId::new(row_id),
        run_id: RunId::new(run_id),
        source_node_id: NodeId::new(source_node),
        row_index,
        source_data_hash: hash,
        source_data_ref: reference.map(PayloadRef::new),
        created_at: timestamp(created_at),
    });
    Ok(record)
}

/// Decodes one `tokens` row.
fn decode_token(row: &Row<'_>) -> rusqlite::Result<TokenRecord> {
    Ok(TokenRecord {
        token_id: TokenId::new(row.get::<_, String>(0)?),
        row_id: RowId::new(row.get::<_, String>(1)?),
        fork_group_id: row.get::<_, Option<String>>(2)?.map(RoutingGroupId::new),
        join_group_id: row.get::<_, Option<String>>(3)?.map(RoutingGroupId::new),
        expand_group_id: row.get::<_, Option<String>>(4)?.map(RoutingGroupId::new),
        branch_name: row.get(5)?,
        step_in_pipeline: row.get(6)?,
        created_at: timestamp(row.get(7)?),
    })
}

/// Decodes one `node_states` row.
fn decode_node_state(
    row: &Row<'_>,
) -> rusqlite::Result<Result<NodeStateRecord, SqliteLandscapeError>> {
    let status: String = row.get(5)?;
    let error_text: Option<String> = row.get(11)?;
    let before_text: Option<String> = row.get(12)?;
    let after_text: Option<String> = row.get(13)?;
    let duration: Option<i64> = row.get(10)?;
    let record = (|| {
        let status = NodeStateStatus::parse(&status).map_err(|err| integrity(&err))?;
        let duration_ms = duration
            .map(|value| stored_u64(value, "node_states.duration_ms"))
            .transpose()?;
        Ok(NodeStateRecord {
            state_id: StateId::new(
                row.get::<_, String>(0)
                    .map_err(|err| SqliteLandscapeError::Db(err.to_string()))?,
            ),
            token_id: TokenId::new(
                row.get::<_, String>(1)
                    .map_err(|err| SqliteLandscapeError::Db(err.to_string()))?,
            ),
            node_id: NodeId::new(
                row.get::<_, String>(2)
                    .map_err(|err| SqliteLandscapeError::Db(err.to_string()))?,
            ),
            step_index: row.get(3).map_err(|err| SqliteLandscapeError::Db(err.to_string()))?,
            attempt: row.get(4).map_err(|err| SqliteLandscapeError::Db(err.to_string()))?,
            status,
            input_hash: row.get(6).map_err(|err| SqliteLandscapeError::Db(err.to_string()))?,
            output_hash: row.get(7).map_err(|err| SqliteLandscapeError::Db(err.to_string()))?,
            started_at: timestamp(
                row.get(8).map_err(|err| SqliteLandscapeError::Db(err.to_string()))?,
            ),
            completed_at: row
                .get::<_, Option<i64>>(9)
                .map_err(|err| SqliteLandscapeError::Db(err.to_string()))?
                .map(timestamp),
            duration_ms,
            error_json: json_column(error_text)?,
            context_before_json: json_column(before_text)?,
            context_after_json: json_column(after_text)?,
            input_data_ref: row
                .get::<_, Option<String>>(14)
                .map_err(|err| SqliteLandscapeError::Db(err.to_string()))?
                .map(PayloadRef::new),
            output_data_ref: row
                .get::<_, Option<String>>(15)
                .map_err(|err| SqliteLandscapeError::Db(err.to_string()))?
                .map(PayloadRef::new),
        })
    })();
    Ok(record)
}

/// Decodes one `calls` row.
fn decode_call(row: &Row<'_>) -> rusqlite::Result<Result<CallRecord, SqliteLandscapeError>> {
    let call_type: String = row.get(3)?;
    let status: String = row.get(4)?;
    let error_text: Option<String> = row.get(9)?;
    let latency: Option<i64> = row.get(10)?;
    let record = (|| {
        let call_type = CallType::parse(&call_type).map_err(|err| integrity(&err))?;
        let status = CallStatus::parse(&status).map_err(|err| integrity(&err))?;
        let latency_ms =
            latency.map(|value| stored_u64(value, "calls.latency_ms")).transpose()?;
        Ok(CallRecord {
            call_id: row.get(0).map_err(|err| SqliteLandscapeError::Db(err.to_string()))?,
            state_id: StateId::new(
                row.get::<_, String>(1)
                    .map_err(|err| SqliteLandscapeError::Db(err.to_string()))?,
            ),
            call_index: row.get(2).map_err(|err| SqliteLandscapeError::Db(err.to_string()))?,
            call_type,
            status,
            request_hash: row.get(5).map_err(|err| SqliteLandscapeError::Db(err.to_string()))?,
            request_ref: row
                .get::<_, Option<String>>(6)
                .map_err(|err| SqliteLandscapeError::Db(err.to_string()))?
                .map(PayloadRef::new),
            response_hash: row.get(7).map_err(|err| SqliteLandscapeError::Db(err.to_string()))?,
            response_ref: row
                .get::<_, Option<String>>(8)
                .map_err(|err| SqliteLandscapeError::Db(err.to_string()))?
                .map(PayloadRef::new),
            error_json: json_column(error_text)?,
            latency_ms,
            created_at: timestamp(
                row.get(11).map_err(|err| SqliteLandscapeError::Db(err.to_string()))?,
            ),
        })
    })();
    Ok(record)
}

/// Decodes one `routing_events` row.
fn decode_routing_event(
    row: &Row<'_>,
) -> rusqlite::Result<Result<RoutingEventRecord, SqliteLandscapeError>> {
    let mode: String = row.get(5)?;
    let event_id: String = row.get(0)?;
    let state_id: String = row.get(1)?;
    let edge_id: String = row.get(2)?;
    let group: String = row.get(3)?;
    let ordinal: u32 = row.get(4)?;
    let reason_hash: Option<String> = row.get(6)?;
    let reason_ref: Option<String> = row.get(7)?;
    let created_at: i64 = row.get(8)?;
    let record =
        RoutingMode::parse(&mode).map_err(|err| integrity(&err)).map(|mode| RoutingEventRecord {
            event_id,
            state_id: StateId::new(state_id),
            edge_id: EdgeId::new(edge_id),
            routing_group_id: RoutingGroupId::new(group),
            ordinal,
            mode,
            reason_hash,
            reason_ref: reason_ref.map(PayloadRef::new),
            created_at: timestamp(created_at),
        });
    Ok(record)
}

/// Decodes one `batches` row.
fn decode_batch(row: &Row<'_>) -> rusqlite::Result<Result<BatchRecord, SqliteLandscapeError>> {
    let status: String = row.get(4)?;
    let batch_id: String = row.get(0)?;
    let run_id: String = row.get(1)?;
    let node_id: String = row.get(2)?;
    let attempt: u32 = row.get(3)?;
    let state_id: Option<String> = row.get(5)?;
    let trigger_reason: Option<String> = row.get(6)?;
    let created_at: i64 = row.get(7)?;
    let completed_at: Option<i64> = row.get(8)?;
    let record =
        BatchStatus::parse(&status).map_err(|err| integrity(&err)).map(|status| BatchRecord {
            batch_id: BatchId::new(batch_id),
            run_id: RunId::new(run_id),
            aggregation_node_id: NodeId::new(node_id),
            attempt,
            status,
            aggregation_state_id: state_id.map(StateId::new),
            trigger_reason,
            created_at: timestamp(created_at),
            completed_at: completed_at.map(timestamp),
        });
    Ok(record)
}

/// Decodes one `artifacts` row.
fn decode_artifact(
    row: &Row<'_>,
) -> rusqlite::Result<Result<ArtifactRecord, SqliteLandscapeError>> {
    let artifact_id: String = row.get(0)?;
    let run_id: String = row.get(1)?;
    let state_id: String = row.get(2)?;
    let sink_node: String = row.get(3)?;
    let artifact_type: String = row.get(4)?;
    let path_or_uri: String = row.get(5)?;
    let content_hash: String = row.get(6)?;
    let size_bytes: i64 = row.get(7)?;
    let created_at: i64 = row.get(8)?;
    let record =
        stored_u64(size_bytes, "artifacts.size_bytes").map(|size_bytes| ArtifactRecord {
            artifact_id: ArtifactId::new(artifact_id),
            run_id: RunId::new(run_id),
            produced_by_state_id: StateId::new(state_id),
            sink_node_id: NodeId::new(sink_node),
            artifact_type,
            path_or_uri,
            content_hash,
            size_bytes,
            created_at: timestamp(created_at),
        });
    Ok(record)
}

/// Decodes one `checkpoints` row.
fn decode_checkpoint(
    row: &Row<'_>,
) -> rusqlite::Result<Result<CheckpointRecord, SqliteLandscapeError>> {
    let checkpoint_id: String = row.get(0)?;
    let run_id: String = row.get(1)?;
    let token_id: String = row.get(2)?;
    let node_id: String = row.get(3)?;
    let sequence: i64 = row.get(4)?;
    let created_at: Option<i64> = row.get(5)?;
    let state_text: Option<String> = row.get(6)?;
    let record = (|| {
        let sequence_number = stored_u64(sequence, "checkpoints.sequence_number")?;
        Ok(CheckpointRecord {
            checkpoint_id: CheckpointId::new(checkpoint_id),
            run_id: RunId::new(run_id),
            token_id: TokenId::new(token_id),
            node_id: NodeId::new(node_id),
            sequence_number,
            created_at: created_at.map(timestamp),
            aggregation_state_json: json_column(state_text)?,
        })
    })();
    Ok(record)
}
