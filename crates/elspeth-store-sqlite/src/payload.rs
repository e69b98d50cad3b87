// crates/elspeth-store-sqlite/src/payload.rs
// ============================================================================
// Module: SQLite Payload Store
// Description: Content-addressed blob storage with purge tombstones.
// Purpose: Persist row payloads keyed by their content hash.
// Dependencies: elspeth-core, rusqlite
// ============================================================================

//! ## Overview
//! Payloads are stored once per content hash; storing the same bytes twice
//! is a no-op. Retention purges drop the bytes but keep the hash row, so
//! later retrievals report the distinguishable purged state rather than a
//! generic miss. Reads verify the stored bytes still hash to their key and
//! fail closed on mismatch.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;

use elspeth_core::PayloadStore;
use elspeth_core::PayloadStoreError;
use elspeth_core::contracts::PayloadRef;
use elspeth_core::contracts::Timestamp;
use elspeth_core::hash_bytes;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::params;

use crate::store::lock_connection;

// ============================================================================
// SECTION: Store
// ============================================================================

/// SQLite-backed content-addressed payload store.
#[derive(Clone)]
pub struct SqlitePayloadStore {
    /// Shared connection guarded by a mutex.
    connection: Arc<Mutex<Connection>>,
}

impl SqlitePayloadStore {
    /// Opens a payload database, initializing the schema when absent.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadStoreError::Backend`] when the database cannot be
    /// opened or initialized.
    pub fn open(path: &Path) -> Result<Self, PayloadStoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|err| PayloadStoreError::Backend(err.to_string()))?;
            }
        }
        let connection = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )
        .map_err(|err| PayloadStoreError::Backend(err.to_string()))?;
        connection
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS payloads (
                    payload_ref TEXT PRIMARY KEY,
                    bytes BLOB,
                    size_bytes INTEGER NOT NULL,
                    created_at INTEGER,
                    purged_at INTEGER
                );",
            )
            .map_err(|err| PayloadStoreError::Backend(err.to_string()))?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Purges a payload's bytes while preserving its hash row.
    ///
    /// Returns true when the payload existed.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadStoreError::Backend`] when the write fails.
    pub fn purge(
        &self,
        reference: &PayloadRef,
        purged_at: Timestamp,
    ) -> Result<bool, PayloadStoreError> {
        let connection = lock_connection(&self.connection);
        let updated = connection
            .execute(
                "UPDATE payloads SET bytes = NULL, purged_at = ?2 WHERE payload_ref = ?1",
                params![reference.as_str(), purged_at.as_unix_millis()],
            )
            .map_err(|err| PayloadStoreError::Backend(err.to_string()))?;
        Ok(updated > 0)
    }
}

impl PayloadStore for SqlitePayloadStore {
    fn store(&self, bytes: &[u8]) -> Result<PayloadRef, PayloadStoreError> {
        let reference = PayloadRef::new(hash_bytes(bytes));
        let size = i64::try_from(bytes.len()).unwrap_or(i64::MAX);
        let connection = lock_connection(&self.connection);
        connection
            .execute(
                "INSERT OR IGNORE INTO payloads (payload_ref, bytes, size_bytes)
                 VALUES (?1, ?2, ?3)",
                params![reference.as_str(), bytes, size],
            )
            .map_err(|err| PayloadStoreError::Backend(err.to_string()))?;
        Ok(reference)
    }

    fn retrieve(&self, reference: &PayloadRef) -> Result<Vec<u8>, PayloadStoreError> {
        let connection = lock_connection(&self.connection);
        let stored: Option<Option<Vec<u8>>> = connection
            .query_row(
                "SELECT bytes FROM payloads WHERE payload_ref = ?1",
                params![reference.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| PayloadStoreError::Backend(err.to_string()))?;
        match stored {
            None => Err(PayloadStoreError::NotFound {
                reference: reference.clone(),
            }),
            Some(None) => Err(PayloadStoreError::Purged {
                reference: reference.clone(),
            }),
            Some(Some(bytes)) => {
                if hash_bytes(&bytes) != reference.as_str() {
                    return Err(PayloadStoreError::Backend(format!(
                        "payload {reference} failed content-hash verification"
                    )));
                }
                Ok(bytes)
            }
        }
    }

    fn exists(&self, reference: &PayloadRef) -> Result<bool, PayloadStoreError> {
        let connection = lock_connection(&self.connection);
        let stored: Option<Option<i64>> = connection
            .query_row(
                "SELECT CASE WHEN bytes IS NULL THEN NULL ELSE 1 END
                 FROM payloads WHERE payload_ref = ?1",
                params![reference.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| PayloadStoreError::Backend(err.to_string()))?;
        Ok(matches!(stored, Some(Some(_))))
    }
}
