// crates/elspeth-plugins/src/sink.rs
// ============================================================================
// Module: Elspeth Reference Sinks
// Description: JSON-lines file sink and in-memory sink.
// Purpose: Terminate pipelines with auditable artifact descriptors.
// Dependencies: elspeth-core, serde, serde_json
// ============================================================================

//! ## Overview
//! The JSONL sink appends rows as canonical JSON lines and returns an
//! artifact descriptor hashing exactly the bytes written by the call. The
//! memory sink collects rows into a shared vector for demos and tests.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::File;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use elspeth_core::ArtifactDescriptor;
use elspeth_core::PluginContext;
use elspeth_core::PluginError;
use elspeth_core::RowData;
use elspeth_core::SinkPlugin;
use elspeth_core::canonical_json_bytes;
use elspeth_core::hash_bytes;
use serde::Deserialize;
use serde_json::Value;

// ============================================================================
// SECTION: JSONL Sink
// ============================================================================

/// JSONL sink options.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonlSinkOptions {
    /// Output file path; parent directories are created.
    pub path: PathBuf,
}

/// Sink appending rows as canonical JSON lines.
pub struct JsonlSink {
    /// Output path for artifact descriptors.
    path: PathBuf,
    /// Open output file, lazily created on first write.
    file: Option<File>,
}

impl JsonlSink {
    /// Builds a JSONL sink from plugin options.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Failed`] when options are malformed.
    pub fn from_options(options: &Value) -> Result<Self, PluginError> {
        let options: JsonlSinkOptions = serde_json::from_value(options.clone())
            .map_err(|err| PluginError::Failed(format!("jsonl sink options: {err}")))?;
        Ok(Self {
            path: options.path,
            file: None,
        })
    }

    /// Opens the output file, creating parent directories.
    fn open(&mut self) -> Result<&mut File, PluginError> {
        if self.file.is_none() {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    std::fs::create_dir_all(parent)
                        .map_err(|err| PluginError::Io(err.to_string()))?;
                }
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .map_err(|err| PluginError::Io(err.to_string()))?;
            self.file = Some(file);
        }
        self.file.as_mut().ok_or_else(|| PluginError::Io("sink file unavailable".to_string()))
    }
}

impl SinkPlugin for JsonlSink {
    fn name(&self) -> &str {
        "jsonl"
    }

    fn plugin_version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn write(
        &mut self,
        rows: &[RowData],
        _ctx: &mut PluginContext<'_>,
    ) -> Result<ArtifactDescriptor, PluginError> {
        let mut written = Vec::new();
        for row in rows {
            let line = canonical_json_bytes(row)
                .map_err(|err| PluginError::Failed(err.to_string()))?;
            written.extend_from_slice(&line);
            written.push(b'\n');
        }
        let path = self.path.display().to_string();
        let file = self.open()?;
        file.write_all(&written).map_err(|err| PluginError::Io(err.to_string()))?;
        Ok(ArtifactDescriptor {
            artifact_type: "jsonl".to_string(),
            path_or_uri: path,
            content_hash: hash_bytes(&written),
            size_bytes: written.len() as u64,
        })
    }

    fn close(&mut self) -> Result<(), PluginError> {
        if let Some(file) = &mut self.file {
            file.flush().map_err(|err| PluginError::Io(err.to_string()))?;
        }
        self.file = None;
        Ok(())
    }
}

// ============================================================================
// SECTION: Memory Sink
// ============================================================================

/// Shared row store written by [`MemorySink`].
pub type MemorySinkLog = Arc<Mutex<Vec<RowData>>>;

/// Sink collecting rows into a shared vector.
pub struct MemorySink {
    /// Shared row log.
    log: MemorySinkLog,
}

impl MemorySink {
    /// Creates a memory sink and returns its shared log.
    #[must_use]
    pub fn with_log() -> (Self, MemorySinkLog) {
        let log: MemorySinkLog = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                log: Arc::clone(&log),
            },
            log,
        )
    }
}

impl SinkPlugin for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn plugin_version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn write(
        &mut self,
        rows: &[RowData],
        _ctx: &mut PluginContext<'_>,
    ) -> Result<ArtifactDescriptor, PluginError> {
        let bytes =
            canonical_json_bytes(&rows).map_err(|err| PluginError::Failed(err.to_string()))?;
        let mut log = self
            .log
            .lock()
            .map_err(|_| PluginError::Io("memory sink lock poisoned".to_string()))?;
        log.extend(rows.iter().cloned());
        Ok(ArtifactDescriptor {
            artifact_type: "memory".to_string(),
            path_or_uri: format!("memory://rows/{}", log.len()),
            content_hash: hash_bytes(&bytes),
            size_bytes: bytes.len() as u64,
        })
    }
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
    use std::sync::Arc;

    use elspeth_core::ManualClock;
    use elspeth_core::PluginContext;
    use elspeth_core::RowData;
    use elspeth_core::RuntimeServices;
    use elspeth_core::SinkPlugin;
    use elspeth_core::contracts::NodeId;
    use elspeth_core::contracts::RunId;
    use serde_json::json;
    use tempfile::TempDir;

    use super::JsonlSink;

    #[test]
    fn jsonl_sink_appends_canonical_lines() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("out").join("archive.jsonl");
        let mut sink = JsonlSink::from_options(&json!({"path": path})).expect("sink");

        let mut row = RowData::new();
        row.insert("b".to_string(), json!(2));
        row.insert("a".to_string(), json!(1));

        let services = RuntimeServices::new(Arc::new(ManualClock::starting_at(0)));
        let run_id = RunId::new("run-1");
        let node_id = NodeId::new("sink_jsonl_0001");
        let mut ctx = PluginContext::new(&run_id, &node_id, &services);
        let descriptor = sink.write(&[row], &mut ctx).expect("write");
        sink.close().expect("close");

        assert_eq!(descriptor.artifact_type, "jsonl");
        assert!(descriptor.size_bytes > 0);
        let written = std::fs::read_to_string(&descriptor.path_or_uri).expect("read");
        assert_eq!(written, "{\"a\":1,\"b\":2}\n");
    }
}
