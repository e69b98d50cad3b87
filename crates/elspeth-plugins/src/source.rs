// crates/elspeth-plugins/src/source.rs
// ============================================================================
// Module: Elspeth Inline Source
// Description: Source emitting rows embedded in configuration.
// Purpose: Drive pipelines from fixture rows without external systems.
// Dependencies: elspeth-core, serde, serde_json
// ============================================================================

//! ## Overview
//! The inline source emits the rows embedded in its options, in order, and
//! optionally declares a schema contract. It exists for demos, smoke tests,
//! and deterministic replays; production sources live in their own crates.

// ============================================================================
// SECTION: Imports
// ============================================================================

use elspeth_core::Determinism;
use elspeth_core::FieldContract;
use elspeth_core::FieldType;
use elspeth_core::PluginContext;
use elspeth_core::PluginError;
use elspeth_core::RowData;
use elspeth_core::SchemaContract;
use elspeth_core::SchemaMode;
use elspeth_core::SourcePlugin;
use serde::Deserialize;
use serde_json::Value;

// ============================================================================
// SECTION: Options
// ============================================================================

/// Inline source options.
#[derive(Debug, Clone, Deserialize)]
pub struct InlineSourceOptions {
    /// Rows to emit, in order.
    pub rows: Vec<RowData>,
    /// Optional declared schema.
    pub schema: Option<InlineSchemaOptions>,
}

/// Declared schema options.
#[derive(Debug, Clone, Deserialize)]
pub struct InlineSchemaOptions {
    /// Contract mode.
    pub mode: SchemaMode,
    /// Declared fields, in order.
    #[serde(default)]
    pub fields: Vec<InlineFieldOptions>,
}

/// One declared field.
#[derive(Debug, Clone, Deserialize)]
pub struct InlineFieldOptions {
    /// Display field name.
    pub name: String,
    /// Field type.
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// True when rows must carry a non-null value.
    #[serde(default)]
    pub required: bool,
}

// ============================================================================
// SECTION: Source
// ============================================================================

/// Source emitting configured fixture rows.
pub struct InlineSource {
    /// Remaining rows, emitted front to back.
    rows: Vec<RowData>,
    /// Emission cursor.
    cursor: usize,
    /// Declared contract, when configured.
    contract: Option<SchemaContract>,
}

impl InlineSource {
    /// Builds an inline source from plugin options.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Failed`] when options or the declared schema
    /// are malformed.
    pub fn from_options(options: &Value) -> Result<Self, PluginError> {
        let options: InlineSourceOptions = serde_json::from_value(options.clone())
            .map_err(|err| PluginError::Failed(format!("inline source options: {err}")))?;
        let contract = match options.schema {
            None => None,
            Some(schema) => {
                let mut fields = Vec::with_capacity(schema.fields.len());
                for field in schema.fields {
                    fields.push(
                        FieldContract::declared(field.name, field.field_type, field.required)
                            .map_err(|err| PluginError::Failed(err.to_string()))?,
                    );
                }
                let contract = match schema.mode {
                    SchemaMode::Fixed => SchemaContract::fixed(fields)
                        .map_err(|err| PluginError::Failed(err.to_string()))?,
                    SchemaMode::Flexible => SchemaContract::flexible(fields)
                        .map_err(|err| PluginError::Failed(err.to_string()))?,
                    SchemaMode::Observed => SchemaContract::observed(),
                };
                Some(contract)
            }
        };
        Ok(Self {
            rows: options.rows,
            cursor: 0,
            contract,
        })
    }
}

impl SourcePlugin for InlineSource {
    fn name(&self) -> &str {
        "inline"
    }

    fn plugin_version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn determinism(&self) -> Determinism {
        Determinism::Deterministic
    }

    fn schema_contract(&self) -> Option<SchemaContract> {
        self.contract.clone()
    }

    fn next_row(&mut self, _ctx: &mut PluginContext<'_>) -> Result<Option<RowData>, PluginError> {
        let next = self.rows.get(self.cursor).cloned();
        if next.is_some() {
            self.cursor += 1;
        }
        Ok(next)
    }
}
