// crates/elspeth-core/src/schema/row.rs
// ============================================================================
// Module: Elspeth Pipeline Row
// Description: Dual-name row view over a contract's field resolution.
// Purpose: Allow reads and writes by display or normalized field name.
// Dependencies: crate::{contracts, schema}, serde_json
// ============================================================================

//! ## Overview
//! `PipelineRow` wraps a row payload with the contract's display-to-normalized
//! name resolution. Reads accept either name; writes always store under the
//! normalized name so the stored payload has a single spelling per field.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde_json::Value;

use crate::contracts::RowData;
use crate::schema::SchemaContract;
use crate::schema::SchemaError;
use crate::schema::normalize_field_name;

// ============================================================================
// SECTION: Pipeline Row
// ============================================================================

/// Row payload with dual-name field access.
///
/// # Invariants
/// - Writes store values under the normalized name only.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineRow {
    /// Row payload keyed by stored field names.
    data: RowData,
    /// Display-to-normalized name resolution.
    resolution: BTreeMap<String, String>,
}

impl PipelineRow {
    /// Wraps a payload with the resolution map of a contract.
    #[must_use]
    pub fn with_contract(data: RowData, contract: &SchemaContract) -> Self {
        let resolution = contract.field_resolution().into_iter().collect();
        Self {
            data,
            resolution,
        }
    }

    /// Wraps a payload without any display-name resolution.
    #[must_use]
    pub const fn bare(data: RowData) -> Self {
        Self {
            data,
            resolution: BTreeMap::new(),
        }
    }

    /// Reads a field by original or normalized name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        if let Some(value) = self.data.get(name) {
            return Some(value);
        }
        self.resolution.get(name).and_then(|normalized| self.data.get(normalized))
    }

    /// Returns true when the field resolves to a stored value.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Writes a field, storing under the normalized name only.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::EmptyFieldName`] when a previously unseen name
    /// normalizes to an empty identifier.
    pub fn set(&mut self, name: &str, value: Value) -> Result<(), SchemaError> {
        let normalized = match self.resolution.get(name) {
            Some(normalized) => normalized.clone(),
            None => {
                let normalized = normalize_field_name(name)?;
                if name != normalized {
                    self.resolution.insert(name.to_string(), normalized.clone());
                }
                normalized
            }
        };
        // A stale display-name spelling must not shadow the normalized slot.
        if self.data.contains_key(name) && name != normalized {
            self.data.remove(name);
        }
        self.data.insert(normalized, value);
        Ok(())
    }

    /// Removes a field by either name, returning the stored value.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        if let Some(value) = self.data.remove(name) {
            return Some(value);
        }
        let normalized = self.resolution.get(name)?.clone();
        self.data.remove(&normalized)
    }

    /// Returns the underlying payload.
    #[must_use]
    pub const fn data(&self) -> &RowData {
        &self.data
    }

    /// Consumes the row, returning the payload.
    #[must_use]
    pub fn into_data(self) -> RowData {
        self.data
    }

    /// Returns the number of stored fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true when the payload has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
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
    use serde_json::json;

    use super::PipelineRow;
    use crate::contracts::RowData;
    use crate::schema::FieldContract;
    use crate::schema::FieldType;
    use crate::schema::SchemaContract;

    fn contract() -> SchemaContract {
        SchemaContract::fixed(vec![
            FieldContract::declared("Customer Name", FieldType::String, true).expect("field"),
        ])
        .expect("contract")
    }

    #[test]
    fn reads_resolve_by_either_name() {
        let mut data = RowData::new();
        data.insert("customer_name".to_string(), json!("ada"));
        let row = PipelineRow::with_contract(data, &contract());

        assert_eq!(row.get("customer_name"), Some(&json!("ada")));
        assert_eq!(row.get("Customer Name"), Some(&json!("ada")));
    }

    #[test]
    fn writes_store_under_normalized_name_only() {
        let row_data = RowData::new();
        let mut row = PipelineRow::with_contract(row_data, &contract());
        row.set("Customer Name", json!("grace")).expect("set");

        assert!(row.data().contains_key("customer_name"));
        assert!(!row.data().contains_key("Customer Name"));
    }

    #[test]
    fn writes_displace_stale_display_spellings() {
        let mut data = RowData::new();
        data.insert("Customer Name".to_string(), json!("old"));
        let mut row = PipelineRow::with_contract(data, &contract());
        row.set("Customer Name", json!("new")).expect("set");

        assert_eq!(row.len(), 1);
        assert_eq!(row.get("customer_name"), Some(&json!("new")));
    }
}
