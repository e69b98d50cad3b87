// crates/elspeth-core/src/schema/mod.rs
// ============================================================================
// Module: Elspeth Schema Contract Engine
// Description: Field resolution, type inference, and contract locking.
// Purpose: Enforce row shape guarantees at every pipeline boundary.
// Dependencies: crate::{contracts, hashing}, serde, serde_json
// ============================================================================

//! ## Overview
//! A schema contract is an ordered tuple of field contracts plus a mode and a
//! locked flag. Sources declare contracts up front (FIXED), tolerate extras
//! (FLEXIBLE), or infer everything from the first row (OBSERVED). Once locked,
//! a contract never changes and its `version_hash` is stable across
//! serialization round-trips.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod row;

pub use row::PipelineRow;

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::contracts::RowData;
use crate::contracts::UnknownEnumVariant;
use crate::hashing::CanonicalError;
use crate::hashing::content_hash;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by schema contract construction and mutation.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// Field name normalized to an empty identifier.
    #[error("field name {original:?} normalizes to an empty identifier")]
    EmptyFieldName {
        /// Offending original field name.
        original: String,
    },
    /// Two fields normalized to the same identifier.
    #[error("duplicate normalized field name: {normalized}")]
    DuplicateField {
        /// Colliding normalized field name.
        normalized: String,
    },
    /// Mutation was attempted on a locked contract.
    #[error("schema contract is locked; cannot {operation}")]
    Locked {
        /// Attempted operation.
        operation: &'static str,
    },
    /// Contract serialization failed.
    #[error(transparent)]
    Canonical(#[from] CanonicalError),
}

// ============================================================================
// SECTION: Field Types
// ============================================================================

/// Value type locked into a field contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// UTF-8 string.
    String,
    /// Integer number.
    Integer,
    /// Floating-point number.
    Float,
    /// Boolean.
    Boolean,
    /// JSON object.
    Object,
    /// JSON array.
    Array,
    /// Any value; never produces a type mismatch.
    Any,
}

impl FieldType {
    /// Returns the stable stored form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
            Self::Any => "any",
        }
    }

    /// Parses the stored form.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownEnumVariant`] for any foreign string.
    pub fn parse(value: &str) -> Result<Self, UnknownEnumVariant> {
        match value {
            "string" => Ok(Self::String),
            "integer" => Ok(Self::Integer),
            "float" => Ok(Self::Float),
            "boolean" => Ok(Self::Boolean),
            "object" => Ok(Self::Object),
            "array" => Ok(Self::Array),
            "any" => Ok(Self::Any),
            other => Err(UnknownEnumVariant {
                kind: "field_type",
                value: other.to_string(),
            }),
        }
    }

    /// Infers the type of an observed value.
    #[must_use]
    pub fn infer(value: &Value) -> Self {
        match value {
            Value::String(_) => Self::String,
            Value::Number(number) => {
                if number.is_i64() || number.is_u64() {
                    Self::Integer
                } else {
                    Self::Float
                }
            }
            Value::Bool(_) => Self::Boolean,
            Value::Object(_) => Self::Object,
            Value::Array(_) => Self::Array,
            Value::Null => Self::Any,
        }
    }

    /// Returns true when `value` satisfies this type.
    #[must_use]
    pub fn matches(self, value: &Value) -> bool {
        match self {
            Self::Any => true,
            Self::String => value.is_string(),
            Self::Integer => value.as_i64().is_some() || value.as_u64().is_some(),
            Self::Float => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
        }
    }

    /// Returns true when a value of `self` may flow into a slot of `other`.
    #[must_use]
    pub fn flows_into(self, other: Self) -> bool {
        self == other || other == Self::Any || (self == Self::Integer && other == Self::Float)
    }
}

/// Origin of a field contract entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSource {
    /// Declared by configuration or the source plugin.
    Declared,
    /// Inferred from an observed row.
    Inferred,
}

// ============================================================================
// SECTION: Field Contract
// ============================================================================

/// One field's contract entry.
///
/// # Invariants
/// - `normalized_name` is the normalization of `original_name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldContract {
    /// Normalized field name used for storage and lookup.
    pub normalized_name: String,
    /// Original field name preserved for display.
    pub original_name: String,
    /// Locked value type.
    pub field_type: FieldType,
    /// True when rows must carry a non-null value.
    pub required: bool,
    /// Entry origin.
    pub source: FieldSource,
}

impl FieldContract {
    /// Builds a declared field contract, normalizing the original name.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::EmptyFieldName`] when the name normalizes away.
    pub fn declared(
        original_name: impl Into<String>,
        field_type: FieldType,
        required: bool,
    ) -> Result<Self, SchemaError> {
        let original_name = original_name.into();
        let normalized_name = normalize_field_name(&original_name)?;
        Ok(Self {
            normalized_name,
            original_name,
            field_type,
            required,
            source: FieldSource::Declared,
        })
    }

    /// Builds an inferred field contract from an observed value.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::EmptyFieldName`] when the name normalizes away.
    pub fn inferred(original_name: impl Into<String>, value: &Value) -> Result<Self, SchemaError> {
        let original_name = original_name.into();
        let normalized_name = normalize_field_name(&original_name)?;
        Ok(Self {
            normalized_name,
            original_name,
            field_type: FieldType::infer(value),
            required: false,
            source: FieldSource::Inferred,
        })
    }
}

// ============================================================================
// SECTION: Name Normalization
// ============================================================================

/// Normalizes a display field name into a storage identifier.
///
/// Rules: trim surrounding whitespace, lowercase, map non-identifier
/// characters to `_`, collapse runs of `_`, strip leading and trailing `_`.
///
/// # Errors
///
/// Returns [`SchemaError::EmptyFieldName`] when nothing survives.
pub fn normalize_field_name(original: &str) -> Result<String, SchemaError> {
    let mut out = String::with_capacity(original.len());
    let mut last_was_underscore = false;
    for ch in original.trim().chars() {
        let mapped = if ch.is_ascii_alphanumeric() {
            ch.to_ascii_lowercase()
        } else {
            '_'
        };
        if mapped == '_' {
            if !last_was_underscore && !out.is_empty() {
                out.push('_');
            }
            last_was_underscore = true;
        } else {
            out.push(mapped);
            last_was_underscore = false;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    if out.is_empty() {
        return Err(SchemaError::EmptyFieldName {
            original: original.to_string(),
        });
    }
    Ok(out)
}

// ============================================================================
// SECTION: Schema Mode
// ============================================================================

/// Contract construction mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaMode {
    /// Contract fully declared by configuration; strict on extras.
    Fixed,
    /// Declared fields enforced; extras tolerated.
    Flexible,
    /// Contract inferred entirely from the first row.
    Observed,
}

impl SchemaMode {
    /// Returns the stable stored form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fixed => "fixed",
            Self::Flexible => "flexible",
            Self::Observed => "observed",
        }
    }

    /// Parses the stored form.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownEnumVariant`] for any foreign string.
    pub fn parse(value: &str) -> Result<Self, UnknownEnumVariant> {
        match value {
            "fixed" => Ok(Self::Fixed),
            "flexible" => Ok(Self::Flexible),
            "observed" => Ok(Self::Observed),
            other => Err(UnknownEnumVariant {
                kind: "schema_mode",
                value: other.to_string(),
            }),
        }
    }
}

// ============================================================================
// SECTION: Contract Violations
// ============================================================================

/// A single contract violation detected on a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "violation", rename_all = "snake_case")]
pub enum ContractViolation {
    /// Required field missing or null.
    MissingField {
        /// Violated field contract.
        field: FieldContract,
    },
    /// Row carried a field outside the locked contract.
    ExtraField {
        /// Offending original field name.
        original_name: String,
        /// Offending normalized field name.
        normalized_name: String,
    },
    /// Field value did not satisfy the locked type.
    TypeMismatch {
        /// Violated field contract.
        field: FieldContract,
        /// Expected type.
        expected: FieldType,
        /// Observed type.
        actual: FieldType,
        /// Observed value.
        actual_value: Value,
    },
}

impl ContractViolation {
    /// Returns the stable violation type tag.
    #[must_use]
    pub const fn violation_type(&self) -> &'static str {
        match self {
            Self::MissingField { .. } => "missing_field",
            Self::ExtraField { .. } => "extra_field",
            Self::TypeMismatch { .. } => "type_mismatch",
        }
    }

    /// Returns the original field name involved in the violation.
    #[must_use]
    pub fn original_field_name(&self) -> &str {
        match self {
            Self::MissingField { field } | Self::TypeMismatch { field, .. } => &field.original_name,
            Self::ExtraField { original_name, .. } => original_name,
        }
    }

    /// Returns the normalized field name involved in the violation.
    #[must_use]
    pub fn normalized_field_name(&self) -> &str {
        match self {
            Self::MissingField { field } | Self::TypeMismatch { field, .. } => {
                &field.normalized_name
            }
            Self::ExtraField { normalized_name, .. } => normalized_name,
        }
    }

    /// Returns the expected type tag for type mismatches.
    #[must_use]
    pub const fn expected_type(&self) -> Option<FieldType> {
        match self {
            Self::TypeMismatch { expected, .. } => Some(*expected),
            Self::MissingField { .. } | Self::ExtraField { .. } => None,
        }
    }

    /// Returns the observed type tag for type mismatches.
    #[must_use]
    pub const fn actual_type(&self) -> Option<FieldType> {
        match self {
            Self::TypeMismatch { actual, .. } => Some(*actual),
            Self::MissingField { .. } | Self::ExtraField { .. } => None,
        }
    }
}

// ============================================================================
// SECTION: Schema Contract
// ============================================================================

/// Ordered field contracts plus mode and lock state.
///
/// # Invariants
/// - Normalized names are unique within a contract.
/// - A locked contract never changes; `version_hash` is stable across
///   serialization round-trips.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaContract {
    /// Contract construction mode.
    pub mode: SchemaMode,
    /// True once the contract is sealed against further inference.
    pub locked: bool,
    /// Ordered field contracts.
    pub fields: Vec<FieldContract>,
}

impl SchemaContract {
    /// Builds a fully declared FIXED contract, locked at construction.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::DuplicateField`] on normalized-name collisions.
    pub fn fixed(fields: Vec<FieldContract>) -> Result<Self, SchemaError> {
        let contract = Self {
            mode: SchemaMode::Fixed,
            locked: true,
            fields,
        };
        contract.check_unique()?;
        Ok(contract)
    }

    /// Builds a FLEXIBLE contract with declared fields, unlocked.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::DuplicateField`] on normalized-name collisions.
    pub fn flexible(fields: Vec<FieldContract>) -> Result<Self, SchemaError> {
        let contract = Self {
            mode: SchemaMode::Flexible,
            locked: false,
            fields,
        };
        contract.check_unique()?;
        Ok(contract)
    }

    /// Builds an empty OBSERVED contract awaiting the first row.
    #[must_use]
    pub const fn observed() -> Self {
        Self {
            mode: SchemaMode::Observed,
            locked: false,
            fields: Vec::new(),
        }
    }

    /// Returns true once the contract is sealed.
    #[must_use]
    pub const fn is_locked(&self) -> bool {
        self.locked
    }

    /// Resolves a field by original or normalized name.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<&FieldContract> {
        self.fields
            .iter()
            .find(|field| field.normalized_name == name || field.original_name == name)
    }

    /// Observes a row, inferring and locking per the contract mode.
    ///
    /// Returns true when this observation locked the contract.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] when an observed field name normalizes away or
    /// collides.
    pub fn observe_row(&mut self, row: &RowData) -> Result<bool, SchemaError> {
        if self.locked {
            return Ok(false);
        }
        match self.mode {
            SchemaMode::Fixed => {
                self.locked = true;
                Ok(true)
            }
            SchemaMode::Observed | SchemaMode::Flexible => {
                for (key, value) in row {
                    if self.resolve(key).is_none() {
                        let field = FieldContract::inferred(key.clone(), value)?;
                        if self.fields.iter().any(|f| f.normalized_name == field.normalized_name) {
                            return Err(SchemaError::DuplicateField {
                                normalized: field.normalized_name,
                            });
                        }
                        self.fields.push(field);
                    }
                }
                self.locked = true;
                Ok(true)
            }
        }
    }

    /// Validates a row against the contract, returning every violation.
    #[must_use]
    pub fn validate_row(&self, row: &RowData) -> Vec<ContractViolation> {
        let mut violations = Vec::new();
        for field in &self.fields {
            let value = row
                .get(&field.normalized_name)
                .or_else(|| row.get(&field.original_name));
            match value {
                None | Some(Value::Null) => {
                    if field.required {
                        violations.push(ContractViolation::MissingField {
                            field: field.clone(),
                        });
                    }
                }
                Some(value) => {
                    if !field.field_type.matches(value) {
                        violations.push(ContractViolation::TypeMismatch {
                            field: field.clone(),
                            expected: field.field_type,
                            actual: FieldType::infer(value),
                            actual_value: value.clone(),
                        });
                    }
                }
            }
        }
        if self.locked && matches!(self.mode, SchemaMode::Fixed | SchemaMode::Observed) {
            for key in row.keys() {
                if self.resolve(key).is_none() {
                    let normalized =
                        normalize_field_name(key).map_or_else(|_| key.clone(), |name| name);
                    violations.push(ContractViolation::ExtraField {
                        original_name: key.clone(),
                        normalized_name: normalized,
                    });
                }
            }
        }
        violations
    }

    /// Returns incompatibilities preventing this contract's rows from
    /// flowing into `downstream`.
    #[must_use]
    pub fn incompatibilities_with(&self, downstream: &Self) -> Vec<String> {
        let mut problems = Vec::new();
        for field in &downstream.fields {
            if !field.required {
                continue;
            }
            match self.resolve(&field.normalized_name) {
                None => problems.push(format!(
                    "required field {} is not produced upstream",
                    field.normalized_name
                )),
                Some(upstream) => {
                    if !upstream.field_type.flows_into(field.field_type) {
                        problems.push(format!(
                            "field {} produced as {} but required as {}",
                            field.normalized_name,
                            upstream.field_type.as_str(),
                            field.field_type.as_str()
                        ));
                    }
                }
            }
        }
        problems
    }

    /// Returns the stable digest over `(mode, locked, ordered fields)`.
    ///
    /// # Errors
    ///
    /// Returns [`CanonicalError`] when serialization fails.
    pub fn version_hash(&self) -> Result<String, CanonicalError> {
        content_hash(self)
    }

    /// Serializes the contract for ledger storage.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Canonical`] when serialization fails.
    pub fn to_json(&self) -> Result<Value, SchemaError> {
        serde_json::to_value(self)
            .map_err(|err| SchemaError::Canonical(CanonicalError::Canonicalization(err.to_string())))
    }

    /// Restores a contract from its ledger snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Canonical`] when the snapshot does not decode.
    pub fn from_json(value: &Value) -> Result<Self, SchemaError> {
        serde_json::from_value(value.clone())
            .map_err(|err| SchemaError::Canonical(CanonicalError::Canonicalization(err.to_string())))
    }

    /// Returns the display-to-normalized resolution map for this contract.
    #[must_use]
    pub fn field_resolution(&self) -> Vec<(String, String)> {
        self.fields
            .iter()
            .map(|field| (field.original_name.clone(), field.normalized_name.clone()))
            .collect()
    }

    /// Verifies normalized-name uniqueness.
    fn check_unique(&self) -> Result<(), SchemaError> {
        for (index, field) in self.fields.iter().enumerate() {
            if self.fields[..index].iter().any(|f| f.normalized_name == field.normalized_name) {
                return Err(SchemaError::DuplicateField {
                    normalized: field.normalized_name.clone(),
                });
            }
        }
        Ok(())
    }
}
