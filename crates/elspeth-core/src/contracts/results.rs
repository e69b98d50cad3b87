// crates/elspeth-core/src/contracts/results.rs
// ============================================================================
// Module: Elspeth Result Types
// Description: Transform, gate, and payload result types crossing boundaries.
// Purpose: Replace exceptions-for-control-flow with explicit sum types.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Plugins communicate outcomes through these sum types rather than raising.
//! Callers must match exhaustively; treating `data.is_none()` as a single
//! failure case on [`RowDataResult`] is an error because the five states have
//! distinct compliance meanings.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::contracts::enums::RoutingKind;

// ============================================================================
// SECTION: Row Data
// ============================================================================

/// A row payload as carried between nodes.
pub type RowData = serde_json::Map<String, Value>;

// ============================================================================
// SECTION: Transform Error Reason
// ============================================================================

/// Classification of a transform failure.
///
/// # Invariants
/// - Variants are stable for serialization and retry classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformErrorCategory {
    /// Upstream service rejected the request due to rate limits.
    RateLimited,
    /// Transient network failure.
    TransientNetwork,
    /// Upstream server error (5xx class).
    ServerError,
    /// Input failed validation against the plugin's expectations.
    Validation,
    /// Template expansion failed.
    Template,
    /// One or more queries failed.
    Query,
    /// Non-retryable plugin failure.
    Fatal,
}

impl TransformErrorCategory {
    /// Returns true when the engine retry policy may consume this failure.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::RateLimited | Self::TransientNetwork | Self::ServerError)
    }
}

/// Token usage statistics attached to model-backed transform failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UsageStats {
    /// Prompt tokens consumed.
    pub prompt_tokens: Option<u64>,
    /// Completion tokens consumed.
    pub completion_tokens: Option<u64>,
    /// Total tokens consumed.
    pub total_tokens: Option<u64>,
}

/// Detail for a single failed query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFailureDetail {
    /// Query text or identifier.
    pub query: String,
    /// Failure description.
    pub error: String,
    /// Optional row index the query belonged to.
    pub row_index: Option<u64>,
}

/// A failed query, either bare text or a structured detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryFailure {
    /// Bare query text.
    Query(String),
    /// Structured failure detail.
    Detail(QueryFailureDetail),
}

/// Per-row error entry for multi-row transform failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowErrorEntry {
    /// Index of the failing row within the submitted batch.
    pub row_index: u64,
    /// Failure description.
    pub message: String,
}

/// Structured reason for a transform failure.
///
/// # Invariants
/// - `category` is always present; detail collections may be empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformErrorReason {
    /// Failure classification.
    pub category: TransformErrorCategory,
    /// Human-readable failure description.
    pub message: String,
    /// Optional retry-after hint in milliseconds.
    pub retry_after_ms: Option<u64>,
    /// Optional usage statistics for model-backed plugins.
    pub usage: Option<UsageStats>,
    /// Template expansion errors.
    #[serde(default)]
    pub template_errors: Vec<String>,
    /// Per-row error entries.
    #[serde(default)]
    pub row_errors: Vec<RowErrorEntry>,
    /// Failed queries.
    #[serde(default)]
    pub failed_queries: Vec<QueryFailure>,
}

impl TransformErrorReason {
    /// Creates a reason with a category and message and no details.
    #[must_use]
    pub fn new(category: TransformErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            retry_after_ms: None,
            usage: None,
            template_errors: Vec::new(),
            row_errors: Vec::new(),
            failed_queries: Vec::new(),
        }
    }

    /// Creates a non-retryable fatal reason.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(TransformErrorCategory::Fatal, message)
    }

    /// Returns true when the engine retry policy may consume this failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.category.is_retryable()
    }
}

// ============================================================================
// SECTION: Transform Result
// ============================================================================

/// Outcome of a transform or aggregation invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TransformResult {
    /// One output row.
    Success {
        /// Transformed row payload.
        row: RowData,
    },
    /// Multiple output rows (expansion or passthrough flush).
    SuccessMulti {
        /// Transformed row payloads in deterministic order.
        rows: Vec<RowData>,
    },
    /// Structured failure.
    Error {
        /// Failure reason.
        reason: TransformErrorReason,
    },
}

impl TransformResult {
    /// Creates a single-row success.
    #[must_use]
    pub const fn success(row: RowData) -> Self {
        Self::Success {
            row,
        }
    }

    /// Creates a multi-row success.
    #[must_use]
    pub const fn success_multi(rows: Vec<RowData>) -> Self {
        Self::SuccessMulti {
            rows,
        }
    }

    /// Creates a failure result.
    #[must_use]
    pub const fn error(reason: TransformErrorReason) -> Self {
        Self::Error {
            reason,
        }
    }

    /// Returns true for either success variant.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. } | Self::SuccessMulti { .. })
    }
}

// ============================================================================
// SECTION: Routing
// ============================================================================

/// Routing decision produced by a gate.
///
/// # Invariants
/// - `Fork` label order is deterministic; ordinals follow this order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoutingAction {
    /// Token continues down the default chain.
    Continue,
    /// Token moves to the sink behind the labelled edge.
    Route {
        /// Edge label to follow.
        label: String,
    },
    /// Token is copied to every labelled edge.
    Fork {
        /// Edge labels in deterministic order.
        labels: Vec<String>,
    },
}

impl RoutingAction {
    /// Returns the routing kind tag for this action.
    #[must_use]
    pub const fn kind(&self) -> RoutingKind {
        match self {
            Self::Continue => RoutingKind::Continue,
            Self::Route { .. } => RoutingKind::Route,
            Self::Fork { .. } => RoutingKind::Fork,
        }
    }
}

/// Recorded reason for a routing decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RoutingReason {
    /// Configuration-driven gate condition.
    ConfigGate {
        /// Condition expression as configured.
        condition: String,
        /// Evaluated condition result.
        result: bool,
    },
    /// Plugin-internal rule.
    PluginGate {
        /// Rule name or description.
        rule: String,
        /// Value that matched the rule.
        matched_value: Value,
        /// Optional threshold the value was compared against.
        threshold: Option<Value>,
        /// Optional field the value was read from.
        field: Option<String>,
        /// Optional comparison operator name.
        comparison: Option<String>,
    },
}

/// Gate evaluation outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct GateResult {
    /// Row payload after gate evaluation (gates may annotate).
    pub row: RowData,
    /// Routing decision.
    pub action: RoutingAction,
    /// Optional recorded reason for the decision.
    pub reason: Option<RoutingReason>,
}

// ============================================================================
// SECTION: Row Data Retrieval
// ============================================================================

/// Availability state for a row's source payload.
///
/// # Invariants
/// - `Available` is the only state that carries bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowDataState {
    /// Payload intact.
    Available,
    /// Retention removed bytes; hash preserved.
    Purged,
    /// Row existed without a payload reference.
    NeverStored,
    /// No payload backend configured for this run.
    StoreNotConfigured,
    /// No such row.
    RowNotFound,
}

/// Result of retrieving a row's source payload.
///
/// Callers must switch on `state`; the absence of `data` alone does not
/// distinguish purge from never-stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowDataResult {
    /// Availability state.
    pub state: RowDataState,
    /// Payload bytes, present only for [`RowDataState::Available`].
    pub data: Option<Vec<u8>>,
}

impl RowDataResult {
    /// Creates an available result carrying bytes.
    #[must_use]
    pub const fn available(data: Vec<u8>) -> Self {
        Self {
            state: RowDataState::Available,
            data: Some(data),
        }
    }

    /// Creates a data-less result for the given state.
    #[must_use]
    pub const fn absent(state: RowDataState) -> Self {
        Self {
            state,
            data: None,
        }
    }
}
