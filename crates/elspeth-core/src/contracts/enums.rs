// crates/elspeth-core/src/contracts/enums.rs
// ============================================================================
// Module: Elspeth Enum Vocabularies
// Description: Closed enum vocabularies for ledger columns and routing.
// Purpose: Provide stable wire forms with strict, fail-closed decoding.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! Every enum-typed ledger column decodes through [`UnknownEnumVariant`]-strict
//! parsers. Repositories must fail on any foreign string; the ledger is Tier-1
//! data and bad reads never degrade to defaults.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Decode Error
// ============================================================================

/// Error raised when a ledger column holds an unknown enum string.
///
/// # Invariants
/// - Raising this error is fatal on the read path; callers never substitute a
///   default variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} variant in ledger: {value:?}")]
pub struct UnknownEnumVariant {
    /// Enum vocabulary name.
    pub kind: &'static str,
    /// Offending stored string.
    pub value: String,
}

// ============================================================================
// SECTION: Run Status
// ============================================================================

/// Run lifecycle status.
///
/// # Invariants
/// - Variants are stable for serialization and ledger storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Run is executing.
    Running,
    /// Run has completed successfully.
    Completed,
    /// Run has failed.
    Failed,
}

impl RunStatus {
    /// Returns the stable stored form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parses the stored form.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownEnumVariant`] for any foreign string.
    pub fn parse(value: &str) -> Result<Self, UnknownEnumVariant> {
        match value {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(UnknownEnumVariant {
                kind: "run_status",
                value: other.to_string(),
            }),
        }
    }

    /// Returns true for a terminal status.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

// ============================================================================
// SECTION: Node Type
// ============================================================================

/// Plugin node type within the execution graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Row-emitting source.
    Source,
    /// Row transform.
    Transform,
    /// Routing gate.
    Gate,
    /// Buffering aggregation.
    Aggregation,
    /// Terminal sink.
    Sink,
}

impl NodeType {
    /// Returns the stable stored form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Transform => "transform",
            Self::Gate => "gate",
            Self::Aggregation => "aggregation",
            Self::Sink => "sink",
        }
    }

    /// Parses the stored form.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownEnumVariant`] for any foreign string.
    pub fn parse(value: &str) -> Result<Self, UnknownEnumVariant> {
        match value {
            "source" => Ok(Self::Source),
            "transform" => Ok(Self::Transform),
            "gate" => Ok(Self::Gate),
            "aggregation" => Ok(Self::Aggregation),
            "sink" => Ok(Self::Sink),
            other => Err(UnknownEnumVariant {
                kind: "node_type",
                value: other.to_string(),
            }),
        }
    }
}

// ============================================================================
// SECTION: Determinism
// ============================================================================

/// Determinism class declared by a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Determinism {
    /// Output is a pure function of input.
    Deterministic,
    /// Output may vary across invocations.
    NonDeterministic,
    /// Output depends on external reads.
    IoRead,
}

impl Determinism {
    /// Returns the stable stored form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Deterministic => "deterministic",
            Self::NonDeterministic => "non_deterministic",
            Self::IoRead => "io_read",
        }
    }

    /// Parses the stored form.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownEnumVariant`] for any foreign string.
    pub fn parse(value: &str) -> Result<Self, UnknownEnumVariant> {
        match value {
            "deterministic" => Ok(Self::Deterministic),
            "non_deterministic" => Ok(Self::NonDeterministic),
            "io_read" => Ok(Self::IoRead),
            other => Err(UnknownEnumVariant {
                kind: "determinism",
                value: other.to_string(),
            }),
        }
    }
}

// ============================================================================
// SECTION: Routing Mode
// ============================================================================

/// Routing mode for an edge traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    /// Token moves over the edge; the source path ends.
    Move,
    /// Token is copied over the edge; the source path continues.
    Copy,
}

impl RoutingMode {
    /// Returns the stable stored form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Move => "move",
            Self::Copy => "copy",
        }
    }

    /// Parses the stored form.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownEnumVariant`] for any foreign string.
    pub fn parse(value: &str) -> Result<Self, UnknownEnumVariant> {
        match value {
            "move" => Ok(Self::Move),
            "copy" => Ok(Self::Copy),
            other => Err(UnknownEnumVariant {
                kind: "routing_mode",
                value: other.to_string(),
            }),
        }
    }
}

// ============================================================================
// SECTION: Routing Kind
// ============================================================================

/// Kind of routing decision produced by a gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingKind {
    /// Token continues down the default chain.
    Continue,
    /// Token moves to a single routed target.
    Route,
    /// Token is copied to multiple targets.
    Fork,
}

impl RoutingKind {
    /// Returns the stable stored form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::Route => "route",
            Self::Fork => "fork",
        }
    }

    /// Parses the stored form.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownEnumVariant`] for any foreign string.
    pub fn parse(value: &str) -> Result<Self, UnknownEnumVariant> {
        match value {
            "continue" => Ok(Self::Continue),
            "route" => Ok(Self::Route),
            "fork" => Ok(Self::Fork),
            other => Err(UnknownEnumVariant {
                kind: "routing_kind",
                value: other.to_string(),
            }),
        }
    }
}

// ============================================================================
// SECTION: Node State Status
// ============================================================================

/// Status of one node invocation on one token attempt.
///
/// # Invariants
/// - Each state transitions exactly once from `Open` to `Completed` or
///   `Failed`; no back-transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStateStatus {
    /// Invocation has started.
    Open,
    /// Invocation completed successfully.
    Completed,
    /// Invocation failed.
    Failed,
}

impl NodeStateStatus {
    /// Returns the stable stored form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parses the stored form.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownEnumVariant`] for any foreign string.
    pub fn parse(value: &str) -> Result<Self, UnknownEnumVariant> {
        match value {
            "open" => Ok(Self::Open),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(UnknownEnumVariant {
                kind: "node_state_status",
                value: other.to_string(),
            }),
        }
    }
}

// ============================================================================
// SECTION: Call Type and Status
// ============================================================================

/// External call type recorded inside a node state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallType {
    /// Plain HTTP request.
    Http,
    /// Model inference call.
    Llm,
    /// Database query.
    Db,
    /// Any other external request.
    Other,
}

impl CallType {
    /// Returns the stable stored form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Llm => "llm",
            Self::Db => "db",
            Self::Other => "other",
        }
    }

    /// Parses the stored form.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownEnumVariant`] for any foreign string.
    pub fn parse(value: &str) -> Result<Self, UnknownEnumVariant> {
        match value {
            "http" => Ok(Self::Http),
            "llm" => Ok(Self::Llm),
            "db" => Ok(Self::Db),
            "other" => Ok(Self::Other),
            other => Err(UnknownEnumVariant {
                kind: "call_type",
                value: other.to_string(),
            }),
        }
    }
}

/// External call outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    /// Call succeeded.
    Ok,
    /// Call failed.
    Error,
    /// Call timed out.
    Timeout,
    /// Call was rejected by a rate limit.
    RateLimited,
}

impl CallStatus {
    /// Returns the stable stored form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
        }
    }

    /// Parses the stored form.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownEnumVariant`] for any foreign string.
    pub fn parse(value: &str) -> Result<Self, UnknownEnumVariant> {
        match value {
            "ok" => Ok(Self::Ok),
            "error" => Ok(Self::Error),
            "timeout" => Ok(Self::Timeout),
            "rate_limited" => Ok(Self::RateLimited),
            other => Err(UnknownEnumVariant {
                kind: "call_status",
                value: other.to_string(),
            }),
        }
    }
}

// ============================================================================
// SECTION: Batch Status
// ============================================================================

/// Aggregation batch lifecycle status.
///
/// # Invariants
/// - Batches transition `Open` → `Triggered` → `Executing` →
///   (`Completed` | `Failed`); membership is append-only within `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Batch is accepting members.
    Open,
    /// Trigger fired; batch is sealed.
    Triggered,
    /// Plugin execution in progress.
    Executing,
    /// Batch flushed successfully.
    Completed,
    /// Batch flush failed.
    Failed,
}

impl BatchStatus {
    /// Returns the stable stored form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Triggered => "triggered",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parses the stored form.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownEnumVariant`] for any foreign string.
    pub fn parse(value: &str) -> Result<Self, UnknownEnumVariant> {
        match value {
            "open" => Ok(Self::Open),
            "triggered" => Ok(Self::Triggered),
            "executing" => Ok(Self::Executing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(UnknownEnumVariant {
                kind: "batch_status",
                value: other.to_string(),
            }),
        }
    }
}

// ============================================================================
// SECTION: Export Status
// ============================================================================

/// Ledger export lifecycle status for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportStatus {
    /// Export requested but not started.
    Pending,
    /// Export in progress.
    Running,
    /// Export completed.
    Completed,
    /// Export failed.
    Failed,
}

impl ExportStatus {
    /// Returns the stable stored form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parses the stored form.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownEnumVariant`] for any foreign string.
    pub fn parse(value: &str) -> Result<Self, UnknownEnumVariant> {
        match value {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(UnknownEnumVariant {
                kind: "export_status",
                value: other.to_string(),
            }),
        }
    }
}

// ============================================================================
// SECTION: Row Outcome
// ============================================================================

/// Terminal outcome recorded for one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowOutcome {
    /// Row reached the default sink.
    Completed,
    /// Row reached a routed sink via a gate.
    Routed,
    /// Row terminated in failure after policy.
    Failed,
    /// Row was routed by policy to a quarantine sink.
    Quarantined,
    /// Row was dropped by policy without sinking.
    Discarded,
}

impl RowOutcome {
    /// Returns the stable stored form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Routed => "routed",
            Self::Failed => "failed",
            Self::Quarantined => "quarantined",
            Self::Discarded => "discarded",
        }
    }

    /// Parses the stored form.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownEnumVariant`] for any foreign string.
    pub fn parse(value: &str) -> Result<Self, UnknownEnumVariant> {
        match value {
            "completed" => Ok(Self::Completed),
            "routed" => Ok(Self::Routed),
            "failed" => Ok(Self::Failed),
            "quarantined" => Ok(Self::Quarantined),
            "discarded" => Ok(Self::Discarded),
            other => Err(UnknownEnumVariant {
                kind: "row_outcome",
                value: other.to_string(),
            }),
        }
    }
}

// ============================================================================
// SECTION: Trigger Type
// ============================================================================

/// Aggregation trigger type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// Fires when the buffer reaches a member count.
    Count,
    /// Fires when the buffer exceeds a wall-time budget.
    Timeout,
    /// Fires when the source is exhausted.
    EndOfSource,
    /// Fires on plugin-defined conditions.
    Custom,
}

impl TriggerType {
    /// Returns the stable stored form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Timeout => "timeout",
            Self::EndOfSource => "end_of_source",
            Self::Custom => "custom",
        }
    }

    /// Parses the stored form.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownEnumVariant`] for any foreign string.
    pub fn parse(value: &str) -> Result<Self, UnknownEnumVariant> {
        match value {
            "count" => Ok(Self::Count),
            "timeout" => Ok(Self::Timeout),
            "end_of_source" => Ok(Self::EndOfSource),
            "custom" => Ok(Self::Custom),
            other => Err(UnknownEnumVariant {
                kind: "trigger_type",
                value: other.to_string(),
            }),
        }
    }
}
