// crates/elspeth-core/src/contracts/mod.rs
// ============================================================================
// Module: Elspeth Contracts
// Description: Types that cross subsystem boundaries.
// Purpose: Group identifiers, enums, results, records, and time values.
// Dependencies: crate::contracts submodules
// ============================================================================

//! ## Overview
//! The contracts layer holds every type shared between the execution engine,
//! the audit store, configuration, and plugins. Nothing here performs I/O.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod enums;
pub mod identifiers;
pub mod records;
pub mod results;
pub mod time;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use enums::BatchStatus;
pub use enums::CallStatus;
pub use enums::CallType;
pub use enums::Determinism;
pub use enums::ExportStatus;
pub use enums::NodeStateStatus;
pub use enums::NodeType;
pub use enums::RoutingKind;
pub use enums::RoutingMode;
pub use enums::RowOutcome;
pub use enums::RunStatus;
pub use enums::TriggerType;
pub use enums::UnknownEnumVariant;
pub use identifiers::ArtifactId;
pub use identifiers::BatchId;
pub use identifiers::CheckpointId;
pub use identifiers::EdgeId;
pub use identifiers::IdGenerator;
pub use identifiers::NodeId;
pub use identifiers::PayloadRef;
pub use identifiers::RoutingGroupId;
pub use identifiers::RowId;
pub use identifiers::RunId;
pub use identifiers::StateId;
pub use identifiers::TokenId;
pub use records::ArtifactRecord;
pub use records::BatchMemberRecord;
pub use records::BatchOutputRecord;
pub use records::BatchRecord;
pub use records::CallRecord;
pub use records::CheckpointRecord;
pub use records::EdgeRecord;
pub use records::NodeRecord;
pub use records::NodeStateRecord;
pub use records::RoutingEventRecord;
pub use records::RowLineage;
pub use records::RowRecord;
pub use records::RunRecord;
pub use records::TokenParentRecord;
pub use records::TokenRecord;
pub use records::ValidationErrorRecord;
pub use results::GateResult;
pub use results::QueryFailure;
pub use results::QueryFailureDetail;
pub use results::RoutingAction;
pub use results::RoutingReason;
pub use results::RowData;
pub use results::RowDataResult;
pub use results::RowDataState;
pub use results::RowErrorEntry;
pub use results::TransformErrorCategory;
pub use results::TransformErrorReason;
pub use results::TransformResult;
pub use results::UsageStats;
pub use time::Timestamp;
