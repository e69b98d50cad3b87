// crates/elspeth-core/src/runtime/mod.rs
// ============================================================================
// Module: Elspeth Runtime
// Description: Execution engine built over the contracts and interfaces.
// Purpose: Group the orchestrator, processor, executors, and services.
// Dependencies: crate::runtime submodules
// ============================================================================

//! ## Overview
//! The runtime is the single canonical execution path for Elspeth. The
//! orchestrator owns the run lifecycle, the processor walks tokens through
//! the registered stages, and the aggregation executor and batch pool cover
//! buffered and concurrent plugin work. Everything here is synchronous; the
//! only internal concurrency lives inside the batch worker pool.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod aggregation;
pub mod batch;
pub mod comparator;
pub mod memory;
pub mod orchestrator;
pub mod processor;
pub mod retry;
pub mod services;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use aggregation::AggregationError;
pub use aggregation::AggregationExecutor;
pub use aggregation::CHECKPOINT_HARD_LIMIT_BYTES;
pub use aggregation::CHECKPOINT_WARN_BYTES;
pub use aggregation::CheckpointState;
pub use aggregation::FlushOutcome;
pub use aggregation::TokenInfo;
pub use batch::BatchPoolError;
pub use batch::BatchWorkerPool;
pub use batch::RowFuture;
pub use comparator::Comparison;
pub use comparator::evaluate_comparison;
pub use memory::InMemoryPayloadStore;
pub use memory::InMemoryRecorder;
pub use orchestrator::Orchestrator;
pub use orchestrator::PipelineBindings;
pub use orchestrator::RunOptions;
pub use orchestrator::RunReport;
pub use orchestrator::StageBinding;
pub use processor::BoundSink;
pub use processor::BoundStage;
pub use processor::EngineError;
pub use processor::Processor;
pub use processor::TokenCursor;
pub use retry::RetryPolicy;
pub use services::FingerprintKey;
pub use services::ManualClock;
pub use services::RateLimitPermit;
pub use services::RateLimiter;
pub use services::RateLimiterRegistry;
pub use services::RuntimeServices;
