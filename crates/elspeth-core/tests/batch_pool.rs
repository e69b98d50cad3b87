// crates/elspeth-core/tests/batch_pool.rs
// ============================================================================
// Module: Batch Worker Pool Tests
// Description: FIFO ordering, timeouts, and limiter fairness.
// ============================================================================
//! ## Overview
//! Exercises the bounded worker pool used by batch-aware transforms: the
//! submission-order guarantee on drained completions, per-row timeouts, and
//! rate-limit acquisition before execution.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use elspeth_core::BatchSettings;
use elspeth_core::BatchWorkerPool;
use elspeth_core::RowData;
use elspeth_core::TransformResult;
use elspeth_core::runtime::BatchPoolError;
use elspeth_core::runtime::RateLimiterRegistry;
use serde_json::json;

fn settings(pool_size: usize) -> BatchSettings {
    BatchSettings {
        pool_size,
        max_pending: 64,
        row_timeout_ms: None,
        service: None,
    }
}

fn result_row(id: u64) -> TransformResult {
    let mut data = RowData::new();
    data.insert("id".to_string(), json!(id));
    TransformResult::success(data)
}

fn row_id(result: &TransformResult) -> u64 {
    let TransformResult::Success { row } = result else {
        panic!("expected success");
    };
    row.get("id").and_then(serde_json::Value::as_u64).expect("id")
}

// ============================================================================
// SECTION: FIFO Ordering
// ============================================================================

#[test]
fn per_row_futures_return_results_in_submission_order() {
    let pool = BatchWorkerPool::start(settings(4), Arc::new(RateLimiterRegistry::new()));
    let mut futures = Vec::new();
    for id in 0..16_u64 {
        // Later rows finish first to force out-of-order completion.
        let delay = Duration::from_millis(60_u64.saturating_sub(id * 3));
        let future = pool
            .submit(Box::new(move || {
                thread::sleep(delay);
                result_row(id)
            }))
            .expect("submit");
        futures.push((id, future));
    }
    for (id, future) in futures {
        let result = future.wait().expect("wait");
        assert_eq!(row_id(&result), id);
    }
}

#[test]
fn drained_completions_are_strictly_fifo() {
    let pool = BatchWorkerPool::start(settings(4), Arc::new(RateLimiterRegistry::new()));
    let mut futures = Vec::new();
    for id in 0..12_u64 {
        let delay = Duration::from_millis(if id % 3 == 0 { 40 } else { 5 });
        let future = pool
            .submit(Box::new(move || {
                thread::sleep(delay);
                result_row(id)
            }))
            .expect("submit");
        futures.push(future);
    }
    for future in futures {
        let _ = future.wait().expect("wait");
    }
    let drained = pool.drain_completed();
    assert_eq!(drained.len(), 12);
    let sequence: Vec<u64> = drained.iter().map(|(seq, _)| *seq).collect();
    assert_eq!(sequence, (0..12).collect::<Vec<u64>>());
    for (seq, result) in drained {
        assert_eq!(row_id(&result), seq);
    }
}

// ============================================================================
// SECTION: Timeouts and Panics
// ============================================================================

#[test]
fn slow_rows_fail_with_a_typed_timeout() {
    let pool = BatchWorkerPool::start(
        BatchSettings {
            pool_size: 1,
            max_pending: 4,
            row_timeout_ms: Some(20),
            service: None,
        },
        Arc::new(RateLimiterRegistry::new()),
    );
    let future = pool
        .submit(Box::new(|| {
            thread::sleep(Duration::from_millis(500));
            result_row(1)
        }))
        .expect("submit");
    let err = future.wait().expect_err("must time out");
    assert!(matches!(err, BatchPoolError::Timeout { timeout_ms: 20 }));
}

#[test]
fn worker_panics_surface_as_plugin_errors() {
    let pool = BatchWorkerPool::start(settings(1), Arc::new(RateLimiterRegistry::new()));
    let future = pool
        .submit(Box::new(|| panic!("plugin exploded")))
        .expect("submit");
    let result = future.wait().expect("wait");
    let TransformResult::Error { reason } = result else {
        panic!("expected an error result");
    };
    assert!(reason.message.contains("panic"));
}

// ============================================================================
// SECTION: Rate Limiting
// ============================================================================

#[test]
fn workers_acquire_service_permits_before_executing() {
    let registry = Arc::new(RateLimiterRegistry::new());
    registry.configure("llm", 1);
    let pool = BatchWorkerPool::start(
        BatchSettings {
            pool_size: 4,
            max_pending: 16,
            row_timeout_ms: None,
            service: Some("llm".to_string()),
        },
        Arc::clone(&registry),
    );
    // With a single permit the pool degrades to serial execution; all rows
    // still complete and order is preserved for the consumers.
    let mut futures = Vec::new();
    for id in 0..6_u64 {
        let future = pool
            .submit(Box::new(move || {
                thread::sleep(Duration::from_millis(5));
                result_row(id)
            }))
            .expect("submit");
        futures.push((id, future));
    }
    for (id, future) in futures {
        assert_eq!(row_id(&future.wait().expect("wait")), id);
    }
}

#[test]
fn limiter_acquisition_is_fifo_fair() {
    let registry = Arc::new(RateLimiterRegistry::new());
    registry.configure("db", 1);
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    let mut handles = Vec::new();
    let gate = registry.acquire("db").expect("initial permit");
    for id in 0..4_u32 {
        let registry = Arc::clone(&registry);
        let order = Arc::clone(&order);
        handles.push(thread::spawn(move || {
            let _permit = registry.acquire("db").expect("permit");
            order.lock().expect("order").push(id);
        }));
        // Stagger arrivals so ticket order matches spawn order.
        thread::sleep(Duration::from_millis(20));
    }
    drop(gate);
    for handle in handles {
        handle.join().expect("join");
    }
    assert_eq!(*order.lock().expect("order"), vec![0, 1, 2, 3]);
}
