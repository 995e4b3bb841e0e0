// pml-bus/tests/sink.rs
// ============================================================================
// Module: Trace Sink Tests
// Description: Batch flushing, retry-then-drop, idempotency, shutdown.
// ============================================================================
//! ## Overview
//! Validates capacity-triggered flushes, the close-time drain, failed-flush
//! re-queueing with drop accounting, and duplicate-insert idempotency at the
//! store boundary.

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

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use pml_bus::TraceSink;
use pml_bus::TraceSinkConfig;
use pml_core::AlgorithmTrace;
use pml_core::ExecutionTrace;
use pml_core::StoreError;
use pml_core::TraceId;
use pml_core::TraceRecorder;
use pml_core::TraceStore;
use pml_core::Timestamp;
use pml_core::UserId;

// ============================================================================
// SECTION: Store Double
// ============================================================================

/// Trace store recording inserted identifiers, idempotent on duplicates, and
/// optionally failing.
#[derive(Default)]
struct RecordingStore {
    /// Seen execution trace identifiers.
    executions: Mutex<BTreeSet<String>>,
    /// Batch sizes observed per flush.
    batches: Mutex<Vec<usize>>,
    /// When set, every insert fails.
    failing: AtomicBool,
}

impl TraceStore for RecordingStore {
    fn insert_executions(&self, traces: &[ExecutionTrace]) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Io("store offline".to_string()));
        }
        self.batches.lock().unwrap().push(traces.len());
        let mut seen = self.executions.lock().unwrap();
        for trace in traces {
            // Duplicate inserts are no-ops.
            seen.insert(trace.id.as_str().to_string());
        }
        Ok(())
    }

    fn insert_algorithms(&self, _traces: &[AlgorithmTrace]) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Builds a minimal execution trace.
fn trace(id: &str) -> ExecutionTrace {
    ExecutionTrace {
        id: TraceId::new(id),
        capability_id: None,
        intent_text: None,
        intent_embedding: None,
        executed_at: Timestamp::from_unix_millis(0),
        success: true,
        duration_ms: 1,
        error_type: None,
        user_id: UserId::new("tester"),
        executed_path: Vec::new(),
        decisions: Vec::new(),
        task_results: Vec::new(),
        priority: 0.5,
        parent_trace_id: None,
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

/// Reaching buffer capacity forces a batched flush.
#[tokio::test]
async fn test_flush_at_capacity() {
    let store = Arc::new(RecordingStore::default());
    let sink = TraceSink::spawn(
        Arc::clone(&store) as Arc<dyn TraceStore>,
        TraceSinkConfig {
            buffer_size: 3,
            flush_interval_ms: 60_000,
        },
    );
    let handle = sink.handle();

    for index in 0..3 {
        handle.record_execution(trace(&format!("t-{index}")));
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.executions.lock().unwrap().len(), 3);
    assert_eq!(store.batches.lock().unwrap().as_slice(), &[3]);
    sink.close().await;
}

/// Closing flushes whatever is still buffered.
#[tokio::test]
async fn test_close_flushes_remainder() {
    let store = Arc::new(RecordingStore::default());
    let sink = TraceSink::spawn(
        Arc::clone(&store) as Arc<dyn TraceStore>,
        TraceSinkConfig {
            buffer_size: 100,
            flush_interval_ms: 60_000,
        },
    );
    let handle = sink.handle();

    handle.record_execution(trace("t-a"));
    handle.record_execution(trace("t-b"));
    sink.close().await;
    assert_eq!(store.executions.lock().unwrap().len(), 2);
}

/// Duplicate identifiers reach the store, which treats them as no-ops.
#[tokio::test]
async fn test_duplicate_records_are_noops() {
    let store = Arc::new(RecordingStore::default());
    let sink = TraceSink::spawn(
        Arc::clone(&store) as Arc<dyn TraceStore>,
        TraceSinkConfig {
            buffer_size: 100,
            flush_interval_ms: 60_000,
        },
    );
    let handle = sink.handle();

    handle.record_execution(trace("t-same"));
    handle.record_execution(trace("t-same"));
    sink.close().await;
    assert_eq!(store.executions.lock().unwrap().len(), 1);
}

/// A failed flush re-queues the batch and the next flush persists it.
#[tokio::test]
async fn test_failed_flush_requeues() {
    let store = Arc::new(RecordingStore::default());
    store.failing.store(true, Ordering::SeqCst);
    let sink = TraceSink::spawn(
        Arc::clone(&store) as Arc<dyn TraceStore>,
        TraceSinkConfig {
            buffer_size: 2,
            flush_interval_ms: 40,
        },
    );
    let handle = sink.handle();

    handle.record_execution(trace("t-1"));
    handle.record_execution(trace("t-2"));
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(store.executions.lock().unwrap().is_empty());

    // Store recovers; the interval flush retries the re-queued batch.
    store.failing.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(store.executions.lock().unwrap().len(), 2);
    assert_eq!(handle.dropped(), 0);
    sink.close().await;
}
