// pml-bus/src/sink.rs
// ============================================================================
// Module: Trace Sink
// Description: Buffered, idempotent batch persistence of trace records.
// Purpose: Decouple trace producers from the store's write latency.
// Dependencies: pml-core, tokio
// ============================================================================

//! ## Overview
//! Two buffered writers (execution traces and algorithm traces) share one
//! worker task. Buffers flush at capacity or on the flush interval; a failed
//! flush re-queues its records up to capacity and drops the excess with a
//! counter. Records carry UUIDs and the store treats duplicate inserts as
//! no-ops, so a retried flush is idempotent. Closing the sink flushes the
//! remainder once and joins the worker.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use pml_core::AlgorithmTrace;
use pml_core::ExecutionTrace;
use pml_core::TraceRecorder;
use pml_core::TraceStore;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Trace sink configuration.
#[derive(Debug, Clone)]
pub struct TraceSinkConfig {
    /// Records buffered per writer before a forced flush.
    pub buffer_size: usize,
    /// Flush interval in milliseconds.
    pub flush_interval_ms: u64,
}

impl Default for TraceSinkConfig {
    fn default() -> Self {
        Self {
            buffer_size: 100,
            flush_interval_ms: 5_000,
        }
    }
}

// ============================================================================
// SECTION: Recorder Handle
// ============================================================================

/// Cloneable, non-blocking recording surface.
#[derive(Clone)]
pub struct TraceSinkHandle {
    /// Execution trace channel.
    exec_tx: mpsc::Sender<ExecutionTrace>,
    /// Algorithm trace channel.
    algo_tx: mpsc::Sender<AlgorithmTrace>,
    /// Records dropped at enqueue or after flush retries.
    dropped: Arc<AtomicU64>,
}

impl TraceSinkHandle {
    /// Returns the number of dropped records.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl TraceRecorder for TraceSinkHandle {
    fn record_execution(&self, trace: ExecutionTrace) {
        if self.exec_tx.try_send(trace).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_algorithm(&self, trace: AlgorithmTrace) {
        if self.algo_tx.try_send(trace).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

// ============================================================================
// SECTION: Trace Sink
// ============================================================================

/// Buffered trace sink owning the flush worker.
pub struct TraceSink {
    /// Recording handle template.
    handle: TraceSinkHandle,
    /// Shutdown signal.
    shutdown: watch::Sender<bool>,
    /// Worker task.
    worker: JoinHandle<()>,
}

impl TraceSink {
    /// Spawns the sink over a trace store.
    #[must_use]
    pub fn spawn(store: Arc<dyn TraceStore>, config: TraceSinkConfig) -> Self {
        let capacity = config.buffer_size.max(1);
        let (exec_tx, exec_rx) = mpsc::channel::<ExecutionTrace>(capacity * 2);
        let (algo_tx, algo_rx) = mpsc::channel::<AlgorithmTrace>(capacity * 2);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let dropped = Arc::new(AtomicU64::new(0));

        let worker = tokio::spawn(run_worker(
            store,
            config,
            exec_rx,
            algo_rx,
            shutdown_rx,
            Arc::clone(&dropped),
        ));

        Self {
            handle: TraceSinkHandle {
                exec_tx,
                algo_tx,
                dropped,
            },
            shutdown,
            worker,
        }
    }

    /// Returns a cloneable recording handle.
    #[must_use]
    pub fn handle(&self) -> TraceSinkHandle {
        self.handle.clone()
    }

    /// Flushes the remaining buffers once and joins the worker.
    pub async fn close(self) {
        let _ = self.shutdown.send(true);
        let _ = self.worker.await;
    }
}

// ============================================================================
// SECTION: Worker
// ============================================================================

/// One buffered writer.
struct Writer<T> {
    /// Buffered records.
    buffer: Vec<T>,
    /// Buffer capacity.
    capacity: usize,
}

impl<T: Clone> Writer<T> {
    /// Creates an empty writer.
    fn new(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Buffers a record, returning true when the buffer reached capacity.
    fn push(&mut self, record: T) -> bool {
        self.buffer.push(record);
        self.buffer.len() >= self.capacity
    }

    /// Flushes the buffer through the provided batch write.
    ///
    /// On failure the batch is re-queued up to capacity; the excess is
    /// counted as dropped.
    fn flush(
        &mut self,
        write: impl Fn(&[T]) -> Result<(), pml_core::StoreError>,
        dropped: &AtomicU64,
    ) {
        if self.buffer.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.buffer);
        if write(&batch).is_err() {
            let keep = batch.len().min(self.capacity);
            let lost = batch.len() - keep;
            if lost > 0 {
                dropped.fetch_add(u64::try_from(lost).unwrap_or(u64::MAX), Ordering::Relaxed);
            }
            self.buffer = batch.into_iter().take(keep).collect();
        }
    }
}

/// Worker loop: buffer, flush on capacity or interval, drain on shutdown.
async fn run_worker(
    store: Arc<dyn TraceStore>,
    config: TraceSinkConfig,
    mut exec_rx: mpsc::Receiver<ExecutionTrace>,
    mut algo_rx: mpsc::Receiver<AlgorithmTrace>,
    mut shutdown: watch::Receiver<bool>,
    dropped: Arc<AtomicU64>,
) {
    let capacity = config.buffer_size.max(1);
    let mut executions = Writer::new(capacity);
    let mut algorithms = Writer::new(capacity);
    let mut ticker =
        tokio::time::interval(Duration::from_millis(config.flush_interval_ms.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            trace = exec_rx.recv() => {
                match trace {
                    Some(trace) => {
                        if executions.push(trace) {
                            executions.flush(|batch| store.insert_executions(batch), &dropped);
                        }
                    }
                    None => break,
                }
            }
            trace = algo_rx.recv() => {
                match trace {
                    Some(trace) => {
                        if algorithms.push(trace) {
                            algorithms.flush(|batch| store.insert_algorithms(batch), &dropped);
                        }
                    }
                    None => break,
                }
            }
            _ = ticker.tick() => {
                executions.flush(|batch| store.insert_executions(batch), &dropped);
                algorithms.flush(|batch| store.insert_algorithms(batch), &dropped);
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    // Drain whatever is still queued, then flush once.
    while let Ok(trace) = exec_rx.try_recv() {
        executions.push(trace);
    }
    while let Ok(trace) = algo_rx.try_recv() {
        algorithms.push(trace);
    }
    executions.flush(|batch| store.insert_executions(batch), &dropped);
    algorithms.flush(|batch| store.insert_algorithms(batch), &dropped);
}
