//! Hands audit records to the active sink.
//!
//! In synchronous mode the sink runs on the caller's thread. Otherwise the
//! dispatcher owns a small tokio runtime: records go through a bounded
//! queue to a fixed number of workers, each running the blocking `store`
//! call on the runtime's blocking pool. Submission never waits; a full or
//! closed queue drops the record and logs it.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::runtime::{Handle, Runtime};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinSet;

use crate::config::{
    AuditConfig, DEFAULT_SHUTDOWN_GRACE_SECS, DEFAULT_THREADPOOL_SIZE, MAX_THREADPOOL_SIZE,
};
use crate::record::AuditRecord;
use crate::sink::AuditSink;

/// Dispatcher settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Number of workers; zero or negative selects synchronous mode.
    pub pool_size: i64,
    /// Queue capacity in asynchronous mode.
    pub max_queue_len: usize,
    /// How long each shutdown phase waits.
    pub grace_period: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_THREADPOOL_SIZE,
            max_queue_len: 100_000,
            grace_period: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS),
        }
    }
}

impl DispatchConfig {
    /// Synchronous dispatch.
    #[must_use]
    pub fn synchronous() -> Self {
        Self {
            pool_size: 0,
            ..Self::default()
        }
    }

    /// Reads the dispatcher settings out of `config`.
    #[must_use]
    pub fn from_config(config: &AuditConfig) -> Self {
        Self {
            pool_size: config.threadpool_size,
            max_queue_len: config.threadpool_max_queue_len.max(1) as usize,
            grace_period: config.shutdown_grace_period(),
        }
    }

    /// Sets the pool size.
    #[must_use]
    pub const fn with_pool_size(mut self, pool_size: i64) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Sets the queue capacity.
    #[must_use]
    pub const fn with_max_queue_len(mut self, max_queue_len: usize) -> Self {
        self.max_queue_len = max_queue_len;
        self
    }

    /// Sets the per-phase shutdown grace period.
    #[must_use]
    pub const fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Returns true if records are delivered on worker threads.
    #[must_use]
    pub const fn is_async(&self) -> bool {
        self.pool_size > 0
    }

    /// Number of worker threads to start, capped at [`MAX_THREADPOOL_SIZE`].
    #[must_use]
    pub fn worker_count(&self) -> usize {
        usize::try_from(self.pool_size.clamp(0, MAX_THREADPOOL_SIZE)).unwrap_or(0)
    }
}

/// Dispatcher lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum DispatcherState {
    /// Accepting records.
    Active = 0,
    /// Shutdown started; new records are dropped.
    Draining = 1,
    /// Shut down and sink closed.
    Closed = 2,
}

impl DispatcherState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Active,
            1 => Self::Draining,
            _ => Self::Closed,
        }
    }
}

/// Snapshot of the dispatch counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStats {
    /// Records accepted for delivery.
    pub submitted: u64,
    /// Records the sink stored.
    pub stored: u64,
    /// Records the sink failed to store.
    pub failed: u64,
    /// Records dropped without reaching the sink.
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    stored: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            stored: self.stored.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

fn deliver(sink: &dyn AuditSink, record: &AuditRecord, counters: &Counters) {
    match sink.store(record) {
        Ok(()) => {
            counters.stored.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                target: "vigil_audit",
                sink = sink.name(),
                category = %record.category(),
                error = %e,
                "failed to deliver audit record"
            );
        }
    }
}

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<AuditRecord>>>;

async fn run_worker(
    receiver: SharedReceiver,
    sink: Arc<dyn AuditSink>,
    counters: Arc<Counters>,
    cancelled: Arc<AtomicBool>,
) {
    loop {
        let next = receiver.lock().await.recv().await;
        let Some(record) = next else {
            break;
        };
        if cancelled.load(Ordering::Acquire) {
            counters.dropped.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        let sink = Arc::clone(&sink);
        let task_counters = Arc::clone(&counters);
        let delivery =
            tokio::task::spawn_blocking(move || deliver(sink.as_ref(), &record, &task_counters));
        if let Err(e) = delivery.await {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            tracing::error!(target: "vigil_audit", error = %e, "audit delivery task failed");
        }
    }
}

/// Runs `future` to completion on `runtime`, from a helper thread if the
/// caller is itself inside a runtime.
fn block_on<F>(runtime: &Runtime, future: F) -> Option<F::Output>
where
    F: Future + Send,
    F::Output: Send,
{
    if Handle::try_current().is_ok() {
        std::thread::scope(|scope| scope.spawn(|| runtime.block_on(future)).join().ok())
    } else {
        Some(runtime.block_on(future))
    }
}

async fn join_all(workers: &mut JoinSet<()>) {
    while workers.join_next().await.is_some() {}
}

struct WorkerPool {
    runtime: Mutex<Option<Runtime>>,
    sender: Mutex<Option<mpsc::Sender<AuditRecord>>>,
    workers: Mutex<Option<JoinSet<()>>>,
    cancelled: Arc<AtomicBool>,
}

impl WorkerPool {
    fn start(
        size: usize,
        capacity: usize,
        sink: &Arc<dyn AuditSink>,
        counters: &Arc<Counters>,
    ) -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(size)
            .max_blocking_threads(size)
            .thread_name("vigil-audit-worker")
            .enable_time()
            .build()?;

        let (sender, receiver) = mpsc::channel(capacity);
        let receiver: SharedReceiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let cancelled = Arc::new(AtomicBool::new(false));

        let mut workers = JoinSet::new();
        for _ in 0..size {
            workers.spawn_on(
                run_worker(
                    Arc::clone(&receiver),
                    Arc::clone(sink),
                    Arc::clone(counters),
                    Arc::clone(&cancelled),
                ),
                runtime.handle(),
            );
        }

        Ok(Self {
            runtime: Mutex::new(Some(runtime)),
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(Some(workers)),
            cancelled,
        })
    }

    fn try_send(&self, record: AuditRecord) -> Result<(), TrySendError<AuditRecord>> {
        match self.sender.lock().as_ref() {
            Some(sender) => sender.try_send(record),
            None => Err(TrySendError::Closed(record)),
        }
    }

    /// Closes the queue and waits for the workers. Returns true if every
    /// worker finished.
    fn drain(&self, grace_period: Duration) -> bool {
        drop(self.sender.lock().take());

        let Some(runtime) = self.runtime.lock().take() else {
            return true;
        };
        let Some(mut workers) = self.workers.lock().take() else {
            runtime.shutdown_background();
            return true;
        };

        let cancelled = &self.cancelled;
        let drained = block_on(&runtime, async {
            if tokio::time::timeout(grace_period, join_all(&mut workers)).await.is_ok() {
                return true;
            }
            tracing::warn!(
                target: "vigil_audit",
                grace_secs = grace_period.as_secs_f64(),
                "audit queue not drained in time, cancelling queued records"
            );
            cancelled.store(true, Ordering::Release);
            if tokio::time::timeout(grace_period, join_all(&mut workers)).await.is_ok() {
                return true;
            }
            workers.abort_all();
            false
        })
        .unwrap_or(false);

        runtime.shutdown_background();
        drained
    }
}

/// Delivers records to the active sink, synchronously or through a worker
/// pool.
///
/// Without a sink every operation is a no-op.
pub struct Dispatcher {
    sink: Option<Arc<dyn AuditSink>>,
    pool: Option<WorkerPool>,
    state: AtomicU8,
    counters: Arc<Counters>,
    grace_period: Duration,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("sink", &self.sink.as_ref().map(|s| s.name().to_string()))
            .field("async", &self.is_async())
            .field("state", &self.state())
            .field("stats", &self.stats())
            .finish()
    }
}

impl Dispatcher {
    /// Creates a dispatcher for `sink`.
    ///
    /// If the worker runtime cannot be started the dispatcher logs the
    /// failure and runs synchronously.
    #[must_use]
    pub fn new(sink: Option<Arc<dyn AuditSink>>, config: DispatchConfig) -> Self {
        let counters = Arc::new(Counters::default());
        let pool = match &sink {
            Some(sink) if config.is_async() => {
                let size = config.worker_count();
                if config.pool_size > MAX_THREADPOOL_SIZE {
                    tracing::warn!(
                        target: "vigil_audit",
                        requested = config.pool_size,
                        workers = size,
                        "audit worker pool size capped"
                    );
                }
                match WorkerPool::start(size, config.max_queue_len.max(1), sink, &counters) {
                    Ok(pool) => {
                        tracing::debug!(
                            target: "vigil_audit",
                            sink = sink.name(),
                            workers = size,
                            capacity = config.max_queue_len,
                            "started audit worker pool"
                        );
                        Some(pool)
                    }
                    Err(e) => {
                        tracing::error!(
                            target: "vigil_audit",
                            error = %e,
                            "failed to start audit worker pool, dispatching synchronously"
                        );
                        None
                    }
                }
            }
            _ => None,
        };

        Self {
            sink,
            pool,
            state: AtomicU8::new(DispatcherState::Active as u8),
            counters,
            grace_period: config.grace_period,
        }
    }

    /// Creates a dispatcher with no sink.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(None, DispatchConfig::synchronous())
    }

    /// Returns the active sink.
    #[must_use]
    pub fn sink(&self) -> Option<&Arc<dyn AuditSink>> {
        self.sink.as_ref()
    }

    /// Returns true if a sink is active.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Returns true if records are delivered on worker threads.
    #[must_use]
    pub const fn is_async(&self) -> bool {
        self.pool.is_some()
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> DispatcherState {
        DispatcherState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Returns the dispatch counters.
    #[must_use]
    pub fn stats(&self) -> DispatchStats {
        self.counters.snapshot()
    }

    /// Hands `record` to the sink.
    ///
    /// Never blocks beyond an in-memory enqueue in asynchronous mode and
    /// never fails; rejected records are logged and dropped.
    pub fn submit(&self, record: AuditRecord) {
        let Some(sink) = &self.sink else {
            return;
        };

        if self.state() != DispatcherState::Active {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                target: "vigil_audit",
                category = %record.category(),
                "audit dispatcher is shut down, dropping record"
            );
            return;
        }

        let Some(pool) = &self.pool else {
            self.counters.submitted.fetch_add(1, Ordering::Relaxed);
            deliver(sink.as_ref(), &record, &self.counters);
            return;
        };

        match pool.try_send(record) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(record)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    target: "vigil_audit",
                    category = %record.category(),
                    "audit queue full, dropping record"
                );
            }
            Err(TrySendError::Closed(record)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    target: "vigil_audit",
                    category = %record.category(),
                    "audit queue closed, dropping record"
                );
            }
        }
    }

    /// Stops accepting records, drains the queue and closes the sink.
    ///
    /// Queued records get one grace period to finish. After that the
    /// remaining queued records are cancelled and in-flight deliveries get
    /// a second grace period. Only the first call does anything.
    pub fn shutdown(&self) {
        if self
            .state
            .compare_exchange(
                DispatcherState::Active as u8,
                DispatcherState::Draining as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }

        if let Some(pool) = &self.pool {
            if !pool.drain(self.grace_period) {
                tracing::error!(
                    target: "vigil_audit",
                    grace_secs = self.grace_period.as_secs_f64(),
                    "audit dispatcher did not drain, abandoning in-flight records"
                );
            }
        }

        if let Some(sink) = &self.sink {
            if let Err(e) = sink.close() {
                tracing::error!(
                    target: "vigil_audit",
                    sink = sink.name(),
                    error = %e,
                    "failed to close audit sink"
                );
            }
            let stats = self.stats();
            tracing::debug!(
                target: "vigil_audit",
                sink = sink.name(),
                submitted = stats.submitted,
                stored = stats.stored,
                failed = stats.failed,
                dropped = stats.dropped,
                "audit dispatcher closed"
            );
        }

        self.state.store(DispatcherState::Closed as u8, Ordering::Release);
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
