//! # Worker Pool
//!
//! Fixed-size set of workers draining two bounded queues.
//!
//! ## Queues
//! - **Signature jobs** - decode one image and persist its signature
//! - **Comparison jobs** - pre-filter, score and persist one pair
//!
//! Workers take comparison jobs first when both queues have work. Every job
//! ends in exactly one [`WorkReport`] on an unbounded channel, so a worker
//! never blocks on the coordinator. Each job performs its own store write
//! before reporting, which makes a report an acknowledgement of durability.
//!
//! ## Stopping
//! Raising the halt flag (or cancelling the run) makes workers exit before
//! picking up their next job. Jobs still sitting in a queue are dropped and
//! rediscovered from the checkpoint on resume.

mod worker;

pub use worker::WorkerContext;

use crate::core::checkpoint::ImageRecord;
use crate::core::comparator::PairVerdict;
use crate::core::engine::CancellationToken;
use crate::core::enumerator::PairKey;
use crate::error::{panic_message, EngineError, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Compute (or load) the signature of one image
#[derive(Debug, Clone)]
pub struct SignatureJob {
    pub record: Arc<ImageRecord>,
}

/// Resolve one pair
#[derive(Debug, Clone)]
pub struct ComparisonJob {
    pub key: PairKey,
    pub first: Arc<ImageRecord>,
    pub second: Arc<ImageRecord>,
}

/// What a worker did with one job
#[derive(Debug)]
pub enum WorkReport {
    /// Signature is stored; `cached` when no extraction was needed
    Signed { index: u32, cached: bool },
    /// Image could not be decoded and is now Failed
    Failed {
        index: u32,
        path: PathBuf,
        reason: String,
    },
    /// Pair verdict is stored; `fresh` when this job wrote it
    Resolved {
        key: PairKey,
        verdict: PairVerdict,
        fresh: bool,
    },
    /// Pair ended in a terminal error that is now stored
    Errored { key: PairKey, message: String },
    /// One side of the pair has no usable signature any more; the pair is
    /// stored as Distinct and `index` must leave the pair space
    ImageLost { key: PairKey, index: u32 },
    /// Store failure or divergence; the run must stop
    Fatal(EngineError),
}

/// Pool sizing
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Number of worker threads
    pub workers: usize,
    /// Capacity of each job queue
    pub queue_capacity: usize,
}

/// Running worker pool.
///
/// Dropping the pool without [`shutdown`](Self::shutdown) leaves workers to
/// finish the queued jobs on their own.
pub struct WorkerPool {
    signatures: Option<Sender<SignatureJob>>,
    comparisons: Option<Sender<ComparisonJob>>,
    reports: Receiver<WorkReport>,
    halt: Arc<AtomicBool>,
    _threads: rayon::ThreadPool,
}

impl WorkerPool {
    /// Spawn `config.workers` workers sharing `context`.
    ///
    /// Workers also stop when `cancel` is triggered.
    pub fn start(
        context: WorkerContext,
        config: PoolConfig,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let threads = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .thread_name(|i| format!("dedup-worker-{i}"))
            .panic_handler(|payload| {
                error!(message = %panic_message(payload.as_ref()), "worker thread panicked");
            })
            .build()
            .map_err(|e| EngineError::Pool(e.to_string()))?;

        let (signature_tx, signature_rx) = bounded(config.queue_capacity);
        let (comparison_tx, comparison_rx) = bounded(config.queue_capacity);
        let (report_tx, report_rx) = unbounded();
        let halt = Arc::new(AtomicBool::new(false));
        let context = Arc::new(context);

        for _ in 0..config.workers {
            let worker = worker::Worker::new(
                Arc::clone(&context),
                signature_rx.clone(),
                comparison_rx.clone(),
                report_tx.clone(),
                Arc::clone(&halt),
                cancel.clone(),
            );
            threads.spawn(move || worker.run());
        }

        debug!(workers = config.workers, capacity = config.queue_capacity, "worker pool started");

        Ok(Self {
            signatures: Some(signature_tx),
            comparisons: Some(comparison_tx),
            reports: report_rx,
            halt,
            _threads: threads,
        })
    }

    /// Queue a signature job, blocking while the queue is full
    pub fn submit_signature(&self, job: SignatureJob) -> Result<()> {
        self.signatures
            .as_ref()
            .ok_or_else(|| EngineError::Pool("signature queue is closed".to_string()))?
            .send(job)
            .map_err(|_| EngineError::Pool("all workers have exited".to_string()))
    }

    /// Queue a comparison job, blocking while the queue is full
    pub fn submit_comparison(&self, job: ComparisonJob) -> Result<()> {
        self.comparisons
            .as_ref()
            .ok_or_else(|| EngineError::Pool("comparison queue is closed".to_string()))?
            .send(job)
            .map_err(|_| EngineError::Pool("all workers have exited".to_string()))
    }

    /// Wait up to `timeout` for the next report.
    ///
    /// Returns `None` on timeout, and an error once every worker has exited
    /// and no reports are left.
    pub fn next_report(&self, timeout: Duration) -> Result<Option<WorkReport>> {
        match self.reports.recv_timeout(timeout) {
            Ok(report) => Ok(Some(report)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(EngineError::Pool("all workers have exited".to_string()))
            }
        }
    }

    /// Tell workers to exit before their next job
    pub fn halt(&self) {
        self.halt.store(true, Ordering::SeqCst);
    }

    /// Close both queues and wait for every worker to exit.
    ///
    /// Returns the reports of jobs that finished after the caller stopped
    /// reading. Without a prior [`halt`](Self::halt), queued jobs are still
    /// processed first.
    pub fn shutdown(mut self) -> Vec<WorkReport> {
        self.signatures.take();
        self.comparisons.take();
        self.reports.iter().collect()
    }
}
