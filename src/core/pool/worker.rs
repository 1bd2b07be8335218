//! Worker loop and per-job execution.

use super::{ComparisonJob, SignatureJob, WorkReport};
use crate::core::checkpoint::{CheckpointStore, PairOutcome};
use crate::core::comparator::{
    Candidate, ComparisonStrategy, PairVerdict, Prefilter, PrefilterDecision, SimilarityMetric,
    Verdict,
};
use crate::core::engine::CancellationToken;
use crate::core::signature::{Lookup, Signature, SignatureCache, SignatureOutcome};
use crate::error::{panic_message, CompareError, EngineError};
use crossbeam_channel::{never, select, Receiver, Sender, TryRecvError};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

/// Everything a worker needs to execute jobs
pub struct WorkerContext {
    pub store: Arc<dyn CheckpointStore>,
    pub cache: Arc<SignatureCache>,
    pub metric: Arc<dyn SimilarityMetric>,
    pub prefilter: Arc<dyn Prefilter>,
    pub strategy: Arc<dyn ComparisonStrategy>,
}

enum Job {
    Signature(SignatureJob),
    Comparison(ComparisonJob),
}

enum Closed {
    Signatures,
    Comparisons,
}

pub(super) struct Worker {
    context: Arc<WorkerContext>,
    signatures: Receiver<SignatureJob>,
    comparisons: Receiver<ComparisonJob>,
    signatures_open: bool,
    comparisons_open: bool,
    reports: Sender<WorkReport>,
    halt: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl Worker {
    pub(super) fn new(
        context: Arc<WorkerContext>,
        signatures: Receiver<SignatureJob>,
        comparisons: Receiver<ComparisonJob>,
        reports: Sender<WorkReport>,
        halt: Arc<AtomicBool>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            context,
            signatures,
            comparisons,
            signatures_open: true,
            comparisons_open: true,
            reports,
            halt,
            cancel,
        }
    }

    pub(super) fn run(mut self) {
        while let Some(job) = self.next_job() {
            if self.stopping() {
                break;
            }

            // Metric, pre-filter and extractor panics are settled per job;
            // anything else escaping a job stops the run instead of the process
            let context = &self.context;
            let report = panic::catch_unwind(AssertUnwindSafe(move || match job {
                Job::Signature(job) => context.sign(job),
                Job::Comparison(job) => context.compare(job),
            }))
            .unwrap_or_else(|payload| {
                WorkReport::Fatal(EngineError::Pool(format!(
                    "worker panicked: {}",
                    panic_message(payload.as_ref())
                )))
            });

            if self.reports.send(report).is_err() {
                break;
            }
        }
        trace!("worker exiting");
    }

    fn stopping(&self) -> bool {
        self.halt.load(Ordering::SeqCst) || self.cancel.is_cancelled()
    }

    /// Next job, comparisons first. `None` once both queues are closed and
    /// drained, or when the pool is stopping.
    fn next_job(&mut self) -> Option<Job> {
        loop {
            if self.stopping() || !(self.signatures_open || self.comparisons_open) {
                return None;
            }

            if self.comparisons_open {
                match self.comparisons.try_recv() {
                    Ok(job) => return Some(Job::Comparison(job)),
                    Err(TryRecvError::Disconnected) => {
                        self.close(Closed::Comparisons);
                        continue;
                    }
                    Err(TryRecvError::Empty) => {}
                }
            }

            // Closed queues are swapped for `never()` so select only wakes
            // for the open one
            let polled = select! {
                recv(self.comparisons) -> job => job.map(Job::Comparison).map_err(|_| Closed::Comparisons),
                recv(self.signatures) -> job => job.map(Job::Signature).map_err(|_| Closed::Signatures),
            };

            match polled {
                Ok(job) => return Some(job),
                Err(closed) => self.close(closed),
            }
        }
    }

    fn close(&mut self, queue: Closed) {
        match queue {
            Closed::Signatures => {
                self.signatures_open = false;
                self.signatures = never();
            }
            Closed::Comparisons => {
                self.comparisons_open = false;
                self.comparisons = never();
            }
        }
    }
}

impl WorkerContext {
    fn sign(&self, job: SignatureJob) -> WorkReport {
        let record = &job.record;

        match self.cache.get_or_compute(record) {
            Ok(SignatureOutcome::Cached(_)) => WorkReport::Signed {
                index: record.index,
                cached: true,
            },
            Ok(SignatureOutcome::Computed(_)) => WorkReport::Signed {
                index: record.index,
                cached: false,
            },
            Ok(SignatureOutcome::Failed { reason }) => WorkReport::Failed {
                index: record.index,
                path: record.path.clone(),
                reason,
            },
            Err(error) => WorkReport::Fatal(error),
        }
    }

    fn compare(&self, job: ComparisonJob) -> WorkReport {
        let key = job.key;

        let first = match self.cache.get(job.first.index, &job.first.fingerprint) {
            Ok(Lookup::Found(signature)) => signature,
            Ok(Lookup::Unavailable { reason }) => return self.lose(job, true, &reason),
            Err(error) => return WorkReport::Fatal(error),
        };
        let second = match self.cache.get(job.second.index, &job.second.fingerprint) {
            Ok(Lookup::Found(signature)) => signature,
            Ok(Lookup::Unavailable { reason }) => return self.lose(job, false, &reason),
            Err(error) => return WorkReport::Fatal(error),
        };

        let verdict = match self.judge(
            Candidate::new(&job.first, &first),
            Candidate::new(&job.second, &second),
        ) {
            Ok(verdict) => verdict,
            Err(error) => {
                let message = error.to_string();
                warn!(pair = %key, %message, "comparison failed");
                let outcome = PairOutcome::Error {
                    message: message.clone(),
                };
                return match self.store.record_pair(key, &outcome) {
                    Ok(_) => WorkReport::Errored { key, message },
                    Err(error) => WorkReport::Fatal(error),
                };
            }
        };

        match self.store.record_pair(key, &PairOutcome::Resolved(verdict)) {
            Ok(write) => WorkReport::Resolved {
                key,
                verdict,
                fresh: write.is_written(),
            },
            Err(error) => WorkReport::Fatal(error),
        }
    }

    /// Pre-filter, then score and classify
    fn judge(&self, a: Candidate<'_>, b: Candidate<'_>) -> Result<PairVerdict, CompareError> {
        let decision = panic::catch_unwind(AssertUnwindSafe(|| self.prefilter.check(a, b)))
            .map_err(|payload| CompareError::Panicked {
                message: format!("pre-filter: {}", panic_message(payload.as_ref())),
            })?;

        match decision {
            PrefilterDecision::Reject => Ok(PairVerdict::rejected()),
            PrefilterDecision::Continue => {
                let score = self.score(a.signature, b.signature)?;
                Ok(PairVerdict::scored(score, self.strategy.classify(score)))
            }
        }
    }

    /// Run the metric, turning panics and out-of-range scores into errors
    fn score(&self, a: &Signature, b: &Signature) -> Result<f64, CompareError> {
        let score = panic::catch_unwind(AssertUnwindSafe(|| self.metric.compare(a, b)))
            .unwrap_or_else(|payload| {
                Err(CompareError::Panicked {
                    message: panic_message(payload.as_ref()),
                })
            })?;

        if (0.0..=1.0).contains(&score) {
            Ok(score)
        } else {
            Err(CompareError::ScoreOutOfRange { score })
        }
    }

    /// Settle a pair whose `first` (or second) side has no usable signature.
    ///
    /// The image is marked Failed so the store agrees with the coordinator
    /// dropping it from the pair space.
    fn lose(&self, job: ComparisonJob, first: bool, reason: &str) -> WorkReport {
        let index = if first {
            job.first.index
        } else {
            job.second.index
        };
        warn!(pair = %job.key, index, %reason, "signature unavailable, pair resolved as distinct");

        if let Err(error) = self.store.mark_failed(index, reason) {
            return WorkReport::Fatal(error.into());
        }

        let outcome = PairOutcome::Resolved(PairVerdict::scored(0.0, Verdict::Distinct));
        match self.store.record_pair(job.key, &outcome) {
            Ok(_) => WorkReport::ImageLost {
                key: job.key,
                index,
            },
            Err(error) => WorkReport::Fatal(error),
        }
    }
}
