//! Run coordinator: owns the run state and drives both stages.

use super::handle::CancellationToken;
use super::progress::{pair_space, ProgressTracker};
use super::{Engine, RunOutcome};
use crate::core::checkpoint::{ImageRecord, ImageState, RunPhase, RunState};
use crate::core::comparator::ResultAggregator;
use crate::core::pool::{ComparisonJob, PoolConfig, SignatureJob, WorkReport, WorkerContext, WorkerPool};
use crate::core::scanner::DiscoveredImage;
use crate::core::signature::SignatureCache;
use crate::error::{EngineError, Result};
use crate::events::{
    CompareEvent, CompareProgress, DiscoveryEvent, DiscoverySummary, Event, RunEvent, RunSummary,
    SignatureEvent, SignatureProgress,
};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How long the coordinator waits for a report before re-checking for a stop
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Comparison progress is published every this many resolved pairs
const PROGRESS_EVERY: u64 = 256;

/// Failure reason recorded for images that disappeared from the collection
const MISSING_REASON: &str = "file no longer present in the collection";

/// How a stage ended
enum StageEnd {
    Finished,
    Stopped,
    Fatal(EngineError),
}

pub(super) struct Coordinator<'a> {
    engine: &'a Engine,
    token: CancellationToken,
    progress: &'a ProgressTracker,
    started: Instant,
}

impl<'a> Coordinator<'a> {
    pub(super) fn new(
        engine: &'a Engine,
        token: CancellationToken,
        progress: &'a ProgressTracker,
    ) -> Self {
        Self {
            engine,
            token,
            progress,
            started: Instant::now(),
        }
    }

    pub(super) fn run(self) -> Result<RunOutcome> {
        let (mut state, resumed) = self.initialize()?;
        let discovery = match self.reconcile() {
            Ok(summary) => summary,
            Err(error) => return Err(self.fail(&mut state, error)),
        };

        self.transition(&mut state, RunPhase::Running)?;

        let pool = match WorkerPool::start(
            self.worker_context(),
            PoolConfig {
                workers: self.engine.config.worker_count,
                queue_capacity: self.engine.config.queue_capacity,
            },
            self.token.clone(),
        ) {
            Ok(pool) => pool,
            Err(error) => return Err(self.fail(&mut state, error)),
        };

        let end = match self.signature_stage(&pool) {
            Ok(StageEnd::Finished) => self.comparison_stage(&pool),
            other => other,
        };

        // Let in-flight units land before deciding how the run ended
        if !matches!(end, Ok(StageEnd::Finished)) {
            pool.halt();
        }
        let late_fatal = self.absorb(pool.shutdown());

        match (end, late_fatal) {
            (Err(error), _) | (Ok(StageEnd::Fatal(error)), _) | (_, Some(error)) => {
                Err(self.fail(&mut state, error))
            }
            (Ok(StageEnd::Stopped), None) => self.interrupt(state, resumed, discovery),
            (Ok(StageEnd::Finished), None) => self.finish(state, resumed, discovery),
        }
    }

    /// Load or create the run state
    fn initialize(&self) -> Result<(RunState, bool)> {
        let engine = self.engine;
        let config = &engine.config;
        let settings = config.settings(
            engine.prefilter.as_ref(),
            engine.metric.as_ref(),
            engine.extractor.as_ref(),
        );

        let existing = engine.store.load_run_state()?;
        let (mut state, resumed) = match existing {
            Some(mut state) if config.resume => {
                state.settings.check_compatible(&settings)?;
                state.invocations += 1;
                info!(run_id = %state.run_id, phase = %state.phase, "resuming run");
                (state, true)
            }
            Some(state) => {
                info!(run_id = %state.run_id, "discarding previous checkpoint");
                engine.store.clear()?;
                (RunState::new(settings), false)
            }
            None => (RunState::new(settings), false),
        };

        engine.events.send(Event::Run(RunEvent::Started {
            run_id: state.run_id.to_string(),
            resumed,
        }));
        self.transition(&mut state, RunPhase::Initializing)?;

        if resumed && config.retry_failed {
            let reset = engine.store.clear_failed()?;
            info!(reset, "retrying failed images");
        }

        Ok((state, resumed))
    }

    /// Bring the checkpoint in line with what is on disk now
    fn reconcile(&self) -> Result<DiscoverySummary> {
        let engine = self.engine;
        let config = &engine.config;

        let mut images = Vec::new();
        for root in std::iter::once(&config.root).chain(config.compare_root.as_ref()) {
            images.extend(self.discover(root)?);
        }
        images.sort_by(|a, b| a.path.cmp(&b.path));

        let mut known: HashMap<PathBuf, ImageRecord> = engine
            .store
            .images()?
            .into_iter()
            .map(|record| (record.path.clone(), record))
            .collect();
        let mut next_index = known
            .values()
            .map(|record| record.index + 1)
            .max()
            .unwrap_or(0);

        let mut summary = DiscoverySummary {
            total_images: images.len(),
            ..Default::default()
        };

        for image in &images {
            let candidate = ImageRecord::discovered(next_index, image);

            match known.remove(&image.path) {
                None => {
                    engine.store.register_image(&candidate)?;
                    next_index += 1;
                    summary.new_images += 1;
                }
                Some(record) => {
                    let came_back = matches!(
                        &record.state,
                        ImageState::Failed { reason } if reason == MISSING_REASON
                    );
                    if record.fingerprint != candidate.fingerprint || came_back {
                        let dropped = engine
                            .store
                            .invalidate_image(record.index, &candidate.fingerprint)?;
                        debug!(index = record.index, dropped, "image changed, signature invalidated");
                        summary.changed_images += 1;
                        summary.invalidated_pairs += dropped;
                    }
                }
            }
        }

        for record in known.into_values() {
            if !record.state.is_failed() {
                debug!(index = record.index, path = %record.path.display(), "image missing");
                engine.store.mark_failed(record.index, MISSING_REASON)?;
                summary.missing_images += 1;
            }
        }

        info!(
            total = summary.total_images,
            new = summary.new_images,
            changed = summary.changed_images,
            missing = summary.missing_images,
            "discovery reconciled"
        );
        engine
            .events
            .send(Event::Discovery(DiscoveryEvent::Completed(summary.clone())));

        Ok(summary)
    }

    /// List the images under one collection root
    fn discover(&self, root: &Path) -> Result<Vec<DiscoveredImage>> {
        let engine = self.engine;
        engine.events.send(Event::Discovery(DiscoveryEvent::Started {
            root: root.to_path_buf(),
        }));

        let listing = engine.source.list_images(root)?;
        for error in &listing.errors {
            warn!(%error, "discovery error");
            engine.events.send(Event::Discovery(DiscoveryEvent::Error {
                path: root.to_path_buf(),
                message: error.to_string(),
            }));
        }
        Ok(listing.images)
    }

    fn worker_context(&self) -> WorkerContext {
        let engine = self.engine;
        WorkerContext {
            store: Arc::clone(&engine.store),
            cache: Arc::new(SignatureCache::new(
                Arc::clone(&engine.store),
                Arc::clone(&engine.extractor),
            )),
            metric: Arc::clone(&engine.metric),
            prefilter: Arc::clone(&engine.prefilter),
            strategy: Arc::new(engine.config.strategy()),
        }
    }

    /// Number of jobs allowed between the coordinator and the workers
    fn window(&self) -> usize {
        self.engine.config.queue_capacity + self.engine.config.worker_count
    }

    fn signature_stage(&self, pool: &WorkerPool) -> Result<StageEnd> {
        let engine = self.engine;
        let images = engine.store.images()?;
        let pending: Vec<ImageRecord> = images
            .iter()
            .filter(|record| record.state == ImageState::Discovered)
            .cloned()
            .collect();
        let signed = images.iter().filter(|r| r.state.is_signed()).count();
        let failed = images.iter().filter(|r| r.state.is_failed()).count();

        self.progress.set_images(images.len(), signed, failed);
        engine.events.send(Event::Signature(SignatureEvent::Started {
            pending: pending.len(),
            cached: signed,
        }));
        info!(pending = pending.len(), cached = signed, "signature stage started");

        let total = pending.len();
        let mut queue = pending.into_iter();
        let mut in_flight = 0usize;
        let mut completed = 0usize;
        let mut stage_failed = 0usize;
        let mut stage_signed = 0usize;

        loop {
            if self.token.is_cancelled() {
                return Ok(StageEnd::Stopped);
            }

            while in_flight < self.window() {
                let Some(record) = queue.next() else { break };
                if let Err(error) = pool.submit_signature(SignatureJob {
                    record: Arc::new(record),
                }) {
                    return self.stopped_or(error);
                }
                in_flight += 1;
            }

            if in_flight == 0 {
                break;
            }

            let report = match pool.next_report(POLL_INTERVAL) {
                Ok(Some(report)) => report,
                Ok(None) => continue,
                Err(error) => return self.stopped_or(error),
            };
            in_flight -= 1;
            completed += 1;

            match report {
                WorkReport::Signed { .. } => {
                    stage_signed += 1;
                    self.progress.image_signed();
                }
                WorkReport::Failed {
                    index,
                    path,
                    reason,
                } => {
                    stage_failed += 1;
                    self.progress.image_failed();
                    debug!(index, %reason, "signature failed");
                    engine
                        .events
                        .send(Event::Signature(SignatureEvent::Failed { path, reason }));
                }
                WorkReport::Fatal(error) => return Ok(StageEnd::Fatal(error)),
                other => warn!(?other, "unexpected report during signature stage"),
            }

            engine
                .events
                .send(Event::Signature(SignatureEvent::Progress(SignatureProgress {
                    completed,
                    total,
                    failed: stage_failed,
                })));
        }

        engine.events.send(Event::Signature(SignatureEvent::Completed {
            signed: stage_signed,
            failed: stage_failed,
        }));
        info!(signed = stage_signed, failed = stage_failed, "signature stage finished");

        Ok(StageEnd::Finished)
    }

    fn comparison_stage(&self, pool: &WorkerPool) -> Result<StageEnd> {
        let engine = self.engine;
        let records: HashMap<u32, Arc<ImageRecord>> = engine
            .store
            .images()?
            .into_iter()
            .filter(|record| record.state.is_signed())
            .map(|record| (record.index, Arc::new(record)))
            .collect();

        let mut enumerator = pair_space(
            records.values().map(|record| record.as_ref()),
            engine.store.resolved_pairs()?,
            engine.config.compare_root.as_deref(),
        );
        let errored = engine.store.counts()?.pairs_errored;
        self.progress
            .set_pairs(enumerator.total(), enumerator.already_resolved(), errored);

        engine.events.send(Event::Compare(CompareEvent::Started {
            total_pairs: enumerator.total(),
            already_resolved: enumerator.already_resolved(),
        }));
        info!(
            images = records.len(),
            total = enumerator.total(),
            resolved = enumerator.already_resolved(),
            "comparison stage started"
        );

        let batch_size = engine.config.batch_size;
        let mut in_flight = 0usize;
        let mut stage_resolved = 0u64;
        let mut stage_errored = 0u64;
        let mut lost: HashSet<u32> = HashSet::new();

        loop {
            if self.token.is_cancelled() {
                return Ok(StageEnd::Stopped);
            }

            while in_flight < self.window() {
                let room = (self.window() - in_flight).min(batch_size);
                let batch = enumerator.next_batch(room);
                if batch.is_empty() {
                    break;
                }
                for key in batch {
                    let (Some(first), Some(second)) =
                        (records.get(&key.first()), records.get(&key.second()))
                    else {
                        return Err(EngineError::Pool(format!(
                            "pair {key} references an image outside the pair space"
                        )));
                    };
                    if let Err(error) = pool.submit_comparison(ComparisonJob {
                        key,
                        first: Arc::clone(first),
                        second: Arc::clone(second),
                    }) {
                        return self.stopped_or(error);
                    }
                    in_flight += 1;
                }
            }

            if in_flight == 0 {
                break;
            }

            let report = match pool.next_report(POLL_INTERVAL) {
                Ok(Some(report)) => report,
                Ok(None) => continue,
                Err(error) => return self.stopped_or(error),
            };
            in_flight -= 1;

            let resolved = match report {
                WorkReport::Resolved { .. } => {
                    stage_resolved += 1;
                    self.progress.pair_resolved()
                }
                WorkReport::Errored { key, message } => {
                    stage_errored += 1;
                    engine.events.send(Event::Compare(CompareEvent::Error {
                        a: key.first(),
                        b: key.second(),
                        message,
                    }));
                    self.progress.pair_errored()
                }
                WorkReport::ImageLost { key, index } => {
                    if lost.insert(index) {
                        let dropped = enumerator.exclude(index);
                        self.progress.image_lost();
                        self.progress.set_pairs_total(enumerator.total());
                        warn!(pair = %key, index, dropped, "image left the pair space");
                    }
                    stage_resolved += 1;
                    self.progress.pair_resolved()
                }
                WorkReport::Fatal(error) => return Ok(StageEnd::Fatal(error)),
                other => {
                    warn!(?other, "unexpected report during comparison stage");
                    continue;
                }
            };

            if resolved % PROGRESS_EVERY == 0 {
                self.publish_compare_progress();
            }
        }

        self.publish_compare_progress();
        engine.events.send(Event::Compare(CompareEvent::Completed {
            resolved: stage_resolved,
            errored: stage_errored,
        }));
        info!(
            resolved = stage_resolved,
            errored = stage_errored,
            "comparison stage finished"
        );

        Ok(StageEnd::Finished)
    }

    /// Losing the workers is a stop when the run was cancelled, since they
    /// exit on cancellation and close the queues behind them
    fn stopped_or(&self, error: EngineError) -> Result<StageEnd> {
        if self.token.is_cancelled() {
            Ok(StageEnd::Stopped)
        } else {
            Err(error)
        }
    }

    /// Count reports that arrived after a stage stopped reading, returning
    /// the first fatal error among them
    fn absorb(&self, reports: Vec<WorkReport>) -> Option<EngineError> {
        let mut fatal = None;
        for report in reports {
            match report {
                WorkReport::Signed { .. } => self.progress.image_signed(),
                WorkReport::Failed { .. } => self.progress.image_failed(),
                WorkReport::Resolved { .. } | WorkReport::ImageLost { .. } => {
                    self.progress.pair_resolved();
                }
                WorkReport::Errored { .. } => {
                    self.progress.pair_errored();
                }
                WorkReport::Fatal(error) => {
                    fatal.get_or_insert(error);
                }
            }
        }
        fatal
    }

    fn publish_compare_progress(&self) {
        let progress = self.progress.snapshot();
        self.engine
            .events
            .send(Event::Compare(CompareEvent::Progress(CompareProgress {
                pairs_resolved: progress.pairs_resolved,
                pairs_total: progress.pairs_total,
            })));
    }

    /// Persist a phase change and announce it
    fn transition(&self, state: &mut RunState, phase: RunPhase) -> Result<()> {
        state.transition(phase);
        self.engine.store.save_run_state(state)?;
        self.progress.set_phase(phase);
        self.engine
            .events
            .send(Event::Run(RunEvent::PhaseChanged { phase }));
        debug!(%phase, "run phase changed");
        Ok(())
    }

    fn interrupt(
        &self,
        mut state: RunState,
        resumed: bool,
        discovery: DiscoverySummary,
    ) -> Result<RunOutcome> {
        self.transition(&mut state, RunPhase::Interrupted)?;
        self.engine
            .events
            .send(Event::Run(RunEvent::Interrupted { resumable: true }));
        info!(run_id = %state.run_id, "run interrupted");

        Ok(RunOutcome {
            run_id: state.run_id,
            phase: RunPhase::Interrupted,
            resumed,
            discovery,
            progress: self.progress.snapshot(),
            groups: Vec::new(),
            duration_ms: self.started.elapsed().as_millis() as u64,
        })
    }

    fn finish(
        &self,
        mut state: RunState,
        resumed: bool,
        discovery: DiscoverySummary,
    ) -> Result<RunOutcome> {
        self.transition(&mut state, RunPhase::Completed)?;

        let groups = ResultAggregator::new(Arc::clone(&self.engine.store)).groups()?;
        self.transition(&mut state, RunPhase::Reported)?;

        let progress = self.progress.snapshot();
        let duration_ms = self.started.elapsed().as_millis() as u64;
        let duplicates: Vec<_> = groups.iter().filter(|g| !g.is_singleton()).collect();

        let summary = RunSummary {
            total_images: progress.images_signed,
            failed_images: progress.images_failed,
            total_pairs: progress.pairs_total,
            duplicate_groups: duplicates.len(),
            duplicate_count: duplicates.iter().map(|g| g.duplicate_count()).sum(),
            duration_ms,
        };
        info!(
            groups = summary.duplicate_groups,
            duplicates = summary.duplicate_count,
            duration_ms,
            "run complete"
        );
        self.engine
            .events
            .send(Event::Run(RunEvent::Completed { summary }));

        Ok(RunOutcome {
            run_id: state.run_id,
            phase: RunPhase::Reported,
            resumed,
            discovery,
            progress,
            groups,
            duration_ms,
        })
    }

    /// Record a fatal error. The run is left Interrupted when the store still
    /// accepts writes.
    fn fail(&self, state: &mut RunState, error: EngineError) -> EngineError {
        error!(%error, "run failed");
        if let Err(save_error) = self.transition(state, RunPhase::Interrupted) {
            warn!(%save_error, "could not persist interrupted state");
        }
        self.engine.events.send(Event::Run(RunEvent::Error {
            message: error.to_string(),
        }));
        self.engine.events.send(Event::Run(RunEvent::Interrupted {
            resumable: error.is_resumable(),
        }));
        error
    }
}
