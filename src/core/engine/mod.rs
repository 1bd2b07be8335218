//! # Engine Module
//!
//! Owns the run lifecycle and wires every component together.
//!
//! ## Lifecycle
//! `Initializing` (validate, open the checkpoint, reconcile discovery) →
//! `Running` (signature stage, then comparison stage) → `Completed` →
//! `Reported`. A stop request or a fatal error ends the run `Interrupted`;
//! running again with the same checkpoint picks up where it stopped.
//!
//! ## Example
//! ```rust,ignore
//! let config = EngineConfig::builder()
//!     .root("/Users/me/Photos")
//!     .checkpoint_path("/tmp/photos.db")
//!     .worker_count(8)
//!     .build()?;
//!
//! let outcome = Engine::builder().config(config).build()?.run()?;
//! for group in outcome.duplicates() {
//!     println!("{:?}", group.paths);
//! }
//! ```

mod config;
mod coordinator;
mod handle;
mod progress;

pub use config::{EngineConfig, EngineConfigBuilder, MetricKind, PrefilterKind};
pub use handle::{CancellationToken, RunHandle};
pub use progress::{Progress, ProgressTracker};

use crate::core::checkpoint::{
    CheckpointStore, InMemoryCheckpointStore, RunPhase, SqliteCheckpointStore,
};
use crate::core::comparator::{DuplicateGroup, Prefilter, SimilarityMetric};
use crate::core::scanner::{ImageSource, WalkDirScanner};
use crate::core::signature::SignatureExtractor;
use crate::error::{CheckpointError, Result};
use crate::events::{null_sender, DiscoverySummary, EventSender};
use serde::Serialize;
use std::sync::{Arc, RwLock};
use std::thread;
use uuid::Uuid;

/// How a run ended
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub run_id: Uuid,
    /// `Reported` when the pair space was exhausted, otherwise `Interrupted`
    pub phase: RunPhase,
    /// Whether this invocation continued an existing checkpoint
    pub resumed: bool,
    pub discovery: DiscoverySummary,
    pub progress: Progress,
    /// Full partition of the signed images; empty when interrupted
    pub groups: Vec<DuplicateGroup>,
    pub duration_ms: u64,
}

impl RunOutcome {
    pub fn is_complete(&self) -> bool {
        self.phase == RunPhase::Reported
    }

    /// Groups with more than one member
    pub fn duplicates(&self) -> impl Iterator<Item = &DuplicateGroup> {
        self.groups.iter().filter(|group| !group.is_singleton())
    }
}

/// Builder for [`Engine`]
///
/// Every component defaults to the bundled implementation selected by the
/// configuration.
#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn CheckpointStore>>,
    source: Option<Arc<dyn ImageSource>>,
    extractor: Option<Arc<dyn SignatureExtractor>>,
    metric: Option<Arc<dyn SimilarityMetric>>,
    prefilter: Option<Arc<dyn Prefilter>>,
    events: Option<EventSender>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Use an already-open checkpoint instead of `checkpoint_path`
    pub fn store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replace directory discovery
    pub fn source(mut self, source: Arc<dyn ImageSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Replace signature extraction
    pub fn extractor(mut self, extractor: Arc<dyn SignatureExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Replace the similarity metric
    pub fn metric(mut self, metric: Arc<dyn SimilarityMetric>) -> Self {
        self.metric = Some(metric);
        self
    }

    /// Replace the pre-filter
    pub fn prefilter(mut self, prefilter: Arc<dyn Prefilter>) -> Self {
        self.prefilter = Some(prefilter);
        self
    }

    /// Publish progress events to `events`
    pub fn events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// Validate the configuration and open the checkpoint
    pub fn build(self) -> Result<Engine> {
        self.config.validate()?;

        let store: Arc<dyn CheckpointStore> = match (self.store, &self.config.checkpoint_path) {
            (Some(store), _) => store,
            (None, Some(path)) => Arc::new(SqliteCheckpointStore::open(path)?),
            (None, None) => Arc::new(InMemoryCheckpointStore::new()),
        };

        let source = self
            .source
            .unwrap_or_else(|| Arc::new(WalkDirScanner::new(self.config.scan_config())));
        let extractor = self
            .extractor
            .unwrap_or_else(|| self.config.build_extractor());
        let metric = self.metric.unwrap_or_else(|| self.config.build_metric());
        let prefilter = self
            .prefilter
            .unwrap_or_else(|| self.config.build_prefilter());

        Ok(Engine {
            config: self.config,
            store,
            source,
            extractor,
            metric,
            prefilter,
            events: self.events.unwrap_or_else(null_sender),
        })
    }
}

/// The checkpointed duplicate detection engine
pub struct Engine {
    config: EngineConfig,
    store: Arc<dyn CheckpointStore>,
    source: Arc<dyn ImageSource>,
    extractor: Arc<dyn SignatureExtractor>,
    metric: Arc<dyn SimilarityMetric>,
    prefilter: Arc<dyn Prefilter>,
    events: EventSender,
}

impl Engine {
    /// Create a new engine builder
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The checkpoint this engine writes to
    pub fn store(&self) -> Arc<dyn CheckpointStore> {
        Arc::clone(&self.store)
    }

    /// Run to completion (or until a fatal error) on the current thread
    pub fn run(&self) -> Result<RunOutcome> {
        self.run_with_cancellation(&CancellationToken::new())
    }

    /// Run on the current thread until finished or `token` is cancelled
    pub fn run_with_cancellation(&self, token: &CancellationToken) -> Result<RunOutcome> {
        let progress = ProgressTracker::new();
        coordinator::Coordinator::new(self, token.clone(), &progress).run()
    }

    /// Run on a background thread
    pub fn start(self) -> RunHandle {
        let token = CancellationToken::new();
        let progress = Arc::new(ProgressTracker::new());
        let groups = Arc::new(RwLock::new(None));

        let thread = {
            let token = token.clone();
            let progress = Arc::clone(&progress);
            let groups = Arc::clone(&groups);
            thread::spawn(move || {
                let outcome = coordinator::Coordinator::new(&self, token, &progress).run()?;
                if outcome.is_complete() {
                    if let Ok(mut slot) = groups.write() {
                        *slot = Some(outcome.groups.clone());
                    }
                }
                Ok(outcome)
            })
        };

        RunHandle {
            token,
            progress,
            groups,
            thread,
        }
    }

    /// Progress recorded in a checkpoint, for inspecting a run offline
    pub fn progress_from_store(store: &dyn CheckpointStore) -> std::result::Result<Progress, CheckpointError> {
        Progress::from_store(store)
    }
}
