//! Engine configuration.

use crate::core::checkpoint::RunSettings;
use crate::core::comparator::{
    AspectRatioPrefilter, DimensionPrefilter, HammingMetric, NoPrefilter, Prefilter,
    SimilarityMetric, ThresholdStrategy, ThumbnailMseMetric,
};
use crate::core::scanner::ScanConfig;
use crate::core::signature::{SignatureExtractor, ThumbnailExtractor};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Which pre-filter settles pairs before the metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrefilterKind {
    /// Compare widths and heights
    #[default]
    Dimensions,
    /// Compare aspect ratios
    AspectRatio,
    /// Score every pair
    None,
}

/// Which similarity metric scores pairs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Pixel error between grayscale thumbnails
    #[default]
    ThumbnailMse,
    /// Hamming distance between difference hashes
    Hamming,
}

/// Configuration for one engine run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Collection root to discover images under
    pub root: PathBuf,
    /// Second collection; when set, only pairs with one image under each
    /// root are compared
    pub compare_root: Option<PathBuf>,
    /// Number of workers in the pool
    pub worker_count: usize,
    /// Scores at or above this are Duplicate
    pub duplicate_threshold: f64,
    /// Scores at or above this (and below duplicate) are Similar
    pub similar_threshold: f64,
    pub prefilter: PrefilterKind,
    /// Relative difference the pre-filter tolerates
    pub prefilter_tolerance: f64,
    pub metric: MetricKind,
    /// Also match images rotated by a quarter turn
    pub rotate: bool,
    /// Side of the square signature thumbnail
    pub signature_size: u32,
    /// Capacity of each job queue
    pub queue_capacity: usize,
    /// Pairs handed to the queue per enumerator pull
    pub batch_size: usize,
    /// SQLite checkpoint file; `None` keeps the checkpoint in memory
    pub checkpoint_path: Option<PathBuf>,
    /// Continue from an existing checkpoint instead of starting over
    pub resume: bool,
    /// Give Failed images another chance on this run
    pub retry_failed: bool,
    /// Include hidden files and directories during discovery
    pub include_hidden: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            compare_root: None,
            worker_count: rayon::current_num_threads().max(1),
            duplicate_threshold: 0.95,
            similar_threshold: 0.90,
            prefilter: PrefilterKind::Dimensions,
            prefilter_tolerance: 0.25,
            metric: MetricKind::ThumbnailMse,
            rotate: false,
            signature_size: 32,
            queue_capacity: 256,
            batch_size: 64,
            checkpoint_path: None,
            resume: true,
            retry_failed: false,
            include_hidden: false,
        }
    }
}

impl EngineConfig {
    /// Create a new config builder
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }

    /// Check every field before any work is dispatched
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::InvalidWorkerCount);
        }

        for (name, value) in [
            ("duplicate_threshold", self.duplicate_threshold),
            ("similar_threshold", self.similar_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidThreshold { name, value });
            }
        }
        if self.similar_threshold > self.duplicate_threshold {
            return Err(ConfigError::ThresholdOrder {
                similar: self.similar_threshold,
                duplicate: self.duplicate_threshold,
            });
        }

        if !self.prefilter_tolerance.is_finite() || self.prefilter_tolerance < 0.0 {
            return Err(ConfigError::InvalidTolerance(self.prefilter_tolerance));
        }
        if !(8..=256).contains(&self.signature_size) {
            return Err(ConfigError::InvalidSignatureSize(self.signature_size));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidCapacity {
                name: "queue_capacity",
            });
        }
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidCapacity { name: "batch_size" });
        }
        if !self.root.is_dir() {
            return Err(ConfigError::RootNotFound {
                path: self.root.clone(),
            });
        }
        if let Some(compare_root) = &self.compare_root {
            if !compare_root.is_dir() {
                return Err(ConfigError::RootNotFound {
                    path: compare_root.clone(),
                });
            }
            if compare_root.starts_with(&self.root) || self.root.starts_with(compare_root) {
                return Err(ConfigError::NestedRoots {
                    root: self.root.clone(),
                    compare_root: compare_root.clone(),
                });
            }
        }

        Ok(())
    }

    /// Build the configured pre-filter
    pub fn build_prefilter(&self) -> Arc<dyn Prefilter> {
        match self.prefilter {
            PrefilterKind::Dimensions => Arc::new(
                DimensionPrefilter::new(self.prefilter_tolerance).allow_rotation(self.rotate),
            ),
            PrefilterKind::AspectRatio => Arc::new(
                AspectRatioPrefilter::new(self.prefilter_tolerance).allow_rotation(self.rotate),
            ),
            PrefilterKind::None => Arc::new(NoPrefilter),
        }
    }

    /// Build the configured similarity metric
    pub fn build_metric(&self) -> Arc<dyn SimilarityMetric> {
        match self.metric {
            MetricKind::ThumbnailMse => Arc::new(ThumbnailMseMetric::new().with_rotation(self.rotate)),
            MetricKind::Hamming => Arc::new(HammingMetric::new()),
        }
    }

    /// Build the default signature extractor
    pub fn build_extractor(&self) -> Arc<dyn SignatureExtractor> {
        Arc::new(ThumbnailExtractor::new(self.signature_size))
    }

    /// Classification thresholds
    pub fn strategy(&self) -> ThresholdStrategy {
        ThresholdStrategy::new(self.duplicate_threshold, self.similar_threshold)
    }

    /// Discovery settings
    pub fn scan_config(&self) -> ScanConfig {
        ScanConfig {
            include_hidden: self.include_hidden,
            ..ScanConfig::default()
        }
    }

    /// The settings persisted with the run state, naming the components
    /// actually in use
    pub fn settings(
        &self,
        prefilter: &dyn Prefilter,
        metric: &dyn SimilarityMetric,
        extractor: &dyn SignatureExtractor,
    ) -> RunSettings {
        RunSettings {
            root: self.root.clone(),
            duplicate_threshold: self.duplicate_threshold,
            similar_threshold: self.similar_threshold,
            prefilter: prefilter.name(),
            metric: metric.name(),
            extractor: extractor.name(),
            rotate: self.rotate,
            compare_root: self.compare_root.clone(),
        }
    }
}

/// Builder for [`EngineConfig`]
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collection root
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.root = root.into();
        self
    }

    /// Compare `root` against this second collection only
    pub fn compare_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.compare_root = Some(root.into());
        self
    }

    pub fn worker_count(mut self, count: usize) -> Self {
        self.config.worker_count = count;
        self
    }

    /// Set both classification thresholds
    pub fn thresholds(mut self, duplicate: f64, similar: f64) -> Self {
        self.config.duplicate_threshold = duplicate;
        self.config.similar_threshold = similar;
        self
    }

    pub fn prefilter(mut self, kind: PrefilterKind) -> Self {
        self.config.prefilter = kind;
        self
    }

    pub fn prefilter_tolerance(mut self, tolerance: f64) -> Self {
        self.config.prefilter_tolerance = tolerance;
        self
    }

    pub fn metric(mut self, kind: MetricKind) -> Self {
        self.config.metric = kind;
        self
    }

    /// Match quarter-turn rotations
    pub fn rotate(mut self, rotate: bool) -> Self {
        self.config.rotate = rotate;
        self
    }

    pub fn signature_size(mut self, side: u32) -> Self {
        self.config.signature_size = side;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    /// Persist the checkpoint to a SQLite file
    pub fn checkpoint_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.checkpoint_path = Some(path.into());
        self
    }

    pub fn resume(mut self, resume: bool) -> Self {
        self.config.resume = resume;
        self
    }

    pub fn retry_failed(mut self, retry: bool) -> Self {
        self.config.retry_failed = retry;
        self
    }

    pub fn include_hidden(mut self, include: bool) -> Self {
        self.config.include_hidden = include;
        self
    }

    /// Validate and return the configuration
    pub fn build(self) -> Result<EngineConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
