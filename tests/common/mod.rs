//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use image::{Rgb, RgbImage};
use resumable_photo_dedup::core::checkpoint::{
    CheckpointStore, Fingerprint, ImageRecord, PairOutcome, RunState, StoreCounts,
    StoredSignature, WriteOutcome,
};
use resumable_photo_dedup::core::comparator::{PairVerdict, SimilarityMetric, ThumbnailMseMetric};
use resumable_photo_dedup::core::engine::CancellationToken;
use resumable_photo_dedup::core::enumerator::PairKey;
use resumable_photo_dedup::core::signature::{Signature, SignatureExtractor, ThumbnailExtractor};
use resumable_photo_dedup::error::{CheckpointError, CompareError, DecodeError};
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Write a `width` x `height` PNG whose content is determined by `pattern`
pub fn write_pattern(path: &Path, width: u32, height: u32, pattern: u32) {
    let image = RgbImage::from_fn(width, height, |x, y| {
        let value = match pattern % 4 {
            0 => (x * 255 / width.max(1)) as u8,
            1 => (y * 255 / height.max(1)) as u8,
            2 => if (x / 8 + y / 8) % 2 == 0 { 255 } else { 0 },
            _ => (((x + y) * 255) / (width + height).max(1)) as u8,
        };
        // Families beyond the first four get a distinct brightness band
        let shift = ((pattern / 4) * 97 % 256) as u8;
        let v = value.wrapping_add(shift);
        Rgb([v, v, v])
    });
    image.save(path).unwrap();
}

/// Write a flat image of a single gray level
pub fn write_flat(path: &Path, width: u32, height: u32, level: u8) {
    let image = RgbImage::from_pixel(width, height, Rgb([level, level, level]));
    image.save(path).unwrap();
}

/// Populate `dir` with `count` 64x64 images in `families` visually distinct
/// families; image `i` belongs to family `i % families`
pub fn write_collection(dir: &Path, count: u32, families: u32) {
    for i in 0..count {
        write_pattern(&dir.join(format!("img_{i:03}.png")), 64, 64, i % families);
    }
}

/// Metric wrapper that counts calls
pub struct CountingMetric {
    inner: ThumbnailMseMetric,
    calls: AtomicUsize,
}

impl CountingMetric {
    pub fn new() -> Self {
        Self {
            inner: ThumbnailMseMetric::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SimilarityMetric for CountingMetric {
    fn compare(&self, a: &Signature, b: &Signature) -> Result<f64, CompareError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.compare(a, b)
    }

    fn name(&self) -> String {
        self.inner.name()
    }
}

/// Metric wrapper that cancels a run after a number of calls
pub struct InterruptingMetric {
    inner: ThumbnailMseMetric,
    calls: AtomicUsize,
    limit: usize,
    token: CancellationToken,
}

impl InterruptingMetric {
    pub fn new(limit: usize, token: CancellationToken) -> Self {
        Self {
            inner: ThumbnailMseMetric::new(),
            calls: AtomicUsize::new(0),
            limit,
            token,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SimilarityMetric for InterruptingMetric {
    fn compare(&self, a: &Signature, b: &Signature) -> Result<f64, CompareError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) + 1 >= self.limit {
            self.token.cancel();
        }
        self.inner.compare(a, b)
    }

    fn name(&self) -> String {
        self.inner.name()
    }
}

/// Extractor wrapper that counts calls
pub struct CountingExtractor {
    inner: ThumbnailExtractor,
    calls: AtomicUsize,
}

impl CountingExtractor {
    pub fn new() -> Self {
        Self {
            inner: ThumbnailExtractor::default(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SignatureExtractor for CountingExtractor {
    fn extract_signature(&self, path: &Path) -> Result<Signature, DecodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.extract_signature(path)
    }

    fn name(&self) -> String {
        self.inner.name()
    }
}

/// Store wrapper whose pair writes start failing after `allowed` successes,
/// like a disk filling up mid-run
pub struct FailingStore {
    inner: Arc<dyn CheckpointStore>,
    allowed: usize,
    pair_writes: AtomicUsize,
}

impl FailingStore {
    pub fn new(inner: Arc<dyn CheckpointStore>, allowed: usize) -> Self {
        Self {
            inner,
            allowed,
            pair_writes: AtomicUsize::new(0),
        }
    }
}

impl CheckpointStore for FailingStore {
    fn load_run_state(&self) -> Result<Option<RunState>, CheckpointError> {
        self.inner.load_run_state()
    }

    fn save_run_state(&self, state: &RunState) -> Result<(), CheckpointError> {
        self.inner.save_run_state(state)
    }

    fn images(&self) -> Result<Vec<ImageRecord>, CheckpointError> {
        self.inner.images()
    }

    fn register_image(&self, record: &ImageRecord) -> Result<(), CheckpointError> {
        self.inner.register_image(record)
    }

    fn load_signature(
        &self,
        index: u32,
        fingerprint: &Fingerprint,
    ) -> Result<StoredSignature, CheckpointError> {
        self.inner.load_signature(index, fingerprint)
    }

    fn record_signature(
        &self,
        index: u32,
        fingerprint: &Fingerprint,
        signature: &Signature,
    ) -> resumable_photo_dedup::Result<WriteOutcome> {
        self.inner.record_signature(index, fingerprint, signature)
    }

    fn record_failure(&self, index: u32, reason: &str) -> resumable_photo_dedup::Result<WriteOutcome> {
        self.inner.record_failure(index, reason)
    }

    fn mark_failed(&self, index: u32, reason: &str) -> Result<(), CheckpointError> {
        self.inner.mark_failed(index, reason)
    }

    fn invalidate_image(&self, index: u32, fingerprint: &Fingerprint) -> Result<usize, CheckpointError> {
        self.inner.invalidate_image(index, fingerprint)
    }

    fn clear_failed(&self) -> Result<usize, CheckpointError> {
        self.inner.clear_failed()
    }

    fn record_pair(&self, key: PairKey, outcome: &PairOutcome) -> resumable_photo_dedup::Result<WriteOutcome> {
        if self.pair_writes.fetch_add(1, Ordering::SeqCst) >= self.allowed {
            return Err(CheckpointError::QueryFailed("database or disk is full".to_string()).into());
        }
        self.inner.record_pair(key, outcome)
    }

    fn pair_outcome(&self, key: PairKey) -> Result<Option<PairOutcome>, CheckpointError> {
        self.inner.pair_outcome(key)
    }

    fn resolved_pairs(&self) -> Result<HashSet<PairKey>, CheckpointError> {
        self.inner.resolved_pairs()
    }

    fn edges(&self) -> Result<Vec<(PairKey, PairVerdict)>, CheckpointError> {
        self.inner.edges()
    }

    fn counts(&self) -> Result<StoreCounts, CheckpointError> {
        self.inner.counts()
    }

    fn clear(&self) -> Result<(), CheckpointError> {
        self.inner.clear()
    }
}
