//! Live progress counters.

use crate::core::checkpoint::{CheckpointStore, ImageRecord, RunPhase};
use crate::core::enumerator::{PairEnumerator, PairKey};
use crate::error::CheckpointError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};

/// Snapshot of a run's progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub images_total: usize,
    pub images_signed: usize,
    pub images_failed: usize,
    pub pairs_total: u64,
    /// Pairs with a terminal outcome, errors included
    pub pairs_resolved: u64,
    pub pairs_errored: u64,
    pub phase: RunPhase,
}

impl Progress {
    /// Fraction of the pair space resolved, in [0, 1]
    pub fn fraction(&self) -> f64 {
        if self.pairs_total == 0 {
            return if self.phase.is_finished() { 1.0 } else { 0.0 };
        }
        (self.pairs_resolved as f64 / self.pairs_total as f64).min(1.0)
    }

    /// Progress as recorded in a checkpoint, without running anything
    pub fn from_store(store: &dyn CheckpointStore) -> Result<Self, CheckpointError> {
        let run_state = store.load_run_state()?;
        let phase = run_state
            .as_ref()
            .map(|state| state.phase)
            .unwrap_or(RunPhase::Initializing);
        let compare_root = run_state
            .as_ref()
            .and_then(|state| state.settings.compare_root.as_deref());
        let images = store.images()?;
        let counts = store.counts()?;

        let pairs = pair_space(
            images.iter().filter(|record| record.state.is_signed()),
            store.resolved_pairs()?,
            compare_root,
        );

        Ok(Self {
            images_total: counts.images,
            images_signed: counts.signed,
            images_failed: counts.failed,
            pairs_total: pairs.total(),
            pairs_resolved: pairs.already_resolved(),
            pairs_errored: counts.pairs_errored,
            phase,
        })
    }
}

/// Cursor over the pairs a run compares among `signed`: every pair, or with a
/// second collection only the pairs straddling both
pub(crate) fn pair_space<'a>(
    signed: impl IntoIterator<Item = &'a ImageRecord>,
    resolved: HashSet<PairKey>,
    compare_root: Option<&Path>,
) -> PairEnumerator {
    let signed: Vec<&ImageRecord> = signed.into_iter().collect();
    let enumerator = PairEnumerator::new(signed.iter().map(|record| record.index), resolved);
    match compare_root {
        None => enumerator,
        Some(compare_root) => enumerator.across(
            signed
                .iter()
                .filter(|record| record.path.starts_with(compare_root))
                .map(|record| record.index),
        ),
    }
}

/// Shared counters updated by the coordinator and read by handles
#[derive(Debug, Default)]
pub struct ProgressTracker {
    images_total: AtomicUsize,
    images_signed: AtomicUsize,
    images_failed: AtomicUsize,
    pairs_total: AtomicU64,
    pairs_resolved: AtomicU64,
    pairs_errored: AtomicU64,
    phase: AtomicU8,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Progress {
        Progress {
            images_total: self.images_total.load(Ordering::SeqCst),
            images_signed: self.images_signed.load(Ordering::SeqCst),
            images_failed: self.images_failed.load(Ordering::SeqCst),
            pairs_total: self.pairs_total.load(Ordering::SeqCst),
            pairs_resolved: self.pairs_resolved.load(Ordering::SeqCst),
            pairs_errored: self.pairs_errored.load(Ordering::SeqCst),
            phase: RunPhase::from_u8(self.phase.load(Ordering::SeqCst)),
        }
    }

    pub(crate) fn set_phase(&self, phase: RunPhase) {
        self.phase.store(phase.as_u8(), Ordering::SeqCst);
    }

    pub(crate) fn set_images(&self, total: usize, signed: usize, failed: usize) {
        self.images_total.store(total, Ordering::SeqCst);
        self.images_signed.store(signed, Ordering::SeqCst);
        self.images_failed.store(failed, Ordering::SeqCst);
    }

    pub(crate) fn image_signed(&self) {
        self.images_signed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn image_failed(&self) {
        self.images_failed.fetch_add(1, Ordering::SeqCst);
    }

    /// A signed image lost its signature during comparison
    pub(crate) fn image_lost(&self) {
        self.images_signed.fetch_sub(1, Ordering::SeqCst);
        self.images_failed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn set_pairs(&self, total: u64, resolved: u64, errored: u64) {
        self.pairs_total.store(total, Ordering::SeqCst);
        self.pairs_resolved.store(resolved, Ordering::SeqCst);
        self.pairs_errored.store(errored, Ordering::SeqCst);
    }

    pub(crate) fn set_pairs_total(&self, total: u64) {
        self.pairs_total.store(total, Ordering::SeqCst);
    }

    pub(crate) fn pair_resolved(&self) -> u64 {
        self.pairs_resolved.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn pair_errored(&self) -> u64 {
        self.pairs_errored.fetch_add(1, Ordering::SeqCst);
        self.pair_resolved()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::checkpoint::{
        Fingerprint, ImageRecord, ImageState, InMemoryCheckpointStore, PairOutcome,
    };
    use crate::core::comparator::{PairVerdict, Verdict};
    use crate::core::enumerator::PairKey;
    use crate::core::signature::Signature;
    use std::path::PathBuf;

    #[test]
    fn tracker_counts_resolutions() {
        let tracker = ProgressTracker::new();
        tracker.set_pairs(10, 4, 0);
        tracker.pair_resolved();
        tracker.pair_errored();
        tracker.set_phase(RunPhase::Running);

        let progress = tracker.snapshot();
        assert_eq!(progress.pairs_resolved, 6);
        assert_eq!(progress.pairs_errored, 1);
        assert_eq!(progress.phase, RunPhase::Running);
        assert!((progress.fraction() - 0.6).abs() < 1e-9);
    }

    #[test]
    fn progress_from_store_counts_member_pairs() {
        let store = InMemoryCheckpointStore::new();
        let fp = Fingerprint {
            size: 1,
            modified_secs: 1,
        };
        for i in 0..3u32 {
            store
                .register_image(&ImageRecord {
                    index: i,
                    path: PathBuf::from(format!("/p/{i}.png")),
                    fingerprint: fp,
                    state: ImageState::Discovered,
                })
                .unwrap();
        }
        let signature = Signature::from_parts(2, 2, 1, vec![9], vec![]).unwrap();
        for i in 0..3u32 {
            store.record_signature(i, &fp, &signature).unwrap();
        }
        store
            .record_pair(
                PairKey::new(0, 2).unwrap(),
                &PairOutcome::Resolved(PairVerdict::scored(1.0, Verdict::Duplicate)),
            )
            .unwrap();

        let progress = Progress::from_store(&store).unwrap();

        assert_eq!(progress.images_signed, 3);
        assert_eq!(progress.pairs_total, 3);
        assert_eq!(progress.pairs_resolved, 1);
        assert_eq!(progress.phase, RunPhase::Initializing);
    }
}
