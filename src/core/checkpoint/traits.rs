//! Checkpoint backend trait definition.

use super::{
    Fingerprint, ImageRecord, PairOutcome, RunState, StoreCounts, StoredSignature, WriteOutcome,
};
use crate::core::comparator::PairVerdict;
use crate::core::enumerator::PairKey;
use crate::core::signature::Signature;
use crate::error::{self, CheckpointError};
use std::collections::HashSet;

/// Durable store of run, image and pair state.
///
/// Every write is flushed before it returns. Writes are keyed by image index
/// or [`PairKey`], so concurrent writers never touch the same key under
/// correct enumeration.
pub trait CheckpointStore: Send + Sync {
    /// Load the persisted run state, if any
    fn load_run_state(&self) -> Result<Option<RunState>, CheckpointError>;

    /// Persist the run state
    fn save_run_state(&self, state: &RunState) -> Result<(), CheckpointError>;

    /// All image records, ordered by index
    fn images(&self) -> Result<Vec<ImageRecord>, CheckpointError>;

    /// Add a newly discovered image.
    ///
    /// The index and path must not already be registered.
    fn register_image(&self, record: &ImageRecord) -> Result<(), CheckpointError>;

    /// Stored signature for `index`, if it was signed under `fingerprint`
    fn load_signature(
        &self,
        index: u32,
        fingerprint: &Fingerprint,
    ) -> Result<StoredSignature, CheckpointError>;

    /// Mark an image Signed and store its signature.
    ///
    /// Re-recording an identical signature is a no-op; a different one is a
    /// divergence.
    fn record_signature(
        &self,
        index: u32,
        fingerprint: &Fingerprint,
        signature: &Signature,
    ) -> error::Result<WriteOutcome>;

    /// Mark a Discovered image Failed after a decode failure.
    ///
    /// Failing an already-failed image is a no-op; failing a Signed image is a
    /// divergence.
    fn record_failure(&self, index: u32, reason: &str) -> error::Result<WriteOutcome>;

    /// Force an image into the Failed state, dropping any stored signature.
    ///
    /// Used for files that vanished and for signatures that no longer decode.
    fn mark_failed(&self, index: u32, reason: &str) -> Result<(), CheckpointError>;

    /// Reset an image to Discovered under a new fingerprint and delete every
    /// pair that references it.
    ///
    /// Returns the number of pairs deleted.
    fn invalidate_image(&self, index: u32, fingerprint: &Fingerprint)
        -> Result<usize, CheckpointError>;

    /// Return every Failed image to Discovered so it is retried, deleting
    /// every pair that references one.
    ///
    /// Returns the number of images reset.
    fn clear_failed(&self) -> Result<usize, CheckpointError>;

    /// Store the terminal outcome of a pair.
    ///
    /// Re-recording a matching outcome is a no-op; a different one is a
    /// divergence.
    fn record_pair(&self, key: PairKey, outcome: &PairOutcome) -> error::Result<WriteOutcome>;

    /// Stored outcome of one pair
    fn pair_outcome(&self, key: PairKey) -> Result<Option<PairOutcome>, CheckpointError>;

    /// Keys of every pair with a terminal outcome (verdict or error)
    fn resolved_pairs(&self) -> Result<HashSet<PairKey>, CheckpointError>;

    /// Duplicate and Similar verdicts, ordered by key
    fn edges(&self) -> Result<Vec<(PairKey, PairVerdict)>, CheckpointError>;

    /// Aggregate counts
    fn counts(&self) -> Result<StoreCounts, CheckpointError>;

    /// Delete everything
    fn clear(&self) -> Result<(), CheckpointError>;
}
