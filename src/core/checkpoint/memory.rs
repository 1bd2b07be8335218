//! In-memory checkpoint backend for testing.

use super::{
    failure_write, pair_write, signature_write, CheckpointStore, Fingerprint, ImageRecord,
    ImageState, PairOutcome, RunState, StoreCounts, StoredSignature, WriteOutcome,
};
use crate::core::comparator::{PairVerdict, Verdict};
use crate::core::enumerator::PairKey;
use crate::core::signature::Signature;
use crate::error::{self, CheckpointError};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

struct StoredImage {
    record: ImageRecord,
    signature: Option<Signature>,
}

#[derive(Default)]
struct Contents {
    run_state: Option<RunState>,
    images: BTreeMap<u32, StoredImage>,
    pairs: BTreeMap<PairKey, PairOutcome>,
}

/// In-memory checkpoint
///
/// Same semantics as the SQLite backend, minus durability. Useful for tests
/// and for one-shot runs that do not need to resume.
pub struct InMemoryCheckpointStore {
    contents: RwLock<Contents>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self {
            contents: RwLock::new(Contents::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Contents>, CheckpointError> {
        self.contents.read().map_err(|_| CheckpointError::Poisoned {
            path: PathBuf::from("memory"),
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Contents>, CheckpointError> {
        self.contents.write().map_err(|_| CheckpointError::Poisoned {
            path: PathBuf::from("memory"),
        })
    }
}

impl Default for InMemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn load_run_state(&self) -> Result<Option<RunState>, CheckpointError> {
        Ok(self.read()?.run_state.clone())
    }

    fn save_run_state(&self, state: &RunState) -> Result<(), CheckpointError> {
        self.write()?.run_state = Some(state.clone());
        Ok(())
    }

    fn images(&self) -> Result<Vec<ImageRecord>, CheckpointError> {
        Ok(self
            .read()?
            .images
            .values()
            .map(|image| image.record.clone())
            .collect())
    }

    fn register_image(&self, record: &ImageRecord) -> Result<(), CheckpointError> {
        let mut contents = self.write()?;

        let duplicate = contents.images.contains_key(&record.index)
            || contents
                .images
                .values()
                .any(|image| image.record.path == record.path);
        if duplicate {
            return Err(CheckpointError::QueryFailed(format!(
                "image {} ({}) is already registered",
                record.index,
                record.path.display()
            )));
        }

        contents.images.insert(
            record.index,
            StoredImage {
                record: record.clone(),
                signature: None,
            },
        );
        Ok(())
    }

    fn load_signature(
        &self,
        index: u32,
        fingerprint: &Fingerprint,
    ) -> Result<StoredSignature, CheckpointError> {
        let contents = self.read()?;
        let image = contents
            .images
            .get(&index)
            .ok_or(CheckpointError::UnknownImage { index })?;

        if !image.record.state.is_signed() || image.record.fingerprint != *fingerprint {
            return Ok(StoredSignature::Absent);
        }

        Ok(match &image.signature {
            Some(signature) => StoredSignature::Present(signature.clone()),
            None => StoredSignature::Unreadable {
                reason: "signed image has no signature".to_string(),
            },
        })
    }

    fn record_signature(
        &self,
        index: u32,
        fingerprint: &Fingerprint,
        signature: &Signature,
    ) -> error::Result<WriteOutcome> {
        let mut contents = self.write()?;
        let image = contents
            .images
            .get_mut(&index)
            .ok_or(CheckpointError::UnknownImage { index })?;

        let outcome = signature_write(
            index,
            &image.record.path,
            &image.record.state,
            &image.record.fingerprint,
            image.signature.as_ref().map(Signature::digest),
            fingerprint,
            signature,
        )?;

        if outcome.is_written() {
            image.record.state = ImageState::Signed;
            image.signature = Some(signature.clone());
        }
        Ok(outcome)
    }

    fn record_failure(&self, index: u32, reason: &str) -> error::Result<WriteOutcome> {
        let mut contents = self.write()?;
        let image = contents
            .images
            .get_mut(&index)
            .ok_or(CheckpointError::UnknownImage { index })?;

        let outcome = failure_write(index, &image.record.path, &image.record.state)?;

        if outcome.is_written() {
            image.record.state = ImageState::Failed {
                reason: reason.to_string(),
            };
        }
        Ok(outcome)
    }

    fn mark_failed(&self, index: u32, reason: &str) -> Result<(), CheckpointError> {
        let mut contents = self.write()?;
        let image = contents
            .images
            .get_mut(&index)
            .ok_or(CheckpointError::UnknownImage { index })?;

        image.record.state = ImageState::Failed {
            reason: reason.to_string(),
        };
        image.signature = None;
        Ok(())
    }

    fn invalidate_image(
        &self,
        index: u32,
        fingerprint: &Fingerprint,
    ) -> Result<usize, CheckpointError> {
        let mut contents = self.write()?;
        let image = contents
            .images
            .get_mut(&index)
            .ok_or(CheckpointError::UnknownImage { index })?;

        image.record.fingerprint = *fingerprint;
        image.record.state = ImageState::Discovered;
        image.signature = None;

        let before = contents.pairs.len();
        contents.pairs.retain(|key, _| !key.contains(index));
        Ok(before - contents.pairs.len())
    }

    fn clear_failed(&self) -> Result<usize, CheckpointError> {
        let mut contents = self.write()?;

        let mut reset = HashSet::new();
        for image in contents.images.values_mut() {
            if image.record.state.is_failed() {
                image.record.state = ImageState::Discovered;
                reset.insert(image.record.index);
            }
        }
        contents
            .pairs
            .retain(|key, _| !reset.contains(&key.first()) && !reset.contains(&key.second()));
        Ok(reset.len())
    }

    fn record_pair(&self, key: PairKey, outcome: &PairOutcome) -> error::Result<WriteOutcome> {
        let mut contents = self.write()?;

        let write = pair_write(key, contents.pairs.get(&key), outcome)?;
        if write.is_written() {
            contents.pairs.insert(key, outcome.clone());
        }
        Ok(write)
    }

    fn pair_outcome(&self, key: PairKey) -> Result<Option<PairOutcome>, CheckpointError> {
        Ok(self.read()?.pairs.get(&key).cloned())
    }

    fn resolved_pairs(&self) -> Result<HashSet<PairKey>, CheckpointError> {
        Ok(self.read()?.pairs.keys().copied().collect())
    }

    fn edges(&self) -> Result<Vec<(PairKey, PairVerdict)>, CheckpointError> {
        Ok(self
            .read()?
            .pairs
            .iter()
            .filter_map(|(key, outcome)| match outcome {
                PairOutcome::Resolved(verdict) if verdict.verdict.is_match() => {
                    Some((*key, *verdict))
                }
                _ => None,
            })
            .collect())
    }

    fn counts(&self) -> Result<StoreCounts, CheckpointError> {
        let contents = self.read()?;
        let mut counts = StoreCounts {
            images: contents.images.len(),
            ..Default::default()
        };

        for image in contents.images.values() {
            match image.record.state {
                ImageState::Discovered => counts.discovered += 1,
                ImageState::Signed => counts.signed += 1,
                ImageState::Failed { .. } => counts.failed += 1,
            }
        }

        for outcome in contents.pairs.values() {
            match outcome {
                PairOutcome::Resolved(verdict) => {
                    counts.pairs_resolved += 1;
                    match verdict.verdict {
                        Verdict::Duplicate => counts.duplicate_pairs += 1,
                        Verdict::Similar => counts.similar_pairs += 1,
                        Verdict::Distinct => {}
                    }
                }
                PairOutcome::Error { .. } => counts.pairs_errored += 1,
            }
        }

        Ok(counts)
    }

    fn clear(&self) -> Result<(), CheckpointError> {
        *self.write()? = Contents::default();
        Ok(())
    }
}
