//! Signature cache backed by the checkpoint store.

use super::{Signature, SignatureExtractor};
use crate::core::checkpoint::{CheckpointStore, Fingerprint, ImageRecord, StoredSignature};
use crate::error::{panic_message, DecodeError, Result};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Result of asking the cache for a signature
#[derive(Debug, Clone)]
pub enum SignatureOutcome {
    /// Already computed, in this run or a previous one
    Cached(Arc<Signature>),
    /// Computed now and persisted
    Computed(Arc<Signature>),
    /// Extraction failed; the image is now Failed in the store
    Failed { reason: String },
}

/// Result of looking up a signature without computing it
#[derive(Debug, Clone)]
pub enum Lookup {
    Found(Arc<Signature>),
    /// No usable signature for the image's current fingerprint
    Unavailable { reason: String },
}

const NO_SIGNATURE: &str = "no signature stored for the current file";

/// Maps image indices to signatures, computing and persisting on a miss.
///
/// The in-memory map is a disposable front for the checkpoint store; a
/// signature only enters it after the store has acknowledged it.
pub struct SignatureCache {
    store: Arc<dyn CheckpointStore>,
    extractor: Arc<dyn SignatureExtractor>,
    signatures: RwLock<HashMap<u32, Arc<Signature>>>,
}

impl SignatureCache {
    pub fn new(store: Arc<dyn CheckpointStore>, extractor: Arc<dyn SignatureExtractor>) -> Self {
        Self {
            store,
            extractor,
            signatures: RwLock::new(HashMap::new()),
        }
    }

    /// Return the signature for `record`, extracting it on a miss.
    ///
    /// A computed signature is durable in the store before this returns. A
    /// decode failure (or an extractor panic) marks the image Failed.
    /// Errors are reserved for store failures and divergences.
    pub fn get_or_compute(&self, record: &ImageRecord) -> Result<SignatureOutcome> {
        let index = record.index;

        if let Some(signature) = self.remembered(index) {
            return Ok(SignatureOutcome::Cached(signature));
        }

        match self.store.load_signature(index, &record.fingerprint)? {
            StoredSignature::Present(signature) => {
                let signature = self.remember(index, signature);
                return Ok(SignatureOutcome::Cached(signature));
            }
            StoredSignature::Unreadable { reason } => {
                warn!(index, path = %record.path.display(), %reason, "recomputing unreadable signature");
                self.store.invalidate_image(index, &record.fingerprint)?;
            }
            StoredSignature::Absent => {}
        }

        match self.extract(&record.path) {
            Ok(signature) => {
                self.store
                    .record_signature(index, &record.fingerprint, &signature)?;
                debug!(index, path = %record.path.display(), "signature stored");
                Ok(SignatureOutcome::Computed(self.remember(index, signature)))
            }
            Err(error) => {
                let reason = error.to_string();
                self.store.record_failure(index, &reason)?;
                warn!(index, %reason, "image excluded");
                Ok(SignatureOutcome::Failed { reason })
            }
        }
    }

    /// Signature for an already-signed image, never extracting.
    ///
    /// The store is left untouched when no usable signature exists; the
    /// caller decides what happens to the image.
    pub fn get(&self, index: u32, fingerprint: &Fingerprint) -> Result<Lookup> {
        if let Some(signature) = self.remembered(index) {
            return Ok(Lookup::Found(signature));
        }

        Ok(match self.store.load_signature(index, fingerprint)? {
            StoredSignature::Present(signature) => Lookup::Found(self.remember(index, signature)),
            StoredSignature::Absent => Lookup::Unavailable {
                reason: NO_SIGNATURE.to_string(),
            },
            StoredSignature::Unreadable { reason } => Lookup::Unavailable {
                reason: format!("stored signature unreadable: {reason}"),
            },
        })
    }

    /// Number of signatures held in memory
    pub fn len(&self) -> usize {
        self.signatures.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remembered(&self, index: u32) -> Option<Arc<Signature>> {
        self.signatures
            .read()
            .ok()
            .and_then(|signatures| signatures.get(&index).cloned())
    }

    fn remember(&self, index: u32, signature: Signature) -> Arc<Signature> {
        let signature = Arc::new(signature);
        if let Ok(mut signatures) = self.signatures.write() {
            signatures.insert(index, Arc::clone(&signature));
        }
        signature
    }

    fn extract(&self, path: &Path) -> std::result::Result<Signature, DecodeError> {
        panic::catch_unwind(AssertUnwindSafe(|| self.extractor.extract_signature(path)))
            .unwrap_or_else(|payload| {
                Err(DecodeError::Panicked {
                    path: path.to_path_buf(),
                    message: panic_message(payload.as_ref()),
                })
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::checkpoint::{ImageState, InMemoryCheckpointStore};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Extractor that derives a signature from the file name and counts calls
    struct NameExtractor {
        calls: AtomicUsize,
    }

    impl NameExtractor {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl SignatureExtractor for NameExtractor {
        fn extract_signature(&self, path: &Path) -> std::result::Result<Signature, DecodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");

            if name.starts_with("broken") {
                return Err(DecodeError::EmptyImage {
                    path: path.to_path_buf(),
                });
            }
            if name.starts_with("panic") {
                panic!("decoder exploded");
            }

            let fill = name.len() as u8;
            Ok(Signature::from_parts(10, 10, 2, vec![fill; 4], vec![0; 8]).unwrap())
        }

        fn name(&self) -> String {
            "name".to_string()
        }
    }

    fn setup(names: &[&str]) -> (Arc<InMemoryCheckpointStore>, Arc<NameExtractor>, Vec<ImageRecord>) {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let records: Vec<_> = names
            .iter()
            .enumerate()
            .map(|(i, name)| ImageRecord {
                index: i as u32,
                path: PathBuf::from(format!("/photos/{name}.png")),
                fingerprint: Fingerprint {
                    size: 10,
                    modified_secs: 10,
                },
                state: ImageState::Discovered,
            })
            .collect();
        for record in &records {
            store.register_image(record).unwrap();
        }
        (store, Arc::new(NameExtractor::new()), records)
    }

    #[test]
    fn miss_computes_and_persists() {
        let (store, extractor, records) = setup(&["a"]);
        let cache = SignatureCache::new(store.clone(), extractor.clone());

        let outcome = cache.get_or_compute(&records[0]).unwrap();

        assert!(matches!(outcome, SignatureOutcome::Computed(_)));
        assert_eq!(store.images().unwrap()[0].state, ImageState::Signed);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn hit_never_recomputes() {
        let (store, extractor, records) = setup(&["a"]);
        let cache = SignatureCache::new(store.clone(), extractor.clone());
        cache.get_or_compute(&records[0]).unwrap();

        assert!(matches!(
            cache.get_or_compute(&records[0]).unwrap(),
            SignatureOutcome::Cached(_)
        ));

        // A fresh cache over the same store simulates a restart
        let restarted = SignatureCache::new(store, extractor.clone());
        assert!(matches!(
            restarted.get_or_compute(&records[0]).unwrap(),
            SignatureOutcome::Cached(_)
        ));
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn decode_failure_marks_image_failed() {
        let (store, extractor, records) = setup(&["broken"]);
        let cache = SignatureCache::new(store.clone(), extractor);

        let outcome = cache.get_or_compute(&records[0]).unwrap();

        assert!(matches!(outcome, SignatureOutcome::Failed { .. }));
        assert!(store.images().unwrap()[0].state.is_failed());
        assert!(cache.is_empty());
    }

    #[test]
    fn extractor_panic_is_a_decode_failure() {
        let (store, extractor, records) = setup(&["panic"]);
        let cache = SignatureCache::new(store.clone(), extractor);

        let outcome = cache.get_or_compute(&records[0]).unwrap();

        match outcome {
            SignatureOutcome::Failed { reason } => assert!(reason.contains("decoder exploded")),
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(store.images().unwrap()[0].state.is_failed());
    }

    #[test]
    fn get_falls_back_to_the_store() {
        let (store, extractor, records) = setup(&["a", "bb"]);
        let warm = SignatureCache::new(store.clone(), extractor.clone());
        warm.get_or_compute(&records[1]).unwrap();

        let cold = SignatureCache::new(store.clone(), extractor);
        match cold.get(1, &records[1].fingerprint).unwrap() {
            Lookup::Found(signature) => assert_eq!(signature.thumbnail(), &[2, 2, 2, 2]),
            other => panic!("expected a signature, got {other:?}"),
        }

        assert!(matches!(
            cold.get(0, &records[0].fingerprint).unwrap(),
            Lookup::Unavailable { .. }
        ));
        // A lookup never changes the image's state
        assert_eq!(store.images().unwrap()[0].state, ImageState::Discovered);
    }
}
