//! # Checkpoint Module
//!
//! Durable record of per-image and per-pair progress.
//!
//! ## What Survives a Restart
//! - The run state (phase + the settings that shaped the verdicts)
//! - Every image record with its fingerprint and lifecycle state
//! - Every signature, stored beside its image record
//! - Every pair outcome (verdict or error)
//!
//! Everything else (queues, the in-memory signature map, the enumerator
//! cursor) is rebuilt from these on resume.
//!
//! ## Backends
//! - `SqliteCheckpointStore` - Persistent storage using SQLite (WAL, FULL sync)
//! - `InMemoryCheckpointStore` - For testing
//!
//! ## Idempotence
//! Writing a terminal value that is already stored is a no-op and returns
//! [`WriteOutcome::Unchanged`]. Writing a *different* terminal value is a
//! [`DivergenceError`].

mod memory;
mod sqlite;
mod traits;

pub use memory::InMemoryCheckpointStore;
pub use sqlite::SqliteCheckpointStore;
pub use traits::CheckpointStore;

use crate::core::comparator::PairVerdict;
use crate::core::enumerator::PairKey;
use crate::core::scanner::DiscoveredImage;
use crate::core::signature::Signature;
use crate::error::{CheckpointError, ConfigError, DivergenceError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Change-detection fingerprint of an image file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    /// File size in bytes
    pub size: u64,
    /// Modification time, whole seconds since the Unix epoch
    pub modified_secs: i64,
}

impl Fingerprint {
    /// Fingerprint from file metadata.
    ///
    /// Second precision only, matching what the SQLite backend stores.
    pub fn of(size: u64, modified: SystemTime) -> Self {
        let modified_secs = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        Self {
            size,
            modified_secs,
        }
    }
}

/// Lifecycle of an image within a run lineage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ImageState {
    /// Known, signature not yet computed
    Discovered,
    /// Signature computed and stored
    Signed,
    /// Terminal: excluded from pairing
    Failed { reason: String },
}

impl ImageState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageState::Discovered => "discovered",
            ImageState::Signed => "signed",
            ImageState::Failed { .. } => "failed",
        }
    }

    pub fn is_signed(&self) -> bool {
        matches!(self, ImageState::Signed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ImageState::Failed { .. })
    }
}

/// One image as known to the checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Stable index, assigned once at first discovery
    pub index: u32,
    pub path: PathBuf,
    pub fingerprint: Fingerprint,
    pub state: ImageState,
}

impl ImageRecord {
    /// Fresh record for a newly discovered image
    pub fn discovered(index: u32, image: &DiscoveredImage) -> Self {
        Self {
            index,
            path: image.path.clone(),
            fingerprint: Fingerprint::of(image.size, image.modified),
            state: ImageState::Discovered,
        }
    }
}

/// Terminal state of a pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PairOutcome {
    /// The pair was classified (possibly by the pre-filter)
    Resolved(PairVerdict),
    /// The metric failed; the pair is excluded from grouping
    Error { message: String },
}

impl PairOutcome {
    pub fn verdict(&self) -> Option<&PairVerdict> {
        match self {
            PairOutcome::Resolved(verdict) => Some(verdict),
            PairOutcome::Error { .. } => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, PairOutcome::Error { .. })
    }

    /// Whether rewriting `self` with `other` is a no-op.
    ///
    /// Two errors match regardless of message; the message is diagnostic.
    pub fn matches(&self, other: &PairOutcome) -> bool {
        match (self, other) {
            (PairOutcome::Resolved(a), PairOutcome::Resolved(b)) => a == b,
            (PairOutcome::Error { .. }, PairOutcome::Error { .. }) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PairOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PairOutcome::Resolved(verdict) => write!(f, "{verdict}"),
            PairOutcome::Error { message } => write!(f, "error: {message}"),
        }
    }
}

/// Whether a write changed the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// An identical terminal value was already stored
    Unchanged,
}

impl WriteOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, WriteOutcome::Written)
    }
}

/// Result of looking up a stored signature
#[derive(Debug, Clone, PartialEq)]
pub enum StoredSignature {
    Present(Signature),
    /// Not signed, or signed under a different fingerprint
    Absent,
    /// A row exists but cannot be turned back into a signature
    Unreadable { reason: String },
}

/// Aggregate counts over the store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCounts {
    pub images: usize,
    pub discovered: usize,
    pub signed: usize,
    pub failed: usize,
    /// Pairs with a verdict
    pub pairs_resolved: u64,
    /// Pairs whose comparison failed
    pub pairs_errored: u64,
    pub duplicate_pairs: u64,
    pub similar_pairs: u64,
}

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Initializing,
    Running,
    Interrupted,
    Completed,
    Reported,
}

impl RunPhase {
    pub fn as_u8(self) -> u8 {
        match self {
            RunPhase::Initializing => 0,
            RunPhase::Running => 1,
            RunPhase::Interrupted => 2,
            RunPhase::Completed => 3,
            RunPhase::Reported => 4,
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => RunPhase::Initializing,
            1 => RunPhase::Running,
            2 => RunPhase::Interrupted,
            3 => RunPhase::Completed,
            _ => RunPhase::Reported,
        }
    }

    /// Whether the pair space was exhausted in this phase
    pub fn is_finished(self) -> bool {
        matches!(self, RunPhase::Completed | RunPhase::Reported)
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Initializing => "initializing",
            RunPhase::Running => "running",
            RunPhase::Interrupted => "interrupted",
            RunPhase::Completed => "completed",
            RunPhase::Reported => "reported",
        };
        f.write_str(name)
    }
}

/// The settings that determine verdicts.
///
/// Persisted with the run state; a resumed run must present identical
/// settings or the stored verdicts would no longer be reproducible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSettings {
    pub root: PathBuf,
    pub duplicate_threshold: f64,
    pub similar_threshold: f64,
    pub prefilter: String,
    pub metric: String,
    pub extractor: String,
    /// Quarter-turn matching, whichever component applies it
    #[serde(default)]
    pub rotate: bool,
    /// Second collection, paired only against `root`
    #[serde(default)]
    pub compare_root: Option<PathBuf>,
}

impl RunSettings {
    /// Check that `requested` would reproduce the verdicts stored under `self`
    pub fn check_compatible(&self, requested: &RunSettings) -> std::result::Result<(), ConfigError> {
        fn differs(
            field: &'static str,
            stored: impl ToString,
            requested: impl ToString,
        ) -> std::result::Result<(), ConfigError> {
            let (stored, requested) = (stored.to_string(), requested.to_string());
            if stored == requested {
                Ok(())
            } else {
                Err(ConfigError::Incompatible {
                    field,
                    stored,
                    requested,
                })
            }
        }

        differs("root", self.root.display(), requested.root.display())?;
        differs(
            "duplicate_threshold",
            self.duplicate_threshold,
            requested.duplicate_threshold,
        )?;
        differs(
            "similar_threshold",
            self.similar_threshold,
            requested.similar_threshold,
        )?;
        differs("prefilter", &self.prefilter, &requested.prefilter)?;
        differs("metric", &self.metric, &requested.metric)?;
        differs("extractor", &self.extractor, &requested.extractor)?;
        differs("rotate", self.rotate, requested.rotate)?;
        differs(
            "compare_root",
            display_root(self.compare_root.as_deref()),
            display_root(requested.compare_root.as_deref()),
        )
    }

    /// Which side of a two-collection run `path` belongs to; `None` when the
    /// run covers a single collection
    pub fn in_compare_root(&self, path: &Path) -> Option<bool> {
        self.compare_root
            .as_deref()
            .map(|compare_root| path.starts_with(compare_root))
    }
}

fn display_root(root: Option<&Path>) -> String {
    root.map(|r| r.display().to_string())
        .unwrap_or_else(|| "none".to_string())
}

/// Persisted description of a run lineage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: Uuid,
    pub phase: RunPhase,
    pub settings: RunSettings,
    /// Number of invocations that have worked on this lineage
    pub invocations: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunState {
    pub fn new(settings: RunSettings) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            phase: RunPhase::Initializing,
            settings,
            invocations: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `phase`, stamping the update time
    pub fn transition(&mut self, phase: RunPhase) {
        self.phase = phase;
        self.updated_at = Utc::now();
    }
}

/// Decide what recording `signature` for an image in `stored` state means.
pub(crate) fn signature_write(
    index: u32,
    path: &Path,
    stored_state: &ImageState,
    stored_fingerprint: &Fingerprint,
    stored_digest: Option<u64>,
    fingerprint: &Fingerprint,
    signature: &Signature,
) -> Result<WriteOutcome> {
    if stored_fingerprint != fingerprint {
        return Err(CheckpointError::StaleFingerprint { index }.into());
    }

    match stored_state {
        ImageState::Discovered => Ok(WriteOutcome::Written),
        ImageState::Signed if stored_digest == Some(signature.digest()) => {
            Ok(WriteOutcome::Unchanged)
        }
        ImageState::Signed => Err(DivergenceError::Signature {
            index,
            path: path.to_path_buf(),
        }
        .into()),
        ImageState::Failed { .. } => Err(DivergenceError::ImageState {
            index,
            path: path.to_path_buf(),
            stored: "failed".to_string(),
            incoming: "signed".to_string(),
        }
        .into()),
    }
}

/// Decide what recording a decode failure for an image in `stored` state means.
pub(crate) fn failure_write(index: u32, path: &Path, stored_state: &ImageState) -> Result<WriteOutcome> {
    match stored_state {
        ImageState::Discovered => Ok(WriteOutcome::Written),
        ImageState::Failed { .. } => Ok(WriteOutcome::Unchanged),
        ImageState::Signed => Err(DivergenceError::ImageState {
            index,
            path: path.to_path_buf(),
            stored: "signed".to_string(),
            incoming: "failed".to_string(),
        }
        .into()),
    }
}

/// Decide what recording `incoming` for `key` means given what is stored.
pub(crate) fn pair_write(
    key: PairKey,
    stored: Option<&PairOutcome>,
    incoming: &PairOutcome,
) -> Result<WriteOutcome> {
    match stored {
        None => Ok(WriteOutcome::Written),
        Some(existing) if existing.matches(incoming) => Ok(WriteOutcome::Unchanged),
        Some(existing) => Err(DivergenceError::Pair {
            a: key.first(),
            b: key.second(),
            stored: existing.to_string(),
            incoming: incoming.to_string(),
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::comparator::Verdict;
    use crate::error::EngineError;

    fn settings() -> RunSettings {
        RunSettings {
            root: PathBuf::from("/photos"),
            duplicate_threshold: 0.95,
            similar_threshold: 0.9,
            prefilter: "dimensions(0.25)".to_string(),
            metric: "thumbnail-mse".to_string(),
            extractor: "thumbnail-32".to_string(),
            rotate: false,
            compare_root: None,
        }
    }

    fn signature(fill: u8) -> Signature {
        Signature::from_parts(10, 10, 2, vec![fill; 4], vec![0; 8]).unwrap()
    }

    #[test]
    fn fingerprint_truncates_to_seconds() {
        let modified = UNIX_EPOCH + std::time::Duration::from_millis(1_500);
        assert_eq!(Fingerprint::of(10, modified).modified_secs, 1);
    }

    #[test]
    fn run_phase_survives_u8_conversion() {
        for phase in [
            RunPhase::Initializing,
            RunPhase::Running,
            RunPhase::Interrupted,
            RunPhase::Completed,
            RunPhase::Reported,
        ] {
            assert_eq!(RunPhase::from_u8(phase.as_u8()), phase);
        }
    }

    #[test]
    fn identical_settings_are_compatible() {
        assert!(settings().check_compatible(&settings()).is_ok());
    }

    #[test]
    fn changed_threshold_is_incompatible() {
        let mut requested = settings();
        requested.duplicate_threshold = 0.97;

        let err = settings().check_compatible(&requested).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Incompatible {
                field: "duplicate_threshold",
                ..
            }
        ));
    }

    #[test]
    fn changed_rotation_or_compare_root_is_incompatible() {
        let mut requested = settings();
        requested.rotate = true;
        assert!(matches!(
            settings().check_compatible(&requested),
            Err(ConfigError::Incompatible { field: "rotate", .. })
        ));

        let mut requested = settings();
        requested.compare_root = Some(PathBuf::from("/photos/elsewhere"));
        assert!(matches!(
            settings().check_compatible(&requested),
            Err(ConfigError::Incompatible {
                field: "compare_root",
                ..
            })
        ));
    }

    #[test]
    fn settings_without_rotation_deserialize_as_single_collection() {
        let json = r#"{"root":"/photos","duplicate_threshold":0.95,"similar_threshold":0.9,
            "prefilter":"dimensions(0.25)","metric":"thumbnail-mse","extractor":"thumbnail-32"}"#;
        let parsed: RunSettings = serde_json::from_str(json).unwrap();

        assert_eq!(parsed, settings());
        assert_eq!(parsed.in_compare_root(Path::new("/photos/a.png")), None);
    }

    #[test]
    fn signature_rewrite_with_same_content_is_unchanged() {
        let fp = Fingerprint {
            size: 1,
            modified_secs: 1,
        };
        let sig = signature(7);

        let outcome = signature_write(
            0,
            Path::new("/a.png"),
            &ImageState::Signed,
            &fp,
            Some(sig.digest()),
            &fp,
            &sig,
        )
        .unwrap();

        assert_eq!(outcome, WriteOutcome::Unchanged);
    }

    #[test]
    fn signature_rewrite_with_other_content_diverges() {
        let fp = Fingerprint {
            size: 1,
            modified_secs: 1,
        };

        let result = signature_write(
            0,
            Path::new("/a.png"),
            &ImageState::Signed,
            &fp,
            Some(signature(7).digest()),
            &fp,
            &signature(8),
        );

        assert!(matches!(result, Err(EngineError::Divergence(_))));
    }

    #[test]
    fn signature_for_changed_file_is_stale() {
        let stored = Fingerprint {
            size: 1,
            modified_secs: 1,
        };
        let incoming = Fingerprint {
            size: 2,
            modified_secs: 1,
        };

        let result = signature_write(
            3,
            Path::new("/a.png"),
            &ImageState::Discovered,
            &stored,
            None,
            &incoming,
            &signature(1),
        );

        assert!(matches!(
            result,
            Err(EngineError::Checkpoint(CheckpointError::StaleFingerprint {
                index: 3
            }))
        ));
    }

    #[test]
    fn failure_after_signing_diverges() {
        let path = Path::new("/a.png");
        assert_eq!(
            failure_write(0, path, &ImageState::Discovered).unwrap(),
            WriteOutcome::Written
        );
        assert_eq!(
            failure_write(
                0,
                path,
                &ImageState::Failed {
                    reason: "x".to_string()
                }
            )
            .unwrap(),
            WriteOutcome::Unchanged
        );
        assert!(failure_write(0, path, &ImageState::Signed).is_err());
    }

    #[test]
    fn pair_rewrite_rules() {
        let key = PairKey::new(0, 1).unwrap();
        let duplicate = PairOutcome::Resolved(PairVerdict::scored(0.99, Verdict::Duplicate));
        let distinct = PairOutcome::Resolved(PairVerdict::scored(0.1, Verdict::Distinct));
        let error_a = PairOutcome::Error {
            message: "a".to_string(),
        };
        let error_b = PairOutcome::Error {
            message: "b".to_string(),
        };

        assert_eq!(pair_write(key, None, &duplicate).unwrap(), WriteOutcome::Written);
        assert_eq!(
            pair_write(key, Some(&duplicate), &duplicate).unwrap(),
            WriteOutcome::Unchanged
        );
        assert_eq!(
            pair_write(key, Some(&error_a), &error_b).unwrap(),
            WriteOutcome::Unchanged
        );
        assert!(matches!(
            pair_write(key, Some(&duplicate), &distinct),
            Err(EngineError::Divergence(DivergenceError::Pair { a: 0, b: 1, .. }))
        ));
    }

    #[test]
    fn run_state_serializes_to_json() {
        let state = RunState::new(settings());
        let json = serde_json::to_string(&state).unwrap();
        let restored: RunState = serde_json::from_str(&json).unwrap();

        assert_eq!(restored, state);
        assert!(json.contains("\"phase\":\"initializing\""));
    }
}
