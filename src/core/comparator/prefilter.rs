//! Cheap metadata checks that settle a pair before the metric runs.
//!
//! A rejected pair is recorded as Distinct with score 0 and the metric is
//! never invoked for it.

use crate::core::checkpoint::ImageRecord;
use crate::core::signature::Signature;

/// One side of a pair as seen by a pre-filter
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub record: &'a ImageRecord,
    pub signature: &'a Signature,
}

impl<'a> Candidate<'a> {
    pub fn new(record: &'a ImageRecord, signature: &'a Signature) -> Self {
        Self { record, signature }
    }
}

/// Outcome of a pre-filter check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefilterDecision {
    /// Pair is definitely distinct
    Reject,
    /// Pair must be scored by the metric
    Continue,
}

/// Metadata-only check run before the similarity metric
pub trait Prefilter: Send + Sync {
    /// Must be deterministic: same candidates, same decision.
    fn check(&self, a: Candidate<'_>, b: Candidate<'_>) -> PrefilterDecision;

    /// Stable identifier recorded in the checkpoint
    fn name(&self) -> String;
}

fn relative_difference(x: f64, y: f64) -> f64 {
    let largest = x.max(y);
    if largest <= 0.0 {
        0.0
    } else {
        (x - y).abs() / largest
    }
}

/// Checkpoint name; rotation changes decisions so it is part of the name
fn rotation_suffixed(kind: &str, tolerance: f64, allow_rotation: bool) -> String {
    if allow_rotation {
        format!("{kind}({tolerance},rotate)")
    } else {
        format!("{kind}({tolerance})")
    }
}

/// Rejects pairs whose widths or heights differ by more than `tolerance`
/// (as a fraction of the larger side).
#[derive(Debug, Clone)]
pub struct DimensionPrefilter {
    tolerance: f64,
    allow_rotation: bool,
}

impl DimensionPrefilter {
    pub fn new(tolerance: f64) -> Self {
        Self {
            tolerance,
            allow_rotation: false,
        }
    }

    /// Also accept the pair when swapping one image's width and height fits
    pub fn allow_rotation(mut self, allow: bool) -> Self {
        self.allow_rotation = allow;
        self
    }

    fn fits(&self, (wa, ha): (u32, u32), (wb, hb): (u32, u32)) -> bool {
        relative_difference(wa as f64, wb as f64) <= self.tolerance
            && relative_difference(ha as f64, hb as f64) <= self.tolerance
    }
}

impl Prefilter for DimensionPrefilter {
    fn check(&self, a: Candidate<'_>, b: Candidate<'_>) -> PrefilterDecision {
        let da = (a.signature.width(), a.signature.height());
        let db = (b.signature.width(), b.signature.height());

        if self.fits(da, db) || (self.allow_rotation && self.fits(da, (db.1, db.0))) {
            PrefilterDecision::Continue
        } else {
            PrefilterDecision::Reject
        }
    }

    fn name(&self) -> String {
        rotation_suffixed("dimensions", self.tolerance, self.allow_rotation)
    }
}

/// Rejects pairs whose aspect ratios differ by more than `tolerance`
#[derive(Debug, Clone)]
pub struct AspectRatioPrefilter {
    tolerance: f64,
    allow_rotation: bool,
}

impl AspectRatioPrefilter {
    pub fn new(tolerance: f64) -> Self {
        Self {
            tolerance,
            allow_rotation: false,
        }
    }

    pub fn allow_rotation(mut self, allow: bool) -> Self {
        self.allow_rotation = allow;
        self
    }
}

impl Prefilter for AspectRatioPrefilter {
    fn check(&self, a: Candidate<'_>, b: Candidate<'_>) -> PrefilterDecision {
        let ra = a.signature.aspect_ratio();
        let rb = b.signature.aspect_ratio();

        let fits = relative_difference(ra, rb) <= self.tolerance
            || (self.allow_rotation && relative_difference(ra, 1.0 / rb) <= self.tolerance);

        if fits {
            PrefilterDecision::Continue
        } else {
            PrefilterDecision::Reject
        }
    }

    fn name(&self) -> String {
        rotation_suffixed("aspect", self.tolerance, self.allow_rotation)
    }
}

/// Lets every pair through to the metric
#[derive(Debug, Clone, Default)]
pub struct NoPrefilter;

impl Prefilter for NoPrefilter {
    fn check(&self, _a: Candidate<'_>, _b: Candidate<'_>) -> PrefilterDecision {
        PrefilterDecision::Continue
    }

    fn name(&self) -> String {
        "none".to_string()
    }
}
