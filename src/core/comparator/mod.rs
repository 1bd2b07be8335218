//! # Comparator Module
//!
//! Scores pairs of signatures and turns scores into verdicts.
//!
//! ## How It Works
//! 1. A cheap [`Prefilter`] may reject a pair from metadata alone
//! 2. A [`SimilarityMetric`] scores the survivors in `[0, 1]`
//! 3. A [`ComparisonStrategy`] maps the score to a [`Verdict`]
//! 4. [`TransitiveGrouper`] clusters matching pairs into groups
//!
//! ## Default Thresholds
//! | Score         | Verdict   |
//! |---------------|-----------|
//! | >= 0.95       | Duplicate |
//! | 0.90 - 0.95   | Similar   |
//! | < 0.90        | Distinct  |

mod grouper;
mod metrics;
mod prefilter;
mod traits;

pub use grouper::{DuplicateGroup, ResultAggregator, TransitiveGrouper};
pub use metrics::{HammingMetric, ThumbnailMseMetric};
pub use prefilter::{
    AspectRatioPrefilter, Candidate, DimensionPrefilter, NoPrefilter, Prefilter,
    PrefilterDecision,
};
pub use traits::{ComparisonStrategy, SimilarityMetric, ThresholdStrategy};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of a compared pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Score at or above the duplicate threshold
    Duplicate,
    /// Score at or above the similar threshold
    Similar,
    /// Everything else, including pre-filtered pairs
    Distinct,
}

impl Verdict {
    /// Whether this verdict links the two images into one group
    pub fn is_match(&self) -> bool {
        matches!(self, Verdict::Duplicate | Verdict::Similar)
    }

    /// Storage name
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Duplicate => "duplicate",
            Verdict::Similar => "similar",
            Verdict::Distinct => "distinct",
        }
    }

    /// Parse a storage name
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "duplicate" => Some(Verdict::Duplicate),
            "similar" => Some(Verdict::Similar),
            "distinct" => Some(Verdict::Distinct),
            _ => None,
        }
    }

    /// The weaker of two verdicts (Duplicate > Similar > Distinct)
    pub fn weakest(self, other: Verdict) -> Verdict {
        if self.rank() <= other.rank() {
            self
        } else {
            other
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Verdict::Distinct => 0,
            Verdict::Similar => 1,
            Verdict::Duplicate => 2,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Duplicate => write!(f, "Duplicate"),
            Verdict::Similar => write!(f, "Similar"),
            Verdict::Distinct => write!(f, "Distinct"),
        }
    }
}

/// Scored result of comparing one pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PairVerdict {
    /// Similarity in `[0, 1]`, higher is more alike
    pub score: f64,
    /// Classification of the score
    pub verdict: Verdict,
    /// True when the pre-filter decided without running the metric
    pub prefiltered: bool,
}

impl PairVerdict {
    /// Verdict for a pair that was scored by the metric
    pub fn scored(score: f64, verdict: Verdict) -> Self {
        Self {
            score,
            verdict,
            prefiltered: false,
        }
    }

    /// Verdict for a pair the pre-filter rejected
    pub fn rejected() -> Self {
        Self {
            score: 0.0,
            verdict: Verdict::Distinct,
            prefiltered: true,
        }
    }
}

impl fmt::Display for PairVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.prefiltered {
            write!(f, "{} (pre-filtered)", self.verdict)
        } else {
            write!(f, "{} ({:.4})", self.verdict, self.score)
        }
    }
}
