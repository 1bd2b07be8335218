//! Trait definitions for metrics and classification strategies.

use super::Verdict;
use crate::core::signature::Signature;
use crate::error::CompareError;

/// Scores how alike two signatures are.
///
/// Implementations must be pure: the same pair always yields the same score.
pub trait SimilarityMetric: Send + Sync {
    /// Similarity in `[0, 1]`, where 1 means indistinguishable
    fn compare(&self, a: &Signature, b: &Signature) -> Result<f64, CompareError>;

    /// Stable identifier recorded in the checkpoint
    fn name(&self) -> String;
}

/// Strategy trait for turning a score into a verdict
pub trait ComparisonStrategy: Send + Sync {
    /// Classify a similarity score
    fn classify(&self, score: f64) -> Verdict;

    /// Human-readable description of the strategy
    fn description(&self) -> String;
}

/// Two-threshold classification strategy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdStrategy {
    duplicate: f64,
    similar: f64,
}

impl ThresholdStrategy {
    /// Create a strategy; scores `>= duplicate` are duplicates and scores
    /// `>= similar` are similar.
    pub fn new(duplicate: f64, similar: f64) -> Self {
        Self { duplicate, similar }
    }

    pub fn duplicate_threshold(&self) -> f64 {
        self.duplicate
    }

    pub fn similar_threshold(&self) -> f64 {
        self.similar
    }
}

impl Default for ThresholdStrategy {
    fn default() -> Self {
        Self::new(0.95, 0.90)
    }
}

impl ComparisonStrategy for ThresholdStrategy {
    fn classify(&self, score: f64) -> Verdict {
        if score >= self.duplicate {
            Verdict::Duplicate
        } else if score >= self.similar {
            Verdict::Similar
        } else {
            Verdict::Distinct
        }
    }

    fn description(&self) -> String {
        format!(
            "Threshold strategy: duplicate at >= {:.2}, similar at >= {:.2}",
            self.duplicate, self.similar
        )
    }
}
