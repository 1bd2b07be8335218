//! Bundled similarity metrics.

use super::SimilarityMetric;
use crate::core::signature::Signature;
use crate::error::CompareError;

/// Root-mean-square difference between grayscale thumbnails.
///
/// `score = 1 - rmse / 255`, so identical thumbnails score 1.0 and a black
/// thumbnail against a white one scores 0.0.
#[derive(Debug, Clone, Default)]
pub struct ThumbnailMseMetric {
    rotate: bool,
}

impl ThumbnailMseMetric {
    pub fn new() -> Self {
        Self { rotate: false }
    }

    /// Also compare against the 90/180/270 degree rotations of the second
    /// thumbnail and keep the best score.
    pub fn with_rotation(mut self, rotate: bool) -> Self {
        self.rotate = rotate;
        self
    }

    fn score(a: &[u8], b: &[u8]) -> f64 {
        let sum: u64 = a
            .iter()
            .zip(b)
            .map(|(&x, &y)| {
                let d = x as i64 - y as i64;
                (d * d) as u64
            })
            .sum();
        let mse = sum as f64 / a.len() as f64;

        (1.0 - mse.sqrt() / 255.0).clamp(0.0, 1.0)
    }
}

impl SimilarityMetric for ThumbnailMseMetric {
    fn compare(&self, a: &Signature, b: &Signature) -> Result<f64, CompareError> {
        if a.side() != b.side() {
            return Err(CompareError::IncompatibleSignatures {
                reason: format!("thumbnail sides differ: {} vs {}", a.side(), b.side()),
            });
        }

        let direct = Self::score(a.thumbnail(), b.thumbnail());
        if !self.rotate || direct >= 1.0 {
            return Ok(direct);
        }

        let best = (1..4u8)
            .map(|turns| Self::score(a.thumbnail(), &b.rotated_thumbnail(turns)))
            .fold(direct, f64::max);

        Ok(best)
    }

    fn name(&self) -> String {
        if self.rotate {
            "thumbnail-mse+rotate".to_string()
        } else {
            "thumbnail-mse".to_string()
        }
    }
}

/// Normalised Hamming similarity between difference hashes
#[derive(Debug, Clone, Default)]
pub struct HammingMetric;

impl HammingMetric {
    pub fn new() -> Self {
        Self
    }
}

impl SimilarityMetric for HammingMetric {
    fn compare(&self, a: &Signature, b: &Signature) -> Result<f64, CompareError> {
        if a.hash().is_empty() || a.hash().len() != b.hash().len() {
            return Err(CompareError::IncompatibleSignatures {
                reason: format!(
                    "hash lengths differ: {} vs {} bytes",
                    a.hash().len(),
                    b.hash().len()
                ),
            });
        }

        let distance: u32 = a
            .hash()
            .iter()
            .zip(b.hash())
            .map(|(x, y)| (x ^ y).count_ones())
            .sum();
        let bits = (a.hash().len() * 8) as f64;

        Ok(1.0 - distance as f64 / bits)
    }

    fn name(&self) -> String {
        "dhash-hamming".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(pixels: Vec<u8>, hash: Vec<u8>) -> Signature {
        let side = (pixels.len() as f64).sqrt() as u32;
        Signature::from_parts(100, 100, side, pixels, hash).unwrap()
    }

    #[test]
    fn identical_thumbnails_score_one() {
        let a = sig(vec![10, 20, 30, 40], vec![0]);
        let score = ThumbnailMseMetric::new().compare(&a, &a.clone()).unwrap();
        assert_eq!(score, 1.0);
    }

    #[test]
    fn black_and_white_score_zero() {
        let black = sig(vec![0; 4], vec![0]);
        let white = sig(vec![255; 4], vec![0]);
        let score = ThumbnailMseMetric::new().compare(&black, &white).unwrap();
        assert_eq!(score, 0.0);
    }

    #[test]
    fn uniform_offset_scales_linearly() {
        let a = sig(vec![100; 4], vec![0]);
        let b = sig(vec![151; 4], vec![0]);
        let score = ThumbnailMseMetric::new().compare(&a, &b).unwrap();
        assert!((score - 0.8).abs() < 1e-9);
    }

    #[test]
    fn rotation_finds_turned_copy() {
        let a = sig(vec![0, 255, 0, 0], vec![0]);
        // a turned a quarter clockwise
        let b = sig(vec![0, 0, 0, 255], vec![0]);

        let plain = ThumbnailMseMetric::new().compare(&a, &b).unwrap();
        let rotated = ThumbnailMseMetric::new()
            .with_rotation(true)
            .compare(&a, &b)
            .unwrap();

        assert!(plain < 0.5);
        assert_eq!(rotated, 1.0);
    }

    #[test]
    fn mismatched_sides_are_incompatible() {
        let a = sig(vec![0; 4], vec![0]);
        let b = sig(vec![0; 9], vec![0]);
        let result = ThumbnailMseMetric::new().compare(&a, &b);
        assert!(matches!(
            result,
            Err(CompareError::IncompatibleSignatures { .. })
        ));
    }

    #[test]
    fn hamming_counts_differing_bits() {
        let a = sig(vec![0; 4], vec![0b0000_0000, 0xFF]);
        let b = sig(vec![0; 4], vec![0b0000_1111, 0xFF]);
        let score = HammingMetric::new().compare(&a, &b).unwrap();
        assert_eq!(score, 1.0 - 4.0 / 16.0);
    }

    #[test]
    fn hamming_rejects_empty_hashes() {
        let a = sig(vec![0; 4], vec![]);
        assert!(HammingMetric::new().compare(&a, &a.clone()).is_err());
    }

    #[test]
    fn names_are_stable() {
        assert_eq!(ThumbnailMseMetric::new().name(), "thumbnail-mse");
        assert_eq!(
            ThumbnailMseMetric::new().with_rotation(true).name(),
            "thumbnail-mse+rotate"
        );
        assert_eq!(HammingMetric::new().name(), "dhash-hamming");
    }
}
