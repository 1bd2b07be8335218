//! # Signature Module
//!
//! Turns images into compact comparable signatures and caches them.
//!
//! ## What a Signature Holds
//! - Original pixel dimensions (used by the pre-filter)
//! - A square grayscale thumbnail (used by the MSE metric)
//! - A 64-bit difference hash (used by the Hamming metric)
//!
//! ## Pipeline
//! 1. Decode (zune-jpeg for JPEG, `image` for everything else)
//! 2. Resize to grayscale with SIMD via fast_image_resize
//! 3. Persist through the checkpoint before anyone sees the result

mod cache;
mod decode;
mod thumbnail;

pub use cache::{Lookup, SignatureCache, SignatureOutcome};
pub use decode::decode_image;
pub use thumbnail::{grayscale_thumbnail, ThumbnailExtractor};

use crate::error::DecodeError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use xxhash_rust::xxh3::Xxh3;

/// Compact, immutable representation of one image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    width: u32,
    height: u32,
    side: u32,
    thumbnail: Vec<u8>,
    hash: Vec<u8>,
}

impl Signature {
    /// Assemble a signature from its parts.
    ///
    /// Returns `None` when the dimensions are zero or the thumbnail is not
    /// `side * side` bytes.
    pub fn from_parts(
        width: u32,
        height: u32,
        side: u32,
        thumbnail: Vec<u8>,
        hash: Vec<u8>,
    ) -> Option<Self> {
        if width == 0 || height == 0 || side == 0 {
            return None;
        }
        if thumbnail.len() != (side as usize) * (side as usize) {
            return None;
        }

        Some(Self {
            width,
            height,
            side,
            thumbnail,
            hash,
        })
    }

    /// Original image width in pixels
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Original image height in pixels
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Edge length of the square thumbnail
    pub fn side(&self) -> u32 {
        self.side
    }

    /// Row-major grayscale thumbnail
    pub fn thumbnail(&self) -> &[u8] {
        &self.thumbnail
    }

    /// Difference hash bytes
    pub fn hash(&self) -> &[u8] {
        &self.hash
    }

    /// Width divided by height of the original image
    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height as f64
    }

    /// Content digest, stored beside the signature to detect torn or
    /// corrupted rows.
    pub fn digest(&self) -> u64 {
        let mut hasher = Xxh3::new();
        hasher.update(&self.width.to_le_bytes());
        hasher.update(&self.height.to_le_bytes());
        hasher.update(&self.side.to_le_bytes());
        hasher.update(&self.thumbnail);
        hasher.update(&(self.hash.len() as u32).to_le_bytes());
        hasher.update(&self.hash);
        hasher.digest()
    }

    /// Thumbnail rotated clockwise by `quarter_turns * 90` degrees.
    pub fn rotated_thumbnail(&self, quarter_turns: u8) -> Vec<u8> {
        let n = self.side as usize;
        let src = &self.thumbnail;

        match quarter_turns % 4 {
            0 => src.clone(),
            1 => {
                let mut out = vec![0u8; n * n];
                for y in 0..n {
                    for x in 0..n {
                        out[y * n + x] = src[(n - 1 - x) * n + y];
                    }
                }
                out
            }
            2 => src.iter().rev().copied().collect(),
            _ => {
                let mut out = vec![0u8; n * n];
                for y in 0..n {
                    for x in 0..n {
                        out[y * n + x] = src[x * n + (n - 1 - y)];
                    }
                }
                out
            }
        }
    }
}

/// Decodes an image and derives its signature.
///
/// This is the seam between the engine and image decoding; swap it out to
/// use a different descriptor (embeddings, colour histograms, ...).
pub trait SignatureExtractor: Send + Sync {
    /// Compute the signature of the image at `path`
    fn extract_signature(&self, path: &Path) -> Result<Signature, DecodeError>;

    /// Stable identifier recorded in the checkpoint; a resumed run must use
    /// an extractor with the same name.
    fn name(&self) -> String;
}
