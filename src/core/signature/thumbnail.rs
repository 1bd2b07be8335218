//! Thumbnail and difference-hash extraction.
//!
//! Uses fast_image_resize (AVX2/NEON when available) for both the square
//! thumbnail and the (8+1) x 8 grid the dHash is computed from.

use super::{decode_image, Signature, SignatureExtractor};
use crate::error::DecodeError;
use fast_image_resize::{images::Image, FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer};
use image::{DynamicImage, GrayImage, ImageBuffer};
use std::path::Path;

const DHASH_SIZE: u32 = 8;

/// Resize to `width` x `height` and convert to 8-bit grayscale.
pub fn grayscale_thumbnail(
    image: &DynamicImage,
    width: u32,
    height: u32,
) -> Result<GrayImage, String> {
    let gray = image.to_luma8();
    let (src_width, src_height) = gray.dimensions();

    if src_width == 0 || src_height == 0 || width == 0 || height == 0 {
        return Err("invalid resize dimensions".to_string());
    }

    let src = Image::from_vec_u8(src_width, src_height, gray.into_raw(), PixelType::U8)
        .map_err(|e| format!("source buffer rejected: {e}"))?;
    let mut dst = Image::new(width, height, PixelType::U8);

    let options =
        ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Bilinear));

    Resizer::new()
        .resize(&src, &mut dst, &options)
        .map_err(|e| format!("resize failed: {e}"))?;

    ImageBuffer::from_raw(width, height, dst.into_vec())
        .ok_or_else(|| "resized buffer has the wrong length".to_string())
}

/// 64-bit dHash: each bit records whether a pixel is brighter than its
/// right-hand neighbour.
fn difference_hash(image: &DynamicImage) -> Result<Vec<u8>, String> {
    let grid = grayscale_thumbnail(image, DHASH_SIZE + 1, DHASH_SIZE)?;

    let mut bytes = Vec::with_capacity((DHASH_SIZE * DHASH_SIZE / 8) as usize);
    let mut current: u8 = 0;
    let mut bit = 0;

    for y in 0..DHASH_SIZE {
        for x in 0..DHASH_SIZE {
            if grid.get_pixel(x, y)[0] > grid.get_pixel(x + 1, y)[0] {
                current |= 1 << (7 - bit);
            }
            bit += 1;
            if bit == 8 {
                bytes.push(current);
                current = 0;
                bit = 0;
            }
        }
    }

    Ok(bytes)
}

/// Default extractor: grayscale `side` x `side` thumbnail plus dHash
#[derive(Debug, Clone)]
pub struct ThumbnailExtractor {
    side: u32,
}

impl ThumbnailExtractor {
    pub fn new(side: u32) -> Self {
        Self { side }
    }

    pub fn side(&self) -> u32 {
        self.side
    }

    /// Derive a signature from an already-decoded image
    pub fn signature_of(&self, image: &DynamicImage) -> Result<Signature, String> {
        let thumbnail = grayscale_thumbnail(image, self.side, self.side)?;
        let hash = difference_hash(image)?;

        Signature::from_parts(
            image.width(),
            image.height(),
            self.side,
            thumbnail.into_raw(),
            hash,
        )
        .ok_or_else(|| "thumbnail does not match requested side".to_string())
    }
}

impl Default for ThumbnailExtractor {
    fn default() -> Self {
        Self::new(32)
    }
}

impl SignatureExtractor for ThumbnailExtractor {
    fn extract_signature(&self, path: &Path) -> Result<Signature, DecodeError> {
        let image = decode_image(path)?;

        self.signature_of(&image).map_err(|reason| DecodeError::Decode {
            path: path.to_path_buf(),
            reason,
        })
    }

    fn name(&self) -> String {
        format!("thumbnail-{}", self.side)
    }
}
