//! # Scanner Module
//!
//! Discovers images under a collection root.
//!
//! The engine only depends on the [`ImageSource`] trait; `WalkDirScanner` is
//! the bundled implementation. Results are sorted by path so a fresh run over
//! an unchanged tree always assigns the same indices.
//!
//! ## Example
//! ```rust,ignore
//! use resumable_photo_dedup::core::scanner::{ImageSource, ScanConfig, WalkDirScanner};
//!
//! let scanner = WalkDirScanner::new(ScanConfig::default());
//! let found = scanner.list_images(Path::new("/Users/me/Photos"))?;
//! ```

mod filter;
mod walker;

pub use filter::ExtensionFilter;
pub use walker::{ScanConfig, WalkDirScanner};

use crate::error::ScanError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// An image file found during discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredImage {
    /// Path to the image file
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Last modified time
    pub modified: SystemTime,
}

/// Image formats the bundled extractor knows how to route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageFormat {
    Jpeg,
    Png,
    WebP,
    Gif,
    Bmp,
    Tiff,
    Unknown,
}

impl ImageFormat {
    /// Detect format from file extension
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "jpg" | "jpeg" => ImageFormat::Jpeg,
            "png" => ImageFormat::Png,
            "webp" => ImageFormat::WebP,
            "gif" => ImageFormat::Gif,
            "bmp" => ImageFormat::Bmp,
            "tiff" | "tif" => ImageFormat::Tiff,
            _ => ImageFormat::Unknown,
        }
    }

    /// Detect format from a path's extension
    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .map(Self::from_extension)
            .unwrap_or(ImageFormat::Unknown)
    }

    /// Check if this format is supported
    pub fn is_supported(&self) -> bool {
        !matches!(self, ImageFormat::Unknown)
    }
}

/// Result of listing a collection
#[derive(Debug, Default)]
pub struct ScanResult {
    /// Discovered images, sorted by path
    pub images: Vec<DiscoveredImage>,
    /// Entries that could not be inspected (non-fatal)
    pub errors: Vec<ScanError>,
}

/// Source of images for a run.
///
/// Implement this trait to plug in a different discovery mechanism
/// (a database listing, an object store, a fixed list in tests).
pub trait ImageSource: Send + Sync {
    /// List every image under `root`.
    ///
    /// Fails only when the root itself is unusable; per-entry problems are
    /// reported in [`ScanResult::errors`].
    fn list_images(&self, root: &Path) -> Result<ScanResult, ScanError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_format_from_extension_is_case_insensitive() {
        assert_eq!(ImageFormat::from_extension("jpg"), ImageFormat::Jpeg);
        assert_eq!(ImageFormat::from_extension("JPEG"), ImageFormat::Jpeg);
        assert_eq!(ImageFormat::from_extension("Png"), ImageFormat::Png);
    }

    #[test]
    fn format_from_path_without_extension_is_unknown() {
        assert_eq!(
            ImageFormat::from_path(Path::new("/photos/README")),
            ImageFormat::Unknown
        );
        assert!(!ImageFormat::Unknown.is_supported());
        assert!(ImageFormat::Tiff.is_supported());
    }
}
