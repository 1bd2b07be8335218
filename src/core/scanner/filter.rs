//! Extension and hidden-file filtering for discovery.

use std::collections::HashSet;
use std::path::Path;

const DEFAULT_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif", "bmp", "tiff", "tif"];

/// Decides which directory entries count as images
#[derive(Debug, Clone)]
pub struct ExtensionFilter {
    extensions: HashSet<String>,
    include_hidden: bool,
}

impl ExtensionFilter {
    /// Accept the formats the bundled extractor can decode
    pub fn new() -> Self {
        Self {
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            include_hidden: false,
        }
    }

    /// Include hidden files (starting with .)
    pub fn with_hidden(mut self, include: bool) -> Self {
        self.include_hidden = include;
        self
    }

    /// Override the accepted extensions (case-insensitive)
    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions.into_iter().map(|e| e.to_lowercase()).collect();
        self
    }

    /// Whether a file name is hidden
    pub fn is_hidden(path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with('.'))
            .unwrap_or(false)
    }

    /// Check if a file should be listed
    pub fn accepts(&self, path: &Path) -> bool {
        if !self.include_hidden && Self::is_hidden(path) {
            return false;
        }

        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| self.extensions.contains(&ext.to_lowercase()))
            .unwrap_or(false)
    }
}

impl Default for ExtensionFilter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_common_formats() {
        let filter = ExtensionFilter::new();
        assert!(filter.accepts(Path::new("/photos/image.jpg")));
        assert!(filter.accepts(Path::new("/photos/image.JPEG")));
        assert!(filter.accepts(Path::new("/photos/scan.tif")));
    }

    #[test]
    fn rejects_non_images_and_bare_names() {
        let filter = ExtensionFilter::new();
        assert!(!filter.accepts(Path::new("/photos/document.pdf")));
        assert!(!filter.accepts(Path::new("/photos/no_extension")));
    }

    #[test]
    fn hidden_files_are_opt_in() {
        let filter = ExtensionFilter::new();
        assert!(!filter.accepts(Path::new("/photos/.hidden.jpg")));

        let filter = ExtensionFilter::new().with_hidden(true);
        assert!(filter.accepts(Path::new("/photos/.hidden.jpg")));
    }

    #[test]
    fn custom_extensions_replace_defaults() {
        let filter = ExtensionFilter::new().with_extensions(vec!["PNG".to_string()]);
        assert!(filter.accepts(Path::new("/a.png")));
        assert!(!filter.accepts(Path::new("/a.jpg")));
    }
}
