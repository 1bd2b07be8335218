//! Directory walking implementation using walkdir.

use super::{filter::ExtensionFilter, DiscoveredImage, ImageSource, ScanResult};
use crate::error::ScanError;
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// Configuration for the directory scanner
#[derive(Debug, Clone, Default)]
pub struct ScanConfig {
    /// Whether to follow symbolic links
    pub follow_symlinks: bool,
    /// Whether to include hidden files and directories
    pub include_hidden: bool,
    /// Maximum directory depth (None = unlimited)
    pub max_depth: Option<usize>,
    /// Custom extensions to include (None = use defaults)
    pub extensions: Option<Vec<String>>,
}

/// Scanner implementation using the walkdir crate
pub struct WalkDirScanner {
    config: ScanConfig,
    filter: ExtensionFilter,
}

impl WalkDirScanner {
    /// Create a new scanner with the given configuration
    pub fn new(config: ScanConfig) -> Self {
        let mut filter = ExtensionFilter::new().with_hidden(config.include_hidden);

        if let Some(ref extensions) = config.extensions {
            filter = filter.with_extensions(extensions.clone());
        }

        Self { config, filter }
    }

    fn keep_entry(&self, entry: &DirEntry, root: &Path) -> bool {
        if self.config.include_hidden || entry.path() == root {
            return true;
        }
        !ExtensionFilter::is_hidden(entry.path())
    }

    fn classify_walk_error(error: walkdir::Error) -> ScanError {
        let path = error.path().map(Path::to_path_buf).unwrap_or_default();

        if error.io_error().map(io::Error::kind) == Some(io::ErrorKind::PermissionDenied) {
            ScanError::PermissionDenied { path }
        } else {
            ScanError::ReadDirectory {
                path,
                source: io::Error::new(io::ErrorKind::Other, error.to_string()),
            }
        }
    }
}

impl Default for WalkDirScanner {
    fn default() -> Self {
        Self::new(ScanConfig::default())
    }
}

impl ImageSource for WalkDirScanner {
    fn list_images(&self, root: &Path) -> Result<ScanResult, ScanError> {
        if !root.is_dir() {
            return Err(ScanError::DirectoryNotFound {
                path: root.to_path_buf(),
            });
        }

        let mut walker = WalkDir::new(root)
            .follow_links(self.config.follow_symlinks)
            .sort_by_file_name();

        if let Some(depth) = self.config.max_depth {
            walker = walker.max_depth(depth);
        }

        let mut result = ScanResult::default();

        for entry in walker.into_iter().filter_entry(|e| self.keep_entry(e, root)) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let error = Self::classify_walk_error(e);
                    warn!(%error, "skipping unreadable entry");
                    result.errors.push(error);
                    continue;
                }
            };

            if !entry.file_type().is_file() && !entry.path_is_symlink() {
                continue;
            }

            let path = entry.path();
            if !self.filter.accepts(path) {
                continue;
            }

            match fs::metadata(path) {
                Ok(metadata) if metadata.is_file() => {
                    result.images.push(DiscoveredImage {
                        path: path.to_path_buf(),
                        size: metadata.len(),
                        modified: metadata
                            .modified()
                            .unwrap_or(std::time::SystemTime::UNIX_EPOCH),
                    });
                }
                Ok(_) => {}
                Err(source) => {
                    let error = ScanError::ReadDirectory {
                        path: path.to_path_buf(),
                        source,
                    };
                    warn!(%error, "skipping file without metadata");
                    result.errors.push(error);
                }
            }
        }

        result.images.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(
            root = %root.display(),
            images = result.images.len(),
            errors = result.errors.len(),
            "discovery finished"
        );

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn create_file(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(&[0xFF, 0xD8, 0xFF, 0xE0]).unwrap();
        path
    }

    #[test]
    fn empty_directory_lists_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let scanner = WalkDirScanner::default();

        let result = scanner.list_images(temp_dir.path()).unwrap();

        assert!(result.images.is_empty());
        assert!(result.errors.is_empty());
    }

    #[test]
    fn lists_nested_images_sorted_by_path() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("b_dir");
        fs::create_dir(&nested).unwrap();

        create_file(temp_dir.path(), "c.jpg");
        create_file(temp_dir.path(), "a.png");
        create_file(&nested, "inner.jpg");
        create_file(temp_dir.path(), "notes.txt");

        let scanner = WalkDirScanner::default();
        let result = scanner.list_images(temp_dir.path()).unwrap();

        let names: Vec<_> = result
            .images
            .iter()
            .map(|i| i.path.strip_prefix(temp_dir.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            names,
            vec![
                PathBuf::from("a.png"),
                PathBuf::from("b_dir").join("inner.jpg"),
                PathBuf::from("c.jpg"),
            ]
        );
    }

    #[test]
    fn records_size_for_fingerprinting() {
        let temp_dir = TempDir::new().unwrap();
        create_file(temp_dir.path(), "photo.jpg");

        let result = WalkDirScanner::default()
            .list_images(temp_dir.path())
            .unwrap();

        assert_eq!(result.images[0].size, 4);
    }

    #[test]
    fn hidden_directories_are_skipped_by_default() {
        let temp_dir = TempDir::new().unwrap();
        let hidden = temp_dir.path().join(".thumbnails");
        fs::create_dir(&hidden).unwrap();
        create_file(&hidden, "cached.jpg");
        create_file(temp_dir.path(), "visible.jpg");

        let result = WalkDirScanner::default()
            .list_images(temp_dir.path())
            .unwrap();
        assert_eq!(result.images.len(), 1);

        let config = ScanConfig {
            include_hidden: true,
            ..Default::default()
        };
        let result = WalkDirScanner::new(config)
            .list_images(temp_dir.path())
            .unwrap();
        assert_eq!(result.images.len(), 2);
    }

    #[test]
    fn missing_root_is_an_error() {
        let scanner = WalkDirScanner::default();
        let result = scanner.list_images(Path::new("/nonexistent/path/12345"));

        assert!(matches!(result, Err(ScanError::DirectoryNotFound { .. })));
    }
}
