// file: src/image/scanner.rs
// version: 1.0.0
// guid: 351d8710-6466-438f-b51b-eba5b428c72a

//! Discovery of patched images under the image root

use super::{sidecar_path, DiskFormat, LocalImage, MD5_SUFFIX, SIG_SUFFIX};
use crate::error::ImageSyncError;
use crate::Result;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Scans `<root>/<image dir>/<disk file>` for patched images
pub struct ImageScanner {
    root: PathBuf,
}

impl ImageScanner {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// All disk images exactly one directory below the root, sorted by path
    pub fn scan(&self) -> Result<Vec<LocalImage>> {
        if !self.root.is_dir() {
            return Err(ImageSyncError::config(format!(
                "TMOS image directory {} does not exist",
                self.root.display()
            )));
        }

        debug!("searching for images in {}", self.root.display());
        let mut images = Vec::new();

        for entry in WalkDir::new(&self.root)
            .min_depth(2)
            .max_depth(2)
            .sort_by_file_name()
        {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let Some(format) = DiskFormat::from_path(path) else {
                continue;
            };
            let dir_name = path
                .parent()
                .and_then(|dir| dir.file_name())
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();

            let md5_path = sidecar_path(path, MD5_SUFFIX);
            let sig_path = sidecar_path(path, SIG_SUFFIX);

            debug!("found image {}", path.display());
            images.push(LocalImage {
                path: path.to_path_buf(),
                dir_name,
                format,
                size_bytes: entry.metadata()?.len(),
                md5_path: md5_path.exists().then_some(md5_path),
                sig_path: sig_path.exists().then_some(sig_path),
            });
        }

        Ok(images)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_scan_finds_images_one_level_down() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("BIGIP-15.1.0-0.0.4.ALL_1SLOT");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("BIGIP-15.1.0-0.0.4.qcow2"), b"disk").unwrap();
        fs::write(dir.join("BIGIP-15.1.0-0.0.4.qcow2.md5"), b"abc").unwrap();
        fs::write(dir.join("notes.txt"), b"ignored").unwrap();
        // archives at the root are patcher inputs, not images
        fs::write(root.path().join("BIGIP-15.1.0-0.0.4.qcow2.zip"), b"zip").unwrap();

        let images = ImageScanner::new(root.path()).scan().unwrap();

        assert_eq!(images.len(), 1);
        assert_eq!(images[0].dir_name, "BIGIP-15.1.0-0.0.4.ALL_1SLOT");
        assert_eq!(images[0].format, DiskFormat::Qcow2);
        assert_eq!(images[0].size_bytes, 4);
        assert!(images[0].md5_path.is_some());
        assert!(images[0].sig_path.is_none());
    }

    #[test]
    fn test_scan_is_sorted() {
        let root = TempDir::new().unwrap();
        for name in ["b-image", "a-image"] {
            let dir = root.path().join(name);
            fs::create_dir(&dir).unwrap();
            fs::write(dir.join(format!("{}.vhd", name)), b"disk").unwrap();
        }

        let images = ImageScanner::new(root.path()).scan().unwrap();
        let names: Vec<_> = images.iter().map(|i| i.dir_name.as_str()).collect();
        assert_eq!(names, vec!["a-image", "b-image"]);
    }

    #[test]
    fn test_scan_missing_root() {
        let result = ImageScanner::new("/definitely/not/here").scan();
        assert!(matches!(result, Err(ImageSyncError::ConfigError(_))));
    }
}
