// file: src/image/mod.rs
// version: 2.0.0
// guid: a1b2c3d4-e5f6-7890-1234-567890abcdef

//! Local TMOS disk image tree
//!
//! This module handles:
//! - Discovering patched disk images and their sidecar files
//! - Deriving remote names from image directory names
//! - Checksum and signature sidecars
//! - Injecting files into TMOS disk images
//! - Building NoCloud config drives

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub mod checksum;
pub mod cidata;
pub mod guestfish;
pub mod naming;
pub mod patcher;
pub mod scanner;

pub use cidata::CidataBuilder;
pub use patcher::{ImagePatcher, PatchSummary};
pub use scanner::ImageScanner;

/// Sidecar suffix holding the hex MD5 of an image
pub const MD5_SUFFIX: &str = "md5";

/// Sidecar suffix holding the RSA/SHA-384 signature of an image
pub const SIG_SUFFIX: &str = "384.sig";

/// Sidecar suffix listing every file injected into an image
pub const MANIFEST_SUFFIX: &str = "manifest";

/// Virtual disk formats TMOS ships in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiskFormat {
    #[serde(rename = "qcow2")]
    Qcow2,
    #[serde(rename = "vhd")]
    Vhd,
    #[serde(rename = "vmdk")]
    Vmdk,
}

impl DiskFormat {
    /// Get the format as its file extension
    pub fn as_str(&self) -> &'static str {
        match self {
            DiskFormat::Qcow2 => "qcow2",
            DiskFormat::Vhd => "vhd",
            DiskFormat::Vmdk => "vmdk",
        }
    }

    /// Format of a path judged by its extension
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| ext.parse().ok())
    }
}

impl std::str::FromStr for DiskFormat {
    type Err = crate::error::ImageSyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "qcow2" => Ok(DiskFormat::Qcow2),
            "vhd" => Ok(DiskFormat::Vhd),
            "vmdk" => Ok(DiskFormat::Vmdk),
            _ => Err(crate::error::ImageSyncError::ValidationError(format!(
                "Unknown disk format: {}",
                s
            ))),
        }
    }
}

/// A patched disk image found under the image root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalImage {
    /// Path of the disk file
    pub path: PathBuf,
    /// Name of the directory holding the disk file; all remote names derive from it
    pub dir_name: String,
    pub format: DiskFormat,
    pub size_bytes: u64,
    /// `<file>.md5` when present
    pub md5_path: Option<PathBuf>,
    /// `<file>.384.sig` when present
    pub sig_path: Option<PathBuf>,
}

impl LocalImage {
    /// File name of the disk image
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// DATASTOR images carry an extra data volume and get distinct names
    pub fn is_datastor(&self) -> bool {
        self.path.to_string_lossy().contains("DATASTOR")
    }

    /// Get human-readable size
    pub fn size_human(&self) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = self.size_bytes as f64;
        let mut unit_index = 0;

        while size >= 1024.0 && unit_index < UNITS.len() - 1 {
            size /= 1024.0;
            unit_index += 1;
        }

        format!("{:.2} {}", size, UNITS[unit_index])
    }
}

/// `<image>.<suffix>` next to an image
pub fn sidecar_path(image: &Path, suffix: &str) -> PathBuf {
    let mut name = image.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disk_format_from_path() {
        assert_eq!(
            DiskFormat::from_path(Path::new("/x/BIGIP-15.1.0.qcow2")),
            Some(DiskFormat::Qcow2)
        );
        assert_eq!(DiskFormat::from_path(Path::new("/x/image.VHD")), Some(DiskFormat::Vhd));
        assert_eq!(DiskFormat::from_path(Path::new("/x/image.qcow2.md5")), None);
        assert_eq!(DiskFormat::from_path(Path::new("/x/README")), None);
    }

    #[test]
    fn test_sidecar_path() {
        let image = Path::new("/images/BIGIP/BIGIP.qcow2");
        assert_eq!(
            sidecar_path(image, SIG_SUFFIX),
            PathBuf::from("/images/BIGIP/BIGIP.qcow2.384.sig")
        );
    }

    #[test]
    fn test_size_human() {
        let image = LocalImage {
            path: PathBuf::from("/images/BIGIP/BIGIP.qcow2"),
            dir_name: "BIGIP".to_string(),
            format: DiskFormat::Qcow2,
            size_bytes: 5 * 1024 * 1024 * 1024,
            md5_path: None,
            sig_path: None,
        };
        assert_eq!(image.size_human(), "5.00 GB");
        assert!(!image.is_datastor());
    }
}
