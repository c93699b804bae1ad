// file: src/config/mod.rs
// version: 2.0.0
// guid: a1b2c3d4-e5f6-7a8b-9c0d-1e2f3a4b5c6d

//! Configuration module for the TMOS image sync tool
//!
//! Each command builds its typed configuration from a [`ConfigLoader`]
//! up front and reports every missing variable in a single error, so a
//! misconfigured run never reaches a cloud API.

pub mod cidata;
pub mod ibmcloud;
pub mod loader;
pub mod openstack;
pub mod patch;

pub use cidata::CidataConfig;
pub use ibmcloud::{
    CatalogImportConfig, CosConfig, IbmAuthConfig, ImagerConfig, VpcApiConfig, VpcConfig,
};
pub use loader::ConfigLoader;
pub use openstack::GlanceConfig;
pub use patch::PatchConfig;

use crate::Result;
use std::path::PathBuf;
use std::time::Duration;

/// IAM token endpoint used when none is configured
pub const DEFAULT_AUTH_ENDPOINT: &str = "https://iam.cloud.ibm.com/identity/token";

/// Bucket prefix marking COS buckets this tool manages
pub const DEFAULT_BUCKET_PREFIX: &str = "f5-image-catalog";

/// Object name of the published image catalog inside each catalog bucket
pub const CATALOG_OBJECT_NAME: &str = "f5-image-catalog.json";

/// Local inventory file written into the image directory after a COS sync
pub const COS_INVENTORY_FILE: &str = "ibmcos_images.json";

/// Local inventory file written into the image directory after a Glance sync
pub const GLANCE_INVENTORY_FILE: &str = "openstack_images.json";

/// Options shared by every reconciling command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Log the plan without touching remote state
    pub dry_run: bool,
    /// Delete and recreate artifacts that already exist
    pub update_images: bool,
    /// Delete managed artifacts with no local source
    pub delete_orphans: bool,
}

impl SyncOptions {
    /// Read `DRY_RUN`/`TEST_RUN`, `UPDATE_IMAGES` and `DELETE_ORPHANS`
    pub fn from_loader(loader: &ConfigLoader) -> Result<Self> {
        Ok(Self {
            dry_run: loader.flag("DRY_RUN", false)? || loader.flag("TEST_RUN", false)?,
            update_images: loader.flag("UPDATE_IMAGES", false)?,
            delete_orphans: loader.flag("DELETE_ORPHANS", true)?,
        })
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            update_images: false,
            delete_orphans: true,
        }
    }
}

/// Periodic patch + upload loop settings
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Pause between cycles
    pub interval: Duration,
}

impl MonitorConfig {
    pub fn from_loader(loader: &ConfigLoader) -> Result<Self> {
        let seconds: u64 = loader.number("INTERVAL", 1800)?;
        if seconds == 0 {
            return Err(crate::error::ImageSyncError::config(
                "INTERVAL must be at least 1 second",
            ));
        }
        Ok(Self {
            interval: Duration::from_secs(seconds),
        })
    }
}

/// `TMOS_IMAGE_DIR`, recording a hint when unset
pub fn image_dir(loader: &ConfigLoader, missing: &mut Vec<String>) -> Result<PathBuf> {
    match loader.path("TMOS_IMAGE_DIR")? {
        Some(dir) => Ok(dir),
        None => {
            missing.push(
                "please set env TMOS_IMAGE_DIR to scan for patched TMOS images".to_string(),
            );
            Ok(PathBuf::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_options_defaults() {
        let options = SyncOptions::from_loader(&ConfigLoader::empty()).unwrap();
        assert_eq!(options, SyncOptions::default());
    }

    #[test]
    fn test_test_run_implies_dry_run() {
        let mut loader = ConfigLoader::empty();
        loader.set_env_var("TEST_RUN", "true");
        loader.set_env_var("UPDATE_IMAGES", "true");

        let options = SyncOptions::from_loader(&loader).unwrap();
        assert!(options.dry_run);
        assert!(options.update_images);
    }

    #[test]
    fn test_monitor_interval() {
        let mut loader = ConfigLoader::empty();
        assert_eq!(
            MonitorConfig::from_loader(&loader).unwrap().interval,
            Duration::from_secs(1800)
        );

        loader.set_env_var("INTERVAL", "0");
        assert!(MonitorConfig::from_loader(&loader).is_err());
    }
}
