// file: src/config/patch.rs
// version: 1.0.0
// guid: 2fd4a316-4c4b-4a15-919b-b1118d12702c

//! Disk image patcher configuration

use super::image_dir;
use super::loader::{check_missing, ConfigLoader};
use crate::Result;
use std::path::PathBuf;
use tracing::{info, warn};

/// Where to find files to inject and how to treat existing artifacts
#[derive(Debug, Clone)]
pub struct PatchConfig {
    /// Directory holding the source archives and the patched image tree
    pub image_dir: PathBuf,
    /// Checkout of the TMOS cloud-init modules
    pub cloudinit_dir: Option<PathBuf>,
    /// Cloud-init configuration template installed into /usr
    pub cloudinit_template: Option<PathBuf>,
    pub usr_inject_dir: Option<PathBuf>,
    pub var_inject_dir: Option<PathBuf>,
    pub shared_inject_dir: Option<PathBuf>,
    pub config_inject_dir: Option<PathBuf>,
    /// iControl LX packages copied into /var
    pub icontrollx_dir: Option<PathBuf>,
    /// PEM private key used to sign patched images
    pub private_key: Option<PathBuf>,
    /// Re-patch images that already carry a checksum sidecar
    pub overwrite: bool,
    /// Run `git pull` in the cloud-init checkout first
    pub update_cloudinit: bool,
}

impl PatchConfig {
    pub fn from_loader(loader: &ConfigLoader) -> Result<Self> {
        let mut missing = Vec::new();
        let image_dir = image_dir(loader, &mut missing)?;
        check_missing(missing)?;

        let private_key = match loader.get("PRIVATE_PEM_KEY_FILE") {
            Some(file) => {
                let key = loader.path_or("PRIVATE_PEM_KEY_PATH", "/keys")?.join(file);
                if key.exists() {
                    Some(key)
                } else {
                    warn!("private key {} not found, images will not be signed", key.display());
                    None
                }
            }
            None => None,
        };

        Ok(Self {
            image_dir,
            cloudinit_dir: Some(loader.path_or("TMOS_CLOUDINIT_DIR", "/tmos-cloudinit")?),
            cloudinit_template: loader.path("TMOS_CLOUDINIT_CONFIG_TEMPLATE")?,
            usr_inject_dir: loader.path("TMOS_USR_INJECT_DIR")?,
            var_inject_dir: loader.path("TMOS_VAR_INJECT_DIR")?,
            shared_inject_dir: loader.path("TMOS_SHARED_INJECT_DIR")?,
            config_inject_dir: loader.path("TMOS_CONFIG_INJECT_DIR")?,
            icontrollx_dir: Some(loader.path_or("TMOS_ICONTROLLX_DIR", "/icontrollx_installs")?),
            private_key,
            overwrite: loader.flag("IMAGE_OVERWRITE", false)?,
            update_cloudinit: loader.flag("UPDATE_CLOUDINIT", true)?,
        })
    }

    /// Log which sources will be injected
    pub fn log_summary(&self) {
        info!("Scanning for images in: {}", self.image_dir.display());
        let sources = [
            ("TMOS cloudinit modules sourced from", &self.cloudinit_dir),
            ("cloudinit configuration template", &self.cloudinit_template),
            ("Patching TMOS /usr file system from", &self.usr_inject_dir),
            ("Patching TMOS /var file system from", &self.var_inject_dir),
            ("Patching TMOS /shared file system from", &self.shared_inject_dir),
            ("Patching TMOS /config file system from", &self.config_inject_dir),
            ("Copying iControl LX install packages from", &self.icontrollx_dir),
        ];
        for (label, path) in sources {
            if let Some(path) = path {
                info!("{}: {}", label, path.display());
            }
        }
        if self.overwrite {
            info!("force overwrite of existing patch file artifacts");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_patch_config_requires_image_dir() {
        assert!(PatchConfig::from_loader(&ConfigLoader::empty()).is_err());
    }

    #[test]
    fn test_private_key_only_when_present() {
        let keys = TempDir::new().unwrap();
        std::fs::write(keys.path().join("signing.pem"), "not really a key").unwrap();

        let mut loader = ConfigLoader::empty();
        loader.set_env_var("TMOS_IMAGE_DIR", "/TMOSImages");
        loader.set_env_var("PRIVATE_PEM_KEY_PATH", keys.path().to_string_lossy().to_string());
        loader.set_env_var("PRIVATE_PEM_KEY_FILE", "signing.pem");
        let config = PatchConfig::from_loader(&loader).unwrap();
        assert_eq!(config.private_key, Some(keys.path().join("signing.pem")));

        loader.set_env_var("PRIVATE_PEM_KEY_FILE", "absent.pem");
        let config = PatchConfig::from_loader(&loader).unwrap();
        assert!(config.private_key.is_none());
    }

    #[test]
    fn test_overwrite_accepts_numeric_flag() {
        let mut loader = ConfigLoader::empty();
        loader.set_env_var("TMOS_IMAGE_DIR", "/TMOSImages");
        loader.set_env_var("IMAGE_OVERWRITE", "1");

        let config = PatchConfig::from_loader(&loader).unwrap();
        assert!(config.overwrite);
        assert!(config.update_cloudinit);
        assert_eq!(config.icontrollx_dir, Some(PathBuf::from("/icontrollx_installs")));
    }
}
