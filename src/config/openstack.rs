// file: src/config/openstack.rs
// version: 1.0.0
// guid: b9752b11-c86b-40a6-9cd7-9d7f25d61855

//! OpenStack Keystone/Glance configuration structures

use super::image_dir;
use super::loader::{check_missing, ConfigLoader};
use crate::Result;
use std::path::PathBuf;

/// Glance upload settings
#[derive(Debug, Clone)]
pub struct GlanceConfig {
    /// Root of the patched image tree
    pub image_dir: PathBuf,
    /// Keystone endpoint, e.g. `https://keystone:5000/v3`
    pub auth_url: String,
    pub username: String,
    pub password: String,
    pub project_name: String,
    pub project_domain: String,
    pub user_domain: String,
    /// Visibility given to uploaded images
    pub visibility: String,
    /// Region used to pick the image endpoint from the service catalog
    pub region: String,
    /// Explicit image endpoint, bypassing catalog discovery
    pub image_endpoint: Option<String>,
    /// Delete every managed image and stop
    pub delete_all: bool,
}

impl GlanceConfig {
    pub fn from_loader(loader: &ConfigLoader) -> Result<Self> {
        let mut missing = Vec::new();
        let image_dir = image_dir(loader, &mut missing)?;
        let username = loader.require("OS_USERNAME", "to your OpenStack username", &mut missing);
        let password = loader.require("OS_PASSWORD", "to your OpenStack password", &mut missing);
        let auth_url = loader.require(
            "OS_AUTH_URL",
            "to your OpenStack Keystone endpoint URL",
            &mut missing,
        );
        check_missing(missing)?;

        let visibility = loader.get_or("OS_IMAGE_VISIBILITY", "public");
        if !matches!(visibility.as_str(), "public" | "private" | "shared" | "community") {
            return Err(crate::error::ImageSyncError::config(format!(
                "OS_IMAGE_VISIBILITY must be public, private, shared or community, got '{}'",
                visibility
            )));
        }

        Ok(Self {
            image_dir,
            auth_url,
            username,
            password,
            project_name: loader.get_or("OS_PROJECT_NAME", "admin"),
            project_domain: loader.get_or("OS_PROJECT_DOMAIN_NAME", "default"),
            user_domain: loader.get_or("OS_USER_DOMAIN_NAME", "default"),
            visibility,
            region: loader.get_or("OS_REGION_NAME", "RegionOne"),
            image_endpoint: loader.get("OS_IMAGE_ENDPOINT").map(str::to_string),
            delete_all: loader.flag("DELETE_ALL", false)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glance_config_missing_credentials() {
        let mut loader = ConfigLoader::empty();
        loader.set_env_var("TMOS_IMAGE_DIR", "/TMOSImages");

        let message = GlanceConfig::from_loader(&loader).unwrap_err().to_string();
        assert!(message.contains("OS_USERNAME"));
        assert!(message.contains("OS_PASSWORD"));
        assert!(message.contains("OS_AUTH_URL"));
        assert!(!message.contains("TMOS_IMAGE_DIR"));
    }

    #[test]
    fn test_glance_config_defaults() {
        let mut loader = ConfigLoader::empty();
        loader.set_env_var("TMOS_IMAGE_DIR", "/TMOSImages");
        loader.set_env_var("OS_USERNAME", "admin");
        loader.set_env_var("OS_PASSWORD", "secret");
        loader.set_env_var("OS_AUTH_URL", "https://keystone:5000/v3");

        let config = GlanceConfig::from_loader(&loader).unwrap();
        assert_eq!(config.project_name, "admin");
        assert_eq!(config.visibility, "public");
        assert_eq!(config.region, "RegionOne");
        assert!(config.image_endpoint.is_none());
    }
}
