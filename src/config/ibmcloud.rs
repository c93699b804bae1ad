// file: src/config/ibmcloud.rs
// version: 1.0.0
// guid: 2a3af357-150b-4e12-8601-63ef81e0215e

//! IBM Cloud (IAM, COS, VPC) configuration structures

use super::loader::{check_missing, ConfigLoader};
use super::{image_dir, PatchConfig, DEFAULT_AUTH_ENDPOINT, DEFAULT_BUCKET_PREFIX};
use crate::image::naming;
use crate::Result;
use std::path::PathBuf;
use std::time::Duration;

/// Public catalog published by F5 for VPC imports
pub const DEFAULT_CATALOG_URL: &str =
    "https://f5-image-catalog-us-south.s3.us-south.cloud-object-storage.appdomain.cloud/f5-image-catalog.json";

/// COS endpoint; `{region}` is replaced per request
pub const DEFAULT_COS_ENDPOINT_TEMPLATE: &str =
    "https://s3.{region}.cloud-object-storage.appdomain.cloud";

/// Regional VPC API base; `{region}` is replaced per request
pub const DEFAULT_VPC_ENDPOINT_TEMPLATE: &str = "https://{region}.iaas.cloud.ibm.com/v1";

/// VPC images this tool creates from local disk images start with this
pub const DEFAULT_VPC_IMAGE_MATCH: &str = "^bigip";

/// Catalog imports accept any name starting with a letter
pub const DEFAULT_IMPORT_IMAGE_MATCH: &str = "^[a-zA-Z]";

/// API key and token endpoint for IAM
#[derive(Debug, Clone)]
pub struct IbmAuthConfig {
    pub api_key: String,
    pub auth_endpoint: String,
}

/// COS bucket sync settings
#[derive(Debug, Clone)]
pub struct CosConfig {
    /// Root of the patched image tree
    pub image_dir: PathBuf,
    pub auth: IbmAuthConfig,
    /// CRN of the COS service instance
    pub resource_crn: String,
    /// Regions (COS locations) to mirror into
    pub regions: Vec<String>,
    /// Prefix of every managed bucket
    pub bucket_prefix: String,
    /// Endpoint URL template containing `{region}`
    pub endpoint_template: String,
    /// Publish an inventory catalog after syncing
    pub inventory: bool,
    /// VPC access used to fill in image ids in the inventory
    pub inventory_vpc: VpcApiConfig,
}

impl CosConfig {
    pub fn from_loader(loader: &ConfigLoader) -> Result<Self> {
        let mut missing = Vec::new();
        let image_dir = image_dir(loader, &mut missing)?;
        let api_key = loader.require("COS_API_KEY", "for your IBM COS resource", &mut missing);
        let resource_crn =
            loader.require("COS_RESOURCE_CRN", "for your IBM COS resource", &mut missing);
        check_missing(missing)?;

        let endpoint_template = region_template(
            loader,
            "COS_ENDPOINT_TEMPLATE",
            DEFAULT_COS_ENDPOINT_TEMPLATE,
        )?;
        let auth_endpoint = loader
            .first_of(&["COS_AUTH_ENDPOINT", "AUTH_ENDPOINT"])
            .unwrap_or(DEFAULT_AUTH_ENDPOINT)
            .to_string();

        // the COS key also reads VPC images unless an account key is given
        let vpc_key = loader
            .first_of(&["IC_API_KEY", "API_KEY"])
            .unwrap_or(api_key.as_str())
            .to_string();
        let inventory_vpc = VpcApiConfig::from_loader(loader, vpc_key)?;

        let regions = loader.list("COS_IMAGE_LOCATION", "us-south");
        let bucket_prefix = loader.get_or("COS_BUCKET_PREFIX", DEFAULT_BUCKET_PREFIX);
        if let Some(region) = regions
            .iter()
            .find(|region| !naming::bucket_prefix_fits(&bucket_prefix, region))
        {
            return Err(crate::error::ImageSyncError::config(format!(
                "COS_BUCKET_PREFIX {} leaves no room for image names in {} buckets",
                bucket_prefix, region
            )));
        }

        Ok(Self {
            image_dir,
            auth: IbmAuthConfig {
                api_key,
                auth_endpoint,
            },
            resource_crn,
            regions,
            bucket_prefix,
            endpoint_template,
            inventory: loader.flag("INVENTORY", true)?,
            inventory_vpc,
        })
    }
}

/// How to reach the regional VPC APIs
#[derive(Debug, Clone)]
pub struct VpcApiConfig {
    pub auth: IbmAuthConfig,
    /// `version=` query parameter sent on every VPC call
    pub api_version: String,
    /// API base containing `{region}`
    pub endpoint_template: String,
}

impl VpcApiConfig {
    pub fn from_loader(loader: &ConfigLoader, api_key: String) -> Result<Self> {
        Ok(Self {
            auth: IbmAuthConfig {
                api_key,
                auth_endpoint: loader.get_or("AUTH_ENDPOINT", DEFAULT_AUTH_ENDPOINT),
            },
            api_version: loader.get_or("VPC_API_VERSION", "2021-09-28"),
            endpoint_template: region_template(
                loader,
                "VPC_ENDPOINT_TEMPLATE",
                DEFAULT_VPC_ENDPOINT_TEMPLATE,
            )?,
        })
    }
}

/// VPC image service settings
#[derive(Debug, Clone)]
pub struct VpcConfig {
    pub api: VpcApiConfig,
    /// Regions whose image catalogs are reconciled
    pub regions: Vec<String>,
    /// Regex selecting the images this tool may create or delete
    pub image_match: String,
    /// Operating system name given to imported images
    pub operating_system: String,
    /// Pause between making an image private and deleting it
    pub status_pause: Duration,
    /// How long to wait for an imported image to become available
    pub available_timeout: Duration,
}

impl VpcConfig {
    pub fn from_loader(loader: &ConfigLoader, default_match: &str) -> Result<Self> {
        let mut missing = Vec::new();
        let api_key = match loader.first_of(&["IC_API_KEY", "API_KEY"]) {
            Some(key) => key.to_string(),
            None => {
                missing.push("please set env IC_API_KEY for your IBM Cloud account".to_string());
                String::new()
            }
        };
        check_missing(missing)?;

        let image_match = loader.get_or("IMAGE_MATCH", default_match);
        regex::Regex::new(&image_match)?;

        Ok(Self {
            api: VpcApiConfig::from_loader(loader, api_key)?,
            regions: loader.list("REGION", "us-south"),
            image_match,
            operating_system: loader.get_or("VPC_OPERATING_SYSTEM", "centos-7-amd64"),
            status_pause: Duration::from_secs(loader.number("IMAGE_STATUS_PAUSE_SECONDS", 5)?),
            available_timeout: Duration::from_secs(loader.number("IMAGE_AVAILABLE_TIMEOUT", 3600)?),
        })
    }
}

/// Endpoint template setting that must contain `{region}`
fn region_template(loader: &ConfigLoader, key: &str, default: &str) -> Result<String> {
    let template = loader.get_or(key, default);
    if !template.contains("{region}") {
        return Err(crate::error::ImageSyncError::config(format!(
            "{} must contain {{region}}",
            key
        )));
    }
    Ok(template)
}

/// Import of a published image catalog into VPC
#[derive(Debug, Clone)]
pub struct CatalogImportConfig {
    pub vpc: VpcConfig,
    pub catalog_url: String,
    /// Delete every matching image instead of importing
    pub delete_all: bool,
}

impl CatalogImportConfig {
    pub fn from_loader(loader: &ConfigLoader) -> Result<Self> {
        Ok(Self {
            vpc: VpcConfig::from_loader(loader, DEFAULT_IMPORT_IMAGE_MATCH)?,
            catalog_url: loader.get_or("TMOS_IMAGE_CATALOG_URL", DEFAULT_CATALOG_URL),
            delete_all: loader.flag("DELETE_ALL", false)?,
        })
    }
}

/// End-to-end pipeline: patch, upload through a transient COS instance, import
#[derive(Debug, Clone)]
pub struct ImagerConfig {
    pub vpc: VpcConfig,
    pub patch: PatchConfig,
    /// Delete every managed VPC image and stop
    pub delete_all: bool,
    /// Delete VPC images that have no local disk image
    pub delete_vpc_image: bool,
}

impl ImagerConfig {
    pub fn from_loader(loader: &ConfigLoader) -> Result<Self> {
        Ok(Self {
            vpc: VpcConfig::from_loader(loader, DEFAULT_VPC_IMAGE_MATCH)?,
            patch: PatchConfig::from_loader(loader)?,
            delete_all: loader.flag("DELETE_ALL", false)?,
            delete_vpc_image: loader.flag("DELETE_VPC_IMAGE", true)?,
        })
    }
}
