// file: src/config/cidata.rs
// version: 1.0.0
// guid: 6c1d8e47-2a93-4b05-9f6e-d3b7a1c05e92

//! NoCloud config drive (cidata ISO) settings

use super::loader::ConfigLoader;
use crate::Result;
use std::path::PathBuf;

/// Inputs and output of the cidata ISO builder
#[derive(Debug, Clone)]
pub struct CidataConfig {
    /// Complete user-data; when absent a default is rendered
    pub userdata_file: PathBuf,
    /// Complete meta-data; when absent a default is rendered
    pub metadata_file: PathBuf,
    /// Optional vendor-data
    pub vendordata_file: PathBuf,
    /// Optional network-config
    pub network_config_file: PathBuf,
    /// Public key placed in the default user-data
    pub ssh_pubkey_file: PathBuf,
    pub hostname: String,
    pub instance_id: String,
    /// Where the ISO is written
    pub output: PathBuf,
}

impl CidataConfig {
    pub fn from_loader(loader: &ConfigLoader) -> Result<Self> {
        Ok(Self {
            userdata_file: loader.path_or("USERDATA_FILE", "/declarations/user-data")?,
            metadata_file: loader.path_or("METADATA_FILE", "/declarations/meta-data")?,
            vendordata_file: loader.path_or("VENDORDATA_FILE", "/declarations/vendor-data")?,
            network_config_file: loader
                .path_or("NETWORK_CONFIG_FILE", "/declarations/network-config")?,
            ssh_pubkey_file: loader.path_or("SSH_PUBKEY_FILE", "/declarations/id_rsa.pub")?,
            hostname: loader
                .first_of(&["CIDATA_HOSTNAME", "HOSTNAME"])
                .unwrap_or("localhost.local")
                .to_string(),
            instance_id: loader
                .get("INSTANCE_ID")
                .map(str::to_string)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            output: loader.path_or("CIDATA_FILE", "/configdrives/cidata.iso")?,
        })
    }
}
