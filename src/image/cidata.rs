// file: src/image/cidata.rs
// version: 1.0.0
// guid: 3f8a2c61-d47e-4b19-8a05-c6e91b2d7f34

//! NoCloud config drive builder
//!
//! Produces an ISO9660 volume labelled `cidata` holding `user-data` and
//! `meta-data`, plus `vendor-data` and `network-config` when supplied.
//! Declarations found on disk are used verbatim; otherwise defaults are
//! rendered from the hostname, instance id and SSH public key.

use crate::config::CidataConfig;
use crate::error::ImageSyncError;
use crate::utils::SystemUtils;
use crate::Result;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Volume label cloud-init looks for
pub const CIDATA_VOLUME_ID: &str = "cidata";

/// ISO authoring tools, in order of preference
const ISO_TOOLS: &[&str] = &["genisoimage", "mkisofs"];

/// File contents placed on the config drive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CidataContents {
    pub user_data: String,
    pub meta_data: String,
    pub vendor_data: Option<String>,
    pub network_config: Option<String>,
}

#[derive(Serialize)]
struct DefaultUserData {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    ssh_authorized_keys: Vec<String>,
}

#[derive(Serialize)]
struct DefaultMetaData<'a> {
    #[serde(rename = "instance-id")]
    instance_id: &'a str,
    #[serde(rename = "local-hostname")]
    local_hostname: &'a str,
}

/// Builds cidata ISOs from a [`CidataConfig`]
pub struct CidataBuilder {
    config: CidataConfig,
    tool: Option<PathBuf>,
}

impl CidataBuilder {
    pub fn new(config: CidataConfig) -> Self {
        Self { config, tool: None }
    }

    /// Use a specific ISO authoring binary instead of searching PATH
    pub fn with_tool(mut self, tool: impl Into<PathBuf>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    /// Gather the drive contents from declarations or defaults
    pub async fn contents(&self) -> Result<CidataContents> {
        let user_data = match read_optional(&self.config.userdata_file).await? {
            Some(data) => {
                info!("using user-data from {}", self.config.userdata_file.display());
                data
            }
            None => {
                let key = read_optional(&self.config.ssh_pubkey_file).await?;
                if key.is_some() {
                    info!("injecting SSH key from {}", self.config.ssh_pubkey_file.display());
                }
                render_user_data(key.as_deref())?
            }
        };

        let meta_data = match read_optional(&self.config.metadata_file).await? {
            Some(data) => {
                info!("using meta-data from {}", self.config.metadata_file.display());
                data
            }
            None => {
                info!(
                    "rendering meta-data for {} ({})",
                    self.config.hostname, self.config.instance_id
                );
                render_meta_data(&self.config.instance_id, &self.config.hostname)?
            }
        };

        let vendor_data = read_optional(&self.config.vendordata_file).await?;
        if vendor_data.is_some() {
            info!("using vendor-data from {}", self.config.vendordata_file.display());
        }

        let network_config = read_optional(&self.config.network_config_file).await?;
        if network_config.is_some() {
            info!(
                "using network-config from {}",
                self.config.network_config_file.display()
            );
        }

        Ok(CidataContents {
            user_data,
            meta_data,
            vendor_data,
            network_config,
        })
    }

    /// Write the ISO; a partial output is removed on failure
    pub async fn build(&self) -> Result<PathBuf> {
        let contents = self.contents().await?;
        let tool = self.iso_tool()?;
        let output = self.config.output.clone();

        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let staging = tempfile::tempdir()?;
        let files = stage(staging.path(), &contents).await?;

        match run_iso_tool(&tool, &output, &files).await {
            Ok(()) => {
                info!("wrote {}", output.display());
                Ok(output)
            }
            Err(e) => {
                if let Err(remove_err) = tokio::fs::remove_file(&output).await {
                    if remove_err.kind() != std::io::ErrorKind::NotFound {
                        warn!("could not remove {}: {}", output.display(), remove_err);
                    }
                }
                Err(e)
            }
        }
    }

    fn iso_tool(&self) -> Result<PathBuf> {
        if let Some(tool) = &self.tool {
            return Ok(tool.clone());
        }
        ISO_TOOLS
            .iter()
            .find_map(|name| SystemUtils::find_command(name))
            .ok_or_else(|| {
                ImageSyncError::image(format!(
                    "None of {} found; install genisoimage",
                    ISO_TOOLS.join(", ")
                ))
            })
    }
}

/// Default user-data, authorizing `ssh_key` when one is given
pub fn render_user_data(ssh_key: Option<&str>) -> Result<String> {
    let doc = DefaultUserData {
        ssh_authorized_keys: ssh_key
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(|key| vec![key.to_string()])
            .unwrap_or_default(),
    };
    if doc.ssh_authorized_keys.is_empty() {
        return Ok("#cloud-config\n".to_string());
    }
    Ok(format!("#cloud-config\n{}", serde_yaml::to_string(&doc)?))
}

/// Default meta-data
pub fn render_meta_data(instance_id: &str, hostname: &str) -> Result<String> {
    Ok(serde_yaml::to_string(&DefaultMetaData {
        instance_id,
        local_hostname: hostname,
    })?)
}

async fn read_optional(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn stage(dir: &Path, contents: &CidataContents) -> Result<Vec<PathBuf>> {
    let mut entries = vec![
        ("user-data", contents.user_data.as_str()),
        ("meta-data", contents.meta_data.as_str()),
    ];
    if let Some(vendor) = &contents.vendor_data {
        entries.push(("vendor-data", vendor.as_str()));
    }
    if let Some(network) = &contents.network_config {
        entries.push(("network-config", network.as_str()));
    }

    let mut files = Vec::with_capacity(entries.len());
    for (name, data) in entries {
        let path = dir.join(name);
        tokio::fs::write(&path, data).await?;
        files.push(path);
    }
    Ok(files)
}

async fn run_iso_tool(tool: &Path, output: &Path, files: &[PathBuf]) -> Result<()> {
    debug!("building {} with {}", output.display(), tool.display());

    let result = Command::new(tool)
        .arg("-output")
        .arg(output)
        .args(["-volid", CIDATA_VOLUME_ID, "-joliet", "-rock"])
        .args(files)
        .output()
        .await
        .map_err(|e| {
            ImageSyncError::image(format!("Failed to start {}: {}", tool.display(), e))
        })?;

    if !result.status.success() {
        return Err(ImageSyncError::image(format!(
            "{} failed: {}",
            tool.display(),
            String::from_utf8_lossy(&result.stderr).trim()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_in(dir: &Path) -> CidataConfig {
        CidataConfig {
            userdata_file: dir.join("user-data"),
            metadata_file: dir.join("meta-data"),
            vendordata_file: dir.join("vendor-data"),
            network_config_file: dir.join("network-config"),
            ssh_pubkey_file: dir.join("id_rsa.pub"),
            hostname: "bigip1.example.com".to_string(),
            instance_id: "i-0001".to_string(),
            output: dir.join("out").join("cidata.iso"),
        }
    }

    #[cfg(unix)]
    fn script(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-genisoimage");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_render_user_data_with_key() {
        let data = render_user_data(Some("ssh-rsa AAAA user@host\n")).unwrap();
        assert!(data.starts_with("#cloud-config\n"));

        let doc: serde_yaml::Value = serde_yaml::from_str(&data).unwrap();
        assert_eq!(doc["ssh_authorized_keys"][0], "ssh-rsa AAAA user@host");
    }

    #[test]
    fn test_render_user_data_without_key() {
        assert_eq!(render_user_data(None).unwrap(), "#cloud-config\n");
        assert_eq!(render_user_data(Some("  \n")).unwrap(), "#cloud-config\n");
    }

    #[test]
    fn test_render_meta_data() {
        let data = render_meta_data("i-0001", "bigip1.example.com").unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&data).unwrap();
        assert_eq!(doc["instance-id"], "i-0001");
        assert_eq!(doc["local-hostname"], "bigip1.example.com");
    }

    #[tokio::test]
    async fn test_declarations_take_precedence() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("user-data"), "#cloud-config\ntmos_declared: {}\n").unwrap();
        std::fs::write(dir.path().join("id_rsa.pub"), "ssh-rsa AAAA").unwrap();
        std::fs::write(dir.path().join("vendor-data"), "#cloud-config\n").unwrap();
        std::fs::write(dir.path().join("network-config"), "version: 2\n").unwrap();

        let contents = CidataBuilder::new(config_in(dir.path())).contents().await.unwrap();

        assert_eq!(contents.user_data, "#cloud-config\ntmos_declared: {}\n");
        assert!(contents.meta_data.contains("instance-id: i-0001"));
        assert_eq!(contents.vendor_data.as_deref(), Some("#cloud-config\n"));
        assert_eq!(contents.network_config.as_deref(), Some("version: 2\n"));
    }

    #[tokio::test]
    async fn test_defaults_rendered_without_declarations() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("id_rsa.pub"), "ssh-ed25519 BBBB admin\n").unwrap();

        let contents = CidataBuilder::new(config_in(dir.path())).contents().await.unwrap();

        assert!(contents.user_data.contains("ssh-ed25519 BBBB admin"));
        assert!(contents.meta_data.contains("local-hostname: bigip1.example.com"));
        assert_eq!(contents.vendor_data, None);
        assert_eq!(contents.network_config, None);
    }

    #[tokio::test]
    async fn test_missing_tool_fails_without_output() {
        let dir = TempDir::new().unwrap();
        let config = config_in(dir.path());
        let output = config.output.clone();

        let err = CidataBuilder::new(config)
            .with_tool(dir.path().join("no-such-tool"))
            .build()
            .await
            .unwrap_err();

        assert!(matches!(err, ImageSyncError::ImageError(_)));
        assert!(!output.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_build_passes_staged_files_to_tool() {
        let dir = TempDir::new().unwrap();
        let args_file = dir.path().join("args");
        let tool = script(
            dir.path(),
            &format!("echo \"$@\" > {}\ntouch \"$2\"", args_file.display()),
        );

        let output = CidataBuilder::new(config_in(dir.path()))
            .with_tool(tool)
            .build()
            .await
            .unwrap();

        assert!(output.exists());
        let args = std::fs::read_to_string(args_file).unwrap();
        assert!(args.contains("-volid cidata -joliet -rock"));
        assert!(args.contains("/user-data"));
        assert!(args.contains("/meta-data"));
        assert!(!args.contains("/vendor-data"));
        assert!(!args.contains("/network-config"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_build_removes_partial_iso() {
        let dir = TempDir::new().unwrap();
        let tool = script(dir.path(), "touch \"$2\"\necho 'bad volume' >&2\nexit 1");
        let config = config_in(dir.path());
        let output = config.output.clone();

        let err = CidataBuilder::new(config)
            .with_tool(tool)
            .build()
            .await
            .unwrap_err();

        assert!(err.to_string().contains("bad volume"));
        assert!(!output.exists());
    }
}
