// file: src/image/guestfish.rs
// version: 1.0.0
// guid: 9e4b7c21-58d3-4f0a-b6e2-d17a3c5f8e90

//! libguestfs access to TMOS disk images

use crate::error::ImageSyncError;
use crate::Result;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// A file copied from the local host into a guest filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Injection {
    pub local: PathBuf,
    /// Absolute path inside the mounted partition
    pub guest: String,
}

/// Operations the patcher needs from a disk image toolkit
#[async_trait::async_trait]
pub trait GuestTool: Send + Sync {
    /// Device names of every filesystem in the image
    async fn list_filesystems(&self, image: &Path) -> Result<Vec<String>>;

    /// Entries of a directory on one partition, read-only
    async fn list_dir(&self, image: &Path, device: &str, dir: &str) -> Result<Vec<String>>;

    /// Copy files into one partition
    async fn inject(&self, image: &Path, device: &str, files: &[Injection]) -> Result<()>;
}

/// [`GuestTool`] backed by the `guestfish` shell
#[derive(Debug, Clone)]
pub struct Guestfish {
    binary: PathBuf,
}

impl Guestfish {
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("guestfish"),
        }
    }

    async fn run_readonly(&self, image: &Path, commands: &[&str]) -> Result<String> {
        let mut args = vec![
            "--ro".to_string(),
            "-a".to_string(),
            image.to_string_lossy().to_string(),
            "run".to_string(),
        ];
        for command in commands {
            args.push(":".to_string());
            args.extend(command.split_whitespace().map(str::to_string));
        }

        let output = Command::new(&self.binary)
            .args(&args)
            .output()
            .await
            .map_err(|e| ImageSyncError::patch(format!("Failed to start guestfish: {}", e)))?;

        if !output.status.success() {
            return Err(ImageSyncError::patch(format!(
                "guestfish failed on {}: {}",
                image.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl Default for Guestfish {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl GuestTool for Guestfish {
    async fn list_filesystems(&self, image: &Path) -> Result<Vec<String>> {
        let output = self.run_readonly(image, &["list-filesystems"]).await?;
        Ok(parse_filesystems(&output))
    }

    async fn list_dir(&self, image: &Path, device: &str, dir: &str) -> Result<Vec<String>> {
        let mount = format!("mount-ro {} /", device);
        let ls = format!("ls {}", dir);
        let output = self.run_readonly(image, &[&mount, &ls]).await?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn inject(&self, image: &Path, device: &str, files: &[Injection]) -> Result<()> {
        let script = injection_script(image, device, files);
        debug!("guestfish script for {}:\n{}", image.display(), script);

        let mut child = Command::new(&self.binary)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ImageSyncError::patch(format!("Failed to start guestfish: {}", e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(script.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(ImageSyncError::patch(format!(
                "injecting into {} on {} failed: {}",
                device,
                image.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(())
    }
}

/// `device: fstype` lines from `list-filesystems` reduced to device names
pub fn parse_filesystems(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split(':').next())
        .map(str::trim)
        .filter(|device| !device.is_empty())
        .map(str::to_string)
        .collect()
}

/// One guestfish session mounting `device` and uploading every file
pub fn injection_script(image: &Path, device: &str, files: &[Injection]) -> String {
    let mut script = String::new();
    script.push_str(&format!("add {}\n", quote(&image.to_string_lossy())));
    script.push_str("run\n");
    script.push_str(&format!("mount {} /\n", device));

    for file in files {
        let parent = match file.guest.rfind('/') {
            Some(0) | None => "/",
            Some(idx) => &file.guest[..idx],
        };
        script.push_str(&format!("mkdir-p {}\n", quote(parent)));
        script.push_str(&format!(
            "upload {} {}\n",
            quote(&file.local.to_string_lossy()),
            quote(&file.guest)
        ));
    }

    script.push_str("sync\n");
    script.push_str("umount-all\n");
    script
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_filesystems() {
        let output = "/dev/vg-db-vda/dat.log.1: xfs\n\
                      /dev/vg-db-vda/set.1._config: ext3\n\
                      /dev/vg-db-vda/set.1._usr: ext3\n\
                      /dev/vg-db-vda/set.1._var: ext3\n\
                      /dev/vg-db-vda/dat.share.1: ext4\n\n";

        let devices = parse_filesystems(output);
        assert_eq!(devices.len(), 5);
        assert_eq!(devices[1], "/dev/vg-db-vda/set.1._config");
    }

    #[test]
    fn test_injection_script() {
        let files = vec![
            Injection {
                local: PathBuf::from("/inject/usr/lib/foo.py"),
                guest: "/lib/python2.7/foo.py".to_string(),
            },
            Injection {
                local: PathBuf::from("/inject/usr/top"),
                guest: "/top".to_string(),
            },
        ];

        let script = injection_script(
            Path::new("/TMOSImages/BIGIP/BIGIP.qcow2"),
            "/dev/vg-db-vda/set.1._usr",
            &files,
        );

        assert_eq!(
            script,
            "add \"/TMOSImages/BIGIP/BIGIP.qcow2\"\n\
             run\n\
             mount /dev/vg-db-vda/set.1._usr /\n\
             mkdir-p \"/lib/python2.7\"\n\
             upload \"/inject/usr/lib/foo.py\" \"/lib/python2.7/foo.py\"\n\
             mkdir-p \"/\"\n\
             upload \"/inject/usr/top\" \"/top\"\n\
             sync\n\
             umount-all\n"
        );
    }
}
