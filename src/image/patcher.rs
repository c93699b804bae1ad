// file: src/image/patcher.rs
// version: 1.0.0
// guid: c4a8e2f6-0b3d-4e71-9f25-7d6a1b8c3e42

//! TMOS disk image patcher
//!
//! Source archives placed in the image root are unpacked into a working
//! directory named after the archive. Every disk image found there is
//! checked for TMOS partitions, files are injected per partition, and the
//! checksum, signature and manifest sidecars are written next to it.

use super::checksum::{sign_image, write_md5_sidecar};
use super::guestfish::{GuestTool, Guestfish, Injection};
use super::{sidecar_path, DiskFormat, MANIFEST_SUFFIX, MD5_SUFFIX};
use crate::config::PatchConfig;
use crate::error::ImageSyncError;
use crate::Result;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Archive formats unpacked into a working directory
const ZIP_EXT: &str = "zip";
const OVA_EXT: &str = "ova";

const CLOUDINIT_PATCH_DIR: &str = "image_patch_files/system_python_path";
const CLOUDINIT_TEMPLATE_DIR: &str = "/share/defaults/config/templates";
const ICONTROLLX_GUEST_DIR: &str = "/lib/cloud/icontrollx_installs";

/// TMOS partitions files can be injected into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    Usr,
    Var,
    Shared,
    Config,
}

impl Partition {
    /// Mount point of the partition on a running TMOS system
    pub fn mount_point(&self) -> &'static str {
        match self {
            Partition::Usr => "/usr",
            Partition::Var => "/var",
            Partition::Shared => "/shared",
            Partition::Config => "/config",
        }
    }
}

/// Devices of the TMOS partitions found in a disk image
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TmosFilesystems {
    pub config: Option<String>,
    pub usr: Option<String>,
    pub var: Option<String>,
    pub shared: Option<String>,
}

impl TmosFilesystems {
    /// Classify filesystem devices by their TMOS volume names
    pub fn classify(devices: &[String]) -> Self {
        let mut found = Self::default();
        for device in devices {
            if device.contains("_config") {
                found.config = Some(device.clone());
            }
            if device.contains("_usr") {
                found.usr = Some(device.clone());
            }
            if device.contains("_var") {
                found.var = Some(device.clone());
            }
            if device.contains("share") {
                found.shared = Some(device.clone());
            }
        }
        found
    }

    /// Only images with a config volume are TMOS images
    pub fn is_tmos(&self) -> bool {
        self.config.is_some()
    }

    pub fn device(&self, partition: Partition) -> Option<&str> {
        match partition {
            Partition::Usr => self.usr.as_deref(),
            Partition::Var => self.var.as_deref(),
            Partition::Shared => self.shared.as_deref(),
            Partition::Config => self.config.as_deref(),
        }
    }
}

/// Outcome of one patch run
#[derive(Debug, Default)]
pub struct PatchSummary {
    pub patched: Vec<PathBuf>,
    /// Images without TMOS partitions; sidecars are still written
    pub not_tmos: Vec<PathBuf>,
    pub skipped_dirs: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

impl PatchSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Disk image patcher
pub struct ImagePatcher {
    config: PatchConfig,
    tool: Box<dyn GuestTool>,
}

impl ImagePatcher {
    /// Create a patcher driving `guestfish`
    pub fn new(config: PatchConfig) -> Self {
        Self::with_tool(config, Box::new(Guestfish::new()))
    }

    pub fn with_tool(config: PatchConfig, tool: Box<dyn GuestTool>) -> Self {
        Self { config, tool }
    }

    /// Unpack new archives and patch every resulting image
    pub async fn run(&self) -> Result<PatchSummary> {
        let mut summary = PatchSummary::default();
        let images = prepare_images(&self.config.image_dir, self.config.overwrite, &mut summary).await?;

        if images.is_empty() {
            info!("no new images to patch in {}", self.config.image_dir.display());
            return Ok(summary);
        }

        if self.config.update_cloudinit {
            if let Some(dir) = self.config.cloudinit_dir.as_deref().filter(|d| d.is_dir()) {
                update_cloudinit_modules(dir).await;
            }
        }

        for image in images {
            info!("processing disk image: {}", image.display());
            match self.patch_image(&image).await {
                Ok(true) => summary.patched.push(image),
                Ok(false) => summary.not_tmos.push(image),
                Err(e) => {
                    error!("patching {} failed: {}", image.display(), e);
                    summary.failed.push((image, e.to_string()));
                }
            }
        }

        Ok(summary)
    }

    /// Patch one image; returns false when it holds no TMOS partitions
    pub async fn patch_image(&self, image: &Path) -> Result<bool> {
        let devices = self.tool.list_filesystems(image).await?;
        let filesystems = TmosFilesystems::classify(&devices);

        let is_tmos = filesystems.is_tmos();
        if is_tmos {
            let manifest = sidecar_path(image, MANIFEST_SUFFIX);
            if manifest.exists() {
                info!("deleting previous manifest file {}", manifest.display());
                fs::remove_file(&manifest).await?;
            }

            for (partition, files) in self.injections(image, &filesystems).await? {
                let Some(device) = filesystems.device(partition) else {
                    continue;
                };
                if files.is_empty() {
                    continue;
                }
                debug!("injecting {} files into {}", files.len(), partition.mount_point());
                self.tool.inject(image, device, &files).await?;
                append_manifest(image, partition, &files).await?;
            }
        } else {
            warn!("{} is not a TMOS image file.. skipping file injection..", image.display());
        }

        write_md5_sidecar(image).await?;
        if let Some(key) = &self.config.private_key {
            if let Err(e) = sign_image(image, key).await {
                error!("could not sign {} with private key {}: {}", image.display(), key.display(), e);
            }
        }

        Ok(is_tmos)
    }

    /// Files to inject grouped by partition, in injection order
    async fn injections(
        &self,
        image: &Path,
        filesystems: &TmosFilesystems,
    ) -> Result<Vec<(Partition, Vec<Injection>)>> {
        let mut usr = Vec::new();

        if let (Some(device), Some(cloudinit)) = (filesystems.usr.as_deref(), &self.config.cloudinit_dir) {
            let modules = cloudinit.join(CLOUDINIT_PATCH_DIR);
            if modules.is_dir() {
                let lib = self.tool.list_dir(image, device, "/lib").await?;
                let python = if lib.iter().any(|entry| entry == "python2.7") {
                    "/lib/python2.7"
                } else {
                    "/lib/python2.6"
                };
                usr.extend(collect_files(&modules, python, false)?);
            }
        }

        if let Some(template) = &self.config.cloudinit_template {
            if template.is_file() {
                usr.push(Injection {
                    local: template.clone(),
                    guest: format!("{}/cloud-init.tmpl", CLOUDINIT_TEMPLATE_DIR),
                });
            } else {
                warn!("cloud-init template {} not found, skipping", template.display());
            }
        }

        if let Some(dir) = &self.config.usr_inject_dir {
            usr.extend(collect_files(dir, "/", false)?);
        }

        let mut var = Vec::new();
        if let Some(dir) = &self.config.var_inject_dir {
            var.extend(collect_files(dir, "/", false)?);
        }
        if let Some(dir) = self.config.icontrollx_dir.as_deref().filter(|d| d.is_dir()) {
            var.extend(collect_files(dir, ICONTROLLX_GUEST_DIR, true)?);
        }

        let shared = match &self.config.shared_inject_dir {
            Some(dir) => collect_files(dir, "/", false)?,
            None => Vec::new(),
        };
        let config = match &self.config.config_inject_dir {
            Some(dir) => collect_files(dir, "/", false)?,
            None => Vec::new(),
        };

        Ok(vec![
            (Partition::Usr, usr),
            (Partition::Var, var),
            (Partition::Shared, shared),
            (Partition::Config, config),
        ])
    }
}

/// Unpack archives and bare images from `root` into working directories.
///
/// Returns the disk images of every working directory that needs patching.
pub async fn prepare_images(
    root: &Path,
    overwrite: bool,
    summary: &mut PatchSummary,
) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(ImageSyncError::config(format!(
            "TMOS image directory {} does not exist",
            root.display()
        )));
    }

    let mut sources = Vec::new();
    let mut entries = fs::read_dir(root).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            sources.push(entry.path());
        }
    }
    sources.sort();

    let mut images = Vec::new();
    for source in sources {
        let ext = source
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        let is_archive = ext == ZIP_EXT || ext == OVA_EXT;
        if !is_archive && DiskFormat::from_path(&source).is_none() {
            continue;
        }

        let Some(stem) = source.file_stem() else {
            continue;
        };
        let work_dir = root.join(stem);

        if work_dir.is_dir() {
            debug!("examining existing patching directory {}", work_dir.display());
            if !overwrite && has_md5_sidecar(&work_dir).await? {
                info!("previous patch artifacts found in {}.. skipping patching.", work_dir.display());
                summary.skipped_dirs.push(work_dir);
                continue;
            }
        } else {
            debug!("creating patching directory {}", work_dir.display());
            fs::create_dir_all(&work_dir).await?;
        }

        match ext.as_str() {
            ZIP_EXT => extract("unzip", &["-o", &path_arg(&source), "-d", &path_arg(&work_dir)]).await?,
            OVA_EXT => extract("tar", &["-xf", &path_arg(&source), "-C", &path_arg(&work_dir)]).await?,
            _ => {
                if let Some(name) = source.file_name() {
                    let target = work_dir.join(name);
                    debug!("copying {} to {}", source.display(), target.display());
                    fs::copy(&source, &target).await?;
                }
            }
        }

        let mut found = Vec::new();
        let mut extracted = fs::read_dir(&work_dir).await?;
        while let Some(entry) = extracted.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_file() && DiskFormat::from_path(&path).is_some() {
                found.push(path);
            }
        }
        found.sort();
        images.extend(found);
    }

    Ok(images)
}

async fn has_md5_sidecar(dir: &Path) -> Result<bool> {
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.path().extension().and_then(|e| e.to_str()) == Some(MD5_SUFFIX) {
            debug!("found previous patching artifact file {}", entry.path().display());
            return Ok(true);
        }
    }
    Ok(false)
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

async fn extract(program: &str, args: &[&str]) -> Result<()> {
    debug!("running {} {}", program, args.join(" "));
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| ImageSyncError::patch(format!("Failed to run {}: {}", program, e)))?;

    if !output.status.success() {
        return Err(ImageSyncError::patch(format!(
            "{} failed: {}",
            program,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

/// Every regular file below `source`, mapped under `guest_root`
pub fn collect_files(source: &Path, guest_root: &str, skip_hidden: bool) -> Result<Vec<Injection>> {
    if !source.is_dir() {
        return Err(ImageSyncError::config(format!(
            "inject directory {} does not exist",
            source.display()
        )));
    }

    let base = guest_root.trim_end_matches('/');
    let mut files = Vec::new();

    for entry in WalkDir::new(source).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(source) else {
            continue;
        };
        let relative = relative.to_string_lossy();
        if skip_hidden && relative.starts_with('.') {
            continue;
        }
        files.push(Injection {
            local: entry.path().to_path_buf(),
            guest: format!("{}/{}", base, relative),
        });
    }

    Ok(files)
}

async fn append_manifest(image: &Path, partition: Partition, files: &[Injection]) -> Result<()> {
    let manifest = sidecar_path(image, MANIFEST_SUFFIX);
    let mut handle = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&manifest)
        .await?;

    for file in files {
        let entry = format!("{}{}", partition.mount_point(), file.guest);
        info!("adding {} to {}", entry, manifest.display());
        handle.write_all(format!("{}\n", entry).as_bytes()).await?;
    }
    handle.flush().await?;
    Ok(())
}

async fn update_cloudinit_modules(dir: &Path) {
    info!("pulling latest cloudinit modules");
    match Command::new("git").arg("pull").current_dir(dir).output().await {
        Ok(output) => debug!("git returned: {}", String::from_utf8_lossy(&output.stdout).trim()),
        Err(e) => warn!("could not update cloudinit modules in {}: {}", dir.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const DEVICES: &[&str] = &[
        "/dev/vg-db-vda/set.1._config",
        "/dev/vg-db-vda/set.1._usr",
        "/dev/vg-db-vda/set.1._var",
        "/dev/vg-db-vda/dat.share.1",
    ];

    struct FakeGuest {
        devices: Vec<String>,
        injected: Mutex<Vec<(String, Vec<Injection>)>>,
    }

    impl FakeGuest {
        fn tmos() -> Self {
            Self {
                devices: DEVICES.iter().map(|d| d.to_string()).collect(),
                injected: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl GuestTool for std::sync::Arc<FakeGuest> {
        async fn list_filesystems(&self, _image: &Path) -> Result<Vec<String>> {
            Ok(self.devices.clone())
        }

        async fn list_dir(&self, _image: &Path, _device: &str, _dir: &str) -> Result<Vec<String>> {
            Ok(vec!["python2.7".to_string(), "firmware".to_string()])
        }

        async fn inject(&self, _image: &Path, device: &str, files: &[Injection]) -> Result<()> {
            self.injected
                .lock()
                .unwrap()
                .push((device.to_string(), files.to_vec()));
            Ok(())
        }
    }

    fn config(root: &Path) -> PatchConfig {
        PatchConfig {
            image_dir: root.to_path_buf(),
            cloudinit_dir: None,
            cloudinit_template: None,
            usr_inject_dir: None,
            var_inject_dir: None,
            shared_inject_dir: None,
            config_inject_dir: None,
            icontrollx_dir: None,
            private_key: None,
            overwrite: false,
            update_cloudinit: false,
        }
    }

    #[test]
    fn test_classify_filesystems() {
        let devices: Vec<String> = DEVICES.iter().map(|d| d.to_string()).collect();
        let found = TmosFilesystems::classify(&devices);
        assert!(found.is_tmos());
        assert_eq!(found.device(Partition::Shared), Some("/dev/vg-db-vda/dat.share.1"));

        let plain = TmosFilesystems::classify(&["/dev/sda1".to_string()]);
        assert!(!plain.is_tmos());
    }

    #[test]
    fn test_collect_files_skips_hidden() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("f5-appsvcs.rpm"), b"rpm").unwrap();
        std::fs::write(dir.path().join(".gitkeep"), b"").unwrap();
        std::fs::write(dir.path().join("nested/b.rpm"), b"rpm").unwrap();

        let files = collect_files(dir.path(), ICONTROLLX_GUEST_DIR, true).unwrap();
        let guests: Vec<_> = files.iter().map(|f| f.guest.as_str()).collect();
        assert_eq!(
            guests,
            vec![
                "/lib/cloud/icontrollx_installs/f5-appsvcs.rpm",
                "/lib/cloud/icontrollx_installs/nested/b.rpm",
            ]
        );

        let all = collect_files(dir.path(), "/", false).unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.iter().any(|f| f.guest == "/.gitkeep"));
    }

    #[tokio::test]
    async fn test_prepare_copies_bare_images_and_skips_patched() {
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("BIGIP-16.0.1.qcow2"), b"disk").unwrap();
        std::fs::write(root.path().join("ibmcos_images.json"), b"{}").unwrap();

        let done = root.path().join("BIGIP-15.1.0");
        std::fs::create_dir(&done).unwrap();
        std::fs::write(done.join("BIGIP-15.1.0.qcow2"), b"disk").unwrap();
        std::fs::write(done.join("BIGIP-15.1.0.qcow2.md5"), b"abc").unwrap();
        std::fs::write(root.path().join("BIGIP-15.1.0.qcow2"), b"disk").unwrap();

        let mut summary = PatchSummary::default();
        let images = prepare_images(root.path(), false, &mut summary).await.unwrap();

        assert_eq!(images, vec![root.path().join("BIGIP-16.0.1/BIGIP-16.0.1.qcow2")]);
        assert_eq!(summary.skipped_dirs, vec![done.clone()]);
        assert!(!root.path().join("ibmcos_images").exists());

        let mut summary = PatchSummary::default();
        let images = prepare_images(root.path(), true, &mut summary).await.unwrap();
        assert_eq!(images.len(), 2);
    }

    #[tokio::test]
    async fn test_patch_image_injects_and_writes_sidecars() {
        let root = TempDir::new().unwrap();
        let image = root.path().join("BIGIP.qcow2");
        std::fs::write(&image, b"disk").unwrap();
        std::fs::write(sidecar_path(&image, MANIFEST_SUFFIX), "/usr/stale\n").unwrap();

        let cloudinit = root.path().join("cloudinit");
        let modules = cloudinit.join(CLOUDINIT_PATCH_DIR).join("cloudinit/config");
        std::fs::create_dir_all(&modules).unwrap();
        std::fs::write(modules.join("cc_tmos.py"), b"# module").unwrap();

        let config_dir = root.path().join("config");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(config_dir.join("startup"), b"#!/bin/sh").unwrap();

        let mut config = config(root.path());
        config.cloudinit_dir = Some(cloudinit);
        config.config_inject_dir = Some(config_dir);

        let guest = std::sync::Arc::new(FakeGuest::tmos());
        let patcher = ImagePatcher::with_tool(config, Box::new(guest.clone()));

        assert!(patcher.patch_image(&image).await.unwrap());

        let injected = guest.injected.lock().unwrap();
        assert_eq!(injected.len(), 2);
        assert_eq!(injected[0].0, "/dev/vg-db-vda/set.1._usr");
        assert_eq!(injected[0].1[0].guest, "/lib/python2.7/cloudinit/config/cc_tmos.py");
        assert_eq!(injected[1].0, "/dev/vg-db-vda/set.1._config");

        let manifest = std::fs::read_to_string(sidecar_path(&image, MANIFEST_SUFFIX)).unwrap();
        assert_eq!(
            manifest,
            "/usr/lib/python2.7/cloudinit/config/cc_tmos.py\n/config/startup\n"
        );
        assert!(sidecar_path(&image, MD5_SUFFIX).exists());
    }

    #[tokio::test]
    async fn test_non_tmos_image_still_gets_checksum() {
        let root = TempDir::new().unwrap();
        let image = root.path().join("ubuntu.qcow2");
        std::fs::write(&image, b"disk").unwrap();

        let guest = std::sync::Arc::new(FakeGuest {
            devices: vec!["/dev/sda1".to_string()],
            injected: Mutex::new(Vec::new()),
        });
        let patcher = ImagePatcher::with_tool(config(root.path()), Box::new(guest.clone()));

        assert!(!patcher.patch_image(&image).await.unwrap());
        assert!(guest.injected.lock().unwrap().is_empty());
        assert!(sidecar_path(&image, MD5_SUFFIX).exists());
    }
}
