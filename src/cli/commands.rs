// file: src/cli/commands.rs
// version: 2.0.0
// guid: g7h8i9j0-k1l2-3456-7890-123456ghijkl

//! Command implementations for the CLI

use crate::{
    catalog::{self, ImageCatalog},
    cloud::{
        CosBucketStore, CosClient, CosImageSource, GlanceClient, GlanceImageStore,
        IamTokenProvider, ResourceController, TransientCos, VpcClient, VpcImageStore,
    },
    config::{
        ibmcloud::{DEFAULT_COS_ENDPOINT_TEMPLATE, DEFAULT_VPC_IMAGE_MATCH},
        loader::check_missing,
        CatalogImportConfig, CidataConfig, ConfigLoader, CosConfig, GlanceConfig, ImagerConfig,
        MonitorConfig, PatchConfig, SyncOptions, VpcApiConfig, VpcConfig, DEFAULT_BUCKET_PREFIX,
        GLANCE_INVENTORY_FILE,
    },
    error::ImageSyncError,
    image::{naming, CidataBuilder, DiskFormat, ImagePatcher, ImageScanner, LocalImage},
    monitor::Monitor,
    network::http_client,
    sync::{DesiredArtifact, ImageStore, Reconciler, RetryPolicy, SyncPlan, SyncPolicy},
    utils::system::SystemUtils,
    Result,
};
use colored::Colorize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Template installed by the VPC imager when none is configured
const VPC_CLOUDINIT_TEMPLATE: &str =
    "image_patch_files/cloudinit_configs/ibmcloud_vpc_gen2/cloud-init.tmpl";

/// Patch every new image under TMOS_IMAGE_DIR
pub async fn patch_command(loader: &ConfigLoader) -> Result<()> {
    let config = PatchConfig::from_loader(loader)?;
    run_patcher(config).await
}

async fn run_patcher(config: PatchConfig) -> Result<()> {
    config.log_summary();
    let summary = ImagePatcher::new(config).run().await?;

    info!(
        "patched {} images, {} without TMOS partitions, {} already patched",
        summary.patched.len(),
        summary.not_tmos.len(),
        summary.skipped_dirs.len()
    );
    if summary.is_success() {
        return Ok(());
    }
    for (image, reason) in &summary.failed {
        error!("failed to patch {}: {}", image.display(), reason);
    }
    Err(ImageSyncError::patch(format!(
        "{} images failed to patch",
        summary.failed.len()
    )))
}

/// Build a cidata config drive ISO
pub async fn cidata_command(loader: &ConfigLoader) -> Result<()> {
    let config = CidataConfig::from_loader(loader)?;
    let output = CidataBuilder::new(config).build().await?;
    println!("{}", output.display());
    Ok(())
}

/// Mirror the local image tree into one COS bucket per image per region
pub async fn cos_sync_command(loader: &ConfigLoader) -> Result<()> {
    let config = CosConfig::from_loader(loader)?;
    let options = SyncOptions::from_loader(loader)?;
    let images = ImageScanner::new(&config.image_dir).scan()?;
    info!("found {} local images in {}", images.len(), config.image_dir.display());

    let cos = cos_client(&config)?;
    let store = CosBucketStore::new(cos.clone(), config.bucket_prefix.clone());
    let desired = desired_by_region(&config.regions, &images, |image, region| {
        naming::bucket_name(&config.bucket_prefix, image, region)
    });

    let report = reconciler(options.into(), options.dry_run)
        .run(&store, &desired)
        .await;

    let published = if config.inventory && !options.dry_run {
        publish_inventory(&cos, &config).await.map(|_| ())
    } else {
        Ok(())
    };

    report.into_result(store.name())?;
    published
}

/// Publish the COS inventory without syncing buckets
pub async fn inventory_command(loader: &ConfigLoader) -> Result<()> {
    let config = CosConfig::from_loader(loader)?;
    let cos = cos_client(&config)?;
    let url = publish_inventory(&cos, &config).await?;
    println!("{}", url);
    Ok(())
}

async fn publish_inventory(cos: &CosClient, config: &CosConfig) -> Result<String> {
    let vpc = vpc_client(&config.inventory_vpc)?;
    let catalog = catalog::build_cos_inventory(
        cos,
        Some(vpc.as_ref()),
        &config.regions,
        &config.bucket_prefix,
    )
    .await?;
    catalog::publish_cos_inventory(
        cos,
        &catalog,
        &config.image_dir,
        &config.regions,
        &config.bucket_prefix,
    )
    .await
}

/// Reconcile VPC custom images with the images uploaded to COS
pub async fn vpc_sync_command(loader: &ConfigLoader) -> Result<()> {
    let mut missing = Vec::new();
    let image_dir = crate::config::image_dir(loader, &mut missing)?;
    check_missing(missing)?;
    let config = VpcConfig::from_loader(loader, DEFAULT_VPC_IMAGE_MATCH)?;
    let options = SyncOptions::from_loader(loader)?;
    let bucket_prefix = loader.get_or("COS_BUCKET_PREFIX", DEFAULT_BUCKET_PREFIX);

    let images = qcow2_images(&image_dir)?;
    let vpc = vpc_client(&config.api)?;
    let store = VpcImageStore::new(vpc, &config)?
        .make_public(true)
        .public_orphans_only(true)
        .with_cos_source(CosImageSource { bucket_prefix });
    let desired = desired_by_region(&config.regions, &images, naming::vpc_image_name);

    reconciler(options.into(), options.dry_run)
        .run(&store, &desired)
        .await
        .into_result(store.name())
        .map(|_| ())
}

/// Import the images of a published catalog into VPC
pub async fn vpc_import_command(loader: &ConfigLoader) -> Result<()> {
    let config = CatalogImportConfig::from_loader(loader)?;
    let options = SyncOptions::from_loader(loader)?;
    let vpc = vpc_client(&config.vpc.api)?;
    let store = VpcImageStore::new(vpc, &config.vpc)?;

    let mut desired = BTreeMap::new();
    if config.delete_all {
        warn!("DELETE_ALL set, deleting every image matching {}", config.vpc.image_match);
        for region in &config.vpc.regions {
            desired.insert(region.clone(), Vec::new());
        }
    } else {
        info!("importing images from catalog {}", config.catalog_url);
        let image_catalog = ImageCatalog::fetch(&http_client()?, &config.catalog_url).await?;
        let pattern = regex::Regex::new(&config.vpc.image_match)?;
        for region in &config.vpc.regions {
            let entries = image_catalog.desired_for(region, &pattern);
            if entries.is_empty() {
                warn!("catalog has no images for region {}", region);
            }
            desired.insert(region.clone(), entries);
        }
    }

    let policy = SyncPolicy {
        update: options.update_images,
        delete_orphans: config.delete_all,
    };
    reconciler(policy, options.dry_run)
        .run(&store, &desired)
        .await
        .into_result(store.name())
        .map(|_| ())
}

/// Patch, stage images in a transient COS instance and import them into VPC
pub async fn vpc_imager_command(loader: &ConfigLoader) -> Result<()> {
    let mut config = ImagerConfig::from_loader(loader)?;
    let options = SyncOptions::from_loader(loader)?;
    let client = http_client()?;
    let iam = Arc::new(IamTokenProvider::new(client.clone(), &config.vpc.api.auth));
    let vpc = Arc::new(
        VpcClient::new(client.clone(), iam.clone(), config.vpc.api.api_version.clone())
            .with_endpoint_template(config.vpc.api.endpoint_template.clone()),
    );

    if config.delete_all {
        warn!("DELETE_ALL set, deleting every image matching {}", config.vpc.image_match);
        let store = VpcImageStore::new(vpc, &config.vpc)?;
        let desired: BTreeMap<String, Vec<DesiredArtifact>> = config
            .vpc
            .regions
            .iter()
            .map(|region| (region.clone(), Vec::new()))
            .collect();
        return reconciler(SyncPolicy { update: false, delete_orphans: true }, options.dry_run)
            .run(&store, &desired)
            .await
            .into_result(store.name())
            .map(|_| ());
    }

    if config.patch.cloudinit_template.is_none() {
        config.patch.cloudinit_template = config
            .patch
            .cloudinit_dir
            .as_ref()
            .map(|dir| dir.join(VPC_CLOUDINIT_TEMPLATE));
    }
    let patched = run_patcher(config.patch.clone()).await;
    if let Err(e) = &patched {
        warn!("continuing with the images that patched cleanly: {}", e);
    }

    let images = qcow2_images(&config.patch.image_dir)?;
    let policy = SyncPolicy {
        update: options.update_images,
        delete_orphans: config.delete_vpc_image,
    };
    let desired = desired_by_region(&config.vpc.regions, &images, naming::vpc_image_name);

    let planning_store = VpcImageStore::new(vpc.clone(), &config.vpc)?;
    let needed = regions_needing_import(&planning_store, &desired, policy).await?;
    if needed.is_empty() || options.dry_run {
        if needed.is_empty() {
            info!("all VPC images are current, no upload needed");
        }
        return reconciler(policy, options.dry_run)
            .run(&planning_store, &desired)
            .await
            .into_result(planning_store.name())
            .map(|_| ())
            .and(patched);
    }

    let prefix = transient_prefix();
    let controller = ResourceController::new(client.clone(), iam);
    let mut transient = TransientCos::new(prefix.clone());
    let staged = stage_and_import(
        &controller,
        &mut transient,
        &client,
        &config,
        vpc,
        &images,
        &needed,
        &desired,
        policy,
    )
    .await;

    info!("removing transient COS resources for {}", prefix);
    let cleaned = controller.cleanup(&transient).await;
    staged.and(cleaned).and(patched)
}

#[allow(clippy::too_many_arguments)]
async fn stage_and_import(
    controller: &ResourceController,
    transient: &mut TransientCos,
    client: &reqwest::Client,
    config: &ImagerConfig,
    vpc: Arc<VpcClient>,
    images: &[LocalImage],
    needed: &[String],
    desired: &BTreeMap<String, Vec<DesiredArtifact>>,
    policy: SyncPolicy,
) -> Result<()> {
    controller.provision(transient).await?;
    let (auth, resource_crn) = transient.auth(&config.vpc.api.auth.auth_endpoint)?;

    let cos_iam = Arc::new(IamTokenProvider::new(client.clone(), &auth));
    let cos = Arc::new(CosClient::new(
        client.clone(),
        cos_iam,
        resource_crn,
        DEFAULT_COS_ENDPOINT_TEMPLATE,
    ));
    let buckets = CosBucketStore::new(cos, transient.prefix.clone());
    let uploads = desired_by_region(needed, images, |image, region| {
        naming::bucket_name(&transient.prefix, image, region)
    });
    reconciler(SyncPolicy { update: false, delete_orphans: false }, false)
        .run(&buckets, &uploads)
        .await
        .into_result(buckets.name())?;

    let store = VpcImageStore::new(vpc, &config.vpc)?
        .wait_for_import(true)
        .with_cos_source(CosImageSource {
            bucket_prefix: transient.prefix.clone(),
        });
    reconciler(policy, false)
        .run(&store, desired)
        .await
        .into_result(store.name())
        .map(|_| ())
}

/// Regions where at least one image must be created or replaced
async fn regions_needing_import(
    store: &dyn ImageStore,
    desired: &BTreeMap<String, Vec<DesiredArtifact>>,
    policy: SyncPolicy,
) -> Result<Vec<String>> {
    let mut needed = Vec::new();
    for (region, expected) in desired {
        let existing = RetryPolicy::default()
            .run(&format!("list {} in {}", store.name(), region), || store.list(region))
            .await?;
        let plan = SyncPlan::compute(expected, &existing, policy);
        // recreates include broken imports, which need the upload again
        if !plan.create.is_empty() || !plan.recreate.is_empty() {
            info!("adding region {} to COS upload and VPC import", region);
            needed.push(region.clone());
        }
    }
    Ok(needed)
}

/// `c` followed by eight random hex digits
fn transient_prefix() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("c{}", &id[..8])
}

/// Upload the local image tree to Glance
pub async fn glance_sync_command(loader: &ConfigLoader) -> Result<()> {
    let config = GlanceConfig::from_loader(loader)?;
    let options = SyncOptions::from_loader(loader)?;
    glance_sync(config, options).await
}

async fn glance_sync(config: GlanceConfig, options: SyncOptions) -> Result<()> {
    let images = ImageScanner::new(&config.image_dir).scan()?;
    let image_dir = config.image_dir.clone();
    let region = config.region.clone();
    let visibility = config.visibility.clone();
    let delete_all = config.delete_all;

    let glance = Arc::new(GlanceClient::new(http_client()?, config));
    let store = GlanceImageStore::new(glance.clone(), visibility);

    let (desired, policy) = if delete_all {
        warn!("DELETE_ALL set, deleting every managed Glance image");
        (
            desired_by_region(&[region], &[], |image, _| naming::glance_image_name(image)),
            SyncPolicy { update: false, delete_orphans: true },
        )
    } else {
        (
            desired_by_region(&[region], &images, |image, _| naming::glance_image_name(image)),
            options.into(),
        )
    };

    let report = reconciler(policy, options.dry_run).run(&store, &desired).await;

    let inventory = if options.dry_run {
        Ok(())
    } else {
        write_glance_inventory(&glance, &image_dir).await
    };
    report.into_result(store.name())?;
    inventory
}

async fn write_glance_inventory(glance: &GlanceClient, image_dir: &Path) -> Result<()> {
    let images = glance.list_images().await?;
    let entries = catalog::glance_inventory(&images);
    catalog::write_glance_inventory(&image_dir.join(GLANCE_INVENTORY_FILE), &entries)?;
    Ok(())
}

/// Patch and upload to Glance every INTERVAL seconds
pub async fn monitor_command(loader: &ConfigLoader) -> Result<()> {
    let monitor_config = MonitorConfig::from_loader(loader)?;
    let patch_config = PatchConfig::from_loader(loader)?;
    let glance_config = GlanceConfig::from_loader(loader)?;
    let options = SyncOptions::from_loader(loader)?;

    info!(
        "monitoring {} every {} seconds",
        patch_config.image_dir.display(),
        monitor_config.interval.as_secs()
    );
    Monitor::new(&monitor_config)
        .run(|_| {
            let patch_config = patch_config.clone();
            let glance_config = glance_config.clone();
            async move {
                let patched = run_patcher(patch_config).await;
                glance_sync(glance_config, options).await.and(patched)
            }
        })
        .await;
    Ok(())
}

/// List local disk images
pub async fn list_images_command(loader: &ConfigLoader, json_output: bool) -> Result<()> {
    let mut missing = Vec::new();
    let image_dir = crate::config::image_dir(loader, &mut missing)?;
    check_missing(missing)?;
    let images = ImageScanner::new(&image_dir).scan()?;

    if json_output {
        let json = serde_json::to_string_pretty(&images)?;
        println!("{}", json);
        return Ok(());
    }

    if images.is_empty() {
        info!("No images found in {}", image_dir.display());
        return Ok(());
    }

    println!("Local Images:");
    println!(
        "{:<48} {:<8} {:<12} {:<6} {:<6}",
        "Directory", "Format", "Size", "MD5", "Signed"
    );
    println!("{:-<84}", "");

    for image in &images {
        println!(
            "{:<48} {:<8} {:<12} {} {}",
            image.dir_name,
            image.format.as_str(),
            image.size_human(),
            mark(image.md5_path.is_some()),
            mark(image.sig_path.is_some()),
        );
    }

    info!("Found {} images", images.len());
    Ok(())
}

fn mark(present: bool) -> colored::ColoredString {
    if present {
        format!("{:<6}", "yes").green()
    } else {
        format!("{:<6}", "no").yellow()
    }
}

/// Check system prerequisites
pub async fn check_prerequisites_command() -> Result<()> {
    info!("Checking system prerequisites for TMOS image patching");

    let missing = SystemUtils::check_prerequisites();
    if missing.is_empty() {
        info!("✓ All required system commands are available");
    } else {
        error!("✗ Missing required commands: {}", missing.join(", "));
        info!("Install missing packages:");
        for cmd in &missing {
            if let Some(hint) = SystemUtils::install_hint(cmd) {
                info!("  {}", hint);
            }
        }
    }

    if SystemUtils::is_root() {
        info!("✓ Running as root - guestfish can open disk images");
    } else {
        error!("✗ Not running as root - patching requires root");
    }

    if missing.is_empty() && SystemUtils::is_root() {
        info!("System is ready for TMOS image patching");
        Ok(())
    } else {
        Err(ImageSyncError::validation(format!(
            "Missing {} required dependencies{}",
            missing.len(),
            if SystemUtils::is_root() { "" } else { " and root privileges" }
        )))
    }
}

fn reconciler(policy: SyncPolicy, dry_run: bool) -> Reconciler {
    if dry_run {
        info!("dry run: remote state will not be changed");
    }
    Reconciler::new(policy, RetryPolicy::default(), dry_run)
}

fn cos_client(config: &CosConfig) -> Result<Arc<CosClient>> {
    let client = http_client()?;
    let iam = Arc::new(IamTokenProvider::new(client.clone(), &config.auth));
    Ok(Arc::new(CosClient::new(
        client,
        iam,
        config.resource_crn.clone(),
        config.endpoint_template.clone(),
    )))
}

fn vpc_client(api: &VpcApiConfig) -> Result<Arc<VpcClient>> {
    let client = http_client()?;
    let iam = Arc::new(IamTokenProvider::new(client.clone(), &api.auth));
    Ok(Arc::new(
        VpcClient::new(client, iam, api.api_version.clone())
            .with_endpoint_template(api.endpoint_template.clone()),
    ))
}

/// VPC only imports qcow2 images
fn qcow2_images(image_dir: &Path) -> Result<Vec<LocalImage>> {
    let images: Vec<_> = ImageScanner::new(image_dir)
        .scan()?
        .into_iter()
        .filter(|image| image.format == DiskFormat::Qcow2)
        .collect();
    info!("found {} qcow2 images in {}", images.len(), image_dir.display());
    Ok(images)
}

/// Expected artifacts for every region; regions without images map to an empty list
pub fn desired_by_region<F>(
    regions: &[String],
    images: &[LocalImage],
    name: F,
) -> BTreeMap<String, Vec<DesiredArtifact>>
where
    F: Fn(&LocalImage, &str) -> String,
{
    regions
        .iter()
        .map(|region| {
            let desired = images
                .iter()
                .map(|image| DesiredArtifact::local(name(image, region), image.clone()))
                .collect();
            (region.clone(), desired)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn image(dir: &str) -> LocalImage {
        LocalImage {
            path: PathBuf::from(format!("/TMOSImages/{}/{}", dir, dir)),
            dir_name: dir.to_string(),
            format: DiskFormat::Qcow2,
            size_bytes: 0,
            md5_path: None,
            sig_path: None,
        }
    }

    #[test]
    fn test_desired_by_region_names_per_region() {
        let regions = vec!["us-south".to_string(), "eu-de".to_string()];
        let images = vec![image("BIGIP-16.0.1-0.0.3.qcow2")];

        let desired = desired_by_region(&regions, &images, naming::vpc_image_name);
        assert_eq!(desired.len(), 2);
        assert_eq!(desired["eu-de"][0].name, "bigip-16-0-1-0-0-3-eu-de");
        assert_eq!(desired["us-south"][0].name, "bigip-16-0-1-0-0-3-us-south");
    }

    #[test]
    fn test_desired_by_region_keeps_empty_regions() {
        let desired = desired_by_region(&["us-east".to_string()], &[], naming::vpc_image_name);
        assert!(desired["us-east"].is_empty());
    }

    #[test]
    fn test_transient_prefix() {
        let prefix = transient_prefix();
        assert_eq!(prefix.len(), 9);
        assert!(prefix.starts_with('c'));
        assert!(prefix[1..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_list_images_requires_image_dir() {
        let err = list_images_command(&ConfigLoader::empty(), false).await.unwrap_err();
        assert!(err.to_string().contains("TMOS_IMAGE_DIR"));
    }
}
