// file: src/catalog/inventory.rs
// version: 1.0.0
// guid: 2d7b9e05-6c1f-4a38-8e94-b5a3c0f7e182

//! Inventories of what was published to COS and Glance

use super::{write_json_atomic, CatalogEntry, ImageCatalog};
use crate::cloud::cos::is_managed_bucket;
use crate::cloud::{CosClient, GlanceImage, VpcClient};
use crate::config::{CATALOG_OBJECT_NAME, COS_INVENTORY_FILE};
use crate::error::ImageSyncError;
use crate::image::{naming, DiskFormat, MD5_SUFFIX};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// Catalog of the managed COS buckets in each region.
///
/// When a VPC client is given, each entry carries the id of the VPC image
/// imported from that object, if one exists. A failed lookup leaves the id
/// empty.
pub async fn build_cos_inventory(
    cos: &CosClient,
    vpc: Option<&VpcClient>,
    regions: &[String],
    prefix: &str,
) -> Result<ImageCatalog> {
    let mut catalog = ImageCatalog::new();

    for region in regions {
        catalog.add_region(region.as_str());
        let buckets = cos.list_buckets(region).await?;
        for bucket in buckets
            .iter()
            .filter(|bucket| is_managed_bucket(prefix, region, bucket))
        {
            let image_name = naming::image_name_from_bucket(prefix, bucket);
            for object in cos.list_objects(region, bucket).await? {
                if DiskFormat::from_path(Path::new(&object.key)).is_none() {
                    continue;
                }

                let image_id = match vpc {
                    Some(vpc) => lookup_image_id(vpc, region, &object.key).await,
                    None => None,
                };
                catalog.insert(
                    region.as_str(),
                    CatalogEntry {
                        image_name: image_name.clone(),
                        image_sql_url: naming::cos_url(region, bucket, &object.key),
                        md5_sql_url: Some(naming::cos_url(
                            region,
                            bucket,
                            &format!("{}.{}", object.key, MD5_SUFFIX),
                        )),
                        image_id,
                    },
                );
            }
        }
    }

    Ok(catalog)
}

/// Id of the VPC image `vpc-sync` creates from an uploaded object
async fn lookup_image_id(vpc: &VpcClient, region: &str, object_key: &str) -> Option<String> {
    let name = naming::vpc_name(&naming::stem_of(object_key), region);
    match vpc.find_image_id(region, &name).await {
        Ok(id) => id,
        Err(e) => {
            warn!("could not look up VPC image {} in {}: {}", name, region, e);
            None
        }
    }
}

/// Write the inventory into the image directory and publish it to every
/// region's catalog bucket. Returns the public URL of the first region's copy.
pub async fn publish_cos_inventory(
    cos: &CosClient,
    catalog: &ImageCatalog,
    image_dir: &Path,
    regions: &[String],
    prefix: &str,
) -> Result<String> {
    let first = regions
        .first()
        .ok_or_else(|| ImageSyncError::config("no COS regions to publish the inventory to"))?;

    let path = image_dir.join(COS_INVENTORY_FILE);
    catalog.save(&path)?;

    for region in regions {
        let bucket = naming::catalog_bucket(prefix, region);
        cos.create_bucket(region, &bucket, true).await?;
        cos.put_object(region, &bucket, CATALOG_OBJECT_NAME, &path, true)
            .await?;
        info!("published image catalog to {}/{}", bucket, CATALOG_OBJECT_NAME);
    }

    let url = cos.public_url(first, &naming::catalog_bucket(prefix, first), CATALOG_OBJECT_NAME)?;
    info!("image catalog available at {}", url);
    Ok(url)
}

/// A managed Glance image as recorded in `openstack_images.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlanceInventoryEntry {
    pub id: String,
    pub name: String,
    pub status: Option<String>,
    pub visibility: Option<String>,
    pub md5: Option<String>,
}

/// Managed images only
pub fn glance_inventory(images: &[GlanceImage]) -> Vec<GlanceInventoryEntry> {
    images
        .iter()
        .filter(|image| image.is_managed())
        .map(|image| GlanceInventoryEntry {
            id: image.id.clone(),
            name: image.name.clone().unwrap_or_default(),
            status: image.status.clone(),
            visibility: image.visibility.clone(),
            md5: image.md5().map(str::to_string),
        })
        .collect()
}

/// Write the Glance inventory. When it is empty any earlier file is
/// removed instead, so a stale inventory never outlives its images.
pub fn write_glance_inventory(path: &Path, entries: &[GlanceInventoryEntry]) -> Result<bool> {
    if entries.is_empty() {
        warn!("no managed Glance images, removing {}", path.display());
        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        return Ok(false);
    }
    write_json_atomic(path, &serde_json::to_string_pretty(entries)?)?;
    info!("wrote Glance inventory {} ({} images)", path.display(), entries.len());
    Ok(true)
}
