// file: src/image/naming.rs
// version: 1.0.0
// guid: 0c7e5a1f-93b2-4d64-8a51-6f2e9d0b7c34

//! Remote names derived from local image directory names
//!
//! Every remote artifact name is a pure function of the image directory
//! name and the target region. Nothing is looked up in a registry, so two
//! runs over the same tree always expect the same remote state.

use super::{DiskFormat, LocalImage};

/// Longest name accepted by the VPC image service
pub const MAX_VPC_IMAGE_NAME: usize = 63;

/// Longest S3/COS bucket name
pub const MAX_BUCKET_NAME: usize = 63;

/// Fewest stem characters a bucket prefix must leave room for
pub const MIN_BUCKET_STEM: usize = 8;

/// Lower-case, dash separated stem of an image directory name.
///
/// A trailing disk format extension is removed first, so the working
/// directories `BIGIP-15.1.0-0.0.4.ALL_1SLOT.qcow2` (from an archive) and
/// `BIGIP-15.1.0-0.0.4.ALL_1SLOT` (from a bare image) both yield
/// `bigip-15-1-0-0-0-4-all-1slot`.
pub fn image_stem(image: &LocalImage) -> String {
    stem_of(&image.dir_name)
}

/// [`image_stem`] for a bare directory name
pub fn stem_of(dir_name: &str) -> String {
    strip_extension(dir_name)
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '-' => c,
            _ => '-',
        })
        .collect()
}

/// `{prefix}-{stem}-{region}`, with the stem cut so the name fits
/// [`MAX_BUCKET_NAME`]. Prefix and region are kept whole since bucket
/// ownership is recognised by them.
pub fn bucket_name(prefix: &str, image: &LocalImage, region: &str) -> String {
    let region = region.to_lowercase();
    let room = MAX_BUCKET_NAME.saturating_sub(prefix.len() + region.len() + 2);
    let stem = trim_dashes(image_stem(image).chars().take(room).collect());
    format!("{}-{}-{}", prefix, stem, region)
}

/// Whether `prefix` leaves at least [`MIN_BUCKET_STEM`] characters for
/// the image stem in `region`
pub fn bucket_prefix_fits(prefix: &str, region: &str) -> bool {
    prefix.len() + region.len() + 2 + MIN_BUCKET_STEM <= MAX_BUCKET_NAME
}

/// Object key of the disk image inside its bucket
pub fn object_name(image: &LocalImage) -> String {
    image.file_name()
}

/// `{stem}-{region}`, cut to the VPC name limit
pub fn vpc_image_name(image: &LocalImage, region: &str) -> String {
    vpc_name(&image_stem(image), region)
}

/// [`vpc_image_name`] for a bare stem
pub fn vpc_name(stem: &str, region: &str) -> String {
    truncate_vpc_name(&format!("{}-{}", stem, region.to_lowercase()))
}

/// Cut a name to [`MAX_VPC_IMAGE_NAME`] characters without leaving a trailing dash
pub fn truncate_vpc_name(name: &str) -> String {
    trim_dashes(name.chars().take(MAX_VPC_IMAGE_NAME).collect())
}

fn trim_dashes(mut name: String) -> String {
    while name.ends_with('-') {
        name.pop();
    }
    name
}

/// Glance keeps the directory name without its extension; DATASTOR images get a suffix
pub fn glance_image_name(image: &LocalImage) -> String {
    let without_ext = strip_extension(&image.dir_name);
    if image.is_datastor() {
        format!("{}_DATASTOR", without_ext)
    } else {
        without_ext.to_string()
    }
}

/// Drop a trailing disk format extension; other dotted parts are version numbers
fn strip_extension(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && ext.parse::<DiskFormat>().is_ok() => stem,
        _ => name,
    }
}

/// Bucket holding the published catalog for a region
pub fn catalog_bucket(prefix: &str, region: &str) -> String {
    format!("{}-{}", prefix, region.to_lowercase())
}

/// Image name recorded in the catalog for a managed bucket
pub fn image_name_from_bucket(prefix: &str, bucket: &str) -> String {
    let lead = format!("{}-", prefix);
    bucket
        .strip_prefix(&lead)
        .unwrap_or(bucket)
        .replace('.', "-")
}

/// `cos://{region}/{bucket}/{object}` reference understood by the VPC importer
pub fn cos_url(region: &str, bucket: &str, object: &str) -> String {
    format!("cos://{}/{}/{}", region, bucket, object)
}
