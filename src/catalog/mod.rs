// file: src/catalog/mod.rs
// version: 1.0.0
// guid: 8f4a2c61-d9e3-4b07-a5c8-71e0b3f6d924

//! Image catalogs handed from one pipeline stage to the next
//!
//! A catalog maps each region to the images available there:
//!
//! ```json
//! { "us-south": [ { "image_name": "bigip-16-0-1-us-south",
//!                   "image_sql_url": "cos://us-south/<bucket>/<key>",
//!                   "md5_sql_url": "cos://us-south/<bucket>/<key>.md5",
//!                   "image_id": null } ] }
//! ```

pub mod inventory;

pub use inventory::{
    build_cos_inventory, glance_inventory, publish_cos_inventory, write_glance_inventory,
    GlanceInventoryEntry,
};

use crate::error::ImageSyncError;
use crate::image::naming;
use crate::network::fetch_json;
use crate::sync::DesiredArtifact;
use crate::Result;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

/// One image available in a region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub image_name: String,
    pub image_sql_url: String,
    #[serde(default)]
    pub md5_sql_url: Option<String>,
    #[serde(default)]
    pub image_id: Option<String>,
}

/// Images per region, serialised with regions in sorted order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageCatalog {
    regions: BTreeMap<String, Vec<CatalogEntry>>,
}

impl ImageCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, region: impl Into<String>, entry: CatalogEntry) {
        self.regions.entry(region.into()).or_default().push(entry);
    }

    /// Make sure a region is present even when it has no images
    pub fn add_region(&mut self, region: impl Into<String>) {
        self.regions.entry(region.into()).or_default();
    }

    pub fn regions(&self) -> impl Iterator<Item = &str> {
        self.regions.keys().map(String::as_str)
    }

    pub fn entries(&self, region: &str) -> &[CatalogEntry] {
        self.regions.get(region).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.regions.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries of a region whose image name matches `pattern`
    pub fn entries_for<'a>(&'a self, region: &str, pattern: &'a Regex) -> impl Iterator<Item = &'a CatalogEntry> {
        self.entries(region)
            .iter()
            .filter(move |entry| pattern.is_match(&entry.image_name))
    }

    /// VPC imports for a region
    pub fn desired_for(&self, region: &str, pattern: &Regex) -> Vec<DesiredArtifact> {
        self.entries_for(region, pattern)
            .map(|entry| {
                DesiredArtifact::remote(
                    naming::truncate_vpc_name(&entry.image_name),
                    entry.image_sql_url.clone(),
                    entry.md5_sql_url.clone(),
                )
            })
            .collect()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            ImageSyncError::config(format!("Cannot read catalog {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    /// Write the catalog, replacing any previous file atomically
    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, &self.to_json()?)?;
        info!("wrote image catalog {} ({} images)", path.display(), self.len());
        Ok(())
    }

    /// Download a published catalog
    pub async fn fetch(client: &Client, url: &str) -> Result<Self> {
        debug!("fetching image catalog {}", url);
        fetch_json(client, "image catalog", url).await
    }
}

/// Write through a temporary file in the same directory, then rename
pub(crate) fn write_json_atomic(path: &Path, json: &str) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(json.as_bytes())?;
    file.write_all(b"\n")?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| ImageSyncError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(name: &str) -> CatalogEntry {
        CatalogEntry {
            image_name: name.to_string(),
            image_sql_url: format!("cos://us-south/f5-image-catalog-{}/{}.qcow2", name, name),
            md5_sql_url: Some(format!("cos://us-south/f5-image-catalog-{}/{}.qcow2.md5", name, name)),
            image_id: None,
        }
    }

    #[test]
    fn test_regions_serialise_sorted() {
        let mut catalog = ImageCatalog::new();
        catalog.insert("us-south", entry("bigip-a-us-south"));
        catalog.insert("eu-de", entry("bigip-a-eu-de"));

        let json = catalog.to_json().unwrap();
        let eu = json.find("eu-de").unwrap();
        let us = json.find("us-south").unwrap();
        assert!(eu < us);
        assert!(json.contains("\"image_id\": null"));
    }

    #[test]
    fn test_entries_for_pattern() {
        let mut catalog = ImageCatalog::new();
        catalog.insert("us-south", entry("bigip-16-0-1-us-south"));
        catalog.insert("us-south", entry("bigiq-8-0-0-us-south"));

        let pattern = Regex::new("^bigip-").unwrap();
        let names: Vec<_> = catalog
            .entries_for("us-south", &pattern)
            .map(|e| e.image_name.as_str())
            .collect();
        assert_eq!(names, vec!["bigip-16-0-1-us-south"]);
        assert_eq!(catalog.entries_for("eu-gb", &pattern).count(), 0);
    }

    #[test]
    fn test_desired_for_uses_catalog_urls() {
        let mut catalog = ImageCatalog::new();
        catalog.insert("us-south", entry("bigip-16-0-1-us-south"));

        let desired = catalog.desired_for("us-south", &Regex::new("^[a-zA-Z]").unwrap());
        assert_eq!(desired.len(), 1);
        assert_eq!(desired[0].name, "bigip-16-0-1-us-south");
        assert!(matches!(
            &desired[0].source,
            crate::sync::ArtifactSource::Remote { image_url, .. } if image_url.starts_with("cos://us-south/")
        ));
    }

    #[test]
    fn test_missing_md5_url_is_accepted() {
        let catalog = ImageCatalog::from_json(
            r#"{"us-south": [{"image_name": "bigip-x", "image_sql_url": "cos://us-south/b/x.qcow2"}]}"#,
        )
        .unwrap();
        assert_eq!(catalog.entries("us-south")[0].md5_sql_url, None);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ibmcos_images.json");

        let mut catalog = ImageCatalog::new();
        catalog.insert("us-south", entry("bigip-a-us-south"));
        catalog.add_region("eu-de");
        catalog.save(&path).unwrap();

        let loaded = ImageCatalog::load(&path).await.unwrap();
        assert_eq!(loaded, catalog);
        assert_eq!(loaded.regions().collect::<Vec<_>>(), vec!["eu-de", "us-south"]);
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let err = ImageCatalog::load(Path::new("/no/such/catalog.json")).await.unwrap_err();
        assert!(matches!(err, ImageSyncError::ConfigError(_)));
    }
}
