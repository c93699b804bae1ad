// file: src/cloud/vpc.rs
// version: 1.0.0
// guid: 9a3e6d12-f4c8-4b57-8d20-c5b1e7a4f938

//! IBM Cloud VPC custom images

use super::iam::IamTokenProvider;
use crate::config::ibmcloud::DEFAULT_VPC_ENDPOINT_TEMPLATE;
use crate::config::VpcConfig;
use crate::error::ImageSyncError;
use crate::image::naming;
use crate::network::client::REQUEST_TIMEOUT;
use crate::network::{check_delete, read_json};
use crate::sync::{
    ArtifactSource, ArtifactState, DesiredArtifact, ImageStore, RemoteArtifact, RetryPolicy,
};
use crate::Result;
use regex::Regex;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const SERVICE: &str = "VPC";

/// Time between status checks while an import runs
pub const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// A VPC image as returned by the API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpcImage {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub visibility: Option<String>,
    #[serde(default)]
    pub owner_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PageLink {
    href: String,
}

#[derive(Debug, Deserialize)]
struct ImagePage {
    #[serde(default)]
    images: Vec<VpcImage>,
    #[serde(default)]
    next: Option<PageLink>,
}

/// Image operations against the regional VPC APIs
pub struct VpcClient {
    client: Client,
    iam: Arc<IamTokenProvider>,
    api_version: String,
    endpoint_template: String,
}

impl VpcClient {
    pub fn new(client: Client, iam: Arc<IamTokenProvider>, api_version: impl Into<String>) -> Self {
        Self {
            client,
            iam,
            api_version: api_version.into(),
            endpoint_template: DEFAULT_VPC_ENDPOINT_TEMPLATE.to_string(),
        }
    }

    /// Point the client at another API base
    pub fn with_endpoint_template(mut self, template: impl Into<String>) -> Self {
        self.endpoint_template = template.into();
        self
    }

    fn images_url(&self, region: &str) -> String {
        format!("{}/images", self.endpoint_template.replace("{region}", region))
    }

    fn version_query(&self) -> [(&'static str, &str); 2] {
        [("version", self.api_version.as_str()), ("generation", "2")]
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response> {
        Ok(request
            .header("Accept", "application/json")
            .header("Authorization", self.iam.bearer().await?)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?)
    }

    /// Every image visible in the region, following `next` links
    pub async fn list_images(&self, region: &str) -> Result<Vec<VpcImage>> {
        let mut images = Vec::new();
        let first = self
            .client
            .get(self.images_url(region))
            .query(&self.version_query())
            .query(&[("limit", "100")]);
        let mut page: ImagePage = read_json(SERVICE, self.send(first).await?).await?;

        loop {
            images.append(&mut page.images);
            let Some(next) = page.next.take() else {
                break;
            };
            debug!("fetching next image page {}", next.href);
            let mut request = self.client.get(&next.href);
            if !next.href.contains("version=") {
                request = request.query(&self.version_query());
            }
            page = read_json(SERVICE, self.send(request).await?).await?;
        }

        Ok(images)
    }

    pub async fn get_image(&self, region: &str, id: &str) -> Result<VpcImage> {
        let request = self
            .client
            .get(format!("{}/{}", self.images_url(region), id))
            .query(&self.version_query());
        read_json(SERVICE, self.send(request).await?).await
    }

    /// Id of the image with exactly this name
    pub async fn find_image_id(&self, region: &str, name: &str) -> Result<Option<String>> {
        let request = self
            .client
            .get(self.images_url(region))
            .query(&self.version_query())
            .query(&[("name", name)]);
        let page: ImagePage = read_json(SERVICE, self.send(request).await?).await?;
        let id = page.images.into_iter().find(|i| i.name == name).map(|i| i.id);
        if let Some(id) = &id {
            debug!("found VPC image id for name {}: {}", name, id);
        }
        Ok(id)
    }

    /// Start importing an image from a `cos://` reference
    pub async fn create_image(
        &self,
        region: &str,
        name: &str,
        file_href: &str,
        operating_system: &str,
    ) -> Result<VpcImage> {
        let body = json!({
            "name": name,
            "file": { "href": file_href },
            "operating_system": { "name": operating_system },
        });
        let request = self
            .client
            .post(self.images_url(region))
            .query(&self.version_query())
            .json(&body);
        read_json(SERVICE, self.send(request).await?).await
    }

    pub async fn set_visibility(&self, region: &str, id: &str, visibility: &str) -> Result<()> {
        debug!("setting image {} visibility to {}", id, visibility);
        let request = self
            .client
            .patch(format!("{}/{}", self.images_url(region), id))
            .query(&self.version_query())
            .json(&json!({ "visibility": visibility }));
        let _: VpcImage = read_json(SERVICE, self.send(request).await?).await?;
        Ok(())
    }

    pub async fn delete_image(&self, region: &str, id: &str) -> Result<()> {
        debug!("deleting VPC image {}", id);
        let request = self
            .client
            .delete(format!("{}/{}", self.images_url(region), id))
            .query(&self.version_query());
        check_delete(SERVICE, self.send(request).await?).await
    }

    /// Poll until the image is available; `failed` or running out of time is an error
    pub async fn wait_until_available(
        &self,
        region: &str,
        id: &str,
        poll: Duration,
        timeout: Duration,
    ) -> Result<VpcImage> {
        let start = Instant::now();
        let label = format!("status of VPC image {}", id);
        loop {
            let image = RetryPolicy::default()
                .run(&label, || self.get_image(region, id))
                .await?;
            match image.status.as_deref() {
                Some("available") => return Ok(image),
                Some("failed") => {
                    return Err(ImageSyncError::image(format!(
                        "VPC image {} ({}) failed to import",
                        image.name, id
                    )))
                }
                status => debug!("image {} status {:?}", image.name, status),
            }

            if start.elapsed() >= timeout {
                return Err(ImageSyncError::timeout(format!(
                    "VPC image {} not available after {:?}",
                    id, timeout
                )));
            }
            tokio::time::sleep(poll).await;
        }
    }
}

/// Where local images were uploaded for import
#[derive(Debug, Clone)]
pub struct CosImageSource {
    pub bucket_prefix: String,
}

/// Custom images in VPC regions
pub struct VpcImageStore {
    vpc: Arc<VpcClient>,
    matcher: Regex,
    operating_system: String,
    status_pause: Duration,
    available_timeout: Duration,
    wait_for_import: bool,
    make_public: bool,
    public_orphans_only: bool,
    cos_source: Option<CosImageSource>,
}

impl VpcImageStore {
    pub fn new(vpc: Arc<VpcClient>, config: &VpcConfig) -> Result<Self> {
        Ok(Self {
            vpc,
            matcher: Regex::new(&config.image_match)?,
            operating_system: config.operating_system.clone(),
            status_pause: config.status_pause,
            available_timeout: config.available_timeout,
            wait_for_import: false,
            make_public: false,
            public_orphans_only: false,
            cos_source: None,
        })
    }

    /// Wait for each import to finish before `create` returns
    pub fn wait_for_import(mut self, wait: bool) -> Self {
        self.wait_for_import = wait;
        self
    }

    /// Wait for imports and publish them
    pub fn make_public(mut self, make_public: bool) -> Self {
        self.make_public = make_public;
        self.wait_for_import |= make_public;
        self
    }

    /// Only public images count as orphans; private ones are left for
    /// their owners
    pub fn public_orphans_only(mut self, public_only: bool) -> Self {
        self.public_orphans_only = public_only;
        self
    }

    /// Resolve local images to their COS upload
    pub fn with_cos_source(mut self, source: CosImageSource) -> Self {
        self.cos_source = Some(source);
        self
    }

    /// Whether this store may delete an image
    pub fn is_managed(&self, image: &VpcImage) -> bool {
        image.owner_type.as_deref() == Some("user") && self.matcher.is_match(&image.name)
    }

    fn state_of(&self, image: &VpcImage) -> ArtifactState {
        match image.status.as_deref() {
            Some("failed") => ArtifactState::Broken,
            Some("available") if self.make_public && !is_public(image) => ArtifactState::Unpublished,
            _ => ArtifactState::Ready,
        }
    }

    fn to_artifact(&self, image: VpcImage) -> RemoteArtifact {
        let keep = self.public_orphans_only && !is_public(&image);
        let mut artifact = RemoteArtifact::new(&image.name, &image.id, self.is_managed(&image))
            .with_state(self.state_of(&image))
            .keep_when_orphaned(keep);
        artifact.visibility = image.visibility;
        artifact.status = image.status;
        artifact
    }

    fn file_href(&self, region: &str, desired: &DesiredArtifact) -> Result<String> {
        match &desired.source {
            ArtifactSource::Remote { image_url, .. } => Ok(image_url.clone()),
            ArtifactSource::Local(image) => {
                let source = self.cos_source.as_ref().ok_or_else(|| {
                    ImageSyncError::config(format!(
                        "no COS location configured for local image {}",
                        image.path.display()
                    ))
                })?;
                Ok(naming::cos_url(
                    region,
                    &naming::bucket_name(&source.bucket_prefix, image, region),
                    &naming::object_name(image),
                ))
            }
        }
    }
}

#[async_trait::async_trait]
impl ImageStore for VpcImageStore {
    fn name(&self) -> &str {
        "VPC image"
    }

    async fn list(&self, region: &str) -> Result<Vec<RemoteArtifact>> {
        let images = self.vpc.list_images(region).await?;
        Ok(images.into_iter().map(|image| self.to_artifact(image)).collect())
    }

    async fn create(&self, region: &str, desired: &DesiredArtifact) -> Result<String> {
        let href = self.file_href(region, desired)?;
        info!("importing {} into {} from {}", desired.name, region, href);
        let image = self
            .vpc
            .create_image(region, &desired.name, &href, &self.operating_system)
            .await?;

        if self.wait_for_import {
            self.vpc
                .wait_until_available(region, &image.id, STATUS_POLL_INTERVAL, self.available_timeout)
                .await?;
        }
        if self.make_public {
            RetryPolicy::default()
                .run(&format!("publish VPC image {}", image.id), || {
                    self.vpc.set_visibility(region, &image.id, "public")
                })
                .await?;
        }
        Ok(image.id)
    }

    async fn repair(&self, region: &str, artifact: &RemoteArtifact) -> Result<()> {
        info!("making VPC image {} ({}) public", artifact.name, artifact.id);
        self.vpc.set_visibility(region, &artifact.id, "public").await
    }

    async fn delete(&self, region: &str, artifact: &RemoteArtifact) -> Result<()> {
        if artifact.visibility.as_deref() == Some("public") {
            self.vpc.set_visibility(region, &artifact.id, "private").await?;
            tokio::time::sleep(self.status_pause).await;
        }
        info!("deleting VPC image {} with id {}", artifact.name, artifact.id);
        self.vpc.delete_image(region, &artifact.id).await
    }
}

fn is_public(image: &VpcImage) -> bool {
    image.visibility.as_deref() == Some("public")
}
