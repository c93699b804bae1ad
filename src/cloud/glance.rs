// file: src/cloud/glance.rs
// version: 1.0.0
// guid: 0c5d7e2b-81f4-4a9e-b36d-4e7a9f1c2d58

//! OpenStack Keystone authentication and Glance v2 images

use crate::config::GlanceConfig;
use crate::error::ImageSyncError;
use crate::image::{checksum, LocalImage};
use crate::network::client::REQUEST_TIMEOUT;
use crate::network::{check_delete, check_status, file_body, read_json};
use crate::sync::{ArtifactSource, ArtifactState, DesiredArtifact, ImageStore, RemoteArtifact};
use crate::Result;
use base64::Engine;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const SERVICE: &str = "Glance";

/// Marker property on every image this tool uploads
pub const MANAGED_PROPERTY: &str = "owner_specified.uploader_managed";
pub const MD5_PROPERTY: &str = "owner_specified.shade.md5";
pub const SIGNATURE_PROPERTY: &str = "owner_specified.shade.base64.sha384.sig";

const JSON_PATCH: &str = "application/openstack-images-v2.1-json-patch";

/// A Glance image record; custom properties are top-level keys
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlanceImage {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub visibility: Option<String>,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

impl GlanceImage {
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }

    pub fn is_managed(&self) -> bool {
        self.property(MANAGED_PROPERTY) == Some("true")
    }

    /// Uploaded md5, falling back to the checksum Glance computed
    pub fn md5(&self) -> Option<&str> {
        self.property(MD5_PROPERTY).or(self.checksum.as_deref())
    }

    /// A record whose data never arrived or was rejected
    pub fn is_broken(&self) -> bool {
        matches!(self.status.as_deref(), Some("queued" | "killed"))
    }
}

#[derive(Debug, Deserialize)]
struct ImagePage {
    #[serde(default)]
    images: Vec<GlanceImage>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenBody {
    token: TokenDetails,
}

#[derive(Debug, Deserialize)]
struct TokenDetails {
    #[serde(default)]
    catalog: Vec<CatalogService>,
}

#[derive(Debug, Deserialize)]
struct CatalogService {
    #[serde(rename = "type")]
    service_type: String,
    #[serde(default)]
    endpoints: Vec<CatalogEndpoint>,
}

#[derive(Debug, Deserialize)]
struct CatalogEndpoint {
    interface: String,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    region_id: Option<String>,
    url: String,
}

#[derive(Debug, Clone)]
struct Session {
    token: String,
    image_endpoint: String,
}

/// Glance v2 client authenticated through Keystone v3
pub struct GlanceClient {
    client: Client,
    config: GlanceConfig,
    session: Mutex<Option<Session>>,
}

impl GlanceClient {
    pub fn new(client: Client, config: GlanceConfig) -> Self {
        Self {
            client,
            config,
            session: Mutex::new(None),
        }
    }

    pub fn region(&self) -> &str {
        &self.config.region
    }

    fn tokens_url(&self) -> String {
        let base = self.config.auth_url.trim_end_matches('/');
        if base.ends_with("/v3") {
            format!("{}/auth/tokens", base)
        } else {
            format!("{}/v3/auth/tokens", base)
        }
    }

    async fn session(&self) -> Result<Session> {
        let mut session = self.session.lock().await;
        if let Some(existing) = session.as_ref() {
            return Ok(existing.clone());
        }

        debug!("authenticating {} against {}", self.config.username, self.config.auth_url);
        let body = json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": {
                        "user": {
                            "name": self.config.username,
                            "domain": { "name": self.config.user_domain },
                            "password": self.config.password,
                        }
                    }
                },
                "scope": {
                    "project": {
                        "name": self.config.project_name,
                        "domain": { "name": self.config.project_domain },
                    }
                }
            }
        });
        let response = self
            .client
            .post(self.tokens_url())
            .json(&body)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        let response = check_status("Keystone", response).await.map_err(|e| match e {
            ImageSyncError::ApiError { status: 401, body, .. } => {
                ImageSyncError::auth(format!("Keystone rejected the credentials: {}", body))
            }
            other => other,
        })?;

        let token = response
            .headers()
            .get("X-Subject-Token")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| ImageSyncError::auth("Keystone response has no X-Subject-Token"))?;
        let details: TokenBody = response.json().await?;

        let image_endpoint = match &self.config.image_endpoint {
            Some(endpoint) => endpoint.clone(),
            None => image_endpoint(&details.token.catalog, &self.config.region)?,
        };
        debug!("using Glance endpoint {}", image_endpoint);

        let fresh = Session {
            token,
            image_endpoint: image_endpoint.trim_end_matches('/').to_string(),
        };
        *session = Some(fresh.clone());
        Ok(fresh)
    }

    async fn send(&self, session: &Session, request: RequestBuilder) -> Result<reqwest::Response> {
        Ok(request
            .header("Accept", "application/json")
            .header("X-Auth-Token", &session.token)
            .send()
            .await?)
    }

    /// Every image visible to the project, following `next` links
    pub async fn list_images(&self) -> Result<Vec<GlanceImage>> {
        let session = self.session().await?;
        let mut images = Vec::new();
        let mut url = format!("{}/v2/images?limit=100", session.image_endpoint);

        loop {
            let request = self.client.get(&url).timeout(REQUEST_TIMEOUT);
            let mut page: ImagePage = read_json(SERVICE, self.send(&session, request).await?).await?;
            images.append(&mut page.images);
            match page.next {
                Some(next) => url = next_url(&session.image_endpoint, &next),
                None => break,
            }
        }
        Ok(images)
    }

    /// Create an empty image record
    pub async fn create_image(
        &self,
        name: &str,
        disk_format: &str,
        visibility: &str,
        properties: &Map<String, Value>,
    ) -> Result<GlanceImage> {
        let session = self.session().await?;
        let mut body = properties.clone();
        body.insert("name".to_string(), json!(name));
        body.insert("disk_format".to_string(), json!(disk_format));
        body.insert("container_format".to_string(), json!("bare"));
        body.insert("visibility".to_string(), json!(visibility));

        let request = self
            .client
            .post(format!("{}/v2/images", session.image_endpoint))
            .json(&body)
            .timeout(REQUEST_TIMEOUT);
        read_json(SERVICE, self.send(&session, request).await?).await
    }

    /// Stream the disk image into an image record
    pub async fn upload_data(&self, id: &str, image: &LocalImage) -> Result<()> {
        let session = self.session().await?;
        let upload = file_body(&image.path).await?;
        let request = self
            .client
            .put(format!("{}/v2/images/{}/file", session.image_endpoint, id))
            .header("Content-Type", "application/octet-stream")
            .header("Content-Length", upload.length)
            .body(upload.body);
        check_status(SERVICE, self.send(&session, request).await?).await?;
        Ok(())
    }

    /// Add or replace custom properties
    pub async fn update_properties(&self, id: &str, properties: &Map<String, Value>) -> Result<()> {
        let session = self.session().await?;
        let request = self
            .client
            .patch(format!("{}/v2/images/{}", session.image_endpoint, id))
            .header("Content-Type", JSON_PATCH)
            .body(serde_json::to_vec(&property_patch(properties))?)
            .timeout(REQUEST_TIMEOUT);
        check_status(SERVICE, self.send(&session, request).await?).await?;
        Ok(())
    }

    pub async fn delete_image(&self, id: &str) -> Result<()> {
        let session = self.session().await?;
        let request = self
            .client
            .delete(format!("{}/v2/images/{}", session.image_endpoint, id))
            .timeout(REQUEST_TIMEOUT);
        check_delete(SERVICE, self.send(&session, request).await?).await
    }
}

/// Public image endpoint for `region` from a Keystone service catalog
fn image_endpoint(catalog: &[CatalogService], region: &str) -> Result<String> {
    catalog
        .iter()
        .filter(|service| service.service_type == "image")
        .flat_map(|service| service.endpoints.iter())
        .find(|endpoint| {
            endpoint.interface == "public"
                && (endpoint.region.as_deref() == Some(region)
                    || endpoint.region_id.as_deref() == Some(region))
        })
        .map(|endpoint| endpoint.url.clone())
        .ok_or_else(|| {
            ImageSyncError::config(format!(
                "no public image endpoint for region {} in the service catalog; set OS_IMAGE_ENDPOINT",
                region
            ))
        })
}

/// Glance returns `next` as a path below the endpoint
fn next_url(endpoint: &str, next: &str) -> String {
    if next.starts_with("http://") || next.starts_with("https://") {
        next.to_string()
    } else {
        format!("{}{}", endpoint, next)
    }
}

fn property_patch(properties: &Map<String, Value>) -> Vec<Value> {
    properties
        .iter()
        .map(|(key, value)| json!({ "op": "add", "path": format!("/{}", key), "value": value }))
        .collect()
}

/// Images uploaded to one Glance region
pub struct GlanceImageStore {
    glance: std::sync::Arc<GlanceClient>,
    visibility: String,
}

impl GlanceImageStore {
    pub fn new(glance: std::sync::Arc<GlanceClient>, visibility: impl Into<String>) -> Self {
        Self {
            glance,
            visibility: visibility.into(),
        }
    }

    fn managed_marker() -> Map<String, Value> {
        let mut properties = Map::new();
        properties.insert(MANAGED_PROPERTY.to_string(), json!("true"));
        properties
    }

    async fn uploaded_properties(image: &LocalImage) -> Result<Map<String, Value>> {
        let mut properties = Self::managed_marker();
        if let Some(md5_path) = &image.md5_path {
            properties.insert(MD5_PROPERTY.to_string(), json!(checksum::read_md5_sidecar(md5_path).await?));
        }
        if let Some(sig_path) = &image.sig_path {
            let signature = tokio::fs::read(sig_path).await?;
            properties.insert(
                SIGNATURE_PROPERTY.to_string(),
                json!(base64::engine::general_purpose::STANDARD.encode(signature)),
            );
        }
        Ok(properties)
    }

    async fn fill(&self, id: &str, image: &LocalImage) -> Result<()> {
        info!("uploading {} to Glance image {}", image.path.display(), id);
        self.glance.upload_data(id, image).await?;
        self.glance
            .update_properties(id, &Self::uploaded_properties(image).await?)
            .await
    }
}

#[async_trait::async_trait]
impl ImageStore for GlanceImageStore {
    fn name(&self) -> &str {
        "Glance image"
    }

    async fn list(&self, _region: &str) -> Result<Vec<RemoteArtifact>> {
        let images = self.glance.list_images().await?;
        Ok(images
            .into_iter()
            .map(|image| {
                let state = if image.is_broken() {
                    ArtifactState::Broken
                } else {
                    ArtifactState::Ready
                };
                let name = image.name.clone().unwrap_or_default();
                let mut artifact =
                    RemoteArtifact::new(name, &image.id, image.is_managed()).with_state(state);
                artifact.visibility = image.visibility;
                artifact.status = image.status;
                artifact
            })
            .collect())
    }

    async fn create(&self, _region: &str, desired: &DesiredArtifact) -> Result<String> {
        let ArtifactSource::Local(image) = &desired.source else {
            return Err(ImageSyncError::validation(format!(
                "Glance images can only be uploaded from local files: {}",
                desired.name
            )));
        };

        // marked managed from the start so an interrupted upload is cleaned up later
        let record = self
            .glance
            .create_image(
                &desired.name,
                image.format.as_str(),
                &self.visibility,
                &Self::managed_marker(),
            )
            .await?;

        if let Err(e) = self.fill(&record.id, image).await {
            warn!("upload to Glance image {} failed, removing it", record.id);
            if let Err(cleanup) = self.glance.delete_image(&record.id).await {
                warn!("could not remove Glance image {}: {}", record.id, cleanup);
            }
            return Err(e);
        }
        Ok(record.id)
    }

    async fn delete(&self, _region: &str, artifact: &RemoteArtifact) -> Result<()> {
        info!("deleting Glance image {} with id {}", artifact.name, artifact.id);
        self.glance.delete_image(&artifact.id).await
    }
}
