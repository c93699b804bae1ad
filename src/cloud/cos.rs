// file: src/cloud/cos.rs
// version: 1.0.0
// guid: 0d5b8f34-a2e6-4c71-9b18-e4c7f3a9d620

//! IBM Cloud Object Storage over its S3 REST API
//!
//! Requests carry an IAM bearer token and the service instance CRN. Bucket
//! listings are global to the instance; buckets are told apart by the
//! region suffix in their names.

use super::iam::IamTokenProvider;
use crate::error::ImageSyncError;
use crate::image::{naming, LocalImage, MD5_SUFFIX, SIG_SUFFIX};
use crate::network::client::REQUEST_TIMEOUT;
use crate::network::{check_delete, check_status, file_body};
use crate::sync::{ArtifactSource, DesiredArtifact, ImageStore, RemoteArtifact};
use crate::Result;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

const SERVICE: &str = "COS";
const INSTANCE_HEADER: &str = "ibm-service-instance-id";
const ACL_HEADER: &str = "x-amz-acl";
const PUBLIC_READ: &str = "public-read";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListAllMyBucketsResult {
    #[serde(default)]
    buckets: BucketList,
}

#[derive(Debug, Default, Deserialize)]
struct BucketList {
    #[serde(rename = "Bucket", default)]
    bucket: Vec<BucketEntry>,
}

#[derive(Debug, Deserialize)]
struct BucketEntry {
    #[serde(rename = "Name")]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListBucketResult {
    #[serde(default)]
    contents: Vec<ObjectEntry>,
    #[serde(default)]
    is_truncated: bool,
    #[serde(default)]
    next_continuation_token: Option<String>,
}

/// An object listed in a bucket
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ObjectEntry {
    pub key: String,
    #[serde(default)]
    pub size: u64,
}

/// Bucket and object operations against COS regional endpoints
pub struct CosClient {
    client: Client,
    iam: Arc<IamTokenProvider>,
    resource_crn: String,
    endpoint_template: String,
}

impl CosClient {
    pub fn new(
        client: Client,
        iam: Arc<IamTokenProvider>,
        resource_crn: impl Into<String>,
        endpoint_template: impl Into<String>,
    ) -> Self {
        Self {
            client,
            iam,
            resource_crn: resource_crn.into(),
            endpoint_template: endpoint_template.into(),
        }
    }

    /// Regional endpoint URL
    pub fn endpoint(&self, region: &str) -> String {
        self.endpoint_template
            .replace("{region}", region)
            .trim_end_matches('/')
            .to_string()
    }

    /// Anonymous URL of a public object
    pub fn public_url(&self, region: &str, bucket: &str, key: &str) -> Result<String> {
        public_object_url(&self.endpoint(region), bucket, key)
    }

    async fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        Ok(request
            .header("Authorization", self.iam.bearer().await?)
            .header(INSTANCE_HEADER, &self.resource_crn))
    }

    /// Every bucket of the service instance
    pub async fn list_buckets(&self, region: &str) -> Result<Vec<String>> {
        let url = format!("{}/", self.endpoint(region));
        let request = self.authorized(self.client.get(&url)).await?;
        let response = request.timeout(REQUEST_TIMEOUT).send().await?;
        let body = check_status(SERVICE, response).await?.text().await?;
        let listing: ListAllMyBucketsResult = quick_xml::de::from_str(&body)?;
        Ok(listing.buckets.bucket.into_iter().map(|b| b.name).collect())
    }

    /// Create a bucket; an existing bucket counts as success
    pub async fn create_bucket(&self, region: &str, bucket: &str, public: bool) -> Result<()> {
        let url = format!("{}/{}", self.endpoint(region), bucket);
        let mut request = self.authorized(self.client.put(&url)).await?;
        if public {
            request = request.header(ACL_HEADER, PUBLIC_READ);
        }
        let response = request.timeout(REQUEST_TIMEOUT).send().await?;

        match check_status(SERVICE, response).await {
            Ok(_) => {
                info!("created bucket {} in {}", bucket, region);
                Ok(())
            }
            Err(ImageSyncError::ApiError { body, .. })
                if body.contains("BucketAlreadyExists") || body.contains("BucketAlreadyOwnedByYou") =>
            {
                debug!("bucket: {} exists", bucket);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn delete_bucket(&self, region: &str, bucket: &str) -> Result<()> {
        let url = format!("{}/{}", self.endpoint(region), bucket);
        let request = self.authorized(self.client.delete(&url)).await?;
        let response = request.timeout(REQUEST_TIMEOUT).send().await?;
        check_delete(SERVICE, response).await
    }

    /// Every object in a bucket, following continuation tokens
    pub async fn list_objects(&self, region: &str, bucket: &str) -> Result<Vec<ObjectEntry>> {
        let url = format!("{}/{}", self.endpoint(region), bucket);
        let mut objects = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let mut query = vec![("list-type", "2".to_string())];
            if let Some(token) = &token {
                query.push(("continuation-token", token.clone()));
            }
            let request = self.authorized(self.client.get(&url).query(&query)).await?;
            let response = request.timeout(REQUEST_TIMEOUT).send().await?;
            let body = check_status(SERVICE, response).await?.text().await?;
            let page: ListBucketResult = quick_xml::de::from_str(&body)?;

            objects.extend(page.contents);
            match page.next_continuation_token {
                Some(next) if page.is_truncated => token = Some(next),
                _ => break,
            }
        }

        Ok(objects)
    }

    /// Stream a file into an object
    pub async fn put_object(
        &self,
        region: &str,
        bucket: &str,
        key: &str,
        file: &Path,
        public: bool,
    ) -> Result<()> {
        let url = format!("{}/{}/{}", self.endpoint(region), bucket, key);
        let upload = file_body(file).await?;
        let mut request = self
            .authorized(self.client.put(&url))
            .await?
            .header("Content-Length", upload.length)
            .body(upload.body);
        if public {
            request = request.header(ACL_HEADER, PUBLIC_READ);
        }
        let response = request.send().await?;
        check_status(SERVICE, response).await?;
        debug!("upload complete for {}/{}", bucket, key);
        Ok(())
    }

    pub async fn delete_object(&self, region: &str, bucket: &str, key: &str) -> Result<()> {
        let url = format!("{}/{}/{}", self.endpoint(region), bucket, key);
        let request = self.authorized(self.client.delete(&url)).await?;
        let response = request.timeout(REQUEST_TIMEOUT).send().await?;
        check_delete(SERVICE, response).await
    }

    /// Delete every object in a bucket
    pub async fn empty_bucket(&self, region: &str, bucket: &str) -> Result<()> {
        for object in self.list_objects(region, bucket).await? {
            debug!("deleting {}/{}", bucket, object.key);
            self.delete_object(region, bucket, &object.key).await?;
        }
        Ok(())
    }
}

/// `https://{bucket}.{endpoint host}/{key}`
pub fn public_object_url(endpoint: &str, bucket: &str, key: &str) -> Result<String> {
    let mut url = Url::parse(endpoint)?;
    let host = url
        .host_str()
        .ok_or_else(|| ImageSyncError::config(format!("COS endpoint {} has no host", endpoint)))?
        .to_string();
    url.set_host(Some(&format!("{}.{}", bucket, host)))?;
    url.set_path(key);
    Ok(url.to_string())
}

/// Whether a bucket belongs to this tool in a region
pub fn is_managed_bucket(prefix: &str, region: &str, bucket: &str) -> bool {
    bucket.starts_with(&format!("{}-", prefix))
        && bucket.ends_with(&format!("-{}", region))
        && bucket != naming::catalog_bucket(prefix, region)
}

/// One public bucket per image per region
pub struct CosBucketStore {
    cos: Arc<CosClient>,
    prefix: String,
}

impl CosBucketStore {
    pub fn new(cos: Arc<CosClient>, prefix: impl Into<String>) -> Self {
        Self {
            cos,
            prefix: prefix.into(),
        }
    }

    async fn upload_image(&self, region: &str, bucket: &str, image: &LocalImage) -> Result<()> {
        let key = naming::object_name(image);
        info!("starting upload of image {} to {}/{}", image.path.display(), bucket, key);
        self.cos.put_object(region, bucket, &key, &image.path, true).await?;

        match &image.md5_path {
            Some(md5) => {
                let md5_key = format!("{}.{}", key, MD5_SUFFIX);
                self.cos.put_object(region, bucket, &md5_key, md5, true).await?;
            }
            None => warn!("{} has no md5 sidecar", image.path.display()),
        }

        if let Some(sig) = &image.sig_path {
            let sig_key = format!("{}.{}", key, SIG_SUFFIX);
            self.cos.put_object(region, bucket, &sig_key, sig, true).await?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ImageStore for CosBucketStore {
    fn name(&self) -> &str {
        "COS bucket"
    }

    async fn list(&self, region: &str) -> Result<Vec<RemoteArtifact>> {
        let buckets = self.cos.list_buckets(region).await?;
        Ok(buckets
            .into_iter()
            .filter(|bucket| bucket.ends_with(&format!("-{}", region)))
            .map(|bucket| {
                let managed = is_managed_bucket(&self.prefix, region, &bucket);
                RemoteArtifact::new(bucket.clone(), bucket, managed)
            })
            .collect())
    }

    async fn create(&self, region: &str, desired: &DesiredArtifact) -> Result<String> {
        let ArtifactSource::Local(image) = &desired.source else {
            return Err(ImageSyncError::validation(format!(
                "COS bucket {} needs a local image",
                desired.name
            )));
        };

        self.cos.create_bucket(region, &desired.name, true).await?;
        if let Err(e) = self.upload_image(region, &desired.name, image).await {
            warn!("removing incomplete bucket {}", desired.name);
            if let Err(cleanup) = self.delete(region, &RemoteArtifact::new(&desired.name, &desired.name, true)).await {
                warn!("could not remove bucket {}: {}", desired.name, cleanup);
            }
            return Err(e);
        }
        Ok(desired.name.clone())
    }

    async fn delete(&self, region: &str, artifact: &RemoteArtifact) -> Result<()> {
        info!("deleting COS bucket {}", artifact.name);
        self.cos.empty_bucket(region, &artifact.name).await?;
        self.cos.delete_bucket(region, &artifact.name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IbmAuthConfig;
    use crate::image::DiskFormat;
    use crate::network::test_server::{Recorded, Reply, TestServer};
    use serde_json::json;
    use tempfile::TempDir;

    const BUCKET: &str = "f5-image-catalog-bigip-16-0-1-us-south";

    fn stub_store(server: &TestServer) -> CosBucketStore {
        let auth = IbmAuthConfig {
            api_key: "key".to_string(),
            auth_endpoint: server.url("/token"),
        };
        let iam = Arc::new(IamTokenProvider::new(Client::new(), &auth));
        let cos = CosClient::new(Client::new(), iam, "crn:v1:cos", server.url("/{region}"));
        CosBucketStore::new(Arc::new(cos), "f5-image-catalog")
    }

    fn local_image(dir: &TempDir) -> LocalImage {
        let path = dir.path().join("BIGIP-16.0.1.qcow2");
        let md5_path = dir.path().join("BIGIP-16.0.1.qcow2.md5");
        std::fs::write(&path, b"qcow2 payload").unwrap();
        std::fs::write(&md5_path, "c0ffee  BIGIP-16.0.1.qcow2\n").unwrap();
        LocalImage {
            path,
            dir_name: "BIGIP-16.0.1.qcow2".to_string(),
            format: DiskFormat::Qcow2,
            size_bytes: 13,
            md5_path: Some(md5_path),
            sig_path: None,
        }
    }

    fn cos_handler(fail_image_put: bool) -> impl Fn(&Recorded) -> Reply + Send + Sync {
        move |request| {
            let object = format!("/us-south/{}/BIGIP-16.0.1.qcow2", BUCKET);
            match (request.method.as_str(), request.path()) {
                (_, "/token") => Reply::json(200, json!({"access_token": "t", "expires_in": 3600})),
                ("PUT", path) if path == object && fail_image_put => Reply::status(503),
                ("PUT", _) => Reply::status(200),
                ("GET", _) => Reply::xml(
                    "<ListBucketResult><IsTruncated>false</IsTruncated></ListBucketResult>",
                ),
                ("DELETE", _) => Reply::status(204),
                _ => Reply::status(400),
            }
        }
    }

    #[tokio::test]
    async fn test_create_uploads_image_and_md5_publicly() {
        let server = TestServer::start(cos_handler(false)).await;
        let dir = TempDir::new().unwrap();
        let desired = DesiredArtifact::local(BUCKET, local_image(&dir));

        let id = stub_store(&server).create("us-south", &desired).await.unwrap();

        assert_eq!(id, BUCKET);
        assert_eq!(
            server.calls(),
            vec![
                format!("PUT /us-south/{}", BUCKET),
                format!("PUT /us-south/{}/BIGIP-16.0.1.qcow2", BUCKET),
                format!("PUT /us-south/{}/BIGIP-16.0.1.qcow2.md5", BUCKET),
            ]
        );
        let requests = server.requests();
        assert!(requests[1..]
            .iter()
            .all(|r| r.header("x-amz-acl") == Some("public-read")));
        assert!(requests[1..]
            .iter()
            .all(|r| r.header("ibm-service-instance-id") == Some("crn:v1:cos")));
        assert_eq!(requests[2].body, b"qcow2 payload");
    }

    #[tokio::test]
    async fn test_failed_upload_removes_bucket() {
        let server = TestServer::start(cos_handler(true)).await;
        let dir = TempDir::new().unwrap();
        let desired = DesiredArtifact::local(BUCKET, local_image(&dir));

        let err = stub_store(&server).create("us-south", &desired).await.unwrap_err();

        assert_eq!(err.status(), Some(503));
        let calls = server.calls();
        assert_eq!(
            calls,
            vec![
                format!("PUT /us-south/{}", BUCKET),
                format!("PUT /us-south/{}/BIGIP-16.0.1.qcow2", BUCKET),
                format!("GET /us-south/{}", BUCKET),
                format!("DELETE /us-south/{}", BUCKET),
            ]
        );
    }

    #[tokio::test]
    async fn test_list_marks_only_prefixed_region_buckets_managed() {
        let server = TestServer::start(|request| match request.path() {
            "/token" => Reply::json(200, json!({"access_token": "t"})),
            _ => Reply::xml(
                "<ListAllMyBucketsResult><Buckets>\
                 <Bucket><Name>f5-image-catalog-us-south</Name></Bucket>\
                 <Bucket><Name>f5-image-catalog-bigip-16-0-1-us-south</Name></Bucket>\
                 <Bucket><Name>f5-image-catalog-bigip-16-0-1-eu-de</Name></Bucket>\
                 <Bucket><Name>someone-else-us-south</Name></Bucket>\
                 </Buckets></ListAllMyBucketsResult>",
            ),
        })
        .await;

        let artifacts = stub_store(&server).list("us-south").await.unwrap();
        let managed: Vec<_> = artifacts
            .iter()
            .map(|a| (a.name.as_str(), a.managed))
            .collect();
        assert_eq!(
            managed,
            vec![
                ("f5-image-catalog-us-south", false),
                ("f5-image-catalog-bigip-16-0-1-us-south", true),
                ("someone-else-us-south", false),
            ]
        );
    }

    #[test]
    fn test_managed_bucket_rules() {
        let prefix = "f5-image-catalog";
        assert!(is_managed_bucket(prefix, "us-south", "f5-image-catalog-bigip-16-0-1-us-south"));
        assert!(!is_managed_bucket(prefix, "us-south", "f5-image-catalog-us-south"));
        assert!(!is_managed_bucket(prefix, "us-south", "f5-image-catalog-bigip-16-0-1-eu-de"));
        assert!(!is_managed_bucket(prefix, "us-south", "my-own-bucket-us-south"));
    }

    #[test]
    fn test_public_object_url() {
        let url = public_object_url(
            "https://s3.us-south.cloud-object-storage.appdomain.cloud",
            "f5-image-catalog-us-south",
            "f5-image-catalog.json",
        )
        .unwrap();
        assert_eq!(
            url,
            "https://f5-image-catalog-us-south.s3.us-south.cloud-object-storage.appdomain.cloud/f5-image-catalog.json"
        );
    }

    #[test]
    fn test_parse_bucket_listing() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<ListAllMyBucketsResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Owner><ID>abc</ID><DisplayName>abc</DisplayName></Owner>
  <Buckets>
    <Bucket><Name>f5-image-catalog-us-south</Name><CreationDate>2021-01-01T00:00:00.000Z</CreationDate></Bucket>
    <Bucket><Name>f5-image-catalog-bigip-16-0-1-us-south</Name><CreationDate>2021-01-01T00:00:00.000Z</CreationDate></Bucket>
  </Buckets>
</ListAllMyBucketsResult>"#;

        let listing: ListAllMyBucketsResult = quick_xml::de::from_str(xml).unwrap();
        let names: Vec<_> = listing.buckets.bucket.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["f5-image-catalog-us-south", "f5-image-catalog-bigip-16-0-1-us-south"]
        );
    }

    #[test]
    fn test_parse_object_listing() {
        let xml = r#"<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>bucket</Name>
  <KeyCount>2</KeyCount>
  <IsTruncated>true</IsTruncated>
  <NextContinuationToken>next-page</NextContinuationToken>
  <Contents><Key>BIGIP.qcow2</Key><Size>1024</Size></Contents>
  <Contents><Key>BIGIP.qcow2.md5</Key><Size>32</Size></Contents>
</ListBucketResult>"#;

        let page: ListBucketResult = quick_xml::de::from_str(xml).unwrap();
        assert!(page.is_truncated);
        assert_eq!(page.next_continuation_token.as_deref(), Some("next-page"));
        assert_eq!(page.contents.len(), 2);
        assert_eq!(page.contents[0].key, "BIGIP.qcow2");
        assert_eq!(page.contents[0].size, 1024);
    }

    #[test]
    fn test_empty_listings() {
        let page: ListBucketResult =
            quick_xml::de::from_str("<ListBucketResult><IsTruncated>false</IsTruncated></ListBucketResult>").unwrap();
        assert!(page.contents.is_empty());

        let listing: ListAllMyBucketsResult =
            quick_xml::de::from_str("<ListAllMyBucketsResult><Buckets></Buckets></ListAllMyBucketsResult>").unwrap();
        assert!(listing.buckets.bucket.is_empty());
    }
}
