// file: src/cloud/resource_controller.rs
// version: 1.0.0
// guid: e61b4f08-3a9d-4c72-b5e3-d87f2a0c9461

//! Transient COS instances for the VPC imager
//!
//! The imager needs somewhere to stage disk images before VPC can import
//! them. It provisions a resource group, a COS instance and a Manager
//! resource key for the run and removes them again afterwards.

use super::iam::IamTokenProvider;
use crate::config::IbmAuthConfig;
use crate::error::ImageSyncError;
use crate::network::client::REQUEST_TIMEOUT;
use crate::network::{check_delete, read_json};
use crate::sync::RetryPolicy;
use crate::Result;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

const SERVICE: &str = "Resource Controller";

pub const RESOURCE_CONTROLLER_URL: &str = "https://resource-controller.cloud.ibm.com";

/// COS standard plan
pub const COS_STANDARD_PLAN_ID: &str = "744bfc56-d12c-4866-88d5-dac9139e0e5d";

const COS_TARGET: &str = "bluemix-global";

#[derive(Debug, Deserialize)]
struct ResourceGroup {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ResourceInstance {
    id: String,
    guid: String,
}

#[derive(Debug, Deserialize)]
struct KeyCredentials {
    apikey: String,
}

#[derive(Debug, Deserialize)]
struct ResourceKey {
    guid: String,
    credentials: KeyCredentials,
}

/// What has been provisioned so far; cleanup only removes these
#[derive(Debug, Clone, Default)]
pub struct TransientCos {
    pub prefix: String,
    pub group_id: Option<String>,
    pub instance_guid: Option<String>,
    /// Instance CRN, used as the COS service instance id
    pub instance_crn: Option<String>,
    pub key_guid: Option<String>,
    /// API key of the Manager resource key
    pub api_key: Option<String>,
}

impl TransientCos {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Self::default()
        }
    }

    pub fn group_name(&self) -> String {
        format!("rg{}", self.prefix)
    }

    pub fn instance_name(&self) -> String {
        format!("cosr{}", self.prefix)
    }

    pub fn key_name(&self) -> String {
        format!("cosk{}", self.prefix)
    }

    /// Credentials for talking to the new COS instance
    pub fn auth(&self, auth_endpoint: &str) -> Result<(IbmAuthConfig, String)> {
        match (&self.api_key, &self.instance_crn) {
            (Some(api_key), Some(crn)) => Ok((
                IbmAuthConfig {
                    api_key: api_key.clone(),
                    auth_endpoint: auth_endpoint.to_string(),
                },
                crn.clone(),
            )),
            _ => Err(ImageSyncError::config(format!(
                "COS instance {} is not fully provisioned",
                self.instance_name()
            ))),
        }
    }
}

/// Client for the IBM Cloud resource controller
pub struct ResourceController {
    client: Client,
    iam: Arc<IamTokenProvider>,
    base_url: String,
    retry: RetryPolicy,
}

impl ResourceController {
    pub fn new(client: Client, iam: Arc<IamTokenProvider>) -> Self {
        Self {
            client,
            iam,
            base_url: RESOURCE_CONTROLLER_URL.to_string(),
            retry: RetryPolicy::provisioning(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response> {
        Ok(request
            .header("Accept", "application/json")
            .header("Authorization", self.iam.bearer().await?)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?)
    }

    /// Create group, COS instance and key for `state.prefix`.
    ///
    /// `state` records each resource as soon as it exists, so after an
    /// error it still describes what [`cleanup`](Self::cleanup) must remove.
    pub async fn provision(&self, state: &mut TransientCos) -> Result<()> {
        let account_id = self
            .retry
            .run("look up account id", || self.iam.account_id())
            .await?;

        let group_name = state.group_name();
        info!("creating resource group {}", group_name);
        let group: ResourceGroup = self
            .retry
            .run("create resource group", || async {
                let request = self
                    .client
                    .post(format!("{}/v2/resource_groups", self.base_url))
                    .json(&json!({ "name": group_name, "account_id": account_id }));
                read_json(SERVICE, self.send(request).await?).await
            })
            .await?;
        state.group_id = Some(group.id.clone());

        let instance_name = state.instance_name();
        info!("creating COS instance {}", instance_name);
        let instance: ResourceInstance = self
            .retry
            .run("create COS instance", || async {
                let request = self
                    .client
                    .post(format!("{}/v2/resource_instances", self.base_url))
                    .json(&json!({
                        "name": instance_name,
                        "target": COS_TARGET,
                        "resource_group": group.id,
                        "resource_plan_id": COS_STANDARD_PLAN_ID,
                    }));
                read_json(SERVICE, self.send(request).await?).await
            })
            .await?;
        state.instance_guid = Some(instance.guid.clone());
        state.instance_crn = Some(instance.id.clone());

        let key_name = state.key_name();
        info!("creating resource key {}", key_name);
        let key: ResourceKey = self
            .retry
            .run("create resource key", || async {
                let request = self
                    .client
                    .post(format!("{}/v2/resource_keys", self.base_url))
                    .json(&json!({
                        "name": key_name,
                        "source": instance.guid,
                        "role": "Manager",
                    }));
                read_json(SERVICE, self.send(request).await?).await
            })
            .await?;
        state.key_guid = Some(key.guid);
        state.api_key = Some(key.credentials.apikey);
        Ok(())
    }

    /// Delete key, instance and group; failures are logged and the rest still run
    pub async fn cleanup(&self, state: &TransientCos) -> Result<()> {
        let mut failed = Vec::new();
        for (kind, path) in cleanup_paths(state) {
            let url = format!("{}{}", self.base_url, path);
            info!("deleting {} {}", kind, path);
            let outcome = self
                .retry
                .run(&format!("delete {}", kind), || async {
                    let request = self.client.delete(&url);
                    check_delete(SERVICE, self.send(request).await?).await
                })
                .await;
            if let Err(e) = outcome {
                error!("could not delete {}: {}", kind, e);
                failed.push(kind);
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            warn!("transient COS resources left behind: {}", failed.join(", "));
            Err(ImageSyncError::network(format!(
                "failed to delete {}",
                failed.join(", ")
            )))
        }
    }
}

/// Delete calls in reverse creation order, skipping what was never created
fn cleanup_paths(state: &TransientCos) -> Vec<(&'static str, String)> {
    let mut paths = Vec::new();
    if let Some(guid) = &state.key_guid {
        paths.push(("resource key", format!("/v2/resource_keys/{}", guid)));
    }
    if let Some(guid) = &state.instance_guid {
        paths.push(("COS instance", format!("/v2/resource_instances/{}", guid)));
    }
    if let Some(id) = &state.group_id {
        paths.push(("resource group", format!("/v2/resource_groups/{}", id)));
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_names() {
        let state = TransientCos::new("c1a2b3c4d");
        assert_eq!(state.group_name(), "rgc1a2b3c4d");
        assert_eq!(state.instance_name(), "cosrc1a2b3c4d");
        assert_eq!(state.key_name(), "coskc1a2b3c4d");
    }

    #[test]
    fn test_cleanup_skips_unprovisioned() {
        let mut state = TransientCos::new("cabc");
        assert!(cleanup_paths(&state).is_empty());

        state.group_id = Some("rg-1".to_string());
        state.instance_guid = Some("inst-1".to_string());
        let paths = cleanup_paths(&state);
        assert_eq!(
            paths,
            vec![
                ("COS instance", "/v2/resource_instances/inst-1".to_string()),
                ("resource group", "/v2/resource_groups/rg-1".to_string()),
            ]
        );
    }

    #[test]
    fn test_auth_requires_key_and_instance() {
        let mut state = TransientCos::new("cabc");
        assert!(state.auth("https://iam").is_err());

        state.api_key = Some("secret".to_string());
        state.instance_crn = Some("crn:v1:cos".to_string());
        let (auth, crn) = state.auth("https://iam").unwrap();
        assert_eq!(auth.api_key, "secret");
        assert_eq!(crn, "crn:v1:cos");
    }

    #[test]
    fn test_parse_resource_key() {
        let key: ResourceKey = serde_json::from_str(
            r#"{"guid": "k-1", "name": "coskcabc",
                "credentials": {"apikey": "abc", "resource_instance_id": "crn:v1"}}"#,
        )
        .unwrap();
        assert_eq!(key.guid, "k-1");
        assert_eq!(key.credentials.apikey, "abc");
    }
}
