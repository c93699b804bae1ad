// file: src/cloud/iam.rs
// version: 1.0.0
// guid: 72c4e8a1-5b3f-4d96-a0e7-18f9c2d6b534

//! IBM Cloud IAM bearer tokens

use crate::config::IbmAuthConfig;
use crate::error::ImageSyncError;
use crate::network::{check_status, client::REQUEST_TIMEOUT};
use crate::Result;
use reqwest::Client;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// API key details endpoint used to discover the owning account
pub const APIKEY_DETAILS_URL: &str = "https://iam.cloud.ibm.com/v1/apikeys/details";

const GRANT_TYPE: &str = "urn:ibm:params:oauth:grant-type:apikey";

/// Longest time a token is reused
const MAX_TOKEN_AGE: Duration = Duration::from_secs(1800);

/// Refresh this long before the token expires
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ApiKeyDetails {
    account_id: String,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    fresh_until: Instant,
}

/// Exchanges an API key for bearer tokens and caches them
#[derive(Debug)]
pub struct IamTokenProvider {
    client: Client,
    api_key: String,
    endpoint: String,
    cache: Mutex<Option<CachedToken>>,
}

impl IamTokenProvider {
    pub fn new(client: Client, auth: &IbmAuthConfig) -> Self {
        Self {
            client,
            api_key: auth.api_key.clone(),
            endpoint: auth.auth_endpoint.clone(),
            cache: Mutex::new(None),
        }
    }

    /// Current bearer token, requesting a new one when the cached one is stale
    pub async fn token(&self) -> Result<String> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if Instant::now() < cached.fresh_until {
                return Ok(cached.token.clone());
            }
        }

        debug!("requesting IAM token from {}", self.endpoint);
        let response = self
            .client
            .post(&self.endpoint)
            .header("Accept", "application/json")
            .form(&[("apikey", self.api_key.as_str()), ("grant_type", GRANT_TYPE)])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        let response = check_status("IAM", response).await.map_err(|e| match e {
            ImageSyncError::ApiError { status, body, .. } if status < 500 && status != 429 => {
                ImageSyncError::auth(format!("could not get an access token {} - {}", status, body))
            }
            other => other,
        })?;
        let body: TokenResponse = response.json().await?;

        let fresh_until = Instant::now() + token_lifetime(body.expires_in);
        *cache = Some(CachedToken {
            token: body.access_token.clone(),
            fresh_until,
        });
        Ok(body.access_token)
    }

    /// `Bearer <token>` header value
    pub async fn bearer(&self) -> Result<String> {
        Ok(format!("Bearer {}", self.token().await?))
    }

    /// Account owning the API key
    pub async fn account_id(&self) -> Result<String> {
        let response = self
            .client
            .get(APIKEY_DETAILS_URL)
            .header("Accept", "application/json")
            .header("IAM-Apikey", &self.api_key)
            .header("Authorization", self.bearer().await?)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        let response = check_status("IAM", response).await?;
        let details: ApiKeyDetails = response.json().await?;
        Ok(details.account_id)
    }
}

/// How long a token with `expires_in` seconds left may be reused
pub fn token_lifetime(expires_in: Option<u64>) -> Duration {
    match expires_in {
        Some(seconds) => Duration::from_secs(seconds)
            .saturating_sub(EXPIRY_MARGIN)
            .min(MAX_TOKEN_AGE),
        None => MAX_TOKEN_AGE,
    }
}
