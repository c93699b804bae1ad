// file: src/network/client.rs
// version: 1.0.0
// guid: 4e8a1d63-c7f9-4b25-92d0-e5b3a6f18c47

//! Shared HTTP client setup and response checks

use crate::error::ImageSyncError;
use crate::Result;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Connect timeout for every request
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Total timeout for metadata calls; streaming uploads have none
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Longest response body kept in an error message
const MAX_ERROR_BODY: usize = 2048;

/// Build the HTTP client used by every cloud client
pub fn http_client() -> Result<Client> {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .user_agent(concat!("tmos-image-sync/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ImageSyncError::network(format!("Failed to build HTTP client: {}", e)))
}

/// Pass 2xx responses through; turn anything else into an API error
pub async fn check_status(service: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(ImageSyncError::api(service, status.as_u16(), truncate_body(&body)))
}

/// Check the status and decode a JSON body
pub async fn read_json<T: DeserializeOwned>(service: &str, response: Response) -> Result<T> {
    let response = check_status(service, response).await?;
    let body = response.bytes().await?;
    Ok(serde_json::from_slice(&body)?)
}

/// Treat 404 on delete as already gone
pub async fn check_delete(service: &str, response: Response) -> Result<()> {
    if response.status() == reqwest::StatusCode::NOT_FOUND {
        return Ok(());
    }
    check_status(service, response).await.map(|_| ())
}

fn truncate_body(body: &str) -> String {
    let body = body.trim();
    if body.len() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_body() {
        assert_eq!(truncate_body("  short \n"), "short");
        let long = "x".repeat(MAX_ERROR_BODY + 10);
        assert_eq!(truncate_body(&long).len(), MAX_ERROR_BODY + 3);
    }

    #[test]
    fn test_http_client_builds() {
        assert!(http_client().is_ok());
    }
}
