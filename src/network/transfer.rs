// file: src/network/transfer.rs
// version: 1.0.0
// guid: b1f6c2e9-4d87-4a3b-8e50-7c29d4a6f1e8

//! Streaming uploads and JSON downloads with progress tracking

use super::client::{read_json, REQUEST_TIMEOUT};
use crate::Result;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::{Body, Client};
use serde::de::DeserializeOwned;
use std::path::Path;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

/// A file opened for upload
pub struct FileBody {
    pub body: Body,
    pub length: u64,
}

/// Progress bar for a transfer of `length` bytes
pub fn transfer_progress(length: u64, message: &str) -> ProgressBar {
    let pb = ProgressBar::new(length);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta}) {msg}")
        .map(|style| style.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb
}

/// Stream a file as a request body, advancing a progress bar as it is read
pub async fn file_body(path: &Path) -> Result<FileBody> {
    let file = File::open(path).await?;
    let length = file.metadata().await?.len();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    info!("Uploading: {} ({} bytes)", path.display(), length);
    let pb = transfer_progress(length, &name);

    let stream = ReaderStream::new(file).inspect(move |chunk| {
        if let Ok(bytes) = chunk {
            pb.inc(bytes.len() as u64);
            if pb.position() >= length {
                pb.finish_with_message("Upload completed");
            }
        }
    });

    Ok(FileBody {
        body: Body::wrap_stream(stream),
        length,
    })
}

/// Fetch and decode a JSON document
pub async fn fetch_json<T: DeserializeOwned>(client: &Client, service: &str, url: &str) -> Result<T> {
    debug!("Downloading (no progress): {}", url);
    let response = client.get(url).timeout(REQUEST_TIMEOUT).send().await?;
    read_json(service, response).await
}
