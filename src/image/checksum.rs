// file: src/image/checksum.rs
// version: 1.0.0
// guid: 6b0f2d8e-1c47-4e39-a5d2-83f9b7e4c016

//! Checksum and signature sidecars for disk images

use super::{sidecar_path, MD5_SUFFIX, SIG_SUFFIX};
use crate::error::ImageSyncError;
use crate::Result;
use md5::{Digest, Md5};
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::sign::Signer;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::info;

const READ_BUFFER: usize = 64 * 1024;

/// Hex MD5 of a file, streamed
pub async fn md5_file(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path).await?;
    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; READ_BUFFER];

    loop {
        let bytes_read = file.read(&mut buffer).await?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Write `<image>.md5` and return its path
pub async fn write_md5_sidecar(image: &Path) -> Result<PathBuf> {
    let md5_path = sidecar_path(image, MD5_SUFFIX);
    info!("creating md5sum file for {} as {}", image.display(), md5_path.display());
    let digest = md5_file(image).await?;
    fs::write(&md5_path, digest).await?;
    Ok(md5_path)
}

/// Contents of an md5 sidecar with surrounding whitespace removed
pub async fn read_md5_sidecar(md5_path: &Path) -> Result<String> {
    let content = fs::read_to_string(md5_path).await?;
    let digest = content.split_whitespace().next().unwrap_or_default();
    if digest.is_empty() {
        return Err(ImageSyncError::image(format!(
            "checksum file {} is empty",
            md5_path.display()
        )));
    }
    Ok(digest.to_string())
}

/// Sign an image with an RSA private key (PKCS#1 v1.5, SHA-384) into `<image>.384.sig`
pub async fn sign_image(image: &Path, private_key: &Path) -> Result<PathBuf> {
    let sig_path = sidecar_path(image, SIG_SUFFIX);
    info!("signing image {} with private key {}", image.display(), private_key.display());

    let pem = fs::read(private_key).await?;
    let key = PKey::private_key_from_pem(&pem)?;
    let mut signer = Signer::new(MessageDigest::sha384(), &key)?;

    let mut file = fs::File::open(image).await?;
    let mut buffer = vec![0u8; READ_BUFFER];
    loop {
        let bytes_read = file.read(&mut buffer).await?;
        if bytes_read == 0 {
            break;
        }
        signer.update(&buffer[..bytes_read])?;
    }

    fs::write(&sig_path, signer.sign_to_vec()?).await?;
    Ok(sig_path)
}
