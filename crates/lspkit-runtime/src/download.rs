//! Verified downloads of runtime distribution files

use crate::error::{Result, RuntimeError};
use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Maximum download size (200MB)
pub const MAX_DOWNLOAD_SIZE: u64 = 200 * 1024 * 1024;

/// Hosts trusted regardless of configuration
const DEFAULT_ALLOWED_HOSTS: [&str; 1] = ["nodejs.org"];

/// Validate a download URL: HTTPS only, host in the default list or in `extra_hosts`
pub fn validate_url(url: &str, extra_hosts: &[String]) -> Result<()> {
    let parsed =
        url::Url::parse(url).map_err(|e| RuntimeError::InsecureUrl(format!("{url}: {e}")))?;

    if parsed.scheme() != "https" {
        return Err(RuntimeError::InsecureUrl(format!(
            "{url} (must use HTTPS)"
        )));
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| RuntimeError::InsecureUrl(format!("{url} (no host)")))?;

    let allowed = DEFAULT_ALLOWED_HOSTS
        .iter()
        .any(|allowed| host == *allowed || host.ends_with(&format!(".{allowed}")))
        || extra_hosts.iter().any(|allowed| host == allowed);

    if !allowed {
        return Err(RuntimeError::InsecureUrl(format!(
            "Host '{host}' not in allowed list"
        )));
    }

    Ok(())
}

/// Check if a download size is within limits
pub fn validate_size(size: u64) -> Result<()> {
    if size > MAX_DOWNLOAD_SIZE {
        return Err(RuntimeError::DownloadTooLarge(size, MAX_DOWNLOAD_SIZE));
    }
    Ok(())
}

fn client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(300))
        .build()?)
}

/// Stream `url` into `dest_path`, enforcing the size ceiling
pub async fn download_file(url: &str, dest_path: &Path, extra_hosts: &[String]) -> Result<()> {
    info!("Downloading {} to {}", url, dest_path.display());

    validate_url(url, extra_hosts)?;

    if let Some(parent) = dest_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let response = client()?
        .get(url)
        .send()
        .await
        .map_err(|e| RuntimeError::DownloadFailed(e.to_string()))?;

    if !response.status().is_success() {
        return Err(RuntimeError::DownloadFailed(format!(
            "HTTP {}: {}",
            response.status(),
            response.status().canonical_reason().unwrap_or("Unknown")
        )));
    }

    if let Some(size) = response.content_length() {
        validate_size(size)?;
    }

    let mut file = File::create(dest_path).await?;
    let mut stream = response.bytes_stream();
    let mut downloaded: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| RuntimeError::DownloadFailed(e.to_string()))?;

        downloaded += chunk.len() as u64;
        if downloaded > MAX_DOWNLOAD_SIZE {
            drop(file);
            let _ = tokio::fs::remove_file(dest_path).await;
            return Err(RuntimeError::DownloadTooLarge(downloaded, MAX_DOWNLOAD_SIZE));
        }

        file.write_all(&chunk).await?;
    }

    file.flush().await?;
    debug!("Download complete: {} bytes", downloaded);
    Ok(())
}

/// Fetch a small text document (checksum listings)
pub async fn fetch_text(url: &str, extra_hosts: &[String]) -> Result<String> {
    validate_url(url, extra_hosts)?;

    let response = client()?.get(url).send().await?;
    if !response.status().is_success() {
        return Err(RuntimeError::DownloadFailed(format!(
            "HTTP {} fetching {}",
            response.status(),
            url
        )));
    }

    Ok(response.text().await?)
}

/// Calculate the SHA256 checksum of a file
pub async fn sha256_file(path: &Path) -> Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<String> {
        let bytes = std::fs::read(&path)?;
        Ok(format!("{:x}", Sha256::digest(&bytes)))
    })
    .await
    .map_err(|e| RuntimeError::DownloadFailed(format!("Task failed: {e}")))?
}

/// Verify the SHA256 checksum of a file
pub async fn verify_checksum(file_path: &Path, expected_checksum: &str) -> Result<()> {
    debug!("Verifying checksum for {}", file_path.display());

    let actual = sha256_file(file_path).await?;
    if !actual.eq_ignore_ascii_case(expected_checksum) {
        return Err(RuntimeError::ChecksumMismatch {
            expected: expected_checksum.to_string(),
            actual,
        });
    }

    debug!("Checksum verification passed");
    Ok(())
}

/// Look up the checksum for `filename` in a `SHASUMS256.txt` listing
///
/// Each line has the form `<hex digest>  <filename>`.
pub fn find_checksum<'a>(listing: &'a str, filename: &str) -> Option<&'a str> {
    listing.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        let digest = parts.next()?;
        let name = parts.next()?;
        (name == filename).then_some(digest)
    })
}
