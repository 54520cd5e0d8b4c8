//! Node.js distribution archives: naming, download, verification and extraction

use crate::archive::unpack;
use crate::download::{download_file, fetch_text, find_checksum, verify_checksum};
use crate::error::{Result, RuntimeError};
use crate::version::VersionValue;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Name of the directory the extracted distribution is renamed to
pub const NODE_DIR_NAME: &str = "node";

/// Directory (under the managed base dir) where archives are kept until extracted
pub const ARCHIVE_CACHE_DIR: &str = "cache";

/// Current platform in the vocabulary of the Node.js download server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

impl Platform {
    /// Detect the current platform
    pub fn current() -> Self {
        let os = if cfg!(target_os = "linux") {
            "linux"
        } else if cfg!(target_os = "macos") {
            "darwin"
        } else if cfg!(target_os = "windows") {
            "win"
        } else {
            "unknown"
        };

        let arch = if cfg!(target_arch = "x86_64") {
            "x64"
        } else if cfg!(target_arch = "aarch64") {
            "arm64"
        } else {
            "unknown"
        };

        Self {
            os: os.to_string(),
            arch: arch.to_string(),
        }
    }
}

/// A Node.js release that can be installed privately
#[derive(Debug, Clone)]
pub struct NodeDistribution {
    version: VersionValue,
    dist_url: String,
    verify_checksums: bool,
    platform: Platform,
}

impl NodeDistribution {
    pub fn new(version: VersionValue, dist_url: impl Into<String>) -> Self {
        let mut dist_url = dist_url.into();
        if !dist_url.ends_with('/') {
            dist_url.push('/');
        }
        Self {
            version,
            dist_url,
            verify_checksums: true,
            platform: Platform::current(),
        }
    }

    pub fn with_checksums(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn version(&self) -> &VersionValue {
        &self.version
    }

    /// Archive filename and its download URL for the configured platform
    ///
    /// Windows distributions ship as zip, the rest as gzip'd tarballs.
    pub fn archive(&self) -> Result<(String, String)> {
        let extension = match self.platform.os.as_str() {
            "linux" | "darwin" => "tar.gz",
            "win" => "zip",
            _ => "",
        };
        let supported_arch = matches!(self.platform.arch.as_str(), "x64" | "arm64");
        if extension.is_empty() || !supported_arch {
            return Err(RuntimeError::PlatformNotSupported {
                os: self.platform.os.clone(),
                arch: self.platform.arch.clone(),
            });
        }

        let filename = format!(
            "node-v{}-{}-{}.{extension}",
            self.version, self.platform.os, self.platform.arch
        );
        let url = format!("{}v{}/{}", self.dist_url, self.version, filename);
        Ok((filename, url))
    }

    fn checksums_url(&self) -> String {
        format!("{}v{}/SHASUMS256.txt", self.dist_url, self.version)
    }

    /// The configured distribution host, trusted in addition to the defaults
    fn trusted_hosts(&self) -> Vec<String> {
        url::Url::parse(&self.dist_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .into_iter()
            .collect()
    }

    /// Fetch the archive into `base_dir/cache`, verifying its checksum
    ///
    /// A previously downloaded archive is reused.
    pub async fn download(&self, base_dir: &Path) -> Result<PathBuf> {
        let (filename, url) = self.archive()?;
        let archive = base_dir.join(ARCHIVE_CACHE_DIR).join(&filename);
        let hosts = self.trusted_hosts();

        if archive.is_file() {
            debug!(archive = %archive.display(), "Reusing cached archive");
        } else {
            download_file(&url, &archive, &hosts).await?;
        }

        if self.verify_checksums {
            let listing = fetch_text(&self.checksums_url(), &hosts).await?;
            let expected = find_checksum(&listing, &filename).ok_or_else(|| {
                RuntimeError::DownloadFailed(format!("No published checksum for {filename}"))
            })?;
            if let Err(e) = verify_checksum(&archive, expected).await {
                // A corrupt cached archive would fail every retry
                let _ = tokio::fs::remove_file(&archive).await;
                return Err(e);
            }
        } else {
            warn!("Checksum verification disabled for managed runtime download");
        }

        Ok(archive)
    }

    /// Unpack a downloaded archive into `base_dir/node` and drop the archive
    pub async fn extract(&self, archive: &Path, base_dir: &Path) -> Result<PathBuf> {
        let node_dir = extract_archive(archive, base_dir).await?;
        tokio::fs::remove_file(archive).await?;
        Ok(node_dir)
    }

    /// Install this release under `base_dir`, producing `base_dir/node`
    pub async fn install(&self, base_dir: &Path) -> Result<PathBuf> {
        info!(version = %self.version, base_dir = %base_dir.display(), "Installing Node.js");

        let archive = self.download(base_dir).await?;
        let node_dir = self.extract(&archive, base_dir).await?;

        info!(node_dir = %node_dir.display(), "✅ Node.js installed");
        Ok(node_dir)
    }
}

/// Extract a distribution archive into `base_dir` and rename its top-level
/// directory to [`NODE_DIR_NAME`]
pub async fn extract_archive(archive: &Path, base_dir: &Path) -> Result<PathBuf> {
    let top_dir = unpack(archive, base_dir).await?.ok_or_else(|| {
        RuntimeError::ExtractionFailed(format!(
            "{} has no top-level directory",
            archive.display()
        ))
    })?;

    let node_dir = base_dir.join(NODE_DIR_NAME);
    if tokio::fs::try_exists(&node_dir).await? {
        tokio::fs::remove_dir_all(&node_dir).await?;
    }
    tokio::fs::rename(base_dir.join(&top_dir), &node_dir).await?;

    Ok(node_dir)
}
