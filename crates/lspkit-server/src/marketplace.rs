//! Servers shipped inside VS Code Marketplace extensions
//!
//! The `.vsix` package is fetched from the public gallery and unpacked into
//! `<package storage>/<publisher.name>~<version>/`. The server is ready once
//! its entry point exists there.

use crate::declaration::PackageDeclaration;
use crate::error::{InstallError, Result};
use crate::locks::InstallLocks;
use crate::pip::remove_dir_if_present;
use crate::resource::ServerResource;
use crate::status::{ServerStatus, StatusTracker};
use async_trait::async_trait;
use lspkit_runtime::archive::{gunzip_if_compressed, unpack};
use lspkit_runtime::download::download_file;
use lspkit_runtime::ResolvedRuntime;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const MARKETPLACE_GALLERY_URL: &str =
    "https://marketplace.visualstudio.com/_apis/public/gallery";

/// An extension release on the marketplace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketplaceExtension {
    pub publisher: String,
    pub name: String,
    pub version: String,
}

impl MarketplaceExtension {
    /// Parse a `publisher.name` item name
    pub fn parse(item_name: &str, version: &str) -> Result<Self> {
        let invalid = || {
            InstallError::InvalidDeclaration(format!(
                "extensionItemName '{item_name}' is not of the form publisher.name"
            ))
        };
        let (publisher, name) = item_name.split_once('.').ok_or_else(invalid)?;
        let well_formed = |part: &str| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        };
        if !well_formed(publisher) || !well_formed(name) {
            return Err(invalid());
        }
        Ok(Self {
            publisher: publisher.to_string(),
            name: name.to_string(),
            version: version.to_string(),
        })
    }

    pub fn item_name(&self) -> String {
        format!("{}.{}", self.publisher, self.name)
    }

    pub fn download_url(&self, gallery_url: &str) -> String {
        format!(
            "{}/publishers/{}/vsextensions/{}/{}/vspackage",
            gallery_url.trim_end_matches('/'),
            self.publisher,
            self.name,
            self.version
        )
    }
}

pub struct VscodeMarketplaceResource {
    package_name: String,
    extension: MarketplaceExtension,
    server_binary_path: PathBuf,
    package_storage: PathBuf,
    gallery_url: String,
    runtime: Option<Arc<ResolvedRuntime>>,
    locks: Arc<InstallLocks>,
    status: StatusTracker,
}

impl VscodeMarketplaceResource {
    pub fn new(
        package_name: impl Into<String>,
        extension: MarketplaceExtension,
        server_binary_path: impl Into<PathBuf>,
        package_storage: impl Into<PathBuf>,
        locks: Arc<InstallLocks>,
    ) -> Self {
        Self {
            package_name: package_name.into(),
            extension,
            server_binary_path: server_binary_path.into(),
            package_storage: package_storage.into(),
            gallery_url: MARKETPLACE_GALLERY_URL.to_string(),
            runtime: None,
            locks,
            status: StatusTracker::new(),
        }
    }

    /// `runtime` is required when the declaration asks to run with Node.js
    pub fn from_declaration(
        declaration: &PackageDeclaration,
        package_storage: &Path,
        runtime: Option<Arc<ResolvedRuntime>>,
        locks: Arc<InstallLocks>,
    ) -> Result<Self> {
        let version = declaration.extension_version.as_deref().unwrap_or_default();
        let item_name = declaration.extension_item_name.as_deref().unwrap_or_default();
        let extension = MarketplaceExtension::parse(item_name, version)?;

        let runtime = match (declaration.execute_with_node, runtime) {
            (true, None) => {
                return Err(InstallError::InvalidDeclaration(format!(
                    "{} runs with Node.js but no runtime was resolved",
                    declaration.name
                )))
            }
            (true, runtime) => runtime,
            (false, _) => None,
        };

        let mut resource = Self::new(
            declaration.name.clone(),
            extension,
            declaration.server_binary_path.clone(),
            package_storage,
            locks,
        );
        resource.runtime = runtime;
        Ok(resource)
    }

    /// Fetch from a gallery mirror instead of the public marketplace
    pub fn with_gallery_url(mut self, gallery_url: impl Into<String>) -> Self {
        self.gallery_url = gallery_url.into();
        self
    }

    pub fn extension(&self) -> &MarketplaceExtension {
        &self.extension
    }

    /// `<package storage>/<publisher.name>~<version>`
    pub fn package_cache_path(&self) -> PathBuf {
        self.package_storage.join(format!(
            "{}~{}",
            self.extension.item_name(),
            self.extension.version
        ))
    }

    /// Where the downloaded package waits to be unpacked
    pub fn vsix_path(&self) -> PathBuf {
        self.package_storage.join(format!(
            "{}~{}.vsix",
            self.extension.item_name(),
            self.extension.version
        ))
    }

    fn trusted_hosts(&self) -> Vec<String> {
        url::Url::parse(&self.gallery_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .into_iter()
            .collect()
    }

    async fn fetch_and_unpack(&self) -> Result<()> {
        let cache_path = self.package_cache_path();
        remove_dir_if_present(&cache_path).await?;
        tokio::fs::create_dir_all(&self.package_storage).await?;

        let vsix = self.vsix_path();
        if vsix.is_file() {
            debug!(vsix = %vsix.display(), "Reusing downloaded extension package");
        } else {
            let url = self.extension.download_url(&self.gallery_url);
            download_file(&url, &vsix, &self.trusted_hosts()).await?;
        }
        if gunzip_if_compressed(&vsix).await? {
            debug!(vsix = %vsix.display(), "Decompressed gzip'd extension package");
        }

        unpack(&vsix, &cache_path).await?;
        if !self.binary_path().is_file() {
            return Err(InstallError::installation_failed(
                &self.package_name,
                format!(
                    "{} does not contain {}",
                    self.extension.item_name(),
                    self.server_binary_path.display()
                ),
            ));
        }

        tokio::fs::remove_file(&vsix).await?;
        Ok(())
    }

    async fn discard_partial(&self) {
        if let Err(e) = remove_dir_if_present(&self.package_cache_path()).await {
            warn!(package = %self.package_name, error = %e, "Failed to remove partial extension");
        }
        // A truncated or corrupt package would fail every retry
        match tokio::fs::remove_file(self.vsix_path()).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                warn!(package = %self.package_name, error = %e, "Failed to remove extension package");
            }
            _ => {}
        }
    }
}

#[async_trait]
impl ServerResource for VscodeMarketplaceResource {
    fn package_name(&self) -> &str {
        &self.package_name
    }

    fn binary_path(&self) -> PathBuf {
        self.package_cache_path().join(&self.server_binary_path)
    }

    fn server_directory_path(&self) -> PathBuf {
        self.package_cache_path()
    }

    fn runtime_path(&self) -> Option<PathBuf> {
        self.runtime.as_ref().map(|runtime| runtime.binary.clone())
    }

    fn status(&self) -> &StatusTracker {
        &self.status
    }

    async fn needs_installation(&self) -> bool {
        let in_flight = self.status.get() == ServerStatus::InProgress
            || self.locks.is_held(&self.package_name);
        if in_flight {
            debug!(package = %self.package_name, "Install in flight");
            return true;
        }
        if self.binary_path().is_file() {
            self.status.set(ServerStatus::Ready);
            return false;
        }
        true
    }

    async fn install_or_update(&self, cancel: CancellationToken) -> Result<()> {
        let guard = self.locks.acquire(&self.package_name).await;
        if guard.waited() && self.binary_path().is_file() {
            self.status.set(ServerStatus::Ready);
            return Ok(());
        }

        self.status.set(ServerStatus::InProgress);
        info!(
            package = %self.package_name,
            extension = %self.extension.item_name(),
            version = %self.extension.version,
            "Installing marketplace extension"
        );

        let result = tokio::select! {
            result = self.fetch_and_unpack() => result,
            _ = cancel.cancelled() => Err(InstallError::Cancelled {
                package: self.package_name.clone(),
            }),
        };

        match result {
            Ok(()) => {
                self.status.set(ServerStatus::Ready);
                info!(package = %self.package_name, "✅ Server ready");
                Ok(())
            }
            Err(e) => {
                self.discard_partial().await;
                self.status.set(ServerStatus::Error);
                error!(package = %self.package_name, error = %e, "Server installation failed");
                Err(e)
            }
        }
    }
}
