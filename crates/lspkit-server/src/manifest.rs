//! Content fingerprints of package manifests

use sha2::{Digest, Sha256};
use std::path::Path;

/// Name of the manifest file compared between source and staged copies
pub const MANIFEST_FILE: &str = "package.json";

/// SHA-256 of a manifest file; only equality is meaningful
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageManifest(String);

impl PackageManifest {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(format!("{:x}", Sha256::digest(bytes)))
    }

    pub async fn from_file(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        Ok(Self::from_bytes(&bytes))
    }

    pub fn digest(&self) -> &str {
        &self.0
    }
}
