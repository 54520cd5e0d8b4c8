//! A Node.js runtime installed privately under the storage root

use crate::error::{Result, RuntimeError};
use crate::node::{NodeDistribution, NODE_DIR_NAME};
use crate::source::{PackageManagerCommand, RuntimeSource};
use async_trait::async_trait;
use lspkit_config::RuntimeSourceKind;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone)]
pub struct ManagedLocalRuntime {
    base_dir: PathBuf,
    distribution: NodeDistribution,
}

impl ManagedLocalRuntime {
    pub fn new(base_dir: impl Into<PathBuf>, distribution: NodeDistribution) -> Self {
        Self {
            base_dir: base_dir.into(),
            distribution,
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn node_dir(&self) -> PathBuf {
        self.base_dir.join(NODE_DIR_NAME)
    }

    fn binary_path(&self) -> PathBuf {
        if cfg!(windows) {
            self.node_dir().join("node.exe")
        } else {
            self.node_dir().join("bin").join("node")
        }
    }

    /// `lib/node_modules` on unix layouts, `node_modules` next to the binary on windows
    fn lib_dir(&self) -> PathBuf {
        let unix_layout = self.node_dir().join("lib").join("node_modules");
        if unix_layout.is_dir() {
            unix_layout
        } else {
            self.node_dir().join("node_modules")
        }
    }

    fn npm_cli(&self) -> PathBuf {
        self.lib_dir().join("npm").join("bin").join("npm-cli.js")
    }
}

#[async_trait]
impl RuntimeSource for ManagedLocalRuntime {
    fn kind(&self) -> RuntimeSourceKind {
        RuntimeSourceKind::Local
    }

    fn locate_binary(&self) -> Option<PathBuf> {
        let binary = self.binary_path();
        binary.is_file().then_some(binary)
    }

    fn package_manager(&self) -> Result<PackageManagerCommand> {
        let binary = self
            .locate_binary()
            .ok_or(RuntimeError::NotInstalled(RuntimeSourceKind::Local))?;
        Ok(PackageManagerCommand::new(binary)
            .with_prefix_arg(self.npm_cli().to_string_lossy().into_owned()))
    }

    fn can_install(&self) -> bool {
        true
    }

    async fn install_if_needed(&self) -> Result<()> {
        if self.exists() {
            return Ok(());
        }

        info!(
            version = %self.distribution.version(),
            base_dir = %self.base_dir.display(),
            "Managed runtime absent, installing"
        );
        self.distribution.install(&self.base_dir).await?;

        if self.exists() {
            Ok(())
        } else {
            Err(RuntimeError::ExtractionFailed(format!(
                "{} missing after install",
                self.binary_path().display()
            )))
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::source::fake::fake_node;
    use crate::version::VersionValue;
    use tempfile::TempDir;

    fn runtime(base: &Path) -> ManagedLocalRuntime {
        ManagedLocalRuntime::new(
            base,
            NodeDistribution::new(VersionValue::new(20, 18, 0), "https://nodejs.org/dist/"),
        )
    }

    #[test]
    fn test_absent_until_extracted() {
        let dir = TempDir::new().unwrap();
        let managed = runtime(dir.path());
        assert!(!managed.exists());
        assert!(managed.can_install());
        assert!(managed.package_manager().is_err());
    }

    #[tokio::test]
    async fn test_existing_install_resolves() {
        let dir = TempDir::new().unwrap();
        let managed = runtime(dir.path());
        let node = fake_node(&dir.path().join("node/bin/node"), "v20.18.0");
        std::fs::create_dir_all(dir.path().join("node/lib/node_modules/npm/bin")).unwrap();

        managed.install_if_needed().await.unwrap();
        let resolved = managed.resolve().await.unwrap();

        assert_eq!(resolved.kind, RuntimeSourceKind::Local);
        assert_eq!(resolved.binary, node);
        assert_eq!(resolved.version, VersionValue::new(20, 18, 0));
        assert_eq!(resolved.package_manager.program, node);
        assert_eq!(
            resolved.package_manager.prefix_args,
            vec![dir
                .path()
                .join("node/lib/node_modules/npm/bin/npm-cli.js")
                .to_string_lossy()
                .into_owned()]
        );
    }

    #[tokio::test]
    async fn test_malformed_version_fails_candidate() {
        let dir = TempDir::new().unwrap();
        let managed = runtime(dir.path());
        fake_node(&dir.path().join("node/bin/node"), "garbage");

        assert!(matches!(
            managed.resolve_version().await,
            Err(RuntimeError::MalformedVersion(_))
        ));
    }
}
