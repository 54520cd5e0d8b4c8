//! Location of an installed npm server package

use crate::declaration::PackageDeclaration;
use crate::manifest::MANIFEST_FILE;
use lspkit_runtime::VersionValue;
use std::path::{Path, PathBuf};

/// Directory whose presence means dependencies have been installed
pub const MARKER_DIR: &str = "node_modules";

/// A server package staged under private storage for one runtime version
///
/// The destination is `<package storage>/<runtime version>/<server directory>`,
/// so switching runtimes stages into a fresh directory.
#[derive(Debug, Clone, PartialEq)]
pub struct InstalledPackage {
    name: String,
    source_dir: PathBuf,
    version_dir: PathBuf,
    server_directory: PathBuf,
    server_binary_path: PathBuf,
    minimum_runtime_version: VersionValue,
}

impl InstalledPackage {
    pub fn new(
        declaration: &PackageDeclaration,
        package_storage: &Path,
        runtime_version: &VersionValue,
    ) -> Self {
        Self {
            name: declaration.name.clone(),
            source_dir: declaration.source_dir(),
            version_dir: package_storage.join(runtime_version.to_string()),
            server_directory: declaration.server_directory.clone(),
            server_binary_path: declaration.server_binary_path.clone(),
            minimum_runtime_version: declaration.minimum_runtime_version.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn minimum_runtime_version(&self) -> &VersionValue {
        &self.minimum_runtime_version
    }

    /// Read-only source assets
    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    pub fn source_manifest_path(&self) -> PathBuf {
        self.source_dir.join(MANIFEST_FILE)
    }

    /// Staged copy of the server directory
    pub fn server_dir(&self) -> PathBuf {
        self.version_dir.join(&self.server_directory)
    }

    pub fn binary_path(&self) -> PathBuf {
        self.version_dir.join(&self.server_binary_path)
    }

    pub fn marker_dir(&self) -> PathBuf {
        self.server_dir().join(MARKER_DIR)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.server_dir().join(MANIFEST_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_keyed_by_runtime_version() {
        let declaration = PackageDeclaration::from_toml(
            r#"
name = "LSP-demo"
assetsRoot = "/opt/plugins/LSP-demo"
serverDirectory = "language-server"
serverBinaryPath = "language-server/out/server.js"
"#,
        )
        .unwrap();

        let package = InstalledPackage::new(
            &declaration,
            Path::new("/data/lspkit/packages/LSP-demo"),
            &VersionValue::new(16, 3, 0),
        );

        assert_eq!(package.source_dir(), Path::new("/opt/plugins/LSP-demo/language-server"));
        assert_eq!(
            package.server_dir(),
            PathBuf::from("/data/lspkit/packages/LSP-demo/16.3.0/language-server")
        );
        assert_eq!(
            package.binary_path(),
            PathBuf::from("/data/lspkit/packages/LSP-demo/16.3.0/language-server/out/server.js")
        );
        assert_eq!(package.marker_dir(), package.server_dir().join("node_modules"));
        assert_eq!(package.manifest_path(), package.server_dir().join("package.json"));

        let other_runtime = InstalledPackage::new(
            &declaration,
            Path::new("/data/lspkit/packages/LSP-demo"),
            &VersionValue::new(20, 18, 0),
        );
        assert_ne!(package.server_dir(), other_runtime.server_dir());
    }
}
