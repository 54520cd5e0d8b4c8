//! Declared server packages
//!
//! A plugin describes its server in a small TOML file:
//!
//! ```toml
//! name = "LSP-demo"
//! kind = "npm"
//! minimumRuntimeVersion = "14.0.0"
//! serverDirectory = "language-server"
//! serverBinaryPath = "language-server/out/server.js"
//! ```
//!
//! Relative paths are resolved against the directory holding the file.

use crate::error::{InstallError, Result};
use lspkit_config::RuntimeSourceKind;
use lspkit_runtime::VersionValue;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// How the server's dependencies are provisioned
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// Staged assets plus `npm install` under a resolved Node.js runtime
    #[default]
    Npm,
    /// A private virtualenv populated from a requirements file
    Pip,
    /// A `.vsix` package downloaded from the VS Code Marketplace
    #[serde(rename = "vscode-marketplace")]
    VscodeMarketplace,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PackageDeclaration {
    pub name: String,

    #[serde(default)]
    pub kind: ResourceKind,

    /// Oldest runtime the server works with (npm only)
    #[serde(default = "default_minimum_runtime")]
    pub minimum_runtime_version: VersionValue,

    /// Overrides the configured runtime source ranking for this package
    #[serde(default)]
    pub runtime_sources: Option<Vec<RuntimeSourceKind>>,

    /// Directory holding the package's static assets
    #[serde(default)]
    pub assets_root: PathBuf,

    /// Server directory, relative to `assets_root` (npm only)
    #[serde(default)]
    pub server_directory: PathBuf,

    /// Server entry point, relative to the versioned storage directory (npm)
    /// or to the unpacked extension (vscode-marketplace)
    #[serde(default)]
    pub server_binary_path: PathBuf,

    /// `requirements.txt` with `name==version` pins (pip only)
    #[serde(default)]
    pub requirements: Option<PathBuf>,

    /// Executable installed into the virtualenv (pip only)
    #[serde(default)]
    pub server_binary: Option<String>,

    /// `publisher.name` of a marketplace extension
    #[serde(default)]
    pub extension_item_name: Option<String>,

    #[serde(default)]
    pub extension_version: Option<String>,

    /// Run a marketplace extension's entry point with a resolved Node.js runtime
    #[serde(default)]
    pub execute_with_node: bool,

    /// Extra arguments appended to the server command
    #[serde(default = "default_binary_args")]
    pub binary_args: Vec<String>,
}

fn default_minimum_runtime() -> VersionValue {
    VersionValue::new(0, 0, 0)
}

fn default_binary_args() -> Vec<String> {
    vec!["--stdio".to_string()]
}

impl PackageDeclaration {
    /// Load and validate a declaration, anchoring relative paths at its directory
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut declaration = Self::from_toml(&content)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        declaration.anchor(base);
        declaration.validate()?;
        Ok(declaration)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| InstallError::InvalidDeclaration(e.to_string()))
    }

    fn anchor(&mut self, base: &Path) {
        if self.assets_root.is_relative() {
            self.assets_root = base.join(&self.assets_root);
        }
        if let Some(requirements) = &self.requirements {
            if requirements.is_relative() {
                self.requirements = Some(base.join(requirements));
            }
        }
    }

    /// Whether a Node.js runtime must be resolved before the resource is built
    pub fn needs_runtime(&self) -> bool {
        match self.kind {
            ResourceKind::Npm => true,
            ResourceKind::Pip => false,
            ResourceKind::VscodeMarketplace => self.execute_with_node,
        }
    }

    /// Source location of the server assets
    pub fn source_dir(&self) -> PathBuf {
        self.assets_root.join(&self.server_directory)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(InstallError::InvalidDeclaration("name is empty".into()));
        }
        if self.name.contains(['/', '\\']) || self.name == "." || self.name == ".." {
            return Err(InstallError::InvalidDeclaration(format!(
                "name '{}' cannot be used as a directory name",
                self.name
            )));
        }

        match self.kind {
            ResourceKind::Npm => {
                for (field, path) in [
                    ("serverDirectory", &self.server_directory),
                    ("serverBinaryPath", &self.server_binary_path),
                ] {
                    if !is_contained(path) {
                        return Err(InstallError::InvalidDeclaration(format!(
                            "{field} must be a non-empty relative path inside the package, got '{}'",
                            path.display()
                        )));
                    }
                }
            }
            ResourceKind::Pip => {
                if self.requirements.is_none() {
                    return Err(InstallError::InvalidDeclaration(
                        "pip packages need a requirements file".into(),
                    ));
                }
                if self.server_binary.as_deref().map_or(true, str::is_empty) {
                    return Err(InstallError::InvalidDeclaration(
                        "pip packages need a serverBinary".into(),
                    ));
                }
            }
            ResourceKind::VscodeMarketplace => {
                let version = self.extension_version.as_deref().unwrap_or_default();
                if version.is_empty() || version.contains(['/', '\\']) || version == ".." {
                    return Err(InstallError::InvalidDeclaration(format!(
                        "extensionVersion '{version}' is not a release version"
                    )));
                }
                let item = self.extension_item_name.as_deref().unwrap_or_default();
                crate::marketplace::MarketplaceExtension::parse(item, version)?;
                if !is_contained(&self.server_binary_path) {
                    return Err(InstallError::InvalidDeclaration(format!(
                        "serverBinaryPath must be a non-empty relative path inside the extension, got '{}'",
                        self.server_binary_path.display()
                    )));
                }
            }
        }
        Ok(())
    }
}

fn is_contained(path: &Path) -> bool {
    path.components().next().is_some()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
