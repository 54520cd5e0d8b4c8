//! The runtime already installed on the user's PATH

use crate::error::{Result, RuntimeError};
use crate::source::{PackageManagerCommand, RuntimeSource};
use async_trait::async_trait;
use lspkit_config::RuntimeSourceKind;
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct SystemRuntime {
    node: Option<PathBuf>,
    npm: Option<PathBuf>,
}

impl SystemRuntime {
    /// Look `node` and `npm` up on the PATH
    pub fn from_path() -> Self {
        let node = which::which("node").ok();
        let npm = which::which("npm").ok();
        debug!(?node, ?npm, "Searched PATH for system runtime");
        Self { node, npm }
    }

    /// Use explicit binaries instead of searching the PATH
    pub fn with_binaries(node: Option<PathBuf>, npm: Option<PathBuf>) -> Self {
        Self { node, npm }
    }
}

#[async_trait]
impl RuntimeSource for SystemRuntime {
    fn kind(&self) -> RuntimeSourceKind {
        RuntimeSourceKind::System
    }

    fn locate_binary(&self) -> Option<PathBuf> {
        self.node.clone()
    }

    fn package_manager(&self) -> Result<PackageManagerCommand> {
        self.npm
            .as_ref()
            .map(PackageManagerCommand::new)
            .ok_or(RuntimeError::NotInstalled(RuntimeSourceKind::System))
    }
}
