//! The runtime source abstraction shared by system and managed runtimes

use crate::error::{Result, RuntimeError};
use crate::version::VersionValue;
use async_trait::async_trait;
use lspkit_config::RuntimeSourceKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// How to invoke the package manager that belongs to a runtime
///
/// A system runtime runs `npm` directly; a managed runtime runs
/// `node <lib>/npm/bin/npm-cli.js` so the private node binary is used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageManagerCommand {
    pub program: PathBuf,
    pub prefix_args: Vec<String>,
}

impl PackageManagerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            prefix_args: Vec::new(),
        }
    }

    pub fn with_prefix_arg(mut self, arg: impl Into<String>) -> Self {
        self.prefix_args.push(arg.into());
        self
    }

    /// A process builder with the program and prefix arguments filled in
    pub fn command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.prefix_args);
        cmd
    }
}

/// A runtime that has been located and whose version is known
///
/// Only ever constructed complete, so a runtime is either fully resolved or
/// not resolved at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRuntime {
    pub kind: RuntimeSourceKind,
    pub binary: PathBuf,
    pub version: VersionValue,
    pub package_manager: PackageManagerCommand,
}

/// A place a runtime can come from
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RuntimeSource: Send + Sync {
    fn kind(&self) -> RuntimeSourceKind;

    /// Path of the runtime binary, if it is present
    fn locate_binary(&self) -> Option<PathBuf>;

    fn exists(&self) -> bool {
        self.locate_binary().is_some()
    }

    fn package_manager(&self) -> Result<PackageManagerCommand>;

    /// Whether this source can provision itself when absent
    fn can_install(&self) -> bool {
        false
    }

    /// Run the runtime's own version query
    async fn resolve_version(&self) -> Result<VersionValue> {
        let binary = self
            .locate_binary()
            .ok_or(RuntimeError::NotInstalled(self.kind()))?;
        query_version(&binary).await
    }

    /// Provision the runtime when it is absent
    async fn install_if_needed(&self) -> Result<()> {
        if self.exists() {
            Ok(())
        } else {
            Err(RuntimeError::NotInstalled(self.kind()))
        }
    }

    async fn resolve(&self) -> Result<ResolvedRuntime> {
        let binary = self
            .locate_binary()
            .ok_or(RuntimeError::NotInstalled(self.kind()))?;
        let version = query_version(&binary).await?;
        Ok(ResolvedRuntime {
            kind: self.kind(),
            binary,
            version,
            package_manager: self.package_manager()?,
        })
    }
}

/// Run `<binary> --version` and parse what it prints
pub async fn query_version(binary: &Path) -> Result<VersionValue> {
    let output = tokio::process::Command::new(binary)
        .arg("--version")
        .output()
        .await
        .map_err(|e| RuntimeError::VersionQueryFailed {
            binary: binary.to_path_buf(),
            output: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(RuntimeError::VersionQueryFailed {
            binary: binary.to_path_buf(),
            output: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    debug!(binary = %binary.display(), output = %stdout.trim(), "Queried runtime version");
    VersionValue::parse(&stdout)
}
