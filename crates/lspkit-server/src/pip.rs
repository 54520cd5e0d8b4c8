//! pip-based servers installed into a private virtualenv

use crate::declaration::PackageDeclaration;
use crate::error::{InstallError, Result};
use crate::installer::{run_captured, timeout_from_config};
use crate::locks::InstallLocks;
use crate::resource::ServerResource;
use crate::status::{ServerStatus, StatusTracker};
use async_trait::async_trait;
use lspkit_config::InstallConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// File recording the interpreter version the virtualenv was built with
const PYTHON_VERSION_FILE: &str = "python_version";

/// One line of a requirements file: a name and an optional `==` pin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub name: String,
    pub version: Option<String>,
}

/// Parse `name==version` lines, skipping blanks and comments
pub fn parse_requirements(content: &str) -> Vec<Requirement> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let mut parts = line.split("==");
            let name = parts.next()?.trim().to_string();
            let version = parts.next().map(|v| v.trim().to_string());
            match parts.next() {
                Some(_) => None,
                None => Some(Requirement { name, version }),
            }
        })
        .collect()
}

/// Whether `pip freeze` output disagrees with any pinned requirement
fn pins_differ(requirements: &[Requirement], freeze: &str) -> bool {
    requirements.iter().any(|requirement| {
        let Some(pinned) = &requirement.version else {
            return false;
        };
        let installed = freeze.lines().find_map(|line| {
            let (name, version) = line.trim().split_once("==")?;
            name.eq_ignore_ascii_case(&requirement.name)
                .then(|| version.trim().to_string())
        });
        installed.as_deref() != Some(pinned.as_str())
    })
}

pub struct PipServerResource {
    storage_path: PathBuf,
    package_name: String,
    requirements_path: PathBuf,
    server_binary: String,
    python: PathBuf,
    timeout: Option<Duration>,
    locks: Arc<InstallLocks>,
    status: StatusTracker,
}

impl PipServerResource {
    /// The virtualenv is created at `<storage_path>/<package name>`
    pub fn new(
        storage_path: impl Into<PathBuf>,
        package_name: impl Into<String>,
        requirements_path: impl Into<PathBuf>,
        server_binary: impl Into<String>,
        locks: Arc<InstallLocks>,
    ) -> Self {
        Self {
            storage_path: storage_path.into(),
            package_name: package_name.into(),
            requirements_path: requirements_path.into(),
            server_binary: server_binary.into(),
            python: default_python(),
            timeout: None,
            locks,
            status: StatusTracker::new(),
        }
    }

    pub fn from_declaration(
        declaration: &PackageDeclaration,
        storage_path: &Path,
        install: &InstallConfig,
        locks: Arc<InstallLocks>,
    ) -> Result<Self> {
        let requirements = declaration.requirements.clone().ok_or_else(|| {
            InstallError::InvalidDeclaration(format!("{} has no requirements file", declaration.name))
        })?;
        let server_binary = declaration.server_binary.clone().ok_or_else(|| {
            InstallError::InvalidDeclaration(format!("{} has no serverBinary", declaration.name))
        })?;
        Ok(Self::new(
            storage_path,
            declaration.name.clone(),
            requirements,
            server_binary,
            locks,
        )
        .with_timeout(timeout_from_config(install)))
    }

    /// Use a specific interpreter instead of the one on the PATH
    pub fn with_python(mut self, python: impl Into<PathBuf>) -> Self {
        self.python = python.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn basedir(&self) -> PathBuf {
        self.storage_path.join(&self.package_name)
    }

    fn bindir(&self) -> PathBuf {
        self.basedir()
            .join(if cfg!(windows) { "Scripts" } else { "bin" })
    }

    fn executable(&self, name: &str) -> PathBuf {
        self.bindir().join(format!("{name}{}", std::env::consts::EXE_SUFFIX))
    }

    pub fn pip_exe(&self) -> PathBuf {
        self.executable("pip")
    }

    fn python_version_path(&self) -> PathBuf {
        self.basedir().join(PYTHON_VERSION_FILE)
    }

    async fn run<I, S>(
        &self,
        program: &Path,
        args: I,
        cwd: Option<&Path>,
        cancel: &CancellationToken,
    ) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        run_captured(cmd, &self.package_name, cancel, self.timeout).await
    }

    async fn python_version(&self, cancel: &CancellationToken) -> Result<String> {
        Ok(self
            .run(&self.python, ["--version"], None, cancel)
            .await?
            .trim()
            .to_string())
    }

    async fn check_installed(&self) -> Result<bool> {
        if !self.binary_path().is_file() || !self.pip_exe().is_file() {
            return Ok(false);
        }

        let cancel = CancellationToken::new();
        let recorded = tokio::fs::read_to_string(self.python_version_path()).await?;
        let current = self.python_version(&cancel).await?;
        if recorded.lines().next().map(str::trim) != Some(current.as_str()) {
            info!(package = %self.package_name, %current, "Interpreter changed since install");
            return Ok(false);
        }

        let requirements =
            parse_requirements(&tokio::fs::read_to_string(&self.requirements_path).await?);
        let freeze = self.run(&self.pip_exe(), ["freeze"], None, &cancel).await?;
        if pins_differ(&requirements, &freeze) {
            info!(package = %self.package_name, "Pinned requirements changed");
            return Ok(false);
        }
        Ok(true)
    }

    async fn create_environment(&self, cancel: &CancellationToken) -> Result<()> {
        remove_dir_if_present(&self.basedir()).await?;
        tokio::fs::create_dir_all(&self.basedir()).await?;

        self.run(
            &self.python,
            ["-m", "venv", self.package_name.as_str()],
            Some(&self.storage_path),
            cancel,
        )
        .await?;

        let requirements = self.requirements_path.to_string_lossy().into_owned();
        let output = self
            .run(
                &self.pip_exe(),
                [
                    "install",
                    "-r",
                    requirements.as_str(),
                    "--disable-pip-version-check",
                ],
                None,
                cancel,
            )
            .await?;
        debug!(package = %self.package_name, %output, "pip output");

        let version = self.python_version(cancel).await?;
        tokio::fs::write(self.python_version_path(), version).await?;
        Ok(())
    }
}

fn default_python() -> PathBuf {
    let name = if cfg!(windows) { "python" } else { "python3" };
    which::which(name).unwrap_or_else(|_| PathBuf::from(name))
}

pub(crate) async fn remove_dir_if_present(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[async_trait]
impl ServerResource for PipServerResource {
    fn package_name(&self) -> &str {
        &self.package_name
    }

    fn binary_path(&self) -> PathBuf {
        self.executable(&self.server_binary)
    }

    fn server_directory_path(&self) -> PathBuf {
        self.basedir()
    }

    fn runtime_path(&self) -> Option<PathBuf> {
        None
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
        match self.check_installed().await {
            Ok(true) => {
                self.status.set(ServerStatus::Ready);
                false
            }
            Ok(false) => true,
            Err(e) => {
                debug!(package = %self.package_name, error = %e, "Could not verify virtualenv");
                true
            }
        }
    }

    async fn install_or_update(&self, cancel: CancellationToken) -> Result<()> {
        let guard = self.locks.acquire(&self.package_name).await;
        if guard.waited() && matches!(self.check_installed().await, Ok(true)) {
            self.status.set(ServerStatus::Ready);
            return Ok(());
        }

        self.status.set(ServerStatus::InProgress);
        match self.create_environment(&cancel).await {
            Ok(()) => {
                self.status.set(ServerStatus::Ready);
                info!(package = %self.package_name, "✅ Server ready");
                Ok(())
            }
            Err(e) => {
                if let Err(cleanup) = remove_dir_if_present(&self.basedir()).await {
                    debug!(error = %cleanup, "Failed to remove partial virtualenv");
                }
                self.status.set(ServerStatus::Error);
                error!(package = %self.package_name, error = %e, "Server installation failed");
                Err(e)
            }
        }
    }
}
