//! External dependency installer processes

use crate::error::{InstallError, Result};
use async_trait::async_trait;
use lspkit_config::InstallConfig;
use lspkit_runtime::PackageManagerCommand;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Lockfiles that make `npm ci` usable
const LOCKFILES: [&str; 2] = ["package-lock.json", "npm-shrinkwrap.json"];

/// Installs a staged package's dependencies
///
/// A non-zero exit is the only failure signal; the captured output travels in
/// [`InstallError::InstallationFailed`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DependencyInstaller: Send + Sync {
    async fn install(&self, package_dir: &Path, cancel: &CancellationToken) -> Result<String>;
}

/// Runs `npm ci` / `npm install` with the resolved runtime's package manager
#[derive(Debug, Clone)]
pub struct NpmInstaller {
    package: String,
    package_manager: PackageManagerCommand,
    prefer_ci: bool,
    timeout: Option<Duration>,
}

impl NpmInstaller {
    pub fn new(
        package: impl Into<String>,
        package_manager: PackageManagerCommand,
        config: &InstallConfig,
    ) -> Self {
        Self {
            package: package.into(),
            package_manager,
            prefer_ci: config.prefer_ci,
            timeout: timeout_from_config(config),
        }
    }

    fn uses_ci(&self, package_dir: &Path) -> bool {
        self.prefer_ci && LOCKFILES.iter().any(|name| package_dir.join(name).is_file())
    }

    /// Arguments after the package manager's own prefix arguments
    pub fn arguments(&self, package_dir: &Path) -> Vec<String> {
        let dir = package_dir.to_string_lossy().into_owned();
        let subcommand = if self.uses_ci(package_dir) { "ci" } else { "install" };
        vec![
            subcommand.to_string(),
            "--scripts-prepend-node-path".to_string(),
            "--verbose".to_string(),
            "--production".to_string(),
            "--prefix".to_string(),
            dir.clone(),
            dir,
        ]
    }
}

#[async_trait]
impl DependencyInstaller for NpmInstaller {
    async fn install(&self, package_dir: &Path, cancel: &CancellationToken) -> Result<String> {
        if !package_dir.is_dir() {
            return Err(InstallError::installation_failed(
                &self.package,
                format!("Package directory {} does not exist", package_dir.display()),
            ));
        }

        let args = self.arguments(package_dir);
        info!(package = %self.package, subcommand = %args[0], "Installing server dependencies");

        let mut cmd = self.package_manager.command();
        cmd.args(&args);
        run_captured(cmd, &self.package, cancel, self.timeout).await
    }
}

pub(crate) fn timeout_from_config(config: &InstallConfig) -> Option<Duration> {
    (config.timeout_secs > 0).then(|| Duration::from_secs(config.timeout_secs))
}

/// Run a process to completion, capturing stdout and stderr together
///
/// Cancellation and timeout both kill the child.
pub(crate) async fn run_captured(
    mut cmd: Command,
    package: &str,
    cancel: &CancellationToken,
    timeout: Option<Duration>,
) -> Result<String> {
    let program = cmd.as_std().get_program().to_string_lossy().into_owned();
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn().map_err(|e| {
        InstallError::installation_failed(package, format!("Failed to run {program}: {e}"))
    })?;

    let wait = async {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| InstallError::Timeout {
                    package: package.to_string(),
                    secs: limit.as_secs(),
                }),
            None => Ok(child.wait_with_output().await),
        }
    };

    let output = tokio::select! {
        _ = cancel.cancelled() => {
            return Err(InstallError::Cancelled { package: package.to_string() });
        }
        output = wait => output??,
    };

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    let combined = combined.trim().to_string();

    if !output.status.success() {
        debug!(package = %package, %program, code = ?output.status.code(), "Installer exited with failure");
        return Err(InstallError::installation_failed(package, combined));
    }

    Ok(combined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn installer(prefer_ci: bool) -> NpmInstaller {
        NpmInstaller::new(
            "LSP-demo",
            PackageManagerCommand::new("npm"),
            &InstallConfig {
                timeout_secs: 0,
                prefer_ci,
            },
        )
    }

    #[test]
    fn test_install_without_lockfile() {
        let dir = TempDir::new().unwrap();
        let args = installer(true).arguments(dir.path());
        let path = dir.path().to_string_lossy().into_owned();
        assert_eq!(
            args,
            vec![
                "install",
                "--scripts-prepend-node-path",
                "--verbose",
                "--production",
                "--prefix",
                path.as_str(),
                path.as_str(),
            ]
        );
    }

    #[test]
    fn test_ci_with_lockfile() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("package-lock.json"), "{}").unwrap();
        assert_eq!(installer(true).arguments(dir.path())[0], "ci");
        assert_eq!(installer(false).arguments(dir.path())[0], "install");
    }

    #[test]
    fn test_zero_timeout_disables_limit() {
        let config = InstallConfig {
            timeout_secs: 0,
            prefer_ci: true,
        };
        assert_eq!(timeout_from_config(&config), None);
        let config = InstallConfig {
            timeout_secs: 30,
            prefer_ci: true,
        };
        assert_eq!(timeout_from_config(&config), Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_missing_package_dir() {
        let dir = TempDir::new().unwrap();
        let result = installer(true)
            .install(&dir.path().join("absent"), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(InstallError::InstallationFailed { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_captures_output_of_failed_process() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo resolving; echo 'ERR! 404' >&2; exit 1"]);
        let err = run_captured(cmd, "LSP-demo", &CancellationToken::new(), None)
            .await
            .unwrap_err();
        match err {
            InstallError::InstallationFailed { output, .. } => {
                assert!(output.contains("resolving"));
                assert!(output.contains("ERR! 404"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancellation_stops_process() {
        let cancel = CancellationToken::new();
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 30"]);

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = run_captured(cmd, "LSP-demo", &cancel, None).await;
        assert!(matches!(result, Err(InstallError::Cancelled { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_stops_process() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 30"]);
        let result = run_captured(
            cmd,
            "LSP-demo",
            &CancellationToken::new(),
            Some(Duration::from_millis(50)),
        )
        .await;
        assert!(matches!(result, Err(InstallError::Timeout { .. })));
    }
}
