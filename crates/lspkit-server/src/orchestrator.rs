//! Deciding when a staged npm package is stale and reinstalling it

use crate::error::{InstallError, Result};
use crate::installer::DependencyInstaller;
use crate::locks::InstallLocks;
use crate::manifest::PackageManifest;
use crate::package::InstalledPackage;
use crate::status::{ServerStatus, StatusTracker};
use crate::store::PackageStore;
use lspkit_config::logging::install_span;
use lspkit_runtime::{FeedbackOutcome, InstallFeedback};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

pub struct InstallOrchestrator {
    package: InstalledPackage,
    installer: Arc<dyn DependencyInstaller>,
    locks: Arc<InstallLocks>,
    status: StatusTracker,
}

impl InstallOrchestrator {
    pub fn new(
        package: InstalledPackage,
        installer: Arc<dyn DependencyInstaller>,
        locks: Arc<InstallLocks>,
    ) -> Self {
        Self {
            package,
            installer,
            locks,
            status: StatusTracker::new(),
        }
    }

    pub fn package(&self) -> &InstalledPackage {
        &self.package
    }

    pub fn status(&self) -> &StatusTracker {
        &self.status
    }

    pub fn get_status(&self) -> ServerStatus {
        self.status.get()
    }

    pub async fn wait_settled(&self) -> ServerStatus {
        self.status.wait_settled().await
    }

    /// False (and status Ready) only when the marker directory exists, the
    /// staged manifest is byte-identical to the source manifest, and no install
    /// of this package is running
    pub async fn needs_installation(&self) -> bool {
        let in_flight = self.get_status() == ServerStatus::InProgress
            || self.locks.is_held(self.package.name());
        if in_flight {
            debug!(package = %self.package.name(), "Install in flight");
            return true;
        }
        if self.is_up_to_date().await {
            self.status.set(ServerStatus::Ready);
            return false;
        }
        true
    }

    async fn is_up_to_date(&self) -> bool {
        if !self.package.marker_dir().is_dir() {
            debug!(package = %self.package.name(), "Dependency marker missing");
            return false;
        }

        let source = PackageManifest::from_file(&self.package.source_manifest_path()).await;
        let staged = PackageManifest::from_file(&self.package.manifest_path()).await;
        match (source, staged) {
            (Ok(source), Ok(staged)) if source == staged => true,
            (Ok(_), Ok(_)) => {
                info!(package = %self.package.name(), "Package manifest changed, update needed");
                false
            }
            (source, staged) => {
                debug!(
                    package = %self.package.name(),
                    source_error = ?source.err(),
                    staged_error = ?staged.err(),
                    "Could not compare manifests"
                );
                false
            }
        }
    }

    /// Re-stage the package and install its dependencies
    ///
    /// Serialized per package name. A caller that had to wait for another
    /// install re-checks staleness and returns early when that install already
    /// produced an up-to-date copy.
    pub async fn install_or_update(&self, cancel: CancellationToken) -> Result<()> {
        let guard = self.locks.acquire(self.package.name()).await;
        if guard.waited() && self.is_up_to_date().await {
            debug!(package = %self.package.name(), "Concurrent install already up to date");
            self.status.set(ServerStatus::Ready);
            return Ok(());
        }

        self.status.set(ServerStatus::InProgress);
        match self.stage_and_install(&cancel).await {
            Ok(()) => {
                self.status.set(ServerStatus::Ready);
                info!(package = %self.package.name(), "✅ Server ready");
                Ok(())
            }
            Err(e) => {
                self.status.set(ServerStatus::Error);
                error!(package = %self.package.name(), error = %e, "Server installation failed");
                Err(e)
            }
        }
    }

    async fn stage_and_install(&self, cancel: &CancellationToken) -> Result<()> {
        let server_dir = self.package.server_dir();
        PackageStore::stage(self.package.source_dir(), &server_dir).await?;

        if self.package.marker_dir().is_dir() {
            debug!(package = %self.package.name(), "Staged copy ships its dependencies");
            return Ok(());
        }

        match self.installer.install(&server_dir, cancel).await {
            Ok(output) => {
                debug!(package = %self.package.name(), %output, "Installer output");
                Ok(())
            }
            Err(e) => {
                // A partial node_modules must not pass for an installed package
                let marker = self.package.marker_dir();
                if let Err(remove) = tokio::fs::remove_dir_all(&marker).await {
                    if remove.kind() != std::io::ErrorKind::NotFound {
                        warn!(
                            path = %marker.display(),
                            error = %remove,
                            "Failed to remove partial dependencies"
                        );
                    }
                }
                Err(e)
            }
        }
    }
}

/// Feedback title of a package's install run
pub fn install_title(package: &str) -> String {
    format!("{package}: installing server")
}

/// Completion of one background install, resolved exactly once
#[derive(Debug)]
pub struct InstallHandle {
    package: String,
    receiver: oneshot::Receiver<Result<()>>,
}

impl InstallHandle {
    /// Spawn `work`, reporting start and outcome to `feedback`
    pub fn spawn<F>(package: &str, feedback: Arc<dyn InstallFeedback>, work: F) -> Self
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let title = install_title(package);
        let span = install_span(package);

        tokio::spawn(
            async move {
                feedback.on_started(&title);
                let result = work.await;
                let outcome = match &result {
                    Ok(()) => FeedbackOutcome::Succeeded,
                    Err(e) => FeedbackOutcome::Failed(e.to_string()),
                };
                feedback.on_finished(&title, &outcome);
                // The caller may have stopped listening
                let _ = sender.send(result);
            }
            .instrument(span),
        );

        Self {
            package: package.to_string(),
            receiver,
        }
    }

    pub async fn wait(self) -> Result<()> {
        match self.receiver.await {
            Ok(result) => result,
            Err(_) => Err(InstallError::Cancelled {
                package: self.package,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declaration::PackageDeclaration;
    use crate::installer::MockDependencyInstaller;
    use lspkit_runtime::{LogFeedback, VersionValue};
    use std::path::Path;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        package: InstalledPackage,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let assets = dir.path().join("assets");
        std::fs::create_dir_all(assets.join("server")).unwrap();
        std::fs::write(assets.join("server/package.json"), r#"{"version":"1.0.0"}"#).unwrap();

        let declaration = PackageDeclaration::from_toml(&format!(
            r#"
name = "LSP-demo"
assetsRoot = "{}"
serverDirectory = "server"
serverBinaryPath = "server/out/server.js"
"#,
            assets.display()
        ))
        .unwrap();
        let package = InstalledPackage::new(
            &declaration,
            &dir.path().join("storage/LSP-demo"),
            &VersionValue::new(16, 3, 0),
        );
        Fixture { _dir: dir, package }
    }

    fn creates_marker() -> MockDependencyInstaller {
        let mut installer = MockDependencyInstaller::new();
        installer.expect_install().times(1).returning(|dir: &Path, _| {
            std::fs::create_dir_all(dir.join("node_modules")).unwrap();
            Ok(String::from("added 1 package"))
        });
        installer
    }

    fn orchestrator(package: InstalledPackage, installer: MockDependencyInstaller) -> InstallOrchestrator {
        InstallOrchestrator::new(package, Arc::new(installer), Arc::new(InstallLocks::new()))
    }

    #[tokio::test]
    async fn test_fresh_package_needs_installation() {
        let fx = fixture();
        let mut installer = MockDependencyInstaller::new();
        installer.expect_install().never();
        let orchestrator = orchestrator(fx.package, installer);

        assert!(orchestrator.needs_installation().await);
        assert_eq!(orchestrator.get_status(), ServerStatus::Uninitialized);
    }

    #[tokio::test]
    async fn test_install_then_up_to_date() {
        let fx = fixture();
        let orchestrator = orchestrator(fx.package, creates_marker());

        orchestrator
            .install_or_update(CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(orchestrator.get_status(), ServerStatus::Ready);
        assert!(!orchestrator.needs_installation().await);
    }

    #[tokio::test]
    async fn test_installer_failure_sets_error() {
        let fx = fixture();
        let mut installer = MockDependencyInstaller::new();
        installer.expect_install().times(1).returning(|dir: &Path, _| {
            // npm creates node_modules before it fails
            std::fs::create_dir_all(dir.join("node_modules/half-done")).unwrap();
            Err(InstallError::installation_failed("LSP-demo", "ERR! 404"))
        });
        let orchestrator = orchestrator(fx.package, installer);

        let err = orchestrator
            .install_or_update(CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ERR! 404"));
        assert_eq!(orchestrator.get_status(), ServerStatus::Error);

        assert!(!orchestrator.package().marker_dir().exists());
        assert!(orchestrator.package().manifest_path().is_file());
        assert!(orchestrator.needs_installation().await);
        assert_eq!(orchestrator.get_status(), ServerStatus::Error);
    }

    /// Creates the marker, then blocks until released
    struct GatedInstaller {
        release: Arc<tokio::sync::Notify>,
    }

    #[async_trait::async_trait]
    impl DependencyInstaller for GatedInstaller {
        async fn install(&self, package_dir: &Path, _cancel: &CancellationToken) -> Result<String> {
            tokio::fs::create_dir_all(package_dir.join("node_modules")).await?;
            self.release.notified().await;
            Ok(String::from("added 1 package"))
        }
    }

    #[tokio::test]
    async fn test_running_install_is_never_reported_ready() {
        let fx = fixture();
        let release = Arc::new(tokio::sync::Notify::new());
        let orchestrator = Arc::new(InstallOrchestrator::new(
            fx.package,
            Arc::new(GatedInstaller {
                release: Arc::clone(&release),
            }),
            Arc::new(InstallLocks::new()),
        ));

        let worker = Arc::clone(&orchestrator);
        let install =
            tokio::spawn(async move { worker.install_or_update(CancellationToken::new()).await });

        let marker = orchestrator.package().marker_dir();
        while !marker.is_dir() {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        assert!(orchestrator.needs_installation().await);
        assert_eq!(orchestrator.get_status(), ServerStatus::InProgress);

        release.notify_one();
        install.await.unwrap().unwrap();
        assert!(!orchestrator.needs_installation().await);
        assert_eq!(orchestrator.get_status(), ServerStatus::Ready);
    }

    #[tokio::test]
    async fn test_bundled_dependencies_skip_installer() {
        let fx = fixture();
        std::fs::create_dir_all(fx.package.source_dir().join("node_modules")).unwrap();
        let mut installer = MockDependencyInstaller::new();
        installer.expect_install().never();
        let orchestrator = orchestrator(fx.package, installer);

        orchestrator
            .install_or_update(CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(orchestrator.get_status(), ServerStatus::Ready);
    }

    #[test]
    fn test_install_title() {
        assert_eq!(install_title("LSP-demo"), "LSP-demo: installing server");
    }

    #[tokio::test]
    async fn test_spawned_install_resolves_once() {
        let fx = fixture();
        let orchestrator = Arc::new(orchestrator(fx.package, creates_marker()));

        let worker = Arc::clone(&orchestrator);
        let handle = InstallHandle::spawn("LSP-demo", Arc::new(LogFeedback), async move {
            worker.install_or_update(CancellationToken::new()).await
        });
        handle.wait().await.unwrap();
        assert_eq!(orchestrator.wait_settled().await, ServerStatus::Ready);
    }
}
