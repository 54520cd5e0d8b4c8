//! End-to-end install scenarios for npm packages
//!
//! Assets live in a temp directory; the dependency installer is either an
//! in-process fake or a shell script standing in for npm.

use async_trait::async_trait;
use lspkit_runtime::VersionValue;
use lspkit_server::{
    DependencyInstaller, InstallError, InstallHandle, InstallLocks, InstallOrchestrator,
    InstalledPackage, PackageDeclaration, ServerStatus,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Creates `node_modules` after an optional delay and counts invocations
#[derive(Default)]
struct FakeInstaller {
    calls: AtomicUsize,
    delay: Duration,
    fail: bool,
}

#[async_trait]
impl DependencyInstaller for FakeInstaller {
    async fn install(
        &self,
        package_dir: &Path,
        _cancel: &CancellationToken,
    ) -> lspkit_server::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(InstallError::installation_failed("LSP-demo", "npm ERR! code E404"));
        }
        std::fs::create_dir_all(package_dir.join("node_modules"))?;
        std::fs::write(package_dir.join("node_modules/.installed"), "ok")?;
        Ok("added 12 packages".to_string())
    }
}

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let ws = Self {
            dir: TempDir::new().unwrap(),
        };
        ws.write_manifest(r#"{"name":"demo-ls","version":"1.0.0"}"#);
        ws.write_asset("out/server.js", "console.log('hi')");
        ws
    }

    fn source(&self) -> PathBuf {
        self.dir.path().join("plugin/language-server")
    }

    fn write_asset(&self, relative: &str, content: &str) {
        let path = self.source().join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn write_manifest(&self, content: &str) {
        self.write_asset("package.json", content);
    }

    fn package(&self, runtime: VersionValue) -> InstalledPackage {
        let declaration = PackageDeclaration::from_toml(&format!(
            r#"
name = "LSP-demo"
minimumRuntimeVersion = "14.0.0"
assetsRoot = "{}"
serverDirectory = "language-server"
serverBinaryPath = "language-server/out/server.js"
"#,
            self.dir.path().join("plugin").display()
        ))
        .unwrap();
        InstalledPackage::new(
            &declaration,
            &self.dir.path().join("storage/packages/LSP-demo"),
            &runtime,
        )
    }
}

fn orchestrator(package: InstalledPackage, installer: Arc<FakeInstaller>) -> InstallOrchestrator {
    InstallOrchestrator::new(package, installer, Arc::new(InstallLocks::new()))
}

#[tokio::test]
async fn matching_manifest_with_marker_needs_no_install() {
    let ws = Workspace::new();
    let installer = Arc::new(FakeInstaller::default());
    let orchestrator = orchestrator(ws.package(VersionValue::new(16, 3, 0)), installer.clone());

    orchestrator
        .install_or_update(CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(installer.calls.load(Ordering::SeqCst), 1);

    assert!(!orchestrator.needs_installation().await);
    assert_eq!(orchestrator.get_status(), ServerStatus::Ready);
}

#[tokio::test]
async fn changed_manifest_triggers_reinstall() {
    let ws = Workspace::new();
    let installer = Arc::new(FakeInstaller::default());
    let orchestrator = orchestrator(ws.package(VersionValue::new(16, 3, 0)), installer.clone());

    orchestrator
        .install_or_update(CancellationToken::new())
        .await
        .unwrap();

    ws.write_manifest(r#"{"name":"demo-ls","version":"1.1.0"}"#);
    assert!(orchestrator.needs_installation().await);

    orchestrator
        .install_or_update(CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(installer.calls.load(Ordering::SeqCst), 2);
    assert!(!orchestrator.needs_installation().await);

    let staged = std::fs::read_to_string(orchestrator.package().manifest_path()).unwrap();
    assert!(staged.contains("1.1.0"));
}

#[tokio::test]
async fn missing_marker_always_forces_reinstall() {
    let ws = Workspace::new();
    let orchestrator = orchestrator(
        ws.package(VersionValue::new(16, 3, 0)),
        Arc::new(FakeInstaller::default()),
    );
    orchestrator
        .install_or_update(CancellationToken::new())
        .await
        .unwrap();

    std::fs::remove_dir_all(orchestrator.package().marker_dir()).unwrap();
    assert!(orchestrator.needs_installation().await);
}

#[tokio::test]
async fn unreadable_staged_manifest_needs_installation() {
    let ws = Workspace::new();
    let orchestrator = orchestrator(
        ws.package(VersionValue::new(16, 3, 0)),
        Arc::new(FakeInstaller::default()),
    );
    orchestrator
        .install_or_update(CancellationToken::new())
        .await
        .unwrap();

    std::fs::remove_file(orchestrator.package().manifest_path()).unwrap();
    assert!(orchestrator.needs_installation().await);
}

#[tokio::test]
async fn install_is_idempotent() {
    let ws = Workspace::new();
    let orchestrator = orchestrator(
        ws.package(VersionValue::new(16, 3, 0)),
        Arc::new(FakeInstaller::default()),
    );

    orchestrator
        .install_or_update(CancellationToken::new())
        .await
        .unwrap();
    let first = snapshot(&orchestrator.package().server_dir());

    orchestrator
        .install_or_update(CancellationToken::new())
        .await
        .unwrap();
    let second = snapshot(&orchestrator.package().server_dir());

    assert_eq!(first, second);
    assert_eq!(orchestrator.get_status(), ServerStatus::Ready);
}

#[tokio::test]
async fn installer_failure_is_surfaced_with_output() {
    let ws = Workspace::new();
    let installer = Arc::new(FakeInstaller {
        fail: true,
        ..FakeInstaller::default()
    });
    let orchestrator = orchestrator(ws.package(VersionValue::new(16, 3, 0)), installer);

    let err = orchestrator
        .install_or_update(CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        InstallError::InstallationFailed { output, .. } => assert!(output.contains("E404")),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(orchestrator.get_status(), ServerStatus::Error);
    assert!(orchestrator.needs_installation().await);
}

#[tokio::test]
async fn concurrent_installs_run_installer_once() {
    let ws = Workspace::new();
    let installer = Arc::new(FakeInstaller {
        delay: Duration::from_millis(100),
        ..FakeInstaller::default()
    });
    let orchestrator = Arc::new(orchestrator(
        ws.package(VersionValue::new(16, 3, 0)),
        installer.clone(),
    ));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.install_or_update(CancellationToken::new()).await })
        })
        .collect();

    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(installer.calls.load(Ordering::SeqCst), 1);
    assert_eq!(orchestrator.get_status(), ServerStatus::Ready);
    assert!(orchestrator.package().marker_dir().join(".installed").is_file());
}

#[tokio::test]
async fn switching_runtime_stages_fresh_directory() {
    let ws = Workspace::new();
    let locks = Arc::new(InstallLocks::new());
    let installer = Arc::new(FakeInstaller::default());

    let old = InstallOrchestrator::new(
        ws.package(VersionValue::new(16, 3, 0)),
        installer.clone(),
        locks.clone(),
    );
    old.install_or_update(CancellationToken::new()).await.unwrap();

    let new = InstallOrchestrator::new(ws.package(VersionValue::new(20, 18, 0)), installer, locks);
    assert!(new.needs_installation().await);
    assert_ne!(old.package().server_dir(), new.package().server_dir());
}

#[tokio::test]
async fn status_observers_see_in_progress() {
    let ws = Workspace::new();
    let orchestrator = Arc::new(orchestrator(
        ws.package(VersionValue::new(16, 3, 0)),
        Arc::new(FakeInstaller {
            delay: Duration::from_millis(100),
            ..FakeInstaller::default()
        }),
    ));

    let mut updates = orchestrator.status().subscribe();
    let worker = Arc::clone(&orchestrator);
    let feedback = Arc::new(lspkit_server::LogFeedback);
    let handle = InstallHandle::spawn("LSP-demo", feedback, async move {
        worker.install_or_update(CancellationToken::new()).await
    });

    updates
        .wait_for(|status| *status == ServerStatus::InProgress)
        .await
        .unwrap();
    handle.wait().await.unwrap();
    assert_eq!(orchestrator.wait_settled().await, ServerStatus::Ready);
}

#[cfg(unix)]
mod npm_process {
    use super::*;
    use lspkit_config::InstallConfig;
    use lspkit_runtime::PackageManagerCommand;
    use lspkit_server::NpmInstaller;
    use std::os::unix::fs::PermissionsExt;

    fn fake_npm(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("npm");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn npm_orchestrator(ws: &Workspace, npm: PathBuf) -> InstallOrchestrator {
        let installer = NpmInstaller::new(
            "LSP-demo",
            PackageManagerCommand::new(npm),
            &InstallConfig::default(),
        );
        InstallOrchestrator::new(
            ws.package(VersionValue::new(16, 3, 0)),
            Arc::new(installer),
            Arc::new(InstallLocks::new()),
        )
    }

    #[tokio::test]
    async fn npm_exit_zero_means_ready() {
        let ws = Workspace::new();
        // The last argument is the package directory
        let npm = fake_npm(
            ws.dir.path(),
            r#"for last; do :; done; mkdir -p "$last/node_modules"; echo "added 1 package""#,
        );
        let orchestrator = npm_orchestrator(&ws, npm);

        orchestrator
            .install_or_update(CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(orchestrator.get_status(), ServerStatus::Ready);
        assert!(!orchestrator.needs_installation().await);
    }

    #[tokio::test]
    async fn npm_exit_one_means_error() {
        let ws = Workspace::new();
        let npm = fake_npm(ws.dir.path(), "echo 'npm ERR! network' >&2; exit 1");
        let orchestrator = npm_orchestrator(&ws, npm);

        let err = orchestrator
            .install_or_update(CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("npm ERR! network"));
        assert_eq!(orchestrator.get_status(), ServerStatus::Error);
    }

    #[tokio::test]
    async fn npm_failing_midway_keeps_assets_but_not_dependencies() {
        let ws = Workspace::new();
        let npm = fake_npm(
            ws.dir.path(),
            r#"for last; do :; done; mkdir -p "$last/node_modules/left-pad"; exit 1"#,
        );
        let orchestrator = npm_orchestrator(&ws, npm);

        assert!(orchestrator
            .install_or_update(CancellationToken::new())
            .await
            .is_err());

        let package = orchestrator.package();
        assert!(package.manifest_path().is_file());
        assert!(package.binary_path().is_file());
        assert!(!package.marker_dir().exists());
        assert!(orchestrator.needs_installation().await);
        assert_eq!(orchestrator.get_status(), ServerStatus::Error);
    }
}

fn snapshot(root: &Path) -> Vec<(PathBuf, Vec<u8>)> {
    let mut files: Vec<_> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| {
            (
                entry.path().strip_prefix(root).unwrap().to_path_buf(),
                std::fs::read(entry.path()).unwrap(),
            )
        })
        .collect();
    files.sort();
    files
}
