//! Server resources: something that can be installed and then started

use crate::declaration::{PackageDeclaration, ResourceKind};
use crate::error::{InstallError, Result};
use crate::installer::NpmInstaller;
use crate::locks::InstallLocks;
use crate::marketplace::VscodeMarketplaceResource;
use crate::orchestrator::{InstallHandle, InstallOrchestrator};
use crate::package::InstalledPackage;
use crate::pip::PipServerResource;
use crate::status::{ServerStatus, StatusTracker};
use async_trait::async_trait;
use lspkit_config::InstallConfig;
use lspkit_runtime::{InstallFeedback, ResolvedRuntime};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A language server whose files live under private storage
#[async_trait]
pub trait ServerResource: Send + Sync {
    fn package_name(&self) -> &str;

    /// Entry point of the server
    fn binary_path(&self) -> PathBuf;

    fn server_directory_path(&self) -> PathBuf;

    /// Interpreter the entry point must be run with, if any
    fn runtime_path(&self) -> Option<PathBuf>;

    fn status(&self) -> &StatusTracker;

    fn get_status(&self) -> ServerStatus {
        self.status().get()
    }

    async fn needs_installation(&self) -> bool;

    async fn install_or_update(&self, cancel: CancellationToken) -> Result<()>;
}

/// Start `resource.install_or_update` on a worker task
pub fn spawn_install(
    resource: Arc<dyn ServerResource>,
    cancel: CancellationToken,
    feedback: Arc<dyn InstallFeedback>,
) -> InstallHandle {
    let package = resource.package_name().to_string();
    InstallHandle::spawn(&package, feedback, async move {
        resource.install_or_update(cancel).await
    })
}

/// An npm server staged per runtime version and run with that runtime
pub struct NpmServerResource {
    orchestrator: Arc<InstallOrchestrator>,
    runtime: Arc<ResolvedRuntime>,
}

impl NpmServerResource {
    /// Storage layout: `<package_storage>/<runtime version>/<server directory>`
    pub fn new(
        declaration: &PackageDeclaration,
        package_storage: &Path,
        runtime: Arc<ResolvedRuntime>,
        install: &InstallConfig,
        locks: Arc<InstallLocks>,
    ) -> Self {
        let package = InstalledPackage::new(declaration, package_storage, &runtime.version);
        let installer = NpmInstaller::new(
            declaration.name.clone(),
            runtime.package_manager.clone(),
            install,
        );
        Self {
            orchestrator: Arc::new(InstallOrchestrator::new(package, Arc::new(installer), locks)),
            runtime,
        }
    }

    pub fn orchestrator(&self) -> &Arc<InstallOrchestrator> {
        &self.orchestrator
    }
}

#[async_trait]
impl ServerResource for NpmServerResource {
    fn package_name(&self) -> &str {
        self.orchestrator.package().name()
    }

    fn binary_path(&self) -> PathBuf {
        self.orchestrator.package().binary_path()
    }

    fn server_directory_path(&self) -> PathBuf {
        self.orchestrator.package().server_dir()
    }

    fn runtime_path(&self) -> Option<PathBuf> {
        Some(self.runtime.binary.clone())
    }

    fn status(&self) -> &StatusTracker {
        self.orchestrator.status()
    }

    async fn needs_installation(&self) -> bool {
        self.orchestrator.needs_installation().await
    }

    async fn install_or_update(&self, cancel: CancellationToken) -> Result<()> {
        self.orchestrator.install_or_update(cancel).await
    }
}

/// Private storage directory of one package
pub fn package_storage(storage_root: &Path, package_name: &str) -> PathBuf {
    storage_root.join("packages").join(package_name)
}

/// Build the resource a declaration describes
///
/// npm packages need a resolved runtime, as do marketplace extensions run
/// with Node.js; pip packages bring their own interpreter.
pub fn create_resource(
    declaration: &PackageDeclaration,
    runtime: Option<Arc<ResolvedRuntime>>,
    storage_root: &Path,
    install: &InstallConfig,
    locks: Arc<InstallLocks>,
) -> Result<Arc<dyn ServerResource>> {
    declaration.validate()?;
    match declaration.kind {
        ResourceKind::Npm => {
            let runtime = runtime.ok_or_else(|| {
                InstallError::InvalidDeclaration(format!(
                    "{} is an npm package but no runtime was resolved",
                    declaration.name
                ))
            })?;
            Ok(Arc::new(NpmServerResource::new(
                declaration,
                &package_storage(storage_root, &declaration.name),
                runtime,
                install,
                locks,
            )))
        }
        ResourceKind::Pip => Ok(Arc::new(PipServerResource::from_declaration(
            declaration,
            &storage_root.join("packages"),
            install,
            locks,
        )?)),
        ResourceKind::VscodeMarketplace => Ok(Arc::new(
            VscodeMarketplaceResource::from_declaration(
                declaration,
                &package_storage(storage_root, &declaration.name),
                runtime,
                locks,
            )?,
        )),
    }
}
