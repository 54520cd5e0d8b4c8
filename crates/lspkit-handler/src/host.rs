//! Lifecycle hooks a host editor calls on behalf of a plugin

use crate::error::{HandlerError, Result};
use crate::handler::{ClientHandler, StartContext};
use crate::registry::{HandlerRegistry, SessionSink};
use lspkit_config::AppConfig;
use lspkit_runtime::{
    candidates_from_config, ConsentPrompt, InstallFeedback, ResolvedRuntime, RuntimeCache,
    RuntimeSelector, RuntimeSource,
};
use lspkit_server::{
    create_resource, install_title, spawn_install, InstallHandle, InstallLocks,
    PackageDeclaration, ResourceKind, ServerResource, ServerStatus,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Process-wide collaborators shared by every hosted plugin
pub struct HostServices {
    pub config: AppConfig,
    pub runtime_cache: Arc<RuntimeCache>,
    pub prompt: Arc<dyn ConsentPrompt>,
    pub feedback: Arc<dyn InstallFeedback>,
    pub locks: Arc<InstallLocks>,
}

impl HostServices {
    pub fn new(
        config: AppConfig,
        prompt: Arc<dyn ConsentPrompt>,
        feedback: Arc<dyn InstallFeedback>,
    ) -> Self {
        Self {
            config,
            runtime_cache: Arc::new(RuntimeCache::new()),
            prompt,
            feedback,
            locks: Arc::new(InstallLocks::new()),
        }
    }
}

/// Drives one plugin: runtime resolution, background install, start gating
pub struct HandlerHost {
    handler: Arc<dyn ClientHandler>,
    services: Arc<HostServices>,
    registry: HandlerRegistry,
    runtime_sources: Option<Vec<Box<dyn RuntimeSource>>>,
    server: RwLock<Option<Arc<dyn ServerResource>>>,
    install: tokio::sync::Mutex<Option<InstallHandle>>,
    setup_lock: tokio::sync::Mutex<()>,
    set_up: AtomicBool,
    cancel: Mutex<CancellationToken>,
}

impl HandlerHost {
    pub fn new(handler: Arc<dyn ClientHandler>, services: Arc<HostServices>) -> Self {
        Self {
            handler,
            services,
            registry: HandlerRegistry::new(),
            runtime_sources: None,
            server: RwLock::new(None),
            install: tokio::sync::Mutex::new(None),
            setup_lock: tokio::sync::Mutex::new(()),
            set_up: AtomicBool::new(false),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Use these runtime candidates instead of the configured ones
    pub fn with_runtime_sources(mut self, sources: Vec<Box<dyn RuntimeSource>>) -> Self {
        self.runtime_sources = Some(sources);
        self
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn server(&self) -> Option<Arc<dyn ServerResource>> {
        self.server
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn status(&self) -> Option<ServerStatus> {
        self.server().map(|server| server.get_status())
    }

    pub fn declaration(&self) -> &PackageDeclaration {
        self.handler.declaration()
    }

    fn package_name(&self) -> &str {
        self.handler.package_name()
    }

    fn cancel_token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .child_token()
    }

    /// Resolve the runtime, build the server resource and start installing it
    /// in the background when needed
    ///
    /// Returns without waiting for the install; a second call is a no-op.
    pub async fn setup(&self) -> Result<()> {
        let _guard = self.setup_lock.lock().await;
        if self.set_up.load(Ordering::Acquire) {
            return Ok(());
        }

        let server = match self.server() {
            Some(server) => server,
            None => self.build_server().await?,
        };
        if server.needs_installation().await {
            info!(package = %self.package_name(), "Installing server in the background");
            let handle = spawn_install(
                server,
                self.cancel_token(),
                Arc::clone(&self.services.feedback),
            );
            *self.install.lock().await = Some(handle);
        } else {
            info!(package = %self.package_name(), "Server already installed");
        }
        self.set_up.store(true, Ordering::Release);
        Ok(())
    }

    /// Resolve the runtime and build the server resource without installing
    ///
    /// Lets a caller inspect [`status`](Self::status) and
    /// [`needs_update_or_installation`](Self::needs_update_or_installation)
    /// before deciding to install.
    pub async fn prepare(&self) -> Result<()> {
        let _guard = self.setup_lock.lock().await;
        if self.server().is_none() {
            self.build_server().await?;
        }
        Ok(())
    }

    async fn build_server(&self) -> Result<Arc<dyn ServerResource>> {
        let declaration = self.handler.declaration();
        let storage_root = self.services.config.storage.resolved_root()?;

        let runtime = if declaration.needs_runtime() {
            Some(self.resolve_runtime(declaration, &storage_root).await?)
        } else {
            None
        };

        let server = create_resource(
            declaration,
            runtime,
            &storage_root,
            &self.services.config.install,
            Arc::clone(&self.services.locks),
        )?;
        *self.server.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&server));
        Ok(server)
    }

    async fn resolve_runtime(
        &self,
        declaration: &PackageDeclaration,
        storage_root: &Path,
    ) -> Result<Arc<ResolvedRuntime>> {
        let selector = RuntimeSelector::new(
            Arc::clone(&self.services.runtime_cache),
            Arc::clone(&self.services.prompt),
            Arc::clone(&self.services.feedback),
        );

        let configured;
        let candidates: &[Box<dyn RuntimeSource>] = match &self.runtime_sources {
            Some(sources) => sources,
            None => {
                let mut runtime_config = self.services.config.runtime.clone();
                if let Some(sources) = &declaration.runtime_sources {
                    runtime_config.sources = sources.clone();
                }
                configured = candidates_from_config(&runtime_config, storage_root)?;
                &configured
            }
        };

        selector
            .resolve(candidates, &declaration.minimum_runtime_version, &declaration.name)
            .await
            .map_err(|e| {
                error!(package = %declaration.name, error = %e, "No usable runtime");
                HandlerError::from(e)
            })
    }

    /// Cancel any running install and forget the server and session
    pub fn cleanup(&self) {
        {
            let mut cancel = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
            cancel.cancel();
            *cancel = CancellationToken::new();
        }
        self.registry.detach_session();
        self.set_up.store(false, Ordering::Release);
        *self.server.write().unwrap_or_else(PoisonError::into_inner) = None;
        info!(package = %self.package_name(), "Handler cleaned up");
    }

    /// `None` when the server may start, otherwise a message for the user
    pub fn can_start(&self, context: &StartContext) -> Option<String> {
        let name = self.package_name();
        let refusal = match self.status() {
            None | Some(ServerStatus::Error) => {
                Some(format!("{name}: Error installing server dependencies."))
            }
            Some(ServerStatus::Ready) => None,
            Some(_) => Some(format!("{name}: Server installation in progress...")),
        };

        if let Some(message) = refusal {
            self.services
                .feedback
                .on_progress(&install_title(name), &message);
            return Some(message);
        }
        self.handler.is_allowed_to_start(context)
    }

    pub async fn needs_update_or_installation(&self) -> bool {
        match self.server() {
            Some(server) => server.needs_installation().await,
            None => false,
        }
    }

    /// Install in the foreground, waiting for the result
    pub async fn install_or_update(&self) -> Result<()> {
        let server = self
            .server()
            .ok_or_else(|| HandlerError::NotSetUp(self.package_name().to_string()))?;
        server.install_or_update(self.cancel_token()).await?;
        Ok(())
    }

    /// Wait for the install started by [`setup`](Self::setup), if there is one
    pub async fn wait_for_install(&self) -> Option<Result<()>> {
        let handle = self.install.lock().await.take()?;
        Some(handle.wait().await.map_err(HandlerError::from))
    }

    /// `[runtime, server binary, args...]`, or `[server binary, args...]` for
    /// servers that carry their own interpreter
    pub fn command(&self) -> Result<Vec<String>> {
        let server = self
            .server()
            .ok_or_else(|| HandlerError::NotSetUp(self.package_name().to_string()))?;

        let mut command = Vec::new();
        if let Some(runtime) = server.runtime_path() {
            command.push(runtime.to_string_lossy().into_owned());
        }
        command.push(server.binary_path().to_string_lossy().into_owned());
        command.extend(self.handler.binary_args());
        Ok(command)
    }

    /// Variables a host can substitute into user-facing configuration
    pub fn additional_variables(&self) -> HashMap<String, String> {
        let mut variables = HashMap::new();
        let Some(server) = self.server() else {
            return variables;
        };
        variables.insert(
            "server_path".to_string(),
            server.binary_path().to_string_lossy().into_owned(),
        );
        variables.insert(
            "server_directory_path".to_string(),
            server.server_directory_path().to_string_lossy().into_owned(),
        );
        if self.declaration().kind == ResourceKind::VscodeMarketplace {
            variables.insert(
                "package_cache_path".to_string(),
                server.server_directory_path().to_string_lossy().into_owned(),
            );
        }
        if let Some(runtime) = server.runtime_path() {
            variables.insert(
                "runtime_path".to_string(),
                runtime.to_string_lossy().into_owned(),
            );
        }
        variables
    }

    /// Connect a running session and let the plugin register its handlers
    pub fn attach_session(&self, session: Weak<dyn SessionSink>) {
        self.registry.attach_session(session);
        self.handler.on_ready(&self.registry);
    }
}
