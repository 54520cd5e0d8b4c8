//! Choosing one runtime from a ranked list of sources
//!
//! The first candidate that exists (or can be installed with the user's
//! consent) and satisfies the version floor wins. The outcome is cached in a
//! [`RuntimeCache`] shared by every package in the process.

use crate::error::{Result, RuntimeError};
use crate::feedback::{FeedbackOutcome, InstallFeedback};
use crate::managed::ManagedLocalRuntime;
use crate::node::NodeDistribution;
use crate::prompt::{managed_install_message, ConsentPrompt};
use crate::source::{ResolvedRuntime, RuntimeSource};
use crate::system::SystemRuntime;
use crate::version::VersionValue;
use lspkit_config::{RuntimeConfig, RuntimeSourceKind};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Title used for the managed runtime install activity
pub const MANAGED_INSTALL_TITLE: &str = "Installing Node.js";

/// Process-scoped result of runtime resolution
///
/// Read-mostly: after the first successful resolution every caller gets the
/// same runtime. Failures are never cached.
#[derive(Debug, Default)]
pub struct RuntimeCache {
    resolved: RwLock<Option<Arc<ResolvedRuntime>>>,
    consent: RwLock<Option<bool>>,
    resolving: tokio::sync::Mutex<()>,
}

impl RuntimeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Arc<ResolvedRuntime>> {
        self.resolved
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The user's answer to the managed install prompt, if they were asked
    pub fn consent(&self) -> Option<bool> {
        *self.consent.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forget the resolved runtime and the consent answer
    pub fn reset(&self) {
        *self.resolved.write().unwrap_or_else(PoisonError::into_inner) = None;
        *self.consent.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn store(&self, runtime: ResolvedRuntime) -> Arc<ResolvedRuntime> {
        let runtime = Arc::new(runtime);
        *self.resolved.write().unwrap_or_else(PoisonError::into_inner) = Some(runtime.clone());
        runtime
    }

    fn record_consent(&self, answer: bool) {
        *self.consent.write().unwrap_or_else(PoisonError::into_inner) = Some(answer);
    }
}

pub struct RuntimeSelector {
    cache: Arc<RuntimeCache>,
    prompt: Arc<dyn ConsentPrompt>,
    feedback: Arc<dyn InstallFeedback>,
}

impl RuntimeSelector {
    pub fn new(
        cache: Arc<RuntimeCache>,
        prompt: Arc<dyn ConsentPrompt>,
        feedback: Arc<dyn InstallFeedback>,
    ) -> Self {
        Self {
            cache,
            prompt,
            feedback,
        }
    }

    pub fn cache(&self) -> &Arc<RuntimeCache> {
        &self.cache
    }

    /// Resolve a runtime at or above `minimum` for `package_name`
    pub async fn resolve(
        &self,
        candidates: &[Box<dyn RuntimeSource>],
        minimum: &VersionValue,
        package_name: &str,
    ) -> Result<Arc<ResolvedRuntime>> {
        if let Some(cached) = self.cached_for(minimum, package_name) {
            return cached;
        }

        let _guard = self.cache.resolving.lock().await;
        if let Some(cached) = self.cached_for(minimum, package_name) {
            return cached;
        }

        for candidate in candidates {
            let kind = candidate.kind();
            match self.try_candidate(candidate.as_ref(), minimum, package_name).await {
                Ok(Some(runtime)) => {
                    info!(
                        package = %package_name,
                        runtime = %kind,
                        version = %runtime.version,
                        binary = %runtime.binary.display(),
                        "Resolved runtime"
                    );
                    return Ok(self.cache.store(runtime));
                }
                Ok(None) => debug!(runtime = %kind, "Runtime candidate skipped"),
                Err(e) => warn!(package = %package_name, runtime = %kind, error = %e, "Runtime candidate rejected"),
            }
        }

        Err(RuntimeError::RuntimeUnavailable {
            minimum: minimum.to_string(),
        })
    }

    fn cached_for(
        &self,
        minimum: &VersionValue,
        package_name: &str,
    ) -> Option<Result<Arc<ResolvedRuntime>>> {
        let cached = self.cache.get()?;
        if cached.version.satisfies(minimum) {
            return Some(Ok(cached));
        }
        warn!(
            package = %package_name,
            version = %cached.version,
            minimum = %minimum,
            "Process runtime is older than this package requires"
        );
        Some(Err(RuntimeError::RuntimeUnavailable {
            minimum: minimum.to_string(),
        }))
    }

    /// `Ok(None)` means the candidate was declined or absent
    async fn try_candidate(
        &self,
        candidate: &dyn RuntimeSource,
        minimum: &VersionValue,
        package_name: &str,
    ) -> Result<Option<ResolvedRuntime>> {
        if !candidate.exists() {
            if !candidate.can_install() {
                return Ok(None);
            }
            if !self.ask_consent(package_name).await {
                info!(package = %package_name, "Managed runtime install declined");
                return Ok(None);
            }
            self.install(candidate).await?;
        }

        let runtime = candidate.resolve().await?;
        if !runtime.version.satisfies(minimum) {
            return Err(RuntimeError::VersionTooOld {
                found: runtime.version.to_string(),
                minimum: minimum.to_string(),
            });
        }
        Ok(Some(runtime))
    }

    async fn ask_consent(&self, package_name: &str) -> bool {
        if let Some(answer) = self.cache.consent() {
            return answer;
        }
        let answer = self
            .prompt
            .confirm(&managed_install_message(package_name))
            .await;
        self.cache.record_consent(answer);
        answer
    }

    async fn install(&self, candidate: &dyn RuntimeSource) -> Result<()> {
        self.feedback.on_started(MANAGED_INSTALL_TITLE);
        let result = candidate.install_if_needed().await;
        let outcome = match &result {
            Ok(()) => FeedbackOutcome::Succeeded,
            Err(e) => FeedbackOutcome::Failed(e.to_string()),
        };
        self.feedback.on_finished(MANAGED_INSTALL_TITLE, &outcome);
        result
    }
}

/// Build the ranked candidate list described by the runtime configuration
///
/// The managed runtime lives under `<storage_root>/runtime/node-dist`.
pub fn candidates_from_config(
    config: &RuntimeConfig,
    storage_root: &Path,
) -> Result<Vec<Box<dyn RuntimeSource>>> {
    let managed_version = VersionValue::parse(&config.managed_version)?;

    Ok(config
        .sources
        .iter()
        .map(|kind| -> Box<dyn RuntimeSource> {
            match kind {
                RuntimeSourceKind::System => Box::new(SystemRuntime::from_path()),
                RuntimeSourceKind::Local => {
                    let distribution =
                        NodeDistribution::new(managed_version.clone(), config.dist_url.clone())
                            .with_checksums(config.verify_checksums);
                    Box::new(ManagedLocalRuntime::new(
                        storage_root.join("runtime").join("node-dist"),
                        distribution,
                    ))
                }
            }
        })
        .collect())
}
