//! User confirmation for managed runtime installs

use async_trait::async_trait;

/// Yes/no decision callback shown before a managed runtime is downloaded
///
/// Answering "no" is a valid outcome: the candidate is skipped and resolution
/// continues with the next one.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConsentPrompt: Send + Sync {
    async fn confirm(&self, message: &str) -> bool;
}

/// A prompt with a fixed answer (`--yes` on the command line, tests)
#[derive(Debug, Clone, Copy)]
pub struct StaticConsent(pub bool);

#[async_trait]
impl ConsentPrompt for StaticConsent {
    async fn confirm(&self, message: &str) -> bool {
        tracing::debug!(answer = self.0, %message, "Answering managed install prompt");
        self.0
    }
}

/// Message shown when no usable runtime exists yet
pub fn managed_install_message(package_name: &str) -> String {
    format!(
        "Could not start {package_name} because no suitable Node.js runtime was found on the PATH. \
         Install Node.js automatically? It is installed privately for language servers and does \
         not affect the rest of the system."
    )
}
