//! Terminal confirmation for managed runtime installs

use async_trait::async_trait;
use lspkit_runtime::ConsentPrompt;
use std::io::{BufRead, Write};

/// Asks on stderr and reads a `y`/`n` answer from stdin
pub struct TerminalConsent;

#[async_trait]
impl ConsentPrompt for TerminalConsent {
    async fn confirm(&self, message: &str) -> bool {
        let message = message.to_string();
        let answer = tokio::task::spawn_blocking(move || {
            let mut stderr = std::io::stderr();
            let _ = write!(stderr, "{message}\nInstall Node.js? [y/N] ");
            let _ = stderr.flush();

            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line).ok()?;
            Some(line)
        })
        .await;

        matches!(
            answer.ok().flatten().as_deref().map(str::trim),
            Some("y" | "Y" | "yes" | "Yes")
        )
    }
}
