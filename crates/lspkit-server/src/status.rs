//! Server readiness
//!
//! A [`StatusTracker`] is a watch channel over [`ServerStatus`]. Readers poll
//! it with [`StatusTracker::get`] or await a terminal state with
//! [`StatusTracker::wait_settled`]; only the install machinery in this crate
//! writes to it.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerStatus {
    Uninitialized,
    InProgress,
    Ready,
    Error,
}

impl ServerStatus {
    /// Ready and Error are terminal for one install run
    pub fn is_settled(self) -> bool {
        matches!(self, ServerStatus::Ready | ServerStatus::Error)
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ServerStatus::Uninitialized => "uninitialized",
            ServerStatus::InProgress => "in progress",
            ServerStatus::Ready => "ready",
            ServerStatus::Error => "error",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone)]
pub struct StatusTracker {
    sender: Arc<watch::Sender<ServerStatus>>,
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusTracker {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(ServerStatus::Uninitialized);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn get(&self) -> ServerStatus {
        *self.sender.borrow()
    }

    pub(crate) fn set(&self, status: ServerStatus) {
        let previous = self.sender.send_replace(status);
        if previous != status {
            tracing::debug!(from = %previous, to = %status, "Server status changed");
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ServerStatus> {
        self.sender.subscribe()
    }

    /// Wait until the status is Ready or Error
    pub async fn wait_settled(&self) -> ServerStatus {
        let mut receiver = self.subscribe();
        let settled = match receiver.wait_for(|status| status.is_settled()).await {
            Ok(status) => *status,
            Err(_) => self.get(),
        };
        settled
    }
}
