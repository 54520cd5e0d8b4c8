//! Per-package install locks

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Advisory locks keyed by package name, shared across every resource in a process
#[derive(Debug, Default)]
pub struct InstallLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Held for the duration of one install
#[derive(Debug)]
pub struct InstallGuard {
    _guard: OwnedMutexGuard<()>,
    waited: bool,
}

impl InstallGuard {
    /// True when another install of the same package held the lock first
    pub fn waited(&self) -> bool {
        self.waited
    }
}

impl InstallLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while an install of `package` holds its lock
    pub fn is_held(&self, package: &str) -> bool {
        self.locks
            .get(package)
            .is_some_and(|lock| lock.try_lock().is_err())
    }

    pub async fn acquire(&self, package: &str) -> InstallGuard {
        let lock = self
            .locks
            .entry(package.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        match lock.clone().try_lock_owned() {
            Ok(guard) => InstallGuard {
                _guard: guard,
                waited: false,
            },
            Err(_) => {
                tracing::debug!(package = %package, "Waiting for in-flight install");
                InstallGuard {
                    _guard: lock.lock_owned().await,
                    waited: true,
                }
            }
        }
    }
}
