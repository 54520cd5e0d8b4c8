//! The trait a concrete server plugin implements

use crate::registry::HandlerRegistry;
use lspkit_server::PackageDeclaration;
use std::path::PathBuf;

/// What the editor knows when it asks whether a server may start
#[derive(Debug, Clone, Default)]
pub struct StartContext {
    pub workspace_folders: Vec<PathBuf>,
    pub initiating_file: Option<PathBuf>,
}

/// A server plugin
///
/// Everything except [`declaration`](Self::declaration) has a default; a
/// minimal plugin only describes its package.
pub trait ClientHandler: Send + Sync {
    fn declaration(&self) -> &PackageDeclaration;

    fn package_name(&self) -> &str {
        &self.declaration().name
    }

    /// Arguments appended after the server binary
    fn binary_args(&self) -> Vec<String> {
        self.declaration().binary_args.clone()
    }

    /// Plugin-specific veto, consulted once the server is ready
    fn is_allowed_to_start(&self, _context: &StartContext) -> Option<String> {
        None
    }

    /// Called when a session is attached; register event handlers here
    fn on_ready(&self, _registry: &HandlerRegistry) {}
}
