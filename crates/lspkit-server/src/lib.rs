//! Staging, installing and tracking language server packages
//!
//! An npm server is copied from its read-only assets into
//! `<storage>/packages/<name>/<runtime version>/`, its dependencies are
//! installed with the runtime's package manager, and the outcome is published
//! through a [`StatusTracker`]. Reinstallation happens when the dependency
//! marker directory is missing or the staged `package.json` no longer matches
//! the source copy byte for byte.
//!
//! pip servers live in a private virtualenv and marketplace servers are
//! unpacked from a downloaded `.vsix`; both publish through the same
//! [`ServerResource`] surface.

mod declaration;
mod error;
mod installer;
mod locks;
mod manifest;
mod marketplace;
mod orchestrator;
mod package;
mod pip;
mod resource;
mod status;
mod store;

pub use declaration::{PackageDeclaration, ResourceKind};
pub use error::{InstallError, Result};
pub use installer::{DependencyInstaller, NpmInstaller};
pub use locks::{InstallGuard, InstallLocks};
pub use manifest::{PackageManifest, MANIFEST_FILE};
pub use marketplace::{MarketplaceExtension, VscodeMarketplaceResource, MARKETPLACE_GALLERY_URL};
pub use orchestrator::{install_title, InstallHandle, InstallOrchestrator};
pub use package::{InstalledPackage, MARKER_DIR};
pub use pip::{parse_requirements, PipServerResource, Requirement};
pub use resource::{
    create_resource, package_storage, spawn_install, NpmServerResource, ServerResource,
};
pub use status::{ServerStatus, StatusTracker};
pub use store::PackageStore;

pub use lspkit_runtime::{FeedbackOutcome, InstallFeedback, LogFeedback, SpinnerFeedback};
