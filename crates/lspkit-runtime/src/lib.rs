//! Runtime resolution for language servers
//!
//! A package declares the minimum runtime version it needs; the
//! [`RuntimeSelector`] walks the configured [`RuntimeSource`]s in order and
//! returns the first one that exists and is new enough. When no usable
//! runtime is on the PATH the user can agree to a private Node.js install
//! under the storage root.
//!
//! ```ignore
//! let cache = Arc::new(RuntimeCache::new());
//! let selector = RuntimeSelector::new(cache, Arc::new(StaticConsent(true)), Arc::new(LogFeedback));
//! let candidates = candidates_from_config(&config.runtime, &storage_root)?;
//! let runtime = selector.resolve(&candidates, &VersionValue::new(14, 0, 0), "LSP-demo").await?;
//! ```

pub mod archive;
pub mod download;
mod error;
pub mod feedback;
mod managed;
pub mod node;
pub mod prompt;
mod selector;
mod source;
mod system;
mod version;

pub use error::{Result, RuntimeError};
pub use feedback::{FeedbackOutcome, InstallFeedback, LogFeedback, SpinnerFeedback};
pub use managed::ManagedLocalRuntime;
pub use node::NodeDistribution;
pub use prompt::{ConsentPrompt, StaticConsent};
pub use selector::{candidates_from_config, RuntimeCache, RuntimeSelector, MANAGED_INSTALL_TITLE};
pub use source::{query_version, PackageManagerCommand, ResolvedRuntime, RuntimeSource};
pub use system::SystemRuntime;
pub use version::VersionValue;
