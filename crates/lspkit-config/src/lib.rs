//! Configuration and logging for lspkit
//!
//! `AppConfig` is assembled from serialized defaults, an optional TOML file
//! and `LSPKIT__*` environment overrides.

mod config;
mod error;
pub mod logging;

pub use config::{
    AppConfig, InstallConfig, LogFormat, LoggingConfig, RuntimeConfig, RuntimeSourceKind,
    StorageConfig,
};
pub use error::{ConfigError, ConfigResult};
