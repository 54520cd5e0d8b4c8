//! Configuration management for lspkit

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Files tried (in order) for the base TOML configuration
const CONFIG_PATHS: [&str; 2] = ["lspkit.toml", ".lspkit/config.toml"];

/// Prefix for environment variable overrides (`LSPKIT__LOGGING__LEVEL=debug`)
const ENV_PREFIX: &str = "LSPKIT__";

/// Multi-word keys, matched against env segments ignoring case and underscores
const CAMEL_CASE_KEYS: [&str; 5] = [
    "managedVersion",
    "distUrl",
    "verifyChecksums",
    "timeoutSecs",
    "preferCi",
];

/// Map a split env key (`install.timeout_secs`) onto serde field names
/// (`install.timeoutSecs`)
fn env_key(key: &str) -> String {
    key.split('.')
        .map(|segment| {
            let folded = segment.replace('_', "").to_lowercase();
            CAMEL_CASE_KEYS
                .iter()
                .find(|name| name.to_lowercase() == folded)
                .map_or(folded, |name| name.to_string())
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// Runtime resolution configuration
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Private storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// Dependency installation configuration
    #[serde(default)]
    pub install: InstallConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// One entry of the ranked runtime source list
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeSourceKind {
    /// Runtime found on the system `PATH`
    System,
    /// Runtime downloaded into private storage
    Local,
}

impl std::fmt::Display for RuntimeSourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeSourceKind::System => write!(f, "system"),
            RuntimeSourceKind::Local => write!(f, "local"),
        }
    }
}

/// Runtime resolution configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// Ranked list of acceptable runtime sources, tried in order
    pub sources: Vec<RuntimeSourceKind>,
    /// Version of the runtime installed when a managed copy is needed
    pub managed_version: String,
    /// Base URL of the runtime distribution server
    pub dist_url: String,
    /// Verify downloaded archives against the published SHA-256 sums
    pub verify_checksums: bool,
}

/// Private storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// Root of the private storage tree (defaults to the user data directory)
    pub root: Option<PathBuf>,
}

/// Dependency installation configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstallConfig {
    /// Upper bound for one installer run in seconds (0 disables the limit)
    pub timeout_secs: u64,
    /// Use `npm ci` when the staged package ships a lockfile
    pub prefer_ci: bool,
}

/// Log output format
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format for development
    #[default]
    Pretty,
    /// Structured JSON format for production
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            sources: vec![RuntimeSourceKind::System, RuntimeSourceKind::Local],
            managed_version: "20.18.0".to_string(),
            dist_url: "https://nodejs.org/dist/".to_string(),
            verify_checksums: true,
        }
    }
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 600,
            prefer_ci: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl StorageConfig {
    /// Resolve the storage root, falling back to `<data dir>/lspkit`
    pub fn resolved_root(&self) -> ConfigResult<PathBuf> {
        if let Some(root) = &self.root {
            return Ok(root.clone());
        }

        dirs::data_dir()
            .or_else(dirs::home_dir)
            .map(|dir| dir.join("lspkit"))
            .ok_or_else(|| ConfigError::config("Could not determine a data directory for storage"))
    }
}

impl AppConfig {
    /// Load configuration from config files and the environment
    ///
    /// Priority order (highest to lowest):
    /// 1. Environment variables (`LSPKIT__*`)
    /// 2. First existing file of `lspkit.toml`, `.lspkit/config.toml`
    /// 3. Default values
    pub fn load() -> ConfigResult<Self> {
        let file = CONFIG_PATHS
            .iter()
            .map(Path::new)
            .find(|path| path.exists());
        Self::load_from(file)
    }

    /// Load configuration using an explicit TOML file (if any) plus env overrides
    pub fn load_from(file: Option<&Path>) -> ConfigResult<Self> {
        use figment::{
            providers::{Env, Format, Serialized, Toml},
            Figment,
        };

        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

        if let Some(path) = file {
            if !path.exists() {
                return Err(ConfigError::config(format!(
                    "Configuration file not found: {}",
                    path.display()
                )));
            }
            tracing::info!(path = %path.display(), "Loading TOML configuration");
            figment = figment.merge(Toml::file(path));
        }

        let figment = figment.merge(
            Env::prefixed(ENV_PREFIX)
                .split("__")
                .map(|k| env_key(k.as_str()).into()),
        );

        let app_config: AppConfig = figment
            .extract()
            .map_err(|e| ConfigError::config(format!("Failed to load configuration: {}", e)))?;

        app_config.validate()?;

        tracing::debug!(
            sources = ?app_config.runtime.sources,
            managed_version = %app_config.runtime.managed_version,
            "Configuration loaded successfully"
        );

        Ok(app_config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.runtime.sources.is_empty() {
            return Err(ConfigError::config(
                "At least one runtime source must be configured",
            ));
        }

        let version = self.runtime.managed_version.trim();
        let version = version.strip_prefix('v').unwrap_or(version);
        if semver::Version::parse(version).is_err() {
            return Err(ConfigError::config(format!(
                "Invalid managed runtime version '{}'",
                self.runtime.managed_version
            )));
        }

        let dist_url = url::Url::parse(&self.runtime.dist_url).map_err(|e| {
            ConfigError::config(format!(
                "Invalid distribution URL '{}': {}",
                self.runtime.dist_url, e
            ))
        })?;
        if dist_url.scheme() != "https" {
            return Err(ConfigError::config(format!(
                "Distribution URL must use HTTPS: {}",
                self.runtime.dist_url
            )));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::config(format!(
                "Invalid log level '{}', must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        Ok(())
    }
}
