//! Centralized logging initialization with environment variable support

use crate::{AppConfig, LogFormat};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing subscriber with environment variable support
///
/// Environment variables (in priority order):
/// - `RUST_LOG`: Standard Rust log filter (takes precedence over all)
/// - `LOG_FORMAT`: Override format (json, pretty)
///
/// ```bash
/// RUST_LOG=lspkit_server=debug,lspkit_runtime=info lspkit install demo-ls.toml
/// ```
pub fn initialize(config: &AppConfig) {
    let log_level = config.logging.level.parse().unwrap_or(tracing::Level::INFO);

    let env_filter = EnvFilter::from_default_env().add_directive(log_level.into());

    let format = std::env::var("LOG_FORMAT")
        .ok()
        .and_then(|f| match f.to_lowercase().as_str() {
            "json" => Some(LogFormat::Json),
            "pretty" | "human" => Some(LogFormat::Pretty),
            _ => None,
        })
        .unwrap_or_else(|| config.logging.format.clone());

    // Always stderr: stdout may be carrying a server's stdio transport
    let result = match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .try_init(),
    };

    if let Err(e) = result {
        tracing::debug!(error = %e, "Tracing subscriber already initialized");
    }
}

/// Create a span wrapping one install run of a server package
///
/// All logs emitted while the span is entered carry the package name.
pub fn install_span(package: &str) -> tracing::Span {
    tracing::info_span!("install", package = %package)
}
