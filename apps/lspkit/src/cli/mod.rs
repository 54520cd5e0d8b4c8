//! CLI command handling for lspkit

mod consent;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use consent::TerminalConsent;
use lspkit_config::AppConfig;
use lspkit_handler::{ClientHandler, HandlerHost, HostServices, StartContext};
use lspkit_runtime::{
    candidates_from_config, ConsentPrompt, InstallFeedback, LogFeedback, RuntimeSelector,
    SpinnerFeedback, StaticConsent, VersionValue,
};
use lspkit_server::{PackageDeclaration, ResourceKind};
use serde::Serialize;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// The main CLI struct.
#[derive(Parser)]
#[command(name = "lspkit")]
#[command(about = "Resolve runtimes and install language servers for editor plugins")]
#[command(version)]
pub struct Cli {
    /// Configuration file (defaults to ./lspkit.toml or ./.lspkit/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Agree to a managed runtime install without asking
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// The available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Resolve the runtime for a version floor and print it
    Runtime {
        /// Oldest acceptable runtime version
        #[arg(long, default_value = "14.0.0")]
        minimum: String,
    },
    /// Show whether a declared package is installed and up to date
    Status {
        /// Package declaration (TOML)
        package: PathBuf,
    },
    /// Install or update a declared package and wait for the result
    Install {
        /// Package declaration (TOML)
        package: PathBuf,
    },
    /// Report whether the package's server may start (exit code 1 if not)
    Check {
        /// Package declaration (TOML)
        package: PathBuf,
    },
}

/// A plugin backed by a declaration file
struct DeclaredPlugin {
    declaration: PackageDeclaration,
}

impl ClientHandler for DeclaredPlugin {
    fn declaration(&self) -> &PackageDeclaration {
        &self.declaration
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusReport {
    package: String,
    kind: ResourceKind,
    status: Option<String>,
    needs_installation: bool,
    command: Vec<String>,
}

/// Run a parsed command, returning the process exit code
pub async fn run(cli: Cli) -> Result<i32> {
    let config = AppConfig::load_from(cli.config.as_deref()).context("Failed to load configuration")?;
    lspkit_config::logging::initialize(&config);

    let prompt: Arc<dyn ConsentPrompt> = if cli.yes {
        Arc::new(StaticConsent(true))
    } else {
        Arc::new(TerminalConsent)
    };
    let feedback: Arc<dyn InstallFeedback> = if std::io::stderr().is_terminal() && !cli.json {
        Arc::new(SpinnerFeedback::new())
    } else {
        Arc::new(LogFeedback)
    };
    let services = Arc::new(HostServices::new(config, prompt, feedback));

    match cli.command {
        Commands::Runtime { minimum } => runtime(&services, &minimum, cli.json).await,
        Commands::Status { package } => status(services, &package, cli.json).await,
        Commands::Install { package } => install(services, &package).await,
        Commands::Check { package } => check(services, &package).await,
    }
}

fn load_host(services: Arc<HostServices>, package: &Path) -> Result<HandlerHost> {
    let declaration = PackageDeclaration::from_file(package)
        .with_context(|| format!("Failed to read package declaration {}", package.display()))?;
    info!(package = %declaration.name, kind = ?declaration.kind, "Loaded package declaration");
    Ok(HandlerHost::new(
        Arc::new(DeclaredPlugin { declaration }),
        services,
    ))
}

async fn runtime(services: &HostServices, minimum: &str, json: bool) -> Result<i32> {
    let minimum = VersionValue::parse(minimum).context("Invalid --minimum")?;
    let storage_root = services.config.storage.resolved_root()?;
    let candidates = candidates_from_config(&services.config.runtime, &storage_root)?;

    let selector = RuntimeSelector::new(
        Arc::clone(&services.runtime_cache),
        Arc::clone(&services.prompt),
        Arc::clone(&services.feedback),
    );
    let runtime = selector
        .resolve(&candidates, &minimum, "lspkit")
        .await
        .context("No usable runtime")?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "kind": runtime.kind,
                "binary": runtime.binary,
                "version": runtime.version,
            })
        );
    } else {
        println!(
            "{} runtime {} at {}",
            runtime.kind,
            runtime.version,
            runtime.binary.display()
        );
    }
    Ok(0)
}

async fn status(services: Arc<HostServices>, package: &Path, json: bool) -> Result<i32> {
    let host = load_host(services, package)?;
    host.prepare().await?;

    let needs_installation = host.needs_update_or_installation().await;
    let report = StatusReport {
        package: host.declaration().name.clone(),
        kind: host.declaration().kind,
        status: host.status().map(|s| s.to_string()),
        needs_installation,
        command: host.command()?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("package:            {}", report.package);
        println!("kind:               {:?}", report.kind);
        println!(
            "status:             {}",
            report.status.as_deref().unwrap_or("unknown")
        );
        println!("needs installation: {}", report.needs_installation);
        println!("command:            {}", report.command.join(" "));
    }
    Ok(if needs_installation { 1 } else { 0 })
}

async fn install(services: Arc<HostServices>, package: &Path) -> Result<i32> {
    let host = load_host(services, package)?;
    host.setup().await?;

    let outcome = tokio::select! {
        result = host.wait_for_install() => result,
        _ = tokio::signal::ctrl_c() => {
            host.cleanup();
            anyhow::bail!("Installation interrupted");
        }
    };

    match outcome {
        Some(result) => result?,
        None => println!("✅ Already up to date"),
    }
    println!("{}", host.command()?.join(" "));
    Ok(0)
}

async fn check(services: Arc<HostServices>, package: &Path) -> Result<i32> {
    let host = load_host(services, package)?;
    // Inspect only, never install
    if let Err(e) = host.prepare().await {
        tracing::error!(error = %e, "Could not prepare server");
    } else if host.needs_update_or_installation().await {
        println!(
            "{}: Server not installed, run `lspkit install {}`",
            host.declaration().name,
            package.display()
        );
        return Ok(1);
    }

    let context = StartContext {
        workspace_folders: vec![std::env::current_dir()?],
        initiating_file: None,
    };
    match host.can_start(&context) {
        None => {
            println!("ready");
            Ok(0)
        }
        Some(message) => {
            println!("{message}");
            Ok(1)
        }
    }
}
