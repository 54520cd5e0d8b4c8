//! Error types for server staging and installation

use lspkit_runtime::RuntimeError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InstallError {
    #[error("Failed to stage {source_dir} into {destination}: {reason}")]
    StagingFailed {
        source_dir: PathBuf,
        destination: PathBuf,
        reason: String,
    },

    #[error("Installing dependencies for {package} failed:\n{output}")]
    InstallationFailed { package: String, output: String },

    #[error("Installing dependencies for {package} timed out after {secs}s")]
    Timeout { package: String, secs: u64 },

    #[error("Installation of {package} was cancelled")]
    Cancelled { package: String },

    #[error("Invalid package declaration: {0}")]
    InvalidDeclaration(String),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl InstallError {
    pub fn installation_failed(package: impl Into<String>, output: impl Into<String>) -> Self {
        Self::InstallationFailed {
            package: package.into(),
            output: output.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, InstallError>;
