//! Error types for runtime resolution

use lspkit_config::RuntimeSourceKind;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("No runtime satisfies the minimum version {minimum}")]
    RuntimeUnavailable { minimum: String },

    #[error("Malformed version string: '{0}'")]
    MalformedVersion(String),

    #[error("Runtime version {found} is older than the required {minimum}")]
    VersionTooOld { found: String, minimum: String },

    #[error("Runtime '{0}' is not installed")]
    NotInstalled(RuntimeSourceKind),

    #[error("Failed to query runtime version from {binary}: {output}")]
    VersionQueryFailed { binary: PathBuf, output: String },

    #[error("{os}/{arch} is not supported for managed runtime installs")]
    PlatformNotSupported { os: String, arch: String },

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Checksum verification failed (expected: {expected}, got: {actual})")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Insecure URL: {0}")]
    InsecureUrl(String),

    #[error("Download too large: {0} bytes (max: {1} bytes)")]
    DownloadTooLarge(u64, u64),

    #[error("Archive extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Archive {archive} contains unsafe paths: {members:?}")]
    UnsafeArchive {
        archive: String,
        members: Vec<String>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
