//! Error types for the client handler facade

use lspkit_config::ConfigError;
use lspkit_runtime::RuntimeError;
use lspkit_server::InstallError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("{0}: server has not been set up")]
    NotSetUp(String),

    #[error("Unknown event kind '{0}' (expected 'notification' or 'request')")]
    UnknownEventKind(String),

    #[error("Handler for '{method}' does not match event kind '{kind}'")]
    HandlerKindMismatch { kind: String, method: String },

    #[error(transparent)]
    Install(#[from] InstallError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, HandlerError>;
