use thiserror::Error;

use crate::types::Diagnostic;

#[derive(Debug, Error, Clone)]
pub enum BackendError {
    #[error("Backend {backend} is unavailable: {reason}")]
    Unavailable { backend: String, reason: String },

    #[error("Backend {backend} failed to initialize: {reason}")]
    Initialization { backend: String, reason: String },

    #[error("Backend is not ready (state: {state})")]
    NotReady { state: String },

    #[error("Build failed: {message}")]
    BuildFailed {
        message: String,
        diagnostics: Vec<Diagnostic>,
    },

    #[error("Instantiation failed: {reason}")]
    Instantiation { reason: String },

    #[error("Entry point not found: {name} (exports: {exports:?})")]
    EntryPointNotFound { name: String, exports: Vec<String> },

    #[error("Execution timeout: {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Toolchain error: {reason}")]
    Toolchain { reason: String },

    #[error("Task failed: {reason}")]
    Task { reason: String },

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        BackendError::Io(err.to_string())
    }
}

impl From<tokio::task::JoinError> for BackendError {
    fn from(err: tokio::task::JoinError) -> Self {
        BackendError::Task {
            reason: err.to_string(),
        }
    }
}
