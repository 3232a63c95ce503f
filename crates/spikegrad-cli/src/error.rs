//! Error handling for the spikegrad CLI

use thiserror::Error;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;

/// CLI-specific errors
#[derive(Error, Debug)]
pub enum CliError {
    /// Runtime layer error
    #[error("Runtime error: {0}")]
    Runtime(#[from] spikegrad_runtime::RuntimeError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// TOML parse error
    #[error("Serialization error: {0}")]
    Serde(#[from] toml::de::Error),

    /// Report encoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem failure with the path that caused it
    #[error("{0:#}")]
    Generic(#[from] anyhow::Error),

    /// Invalid command arguments
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),
}

impl CliError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid arguments error
    pub fn invalid_args(msg: impl Into<String>) -> Self {
        Self::InvalidArgs(msg.into())
    }
}
