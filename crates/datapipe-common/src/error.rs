//! Error types shared across datapipe crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, DatapipeError>;

/// Errors raised by the shared configuration and IO helpers
#[derive(Error, Debug)]
pub enum DatapipeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid value for {key}: {value:?} ({reason})")]
    InvalidEnv {
        key: String,
        value: String,
        reason: String,
    },
}

impl DatapipeError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
