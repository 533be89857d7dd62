//! Error types for the boardsync configuration system

use std::path::PathBuf;
use thiserror::Error;

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    /// Configuration file format not supported
    #[error("unsupported configuration file format: {path}")]
    UnsupportedFormat { path: PathBuf },

    /// Configuration parsing failed
    #[error("failed to parse configuration: {source}")]
    ParseError {
        #[source]
        source: Box<figment::Error>,
    },

    /// Configuration validation failed
    #[error("invalid value for '{key}': {message}")]
    ValidationError { key: String, message: String },
}

impl ConfigError {
    /// Create a validation error
    pub fn invalid(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationError {
            key: key.into(),
            message: message.into(),
        }
    }
}

impl From<figment::Error> for ConfigError {
    fn from(error: figment::Error) -> Self {
        ConfigError::ParseError {
            source: Box::new(error),
        }
    }
}

impl boardsync_common::Severity for ConfigError {
    fn severity(&self) -> boardsync_common::ErrorSeverity {
        boardsync_common::ErrorSeverity::Critical
    }
}
