//! Configuration Error Types
//!
//! Errors raised while loading and validating configuration. All of them are
//! fatal at startup.

use thiserror::Error;

/// Configuration-related errors with detailed context
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// File, environment or merge failure inside the layered loader
    #[error("Failed to load configuration: {error}")]
    LoadError { error: String },

    /// Configuration file named explicitly but not present
    #[error("Configuration file not found: {file_path}")]
    FileNotFound { file_path: String },

    /// Invalid configuration value
    #[error("Invalid value '{value}' for field '{field}': {context}")]
    InvalidValue {
        field: String,
        value: String,
        context: String,
    },

    /// Invalid workflow or handler registration
    #[error("Invalid registration for '{name}': {reason}")]
    InvalidRegistration { name: String, reason: String },
}

impl ConfigurationError {
    pub fn load_error<E: std::fmt::Display>(error: E) -> Self {
        Self::LoadError {
            error: error.to_string(),
        }
    }

    /// Create an invalid value error
    pub fn invalid_value<F: Into<String>, V: std::fmt::Display, C: Into<String>>(
        field: F,
        value: V,
        context: C,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.to_string(),
            context: context.into(),
        }
    }

    pub fn invalid_registration<N: Into<String>, R: Into<String>>(name: N, reason: R) -> Self {
        Self::InvalidRegistration {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(err: config::ConfigError) -> Self {
        Self::load_error(err)
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigurationError>;
