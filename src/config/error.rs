// error.rs
// Description: Errors from Config::validate and the environment helpers.
// History:
// - 2026-10-18: Validation, unreadable and unparsable environment variables.

use thiserror::Error;

/// Errors produced when building or validating configuration.
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    /// Values are inconsistent or out of range (e.g. width not divisible by heads).
    #[error("config validation: {0}")]
    Validation(String),

    /// Set but not valid Unicode.
    #[error("env var {key}: {message}")]
    EnvVar { key: String, message: String },

    /// Set but does not parse into the expected type.
    #[error("env var {key}={value:?}: {message}")]
    Parse {
        key: String,
        value: String,
        message: String,
    },
}
