//! Error types for Tollgate.

use thiserror::Error;

/// Main error type for Tollgate operations.
///
/// None of these variants represent a rate limit rejection. A rejected request
/// is a successful decision carried by a [`Lease`](crate::ratelimit::Lease).
#[derive(Error, Debug)]
pub enum TollgateError {
    /// The caller referenced a policy that was never registered.
    #[error("Unknown policy: {0}")]
    UnknownPolicy(String),

    /// A policy with the same name is already registered.
    #[error("Duplicate policy: {0}")]
    DuplicatePolicy(String),

    /// A policy failed validation at registration time.
    #[error("Invalid configuration for policy '{policy}': {reason}")]
    InvalidConfiguration {
        /// Name of the offending policy
        policy: String,
        /// What was wrong with it
        reason: String,
    },

    /// Engine-wide settings are out of range.
    #[error("Invalid engine configuration: {0}")]
    InvalidEngineConfiguration(String),

    /// Configuration source could not be loaded or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TollgateError {
    pub(crate) fn invalid(policy: &str, reason: impl Into<String>) -> Self {
        TollgateError::InvalidConfiguration {
            policy: policy.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether this error points at a misconfiguration rather than an I/O failure.
    pub fn is_configuration_error(&self) -> bool {
        !matches!(self, TollgateError::Io(_))
    }
}

impl From<config::ConfigError> for TollgateError {
    fn from(err: config::ConfigError) -> Self {
        TollgateError::Config(err.to_string())
    }
}

/// Result type alias for Tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;
