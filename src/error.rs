//! Error types for Quotagate.

use thiserror::Error;

use crate::ratelimit::StoreError;

/// Main error type for Quotagate operations.
#[derive(Error, Debug)]
pub enum QuotagateError {
    /// Invalid limiter or service configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failure while loading layered configuration sources
    #[error("Failed to load configuration: {0}")]
    ConfigLoad(#[from] ::config::ConfigError),

    /// Store backend errors that escape the fail-open path (connect, preload)
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Quotagate operations.
pub type Result<T> = std::result::Result<T, QuotagateError>;
