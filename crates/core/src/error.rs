//! Error types for dumpsync-core.

use thiserror::Error;

/// Errors raised by the core engine.
#[derive(Debug, Error)]
pub enum CoreError {
    /// I/O error from underlying system calls.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or truncated staging artifact.
    #[error("decode error: {message}")]
    Decode { message: String },

    /// Reconstructed content does not hash to the value recorded in the
    /// instruction artifact header.
    #[error("integrity mismatch: expected md5 {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    /// Invalid configuration value.
    #[error("invalid config: {message}")]
    Config { message: String },
}

impl CoreError {
    /// Build a decode error from any displayable cause.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Build a config error from any displayable cause.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// Convenience result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
