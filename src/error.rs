//! Error types for numbench
//!
//! One error enum covers every tool. Per-configuration benchmark failures are
//! reported and skipped by the callers; provisioning failures propagate.

use thiserror::Error;

/// Result type alias for numbench operations
pub type Result<T> = std::result::Result<T, BenchError>;

/// Errors produced by the benchmark tools
#[derive(Debug, Error)]
pub enum BenchError {
    /// A backend has no mapping for the requested operation
    #[error("Unsupported operation '{operation}': {reason}")]
    UnsupportedOperation {
        /// Operation that was requested
        operation: String,
        /// Why it cannot be executed
        reason: String,
    },

    /// An elementwise expression could not be compiled
    #[error("Expression error in '{expr}': {reason}")]
    ExpressionError {
        /// Source text of the expression
        expr: String,
        /// Description of the problem
        reason: String,
    },

    /// Operand buffers could not be placed on a cache-line boundary
    #[error("Alignment error: {reason}")]
    AlignmentError {
        /// Description of the problem
        reason: String,
    },

    /// Invalid benchmark or provisioning configuration
    #[error("Configuration error: {reason}")]
    ConfigError {
        /// Description of the problem
        reason: String,
    },

    /// A backend was requested that is not compiled into this binary
    #[error("Backend '{name}' is not available: {reason}")]
    BackendUnavailable {
        /// Backend name
        name: String,
        /// Why it is unavailable
        reason: String,
    },

    /// Installer download failed
    #[error("Download of {url} failed: {reason}")]
    DownloadFailed {
        /// Source URL
        url: String,
        /// Description of the failure
        reason: String,
    },

    /// An external command exited unsuccessfully
    #[error("Command `{command}` failed: {reason}")]
    CommandFailed {
        /// Rendered command line
        command: String,
        /// Exit status or spawn error
        reason: String,
    },

    /// Provisioning plan could not be parsed
    #[error("Invalid provisioning plan: {0}")]
    PlanParse(#[from] toml::de::Error),

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BenchError {
    /// Shorthand for [`BenchError::ConfigError`]
    pub fn config(reason: impl Into<String>) -> Self {
        Self::ConfigError {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`BenchError::UnsupportedOperation`]
    pub fn unsupported(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            operation: operation.into(),
            reason: reason.into(),
        }
    }
}
