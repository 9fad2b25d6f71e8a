//! Error types for the faultline registry
//!
//! Only the query/parse/config paths report errors. The capture path
//! never does: a capture that cannot be completed degrades to a partial
//! record instead.

use std::time::Duration;

use thiserror::Error;

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors surfaced to callers of the registry
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Rendered frame text did not have the `Type.method:line` shape
    #[error("invalid stack frame '{input}': {reason}")]
    FrameFormat { input: String, reason: &'static str },

    /// A bounded backend swap could not get exclusive access in time.
    /// The registry is left exactly as it was before the attempt.
    #[error("backend swap timed out after {waited:?}")]
    LockTimeout { waited: Duration },

    /// A configuration value is out of range
    #[error("invalid configuration {key}={value}")]
    InvalidConfig { key: &'static str, value: String },

    /// The process-wide registry was already set up
    #[error("registry already initialized")]
    AlreadyInitialized,
}

impl RegistryError {
    pub(crate) fn frame_format(input: &str, reason: &'static str) -> Self {
        RegistryError::FrameFormat {
            input: input.to_string(),
            reason,
        }
    }
}
